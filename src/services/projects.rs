use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        project::{self, ProjectStatus},
        project_task::{self, TaskPriority, TaskStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    plan_limits::LimitedResource,
    progress::{project_progress, rollup, would_create_cycle, TaskNode},
};

use super::crm::ensure_party;
use super::plans::ensure_within_limit_in;
use super::{page_index, page_size, publish};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProject {
    pub company_id: i32,
    pub created_by: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub account_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewTask {
    pub project_id: i32,
    pub parent_id: Option<i32>,
    pub created_by: i32,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    /// Defaults to `medium`
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<i32>,
    pub due_date: Option<NaiveDate>,
}

/// A task with its rolled-up progress and its subtasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskTree {
    pub task: project_task::Model,
    pub effective_progress: i32,
    pub children: Vec<TaskTree>,
}

fn build_tree(
    parent: Option<i32>,
    by_parent: &HashMap<Option<i32>, Vec<&project_task::Model>>,
    rolled: &HashMap<i32, i32>,
    depth: usize,
) -> Vec<TaskTree> {
    // stored data may already contain a loop; stop at the task count
    if depth > rolled.len() {
        return Vec::new();
    }
    by_parent
        .get(&parent)
        .map(|children| {
            children
                .iter()
                .map(|task| TaskTree {
                    task: (*task).clone(),
                    effective_progress: rolled.get(&task.id).copied().unwrap_or(0),
                    children: build_tree(Some(task.id), by_parent, rolled, depth + 1),
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn load_project<C: ConnectionTrait>(
    db: &C,
    project_id: i32,
) -> Result<project::Model, ServiceError> {
    project::Entity::find_by_id(project_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Project", project_id))
}

async fn load_task<C: ConnectionTrait>(
    db: &C,
    task_id: i32,
) -> Result<project_task::Model, ServiceError> {
    project_task::Entity::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Task", task_id))
}

async fn tasks_of<C: ConnectionTrait>(
    db: &C,
    project_id: i32,
) -> Result<Vec<project_task::Model>, ServiceError> {
    Ok(project_task::Entity::find()
        .filter(project_task::Column::ProjectId.eq(project_id))
        .order_by_asc(project_task::Column::Id)
        .all(db)
        .await?)
}

/// Writes the rolled-up progress onto every parent task and the project.
/// Leaf tasks keep the progress recorded on them.
async fn recalculate_in<C: ConnectionTrait>(db: &C, project_id: i32) -> Result<i32, ServiceError> {
    let tasks = tasks_of(db, project_id).await?;
    let nodes: Vec<TaskNode> = tasks.iter().map(|t| t.as_node()).collect();
    let rolled = rollup(&nodes);
    let overall = project_progress(&nodes);

    let parents: HashSet<i32> =
        tasks.iter().filter_map(|t| t.parent_id).collect();
    for task in tasks.iter().filter(|t| parents.contains(&t.id)) {
        let value = rolled.get(&task.id).copied().unwrap_or(0);
        if value != task.progress {
            project_task::Entity::update_many()
                .col_expr(project_task::Column::Progress, Expr::value(value))
                .filter(project_task::Column::Id.eq(task.id))
                .exec(db)
                .await?;
        }
    }

    project::Entity::update_many()
        .col_expr(project::Column::Progress, Expr::value(overall))
        .col_expr(project::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(project::Column::Id.eq(project_id))
        .exec(db)
        .await?;
    debug!(project_id, progress = overall, "Project progress recalculated");
    Ok(overall)
}

#[derive(Clone)]
pub struct ProjectService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ProjectService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a project within the company's plan limit.
    #[instrument(skip(self, input), fields(company_id = input.company_id))]
    pub async fn create_project(&self, input: NewProject) -> Result<project::Model, ServiceError> {
        input.validate()?;
        if let (Some(start), Some(end)) = (input.start_date, input.end_date) {
            if end < start {
                return Err(ServiceError::ValidationError(
                    "Project end date is before its start date".to_string(),
                ));
            }
        }

        let txn = self.db_pool.begin().await?;
        ensure_within_limit_in(&txn, input.company_id, LimitedResource::Projects).await?;
        ensure_party(&txn, input.company_id, input.account_id, None).await?;

        let project = project::ActiveModel {
            company_id: Set(input.company_id),
            name: Set(input.name),
            description: Set(input.description),
            status: Set(ProjectStatus::Planning),
            account_id: Set(input.account_id),
            start_date: Set(input.start_date),
            end_date: Set(input.end_date),
            progress: Set(0),
            created_by: Set(input.created_by),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(project_id = project.id, "Project created");
        Ok(project)
    }

    pub async fn get_project(&self, project_id: i32) -> Result<project::Model, ServiceError> {
        load_project(&*self.db_pool, project_id).await
    }

    pub async fn list_projects(
        &self,
        company_id: i32,
        status: Option<ProjectStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<project::Model>, u64), ServiceError> {
        let mut query = project::Entity::find().filter(project::Column::CompanyId.eq(company_id));
        if let Some(status) = status {
            query = query.filter(project::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(project::Column::Id)
            .paginate(&*self.db_pool, page_size(limit));
        let total = paginator.num_items().await?;
        let projects = paginator.fetch_page(page_index(page)).await?;
        Ok((projects, total))
    }

    #[instrument(skip(self))]
    pub async fn update_project_status(
        &self,
        project_id: i32,
        status: ProjectStatus,
    ) -> Result<project::Model, ServiceError> {
        let db = &*self.db_pool;
        let project = load_project(db, project_id).await?;
        let mut active = project.into_active_model();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        let project = active.update(db).await?;
        info!(project_id, status = %status, "Project status updated");
        Ok(project)
    }

    /// Adds a task, optionally under a parent task of the same project.
    #[instrument(skip(self, input), fields(project_id = input.project_id))]
    pub async fn create_task(&self, input: NewTask) -> Result<project_task::Model, ServiceError> {
        input.validate()?;
        let txn = self.db_pool.begin().await?;
        load_project(&txn, input.project_id).await?;
        if let Some(parent_id) = input.parent_id {
            let parent = load_task(&txn, parent_id).await?;
            if parent.project_id != input.project_id {
                return Err(ServiceError::InvalidInput(format!(
                    "Parent task {} belongs to another project",
                    parent_id
                )));
            }
        }

        let task = project_task::ActiveModel {
            project_id: Set(input.project_id),
            parent_id: Set(input.parent_id),
            title: Set(input.title),
            description: Set(input.description),
            status: Set(TaskStatus::Todo),
            priority: Set(input.priority.unwrap_or(TaskPriority::Medium)),
            assigned_to: Set(input.assigned_to),
            due_date: Set(input.due_date),
            progress: Set(0),
            created_by: Set(input.created_by),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        let progress = recalculate_in(&txn, input.project_id).await?;
        txn.commit().await?;

        info!(task_id = task.id, "Task created");
        self.progress_updated(input.project_id, progress).await;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: i32) -> Result<project_task::Model, ServiceError> {
        load_task(&*self.db_pool, task_id).await
    }

    /// Marking a task done records its progress as 100.
    #[instrument(skip(self))]
    pub async fn update_task_status(
        &self,
        task_id: i32,
        status: TaskStatus,
    ) -> Result<project_task::Model, ServiceError> {
        self.modify_task(task_id, |active| {
            active.status = Set(status);
            if status == TaskStatus::Done {
                active.progress = Set(100);
            }
            Ok(())
        })
        .await
    }

    /// Records progress between 0 and 100 on a task.
    #[instrument(skip(self))]
    pub async fn update_task_progress(
        &self,
        task_id: i32,
        progress: i32,
    ) -> Result<project_task::Model, ServiceError> {
        if !(0..=100).contains(&progress) {
            return Err(ServiceError::ValidationError(format!(
                "Progress must be between 0 and 100, got {}",
                progress
            )));
        }
        self.modify_task(task_id, |active| {
            active.progress = Set(progress);
            Ok(())
        })
        .await
    }

    /// Re-parents a task, or makes it a root task with `None`. The new parent
    /// must be in the same project and must not sit below the task.
    #[instrument(skip(self))]
    pub async fn move_task(
        &self,
        task_id: i32,
        new_parent: Option<i32>,
    ) -> Result<project_task::Model, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let task = load_task(&txn, task_id).await?;
        let project_id = task.project_id;

        if let Some(parent_id) = new_parent {
            let parent = load_task(&txn, parent_id).await?;
            if parent.project_id != project_id {
                return Err(ServiceError::InvalidInput(format!(
                    "Parent task {} belongs to another project",
                    parent_id
                )));
            }
            let nodes: Vec<TaskNode> = tasks_of(&txn, project_id)
                .await?
                .iter()
                .map(|t| t.as_node())
                .collect();
            if would_create_cycle(&nodes, task_id, parent_id) {
                return Err(ServiceError::InvalidOperation(format!(
                    "Moving task {} under task {} would create a cycle",
                    task_id, parent_id
                )));
            }
        }

        let mut active = task.into_active_model();
        active.parent_id = Set(new_parent);
        active.updated_at = Set(Some(Utc::now()));
        let task = active.update(&txn).await?;
        let progress = recalculate_in(&txn, project_id).await?;
        txn.commit().await?;

        info!(task_id, parent_id = ?new_parent, "Task moved");
        self.progress_updated(project_id, progress).await;
        Ok(task)
    }

    /// Deletes a task; its subtasks move up to the task's own parent.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: i32) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let task = load_task(&txn, task_id).await?;
        let project_id = task.project_id;

        project_task::Entity::update_many()
            .col_expr(project_task::Column::ParentId, Expr::value(task.parent_id))
            .filter(project_task::Column::ParentId.eq(task_id))
            .exec(&txn)
            .await?;
        project_task::Entity::delete_by_id(task_id).exec(&txn).await?;
        let progress = recalculate_in(&txn, project_id).await?;
        txn.commit().await?;

        info!(task_id, "Task deleted");
        self.progress_updated(project_id, progress).await;
        Ok(())
    }

    /// Root tasks of a project with their subtasks nested below them.
    pub async fn task_tree(&self, project_id: i32) -> Result<Vec<TaskTree>, ServiceError> {
        let db = &*self.db_pool;
        load_project(db, project_id).await?;
        let tasks = tasks_of(db, project_id).await?;
        let nodes: Vec<TaskNode> = tasks.iter().map(|t| t.as_node()).collect();
        let rolled = rollup(&nodes);

        let known: HashSet<i32> = tasks.iter().map(|t| t.id).collect();
        let mut by_parent: HashMap<Option<i32>, Vec<&project_task::Model>> = HashMap::new();
        for task in &tasks {
            let parent = task.parent_id.filter(|p| known.contains(p));
            by_parent.entry(parent).or_default().push(task);
        }
        Ok(build_tree(None, &by_parent, &rolled, 0))
    }

    /// Re-derives and stores the project's progress from its task tree.
    #[instrument(skip(self))]
    pub async fn recalculate_project_progress(&self, project_id: i32) -> Result<i32, ServiceError> {
        let txn = self.db_pool.begin().await?;
        load_project(&txn, project_id).await?;
        let progress = recalculate_in(&txn, project_id).await?;
        txn.commit().await?;

        self.progress_updated(project_id, progress).await;
        Ok(progress)
    }

    async fn modify_task<F>(
        &self,
        task_id: i32,
        change: F,
    ) -> Result<project_task::Model, ServiceError>
    where
        F: FnOnce(&mut project_task::ActiveModel) -> Result<(), ServiceError>,
    {
        let txn = self.db_pool.begin().await?;
        let task = load_task(&txn, task_id).await?;
        let project_id = task.project_id;

        let mut active = task.into_active_model();
        change(&mut active)?;
        active.updated_at = Set(Some(Utc::now()));
        let task = active.update(&txn).await?;
        let progress = recalculate_in(&txn, project_id).await?;
        txn.commit().await?;

        self.progress_updated(project_id, progress).await;
        Ok(task)
    }

    async fn progress_updated(&self, project_id: i32, progress: i32) {
        publish(
            &self.event_sender,
            Event::ProjectProgressUpdated {
                project_id,
                progress,
            },
        )
        .await;
    }
}
