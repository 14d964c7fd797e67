mod common;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use tenantdesk::{
    entities::{
        project::{self, ProjectStatus},
        project_task::{TaskPriority, TaskStatus},
    },
    errors::ServiceError,
    services::projects::{NewProject, NewTask},
};

use common::TestApp;

fn project_input(company_id: i32, name: &str) -> NewProject {
    NewProject {
        company_id,
        created_by: 1,
        name: name.into(),
        description: None,
        account_id: None,
        start_date: None,
        end_date: None,
    }
}

fn task_input(project_id: i32, parent_id: Option<i32>, title: &str) -> NewTask {
    NewTask {
        project_id,
        parent_id,
        created_by: 1,
        title: title.into(),
        description: None,
        priority: None,
        assigned_to: None,
        due_date: None,
    }
}

/// Project with root `design` (children `wireframes`, `review`) and a leaf
/// root `build`.
struct Plan {
    app: TestApp,
    project: project::Model,
    design: i32,
    wireframes: i32,
    review: i32,
    build: i32,
}

async fn plan() -> Plan {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let projects = &app.services.projects;
    let project = projects
        .create_project(project_input(company.id, "Website relaunch"))
        .await
        .unwrap();
    let design = projects
        .create_task(task_input(project.id, None, "Design"))
        .await
        .unwrap();
    let wireframes = projects
        .create_task(task_input(project.id, Some(design.id), "Wireframes"))
        .await
        .unwrap();
    let review = projects
        .create_task(task_input(project.id, Some(design.id), "Review"))
        .await
        .unwrap();
    let build = projects
        .create_task(task_input(project.id, None, "Build"))
        .await
        .unwrap();
    Plan {
        design: design.id,
        wireframes: wireframes.id,
        review: review.id,
        build: build.id,
        project,
        app,
    }
}

#[tokio::test]
async fn new_project_starts_in_planning() {
    let p = plan().await;
    assert_eq!(p.project.status, ProjectStatus::Planning);
    assert_eq!(p.project.progress, 0);

    let task = p.app.services.projects.get_task(p.design).await.unwrap();
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(task.priority, TaskPriority::Medium);
}

#[tokio::test]
async fn progress_rolls_up_from_subtasks() {
    let p = plan().await;
    let projects = &p.app.services.projects;

    projects.update_task_progress(p.wireframes, 50).await.unwrap();
    let done = projects
        .update_task_status(p.review, TaskStatus::Done)
        .await
        .unwrap();
    assert_eq!(done.progress, 100);
    projects.update_task_progress(p.build, 20).await.unwrap();

    let project = projects.get_project(p.project.id).await.unwrap();
    // design = (50 + 100) / 2, project = (75 + 20) / 2
    assert_eq!(project.progress, 47);
    let design = projects.get_task(p.design).await.unwrap();
    assert_eq!(design.progress, 75);

    let tree = projects.task_tree(p.project.id).await.unwrap();
    assert_eq!(tree.len(), 2);
    let design = tree.iter().find(|t| t.task.id == p.design).unwrap();
    assert_eq!(design.effective_progress, 75);
    assert_eq!(design.children.len(), 2);
    assert!(tree
        .iter()
        .find(|t| t.task.id == p.build)
        .unwrap()
        .children
        .is_empty());

    assert_eq!(
        projects
            .recalculate_project_progress(p.project.id)
            .await
            .unwrap(),
        47
    );

    p.app.settle().await;
    assert!(p.app.events.names().contains(&"project_progress_updated"));
}

#[tokio::test]
async fn progress_outside_percentage_range_is_rejected() {
    let p = plan().await;
    let result = p
        .app
        .services
        .projects
        .update_task_progress(p.build, 101)
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn moving_a_task_below_itself_is_rejected() {
    let p = plan().await;
    let projects = &p.app.services.projects;

    let result = projects.move_task(p.design, Some(p.wireframes)).await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
    let result = projects.move_task(p.design, Some(p.design)).await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));

    let moved = projects.move_task(p.build, Some(p.design)).await.unwrap();
    assert_eq!(moved.parent_id, Some(p.design));
    let root = projects.move_task(p.build, None).await.unwrap();
    assert_eq!(root.parent_id, None);
}

#[tokio::test]
async fn deleting_a_task_lifts_its_subtasks() {
    let p = plan().await;
    let projects = &p.app.services.projects;
    projects.update_task_progress(p.wireframes, 50).await.unwrap();
    projects
        .update_task_status(p.review, TaskStatus::Done)
        .await
        .unwrap();
    projects.update_task_progress(p.build, 20).await.unwrap();

    projects.delete_task(p.design).await.unwrap();

    let wireframes = projects.get_task(p.wireframes).await.unwrap();
    assert_eq!(wireframes.parent_id, None);
    assert_matches!(
        projects.get_task(p.design).await,
        Err(ServiceError::NotFound(_))
    );
    let tree = projects.task_tree(p.project.id).await.unwrap();
    assert_eq!(tree.len(), 3);
    // (50 + 100 + 20) / 3
    let project = projects.get_project(p.project.id).await.unwrap();
    assert_eq!(project.progress, 56);
}

#[tokio::test]
async fn tasks_cannot_hang_off_another_project() {
    let p = plan().await;
    let projects = &p.app.services.projects;
    let other = projects
        .create_project(project_input(p.project.company_id, "Intranet"))
        .await
        .unwrap();

    let result = projects
        .create_task(task_input(other.id, Some(p.design), "Stray"))
        .await;
    assert_matches!(result, Err(ServiceError::InvalidInput(_)));

    let stray = projects
        .create_task(task_input(other.id, None, "Kickoff"))
        .await
        .unwrap();
    let result = projects.move_task(stray.id, Some(p.design)).await;
    assert_matches!(result, Err(ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn project_dates_and_status() {
    let app = TestApp::new().await;
    let company = app.company("Acme").await;
    let projects = &app.services.projects;

    let mut input = project_input(company.id, "Backwards");
    input.start_date = NaiveDate::from_ymd_opt(2024, 5, 1);
    input.end_date = NaiveDate::from_ymd_opt(2024, 4, 1);
    assert_matches!(
        projects.create_project(input).await,
        Err(ServiceError::ValidationError(_))
    );

    let project = projects
        .create_project(project_input(company.id, "Migration"))
        .await
        .unwrap();
    let active = projects
        .update_project_status(project.id, ProjectStatus::Active)
        .await
        .unwrap();
    assert_eq!(active.status, ProjectStatus::Active);

    let (listed, total) = projects
        .list_projects(company.id, Some(ProjectStatus::Active), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(listed[0].id, project.id);
}
