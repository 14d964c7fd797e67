//! Progress roll-up for the project task tree.
//!
//! A finished task counts as 100. A task with subtasks takes the mean of its
//! children; a leaf keeps its own recorded progress. Project progress is the
//! mean of its root tasks.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: i32,
    pub parent_id: Option<i32>,
    pub progress: i32,
    pub done: bool,
}

fn children_index(tasks: &[TaskNode]) -> HashMap<Option<i32>, Vec<&TaskNode>> {
    let known: HashSet<i32> = tasks.iter().map(|t| t.id).collect();
    let mut index: HashMap<Option<i32>, Vec<&TaskNode>> = HashMap::new();
    for task in tasks {
        // orphans whose parent is outside this set are treated as roots
        let parent = task.parent_id.filter(|p| known.contains(p));
        index.entry(parent).or_default().push(task);
    }
    index
}

/// Effective progress for every task in the set, keyed by task id.
///
/// The walk keeps its own stack, so nesting depth is bounded by memory only.
pub fn rollup(tasks: &[TaskNode]) -> HashMap<i32, i32> {
    let index = children_index(tasks);
    let mut memo = HashMap::with_capacity(tasks.len());
    let mut visiting = HashSet::new();
    for task in tasks {
        if !memo.contains_key(&task.id) {
            walk(task, &index, &mut memo, &mut visiting);
        }
    }
    memo
}

struct Frame<'a> {
    task: &'a TaskNode,
    children: &'a [&'a TaskNode],
    next: usize,
    sum: i64,
}

impl<'a> Frame<'a> {
    fn new(task: &'a TaskNode, index: &'a HashMap<Option<i32>, Vec<&'a TaskNode>>) -> Self {
        let children = if task.done {
            &[][..]
        } else {
            index
                .get(&Some(task.id))
                .map(Vec::as_slice)
                .unwrap_or(&[])
        };
        Self {
            task,
            children,
            next: 0,
            sum: 0,
        }
    }

    fn value(&self) -> i32 {
        if self.task.done {
            100
        } else if self.children.is_empty() {
            self.task.progress.clamp(0, 100)
        } else {
            (self.sum / self.children.len() as i64) as i32
        }
    }
}

fn walk<'a>(
    root: &'a TaskNode,
    index: &'a HashMap<Option<i32>, Vec<&'a TaskNode>>,
    memo: &mut HashMap<i32, i32>,
    visiting: &mut HashSet<i32>,
) {
    visiting.insert(root.id);
    let mut stack = vec![Frame::new(root, index)];

    while let Some(frame) = stack.last_mut() {
        let children = frame.children;
        if let Some(child) = children.get(frame.next).copied() {
            frame.next += 1;
            if let Some(known) = memo.get(&child.id) {
                frame.sum += *known as i64;
            } else if visiting.contains(&child.id) {
                // stored loop: the repeated task contributes its own progress
                frame.sum += child.progress.clamp(0, 100) as i64;
            } else {
                visiting.insert(child.id);
                stack.push(Frame::new(child, index));
            }
            continue;
        }

        let value = frame.value();
        let id = frame.task.id;
        stack.pop();
        visiting.remove(&id);
        memo.insert(id, value);
        if let Some(parent) = stack.last_mut() {
            parent.sum += value as i64;
        }
    }
}

pub fn project_progress(tasks: &[TaskNode]) -> i32 {
    let rolled = rollup(tasks);
    let index = children_index(tasks);
    match index.get(&None) {
        Some(roots) if !roots.is_empty() => {
            let sum: i64 = roots
                .iter()
                .map(|r| rolled.get(&r.id).copied().unwrap_or(0) as i64)
                .sum();
            (sum / roots.len() as i64) as i32
        }
        _ => 0,
    }
}

/// True when making `new_parent` the parent of `task_id` would create a cycle.
pub fn would_create_cycle(tasks: &[TaskNode], task_id: i32, new_parent: i32) -> bool {
    if task_id == new_parent {
        return true;
    }
    let parents: HashMap<i32, Option<i32>> = tasks.iter().map(|t| (t.id, t.parent_id)).collect();
    let mut cursor = Some(new_parent);
    let mut seen = HashSet::new();
    while let Some(current) = cursor {
        if current == task_id {
            return true;
        }
        if !seen.insert(current) {
            // pre-existing loop in stored data
            return true;
        }
        cursor = parents.get(&current).copied().flatten();
    }
    false
}
