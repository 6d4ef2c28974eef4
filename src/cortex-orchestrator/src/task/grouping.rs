//! Partitioning of tasks into dependency-respecting groups.
//!
//! Groups are executed one after another; the tasks inside a group have no
//! ordering relation to each other and may run concurrently. Tasks whose
//! dependencies can never be met inside the input (cycles, references to
//! unknown tasks) are not dropped: each one ends up in its own trailing
//! singleton group, flagged as not independent, together with the dependency
//! ids that stayed unmet.

use std::collections::HashSet;

use serde::Serialize;

use super::queue::{Task, TaskId};

/// A set of tasks that can run together.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndependentTaskGroup {
    /// Tasks in input order.
    pub tasks: Vec<Task>,
    /// False only for singleton groups of unschedulable tasks.
    pub is_independent: bool,
    /// Dependencies that were never satisfied (degenerate groups only).
    pub unmet_dependencies: Vec<TaskId>,
}

impl IndependentTaskGroup {
    fn independent(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            is_independent: true,
            unmet_dependencies: Vec::new(),
        }
    }

    fn unschedulable(task: Task, unmet_dependencies: Vec<TaskId>) -> Self {
        Self {
            tasks: vec![task],
            is_independent: false,
            unmet_dependencies,
        }
    }

    /// IDs of the tasks in this group.
    pub fn task_ids(&self) -> Vec<&TaskId> {
        self.tasks.iter().map(|t| &t.id).collect()
    }

    /// Number of tasks in the group.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Split `tasks` into groups that can be executed in order.
///
/// `satisfied` holds IDs of tasks outside the input that already count as
/// done (typically completed tasks of the queue). Every task of a returned
/// independent group has all its dependencies either in `satisfied` or in a
/// strictly earlier group.
pub fn group_independent_tasks<'a, I>(
    tasks: I,
    satisfied: &HashSet<TaskId>,
) -> Vec<IndependentTaskGroup>
where
    I: IntoIterator<Item = &'a Task>,
{
    let tasks: Vec<&Task> = tasks.into_iter().collect();
    let mut processed: HashSet<&TaskId> = HashSet::new();
    let mut groups = Vec::new();

    loop {
        let mut current: Vec<&Task> = Vec::new();

        for &task in &tasks {
            if processed.contains(&task.id) || current.iter().any(|t| t.id == task.id) {
                continue;
            }

            let dependencies_done = task
                .dependencies
                .iter()
                .all(|dep| processed.contains(dep) || satisfied.contains(dep));
            if !dependencies_done {
                continue;
            }

            let conflicts_with_group = current
                .iter()
                .any(|member| member.has_dependency(&task.id) || task.has_dependency(&member.id));
            if conflicts_with_group {
                continue;
            }

            current.push(task);
        }

        if current.is_empty() {
            break;
        }

        processed.extend(current.iter().map(|t| &t.id));
        groups.push(IndependentTaskGroup::independent(
            current.into_iter().cloned().collect(),
        ));
    }

    for &task in &tasks {
        if processed.contains(&task.id) {
            continue;
        }
        // Duplicated IDs in the input are emitted once.
        processed.insert(&task.id);

        let unmet: Vec<TaskId> = task
            .dependencies
            .iter()
            .filter(|dep| !satisfied.contains(*dep) && !groups_contain(&groups, dep))
            .cloned()
            .collect();

        tracing::warn!(
            task_id = %task.id,
            unmet = ?unmet,
            "Task has unsatisfiable dependencies; isolating it"
        );
        groups.push(IndependentTaskGroup::unschedulable(task.clone(), unmet));
    }

    groups
}

fn groups_contain(groups: &[IndependentTaskGroup], id: &TaskId) -> bool {
    groups
        .iter()
        .filter(|g| g.is_independent)
        .any(|g| g.tasks.iter().any(|t| &t.id == id))
}

/// Whether no task in `tasks` depends on another task in `tasks`.
pub fn are_tasks_independent<'a, I>(tasks: I) -> bool
where
    I: IntoIterator<Item = &'a Task>,
    I::IntoIter: Clone,
{
    let tasks = tasks.into_iter();
    let ids: HashSet<&TaskId> = tasks.clone().map(|t| &t.id).collect();

    tasks
        .flat_map(|t| t.dependencies.iter())
        .all(|dep| !ids.contains(dep))
}
