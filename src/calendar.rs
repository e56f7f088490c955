//! Read-only views over the cached calendar.

use crate::model::Step;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupStatus {
    Upcoming,
    InProgress,
    Done,
}

impl GroupStatus {
    pub fn label(self) -> &'static str {
        match self {
            GroupStatus::Upcoming => "upcoming",
            GroupStatus::InProgress => "in progress",
            GroupStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Steps sharing a group name (one grand prix weekend), in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct StepGroup<'a> {
    pub name: &'a str,
    pub status: GroupStatus,
    pub steps: Vec<&'a Step>,
}

pub fn sort_by_id(calendar: &mut [Step]) {
    calendar.sort_by_key(|s| s.id);
}

pub fn find(calendar: &[Step], id: u32) -> Option<&Step> {
    calendar.iter().find(|s| s.id == id)
}

/// Lowest-id step that has not been simulated yet.
pub fn next_unsimulated(calendar: &[Step]) -> Option<&Step> {
    calendar
        .iter()
        .filter(|s| !s.simulated)
        .min_by_key(|s| s.id)
}

/// Ids of all unsimulated steps, ascending.
pub fn remaining_ids(calendar: &[Step]) -> Vec<u32> {
    let mut ids: Vec<u32> = calendar
        .iter()
        .filter(|s| !s.simulated)
        .map(|s| s.id)
        .collect();
    ids.sort_unstable();
    ids
}

pub fn progress(calendar: &[Step]) -> Progress {
    Progress {
        done: calendar.iter().filter(|s| s.simulated).count(),
        total: calendar.len(),
    }
}

pub fn group_status(steps: &[&Step]) -> GroupStatus {
    let done = steps.iter().filter(|s| s.simulated).count();
    if steps.is_empty() || done == 0 {
        GroupStatus::Upcoming
    } else if done < steps.len() {
        GroupStatus::InProgress
    } else {
        GroupStatus::Done
    }
}

/// Group steps by name, ordered by the lowest step id of each group.
pub fn groups(calendar: &[Step]) -> Vec<StepGroup<'_>> {
    let mut ordered: Vec<&Step> = calendar.iter().collect();
    ordered.sort_by_key(|s| s.id);

    let mut out: Vec<StepGroup<'_>> = Vec::new();
    for step in ordered {
        match out.iter_mut().find(|g| g.name == step.group_name) {
            Some(group) => group.steps.push(step),
            None => out.push(StepGroup {
                name: &step.group_name,
                status: GroupStatus::Upcoming,
                steps: vec![step],
            }),
        }
    }
    for group in &mut out {
        group.status = group_status(&group.steps);
    }
    out
}
