//! Step grouping: partitions a plan into ordered groups of co-executable steps.
//!
//! Groups are emitted in the order their key is first seen while scanning the plan, so the
//! same plan always yields the same groups across process restarts.

use crate::pipeline::plan::{Plan, Step};
use std::collections::HashMap;

/// Steps sharing one group key, in plan order.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGroup {
    pub key: String,
    pub steps: Vec<Step>,
}

impl StepGroup {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Partition steps into groups by effective group key, first-seen order.
pub fn group_steps(steps: &[Step]) -> Vec<StepGroup> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<StepGroup> = Vec::new();
    for step in steps {
        let key = step.effective_group_key();
        match index.get(key) {
            Some(&slot) => groups[slot].steps.push(step.clone()),
            None => {
                index.insert(key, groups.len());
                groups.push(StepGroup {
                    key: key.to_string(),
                    steps: vec![step.clone()],
                });
            }
        }
    }
    groups
}

/// A group still to be executed, with its position in the full grouping.
#[derive(Debug, Clone)]
pub struct PendingGroup {
    pub index: usize,
    pub total: usize,
    pub group: StepGroup,
}

/// Groups not yet covered by `cursor`.
///
/// The cursor counts steps of fully completed groups. Grouping is always computed over the
/// whole plan and completed groups are skipped, so a group whose members are not contiguous in
/// the plan is never split on resume.
pub fn remaining_groups(plan: &Plan, cursor: usize) -> Vec<PendingGroup> {
    let groups = group_steps(plan.steps());
    let total = groups.len();
    let mut consumed = 0usize;
    groups
        .into_iter()
        .enumerate()
        .filter_map(|(index, group)| {
            let end = consumed + group.len();
            let done = end <= cursor;
            consumed = end;
            (!done).then_some(PendingGroup {
                index,
                total,
                group,
            })
        })
        .collect()
}
