use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::models::CourseUser;

/// Whether `candidate` should replace `existing` for the same username.
///
/// Higher role wins; on equal roles the later `enrolled_at` wins. Timestamps
/// are compared as strings, which matches chronological order only for
/// uniformly zero-padded ISO-8601 values.
fn supersedes(candidate: &CourseUser, existing: &CourseUser) -> bool {
    candidate.role > existing.role
        || (candidate.role == existing.role && candidate.enrolled_at > existing.enrolled_at)
}

/// Reduce duplicate enrollments to one record per username.
///
/// Output keeps the order in which each username first appeared.
pub fn dedup_roster(records: impl IntoIterator<Item = CourseUser>) -> Vec<CourseUser> {
    let mut kept: Vec<CourseUser> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        if record.username.is_empty() {
            continue;
        }
        match index.entry(record.username.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(record);
            }
            Entry::Occupied(slot) => {
                let existing = &mut kept[*slot.get()];
                if supersedes(&record, existing) {
                    *existing = record;
                }
            }
        }
    }
    kept
}

/// Split a deduplicated roster into `(facilitators, participants)`.
pub fn partition_roles(records: &[CourseUser]) -> (Vec<CourseUser>, Vec<CourseUser>) {
    records.iter().cloned().partition(CourseUser::is_facilitator)
}

/// Sorted usernames of everyone holding a facilitator role.
///
/// Only the highest role per username matters here, so duplicates are
/// collapsed without the `enrolled_at` tie-break.
pub fn staff_usernames(records: &[CourseUser]) -> Vec<String> {
    let mut max_role: HashMap<&str, u32> = HashMap::new();
    for record in records.iter().filter(|r| !r.username.is_empty()) {
        let role = max_role.entry(record.username.as_str()).or_insert(record.role);
        *role = (*role).max(record.role);
    }

    let mut staff: Vec<String> = max_role
        .into_iter()
        .filter(|(_, role)| *role >= 1)
        .map(|(username, _)| username.to_string())
        .collect();
    staff.sort();
    staff
}

// ============================================================================
// Tests
// ============================================================================
