//! Group completion evaluation
//!
//! Pure functions over the statuses of a group's direct children. Children
//! still in flight count toward neither successes nor failures.

use super::state::{is_terminal_failure, is_terminal_success, CompletionCriteria, TaskStatus};

/// Tally of a group's direct children
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildCounts {
    /// Number of direct children
    pub total: usize,
    /// Children in a terminal-success status
    pub successes: usize,
    /// Children in a terminal-failure status
    pub failures: usize,
}

impl ChildCounts {
    /// Tally a set of child statuses
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        statuses
            .into_iter()
            .fold(ChildCounts::default(), |mut counts, status| {
                counts.total += 1;
                if is_terminal_success(status) {
                    counts.successes += 1;
                } else if is_terminal_failure(status) {
                    counts.failures += 1;
                }
                counts
            })
    }

    /// Children that have not concluded yet
    pub fn pending(&self) -> usize {
        self.total - self.successes - self.failures
    }

    /// Successes plus every child that could still succeed
    pub fn optimistic_successes(&self) -> usize {
        self.total - self.failures
    }
}

/// Success count a group must reach under `criteria`
fn threshold(criteria: CompletionCriteria, min_completion: u32, total: usize) -> usize {
    match criteria {
        CompletionCriteria::All => total,
        CompletionCriteria::Any => 1,
        CompletionCriteria::NOfM => min_completion as usize,
    }
}

/// Whether a group is complete given its children's tally.
///
/// An empty child set is vacuously complete.
pub fn evaluate_completion(
    criteria: CompletionCriteria,
    min_completion: u32,
    counts: ChildCounts,
) -> bool {
    if counts.total == 0 {
        return true;
    }
    counts.successes >= threshold(criteria, min_completion, counts.total)
}

/// Whether a group can still meet its criterion after a child failure.
///
/// Counts every child not in a terminal-failure status as a potential success.
pub fn can_still_complete(
    criteria: CompletionCriteria,
    min_completion: u32,
    counts: ChildCounts,
) -> bool {
    if counts.total == 0 {
        return true;
    }
    counts.optimistic_successes() >= threshold(criteria, min_completion, counts.total)
}

/// Convenience wrapper over [`evaluate_completion`] taking raw statuses
pub fn is_complete<I>(criteria: CompletionCriteria, min_completion: u32, statuses: I) -> bool
where
    I: IntoIterator<Item = TaskStatus>,
{
    evaluate_completion(criteria, min_completion, ChildCounts::tally(statuses))
}
