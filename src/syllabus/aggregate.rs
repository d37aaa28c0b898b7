//! Phase status derivation.
//!
//! A phase with items is tracked per item and its status is the AND of its
//! items' flags. A phase without items only has the phase-level row written
//! before item tracking existed, and that row is reported unchanged.

use std::collections::HashMap;

use time::OffsetDateTime;

use super::{
    SyllabusItem,
    progress::{Completion, ItemProgress},
};

#[derive(Debug, Clone)]
pub enum PhaseTracking {
    Granular {
        items: Vec<SyllabusItem>,
        /// Rows for the items above; a missing entry means both flags false
        progress: HashMap<i64, ItemProgress>,
        /// Previously materialised phase snapshot
        snapshot: Option<Completion>,
    },
    Legacy(Option<Completion>),
}

impl PhaseTracking {
    /// Pick the tracking mode for a phase from its items and the rows loaded for them
    pub fn from_rows(
        items: Vec<SyllabusItem>,
        item_progress: &HashMap<i64, ItemProgress>,
        stored: Option<Completion>,
    ) -> Self {
        if items.is_empty() {
            return PhaseTracking::Legacy(stored);
        }
        let progress = items
            .iter()
            .filter_map(|item| item_progress.get(&item.id).map(|p| (item.id, p.clone())))
            .collect();
        PhaseTracking::Granular {
            items,
            progress,
            snapshot: stored,
        }
    }
}

/// Derive the phase status. `now` stamps a newly completed phase whose items carry no time.
///
/// A phase completion time, once set, is kept even if an item is revoked later.
pub fn compute_phase_status(tracking: &PhaseTracking, now: OffsetDateTime) -> Completion {
    let (items, progress, snapshot) = match tracking {
        PhaseTracking::Legacy(stored) => return stored.clone().unwrap_or_default(),
        PhaseTracking::Granular {
            items,
            progress,
            snapshot,
        } => (items, progress, snapshot),
    };
    let rows: Vec<Option<&ItemProgress>> =
        items.iter().map(|item| progress.get(&item.id)).collect();
    let completed_by_student = rows
        .iter()
        .copied()
        .all(|p| p.is_some_and(|p| p.completion.completed_by_student));
    let completed_by_tutor = rows
        .iter()
        .copied()
        .all(|p| p.is_some_and(|p| p.completion.completed_by_tutor));
    let previous_at = snapshot.as_ref().and_then(|s| s.completed_at);
    let completed_at = if completed_by_student && completed_by_tutor {
        previous_at
            .or_else(|| {
                rows.iter()
                    .copied()
                    .flatten()
                    .filter_map(|p| p.completion.completed_at)
                    .max()
            })
            .or(Some(now))
    } else {
        previous_at
    };
    Completion {
        completed_by_student,
        completed_by_tutor,
        completed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn item(id: i64) -> SyllabusItem {
        SyllabusItem {
            id,
            phase_id: 1,
            course_id: 1,
            title: format!("item {id}"),
            description: None,
            position: id,
        }
    }

    fn row(item_id: i64, student: bool, tutor: bool, at: Option<OffsetDateTime>) -> ItemProgress {
        ItemProgress {
            student_id: 7,
            item_id,
            completion: Completion {
                completed_by_student: student,
                completed_by_tutor: tutor,
                completed_at: at,
            },
        }
    }

    fn granular(rows: Vec<ItemProgress>, snapshot: Option<Completion>) -> PhaseTracking {
        let progress = rows.into_iter().map(|r| (r.item_id, r)).collect();
        PhaseTracking::from_rows(vec![item(1), item(2)], &progress, snapshot)
    }

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    #[test]
    fn tutor_done_student_partial() {
        let tracking = granular(
            vec![row(1, true, true, Some(NOW)), row(2, false, true, None)],
            None,
        );
        let status = compute_phase_status(&tracking, NOW);
        assert!(status.completed_by_tutor);
        assert!(!status.completed_by_student);
        assert_eq!(status.completed_at, None);
    }

    #[test]
    fn completion_takes_latest_item_time() {
        let early = datetime!(2024-05-01 09:00 UTC);
        let late = datetime!(2024-05-03 09:00 UTC);
        let tracking = granular(
            vec![row(1, true, true, Some(early)), row(2, true, true, Some(late))],
            None,
        );
        let status = compute_phase_status(&tracking, NOW);
        assert!(status.is_complete());
        assert_eq!(status.completed_at, Some(late));
    }

    #[test]
    fn missing_rows_count_as_unconfirmed() {
        let tracking = granular(vec![row(1, true, true, Some(NOW))], None);
        let status = compute_phase_status(&tracking, NOW);
        assert!(!status.completed_by_student);
        assert!(!status.completed_by_tutor);
    }

    #[test]
    fn completion_time_is_monotonic() {
        let first = datetime!(2024-05-01 09:00 UTC);
        let snapshot = Completion {
            completed_by_student: true,
            completed_by_tutor: true,
            completed_at: Some(first),
        };
        // item 2 was revoked by the tutor after the phase completed
        let tracking = granular(
            vec![row(1, true, true, Some(first)), row(2, true, false, None)],
            Some(snapshot.clone()),
        );
        let status = compute_phase_status(&tracking, NOW);
        assert!(!status.completed_by_tutor);
        assert_eq!(status.completed_at, Some(first));

        // re-completing keeps the first stamp
        let tracking = granular(
            vec![row(1, true, true, Some(first)), row(2, true, true, Some(NOW))],
            Some(snapshot),
        );
        assert_eq!(compute_phase_status(&tracking, NOW).completed_at, Some(first));
    }

    #[test]
    fn legacy_row_is_reported_verbatim() {
        let stored = Completion {
            completed_by_student: true,
            completed_by_tutor: false,
            completed_at: None,
        };
        let tracking = PhaseTracking::from_rows(vec![], &HashMap::new(), Some(stored.clone()));
        assert!(matches!(tracking, PhaseTracking::Legacy(_)));
        assert_eq!(compute_phase_status(&tracking, NOW), stored);

        let empty = PhaseTracking::from_rows(vec![], &HashMap::new(), None);
        assert_eq!(compute_phase_status(&empty, NOW), Completion::default());
    }

    #[test]
    fn stale_snapshot_does_not_override_items() {
        let snapshot = Completion {
            completed_by_student: true,
            completed_by_tutor: true,
            completed_at: None,
        };
        let tracking = granular(vec![], Some(snapshot));
        let status = compute_phase_status(&tracking, NOW);
        assert!(!status.completed_by_student);
        assert!(!status.completed_by_tutor);
    }
}
