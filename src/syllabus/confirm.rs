//! Student and tutor confirmations.
//!
//! Every confirmation resolves its target, checks the caller's access, and then
//! updates the item rows and the phase snapshot inside one transaction, so a reader
//! never sees an item change without the matching phase recomputation.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use time::{Duration, OffsetDateTime};
use tracing::info;
use utoipa::ToSchema;

use super::{
    SyllabusItem, SyllabusTarget,
    aggregate::{PhaseTracking, compute_phase_status},
    phase_items,
    progress::{self, Actor, ItemProgress, PhaseProgress},
    resolve_target,
};
use crate::{
    course::{self, EnrollmentStatus},
    error::{Error, Result},
    utils::{now_utc, to_utc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Item,
    Phase,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationOutcome {
    pub target: TargetKind,
    /// The confirmed item, absent when a phase id was confirmed
    pub item: Option<ItemProgress>,
    pub phase: PhaseProgress,
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Confirm(Actor, Option<OffsetDateTime>),
    Revoke(Actor),
}

/// Reject client completion times that lie too far in the future
pub fn validate_completed_at(
    completed_at: Option<OffsetDateTime>,
    max_skew_secs: i64,
) -> Result<Option<OffsetDateTime>> {
    let Some(at) = completed_at.map(to_utc) else {
        return Ok(None);
    };
    if at > now_utc() + Duration::seconds(max_skew_secs) {
        return Err(Error::Validation(format!(
            "completedAt {at} is in the future"
        )));
    }
    Ok(Some(at))
}

fn enrollment_allows(status: EnrollmentStatus, require_active: bool) -> bool {
    match status {
        EnrollmentStatus::Active => true,
        EnrollmentStatus::Completed => !require_active,
        EnrollmentStatus::Dropped => false,
    }
}

/// Students read the progress of courses they have not dropped; confirming needs an active enrollment
pub async fn check_student_access(
    database: &SqlitePool,
    course_id: i64,
    student_id: i64,
    require_active: bool,
) -> Result<()> {
    let Some(enrollment) = course::find_enrollment(database, course_id, student_id).await? else {
        return Err(Error::Forbidden(format!(
            "not enrolled in course {course_id}"
        )));
    };
    if !enrollment_allows(enrollment.status, require_active) {
        return Err(Error::Forbidden(format!(
            "enrollment in course {course_id} is {:?}",
            enrollment.status
        )));
    }
    Ok(())
}

/// A tutor must be assigned to the course, and the student must be enrolled in it
pub async fn check_tutor_access(
    database: &SqlitePool,
    course_id: i64,
    tutor_id: i64,
    student_id: i64,
    require_active: bool,
) -> Result<()> {
    if !course::is_tutor_assigned(database, course_id, tutor_id).await? {
        return Err(Error::Forbidden(format!(
            "not assigned to course {course_id}"
        )));
    }
    let Some(enrollment) = course::find_enrollment(database, course_id, student_id).await? else {
        return Err(Error::NotFound(format!(
            "student {student_id} is not enrolled in course {course_id}"
        )));
    };
    if !enrollment_allows(enrollment.status, require_active) {
        return Err(Error::Forbidden(format!(
            "enrollment of student {student_id} is {:?}",
            enrollment.status
        )));
    }
    Ok(())
}

pub async fn confirm_as_student(
    database: &SqlitePool,
    student_id: i64,
    course_id: i64,
    target_id: i64,
    completed_at: Option<OffsetDateTime>,
) -> Result<ConfirmationOutcome> {
    let target = resolve_target(database, course_id, target_id).await?;
    check_student_access(database, course_id, student_id, true).await?;
    apply(
        database,
        student_id,
        target,
        Change::Confirm(Actor::Student, completed_at),
    )
    .await
}

pub async fn confirm_as_tutor(
    database: &SqlitePool,
    tutor_id: i64,
    course_id: i64,
    student_id: i64,
    target_id: i64,
    completed_at: Option<OffsetDateTime>,
) -> Result<ConfirmationOutcome> {
    let target = resolve_target(database, course_id, target_id).await?;
    check_tutor_access(database, course_id, tutor_id, student_id, true).await?;
    apply(
        database,
        student_id,
        target,
        Change::Confirm(Actor::Tutor, completed_at),
    )
    .await
}

pub async fn revoke_as_tutor(
    database: &SqlitePool,
    tutor_id: i64,
    course_id: i64,
    student_id: i64,
    target_id: i64,
) -> Result<ConfirmationOutcome> {
    let target = resolve_target(database, course_id, target_id).await?;
    check_tutor_access(database, course_id, tutor_id, student_id, true).await?;
    apply(database, student_id, target, Change::Revoke(Actor::Tutor)).await
}

async fn apply_to_item(
    conn: &mut SqliteConnection,
    student_id: i64,
    item_id: i64,
    change: Change,
) -> Result<ItemProgress> {
    match change {
        Change::Confirm(actor, at) => {
            progress::upsert_item_progress(conn, student_id, item_id, actor, at).await
        }
        Change::Revoke(actor) => progress::revoke_item_progress(conn, student_id, item_id, actor).await,
    }
}

async fn apply(
    database: &SqlitePool,
    student_id: i64,
    target: SyllabusTarget,
    change: Change,
) -> Result<ConfirmationOutcome> {
    // phase members are read up front so the transaction opens with a write
    let phase_members: Option<Vec<SyllabusItem>> = match &target {
        SyllabusTarget::Item(_) => None,
        SyllabusTarget::Phase(phase) => Some(phase_items(database, phase.id).await?),
    };

    let mut tx = database.begin().await?;
    let outcome = match (target, phase_members) {
        (SyllabusTarget::Item(item), _) => {
            let item_progress = apply_to_item(&mut tx, student_id, item.id, change).await?;
            let phase = recompute_phase(&mut tx, student_id, item.phase_id).await?;
            ConfirmationOutcome {
                target: TargetKind::Item,
                item: Some(item_progress),
                phase,
            }
        }
        (SyllabusTarget::Phase(phase), Some(items)) if !items.is_empty() => {
            for item in &items {
                apply_to_item(&mut tx, student_id, item.id, change).await?;
            }
            let phase = recompute_phase(&mut tx, student_id, phase.id).await?;
            ConfirmationOutcome {
                target: TargetKind::Phase,
                item: None,
                phase,
            }
        }
        (SyllabusTarget::Phase(phase), _) => {
            let phase = match change {
                Change::Confirm(actor, at) => {
                    progress::upsert_phase_progress(&mut tx, student_id, phase.id, actor, at).await?
                }
                Change::Revoke(actor) => {
                    progress::revoke_phase_progress(&mut tx, student_id, phase.id, actor).await?
                }
            };
            ConfirmationOutcome {
                target: TargetKind::Phase,
                item: None,
                phase,
            }
        }
    };
    tx.commit().await?;
    info!(
        "{:?} for student {} on {:?}: phase {} student={} tutor={}",
        change,
        student_id,
        outcome.target,
        outcome.phase.phase_id,
        outcome.phase.completion.completed_by_student,
        outcome.phase.completion.completed_by_tutor
    );
    Ok(outcome)
}

/// Re-derive a phase from its item rows and persist the snapshot
async fn recompute_phase(
    conn: &mut SqliteConnection,
    student_id: i64,
    phase_id: i64,
) -> Result<PhaseProgress> {
    let tracking = progress::load_phase_tracking(conn, student_id, phase_id).await?;
    let completion = compute_phase_status(&tracking, now_utc());
    match tracking {
        PhaseTracking::Granular { .. } => {
            progress::save_phase_progress(conn, student_id, phase_id, &completion).await
        }
        PhaseTracking::Legacy(_) => Ok(PhaseProgress {
            student_id,
            phase_id,
            completion,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::fixtures, syllabus::progress::list_item_progress};
    use time::macros::datetime;

    struct Setup {
        _dir: tempfile::TempDir,
        database: SqlitePool,
        course: i64,
        student: i64,
        tutor: i64,
        phase: i64,
        a: i64,
        b: i64,
    }

    async fn setup() -> Setup {
        let (dir, database) = fixtures::database().await;
        let course = fixtures::course(&database, "Rust", 0).await;
        let student = fixtures::account(&database, "s@example.com", "student").await;
        let tutor = fixtures::account(&database, "t@example.com", "tutor").await;
        fixtures::enroll(&database, course, student, "active").await;
        fixtures::assign_tutor(&database, course, tutor).await;
        let phase = fixtures::phase(&database, course, "Basics", 0).await;
        let a = fixtures::item(&database, course, phase, "A", 0).await;
        let b = fixtures::item(&database, course, phase, "B", 1).await;
        Setup {
            _dir: dir,
            database,
            course,
            student,
            tutor,
            phase,
            a,
            b,
        }
    }

    #[tokio::test]
    async fn student_confirmation_is_idempotent() {
        let s = setup().await;
        let first = confirm_as_student(&s.database, s.student, s.course, s.a, None)
            .await
            .unwrap();
        let second = confirm_as_student(&s.database, s.student, s.course, s.a, None)
            .await
            .unwrap();
        assert_eq!(first.target, TargetKind::Item);
        assert_eq!(first.item, second.item);
        assert!(second.item.unwrap().completion.completed_by_student);
    }

    #[tokio::test]
    async fn dual_confirmation_scenario() {
        let s = setup().await;
        confirm_as_tutor(&s.database, s.tutor, s.course, s.student, s.a, None)
            .await
            .unwrap();
        confirm_as_tutor(&s.database, s.tutor, s.course, s.student, s.b, None)
            .await
            .unwrap();
        let outcome = confirm_as_student(&s.database, s.student, s.course, s.a, None)
            .await
            .unwrap();
        assert!(outcome.phase.completion.completed_by_tutor);
        assert!(!outcome.phase.completion.completed_by_student);
        assert_eq!(outcome.phase.completion.completed_at, None);

        let outcome = confirm_as_student(&s.database, s.student, s.course, s.b, None)
            .await
            .unwrap();
        assert!(outcome.phase.completion.completed_by_student);
        assert!(outcome.phase.completion.completed_by_tutor);
        assert!(outcome.phase.completion.completed_at.is_some());

        let stored = progress::get_phase_progress(&s.database, s.student, s.phase)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, outcome.phase);
    }

    #[tokio::test]
    async fn confirmation_order_commutes() {
        let s = setup().await;
        let at = datetime!(2024-02-01 08:00 UTC);
        confirm_as_student(&s.database, s.student, s.course, s.a, Some(at))
            .await
            .unwrap();
        let student_first = confirm_as_tutor(&s.database, s.tutor, s.course, s.student, s.a, Some(at))
            .await
            .unwrap();
        confirm_as_tutor(&s.database, s.tutor, s.course, s.student, s.b, Some(at))
            .await
            .unwrap();
        let tutor_first = confirm_as_student(&s.database, s.student, s.course, s.b, Some(at))
            .await
            .unwrap();

        let a = student_first.item.unwrap();
        let b = tutor_first.item.unwrap();
        assert_eq!(a.completion, b.completion);
        assert_eq!(a.completion.completed_at, Some(at));
    }

    #[tokio::test]
    async fn unenrolled_student_is_forbidden_and_writes_nothing() {
        let s = setup().await;
        let outsider = fixtures::account(&s.database, "o@example.com", "student").await;
        let result = confirm_as_student(&s.database, outsider, s.course, s.a, None).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
        let rows = list_item_progress(&s.database, outsider, &[s.a, s.b])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn dropped_student_is_forbidden() {
        let s = setup().await;
        let dropped = fixtures::account(&s.database, "d@example.com", "student").await;
        fixtures::enroll(&s.database, s.course, dropped, "dropped").await;
        let result = confirm_as_student(&s.database, dropped, s.course, s.a, None).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn unassigned_tutor_is_forbidden() {
        let s = setup().await;
        let other = fixtures::account(&s.database, "o@example.com", "tutor").await;
        let result = confirm_as_tutor(&s.database, other, s.course, s.student, s.a, None).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn tutor_on_unenrolled_student_is_not_found() {
        let s = setup().await;
        let outsider = fixtures::account(&s.database, "o@example.com", "student").await;
        let result = confirm_as_tutor(&s.database, s.tutor, s.course, outsider, s.a, None).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let s = setup().await;
        let other_course = fixtures::course(&s.database, "Go", 0).await;
        fixtures::enroll(&s.database, other_course, s.student, "active").await;
        let result = confirm_as_student(&s.database, s.student, other_course, s.a, None).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn legacy_phase_confirmation() {
        let s = setup().await;
        // phase id 2 is shadowed by item b, so the legacy phase gets id 3
        fixtures::phase(&s.database, s.course, "Shadowed", 1).await;
        let legacy = fixtures::phase(&s.database, s.course, "Legacy", 2).await;
        assert!(legacy > s.b);

        let outcome = confirm_as_student(&s.database, s.student, s.course, legacy, None)
            .await
            .unwrap();
        assert_eq!(outcome.target, TargetKind::Phase);
        assert!(outcome.item.is_none());
        assert!(outcome.phase.completion.completed_by_student);
        assert!(!outcome.phase.completion.completed_by_tutor);
        assert_eq!(outcome.phase.completion.completed_at, None);

        let views = crate::syllabus::syllabus_progress(&s.database, s.course, s.student)
            .await
            .unwrap();
        let view = views.iter().find(|v| v.id == legacy).unwrap();
        assert_eq!(view.completion, outcome.phase.completion);
    }

    #[tokio::test]
    async fn legacy_phase_revoke_keeps_completion_time() {
        let s = setup().await;
        fixtures::phase(&s.database, s.course, "Shadowed", 1).await;
        let legacy = fixtures::phase(&s.database, s.course, "Legacy", 2).await;
        let completed = datetime!(2024-05-01 09:00 UTC);

        confirm_as_student(&s.database, s.student, s.course, legacy, None)
            .await
            .unwrap();
        let outcome = confirm_as_tutor(&s.database, s.tutor, s.course, s.student, legacy, Some(completed))
            .await
            .unwrap();
        assert_eq!(outcome.phase.completion.completed_at, Some(completed));

        let outcome = revoke_as_tutor(&s.database, s.tutor, s.course, s.student, legacy)
            .await
            .unwrap();
        assert!(outcome.phase.completion.completed_by_student);
        assert!(!outcome.phase.completion.completed_by_tutor);
        assert_eq!(outcome.phase.completion.completed_at, Some(completed));

        let later = datetime!(2024-06-01 09:00 UTC);
        let outcome = confirm_as_tutor(&s.database, s.tutor, s.course, s.student, legacy, Some(later))
            .await
            .unwrap();
        assert!(outcome.phase.completion.is_complete());
        assert_eq!(outcome.phase.completion.completed_at, Some(completed));

        let stored = progress::get_phase_progress(&s.database, s.student, legacy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, outcome.phase);
    }

    #[tokio::test]
    async fn phase_id_on_granular_phase_confirms_every_item() {
        let s = setup().await;
        for name in ["P2", "P3", "P4"] {
            fixtures::phase(&s.database, s.course, name, 1).await;
        }
        let extra = fixtures::phase(&s.database, s.course, "Extra", 2).await;
        let c = fixtures::item(&s.database, s.course, extra, "C", 0).await;
        let d = fixtures::item(&s.database, s.course, extra, "D", 1).await;
        assert!(![s.a, s.b, c, d].contains(&extra));

        let outcome = confirm_as_tutor(&s.database, s.tutor, s.course, s.student, extra, None)
            .await
            .unwrap();
        assert_eq!(outcome.target, TargetKind::Phase);
        assert!(outcome.phase.completion.completed_by_tutor);
        assert!(!outcome.phase.completion.completed_by_student);
        let rows = list_item_progress(&s.database, s.student, &[c, d]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.values().all(|r| r.completion.completed_by_tutor));
    }

    #[tokio::test]
    async fn revoke_keeps_phase_completion_time() {
        let s = setup().await;
        for item in [s.a, s.b] {
            confirm_as_student(&s.database, s.student, s.course, item, None)
                .await
                .unwrap();
            confirm_as_tutor(&s.database, s.tutor, s.course, s.student, item, None)
                .await
                .unwrap();
        }
        let completed = progress::get_phase_progress(&s.database, s.student, s.phase)
            .await
            .unwrap()
            .unwrap();
        assert!(completed.completion.completed_at.is_some());

        let outcome = revoke_as_tutor(&s.database, s.tutor, s.course, s.student, s.b)
            .await
            .unwrap();
        let item = outcome.item.unwrap();
        assert!(!item.completion.completed_by_tutor);
        assert_eq!(item.completion.completed_at, None);
        assert!(!outcome.phase.completion.completed_by_tutor);
        assert_eq!(
            outcome.phase.completion.completed_at,
            completed.completion.completed_at
        );
    }

    #[test]
    fn future_completion_time_rejected() {
        let future = now_utc() + Duration::hours(2);
        assert!(matches!(
            validate_completed_at(Some(future), 300),
            Err(Error::Validation(_))
        ));
        let past = datetime!(2024-01-01 00:00 +02:00);
        let normalised = validate_completed_at(Some(past), 300).unwrap().unwrap();
        assert_eq!(normalised, past);
        assert_eq!(normalised.offset(), time::UtcOffset::UTC);
        assert_eq!(validate_completed_at(None, 300).unwrap(), None);
    }
}
