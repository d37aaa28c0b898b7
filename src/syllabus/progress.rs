use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor};
use time::OffsetDateTime;
use tracing::debug;
use utoipa::ToSchema;

use super::{
    aggregate::PhaseTracking,
    phase_items,
};
use crate::{error::Result, utils::now_utc};

/// Which party is confirming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Student,
    Tutor,
}

impl Actor {
    fn column(self) -> &'static str {
        match self {
            Actor::Student => "completed_by_student",
            Actor::Tutor => "completed_by_tutor",
        }
    }
}

/// Dual-confirmation state shared by item and phase rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub completed_by_student: bool,
    pub completed_by_tutor: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl Completion {
    pub fn is_complete(&self) -> bool {
        self.completed_by_student && self.completed_by_tutor
    }

    /// Set the actor's flag. `completed_at` is stamped with `at` whenever both flags hold
    /// afterwards, so a repeated confirmation refreshes it.
    pub fn confirm(&mut self, actor: Actor, at: OffsetDateTime) {
        match actor {
            Actor::Student => self.completed_by_student = true,
            Actor::Tutor => self.completed_by_tutor = true,
        }
        if self.is_complete() {
            self.completed_at = Some(at);
        }
    }

    pub fn revoke(&mut self, actor: Actor) {
        match actor {
            Actor::Student => self.completed_by_student = false,
            Actor::Tutor => self.completed_by_tutor = false,
        }
        self.completed_at = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub student_id: i64,
    pub item_id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub completion: Completion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgress {
    pub student_id: i64,
    pub phase_id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub completion: Completion,
}

const ITEM_PROGRESS_COLUMNS: &str = "SELECT student_id, item_id, completed_by_student, \
     completed_by_tutor, completed_at FROM item_progress";
const PHASE_PROGRESS_COLUMNS: &str = "SELECT student_id, phase_id, completed_by_student, \
     completed_by_tutor, completed_at FROM phase_progress";

/// Set the actor's flag on a (student, item) row, creating the row on first confirmation
///
/// The first statement is a write so the transaction holds the write lock while the
/// phase snapshot is recomputed.
pub async fn upsert_item_progress(
    conn: &mut SqliteConnection,
    student_id: i64,
    item_id: i64,
    actor: Actor,
    completed_at: Option<OffsetDateTime>,
) -> Result<ItemProgress> {
    sqlx::query(
        "INSERT INTO item_progress (student_id, item_id) VALUES (?, ?) \
         ON CONFLICT (student_id, item_id) DO NOTHING",
    )
    .bind(student_id)
    .bind(item_id)
    .execute(&mut *conn)
    .await?;
    let mut progress = sqlx::query_as::<_, ItemProgress>(&format!(
        "{ITEM_PROGRESS_COLUMNS} WHERE student_id = ? AND item_id = ?"
    ))
    .bind(student_id)
    .bind(item_id)
    .fetch_one(&mut *conn)
    .await?;
    progress
        .completion
        .confirm(actor, completed_at.unwrap_or_else(now_utc));
    sqlx::query(
        "UPDATE item_progress SET completed_by_student = ?, completed_by_tutor = ?, \
         completed_at = ? WHERE student_id = ? AND item_id = ?",
    )
    .bind(progress.completion.completed_by_student)
    .bind(progress.completion.completed_by_tutor)
    .bind(progress.completion.completed_at)
    .bind(student_id)
    .bind(item_id)
    .execute(&mut *conn)
    .await?;
    debug!(
        "item {} of student {} confirmed by {:?}",
        item_id, student_id, actor
    );
    Ok(progress)
}

/// Clear the actor's flag and the item's completion time. Rows are never deleted.
pub async fn revoke_item_progress(
    conn: &mut SqliteConnection,
    student_id: i64,
    item_id: i64,
    actor: Actor,
) -> Result<ItemProgress> {
    sqlx::query(&format!(
        "UPDATE item_progress SET {} = 0, completed_at = NULL WHERE student_id = ? AND item_id = ?",
        actor.column()
    ))
    .bind(student_id)
    .bind(item_id)
    .execute(&mut *conn)
    .await?;
    let progress = sqlx::query_as::<_, ItemProgress>(&format!(
        "{ITEM_PROGRESS_COLUMNS} WHERE student_id = ? AND item_id = ?"
    ))
    .bind(student_id)
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(progress.unwrap_or(ItemProgress {
        student_id,
        item_id,
        completion: Completion::default(),
    }))
}

/// Progress rows of one student for the given items; absent entries mean both flags false
pub async fn list_item_progress<'e>(
    executor: impl SqliteExecutor<'e>,
    student_id: i64,
    item_ids: &[i64],
) -> Result<HashMap<i64, ItemProgress>> {
    if item_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut query = QueryBuilder::<Sqlite>::new(ITEM_PROGRESS_COLUMNS);
    query
        .push(" WHERE student_id = ")
        .push_bind(student_id)
        .push(" AND item_id IN (");
    let mut ids = query.separated(", ");
    for id in item_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    let rows = query
        .build_query_as::<ItemProgress>()
        .fetch_all(executor)
        .await?;
    Ok(rows.into_iter().map(|row| (row.item_id, row)).collect())
}

pub async fn get_phase_progress<'e>(
    executor: impl SqliteExecutor<'e>,
    student_id: i64,
    phase_id: i64,
) -> Result<Option<PhaseProgress>> {
    let progress = sqlx::query_as::<_, PhaseProgress>(&format!(
        "{PHASE_PROGRESS_COLUMNS} WHERE student_id = ? AND phase_id = ?"
    ))
    .bind(student_id)
    .bind(phase_id)
    .fetch_optional(executor)
    .await?;
    Ok(progress)
}

pub async fn list_phase_progress<'e>(
    executor: impl SqliteExecutor<'e>,
    student_id: i64,
    phase_ids: &[i64],
) -> Result<HashMap<i64, PhaseProgress>> {
    if phase_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut query = QueryBuilder::<Sqlite>::new(PHASE_PROGRESS_COLUMNS);
    query
        .push(" WHERE student_id = ")
        .push_bind(student_id)
        .push(" AND phase_id IN (");
    let mut ids = query.separated(", ");
    for id in phase_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    let rows = query
        .build_query_as::<PhaseProgress>()
        .fetch_all(executor)
        .await?;
    Ok(rows.into_iter().map(|row| (row.phase_id, row)).collect())
}

/// Write a phase row as-is, used both for derived snapshots and legacy confirmations
pub async fn save_phase_progress(
    conn: &mut SqliteConnection,
    student_id: i64,
    phase_id: i64,
    completion: &Completion,
) -> Result<PhaseProgress> {
    sqlx::query(
        "INSERT INTO phase_progress \
         (student_id, phase_id, completed_by_student, completed_by_tutor, completed_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (student_id, phase_id) DO UPDATE SET \
         completed_by_student = excluded.completed_by_student, \
         completed_by_tutor = excluded.completed_by_tutor, \
         completed_at = excluded.completed_at",
    )
    .bind(student_id)
    .bind(phase_id)
    .bind(completion.completed_by_student)
    .bind(completion.completed_by_tutor)
    .bind(completion.completed_at)
    .execute(&mut *conn)
    .await?;
    Ok(PhaseProgress {
        student_id,
        phase_id,
        completion: completion.clone(),
    })
}

/// Confirm an item-less phase directly on its legacy row. A stamped `completed_at` is kept.
pub async fn upsert_phase_progress(
    conn: &mut SqliteConnection,
    student_id: i64,
    phase_id: i64,
    actor: Actor,
    completed_at: Option<OffsetDateTime>,
) -> Result<PhaseProgress> {
    sqlx::query(
        "INSERT INTO phase_progress (student_id, phase_id) VALUES (?, ?) \
         ON CONFLICT (student_id, phase_id) DO NOTHING",
    )
    .bind(student_id)
    .bind(phase_id)
    .execute(&mut *conn)
    .await?;
    let mut completion = get_phase_progress(&mut *conn, student_id, phase_id)
        .await?
        .map(|p| p.completion)
        .unwrap_or_default();
    let first_completed = completion.completed_at;
    completion.confirm(actor, completed_at.unwrap_or_else(now_utc));
    if first_completed.is_some() {
        completion.completed_at = first_completed;
    }
    save_phase_progress(conn, student_id, phase_id, &completion).await
}

/// Clear the actor's flag on a legacy phase row, keeping its first completion time
pub async fn revoke_phase_progress(
    conn: &mut SqliteConnection,
    student_id: i64,
    phase_id: i64,
    actor: Actor,
) -> Result<PhaseProgress> {
    sqlx::query(&format!(
        "UPDATE phase_progress SET {} = 0 WHERE student_id = ? AND phase_id = ?",
        actor.column()
    ))
    .bind(student_id)
    .bind(phase_id)
    .execute(&mut *conn)
    .await?;
    let progress = get_phase_progress(&mut *conn, student_id, phase_id).await?;
    Ok(progress.unwrap_or(PhaseProgress {
        student_id,
        phase_id,
        completion: Completion::default(),
    }))
}

/// Load everything the aggregator needs for one phase of one student
pub async fn load_phase_tracking(
    conn: &mut SqliteConnection,
    student_id: i64,
    phase_id: i64,
) -> Result<PhaseTracking> {
    let items = phase_items(&mut *conn, phase_id).await?;
    let item_ids: Vec<i64> = items.iter().map(|i| i.id).collect();
    let progress = list_item_progress(&mut *conn, student_id, &item_ids).await?;
    let stored = get_phase_progress(&mut *conn, student_id, phase_id)
        .await?
        .map(|p| p.completion);
    Ok(PhaseTracking::from_rows(items, &progress, stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use time::macros::datetime;

    #[test]
    fn completion_stamps_only_when_both_confirmed() {
        let t1 = datetime!(2024-03-01 10:00 UTC);
        let t2 = datetime!(2024-03-02 10:00 UTC);

        let mut student_first = Completion::default();
        student_first.confirm(Actor::Student, t1);
        assert_eq!(student_first.completed_at, None);
        student_first.confirm(Actor::Tutor, t2);

        let mut tutor_first = Completion::default();
        tutor_first.confirm(Actor::Tutor, t1);
        tutor_first.confirm(Actor::Student, t2);

        assert_eq!(student_first, tutor_first);
        assert_eq!(student_first.completed_at, Some(t2));

        student_first.revoke(Actor::Tutor);
        assert!(student_first.completed_by_student);
        assert!(!student_first.completed_by_tutor);
        assert_eq!(student_first.completed_at, None);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (_dir, database) = fixtures::database().await;
        let course = fixtures::course(&database, "Rust", 0).await;
        let student = fixtures::account(&database, "s@example.com", "student").await;
        let phase = fixtures::phase(&database, course, "Basics", 0).await;
        let item = fixtures::item(&database, course, phase, "Ownership", 0).await;

        let mut conn = database.acquire().await.unwrap();
        let first = upsert_item_progress(&mut conn, student, item, Actor::Student, None)
            .await
            .unwrap();
        let second = upsert_item_progress(&mut conn, student, item, Actor::Student, None)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert!(second.completion.completed_by_student);
        assert!(!second.completion.completed_by_tutor);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_progress")
            .fetch_one(&database)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn list_reports_only_existing_rows() {
        let (_dir, database) = fixtures::database().await;
        let course = fixtures::course(&database, "Rust", 0).await;
        let student = fixtures::account(&database, "s@example.com", "student").await;
        let phase = fixtures::phase(&database, course, "Basics", 0).await;
        let a = fixtures::item(&database, course, phase, "A", 0).await;
        let b = fixtures::item(&database, course, phase, "B", 1).await;

        let mut conn = database.acquire().await.unwrap();
        upsert_item_progress(&mut conn, student, a, Actor::Tutor, None)
            .await
            .unwrap();
        drop(conn);

        let rows = list_item_progress(&database, student, &[a, b]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[&a].completion.completed_by_tutor);
        assert!(!rows.contains_key(&b));
        assert!(list_item_progress(&database, student, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_without_row_writes_nothing() {
        let (_dir, database) = fixtures::database().await;
        let course = fixtures::course(&database, "Rust", 0).await;
        let student = fixtures::account(&database, "s@example.com", "student").await;
        let phase = fixtures::phase(&database, course, "Basics", 0).await;
        let item = fixtures::item(&database, course, phase, "A", 0).await;

        let mut conn = database.acquire().await.unwrap();
        let progress = revoke_item_progress(&mut conn, student, item, Actor::Tutor)
            .await
            .unwrap();
        assert_eq!(progress.completion, Completion::default());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_progress")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
