pub mod aggregate;
pub mod confirm;
pub mod progress;

use std::collections::HashMap;

use aggregate::{PhaseTracking, compute_phase_status};
use progress::Completion;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    course,
    error::{Error, Result},
    utils::now_utc,
};

/// A named, ordered grouping of syllabus items within a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusPhase {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub position: i64,
}

/// The smallest unit of course content progress is tracked against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusItem {
    pub id: i64,
    pub phase_id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub position: i64,
}

/// What a confirmation id resolved to
#[derive(Debug, Clone)]
pub enum SyllabusTarget {
    Item(SyllabusItem),
    /// Phase ids are still accepted from clients that predate item tracking
    Phase(SyllabusPhase),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    #[serde(flatten)]
    pub item: SyllabusItem,
    #[serde(flatten)]
    pub completion: Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrackingKind {
    Granular,
    Legacy,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhaseView {
    pub id: i64,
    pub name: String,
    pub position: i64,
    pub tracking: TrackingKind,
    #[serde(flatten)]
    pub completion: Completion,
    pub items: Vec<ItemView>,
}

const PHASE_COLUMNS: &str = "SELECT id, course_id, name, position FROM syllabus_phase";
const ITEM_COLUMNS: &str =
    "SELECT id, phase_id, course_id, title, description, position FROM syllabus_item";

pub async fn create_phase(
    database: &SqlitePool,
    course_id: i64,
    name: String,
    position: Option<i64>,
) -> Result<SyllabusPhase> {
    if name.trim().is_empty() {
        return Err(Error::Validation("phase name must not be empty".to_string()));
    }
    course::get_course(database, course_id).await?;
    let position = match position {
        Some(position) => position,
        None => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM syllabus_phase WHERE course_id = ?",
            )
            .bind(course_id)
            .fetch_one(database)
            .await?
        }
    };
    let id = sqlx::query("INSERT INTO syllabus_phase (course_id, name, position) VALUES (?, ?, ?)")
        .bind(course_id)
        .bind(name.trim())
        .bind(position)
        .execute(database)
        .await?
        .last_insert_rowid();
    info!("created phase {} in course {}", id, course_id);
    Ok(SyllabusPhase {
        id,
        course_id,
        name: name.trim().to_string(),
        position,
    })
}

pub async fn create_item(
    database: &SqlitePool,
    phase_id: i64,
    title: String,
    description: Option<String>,
    position: Option<i64>,
) -> Result<SyllabusItem> {
    if title.trim().is_empty() {
        return Err(Error::Validation("item title must not be empty".to_string()));
    }
    let phase = sqlx::query_as::<_, SyllabusPhase>(&format!("{PHASE_COLUMNS} WHERE id = ?"))
        .bind(phase_id)
        .fetch_optional(database)
        .await?
        .ok_or_else(|| Error::NotFound(format!("phase {phase_id}")))?;
    let position = match position {
        Some(position) => position,
        None => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM syllabus_item WHERE phase_id = ?",
            )
            .bind(phase_id)
            .fetch_one(database)
            .await?
        }
    };
    let id = sqlx::query(
        "INSERT INTO syllabus_item (phase_id, course_id, title, description, position) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(phase_id)
    .bind(phase.course_id)
    .bind(title.trim())
    .bind(&description)
    .bind(position)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("created item {} in phase {}", id, phase_id);
    Ok(SyllabusItem {
        id,
        phase_id,
        course_id: phase.course_id,
        title: title.trim().to_string(),
        description,
        position,
    })
}

pub async fn list_phases<'e>(
    executor: impl SqliteExecutor<'e>,
    course_id: i64,
) -> Result<Vec<SyllabusPhase>> {
    let phases = sqlx::query_as::<_, SyllabusPhase>(&format!(
        "{PHASE_COLUMNS} WHERE course_id = ? ORDER BY position, id"
    ))
    .bind(course_id)
    .fetch_all(executor)
    .await?;
    Ok(phases)
}

pub async fn list_items<'e>(
    executor: impl SqliteExecutor<'e>,
    course_id: i64,
) -> Result<Vec<SyllabusItem>> {
    let items = sqlx::query_as::<_, SyllabusItem>(&format!(
        "{ITEM_COLUMNS} WHERE course_id = ? ORDER BY phase_id, position, id"
    ))
    .bind(course_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

pub async fn phase_items<'e>(
    executor: impl SqliteExecutor<'e>,
    phase_id: i64,
) -> Result<Vec<SyllabusItem>> {
    let items = sqlx::query_as::<_, SyllabusItem>(&format!(
        "{ITEM_COLUMNS} WHERE phase_id = ? ORDER BY position, id"
    ))
    .bind(phase_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

/// Resolve a confirmation id within a course, trying items before phases
pub async fn resolve_target(
    database: &SqlitePool,
    course_id: i64,
    id: i64,
) -> Result<SyllabusTarget> {
    let item = sqlx::query_as::<_, SyllabusItem>(&format!(
        "{ITEM_COLUMNS} WHERE id = ? AND course_id = ?"
    ))
    .bind(id)
    .bind(course_id)
    .fetch_optional(database)
    .await?;
    if let Some(item) = item {
        return Ok(SyllabusTarget::Item(item));
    }
    let phase = sqlx::query_as::<_, SyllabusPhase>(&format!(
        "{PHASE_COLUMNS} WHERE id = ? AND course_id = ?"
    ))
    .bind(id)
    .bind(course_id)
    .fetch_optional(database)
    .await?;
    match phase {
        Some(phase) => Ok(SyllabusTarget::Phase(phase)),
        None => Err(Error::NotFound(format!(
            "no syllabus item or phase {id} in course {course_id}"
        ))),
    }
}

/// Ordered phases of a course with each item's flags and the derived phase status
pub async fn syllabus_progress(
    database: &SqlitePool,
    course_id: i64,
    student_id: i64,
) -> Result<Vec<PhaseView>> {
    let phases = list_phases(database, course_id).await?;
    let items = list_items(database, course_id).await?;
    let item_ids: Vec<i64> = items.iter().map(|i| i.id).collect();
    let phase_ids: Vec<i64> = phases.iter().map(|p| p.id).collect();
    let item_progress = progress::list_item_progress(database, student_id, &item_ids).await?;
    let phase_progress = progress::list_phase_progress(database, student_id, &phase_ids).await?;

    let mut items_by_phase: HashMap<i64, Vec<SyllabusItem>> = HashMap::new();
    for item in items {
        items_by_phase.entry(item.phase_id).or_default().push(item);
    }

    let now = now_utc();
    let mut views = Vec::with_capacity(phases.len());
    for phase in phases {
        let items = items_by_phase.remove(&phase.id).unwrap_or_default();
        let stored = phase_progress.get(&phase.id).map(|p| p.completion.clone());
        let tracking = PhaseTracking::from_rows(items, &item_progress, stored);
        let completion = compute_phase_status(&tracking, now);
        let (kind, items) = match tracking {
            PhaseTracking::Granular { items, progress: rows, .. } => {
                let items = items
                    .into_iter()
                    .map(|item| {
                        let completion = rows
                            .get(&item.id)
                            .map(|p| p.completion.clone())
                            .unwrap_or_default();
                        ItemView { item, completion }
                    })
                    .collect();
                (TrackingKind::Granular, items)
            }
            PhaseTracking::Legacy(_) => (TrackingKind::Legacy, Vec::new()),
        };
        views.push(PhaseView {
            id: phase.id,
            name: phase.name,
            position: phase.position,
            tracking: kind,
            completion,
            items,
        });
    }
    Ok(views)
}
