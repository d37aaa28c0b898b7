use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    account::{self, Role},
    error::{Error, Result},
    payment::{self, EnrollmentPaymentStatus},
    utils::now_utc,
};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub fee_cents: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub status: EnrollmentStatus,
    pub payment_status: EnrollmentPaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
}

/// Enrollment joined with the student and course it links
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentDetail {
    pub id: i64,
    pub course_id: i64,
    pub course_title: String,
    pub student_id: i64,
    pub student_name: String,
    pub student_email: String,
    pub status: EnrollmentStatus,
    pub payment_status: EnrollmentPaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct EnrollmentFilter {
    pub course_id: Option<i64>,
    pub student_id: Option<i64>,
    pub status: Option<EnrollmentStatus>,
    /// Matches student name, student email or course title
    pub search: Option<String>,
}

const ENROLLMENT_COLUMNS: &str =
    "SELECT id, course_id, student_id, status, payment_status, enrolled_at FROM enrollment";

pub async fn create_course(
    database: &SqlitePool,
    title: String,
    description: String,
    fee_cents: i64,
) -> Result<Course> {
    if title.trim().is_empty() {
        return Err(Error::Validation("course title must not be empty".to_string()));
    }
    if fee_cents < 0 {
        return Err(Error::Validation("fee must not be negative".to_string()));
    }
    let id = sqlx::query(
        "INSERT INTO course (title, description, fee_cents, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(title.trim())
    .bind(description)
    .bind(fee_cents)
    .bind(now_utc())
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("created course {} {}", id, title);
    get_course(database, id).await
}

pub async fn get_course<'e>(executor: impl SqliteExecutor<'e>, id: i64) -> Result<Course> {
    sqlx::query_as::<_, Course>(
        "SELECT id, title, description, fee_cents, created_at FROM course WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| Error::NotFound(format!("course {id}")))
}

pub async fn list_courses(database: &SqlitePool) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT id, title, description, fee_cents, created_at FROM course ORDER BY id",
    )
    .fetch_all(database)
    .await?;
    Ok(courses)
}

pub async fn enroll_student(
    database: &SqlitePool,
    course_id: i64,
    student_id: i64,
) -> Result<Enrollment> {
    let course = get_course(database, course_id).await?;
    account::ensure_role(database, student_id, Role::Student).await?;
    let payment_status = payment::compute_payment_status(course.fee_cents, &[]);
    let id = sqlx::query(
        "INSERT INTO enrollment (course_id, student_id, status, payment_status, enrolled_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(student_id)
    .bind(EnrollmentStatus::Active)
    .bind(payment_status)
    .bind(now_utc())
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("enrolled student {} in course {}", student_id, course_id);
    get_enrollment(database, id).await
}

pub async fn get_enrollment<'e>(executor: impl SqliteExecutor<'e>, id: i64) -> Result<Enrollment> {
    sqlx::query_as::<_, Enrollment>(&format!("{ENROLLMENT_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound(format!("enrollment {id}")))
}

pub async fn find_enrollment<'e>(
    executor: impl SqliteExecutor<'e>,
    course_id: i64,
    student_id: i64,
) -> Result<Option<Enrollment>> {
    let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
        "{ENROLLMENT_COLUMNS} WHERE course_id = ? AND student_id = ?"
    ))
    .bind(course_id)
    .bind(student_id)
    .fetch_optional(executor)
    .await?;
    Ok(enrollment)
}

pub async fn set_enrollment_status(
    database: &SqlitePool,
    enrollment_id: i64,
    status: EnrollmentStatus,
) -> Result<Enrollment> {
    let updated = sqlx::query("UPDATE enrollment SET status = ? WHERE id = ?")
        .bind(status)
        .bind(enrollment_id)
        .execute(database)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(Error::NotFound(format!("enrollment {enrollment_id}")));
    }
    get_enrollment(database, enrollment_id).await
}

pub async fn list_enrollments(
    database: &SqlitePool,
    filter: &EnrollmentFilter,
) -> Result<Vec<EnrollmentDetail>> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT e.id, e.course_id, c.title AS course_title, e.student_id, \
         a.name AS student_name, a.email AS student_email, e.status, e.payment_status, e.enrolled_at \
         FROM enrollment e \
         JOIN account a ON a.id = e.student_id \
         JOIN course c ON c.id = e.course_id \
         WHERE 1 = 1",
    );
    if let Some(course_id) = filter.course_id {
        query.push(" AND e.course_id = ").push_bind(course_id);
    }
    if let Some(student_id) = filter.student_id {
        query.push(" AND e.student_id = ").push_bind(student_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND e.status = ").push_bind(status);
    }
    if let Some(search) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let pattern = format!("%{search}%");
        query
            .push(" AND (a.name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR a.email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.title LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    query.push(" ORDER BY e.id");
    let enrollments = query
        .build_query_as::<EnrollmentDetail>()
        .fetch_all(database)
        .await?;
    Ok(enrollments)
}

pub async fn assign_tutor(database: &SqlitePool, course_id: i64, tutor_id: i64) -> Result<()> {
    get_course(database, course_id).await?;
    account::ensure_role(database, tutor_id, Role::Tutor).await?;
    sqlx::query("INSERT INTO course_tutor (course_id, tutor_id, assigned_at) VALUES (?, ?, ?)")
        .bind(course_id)
        .bind(tutor_id)
        .bind(now_utc())
        .execute(database)
        .await?;
    info!("assigned tutor {} to course {}", tutor_id, course_id);
    Ok(())
}

pub async fn is_tutor_assigned<'e>(
    executor: impl SqliteExecutor<'e>,
    course_id: i64,
    tutor_id: i64,
) -> Result<bool> {
    let assigned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM course_tutor WHERE course_id = ? AND tutor_id = ?)",
    )
    .bind(course_id)
    .bind(tutor_id)
    .fetch_one(executor)
    .await?;
    Ok(assigned)
}

pub async fn tutor_courses(database: &SqlitePool, tutor_id: i64) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT c.id, c.title, c.description, c.fee_cents, c.created_at FROM course c \
         JOIN course_tutor t ON t.course_id = c.id WHERE t.tutor_id = ? ORDER BY c.id",
    )
    .bind(tutor_id)
    .fetch_all(database)
    .await?;
    Ok(courses)
}
