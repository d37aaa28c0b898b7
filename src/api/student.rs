use axum::{
    Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::{ApiPath, ApiResult, Authorized, StudentUser, ok, optional_json};
use crate::{
    course::{self, EnrollmentDetail, EnrollmentFilter},
    error::Error,
    payment::{self, Payment},
    server::AppState,
    syllabus::{
        self, PhaseView,
        confirm::{self, ConfirmationOutcome},
    },
};

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    /// When the work was completed, server time if omitted
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[utoipa::path(
    get,
    path = "/api/student/courses",
    responses(
        (status = 200, description = "Enrollments of the logged in student", body = Vec<EnrollmentDetail>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a student")
    )
)]
pub async fn list_courses(
    State(state): State<AppState>,
    Authorized { user: student, .. }: StudentUser,
) -> ApiResult<Vec<EnrollmentDetail>> {
    let filter = EnrollmentFilter {
        student_id: Some(student.id),
        ..Default::default()
    };
    ok(course::list_enrollments(&state.database, &filter).await?)
}

#[utoipa::path(
    get,
    path = "/api/student/courses/{course_id}/syllabus/progress",
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Ordered phases with item and phase status", body = Vec<PhaseView>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not enrolled")
    )
)]
pub async fn syllabus_progress(
    State(state): State<AppState>,
    Authorized { user: student, .. }: StudentUser,
    ApiPath(course_id): ApiPath<i64>,
) -> ApiResult<Vec<PhaseView>> {
    confirm::check_student_access(&state.database, course_id, student.id, false).await?;
    ok(syllabus::syllabus_progress(&state.database, course_id, student.id).await?)
}

#[utoipa::path(
    post,
    path = "/api/student/courses/{course_id}/syllabus/{id}/confirm",
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("id" = i64, Path, description = "Syllabus item id, or a phase id for phases without items")
    ),
    request_body(content = ConfirmRequest, description = "May be omitted"),
    responses(
        (status = 200, description = "Updated item and phase", body = ConfirmationOutcome),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not enrolled"),
        (status = 404, description = "No such item or phase in the course")
    )
)]
pub async fn confirm(
    State(state): State<AppState>,
    Authorized { user: student, .. }: StudentUser,
    ApiPath((course_id, id)): ApiPath<(i64, i64)>,
    body: Bytes,
) -> ApiResult<ConfirmationOutcome> {
    confirm::check_student_access(&state.database, course_id, student.id, true).await?;
    let req: ConfirmRequest = optional_json(&body)?;
    let completed_at =
        confirm::validate_completed_at(req.completed_at, state.config.max_clock_skew_secs)?;
    ok(confirm::confirm_as_student(&state.database, student.id, course_id, id, completed_at).await?)
}

#[utoipa::path(
    get,
    path = "/api/student/courses/{course_id}/payments",
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Payments recorded for the enrollment", body = Vec<Payment>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not enrolled")
    )
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Authorized { user: student, .. }: StudentUser,
    ApiPath(course_id): ApiPath<i64>,
) -> ApiResult<Vec<Payment>> {
    let Some(enrollment) =
        course::find_enrollment(&state.database, course_id, student.id).await?
    else {
        return Err(Error::Forbidden(format!("not enrolled in course {course_id}")));
    };
    ok(payment::list_payments(&state.database, enrollment.id).await?)
}

pub fn get_student_scope() -> Router<AppState> {
    Router::new().nest(
        "/student",
        Router::new()
            .route("/courses", get(list_courses))
            .route("/courses/{course_id}/syllabus/progress", get(syllabus_progress))
            .route("/courses/{course_id}/syllabus/{id}/confirm", post(confirm))
            .route("/courses/{course_id}/payments", get(list_payments)),
    )
}
