use axum::{
    Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};

use super::{ApiPath, ApiResult, Authorized, TutorUser, ok, optional_json, student::ConfirmRequest};
use crate::{
    course::{self, Course, EnrollmentDetail, EnrollmentFilter},
    error::Error,
    server::AppState,
    syllabus::{
        self, PhaseView,
        confirm::{self, ConfirmationOutcome},
    },
};

#[utoipa::path(
    get,
    path = "/api/tutor/courses",
    responses(
        (status = 200, description = "Courses the tutor is assigned to", body = Vec<Course>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a tutor")
    )
)]
pub async fn list_courses(
    State(state): State<AppState>,
    Authorized { user: tutor, .. }: TutorUser,
) -> ApiResult<Vec<Course>> {
    ok(course::tutor_courses(&state.database, tutor.id).await?)
}

#[utoipa::path(
    get,
    path = "/api/tutor/courses/{course_id}/students",
    params(("course_id" = i64, Path, description = "Course id")),
    responses(
        (status = 200, description = "Enrollments of the course", body = Vec<EnrollmentDetail>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not assigned to the course")
    )
)]
pub async fn list_students(
    State(state): State<AppState>,
    Authorized { user: tutor, .. }: TutorUser,
    ApiPath(course_id): ApiPath<i64>,
) -> ApiResult<Vec<EnrollmentDetail>> {
    if !course::is_tutor_assigned(&state.database, course_id, tutor.id).await? {
        return Err(Error::Forbidden(format!("not assigned to course {course_id}")));
    }
    let filter = EnrollmentFilter {
        course_id: Some(course_id),
        ..Default::default()
    };
    ok(course::list_enrollments(&state.database, &filter).await?)
}

#[utoipa::path(
    get,
    path = "/api/tutor/courses/{course_id}/students/{student_id}/syllabus/progress",
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("student_id" = i64, Path, description = "Student id")
    ),
    responses(
        (status = 200, description = "Ordered phases with item and phase status", body = Vec<PhaseView>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not assigned to the course"),
        (status = 404, description = "Student not enrolled")
    )
)]
pub async fn syllabus_progress(
    State(state): State<AppState>,
    Authorized { user: tutor, .. }: TutorUser,
    ApiPath((course_id, student_id)): ApiPath<(i64, i64)>,
) -> ApiResult<Vec<PhaseView>> {
    confirm::check_tutor_access(&state.database, course_id, tutor.id, student_id, false).await?;
    ok(syllabus::syllabus_progress(&state.database, course_id, student_id).await?)
}

#[utoipa::path(
    post,
    path = "/api/tutor/courses/{course_id}/students/{student_id}/syllabus/{id}/confirm",
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("student_id" = i64, Path, description = "Student id"),
        ("id" = i64, Path, description = "Syllabus item id, or a phase id for phases without items")
    ),
    request_body(content = ConfirmRequest, description = "May be omitted"),
    responses(
        (status = 200, description = "Updated item and phase", body = ConfirmationOutcome),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not assigned to the course"),
        (status = 404, description = "No such item, phase or enrollment")
    )
)]
pub async fn confirm(
    State(state): State<AppState>,
    Authorized { user: tutor, .. }: TutorUser,
    ApiPath((course_id, student_id, id)): ApiPath<(i64, i64, i64)>,
    body: Bytes,
) -> ApiResult<ConfirmationOutcome> {
    confirm::check_tutor_access(&state.database, course_id, tutor.id, student_id, true).await?;
    let req: ConfirmRequest = optional_json(&body)?;
    let completed_at =
        confirm::validate_completed_at(req.completed_at, state.config.max_clock_skew_secs)?;
    ok(confirm::confirm_as_tutor(
        &state.database,
        tutor.id,
        course_id,
        student_id,
        id,
        completed_at,
    )
    .await?)
}

#[utoipa::path(
    post,
    path = "/api/tutor/courses/{course_id}/students/{student_id}/syllabus/{id}/revoke",
    params(
        ("course_id" = i64, Path, description = "Course id"),
        ("student_id" = i64, Path, description = "Student id"),
        ("id" = i64, Path, description = "Syllabus item id, or a phase id for phases without items")
    ),
    responses(
        (status = 200, description = "Updated item and phase", body = ConfirmationOutcome),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not assigned to the course"),
        (status = 404, description = "No such item, phase or enrollment")
    )
)]
pub async fn revoke(
    State(state): State<AppState>,
    Authorized { user: tutor, .. }: TutorUser,
    ApiPath((course_id, student_id, id)): ApiPath<(i64, i64, i64)>,
) -> ApiResult<ConfirmationOutcome> {
    ok(confirm::revoke_as_tutor(&state.database, tutor.id, course_id, student_id, id).await?)
}

pub fn get_tutor_scope() -> Router<AppState> {
    Router::new().nest(
        "/tutor",
        Router::new()
            .route("/courses", get(list_courses))
            .route("/courses/{course_id}/students", get(list_students))
            .route(
                "/courses/{course_id}/students/{student_id}/syllabus/progress",
                get(syllabus_progress),
            )
            .route(
                "/courses/{course_id}/students/{student_id}/syllabus/{id}/confirm",
                post(confirm),
            )
            .route(
                "/courses/{course_id}/students/{student_id}/syllabus/{id}/revoke",
                post(revoke),
            ),
    )
}
