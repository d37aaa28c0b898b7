use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use super::{AdminUser, ApiJson, ApiPath, ApiQuery, ApiResult, ok};
use crate::{
    account::{self, AccountInfo, Role},
    course::{self, Course, Enrollment, EnrollmentDetail, EnrollmentFilter, EnrollmentStatus},
    payment::{self, EnrollmentPaymentStatus, Payment, PaymentStatus},
    server::AppState,
    syllabus::{self, SyllabusItem, SyllabusPhase},
};

#[derive(Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AccountQuery {
    /// Only list accounts with this role
    pub role: Option<Role>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fee_cents: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct CreatePhaseRequest {
    pub name: String,
    /// Appended after the last phase if omitted
    pub position: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateItemRequest {
    pub title: String,
    pub description: Option<String>,
    /// Appended after the last item of the phase if omitted
    pub position: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub student_id: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct EnrollmentStatusRequest {
    pub status: EnrollmentStatus,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignTutorRequest {
    pub tutor_id: i64,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
    pub amount_cents: i64,
    pub status: PaymentStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
}

#[derive(Deserialize, ToSchema)]
pub struct PaymentStatusRequest {
    pub status: PaymentStatus,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub enrollment_payment_status: EnrollmentPaymentStatus,
}

impl From<(Payment, EnrollmentPaymentStatus)> for PaymentOutcome {
    fn from((payment, enrollment_payment_status): (Payment, EnrollmentPaymentStatus)) -> Self {
        Self {
            payment,
            enrollment_payment_status,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/admin/accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 200, description = "The created account", body = AccountInfo),
        (status = 400, description = "Invalid account data"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(req): ApiJson<CreateAccountRequest>,
) -> ApiResult<AccountInfo> {
    let CreateAccountRequest {
        name,
        email,
        password,
        role,
    } = req;
    let id = account::create_account(&state.database, name, email, password, role).await?;
    ok(account::get_account(&state.database, id).await?)
}

#[utoipa::path(
    get,
    path = "/api/admin/accounts",
    params(AccountQuery),
    responses(
        (status = 200, description = "Accounts ordered by id", body = Vec<AccountInfo>)
    )
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<AccountQuery>,
) -> ApiResult<Vec<AccountInfo>> {
    ok(account::list_accounts(&state.database, query.role).await?)
}

#[utoipa::path(
    post,
    path = "/api/admin/courses",
    request_body = CreateCourseRequest,
    responses(
        (status = 200, description = "The created course", body = Course),
        (status = 400, description = "Invalid course data")
    )
)]
pub async fn create_course(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(req): ApiJson<CreateCourseRequest>,
) -> ApiResult<Course> {
    ok(course::create_course(&state.database, req.title, req.description, req.fee_cents).await?)
}

#[utoipa::path(
    post,
    path = "/api/admin/courses/{course_id}/phases",
    params(("course_id" = i64, Path, description = "Course id")),
    request_body = CreatePhaseRequest,
    responses(
        (status = 200, description = "The created phase", body = SyllabusPhase),
        (status = 404, description = "No such course")
    )
)]
pub async fn create_phase(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(course_id): ApiPath<i64>,
    ApiJson(req): ApiJson<CreatePhaseRequest>,
) -> ApiResult<SyllabusPhase> {
    ok(syllabus::create_phase(&state.database, course_id, req.name, req.position).await?)
}

#[utoipa::path(
    post,
    path = "/api/admin/phases/{phase_id}/items",
    params(("phase_id" = i64, Path, description = "Phase id")),
    request_body = CreateItemRequest,
    responses(
        (status = 200, description = "The created item", body = SyllabusItem),
        (status = 404, description = "No such phase")
    )
)]
pub async fn create_item(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(phase_id): ApiPath<i64>,
    ApiJson(req): ApiJson<CreateItemRequest>,
) -> ApiResult<SyllabusItem> {
    let CreateItemRequest {
        title,
        description,
        position,
    } = req;
    ok(syllabus::create_item(&state.database, phase_id, title, description, position).await?)
}

#[utoipa::path(
    post,
    path = "/api/admin/courses/{course_id}/enrollments",
    params(("course_id" = i64, Path, description = "Course id")),
    request_body = EnrollRequest,
    responses(
        (status = 200, description = "The new enrollment", body = Enrollment),
        (status = 400, description = "Account is not a student"),
        (status = 404, description = "No such course or account"),
        (status = 409, description = "Already enrolled")
    )
)]
pub async fn enroll_student(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(course_id): ApiPath<i64>,
    ApiJson(req): ApiJson<EnrollRequest>,
) -> ApiResult<Enrollment> {
    ok(course::enroll_student(&state.database, course_id, req.student_id).await?)
}

#[utoipa::path(
    get,
    path = "/api/admin/enrollments",
    params(EnrollmentFilter),
    responses(
        (status = 200, description = "Matching enrollments", body = Vec<EnrollmentDetail>)
    )
)]
pub async fn list_enrollments(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(filter): ApiQuery<EnrollmentFilter>,
) -> ApiResult<Vec<EnrollmentDetail>> {
    ok(course::list_enrollments(&state.database, &filter).await?)
}

#[utoipa::path(
    post,
    path = "/api/admin/enrollments/{enrollment_id}/status",
    params(("enrollment_id" = i64, Path, description = "Enrollment id")),
    request_body = EnrollmentStatusRequest,
    responses(
        (status = 200, description = "The updated enrollment", body = Enrollment),
        (status = 404, description = "No such enrollment")
    )
)]
pub async fn set_enrollment_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(enrollment_id): ApiPath<i64>,
    ApiJson(req): ApiJson<EnrollmentStatusRequest>,
) -> ApiResult<Enrollment> {
    ok(course::set_enrollment_status(&state.database, enrollment_id, req.status).await?)
}

#[utoipa::path(
    post,
    path = "/api/admin/courses/{course_id}/tutors",
    params(("course_id" = i64, Path, description = "Course id")),
    request_body = AssignTutorRequest,
    responses(
        (status = 200, description = "Tutor assigned"),
        (status = 400, description = "Account is not a tutor"),
        (status = 409, description = "Already assigned")
    )
)]
pub async fn assign_tutor(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(course_id): ApiPath<i64>,
    ApiJson(req): ApiJson<AssignTutorRequest>,
) -> ApiResult<&'static str> {
    course::assign_tutor(&state.database, course_id, req.tutor_id).await?;
    ok("Tutor assigned")
}

#[utoipa::path(
    post,
    path = "/api/admin/enrollments/{enrollment_id}/payments",
    params(("enrollment_id" = i64, Path, description = "Enrollment id")),
    request_body = RecordPaymentRequest,
    responses(
        (status = 200, description = "The payment and the recomputed enrollment status", body = PaymentOutcome),
        (status = 400, description = "Invalid amount"),
        (status = 404, description = "No such enrollment")
    )
)]
pub async fn record_payment(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(enrollment_id): ApiPath<i64>,
    ApiJson(req): ApiJson<RecordPaymentRequest>,
) -> ApiResult<PaymentOutcome> {
    let outcome = payment::record_payment(
        &state.database,
        enrollment_id,
        req.amount_cents,
        req.status,
        req.paid_at,
    )
    .await?;
    ok(outcome.into())
}

#[utoipa::path(
    get,
    path = "/api/admin/enrollments/{enrollment_id}/payments",
    params(("enrollment_id" = i64, Path, description = "Enrollment id")),
    responses(
        (status = 200, description = "Payments of the enrollment", body = Vec<Payment>),
        (status = 404, description = "No such enrollment")
    )
)]
pub async fn list_payments(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(enrollment_id): ApiPath<i64>,
) -> ApiResult<Vec<Payment>> {
    course::get_enrollment(&state.database, enrollment_id).await?;
    ok(payment::list_payments(&state.database, enrollment_id).await?)
}

#[utoipa::path(
    post,
    path = "/api/admin/payments/{payment_id}/status",
    params(("payment_id" = i64, Path, description = "Payment id")),
    request_body = PaymentStatusRequest,
    responses(
        (status = 200, description = "The payment and the recomputed enrollment status", body = PaymentOutcome),
        (status = 404, description = "No such payment")
    )
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(payment_id): ApiPath<i64>,
    ApiJson(req): ApiJson<PaymentStatusRequest>,
) -> ApiResult<PaymentOutcome> {
    let outcome = payment::update_payment_status(&state.database, payment_id, req.status).await?;
    ok(outcome.into())
}

pub fn get_admin_scope() -> Router<AppState> {
    Router::new().nest(
        "/admin",
        Router::new()
            .route("/accounts", get(list_accounts).post(create_account))
            .route("/courses", post(create_course))
            .route("/courses/{course_id}/phases", post(create_phase))
            .route("/courses/{course_id}/enrollments", post(enroll_student))
            .route("/courses/{course_id}/tutors", post(assign_tutor))
            .route("/phases/{phase_id}/items", post(create_item))
            .route("/enrollments", get(list_enrollments))
            .route("/enrollments/{enrollment_id}/status", post(set_enrollment_status))
            .route(
                "/enrollments/{enrollment_id}/payments",
                get(list_payments).post(record_payment),
            )
            .route("/payments/{payment_id}/status", post(update_payment_status)),
    )
}
