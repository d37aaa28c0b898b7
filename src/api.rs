pub mod admin;
pub mod public;
pub mod student;
pub mod tutor;
pub mod user;

use std::marker::PhantomData;

use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::request::Parts,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tower_sessions::Session;
use utoipa::OpenApi;

use crate::{
    account::Role,
    error::{Error, Result},
    server::AppState,
};

/// Success envelope; failures are rendered by [`Error`]
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        data,
    }))
}

/// `Json` whose rejection is reported in the error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(Error))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Error))]
pub struct ApiQuery<T>(pub T);

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

/// Decode a JSON body that may be left out entirely; an empty body yields the default
pub fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| Error::Validation(format!("invalid JSON body: {e}")))
}

pub const SESSION_USER_KEY: &str = "user";

/// What a login stores in the session
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub role: Role,
}

pub async fn current_user(session: &Session) -> Result<SessionUser> {
    session
        .get::<SessionUser>(SESSION_USER_KEY)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load session: {}", e))?
        .ok_or(Error::Unauthorized)
}

pub async fn require_role(session: &Session, role: Role) -> Result<SessionUser> {
    let user = current_user(session).await?;
    if user.role != role {
        return Err(Error::Forbidden(format!("{role} role required")));
    }
    Ok(user)
}

pub trait RequiredRole {
    const ROLE: Role;
}

pub struct StudentRole;
pub struct TutorRole;
pub struct AdminRole;

impl RequiredRole for StudentRole {
    const ROLE: Role = Role::Student;
}

impl RequiredRole for TutorRole {
    const ROLE: Role = Role::Tutor;
}

impl RequiredRole for AdminRole {
    const ROLE: Role = Role::Admin;
}

/// Logged in user holding role `R`, rejected before any request body is read
pub struct Authorized<R> {
    pub user: SessionUser,
    role: PhantomData<R>,
}

pub type StudentUser = Authorized<StudentRole>;
pub type TutorUser = Authorized<TutorRole>;
pub type AdminUser = Authorized<AdminRole>;

impl<S, R> FromRequestParts<S> for Authorized<R>
where
    S: Send + Sync,
    R: RequiredRole,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| anyhow::anyhow!("session layer missing: {}", msg))?;
        let user = require_role(&session, R::ROLE).await?;
        Ok(Self {
            user,
            role: PhantomData,
        })
    }
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(user::get_user_scope())
        .merge(public::get_public_scope())
        .merge(student::get_student_scope())
        .merge(tutor::get_tutor_scope())
        .merge(admin::get_admin_scope())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        user::login,
        user::logout,
        user::me,
        public::list_courses,
        student::list_courses,
        student::syllabus_progress,
        student::confirm,
        student::list_payments,
        tutor::list_courses,
        tutor::list_students,
        tutor::syllabus_progress,
        tutor::confirm,
        tutor::revoke,
        admin::create_account,
        admin::list_accounts,
        admin::create_course,
        admin::create_phase,
        admin::create_item,
        admin::enroll_student,
        admin::list_enrollments,
        admin::set_enrollment_status,
        admin::assign_tutor,
        admin::record_payment,
        admin::list_payments,
        admin::update_payment_status,
    ),
    info(title = "LMS server", description = "Courses, enrollments, syllabus progress and payments")
)]
pub struct ApiDoc;
