use axum::{Router, extract::State, routing::get};

use super::{ApiResult, ok};
use crate::{
    course::{self, Course},
    server::AppState,
};

#[utoipa::path(
    get,
    path = "/api/public/courses",
    responses(
        (status = 200, description = "Course catalog", body = Vec<Course>)
    )
)]
pub async fn list_courses(State(state): State<AppState>) -> ApiResult<Vec<Course>> {
    ok(course::list_courses(&state.database).await?)
}

pub fn get_public_scope() -> Router<AppState> {
    Router::new().nest("/public", Router::new().route("/courses", get(list_courses)))
}
