use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::{message, JsonBody};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::ops::tasks::{self, CommentInput, SubtaskInput, TaskInput, TaskQuery};
use crate::server::AppState;

const TASKS: &str = "/teams/{team_id}/projects/{project_id}/tasks";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(TASKS, get(list_tasks).post(create_task))
        .route(
            &format!("{TASKS}/{{task_id}}"),
            get(task_detail).put(update_task).patch(update_task).delete(delete_task),
        )
        .route(
            &format!("{TASKS}/{{task_id}}/subtasks"),
            get(list_subtasks).post(create_subtask),
        )
        .route(
            &format!("{TASKS}/{{task_id}}/subtasks/{{subtask_id}}"),
            get(subtask_detail)
                .put(update_subtask)
                .patch(update_subtask)
                .delete(delete_subtask),
        )
        .route(
            &format!("{TASKS}/{{task_id}}/comments"),
            get(list_comments).post(add_comment),
        )
}

async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let tasks = state
        .db
        .call(move |conn| tasks::list_tasks(conn, &user_id, &team_id, &project_id, &query))
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
    JsonBody(input): JsonBody<TaskInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let task = state
        .db
        .call(move |conn| tasks::create_task(conn, &user_id, &team_id, &project_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn task_detail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let task = state
        .db
        .call(move |conn| tasks::task_detail(conn, &user_id, &team_id, &project_id, &task_id))
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id)): Path<(String, String, String)>,
    JsonBody(input): JsonBody<TaskInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let task = state
        .db
        .call(move |conn| tasks::update_task(conn, &user_id, &team_id, &project_id, &task_id, input))
        .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| tasks::delete_task(conn, &user_id, &team_id, &project_id, &task_id))
        .await?;
    Ok(message("Task deleted successfully"))
}

async fn list_subtasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let subtasks = state
        .db
        .call(move |conn| tasks::list_subtasks(conn, &user_id, &team_id, &project_id, &task_id))
        .await?;
    Ok(Json(subtasks))
}

async fn create_subtask(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id)): Path<(String, String, String)>,
    JsonBody(input): JsonBody<SubtaskInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let subtask = state
        .db
        .call(move |conn| {
            tasks::create_subtask(conn, &user_id, &team_id, &project_id, &task_id, input)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(subtask)))
}

async fn subtask_detail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id, subtask_id)): Path<(String, String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let subtask = state
        .db
        .call(move |conn| {
            tasks::subtask_detail(conn, &user_id, &team_id, &project_id, &task_id, &subtask_id)
        })
        .await?;
    Ok(Json(subtask))
}

async fn update_subtask(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id, subtask_id)): Path<(String, String, String, String)>,
    JsonBody(input): JsonBody<SubtaskInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let subtask = state
        .db
        .call(move |conn| {
            tasks::update_subtask(conn, &user_id, &team_id, &project_id, &task_id, &subtask_id, input)
        })
        .await?;
    Ok(Json(subtask))
}

async fn delete_subtask(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id, subtask_id)): Path<(String, String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| {
            tasks::delete_subtask(conn, &user_id, &team_id, &project_id, &task_id, &subtask_id)
        })
        .await?;
    Ok(message("Subtask deleted successfully"))
}

async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let comments = state
        .db
        .call(move |conn| tasks::list_comments(conn, &user_id, &team_id, &project_id, &task_id))
        .await?;
    Ok(Json(comments))
}

async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, task_id)): Path<(String, String, String)>,
    JsonBody(input): JsonBody<CommentInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let comment = state
        .db
        .call(move |conn| tasks::add_comment(conn, &user_id, &team_id, &project_id, &task_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
