//! Watch-progress read handlers.

use axum::extract::{Path, State};
use axum::Json;

use vmart_models::{ProgressRecord, UserId, VideoId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Get the stored progress for a (user, video) pair.
pub async fn get_progress(
    State(state): State<AppState>,
    Path((user_id, video_id)): Path<(String, String)>,
) -> ApiResult<Json<ProgressRecord>> {
    let user_id = UserId::from_string(user_id);
    let video_id = VideoId::from_string(video_id);

    if user_id.is_blank() || video_id.is_blank() {
        return Err(ApiError::bad_request("userId and videoId are required"));
    }

    match state.progress.get(&user_id, &video_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::not_found(format!(
            "No progress for video {} and user {}",
            video_id, user_id
        ))),
    }
}
