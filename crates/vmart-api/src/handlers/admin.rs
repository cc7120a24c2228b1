//! Admin inspection handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use vmart_queue::DeadLetter;

use crate::state::AppState;

/// Dead-letter list response.
#[derive(Serialize)]
pub struct DeadLettersResponse {
    pub count: usize,
    pub entries: Vec<DeadLetter>,
}

/// List tasks that exhausted their flush retries.
pub async fn list_dead_letters(State(state): State<AppState>) -> Json<DeadLettersResponse> {
    let entries = state.dead_letters.snapshot().await;
    Json(DeadLettersResponse {
        count: entries.len(),
        entries,
    })
}
