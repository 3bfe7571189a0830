//! `GET /api/content/:id`: content records produced by finished jobs.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::jobs::content::ContentRecord;

pub async fn read(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<ContentRecord>, ApiError> {
    let core = ctx.core.clone();
    let record = tokio::task::spawn_blocking(move || core.contents().read_content(&id)).await??;
    Ok(Json(record))
}
