//! Job delivery endpoints.
//!
//! - `GET /api/jobs/:id`: pull mode, full record
//! - `GET /api/jobs/:id/stream`: push mode over server-sent events

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::jobs::delivery::{self, DeliveryFrame};
use crate::jobs::types::JobRecord;

const FRAME_BUFFER: usize = 64;

/// `GET /api/jobs/:id`
pub async fn poll(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let record = delivery::poll(&ctx.core, &id).await?;
    Ok(Json(record))
}

/// `GET /api/jobs/:id/stream`
///
/// Unknown jobs are rejected before the stream opens. Once open, each
/// frame is one `data:` event; the stream closes after the terminal frame.
pub async fn stream(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let core = ctx.core.clone();
    let lookup = id.clone();
    tokio::task::spawn_blocking(move || core.jobs().read(&lookup)).await??;

    let (tx, rx) = mpsc::channel::<DeliveryFrame>(FRAME_BUFFER);
    tokio::spawn(delivery::follow(ctx.core.clone(), id, tx));

    let events = stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok(to_event(&frame)), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_event(frame: &DeliveryFrame) -> Event {
    match Event::default().json_data(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(job_id = %frame.job_id, error = %e, "Frame encoding failed");
            Event::default().comment("frame encoding failed")
        }
    }
}
