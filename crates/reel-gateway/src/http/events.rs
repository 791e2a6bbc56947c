use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures_util::Stream;
use reel_jobs::{JobError, StatusUpdate};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

use super::error::ApiError;
use crate::app::AppState;

#[derive(Serialize)]
struct JobUpdateEvent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    update: &'a StatusUpdate,
}

/// One SSE frame, or `None` (logged) if the payload does not serialize.
fn data(payload: impl Serialize) -> Option<Event> {
    match serde_json::to_string(&payload) {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            error!("failed to serialize event payload: {e}");
            None
        }
    }
}

/// GET /jobs/events: live job updates as server-sent events.
///
/// Emits `connected` first, then one `job_update` per status change, and a
/// `ping` after `keepalive_secs` of silence. The stream ends when the client
/// goes away (dropping the subscription) or the manager stops.
pub async fn job_events(
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if state.manager.is_stopped() {
        return Err(JobError::Stopped.into());
    }
    let mut subscription = state.manager.subscribe();
    let keepalive = Duration::from_secs(state.manager.config().keepalive_secs);
    debug!(subscriber = subscription.id(), "event stream opened");

    let stream = async_stream::stream! {
        if let Some(event) = data(json!({"type": "connected"})) {
            yield Ok(event);
        }
        loop {
            let frame = match tokio::time::timeout(keepalive, subscription.recv()).await {
                Ok(Some(update)) => data(JobUpdateEvent { kind: "job_update", update: &update }),
                Ok(None) => break,
                Err(_) => data(json!({"type": "ping"})),
            };
            if let Some(event) = frame {
                yield Ok(event);
            }
        }
        debug!(subscriber = subscription.id(), "event stream closed");
    };

    Ok(Sse::new(stream))
}
