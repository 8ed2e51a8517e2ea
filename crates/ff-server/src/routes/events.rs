//! Server-Sent Events stream of queue and admission events.
//!
//! Replays recent events for late joiners, then forwards live events.
//! `?job_id=` narrows the stream to one job, which lets a UI follow its
//! place in line without polling.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;

use ff_core::events::Event as AppEvent;

use crate::context::AppContext;

/// Events replayed on connect.
const REPLAY_EVENTS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub job_id: Option<String>,
}

/// GET /api/events
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let job_filter = params.job_id;

    let recent = ctx.event_bus.recent_events(REPLAY_EVENTS);
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if let Some(sse) = to_sse(&event, job_filter.as_deref()) {
                yield Ok(sse);
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(sse) = to_sse(&event, job_filter.as_deref()) {
                        yield Ok(sse);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("SSE client lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn to_sse(event: &AppEvent, job_filter: Option<&str>) -> Option<Event> {
    if let Some(wanted) = job_filter {
        if event.payload.job_id().map(|id| id.as_str()) != Some(wanted) {
            return None;
        }
    }
    let data = serde_json::to_string(event).ok()?;
    Some(Event::default().id(event.id.to_string()).data(data))
}
