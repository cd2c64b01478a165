use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use axum_extra::extract::cookie::CookieJar;
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{debug, warn};

use crate::{
    feed::ChangeEvent,
    web::{AppState, auth::authorize, responses::ApiResult},
};

/// Live grievance changes. Each SSE event is named after its `eventType`; a `lagged`
/// event tells the client to reload the list because some changes were dropped.
pub async fn grievance_stream(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    authorize(&state, &jar)?;
    debug!("grievance stream subscriber connected");

    let connected = tokio_stream::once(Event::default().event("connected").data("ok"));
    let changes = BroadcastStream::new(state.feed().subscribe()).filter_map(|result| match result {
        Ok(change) => change_event(&change),
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!(missed, "grievance stream subscriber lagged");
            Event::default()
                .event("lagged")
                .json_data(serde_json::json!({ "missed": missed }))
                .ok()
        }
    });

    let events = connected.chain(changes).map(Ok::<_, Infallible>);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn change_event(change: &ChangeEvent) -> Option<Event> {
    Event::default()
        .event(change.event_type())
        .json_data(change)
        .ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::gateway::memory::{MemoryObjectStore, MemoryRowStore};

    fn state() -> AppState {
        AppState::with_stores(
            Arc::new(MemoryRowStore::new()),
            Arc::new(MemoryObjectStore::new()),
        )
    }

    #[tokio::test]
    async fn stream_requires_a_session() {
        let err = grievance_stream(State(state()), CookieJar::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn connected_stream_subscribes_to_the_feed() {
        let state = state();
        let jar = state.admin_cookie();
        let _sse = grievance_stream(State(state.clone()), jar).await.ok().unwrap();
        let reached = state.feed().publish(ChangeEvent::Delete { old: json!({"id": 1}) });
        assert_eq!(reached, 1);
    }

    #[test]
    fn change_events_serialize() {
        let change = ChangeEvent::Update {
            new: json!({"id": 3, "status": "resolved"}),
        };
        assert_eq!(change.event_type(), "UPDATE");
        assert!(change_event(&change).is_some());
    }
}
