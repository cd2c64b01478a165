//! Grievance change feed.
//!
//! A trigger on `grievances` publishes `{eventType, id}` notifications on the
//! `grievance_changes` channel. The listener resolves each notification to the current
//! row, patches the cached grievance list and fans the event out to subscribers.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{PgPool, postgres::PgListener};
use tokio::{sync::broadcast, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheKey, ViewCache},
    gateway::{GatewayError, RecordId, RowStore},
    moderation::grievances::GRIEVANCES_TABLE,
};

pub const GRIEVANCE_CHANNEL: &str = "grievance_changes";
const FEED_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "eventType", rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert { new: Value },
    Update { new: Value },
    Delete { old: Value },
}

impl ChangeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "INSERT",
            ChangeEvent::Update { .. } => "UPDATE",
            ChangeEvent::Delete { .. } => "DELETE",
        }
    }

    pub fn row_id(&self) -> Option<RecordId> {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new } => RecordId::of_row(new),
            ChangeEvent::Delete { old } => RecordId::of_row(old),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "eventType")]
    kind: ChangeKind,
    id: RecordId,
}

/// Keep a newest-first list in step with one change event.
pub fn apply_change(rows: &mut Vec<Value>, event: &ChangeEvent) {
    let Some(id) = event.row_id() else {
        return;
    };
    match event {
        ChangeEvent::Insert { new } => {
            rows.retain(|row| !id.matches(row));
            rows.insert(0, new.clone());
        }
        ChangeEvent::Update { new } => {
            if let Some(row) = rows.iter_mut().find(|row| id.matches(row)) {
                *row = new.clone();
            }
        }
        ChangeEvent::Delete { .. } => rows.retain(|row| !id.matches(row)),
    }
}

/// In-process fan-out of change events to SSE subscribers.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers reached; zero is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a raw notification payload into a change event carrying the current row.
async fn resolve(payload: &str, rows: &dyn RowStore) -> Result<Option<ChangeEvent>, GatewayError> {
    let notification: Notification = serde_json::from_str(payload)?;
    let event = match notification.kind {
        ChangeKind::Delete => ChangeEvent::Delete {
            old: json!({ "id": notification.id }),
        },
        kind => match rows.select_one(GRIEVANCES_TABLE, &notification.id).await {
            Ok(new) if kind == ChangeKind::Insert => ChangeEvent::Insert { new },
            Ok(new) => ChangeEvent::Update { new },
            // Deleted again before we could read it; a DELETE notification follows.
            Err(GatewayError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        },
    };
    Ok(Some(event))
}

async fn dispatch(event: ChangeEvent, cache: &ViewCache, feed: &ChangeFeed) {
    cache
        .patch(CacheKey::Grievances, |rows| {
            if let Value::Array(rows) = rows {
                apply_change(rows, &event);
            }
        })
        .await;
    if !matches!(event, ChangeEvent::Update { .. }) {
        cache.invalidate(&[CacheKey::Dashboard]).await;
    }
    let reached = feed.publish(event);
    debug!(reached, "grievance change dispatched");
}

/// Drop grievance views cached while no listener was patching them.
async fn resync(cache: &ViewCache) {
    cache
        .invalidate(&[CacheKey::Grievances, CacheKey::Dashboard])
        .await;
}

pub fn spawn_listener(pool: PgPool, rows: Arc<dyn RowStore>, cache: ViewCache, feed: ChangeFeed) {
    tokio::spawn(async move {
        loop {
            if let Err(err) = listen(&pool, rows.as_ref(), &cache, &feed).await {
                error!(?err, "grievance change listener stopped; reconnecting");
            }
            sleep(RECONNECT_DELAY).await;
        }
    });
}

async fn listen(
    pool: &PgPool,
    rows: &dyn RowStore,
    cache: &ViewCache,
    feed: &ChangeFeed,
) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(GRIEVANCE_CHANNEL).await?;
    resync(cache).await;
    info!(channel = GRIEVANCE_CHANNEL, "listening for grievance changes");

    loop {
        let notification = listener.recv().await?;
        match resolve(notification.payload(), rows).await {
            Ok(Some(event)) => dispatch(event, cache, feed).await,
            Ok(None) => {}
            Err(err) => {
                warn!(?err, payload = notification.payload(), "ignoring grievance notification");
            }
        }
    }
}
