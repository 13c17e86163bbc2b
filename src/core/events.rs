// src/core/events.rs

//! The event bus: an append-only event log plus publish-only notification
//! channels ("state", "log"), in the spirit of the teacher's `EventBus`
//! (one-to-many `broadcast` channel fanning out every committed write).
//! Publication is best-effort: a dropped or absent subscriber never aborts
//! the transaction that produced the event. The row appended to the event
//! log is the source of truth; channel subscribers must re-read the
//! catalog to recover state if they miss a message.

use super::model::{ReplicationState, SyncState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

const STATE_CHANNEL_CAPACITY: usize = 4096;
const LOG_CHANNEL_CAPACITY: usize = 4096;

/// A JSON record published on the "state" channel whenever a node's goal
/// state is (re)assigned, matching the shape `NotifyStateChange` builds in
/// the original monitor.
#[derive(Debug, Clone, Serialize)]
pub struct StateChangeEvent {
    pub event_id: i64,
    pub node_id: i64,
    pub node_name: String,
    pub port: u16,
    pub formation_id: String,
    pub group_id: i32,
    pub reported_state: ReplicationState,
    pub goal_state: ReplicationState,
    pub sync_state: SyncState,
    pub reported_lsn: u64,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
    pub description: String,
    pub time: DateTime<Utc>,
}

/// A plain formatted-message record published on the "log" channel.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub message: String,
    pub time: DateTime<Utc>,
}

/// The append-only event log plus the two publish channels. Cheaply
/// cloneable; all clones share the same subscriber set and counter.
#[derive(Debug, Clone)]
pub struct Notifier {
    state_tx: broadcast::Sender<StateChangeEvent>,
    log_tx: broadcast::Sender<LogEvent>,
    next_event_id: std::sync::Arc<AtomicI64>,
    events: std::sync::Arc<parking_lot::Mutex<Vec<StateChangeEvent>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            state_tx,
            log_tx,
            next_event_id: std::sync::Arc::new(AtomicI64::new(1)),
            events: std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Formats a message once, writes it to the monitor's log, and
    /// publishes it on channel "log". Returns the formatted string so the
    /// caller can reuse it as an event description, exactly as
    /// `LogAndNotifyMessage` does in the original monitor.
    pub fn log_and_notify(&self, message: String) -> String {
        info!(target: "pgwarden::fsm", "{message}");
        let event = LogEvent {
            message: message.clone(),
            time: Utc::now(),
        };
        if self.log_tx.send(event).is_err() {
            debug!("published a log event with no active subscribers");
        }
        message
    }

    /// Inserts an append-only event row and publishes it on channel
    /// "state". Failure to publish never aborts the caller's transaction;
    /// the appended row is authoritative.
    #[allow(clippy::too_many_arguments)]
    pub fn notify_state_change(
        &self,
        node_id: i64,
        node_name: &str,
        port: u16,
        formation_id: &str,
        group_id: i32,
        reported_state: ReplicationState,
        goal_state: ReplicationState,
        sync_state: SyncState,
        reported_lsn: u64,
        candidate_priority: u8,
        replication_quorum: bool,
        description: String,
    ) -> i64 {
        let event_id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = StateChangeEvent {
            event_id,
            node_id,
            node_name: node_name.to_string(),
            port,
            formation_id: formation_id.to_string(),
            group_id,
            reported_state,
            goal_state,
            sync_state,
            reported_lsn,
            candidate_priority,
            replication_quorum,
            description,
            time: Utc::now(),
        };

        self.events.lock().push(event.clone());

        if self.state_tx.send(event).is_err() {
            debug!("published a state-change event with no active subscribers");
        }

        event_id
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEvent> {
        self.log_tx.subscribe()
    }

    /// Returns the full append-only event history. Intended for the
    /// `event` table's read path; the monitor never mutates past entries.
    pub fn events(&self) -> Vec<StateChangeEvent> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let notifier = Notifier::new();
        notifier.log_and_notify("hello".to_string());
        let id = notifier.notify_state_change(
            1,
            "node1",
            5432,
            "default",
            0,
            ReplicationState::Init,
            ReplicationState::Single,
            SyncState::Unknown,
            0,
            100,
            true,
            "test".to_string(),
        );
        assert_eq!(id, 1);
        assert_eq!(notifier.events().len(), 1);
    }

    #[test]
    fn subscriber_receives_published_event() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe_state();
        notifier.notify_state_change(
            7,
            "node7",
            5433,
            "f",
            1,
            ReplicationState::CatchingUp,
            ReplicationState::Secondary,
            SyncState::Sync,
            42,
            50,
            true,
            "caught up".to_string(),
        );
        let received = rx.try_recv().expect("event should be buffered");
        assert_eq!(received.node_id, 7);
        assert_eq!(received.goal_state, ReplicationState::Secondary);
    }
}
