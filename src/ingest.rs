//! Ingestion loop.
//!
//! Consumes connector events one at a time, normalizes and filters them, and
//! hands accepted records to a single writer worker so a slow SQLite write
//! never holds up the next event. The worker persists records in arrival
//! order and then pushes new messages to live subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeEvent, RawMessage};
use crate::display::{print_connected, MessageDisplay};
use crate::extractor::{normalize, should_accept, Filters};
use crate::storage::{MessageRecord, MessageStore, StoredMessage};

/// Whether the ingestor is currently consuming events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Listening,
}

/// Why [`Ingestor::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// [`StopHandle::stop`] was called
    Requested,
    /// The connector closed its event stream
    ConnectorClosed,
    /// The connector lost its session
    LoggedOut(String),
}

/// Cloneable handle used to stop a running ingestor
#[derive(Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct WriteJob {
    record: MessageRecord,
    fan_out: bool,
}

pub struct Ingestor {
    store: MessageStore,
    filters: Filters,
    live_tx: broadcast::Sender<StoredMessage>,
    console: Option<MessageDisplay>,
    stop: StopHandle,
    state: IngestState,
}

impl Ingestor {
    pub fn new(
        store: MessageStore,
        filters: Filters,
        live_tx: broadcast::Sender<StoredMessage>,
    ) -> Self {
        Self {
            store,
            filters,
            live_tx,
            console: None,
            stop: StopHandle::default(),
            state: IngestState::Idle,
        }
    }

    /// Print every accepted message to the console
    pub fn with_console(mut self, display: MessageDisplay) -> Self {
        self.console = Some(display);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Process events until stopped, the stream ends, or the session is
    /// lost. Queued writes are flushed before this returns.
    pub async fn run(&mut self, mut events: mpsc::Receiver<BridgeEvent>) -> StopReason {
        self.state = IngestState::Listening;
        info!("Listening for messages...");

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_worker(
            self.store.clone(),
            self.live_tx.clone(),
            write_rx,
        ));

        let reason = loop {
            if self.stop.is_stopped() {
                break StopReason::Requested;
            }

            let event = tokio::select! {
                _ = self.stop.wake.notified() => continue,
                event = events.recv() => event,
            };

            match event {
                None => break StopReason::ConnectorClosed,
                Some(BridgeEvent::LoggedOut { reason }) => {
                    warn!("Logged out: {}", reason);
                    break StopReason::LoggedOut(reason);
                }
                Some(event) => self.handle_event(event, &write_tx),
            }
        };

        drop(write_tx);
        if let Err(e) = writer.await {
            error!("Writer worker failed: {}", e);
        }

        self.state = IngestState::Idle;
        info!("Stopped listening ({:?})", reason);
        reason
    }

    fn handle_event(&self, event: BridgeEvent, write_tx: &mpsc::UnboundedSender<WriteJob>) {
        match event {
            BridgeEvent::Connected { user_id, username } => {
                info!("Connected as {} ({:?})", user_id, username);
                if self.console.is_some() {
                    print_connected(user_id, username.as_deref());
                }
            }

            BridgeEvent::NewMessage(raw) => self.accept(&raw, false, write_tx),

            BridgeEvent::MessageEdited(raw) => self.accept(&raw, true, write_tx),

            BridgeEvent::Error { code, message } => {
                error!("Bridge error [{}]: {}", code, message);
            }

            BridgeEvent::Log { level, message } => match level.as_str() {
                "error" => error!("{}", message),
                "warn" => warn!("{}", message),
                "info" => info!("{}", message),
                _ => debug!("{}", message),
            },

            // Handled by the run loop
            BridgeEvent::LoggedOut { .. } => {}
        }
    }

    fn accept(&self, raw: &RawMessage, edited: bool, write_tx: &mpsc::UnboundedSender<WriteJob>) {
        let record = normalize(raw, edited);

        if !should_accept(&record, &self.filters) {
            info!(
                "Ignoring message {} from filtered chat {} / sender {:?}",
                record.message_id, record.chat_id, record.sender_id
            );
            return;
        }

        if let Some(display) = &self.console {
            println!("{}", display.format(&record));
        }

        let message_id = record.message_id;
        let job = WriteJob {
            record,
            fan_out: !edited,
        };
        if write_tx.send(job).is_err() {
            error!("Writer worker is gone, dropping message {}", message_id);
        }
    }
}

/// Persist jobs in arrival order; fan new messages out once stored
async fn write_worker(
    store: MessageStore,
    live_tx: broadcast::Sender<StoredMessage>,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
) {
    while let Some(WriteJob { record, fan_out }) = jobs.recv().await {
        let store = store.clone();
        let result = tokio::task::spawn_blocking(move || {
            let id = store.save(&record)?;
            if fan_out {
                store.get_by_id(id).map(Some)
            } else {
                Ok(None)
            }
        })
        .await;

        match result {
            Ok(Ok(Some(stored))) => {
                // No subscribers is fine
                let _ = live_tx.send(stored);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => error!("Failed to save message: {}", e),
            Err(e) => error!("Write task failed: {}", e),
        }
    }
}
