//! Worker → observer event channel and observer → worker control queues.
//!
//! Both directions are unbounded tokio mpsc channels: sending never awaits,
//! so neither side can stall the other. Each worker holds the only sender
//! tagged with its login, which keeps its events in emission order.

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{AccountEvent, Command, WorkerEvent, WorkerStatus};

/// Create the shared event channel. Hand out per-account senders with
/// [`EventSink::for_account`]; the observer owns the [`EventStream`].
pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx })
}

/// Create one account's control queue.
pub fn control_channel() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandQueue { rx })
}

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AccountEvent>,
}

impl EventSink {
    pub fn for_account(&self, login: impl Into<String>) -> EventSender {
        EventSender {
            login: login.into(),
            tx: self.tx.clone(),
        }
    }
}

/// Producer half bound to a single account.
#[derive(Debug)]
pub struct EventSender {
    login: String,
    tx: mpsc::UnboundedSender<AccountEvent>,
}

impl EventSender {
    /// Publish an event. Returns `false` once the observer has gone away;
    /// the worker carries on regardless.
    pub fn emit(&self, event: WorkerEvent) -> bool {
        let sent = self
            .tx
            .send(AccountEvent {
                login: self.login.clone(),
                event,
            })
            .is_ok();
        if !sent {
            debug!("[{}] Observer gone, event dropped", self.login);
        }
        sent
    }

    pub fn status(&self, status: WorkerStatus, note: Option<&str>) -> bool {
        self.emit(WorkerEvent::Status {
            status,
            note: note.map(str::to_string),
        })
    }

    pub fn error(&self, msg: impl Into<String>) -> bool {
        self.emit(WorkerEvent::Error { msg: msg.into() })
    }
}

/// Observer half.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<AccountEvent>,
}

impl EventStream {
    /// Next event; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<AccountEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AccountEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued, without waiting.
    pub fn drain(&mut self) -> Vec<AccountEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Queue a command. Returns `false` if the worker has already exited.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// Worker half of the control queue.
#[derive(Debug)]
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandQueue {
    /// Pending commands in arrival order. Never waits.
    pub fn drain(&mut self) -> Vec<Command> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }
}
