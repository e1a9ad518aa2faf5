//! Event delivery to the managed side
//!
//! Native code never calls into the host directly. Log events go through a
//! bounded channel that is filled with `try_send`, so the logging thread never
//! blocks; engine messages carry their own reply channel. At most one
//! subscriber exists per event kind and subscribing again replaces it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use crate::logging::LogLevel;
use crate::{read_lock, write_lock};

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub target: String,
    pub content: String,
}

/// A request from native code that expects a textual reply.
#[derive(Debug)]
pub struct Message {
    id: u64,
    body: String,
    reply: Sender<String>,
    waiting: Weak<()>,
}

impl Message {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// True once the asker gave up, so a reply can no longer arrive.
    pub fn is_abandoned(&self) -> bool {
        self.waiting.strong_count() == 0
    }

    /// Returns false if the asker stopped waiting.
    pub fn reply<S: Into<String>>(self, text: S) -> bool {
        self.reply.send(text.into()).is_ok()
    }
}

static LOG_SINK: RwLock<Option<SyncSender<LogEvent>>> = RwLock::new(None);
static MESSAGE_SINK: RwLock<Option<Sender<Message>>> = RwLock::new(None);
static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

pub fn subscribe_logs(capacity: usize) -> Receiver<LogEvent> {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    *write_lock!(LOG_SINK) = Some(tx);
    rx
}

pub fn unsubscribe_logs() {
    write_lock!(LOG_SINK).take();
}

pub fn has_log_subscriber() -> bool {
    read_lock!(LOG_SINK).is_some()
}

/// Hands the event to the subscriber. Returns false when nobody is
/// listening; a full queue drops the event but still counts as delivered.
pub(crate) fn emit_log(event: LogEvent) -> bool {
    let sink = read_lock!(LOG_SINK);
    match sink.as_ref() {
        Some(tx) => match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        },
        None => false,
    }
}

pub fn subscribe_messages() -> Receiver<Message> {
    let (tx, rx) = mpsc::channel();
    *write_lock!(MESSAGE_SINK) = Some(tx);
    rx
}

pub fn unsubscribe_messages() {
    write_lock!(MESSAGE_SINK).take();
}

/// Posts `body`; the message stays live while the returned token is held.
fn post(body: &str) -> Option<(Receiver<String>, Arc<()>)> {
    let (reply, answer) = mpsc::channel();
    let waiting = Arc::new(());
    let message = Message {
        id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
        body: body.to_string(),
        reply,
        waiting: Arc::downgrade(&waiting),
    };
    let sink = read_lock!(MESSAGE_SINK);
    sink.as_ref()?.send(message).ok()?;
    Some((answer, waiting))
}

/// Sends `body` to the message subscriber and blocks for its reply.
///
/// Must not be called from the thread that drains the subscription.
pub fn ask(body: &str) -> Option<String> {
    let (answer, _waiting) = post(body)?;
    answer.recv().ok()
}

pub fn ask_timeout(body: &str, timeout: Duration) -> Option<String> {
    let (answer, _waiting) = post(body)?;
    answer.recv_timeout(timeout).ok()
}
