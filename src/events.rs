//! Lifecycle event hook
//!
//! The server reports session transitions to a single optional callback so
//! the embedding application can move completed files, clean up cancelled
//! sessions, or record activity. The hook runs synchronously on the request
//! task, after the response has been composed and before it is flushed; the
//! core never deletes session data itself.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::session::SessionId;

/// Session lifecycle transitions reported to the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitsEvent {
    /// A session directory was created.
    CreateSession,
    /// An upload file reached its full length. Path points at the file.
    ReceiveFile,
    /// The client cancelled the session. Path points at the directory.
    CancelSession,
    /// The client closed the session. Path points at the directory.
    CloseSession,
}

impl fmt::Display for BitsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateSession => "create-session",
            Self::ReceiveFile => "receive-file",
            Self::CancelSession => "cancel-session",
            Self::CloseSession => "close-session",
        })
    }
}

/// User-supplied lifecycle callback.
pub type EventHook = Arc<dyn Fn(BitsEvent, &SessionId, &Path) + Send + Sync>;

/// Dispatches lifecycle events to the optional hook.
#[derive(Clone, Default)]
pub struct EventSink {
    hook: Option<EventHook>,
}

impl EventSink {
    pub fn new(hook: EventHook) -> Self {
        Self { hook: Some(hook) }
    }

    /// A sink that drops all events.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: BitsEvent, id: &SessionId, path: &Path) {
        tracing::debug!(session_id = %id, path = %path.display(), %event, "session event");
        if let Some(hook) = &self.hook {
            hook(event, id, path);
        }
    }
}
