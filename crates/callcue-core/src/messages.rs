use std::collections::HashSet;

use uuid::Uuid;

/// One-shot, dismissable notification delivered to the hosting shell
/// (toast/snackbar material).
///
/// Each instance carries a fresh identity so the shell can track the
/// dismissal of individual notifications. Equality compares the payload
/// only, never the identity, so duplicates can be collapsed.
#[derive(Debug, Clone)]
pub struct UserMessage {
    id: Uuid,
    kind: UserMessageKind,
}

impl UserMessage {
    pub fn new(kind: UserMessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &UserMessageKind {
        &self.kind
    }
}

impl PartialEq for UserMessage {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

/// Payload of a [`UserMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserMessageKind {
    RecordingStarted,
    RecordingStopped,
    /// The local participant was muted, optionally by a named actor.
    Muted { by: Option<String> },
    UsbCameraConnected { name: String },
    UsbCameraDisconnected,
    AudioConnectionFailure,
}

/// Persistent condition flag, shown as a banner while its condition holds
/// (set semantics: presence/absence, not multiplicity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertMessage {
    LeftAlone,
    WaitingForOtherParticipants,
    AutomaticRecordingArmed,
}

/// The currently active alerts, published as a full-set snapshot on every
/// membership change.
pub type AlertSet = HashSet<AlertMessage>;
