/// Lifecycle stage of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Dialing,
    Ringing,
    RingingRemotely,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Ended,
    Failed,
}

impl CallPhase {
    /// The call is winding down or over; no further activity follows.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallPhase::Disconnecting | CallPhase::Ended | CallPhase::Failed
        )
    }

    /// Call setup is still in progress; no media can flow yet.
    pub fn is_pre_connection(self) -> bool {
        matches!(
            self,
            CallPhase::Dialing | CallPhase::Ringing | CallPhase::RingingRemotely
        )
    }
}

/// How the call is configured to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingPolicy {
    /// Recording is not available on this call.
    #[default]
    Never,
    /// Recording starts automatically as soon as the call connects.
    OnConnect,
    /// Recording is started and stopped manually.
    OnDemand,
}

/// Recording configuration and activity of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingState {
    pub policy: RecordingPolicy,
    pub active: bool,
}

impl RecordingState {
    pub fn new(policy: RecordingPolicy) -> Self {
        Self {
            policy,
            active: false,
        }
    }
}

/// Connectivity of an external USB camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbCameraStatus {
    Disconnected,
    Connected { name: String },
}

/// Point-in-time view of the lifecycle signals driving the alert rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub others_have_streams: bool,
    pub waiting_for_others: bool,
}
