use tokio::sync::{broadcast, watch};

use crate::call_state::{CallPhase, CallSnapshot, RecordingState, UsbCameraStatus};

/// Capacity of the discrete-event channels (mute, audio failures).
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// The local participant was muted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutedEvent {
    /// Identifier of the actor that requested the mute, if known.
    pub by: Option<String>,
}

/// An audio output route could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFailureEvent;

/// Consumer half of a call's signal streams.
///
/// State-like signals (phase, stream presence, recording, USB camera) are
/// watch channels carrying the latest value; mute and audio-failure
/// notifications are discrete event channels. Handed to
/// [`UserMessageAggregator::start`](crate::UserMessageAggregator::start).
///
/// Cloneable: every accessor returns an independent subscription.
#[derive(Clone)]
pub struct CallSignals {
    phase: watch::Receiver<CallPhase>,
    others_have_streams: watch::Receiver<bool>,
    waiting_for_others: watch::Receiver<bool>,
    recording: watch::Receiver<RecordingState>,
    usb_camera: watch::Receiver<UsbCameraStatus>,
    muted: broadcast::Sender<MutedEvent>,
    audio_failures: broadcast::Sender<AudioFailureEvent>,
}

impl CallSignals {
    pub fn phase(&self) -> watch::Receiver<CallPhase> {
        self.phase.clone()
    }

    pub fn others_have_streams(&self) -> watch::Receiver<bool> {
        self.others_have_streams.clone()
    }

    pub fn waiting_for_others(&self) -> watch::Receiver<bool> {
        self.waiting_for_others.clone()
    }

    pub fn recording(&self) -> watch::Receiver<RecordingState> {
        self.recording.clone()
    }

    pub fn usb_camera(&self) -> watch::Receiver<UsbCameraStatus> {
        self.usb_camera.clone()
    }

    /// Subscribe to mute notifications. Only events published after the
    /// subscription are observed.
    pub fn muted(&self) -> broadcast::Receiver<MutedEvent> {
        self.muted.subscribe()
    }

    /// Subscribe to audio-output failure notifications.
    pub fn audio_failures(&self) -> broadcast::Receiver<AudioFailureEvent> {
        self.audio_failures.subscribe()
    }

    /// Point-in-time view of the lifecycle signals.
    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            phase: *self.phase.borrow(),
            others_have_streams: *self.others_have_streams.borrow(),
            waiting_for_others: *self.waiting_for_others.borrow(),
        }
    }
}

/// Producer half of a call's signal streams.
///
/// Owned by the session layer that adapts the underlying SDK's state;
/// dropping it ends every stream, which observers treat as session end.
pub struct CallSignalsPublisher {
    phase: watch::Sender<CallPhase>,
    others_have_streams: watch::Sender<bool>,
    waiting_for_others: watch::Sender<bool>,
    recording: watch::Sender<RecordingState>,
    usb_camera: watch::Sender<UsbCameraStatus>,
    muted: broadcast::Sender<MutedEvent>,
    audio_failures: broadcast::Sender<AudioFailureEvent>,
}

impl CallSignalsPublisher {
    pub fn new(phase: CallPhase, recording: RecordingState) -> Self {
        let (phase_tx, _) = watch::channel(phase);
        let (others_tx, _) = watch::channel(false);
        let (waiting_tx, _) = watch::channel(false);
        let (recording_tx, _) = watch::channel(recording);
        let (usb_tx, _) = watch::channel(UsbCameraStatus::Disconnected);
        let (muted_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (audio_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            phase: phase_tx,
            others_have_streams: others_tx,
            waiting_for_others: waiting_tx,
            recording: recording_tx,
            usb_camera: usb_tx,
            muted: muted_tx,
            audio_failures: audio_tx,
        }
    }

    /// Get the consumer half. Can be called any number of times.
    pub fn signals(&self) -> CallSignals {
        CallSignals {
            phase: self.phase.subscribe(),
            others_have_streams: self.others_have_streams.subscribe(),
            waiting_for_others: self.waiting_for_others.subscribe(),
            recording: self.recording.subscribe(),
            usb_camera: self.usb_camera.subscribe(),
            muted: self.muted.clone(),
            audio_failures: self.audio_failures.clone(),
        }
    }

    pub fn set_phase(&self, phase: CallPhase) {
        self.phase.send_replace(phase);
    }

    pub fn set_others_have_streams(&self, have_streams: bool) {
        self.others_have_streams.send_replace(have_streams);
    }

    pub fn set_waiting_for_others(&self, waiting: bool) {
        self.waiting_for_others.send_replace(waiting);
    }

    pub fn set_recording(&self, state: RecordingState) {
        self.recording.send_replace(state);
    }

    pub fn set_usb_camera(&self, status: UsbCameraStatus) {
        self.usb_camera.send_replace(status);
    }

    /// Publish a mute notification. Dropped when nothing is observing.
    pub fn notify_muted(&self, by: Option<String>) {
        let _ = self.muted.send(MutedEvent { by });
    }

    /// Publish an audio-output failure. Dropped when nothing is observing.
    pub fn notify_audio_failure(&self) {
        let _ = self.audio_failures.send(AudioFailureEvent);
    }
}
