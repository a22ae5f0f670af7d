use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::alerts;
use crate::call_state::{RecordingState, UsbCameraStatus};
use crate::config::AggregatorConfig;
use crate::errors::MessageStreamError;
use crate::messages::{AlertSet, UserMessage, UserMessageKind};
use crate::signals::{AudioFailureEvent, CallSignals, MutedEvent};

/// Aggregates a call's signal streams into the two notification outputs
/// rendered by the hosting shell: a queue of one-shot [`UserMessage`]s
/// and an observable set of persistent alerts.
///
/// One aggregator serves one call session at a time. [`start`] on a
/// running aggregator tears the previous session down completely before
/// observing the new call; [`stop`] (and `Drop`) cancels every
/// sub-observation and clears the alert set.
///
/// [`start`]: UserMessageAggregator::start
/// [`stop`]: UserMessageAggregator::stop
pub struct UserMessageAggregator {
    config: AggregatorConfig,
    session: Mutex<Option<Session>>,
    alerts: Arc<watch::Sender<AlertSet>>,
}

struct Session {
    queue: broadcast::Sender<UserMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl UserMessageAggregator {
    pub fn new() -> Self {
        Self::with_config(AggregatorConfig::default())
    }

    pub fn with_config(config: AggregatorConfig) -> Self {
        let (alerts, _) = watch::channel(AlertSet::new());
        Self {
            config,
            session: Mutex::new(None),
            alerts: Arc::new(alerts),
        }
    }

    /// Begin observing `signals` on the given runtime.
    ///
    /// An active prior session is torn down first: its tasks and pending
    /// debounce timers are cancelled, the alert set is reset to empty and
    /// a fresh message queue is created.
    ///
    /// # Panics
    ///
    /// Panics when `rt` is `None` and no tokio runtime is active.
    pub fn start(&self, signals: CallSignals, rt: Option<Handle>) {
        self.stop();

        let rt = rt.unwrap_or_else(Handle::current);
        let (queue, _) = broadcast::channel(self.config.message_buffer.max(1));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            rt.spawn(alerts::alert_reducer(command_rx, self.alerts.clone())),
            rt.spawn(alerts::left_alone_rule(
                signals.phase(),
                signals.others_have_streams(),
                commands.clone(),
                self.config.left_alone_debounce(),
            )),
            rt.spawn(alerts::waiting_for_others_rule(
                signals.phase(),
                signals.waiting_for_others(),
                signals.others_have_streams(),
                commands.clone(),
                self.config.waiting_for_others_debounce(),
            )),
            rt.spawn(alerts::automatic_recording_rule(
                signals.phase(),
                signals.recording(),
                commands,
            )),
            rt.spawn(recording_messages(signals.recording(), queue.clone())),
            rt.spawn(usb_camera_messages(signals.usb_camera(), queue.clone())),
            rt.spawn(muted_messages(signals.muted(), queue.clone())),
            rt.spawn(audio_failure_messages(
                signals.audio_failures(),
                queue.clone(),
            )),
        ];

        tracing::info!(snapshot = ?signals.snapshot(), "user message aggregation started");
        *self.session.lock().expect("session lock poisoned") = Some(Session { queue, tasks });
    }

    /// Stop the active session: cancel every sub-observation and pending
    /// debounce timer, clear the alert set, drop the session queue.
    /// No-op when already stopped.
    pub fn stop(&self) {
        let session = self.session.lock().expect("session lock poisoned").take();
        let Some(session) = session else {
            return;
        };
        for task in &session.tasks {
            task.abort();
        }
        self.clear_alerts();
        tracing::info!("user message aggregation stopped");
    }

    /// Enqueue an out-of-band message (e.g. a UI-originated permission
    /// notice). Dropped silently when no session is active.
    pub fn send_message(&self, message: UserMessage) {
        let session = self.session.lock().expect("session lock poisoned");
        match session.as_ref() {
            Some(session) => enqueue(&session.queue, message),
            None => tracing::debug!("user message dropped, no active session"),
        }
    }

    /// Subscribe to the current session's one-shot messages.
    ///
    /// Each subscriber independently receives every message enqueued
    /// after it subscribed, in enqueue order. A subscription taken while
    /// no session is active yields [`MessageStreamError::Closed`].
    pub fn messages(&self) -> UserMessageStream {
        let session = self.session.lock().expect("session lock poisoned");
        let receiver = match session.as_ref() {
            Some(session) => session.queue.subscribe(),
            None => broadcast::channel(1).1,
        };
        UserMessageStream { receiver }
    }

    /// Observe the persistent alert set. The full set is emitted on every
    /// membership change.
    pub fn alerts(&self) -> watch::Receiver<AlertSet> {
        self.alerts.subscribe()
    }

    fn clear_alerts(&self) {
        self.alerts.send_if_modified(|set| {
            if set.is_empty() {
                false
            } else {
                set.clear();
                true
            }
        });
    }
}

impl Drop for UserMessageAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-subscriber view of the session's message queue.
///
/// Slow subscribers never block producers: a subscriber that falls more
/// than the queue capacity behind loses the oldest undelivered messages
/// and observes a single [`MessageStreamError::Lagged`].
pub struct UserMessageStream {
    receiver: broadcast::Receiver<UserMessage>,
}

impl UserMessageStream {
    /// Receive the next message, in enqueue order.
    pub async fn recv(&mut self) -> Result<UserMessage, MessageStreamError> {
        match self.receiver.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Err(MessageStreamError::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => Err(MessageStreamError::Closed),
        }
    }

    /// Adapt to a [`futures_util::Stream`], skipping over lag gaps and
    /// ending when the session closes.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = UserMessage> {
        futures_util::stream::unfold(self, |mut stream| async move {
            loop {
                match stream.recv().await {
                    Ok(message) => return Some((message, stream)),
                    Err(MessageStreamError::Lagged(skipped)) => {
                        tracing::warn!("message subscriber lagged, {skipped} skipped");
                    }
                    Err(MessageStreamError::Closed) => return None,
                }
            }
        })
    }
}

fn enqueue(queue: &broadcast::Sender<UserMessage>, message: UserMessage) {
    if queue.send(message).is_err() {
        tracing::debug!("user message dropped, no active subscribers");
    }
}

/// Forwards recording activity transitions as started/stopped messages.
///
/// The state channel replays its current value on subscribe; when that
/// first observed emission is "stopped" it is dropped, so a session
/// starting on an idle call does not toast a spurious "recording
/// stopped". The rule applies to the first emission only.
async fn recording_messages(
    mut recording: watch::Receiver<RecordingState>,
    queue: broadcast::Sender<UserMessage>,
) {
    let mut first = true;
    let mut last_active: Option<bool> = None;
    loop {
        let active = recording.borrow_and_update().active;
        if last_active != Some(active) {
            last_active = Some(active);
            let suppress = first && !active;
            first = false;
            if !suppress {
                let kind = if active {
                    UserMessageKind::RecordingStarted
                } else {
                    UserMessageKind::RecordingStopped
                };
                enqueue(&queue, UserMessage::new(kind));
            }
        }
        if recording.changed().await.is_err() {
            break;
        }
    }
}

/// Forwards USB camera connectivity changes, dropping the first observed
/// emission when it is "disconnected" (same cached-state replay rule as
/// recording).
async fn usb_camera_messages(
    mut usb_camera: watch::Receiver<UsbCameraStatus>,
    queue: broadcast::Sender<UserMessage>,
) {
    let mut first = true;
    let mut last: Option<UsbCameraStatus> = None;
    loop {
        let status = usb_camera.borrow_and_update().clone();
        if last.as_ref() != Some(&status) {
            let suppress = first && status == UsbCameraStatus::Disconnected;
            first = false;
            let kind = match &status {
                UsbCameraStatus::Connected { name } => UserMessageKind::UsbCameraConnected {
                    name: name.clone(),
                },
                UsbCameraStatus::Disconnected => UserMessageKind::UsbCameraDisconnected,
            };
            last = Some(status);
            if !suppress {
                enqueue(&queue, UserMessage::new(kind));
            }
        }
        if usb_camera.changed().await.is_err() {
            break;
        }
    }
}

/// Forwards mute notifications unfiltered.
async fn muted_messages(
    mut muted: broadcast::Receiver<MutedEvent>,
    queue: broadcast::Sender<UserMessage>,
) {
    loop {
        match muted.recv().await {
            Ok(event) => enqueue(
                &queue,
                UserMessage::new(UserMessageKind::Muted { by: event.by }),
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("mute events lagged, {skipped} skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Forwards audio-output failure notifications unfiltered.
async fn audio_failure_messages(
    mut failures: broadcast::Receiver<AudioFailureEvent>,
    queue: broadcast::Sender<UserMessage>,
) {
    loop {
        match failures.recv().await {
            Ok(AudioFailureEvent) => enqueue(
                &queue,
                UserMessage::new(UserMessageKind::AudioConnectionFailure),
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("audio failure events lagged, {skipped} skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
