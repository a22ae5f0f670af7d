//! Alert rules.
//!
//! Each rule is a small state machine task: it tracks its activating
//! condition on the call's signal streams, arms a debounce timer where
//! the rule calls for one, and requests set mutations through a command
//! channel. A single reducer task owns the set, so concurrent rules
//! never interleave partial updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::call_state::{CallPhase, RecordingPolicy, RecordingState};
use crate::messages::{AlertMessage, AlertSet};

/// Set mutation requested by an alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AlertCommand {
    Insert(AlertMessage),
    Remove(AlertMessage),
}

/// Applies commands in arrival order and publishes a full-set snapshot
/// whenever membership actually changes.
pub(crate) async fn alert_reducer(
    mut commands: mpsc::UnboundedReceiver<AlertCommand>,
    alerts: Arc<watch::Sender<AlertSet>>,
) {
    let mut set = AlertSet::new();
    while let Some(command) = commands.recv().await {
        let changed = match command {
            AlertCommand::Insert(alert) => set.insert(alert),
            AlertCommand::Remove(alert) => set.remove(&alert),
        };
        if changed {
            tracing::debug!(?command, "alert set changed");
            alerts.send_replace(set.clone());
        }
    }
}

/// Sleeps until `deadline`, or forever when no timer is armed.
async fn debounce_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Raises [`AlertMessage::LeftAlone`] once "no other participant has a
/// stream" has held for `debounce` in an active call phase, and clears it
/// the moment a stream appears. The alert is cleared unconditionally when
/// the observation ends.
pub(crate) async fn left_alone_rule(
    mut phase: watch::Receiver<CallPhase>,
    mut others_have_streams: watch::Receiver<bool>,
    commands: mpsc::UnboundedSender<AlertCommand>,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;
    let mut raised = false;

    loop {
        let current = *phase.borrow_and_update();
        if current.is_terminal() {
            break;
        }
        let have_streams = *others_have_streams.borrow_and_update();

        // Nobody is expected to have a stream while the call is still
        // ringing or dialing; the condition is not evaluated there.
        if !current.is_pre_connection() {
            if have_streams {
                deadline = None;
                if raised {
                    raised = false;
                    let _ = commands.send(AlertCommand::Remove(AlertMessage::LeftAlone));
                }
            } else if !raised && deadline.is_none() {
                deadline = Some(Instant::now() + debounce);
            }
        }

        tokio::select! {
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = others_have_streams.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = debounce_elapsed(deadline) => {
                deadline = None;
                raised = true;
                let _ = commands.send(AlertCommand::Insert(AlertMessage::LeftAlone));
            }
        }
    }

    let _ = commands.send(AlertCommand::Remove(AlertMessage::LeftAlone));
    tracing::debug!("left-alone observation ended");
}

/// Waits until the phase satisfies `pred`. Returns `false` when the call
/// reached a final state or the stream closed.
async fn phase_becomes(
    phase: &mut watch::Receiver<CallPhase>,
    pred: impl Fn(CallPhase) -> bool,
) -> bool {
    loop {
        let current = *phase.borrow_and_update();
        if matches!(current, CallPhase::Ended | CallPhase::Failed) {
            return false;
        }
        if pred(current) {
            return true;
        }
        if phase.changed().await.is_err() {
            return false;
        }
    }
}

/// Raises [`AlertMessage::WaitingForOtherParticipants`] once "still
/// waiting to be joined" has held for `debounce` while the call is
/// Connected and no other participant has a stream yet.
///
/// Re-armed on every transition into Connected. Once any participant
/// acquires a stream the rule stands down for the remainder of that
/// Connected instance. The alert is cleared whenever an observation ends.
pub(crate) async fn waiting_for_others_rule(
    mut phase: watch::Receiver<CallPhase>,
    mut waiting_for_others: watch::Receiver<bool>,
    mut others_have_streams: watch::Receiver<bool>,
    commands: mpsc::UnboundedSender<AlertCommand>,
    debounce: Duration,
) {
    'call: loop {
        if !phase_becomes(&mut phase, |p| p == CallPhase::Connected).await {
            break;
        }

        // One observation per Connected instance.
        let mut deadline: Option<Instant> = None;
        let mut raised = false;
        let stood_down = loop {
            if *phase.borrow_and_update() != CallPhase::Connected {
                break false;
            }
            if *others_have_streams.borrow_and_update() {
                break true;
            }
            if *waiting_for_others.borrow_and_update() {
                if !raised && deadline.is_none() {
                    deadline = Some(Instant::now() + debounce);
                }
            } else {
                deadline = None;
                if raised {
                    raised = false;
                    let _ = commands
                        .send(AlertCommand::Remove(AlertMessage::WaitingForOtherParticipants));
                }
            }

            tokio::select! {
                changed = phase.changed() => {
                    if changed.is_err() {
                        break 'call;
                    }
                }
                changed = waiting_for_others.changed() => {
                    if changed.is_err() {
                        break 'call;
                    }
                }
                changed = others_have_streams.changed() => {
                    if changed.is_err() {
                        break 'call;
                    }
                }
                _ = debounce_elapsed(deadline) => {
                    deadline = None;
                    raised = true;
                    let _ = commands
                        .send(AlertCommand::Insert(AlertMessage::WaitingForOtherParticipants));
                }
            }
        };

        let _ = commands.send(AlertCommand::Remove(AlertMessage::WaitingForOtherParticipants));

        if stood_down {
            // Stay idle until the call leaves Connected; the next
            // Connected transition starts a fresh observation.
            if !phase_becomes(&mut phase, |p| p != CallPhase::Connected).await {
                break;
            }
        }
    }

    let _ = commands.send(AlertCommand::Remove(AlertMessage::WaitingForOtherParticipants));
    tracing::debug!("waiting-for-others observation ended");
}

/// Keeps [`AlertMessage::AutomaticRecordingArmed`] present exactly while
/// a call with on-connect recording is in the Connecting phase.
pub(crate) async fn automatic_recording_rule(
    mut phase: watch::Receiver<CallPhase>,
    mut recording: watch::Receiver<RecordingState>,
    commands: mpsc::UnboundedSender<AlertCommand>,
) {
    loop {
        let current = *phase.borrow_and_update();
        let state = *recording.borrow_and_update();
        if state.policy == RecordingPolicy::OnConnect {
            let command = if current == CallPhase::Connecting {
                AlertCommand::Insert(AlertMessage::AutomaticRecordingArmed)
            } else {
                AlertCommand::Remove(AlertMessage::AutomaticRecordingArmed)
            };
            let _ = commands.send(command);
        }
        if current.is_terminal() {
            break;
        }
        tokio::select! {
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = recording.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    let _ = commands.send(AlertCommand::Remove(AlertMessage::AutomaticRecordingArmed));
    tracing::debug!("automatic-recording observation ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEFT_ALONE_DEBOUNCE: Duration = Duration::from_millis(5000);
    const WAITING_DEBOUNCE: Duration = Duration::from_millis(3000);

    /// Lets the spawned rule task observe pending signal changes.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(commands: &mut mpsc::UnboundedReceiver<AlertCommand>) -> Vec<AlertCommand> {
        let mut seen = Vec::new();
        while let Ok(command) = commands.try_recv() {
            seen.push(command);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn reducer_publishes_only_on_membership_change() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (alerts_tx, mut alerts_rx) = watch::channel(AlertSet::new());
        tokio::spawn(alert_reducer(command_rx, Arc::new(alerts_tx)));

        command_tx
            .send(AlertCommand::Insert(AlertMessage::LeftAlone))
            .expect("reducer alive");
        command_tx
            .send(AlertCommand::Insert(AlertMessage::LeftAlone))
            .expect("reducer alive");
        settle().await;

        alerts_rx.changed().await.expect("snapshot published");
        assert!(alerts_rx.borrow_and_update().contains(&AlertMessage::LeftAlone));
        // The duplicate insert produced no second snapshot.
        assert!(!alerts_rx.has_changed().expect("reducer alive"));

        command_tx
            .send(AlertCommand::Remove(AlertMessage::LeftAlone))
            .expect("reducer alive");
        alerts_rx.changed().await.expect("snapshot published");
        assert!(alerts_rx.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn left_alone_raised_after_sustained_no_streams() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (_others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(left_alone_rule(
            phase_rx,
            others_rx,
            command_tx,
            LEFT_ALONE_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert!(command_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Insert(AlertMessage::LeftAlone))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn left_alone_cancelled_by_stream_before_debounce() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(left_alone_rule(
            phase_rx,
            others_rx,
            command_tx,
            LEFT_ALONE_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(4999)).await;
        others_tx.send(true).expect("rule alive");
        tokio::time::sleep(Duration::from_millis(10_000)).await;

        // The pending timer was cancelled; the alert never appeared.
        assert!(command_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn left_alone_removed_without_delay_when_stream_appears() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(left_alone_rule(
            phase_rx,
            others_rx,
            command_tx,
            LEFT_ALONE_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Insert(AlertMessage::LeftAlone))
        );

        others_tx.send(true).expect("rule alive");
        settle().await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Remove(AlertMessage::LeftAlone))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn left_alone_can_be_raised_again() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(left_alone_rule(
            phase_rx,
            others_rx,
            command_tx,
            LEFT_ALONE_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(5001)).await;
        others_tx.send(true).expect("rule alive");
        settle().await;
        others_tx.send(false).expect("rule alive");
        tokio::time::sleep(Duration::from_millis(5001)).await;

        let seen = drain(&mut command_rx);
        assert_eq!(
            seen,
            vec![
                AlertCommand::Insert(AlertMessage::LeftAlone),
                AlertCommand::Remove(AlertMessage::LeftAlone),
                AlertCommand::Insert(AlertMessage::LeftAlone),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn left_alone_not_evaluated_while_ringing() {
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Ringing);
        let (_others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(left_alone_rule(
            phase_rx,
            others_rx,
            command_tx,
            LEFT_ALONE_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert!(command_rx.try_recv().is_err());

        // The debounce window opens once the call leaves the ringing phase.
        phase_tx.send(CallPhase::Connected).expect("rule alive");
        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Insert(AlertMessage::LeftAlone))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn left_alone_cleared_when_call_ends() {
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (_others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(left_alone_rule(
            phase_rx,
            others_rx,
            command_tx,
            LEFT_ALONE_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(5001)).await;
        phase_tx.send(CallPhase::Disconnecting).expect("rule alive");
        settle().await;

        let seen = drain(&mut command_rx);
        assert_eq!(
            seen,
            vec![
                AlertCommand::Insert(AlertMessage::LeftAlone),
                AlertCommand::Remove(AlertMessage::LeftAlone),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn left_alone_cleared_when_streams_close() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(left_alone_rule(
            phase_rx,
            others_rx,
            command_tx,
            LEFT_ALONE_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(5001)).await;
        drop(others_tx);
        settle().await;

        let seen = drain(&mut command_rx);
        assert_eq!(
            seen,
            vec![
                AlertCommand::Insert(AlertMessage::LeftAlone),
                AlertCommand::Remove(AlertMessage::LeftAlone),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_raised_after_sustained_waiting() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (_waiting_tx, waiting_rx) = watch::channel(true);
        let (_others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(waiting_for_others_rule(
            phase_rx,
            waiting_rx,
            others_rx,
            command_tx,
            WAITING_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(command_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Insert(AlertMessage::WaitingForOtherParticipants))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_not_evaluated_outside_connected() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connecting);
        let (_waiting_tx, waiting_rx) = watch::channel(true);
        let (_others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(waiting_for_others_rule(
            phase_rx,
            waiting_rx,
            others_rx,
            command_tx,
            WAITING_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert!(command_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_removed_when_waiting_flips_false() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (waiting_tx, waiting_rx) = watch::channel(true);
        let (_others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(waiting_for_others_rule(
            phase_rx,
            waiting_rx,
            others_rx,
            command_tx,
            WAITING_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(3001)).await;
        waiting_tx.send(false).expect("rule alive");
        settle().await;

        let seen = drain(&mut command_rx);
        assert_eq!(
            seen,
            vec![
                AlertCommand::Insert(AlertMessage::WaitingForOtherParticipants),
                AlertCommand::Remove(AlertMessage::WaitingForOtherParticipants),
            ]
        );

        // Waiting again re-opens a full debounce window.
        waiting_tx.send(true).expect("rule alive");
        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(command_rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Insert(AlertMessage::WaitingForOtherParticipants))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_stands_down_once_a_stream_appears() {
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (_waiting_tx, waiting_rx) = watch::channel(true);
        let (others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(waiting_for_others_rule(
            phase_rx,
            waiting_rx,
            others_rx,
            command_tx,
            WAITING_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(3001)).await;
        others_tx.send(true).expect("rule alive");
        settle().await;

        let seen = drain(&mut command_rx);
        assert_eq!(
            seen,
            vec![
                AlertCommand::Insert(AlertMessage::WaitingForOtherParticipants),
                AlertCommand::Remove(AlertMessage::WaitingForOtherParticipants),
            ]
        );

        // Streams disappearing again does not revive this observation.
        others_tx.send(false).expect("rule alive");
        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert!(command_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_rearmed_on_next_connected_transition() {
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (_waiting_tx, waiting_rx) = watch::channel(true);
        let (others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(waiting_for_others_rule(
            phase_rx,
            waiting_rx,
            others_rx,
            command_tx,
            WAITING_DEBOUNCE,
        ));

        // Stand down the first observation.
        settle().await;
        others_tx.send(true).expect("rule alive");
        settle().await;
        drain(&mut command_rx);

        // Reconnect cycle: a new Connected instance observes again.
        others_tx.send(false).expect("rule alive");
        phase_tx.send(CallPhase::Reconnecting).expect("rule alive");
        settle().await;
        phase_tx.send(CallPhase::Connected).expect("rule alive");
        tokio::time::sleep(Duration::from_millis(3001)).await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Insert(AlertMessage::WaitingForOtherParticipants))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_removed_when_phase_leaves_connected() {
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Connected);
        let (_waiting_tx, waiting_rx) = watch::channel(true);
        let (_others_tx, others_rx) = watch::channel(false);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(waiting_for_others_rule(
            phase_rx,
            waiting_rx,
            others_rx,
            command_tx,
            WAITING_DEBOUNCE,
        ));

        tokio::time::sleep(Duration::from_millis(3001)).await;
        phase_tx.send(CallPhase::Disconnecting).expect("rule alive");
        settle().await;

        let seen = drain(&mut command_rx);
        assert_eq!(
            seen,
            vec![
                AlertCommand::Insert(AlertMessage::WaitingForOtherParticipants),
                AlertCommand::Remove(AlertMessage::WaitingForOtherParticipants),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn automatic_recording_follows_connecting_phase() {
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Connecting);
        let (_recording_tx, recording_rx) =
            watch::channel(RecordingState::new(RecordingPolicy::OnConnect));
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(automatic_recording_rule(phase_rx, recording_rx, command_tx));

        settle().await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Insert(AlertMessage::AutomaticRecordingArmed))
        );

        phase_tx.send(CallPhase::Connected).expect("rule alive");
        settle().await;
        assert_eq!(
            command_rx.try_recv().ok(),
            Some(AlertCommand::Remove(AlertMessage::AutomaticRecordingArmed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn automatic_recording_ignores_other_policies() {
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Connecting);
        let (_recording_tx, recording_rx) =
            watch::channel(RecordingState::new(RecordingPolicy::OnDemand));
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        tokio::spawn(automatic_recording_rule(phase_rx, recording_rx, command_tx));

        settle().await;
        phase_tx.send(CallPhase::Connected).expect("rule alive");
        settle().await;
        assert!(command_rx.try_recv().is_err());
    }
}
