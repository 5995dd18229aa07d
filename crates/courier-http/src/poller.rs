use std::sync::Arc;

use courier_core::{
    ListQuery, LogOp, Message, MessageStatus, PollStatus, TransportError, TransportEvent,
    normalization::message_from_remote,
};
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cadence::{CadenceInputs, CadenceReason, next_poll_delay},
    shared::TransportShared,
};

/// Outcome of one successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Marker to send with the next poll.
    pub marker: Option<String>,
    /// Messages that were new to the local log.
    pub new_messages: usize,
    pub has_more: bool,
    pub not_modified: bool,
}

#[derive(Debug)]
struct RunningPollTask {
    session_id: String,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Adaptive poll loop for one session at a time.
pub struct Poller {
    shared: Arc<TransportShared>,
    nudge: Arc<Notify>,
    poll_task: Mutex<Option<RunningPollTask>>,
}

impl Poller {
    pub(crate) fn new(shared: Arc<TransportShared>, nudge: Arc<Notify>) -> Self {
        Self {
            shared,
            nudge,
            poll_task: Mutex::new(None),
        }
    }

    /// Start polling `session_id`.
    ///
    /// Idempotent for the session already being polled. Switching sessions
    /// stops the previous loop first. A loop that ended on an authentication
    /// rejection is restarted.
    pub async fn start(&self, session_id: &str) {
        let mut guard = self.poll_task.lock().await;
        if let Some(running) = guard.as_ref()
            && running.session_id == session_id
            && !running.task.is_finished()
        {
            debug!(session_id, "poll loop already running");
            return;
        }

        if let Some(previous) = guard.take() {
            previous.stop.cancel();
            let _ = previous.task.await;
        }

        info!(session_id, "starting poll loop");
        self.shared.tracker.set_connecting();

        let stop = CancellationToken::new();
        let task = tokio::spawn(run_poll_loop(
            self.shared.clone(),
            session_id.to_owned(),
            stop.child_token(),
            self.nudge.clone(),
        ));
        *guard = Some(RunningPollTask {
            session_id: session_id.to_owned(),
            stop,
            task,
        });
    }

    /// Stop the loop and wait for it to exit. No-op when not running.
    pub async fn stop(&self) {
        let running = self.poll_task.lock().await.take();
        let Some(running) = running else {
            return;
        };

        running.stop.cancel();
        let _ = running.task.await;
        self.shared.tracker.set_stopped();
        info!(session_id = %running.session_id, "poll loop stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.poll_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    pub async fn session_id(&self) -> Option<String> {
        self.poll_task
            .lock()
            .await
            .as_ref()
            .map(|running| running.session_id.clone())
    }

    /// Cut the current wait short. Ignored while errors are outstanding.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }
}

enum Wake {
    Poll,
    Stop,
}

async fn run_poll_loop(
    shared: Arc<TransportShared>,
    session_id: String,
    stop: CancellationToken,
    nudge: Arc<Notify>,
) {
    shared.emit(TransportEvent::PollStatus(PollStatus {
        running: true,
        next_poll_ms: None,
    }));

    let mut marker = shared.log().last_server_id(&session_id).map(str::to_owned);
    let mut has_more = false;
    let mut retry_after_ms = None;
    let mut last_poll = Instant::now();

    loop {
        let online = shared.env.is_online();
        if online {
            if shared.tracker.consecutive_errors() > 0 {
                shared.tracker.record_reconnect_attempt();
            }
            last_poll = Instant::now();

            let result = tokio::select! {
                _ = stop.cancelled() => break,
                result = poll_session(&shared, &session_id, marker.as_deref()) => result,
            };
            match result {
                Ok(report) => {
                    marker = report.marker;
                    has_more = report.has_more;
                    retry_after_ms = None;
                }
                Err(err) if err.is_auth_rejection() => {
                    warn!(session_id = %session_id, "credential rejected; poll loop halted");
                    break;
                }
                Err(err) => {
                    has_more = false;
                    retry_after_ms = err.retry_after_ms;
                }
            }
        } else {
            has_more = false;
            debug!(session_id = %session_id, "host offline; skipping poll");
        }

        let poll = &shared.config.poll;
        let consecutive_errors = shared.tracker.consecutive_errors();
        let (delay, reason) = if online {
            let cadence = next_poll_delay(
                poll,
                &CadenceInputs {
                    consecutive_errors,
                    retry_after_ms,
                    page_visible: shared.env.is_page_visible(),
                    has_more,
                    activity: shared.activity.snapshot(),
                    now: Instant::now(),
                },
            );
            (cadence.delay, Some(cadence.reason))
        } else {
            (poll.hidden_recheck, None)
        };

        debug!(
            session_id = %session_id,
            delay_ms = delay.as_millis() as u64,
            ?reason,
            "next poll scheduled"
        );
        shared.emit(TransportEvent::PollStatus(PollStatus {
            running: true,
            next_poll_ms: Some(delay.as_millis() as u64),
        }));

        let deadline = Instant::now() + delay;
        let hidden = reason == Some(CadenceReason::Hidden);
        // Offline waits always honor a nudge so reconnects are immediate.
        let honor_nudge = !online || consecutive_errors == 0;

        let wake = loop {
            let wake_at = if hidden {
                deadline.min(Instant::now() + poll.hidden_recheck)
            } else {
                deadline
            };

            tokio::select! {
                _ = stop.cancelled() => break Wake::Stop,
                _ = nudge.notified() => {
                    if honor_nudge {
                        debug!(session_id = %session_id, "poll nudged");
                        break Wake::Poll;
                    }
                }
                _ = sleep_until(wake_at) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Wake::Poll;
                    }
                    if hidden
                        && (shared.env.is_page_visible()
                            || now.saturating_duration_since(last_poll) >= poll.max)
                    {
                        break Wake::Poll;
                    }
                }
            }
        };

        if matches!(wake, Wake::Stop) {
            break;
        }
    }

    shared.emit(TransportEvent::PollStatus(PollStatus {
        running: false,
        next_poll_ms: None,
    }));
}

/// Run one list-since request for `session_id` and fold the result into the
/// message log and the tracker.
pub(crate) async fn poll_session(
    shared: &TransportShared,
    session_id: &str,
    since_id: Option<&str>,
) -> Result<PollReport, TransportError> {
    let query = ListQuery {
        session_id: session_id.to_owned(),
        since_id: since_id.map(str::to_owned),
        limit: shared.config.poll.list_limit,
        offset: None,
    };

    let result = match shared.helper.list_since(&query).await {
        Ok(result) => result,
        Err(err) => {
            if err.is_auth_rejection() {
                shared.tracker.set_auth_required();
                shared.emit(TransportEvent::AuthRequired);
            } else if err.affects_connection() {
                warn!(session_id, error = %err, "poll failed");
                shared.tracker.record_error(&err.code);
            } else {
                warn!(session_id, error = %err, "poll rejected by backend");
            }
            return Err(err);
        }
    };

    shared.tracker.record_success(result.latency);

    let marker = result
        .page
        .messages
        .last()
        .map(|remote| remote.id.clone())
        .or_else(|| since_id.map(str::to_owned));
    let has_more = result.page.has_more;

    let fresh: Vec<Message> = {
        let mut log = shared.log();
        let mut fresh = Vec::new();
        for remote in result.page.messages {
            if log.contains_server_id(session_id, &remote.id) {
                continue;
            }
            let op = match log.find_unlinked(session_id, remote.role, &remote.content) {
                Some(local_id) => LogOp::UpdateStatus {
                    id: local_id.to_owned(),
                    status: MessageStatus::Delivered,
                    server_id: Some(remote.id),
                    error_code: None,
                },
                None => {
                    let message = message_from_remote(session_id, remote);
                    fresh.push(message.clone());
                    LogOp::Upsert(message)
                }
            };
            if let Err(err) = log.apply_ops(session_id, std::slice::from_ref(&op)) {
                warn!(session_id, error = %err, "failed recording polled message");
            }
        }
        fresh
    };

    let new_messages = fresh.len();
    if new_messages > 0 {
        debug!(session_id, count = new_messages, "received messages");
        shared.emit(TransportEvent::MessagesReceived {
            session_id: session_id.to_owned(),
            messages: fresh,
        });
    }

    Ok(PollReport {
        marker,
        new_messages,
        has_more,
        not_modified: result.not_modified,
    })
}
