use std::time::Duration;

use courier_core::{ActivitySnapshot, PollConfig};
use tokio::time::Instant;

/// Why a poll delay was chosen, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceReason {
    /// Errors outstanding; exponential backoff dominates everything else.
    Backoff,
    /// Page hidden; poll at the maximal cadence.
    Hidden,
    /// Backend reported more pending messages.
    FollowUp,
    /// User typing or just sent a message.
    Active,
    /// Recent general activity.
    Base,
    /// Visible but idle.
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub delay: Duration,
    pub reason: CadenceReason,
}

/// Signals the next poll delay is computed from.
#[derive(Debug, Clone, Copy)]
pub struct CadenceInputs {
    pub consecutive_errors: u32,
    pub retry_after_ms: Option<u64>,
    pub page_visible: bool,
    pub has_more: bool,
    pub activity: ActivitySnapshot,
    pub now: Instant,
}

/// Compute the delay until the next poll.
pub fn next_poll_delay(config: &PollConfig, inputs: &CadenceInputs) -> Cadence {
    if inputs.consecutive_errors > 0 {
        return Cadence {
            delay: config
                .backoff_policy()
                .delay_for_exponent(inputs.consecutive_errors, inputs.retry_after_ms),
            reason: CadenceReason::Backoff,
        };
    }

    if !inputs.page_visible {
        return Cadence {
            delay: config.max,
            reason: CadenceReason::Hidden,
        };
    }

    if inputs.has_more {
        return Cadence {
            delay: Duration::ZERO,
            reason: CadenceReason::FollowUp,
        };
    }

    let within = |at: Option<Instant>, window: Duration| {
        at.is_some_and(|at| inputs.now.saturating_duration_since(at) <= window)
    };
    let activity = &inputs.activity;

    let (delay, reason) = if within(activity.last_keystroke, config.typing_window)
        || within(activity.last_message_sent, config.sent_window)
    {
        (config.active, CadenceReason::Active)
    } else if within(activity.last_any(), config.activity_window) {
        (config.base, CadenceReason::Base)
    } else {
        (config.inactive, CadenceReason::Inactive)
    };

    Cadence {
        delay: delay.min(config.max),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(now: Instant) -> CadenceInputs {
        CadenceInputs {
            consecutive_errors: 0,
            retry_after_ms: None,
            page_visible: true,
            has_more: false,
            activity: ActivitySnapshot::default(),
            now,
        }
    }

    #[tokio::test]
    async fn idle_visible_page_uses_inactive_cadence() {
        let config = PollConfig::default();
        let cadence = next_poll_delay(&config, &inputs(Instant::now()));
        assert_eq!(cadence.reason, CadenceReason::Inactive);
        assert_eq!(cadence.delay, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn typing_and_recent_send_use_active_cadence() {
        let config = PollConfig::default();
        let now = Instant::now();

        let mut typing = inputs(now + Duration::from_secs(4));
        typing.activity.last_keystroke = Some(now);
        assert_eq!(
            next_poll_delay(&config, &typing).delay,
            Duration::from_secs(2)
        );

        let mut sent = inputs(now + Duration::from_secs(29));
        sent.activity.last_message_sent = Some(now);
        assert_eq!(
            next_poll_delay(&config, &sent).reason,
            CadenceReason::Active
        );
    }

    #[tokio::test]
    async fn stale_keystroke_falls_back_to_base_then_inactive() {
        let config = PollConfig::default();
        let now = Instant::now();

        let mut recent = inputs(now + Duration::from_secs(20));
        recent.activity.last_keystroke = Some(now);
        assert_eq!(next_poll_delay(&config, &recent).reason, CadenceReason::Base);
        assert_eq!(
            next_poll_delay(&config, &recent).delay,
            Duration::from_secs(3)
        );

        let mut stale = inputs(now + Duration::from_secs(90));
        stale.activity.last_pointer_move = Some(now);
        assert_eq!(
            next_poll_delay(&config, &stale).reason,
            CadenceReason::Inactive
        );
    }

    #[tokio::test]
    async fn hidden_page_dominates_activity() {
        let config = PollConfig::default();
        let now = Instant::now();
        let mut hidden = inputs(now);
        hidden.page_visible = false;
        hidden.has_more = true;
        hidden.activity.last_keystroke = Some(now);

        let cadence = next_poll_delay(&config, &hidden);
        assert_eq!(cadence.reason, CadenceReason::Hidden);
        assert_eq!(cadence.delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn backoff_dominates_everything() {
        let config = PollConfig::default();
        let now = Instant::now();
        let mut failing = inputs(now);
        failing.consecutive_errors = 5;
        failing.page_visible = false;
        failing.activity.last_keystroke = Some(now);

        let cadence = next_poll_delay(&config, &failing);
        assert_eq!(cadence.reason, CadenceReason::Backoff);
        assert_eq!(cadence.delay, Duration::from_millis(22_781));

        failing.consecutive_errors = 12;
        assert_eq!(
            next_poll_delay(&config, &failing).delay,
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn backoff_never_drops_below_base() {
        let config = PollConfig::default();
        let mut failing = inputs(Instant::now());
        failing.consecutive_errors = 1;
        assert_eq!(
            next_poll_delay(&config, &failing).delay,
            Duration::from_millis(4_500)
        );
    }

    #[tokio::test]
    async fn has_more_triggers_immediate_follow_up() {
        let config = PollConfig::default();
        let mut more = inputs(Instant::now());
        more.has_more = true;
        let cadence = next_poll_delay(&config, &more);
        assert_eq!(cadence.reason, CadenceReason::FollowUp);
        assert_eq!(cadence.delay, Duration::ZERO);
    }
}
