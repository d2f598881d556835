use std::fmt;

/// Where a device session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Subscribing,
    Streaming,
    Backoff,
}

/// Things that happen to a session and move it between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Start,
    LoginSucceeded,
    LoginFailed,
    SubscribeStarted,
    SubscribeFailed,
    RequestSent,
    StreamEnded,
    /// The attempt panicked.
    Faulted,
    BackoffElapsed,
}

impl Phase {
    /// Next phase after `event`, or `None` if the event is not valid here.
    pub fn try_on(self, event: Event) -> Option<Phase> {
        use Event as E;
        use Phase as P;

        match (self, event) {
            (_, E::Faulted) => Some(P::Backoff),
            (P::Idle, E::Start) => Some(P::Connecting),
            (P::Connecting, E::LoginSucceeded) => Some(P::Connected),
            (P::Connecting, E::LoginFailed) => Some(P::Backoff),
            (P::Connected, E::SubscribeStarted) => Some(P::Subscribing),
            (P::Subscribing, E::RequestSent) => Some(P::Streaming),
            (P::Subscribing, E::SubscribeFailed) => Some(P::Backoff),
            (P::Streaming, E::StreamEnded) => Some(P::Backoff),
            (P::Backoff, E::BackoffElapsed) => Some(P::Connecting),
            _ => None,
        }
    }

    /// Next phase after `event`; invalid events leave the phase unchanged.
    pub fn on(self, event: Event) -> Phase {
        self.try_on(event).unwrap_or(self)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_cycle() {
        let mut phase = Phase::Idle;
        for (event, expected) in [
            (Event::Start, Phase::Connecting),
            (Event::LoginSucceeded, Phase::Connected),
            (Event::SubscribeStarted, Phase::Subscribing),
            (Event::RequestSent, Phase::Streaming),
            (Event::StreamEnded, Phase::Backoff),
            (Event::BackoffElapsed, Phase::Connecting),
        ] {
            phase = phase.on(event);
            assert_eq!(phase, expected, "after {event:?}");
        }
    }

    #[test]
    fn test_failures_lead_to_backoff() {
        assert_eq!(Phase::Connecting.on(Event::LoginFailed), Phase::Backoff);
        assert_eq!(Phase::Subscribing.on(Event::SubscribeFailed), Phase::Backoff);
    }

    #[test]
    fn test_fault_from_any_phase() {
        for phase in [
            Phase::Idle,
            Phase::Connecting,
            Phase::Connected,
            Phase::Subscribing,
            Phase::Streaming,
            Phase::Backoff,
        ] {
            assert_eq!(phase.on(Event::Faulted), Phase::Backoff);
        }
    }

    #[test]
    fn test_invalid_event_keeps_phase() {
        assert_eq!(Phase::Streaming.try_on(Event::LoginSucceeded), None);
        assert_eq!(Phase::Streaming.on(Event::LoginSucceeded), Phase::Streaming);
        assert_eq!(Phase::Idle.on(Event::BackoffElapsed), Phase::Idle);
    }

    #[test]
    fn test_backoff_is_the_only_way_back() {
        // Nothing but BackoffElapsed leaves Backoff for Connecting.
        assert_eq!(Phase::Backoff.try_on(Event::Start), None);
        assert_eq!(Phase::Backoff.try_on(Event::LoginSucceeded), None);
        assert_eq!(Phase::Backoff.on(Event::BackoffElapsed), Phase::Connecting);
    }
}
