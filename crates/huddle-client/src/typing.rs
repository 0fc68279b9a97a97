use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::json;
use uuid::Uuid;

use huddle_types::events::{ChannelFrame, names};

/// Inactivity after which a typist is considered to have stopped.
pub const TYPING_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

impl TypingSignal {
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Start => names::TYPING_START,
            Self::Stop => names::TYPING_STOP,
        }
    }

    /// The frame to put on the channel for this signal.
    pub fn frame(self, receiver_id: Uuid) -> ChannelFrame {
        ChannelFrame {
            event: self.event_name().to_string(),
            data: json!({ "receiver_id": receiver_id }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TypingState {
    Idle,
    Typing { last_keystroke: Instant, last_start: Instant },
}

/// Sender side of the typing protocol for one conversation.
///
/// The first keystroke emits `Start`; while typing continues `Start` is
/// repeated every half window so the receiver's expiry never fires early.
/// `Stop` is emitted on send or once a window passes without a keystroke.
/// Time is passed in so the state machine stays deterministic.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    window: Duration,
    state: TypingState,
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new(TYPING_WINDOW)
    }
}

impl TypingIndicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: TypingState::Idle,
        }
    }

    pub fn is_typing(&self) -> bool {
        matches!(self.state, TypingState::Typing { .. })
    }

    pub fn keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.state {
            TypingState::Idle => {
                self.state = TypingState::Typing {
                    last_keystroke: now,
                    last_start: now,
                };
                Some(TypingSignal::Start)
            }
            TypingState::Typing { last_start, .. } => {
                let refresh = now.saturating_duration_since(last_start) >= self.window / 2;
                self.state = TypingState::Typing {
                    last_keystroke: now,
                    last_start: if refresh { now } else { last_start },
                };
                refresh.then_some(TypingSignal::Start)
            }
        }
    }

    /// Call periodically; fires the debounce.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.state {
            TypingState::Typing { last_keystroke, .. }
                if now.saturating_duration_since(last_keystroke) >= self.window =>
            {
                self.state = TypingState::Idle;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    /// The draft went out; stop immediately rather than waiting out the window.
    pub fn message_sent(&mut self) -> Option<TypingSignal> {
        if self.is_typing() {
            self.state = TypingState::Idle;
            Some(TypingSignal::Stop)
        } else {
            None
        }
    }
}

/// Receiver side: who is typing to us. A `typing` event refreshes the
/// entry; without a refresh for a full window the entry reads as idle even
/// if `typing-stop` was lost.
#[derive(Debug, Clone)]
pub struct TypingObserver {
    window: Duration,
    last_seen: HashMap<Uuid, Instant>,
}

impl Default for TypingObserver {
    fn default() -> Self {
        Self::new(TYPING_WINDOW)
    }
}

impl TypingObserver {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    pub fn observe(&mut self, from_user_id: Uuid, is_typing: bool, now: Instant) {
        if is_typing {
            self.last_seen.insert(from_user_id, now);
        } else {
            self.last_seen.remove(&from_user_id);
        }
    }

    pub fn is_typing(&self, from_user_id: Uuid, now: Instant) -> bool {
        self.last_seen
            .get(&from_user_id)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.window)
    }

    /// A message from someone ends their typing state.
    pub fn clear(&mut self, from_user_id: Uuid) {
        self.last_seen.remove(&from_user_id);
    }

    /// Drop expired entries; returns who went idle.
    pub fn expire(&mut self, now: Instant) -> Vec<Uuid> {
        let window = self.window;
        let mut expired = Vec::new();
        self.last_seen.retain(|id, seen| {
            let live = now.saturating_duration_since(*seen) < window;
            if !live {
                expired.push(*id);
            }
            live
        });
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn first_keystroke_starts_and_inactivity_stops() {
        let t0 = Instant::now();
        let mut indicator = TypingIndicator::default();

        assert_eq!(indicator.keystroke(t0), Some(TypingSignal::Start));
        assert_eq!(indicator.keystroke(t0 + 300 * MS), None);
        assert_eq!(indicator.poll(t0 + 2_000 * MS), None);
        assert_eq!(indicator.poll(t0 + 2_300 * MS), Some(TypingSignal::Stop));
        assert!(!indicator.is_typing());
        assert_eq!(indicator.poll(t0 + 5_000 * MS), None);
    }

    #[test]
    fn sustained_typing_refreshes_start() {
        let t0 = Instant::now();
        let mut indicator = TypingIndicator::default();

        indicator.keystroke(t0);
        assert_eq!(indicator.keystroke(t0 + 500 * MS), None);
        assert_eq!(indicator.keystroke(t0 + 1_000 * MS), Some(TypingSignal::Start));
        assert_eq!(indicator.keystroke(t0 + 1_400 * MS), None);
    }

    #[test]
    fn sending_stops_immediately() {
        let t0 = Instant::now();
        let mut indicator = TypingIndicator::default();
        indicator.keystroke(t0);
        assert_eq!(indicator.message_sent(), Some(TypingSignal::Stop));
        assert_eq!(indicator.message_sent(), None);
    }

    #[test]
    fn observed_typing_expires_without_stop() {
        let t0 = Instant::now();
        let coach = Uuid::new_v4();
        let mut observer = TypingObserver::default();

        observer.observe(coach, true, t0);
        assert!(observer.is_typing(coach, t0 + 1_999 * MS));
        assert!(!observer.is_typing(coach, t0 + 2_000 * MS));
        assert_eq!(observer.expire(t0 + 2_000 * MS), vec![coach]);
        assert!(observer.expire(t0 + 3_000 * MS).is_empty());
    }

    #[test]
    fn refresh_extends_and_stop_clears() {
        let t0 = Instant::now();
        let coach = Uuid::new_v4();
        let mut observer = TypingObserver::default();

        observer.observe(coach, true, t0);
        observer.observe(coach, true, t0 + 1_500 * MS);
        assert!(observer.is_typing(coach, t0 + 3_000 * MS));

        observer.observe(coach, false, t0 + 3_100 * MS);
        assert!(!observer.is_typing(coach, t0 + 3_100 * MS));
    }

    #[test]
    fn signal_frame_targets_receiver() {
        let receiver = Uuid::new_v4();
        let frame = TypingSignal::Stop.frame(receiver);
        assert_eq!(frame.event, "typing-stop");
        assert_eq!(frame.data["receiver_id"], receiver.to_string());
    }
}
