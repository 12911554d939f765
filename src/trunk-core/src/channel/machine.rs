// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Channel state machine for call lifecycle and squelch control.
//!
//! The machine is pure: every input takes the current instant and returns
//! the side effects the owner has to carry out, in order. Timer handling
//! and listener dispatch live in [`super::state::ChannelState`].

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Standard channel fade timeout.
pub const FADE_TIMEOUT_DELAY: Duration = Duration::from_millis(1000);
/// Delay between entering FADE and END.
pub const RESET_TIMEOUT_DELAY: Duration = Duration::from_millis(2000);
/// Default fade timeout on traffic channels.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Idle,
    Call,
    Data,
    Control,
    Encrypted,
    Fade,
    End,
}

impl State {
    /// Check whether a transition from `self` to `next` is legal.
    pub fn can_change_to(self, next: State) -> bool {
        match self {
            Self::Idle | Self::Control => true,
            Self::Call | Self::Data => matches!(
                next,
                Self::Call | Self::Control | Self::Data | Self::Encrypted | Self::Fade
            ),
            Self::Encrypted => next == Self::Fade,
            Self::Fade | Self::End => next != Self::Fade,
        }
    }

    /// States that carry traffic and are governed by the fade timeout.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Call | Self::Data | Self::Control | Self::Encrypted
        )
    }

    /// States on the way down to idle.
    pub fn is_ending(self) -> bool {
        matches!(self, Self::Idle | Self::Fade | Self::End)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Call => "CALL",
            Self::Data => "DATA",
            Self::Control => "CONTROL",
            Self::Encrypted => "ENCRYPTED",
            Self::Fade => "FADE",
            Self::End => "END",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SquelchState {
    Squelch,
    Unsquelch,
}

/// Decoder-originated events that drive the channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DecoderEvent {
    /// Open squelch permanently (analog/conventional monitoring).
    AlwaysUnsquelch,
    /// Replace the fade timeout for this channel.
    ChangeCallTimeout { timeout_ms: u64 },
    Continuation,
    Decode,
    End,
    Reset,
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStateEvent {
    #[serde(flatten)]
    pub event: DecoderEvent,
    #[serde(default)]
    pub state: State,
}

impl DecoderStateEvent {
    pub fn new(event: DecoderEvent, state: State) -> Self {
        Self { event, state }
    }
}

/// Side effect requested by a state machine input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    Squelch(SquelchState),
    StartMonitor,
    StopMonitor,
    /// Ask downstream decoders to reset.
    DecoderReset,
    MetadataReset,
    /// Traffic channel finished: release it and finalize its call event.
    CallEnd,
    StateChanged { old: State, new: State },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimeouts {
    pub fade: Duration,
    pub reset: Duration,
}

impl Default for ChannelTimeouts {
    fn default() -> Self {
        Self::standard()
    }
}

impl ChannelTimeouts {
    pub fn standard() -> Self {
        Self {
            fade: FADE_TIMEOUT_DELAY,
            reset: RESET_TIMEOUT_DELAY,
        }
    }

    /// Traffic channels fade after the call timeout and end without delay.
    pub fn traffic(call_timeout: Duration) -> Self {
        Self {
            fade: call_timeout,
            reset: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Standard,
    Traffic,
}

#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    state: State,
    channel_type: ChannelType,
    timeouts: ChannelTimeouts,
    fade_deadline: Option<Instant>,
    reset_deadline: Option<Instant>,
    squelch_locked: bool,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl ChannelStateMachine {
    pub fn new(channel_type: ChannelType, timeouts: ChannelTimeouts) -> Self {
        Self {
            state: State::Idle,
            channel_type,
            timeouts,
            fade_deadline: None,
            reset_deadline: None,
            squelch_locked: false,
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn timeouts(&self) -> ChannelTimeouts {
        self.timeouts
    }

    pub fn is_squelch_locked(&self) -> bool {
        self.squelch_locked
    }

    pub fn fade_deadline(&self) -> Option<Instant> {
        self.fade_deadline
    }

    /// Get the number of state transitions that have occurred.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Get the time since the last transition.
    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Request a state change.
    ///
    /// Re-entering the current active state only refreshes the fade timeout.
    /// Illegal transitions are ignored and return no actions.
    pub fn set_state(&mut self, next: State, now: Instant) -> Vec<ChannelAction> {
        let mut actions = Vec::new();

        if next == self.state {
            if self.state.is_active() {
                self.update_fade_timeout(now);
            }
            return actions;
        }

        if !self.state.can_change_to(next) {
            return actions;
        }

        match next {
            State::Control | State::Data | State::Encrypted => {
                self.squelch(&mut actions, SquelchState::Squelch);
                self.update_fade_timeout(now);
            }
            State::Call => {
                self.squelch(&mut actions, SquelchState::Unsquelch);
                self.update_fade_timeout(now);
            }
            State::Fade => {
                self.squelch(&mut actions, SquelchState::Squelch);
                self.reset_deadline = Some(now + self.timeouts.reset);
            }
            State::End => {
                self.squelch(&mut actions, SquelchState::Squelch);
                actions.push(ChannelAction::DecoderReset);
                actions.push(ChannelAction::MetadataReset);
            }
            State::Idle => {
                self.squelch(&mut actions, SquelchState::Squelch);
                self.fade_deadline = None;
                self.reset_deadline = None;
                actions.push(ChannelAction::StopMonitor);
                if self.channel_type == ChannelType::Traffic {
                    actions.push(ChannelAction::CallEnd);
                }
            }
        }

        let old = self.state;
        self.state = next;
        self.transition_count += 1;
        self.last_transition = Some(now);
        actions.push(ChannelAction::StateChanged { old, new: next });

        if next != State::Idle {
            actions.push(ChannelAction::StartMonitor);
        }
        actions
    }

    /// Monitor tick: advance timeout-driven transitions.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<ChannelAction> {
        match self.state {
            State::Idle => Vec::new(),
            State::Fade => {
                if self.reset_deadline.map_or(true, |deadline| deadline <= now) {
                    self.set_state(State::End, now)
                } else {
                    Vec::new()
                }
            }
            State::End => self.set_state(State::Idle, now),
            _ => {
                if self.fade_deadline.map_or(true, |deadline| deadline <= now) {
                    self.set_state(State::Fade, now)
                } else {
                    Vec::new()
                }
            }
        }
    }

    pub fn process_decoder_event(
        &mut self,
        event: &DecoderStateEvent,
        now: Instant,
    ) -> Vec<ChannelAction> {
        match event.event {
            DecoderEvent::AlwaysUnsquelch => {
                let mut actions = Vec::new();
                self.squelch(&mut actions, SquelchState::Unsquelch);
                self.squelch_locked = true;
                actions
            }
            DecoderEvent::ChangeCallTimeout { timeout_ms } => {
                self.timeouts.fade = Duration::from_millis(timeout_ms);
                if self.state.is_active() {
                    self.fade_deadline = Some(now + self.timeouts.fade);
                }
                Vec::new()
            }
            DecoderEvent::Continuation | DecoderEvent::Decode => {
                if self.state.is_ending() {
                    self.set_state(event.state, now)
                } else {
                    self.update_fade_timeout(now);
                    Vec::new()
                }
            }
            DecoderEvent::End => self.set_state(State::Fade, now),
            DecoderEvent::Reset => Vec::new(),
            DecoderEvent::Start => self.set_state(event.state, now),
        }
    }

    /// Push the fade deadline out to `now + fade`; never pulls it in.
    fn update_fade_timeout(&mut self, now: Instant) {
        let deadline = now + self.timeouts.fade;
        if self.fade_deadline.map_or(true, |current| deadline > current) {
            self.fade_deadline = Some(deadline);
        }
    }

    fn squelch(&self, actions: &mut Vec<ChannelAction>, squelch: SquelchState) {
        if !self.squelch_locked {
            actions.push(ChannelAction::Squelch(squelch));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [State; 7] = [
        State::Idle,
        State::Call,
        State::Data,
        State::Control,
        State::Encrypted,
        State::Fade,
        State::End,
    ];

    fn standard() -> ChannelStateMachine {
        ChannelStateMachine::new(ChannelType::Standard, ChannelTimeouts::standard())
    }

    #[test]
    fn test_initial_state() {
        let sm = standard();
        assert_eq!(sm.state(), State::Idle);
        assert_eq!(sm.transition_count(), 0);
        assert!(sm.time_in_state().is_none());
    }

    #[test]
    fn test_idle_accepts_any_state() {
        for next in ALL {
            assert!(State::Idle.can_change_to(next));
            let mut sm = standard();
            sm.set_state(next, Instant::now());
            assert_eq!(sm.state(), next);
        }
    }

    #[test]
    fn test_encrypted_only_fades() {
        let now = Instant::now();
        let mut sm = standard();
        sm.set_state(State::Encrypted, now);
        assert!(sm.set_state(State::Call, now).is_empty());
        assert_eq!(sm.state(), State::Encrypted);
        sm.set_state(State::Fade, now);
        assert_eq!(sm.state(), State::Fade);
    }

    #[test]
    fn test_transition_table() {
        for from in ALL {
            for to in ALL {
                let expected = match from {
                    State::Idle | State::Control => true,
                    State::Call | State::Data => !matches!(to, State::Idle | State::End),
                    State::Encrypted => to == State::Fade,
                    State::Fade | State::End => to != State::Fade,
                };
                assert_eq!(from.can_change_to(to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_call_entry_actions() {
        let mut sm = standard();
        let actions = sm.set_state(State::Call, Instant::now());
        assert_eq!(
            actions,
            vec![
                ChannelAction::Squelch(SquelchState::Unsquelch),
                ChannelAction::StateChanged {
                    old: State::Idle,
                    new: State::Call
                },
                ChannelAction::StartMonitor,
            ]
        );
    }

    #[test]
    fn test_timeout_sequence_to_idle() {
        let t0 = Instant::now();
        let mut sm = standard();
        sm.set_state(State::Call, t0);

        assert!(sm.check_timeouts(t0 + Duration::from_millis(500)).is_empty());
        assert_eq!(sm.state(), State::Call);

        sm.check_timeouts(t0 + Duration::from_millis(1000));
        assert_eq!(sm.state(), State::Fade);

        assert!(sm.check_timeouts(t0 + Duration::from_millis(2000)).is_empty());
        let actions = sm.check_timeouts(t0 + Duration::from_millis(3000));
        assert_eq!(sm.state(), State::End);
        assert!(actions.contains(&ChannelAction::DecoderReset));
        assert!(actions.contains(&ChannelAction::MetadataReset));

        let actions = sm.check_timeouts(t0 + Duration::from_millis(3020));
        assert_eq!(sm.state(), State::Idle);
        assert!(actions.contains(&ChannelAction::StopMonitor));
        assert!(!actions.contains(&ChannelAction::CallEnd));
        assert_eq!(sm.transition_count(), 4);
    }

    #[test]
    fn test_reentering_state_refreshes_fade() {
        let t0 = Instant::now();
        let mut sm = standard();
        sm.set_state(State::Call, t0);
        let actions = sm.set_state(State::Call, t0 + Duration::from_millis(800));
        assert!(actions.is_empty());
        assert_eq!(sm.transition_count(), 1);

        sm.check_timeouts(t0 + Duration::from_millis(1200));
        assert_eq!(sm.state(), State::Call);
        sm.check_timeouts(t0 + Duration::from_millis(1800));
        assert_eq!(sm.state(), State::Fade);
    }

    #[test]
    fn test_fade_timeout_never_shrinks() {
        let t0 = Instant::now();
        let mut sm = standard();
        sm.set_state(State::Call, t0 + Duration::from_millis(500));
        let deadline = sm.fade_deadline();
        sm.set_state(State::Call, t0);
        assert_eq!(sm.fade_deadline(), deadline);
    }

    #[test]
    fn test_traffic_channel_ends_with_call_end() {
        let t0 = Instant::now();
        let mut sm = ChannelStateMachine::new(
            ChannelType::Traffic,
            ChannelTimeouts::traffic(Duration::from_secs(2)),
        );
        sm.set_state(State::Call, t0);
        sm.check_timeouts(t0 + Duration::from_secs(2));
        assert_eq!(sm.state(), State::Fade);
        // Traffic reset timeout is zero.
        sm.check_timeouts(t0 + Duration::from_secs(2));
        assert_eq!(sm.state(), State::End);
        let actions = sm.check_timeouts(t0 + Duration::from_secs(2));
        assert!(actions.contains(&ChannelAction::CallEnd));
    }

    #[test]
    fn test_traffic_channel_control_still_tears_down() {
        let t0 = Instant::now();
        let mut sm = ChannelStateMachine::new(
            ChannelType::Traffic,
            ChannelTimeouts::traffic(Duration::from_secs(3)),
        );
        let actions = sm.set_state(State::Control, t0);
        assert_eq!(sm.state(), State::Control);
        assert!(actions.contains(&ChannelAction::StartMonitor));
        assert!(actions.contains(&ChannelAction::StateChanged {
            old: State::Idle,
            new: State::Control,
        }));

        let t1 = t0 + Duration::from_secs(3);
        sm.check_timeouts(t1);
        assert_eq!(sm.state(), State::Fade);
        sm.check_timeouts(t1);
        assert_eq!(sm.state(), State::End);
        let actions = sm.check_timeouts(t1);
        assert_eq!(sm.state(), State::Idle);
        assert!(actions.contains(&ChannelAction::CallEnd));
        assert!(actions.contains(&ChannelAction::StopMonitor));
    }

    #[test]
    fn test_always_unsquelch_locks_squelch() {
        let t0 = Instant::now();
        let mut sm = standard();
        let actions = sm.process_decoder_event(
            &DecoderStateEvent::new(DecoderEvent::AlwaysUnsquelch, State::Idle),
            t0,
        );
        assert_eq!(actions, vec![ChannelAction::Squelch(SquelchState::Unsquelch)]);
        assert!(sm.is_squelch_locked());

        let actions = sm.set_state(State::Data, t0);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, ChannelAction::Squelch(_))));
    }

    #[test]
    fn test_decoder_events() {
        let t0 = Instant::now();
        let mut sm = standard();

        sm.process_decoder_event(&DecoderStateEvent::new(DecoderEvent::Decode, State::Call), t0);
        assert_eq!(sm.state(), State::Call);

        // In an active state a continuation only refreshes the fade timeout.
        sm.process_decoder_event(
            &DecoderStateEvent::new(DecoderEvent::Continuation, State::Data),
            t0 + Duration::from_millis(900),
        );
        assert_eq!(sm.state(), State::Call);
        sm.check_timeouts(t0 + Duration::from_millis(1500));
        assert_eq!(sm.state(), State::Call);

        sm.process_decoder_event(&DecoderStateEvent::new(DecoderEvent::Reset, State::Idle), t0);
        assert_eq!(sm.state(), State::Call);

        sm.process_decoder_event(&DecoderStateEvent::new(DecoderEvent::End, State::Idle), t0);
        assert_eq!(sm.state(), State::Fade);

        sm.process_decoder_event(&DecoderStateEvent::new(DecoderEvent::Start, State::Data), t0);
        assert_eq!(sm.state(), State::Data);
    }

    #[test]
    fn test_change_call_timeout() {
        let t0 = Instant::now();
        let mut sm = standard();
        sm.set_state(State::Call, t0);
        sm.process_decoder_event(
            &DecoderStateEvent::new(
                DecoderEvent::ChangeCallTimeout { timeout_ms: 5000 },
                State::Call,
            ),
            t0,
        );
        assert_eq!(sm.timeouts().fade, Duration::from_secs(5));
        sm.check_timeouts(t0 + Duration::from_secs(4));
        assert_eq!(sm.state(), State::Call);
    }

    #[test]
    fn test_decoder_event_json() {
        let event: DecoderStateEvent =
            serde_json::from_str(r#"{"event":"start","state":"call"}"#).unwrap();
        assert_eq!(event, DecoderStateEvent::new(DecoderEvent::Start, State::Call));
        let event: DecoderStateEvent =
            serde_json::from_str(r#"{"event":"change_call_timeout","timeout_ms":10}"#).unwrap();
        assert_eq!(event.state, State::Idle);
    }
}
