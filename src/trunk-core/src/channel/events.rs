// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Channel event notification.

use super::call_event::CallEvent;
use super::machine::{DecoderStateEvent, SquelchState, State};

/// Trait for components that want to receive channel events.
///
/// All methods have default no-op implementations, so listeners can
/// selectively override only the events they care about.
pub trait ChannelEventListener: Send + Sync {
    /// Called when the channel state machine transitions.
    fn on_state_change(&self, _channel: &str, _old: State, _new: State) {}

    /// Called when audio squelch should open or close.
    fn on_squelch(&self, _channel: &str, _squelch: SquelchState) {}

    /// Called when the channel asks its decoders to change state.
    fn on_decoder_state_event(&self, _channel: &str, _event: &DecoderStateEvent) {}

    /// Called when channel metadata should be cleared.
    fn on_metadata_reset(&self, _channel: &str) {}

    /// Called when a call event starts, is downgraded, or ends.
    fn on_call_event(&self, _event: &CallEvent) {}
}

/// Receives notice that a traffic channel's call has ended.
pub trait TrafficChannelStatusListener: Send + Sync {
    fn call_end(&self, channel: &str);
}
