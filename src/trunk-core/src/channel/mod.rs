// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod call_event;
pub mod events;
pub mod machine;
pub mod state;
pub mod traffic;

pub use call_event::{CallEvent, CallEventType};
pub use events::{ChannelEventListener, TrafficChannelStatusListener};
pub use machine::{
    ChannelAction, ChannelStateMachine, ChannelTimeouts, ChannelType, DecoderEvent,
    DecoderStateEvent, SquelchState, State,
};
pub use state::ChannelState;
pub use traffic::{ChannelModel, TrafficChannel, TrafficChannelManager};
