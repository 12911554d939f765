// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod alias;
pub mod audio;
pub mod call;
pub mod channel;
pub mod events;
pub mod identifier;
pub mod schedule;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use alias::{Alias, AliasId, AliasList};
pub use audio::{AudioSegment, AudioSegmentBroadcaster, AudioSegmentFactory, SegmentLease};
pub use call::{Call, CallEventEmitter, CallEventListener, CallRepository, RepositoryError};
pub use events::ListenerId;
pub use identifier::{Identifier, IdentifierCollection, Role};
pub use schedule::{ScheduledTask, Scheduler};
