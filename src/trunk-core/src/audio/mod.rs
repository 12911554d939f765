// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod broadcaster;
pub mod segment;

pub use broadcaster::{AudioSegmentBroadcaster, AudioSegmentReceiver};
pub use segment::{
    now_millis, AudioSegment, AudioSegmentFactory, AudioSegmentListener, SegmentError,
    SegmentLease, SAMPLES_PER_MS,
};
