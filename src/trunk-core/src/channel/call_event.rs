// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Call events announced by control channels and traffic channels.

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventType {
    #[default]
    Call,
    GroupCall,
    PatchGroupCall,
    UnitToUnitCall,
    DataCall,
    EncryptedCall,
    /// Call observed on the control channel but not followed on a traffic channel.
    CallDetect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallEvent {
    pub event_type: CallEventType,
    /// Channel number assigned by the control channel.
    pub channel: Option<String>,
    /// Traffic channel frequency in Hz, 0 when unknown.
    pub frequency: u64,
    pub protocol: Option<String>,
    pub to: Option<Identifier>,
    pub from: Option<Identifier>,
    pub details: Option<String>,
    /// Milliseconds since the epoch.
    pub event_start: u64,
    pub event_end: Option<u64>,
}

impl CallEvent {
    pub fn new(event_type: CallEventType, channel: impl Into<String>, frequency: u64) -> Self {
        Self {
            event_type,
            channel: Some(channel.into()),
            frequency,
            ..Self::default()
        }
    }

    /// Key used to track the channel this event occupies.
    pub fn channel_key(&self) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| self.frequency.to_string())
    }

    /// Same type, channel, TO and FROM.
    pub fn is_same_call_event(&self, other: &CallEvent) -> bool {
        self.event_type == other.event_type
            && self.channel == other.channel
            && self.to == other.to
            && self.from == other.from
    }

    /// Prefix `reason` onto the details once.
    pub fn add_reason(&mut self, reason: &str) {
        match self.details.as_deref() {
            Some(details) if details.contains(reason) => {}
            Some(details) if !details.is_empty() => {
                self.details = Some(format!("{} : {}", reason, details));
            }
            _ => self.details = Some(reason.to_string()),
        }
    }

    /// Downgrade to a detect-only event with the given reason.
    pub fn downgrade_to_detect(&mut self, reason: &str) {
        self.event_type = CallEventType::CallDetect;
        self.add_reason(reason);
    }

    pub fn end(&mut self, at: u64) {
        if self.event_end.is_none() {
            self.event_end = Some(at);
        }
    }

    pub fn is_ended(&self) -> bool {
        self.event_end.is_some()
    }
}
