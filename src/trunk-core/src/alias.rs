// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! User-defined aliases matched against call identifiers.

use serde::{Deserialize, Serialize};

use crate::identifier::{Identifier, IdentifierValue};

/// Playback priority that suppresses monitoring entirely.
pub const DO_NOT_MONITOR: i32 = -1;
/// Highest selectable playback priority.
pub const MIN_PRIORITY: i32 = 1;
/// Lowest selectable playback priority.
pub const MAX_PRIORITY: i32 = 100;
/// Priority of identifiers with no matching alias.
pub const DEFAULT_PRIORITY: i32 = 101;

/// A single identifier pattern an alias answers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AliasId {
    Talkgroup { value: u32 },
    TalkgroupRange { min: u32, max: u32 },
    Radio { value: u32 },
}

impl AliasId {
    fn matches_talkgroup(&self, talkgroup: u32) -> bool {
        match self {
            Self::Talkgroup { value } => *value == talkgroup,
            Self::TalkgroupRange { min, max } => (*min..=*max).contains(&talkgroup),
            Self::Radio { .. } => false,
        }
    }

    fn matches_radio(&self, radio: u32) -> bool {
        matches!(self, Self::Radio { value } if *value == radio)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alias {
    pub name: String,
    /// Calls to or from this alias are recorded.
    pub recordable: bool,
    /// Streaming targets for calls matching this alias.
    pub broadcast_channels: Vec<String>,
    /// Lower is more important; `DO_NOT_MONITOR` suppresses playback.
    pub playback_priority: i32,
    pub ids: Vec<AliasId>,
}

impl Default for Alias {
    fn default() -> Self {
        Self {
            name: String::new(),
            recordable: false,
            broadcast_channels: Vec::new(),
            playback_priority: DEFAULT_PRIORITY,
            ids: Vec::new(),
        }
    }
}

impl Alias {
    pub fn new(name: impl Into<String>, ids: Vec<AliasId>) -> Self {
        Self {
            name: name.into(),
            ids,
            ..Self::default()
        }
    }

    pub fn is_do_not_monitor(&self) -> bool {
        self.playback_priority <= DO_NOT_MONITOR
    }

    fn matches(&self, identifier: &Identifier) -> bool {
        match &identifier.value {
            IdentifierValue::Talkgroup { value } => {
                self.ids.iter().any(|id| id.matches_talkgroup(*value))
            }
            IdentifierValue::Radio { value } => self.ids.iter().any(|id| id.matches_radio(*value)),
            IdentifierValue::PatchGroup {
                talkgroup,
                patched_talkgroups,
            } => self.ids.iter().any(|id| {
                id.matches_talkgroup(*talkgroup)
                    || patched_talkgroups.iter().any(|tg| id.matches_talkgroup(*tg))
            }),
            _ => false,
        }
    }
}

/// Named set of aliases shared by the segments of one channel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasList {
    pub name: String,
    pub aliases: Vec<Alias>,
}

impl AliasList {
    pub fn new(name: impl Into<String>, aliases: Vec<Alias>) -> Self {
        Self {
            name: name.into(),
            aliases,
        }
    }

    /// Aliases matching the identifier. Patch groups match through the
    /// patch talkgroup and every patched talkgroup.
    pub fn aliases_for(&self, identifier: &Identifier) -> Vec<&Alias> {
        self.aliases.iter().filter(|a| a.matches(identifier)).collect()
    }

    /// Joined alias names for display, `None` when nothing matches.
    pub fn alias_names(&self, identifier: &Identifier) -> Option<String> {
        let names: Vec<&str> = self
            .aliases_for(identifier)
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names.join(";"))
        }
    }

    /// True when any alias of the identifier is at or below the threshold.
    pub fn is_do_not_monitor(&self, identifier: &Identifier, threshold: i32) -> bool {
        self.aliases_for(identifier)
            .iter()
            .any(|a| a.playback_priority <= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Role;

    fn list() -> AliasList {
        AliasList::new(
            "test",
            vec![
                Alias {
                    recordable: true,
                    playback_priority: 10,
                    ..Alias::new("Fire Dispatch", vec![AliasId::Talkgroup { value: 100 }])
                },
                Alias::new("Ops", vec![AliasId::TalkgroupRange { min: 200, max: 299 }]),
                Alias {
                    playback_priority: DO_NOT_MONITOR,
                    ..Alias::new("Engine 7", vec![AliasId::Radio { value: 7007 }])
                },
            ],
        )
    }

    #[test]
    fn test_talkgroup_and_range_match() {
        let list = list();
        let tg = Identifier::talkgroup(100, Role::To);
        assert_eq!(list.aliases_for(&tg).len(), 1);
        assert_eq!(
            list.alias_names(&Identifier::talkgroup(250, Role::To)),
            Some("Ops".to_string())
        );
        assert!(list.aliases_for(&Identifier::talkgroup(300, Role::To)).is_empty());
    }

    #[test]
    fn test_radio_does_not_match_talkgroup_alias() {
        let list = list();
        assert!(list.aliases_for(&Identifier::radio(100, Role::From)).is_empty());
        assert!(list.is_do_not_monitor(&Identifier::radio(7007, Role::From), DO_NOT_MONITOR));
    }

    #[test]
    fn test_patch_group_matches_patched_talkgroups() {
        let list = list();
        let patch = Identifier::patch_group(900, vec![100, 250]);
        assert_eq!(
            list.alias_names(&patch),
            Some("Fire Dispatch;Ops".to_string())
        );
    }

    #[test]
    fn test_default_priority() {
        assert_eq!(Alias::default().playback_priority, DEFAULT_PRIORITY);
        assert!(!Alias::default().is_do_not_monitor());
    }
}
