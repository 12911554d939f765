// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Typed identifiers extracted from decoded trunking traffic.
//!
//! Decoders are opaque producers of identifiers; this module only models
//! the values they produce and the collection attached to each audio
//! segment.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad category of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierClass {
    /// Describes the decoder/channel configuration (system, site, channel...)
    Configuration,
    /// Describes a party to the call (talkgroup, radio, patch group...)
    User,
}

/// Which side of a call an identifier belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    From,
    To,
    #[default]
    Any,
}

/// Identifier form, independent of the carried value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Form {
    Talkgroup,
    Radio,
    PatchGroup,
    System,
    Site,
    Channel,
    ChannelFrequency,
    DecoderType,
    EncryptionKey,
    AliasList,
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Talkgroup => "Talkgroup",
            Self::Radio => "Radio",
            Self::PatchGroup => "Patch Group",
            Self::System => "System",
            Self::Site => "Site",
            Self::Channel => "Channel",
            Self::ChannelFrequency => "Frequency",
            Self::DecoderType => "Decoder",
            Self::EncryptionKey => "Encryption Key",
            Self::AliasList => "Alias List",
        };
        write!(f, "{}", name)
    }
}

/// Value carried by an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentifierValue {
    Talkgroup {
        value: u32,
    },
    Radio {
        value: u32,
    },
    /// A temporary grouping of talkgroups addressed through one patch talkgroup.
    PatchGroup {
        talkgroup: u32,
        #[serde(default)]
        patched_talkgroups: Vec<u32>,
    },
    System {
        name: String,
    },
    Site {
        name: String,
    },
    Channel {
        name: String,
    },
    Frequency {
        hz: u64,
    },
    DecoderType {
        protocol: String,
    },
    EncryptionKey {
        key_id: u32,
        encrypted: bool,
    },
    AliasList {
        name: String,
    },
}

impl IdentifierValue {
    pub fn form(&self) -> Form {
        match self {
            Self::Talkgroup { .. } => Form::Talkgroup,
            Self::Radio { .. } => Form::Radio,
            Self::PatchGroup { .. } => Form::PatchGroup,
            Self::System { .. } => Form::System,
            Self::Site { .. } => Form::Site,
            Self::Channel { .. } => Form::Channel,
            Self::Frequency { .. } => Form::ChannelFrequency,
            Self::DecoderType { .. } => Form::DecoderType,
            Self::EncryptionKey { .. } => Form::EncryptionKey,
            Self::AliasList { .. } => Form::AliasList,
        }
    }

    pub fn class(&self) -> IdentifierClass {
        match self {
            Self::Talkgroup { .. }
            | Self::Radio { .. }
            | Self::PatchGroup { .. }
            | Self::EncryptionKey { .. } => IdentifierClass::User,
            _ => IdentifierClass::Configuration,
        }
    }
}

impl fmt::Display for IdentifierValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Talkgroup { value } | Self::Radio { value } => write!(f, "{}", value),
            Self::PatchGroup {
                talkgroup,
                patched_talkgroups,
            } => {
                write!(f, "P:{}", talkgroup)?;
                if !patched_talkgroups.is_empty() {
                    let patched: Vec<String> =
                        patched_talkgroups.iter().map(|tg| tg.to_string()).collect();
                    write!(f, "[{}]", patched.join(","))?;
                }
                Ok(())
            }
            Self::System { name }
            | Self::Site { name }
            | Self::Channel { name }
            | Self::AliasList { name } => write!(f, "{}", name),
            Self::Frequency { hz } => write!(f, "{}", hz),
            Self::DecoderType { protocol } => write!(f, "{}", protocol),
            Self::EncryptionKey { key_id, .. } => write!(f, "KEY:{}", key_id),
        }
    }
}

/// A role-tagged identifier value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(flatten)]
    pub value: IdentifierValue,
    #[serde(default)]
    pub role: Role,
}

impl Identifier {
    pub fn new(value: IdentifierValue, role: Role) -> Self {
        Self { value, role }
    }

    pub fn talkgroup(value: u32, role: Role) -> Self {
        Self::new(IdentifierValue::Talkgroup { value }, role)
    }

    pub fn radio(value: u32, role: Role) -> Self {
        Self::new(IdentifierValue::Radio { value }, role)
    }

    pub fn patch_group(talkgroup: u32, patched_talkgroups: Vec<u32>) -> Self {
        Self::new(
            IdentifierValue::PatchGroup {
                talkgroup,
                patched_talkgroups,
            },
            Role::To,
        )
    }

    pub fn system(name: impl Into<String>) -> Self {
        Self::new(IdentifierValue::System { name: name.into() }, Role::Any)
    }

    pub fn site(name: impl Into<String>) -> Self {
        Self::new(IdentifierValue::Site { name: name.into() }, Role::Any)
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self::new(IdentifierValue::Channel { name: name.into() }, Role::Any)
    }

    pub fn frequency(hz: u64) -> Self {
        Self::new(IdentifierValue::Frequency { hz }, Role::Any)
    }

    pub fn decoder_type(protocol: impl Into<String>) -> Self {
        Self::new(
            IdentifierValue::DecoderType {
                protocol: protocol.into(),
            },
            Role::Any,
        )
    }

    pub fn encryption_key(key_id: u32, encrypted: bool) -> Self {
        Self::new(IdentifierValue::EncryptionKey { key_id, encrypted }, Role::Any)
    }

    pub fn alias_list(name: impl Into<String>) -> Self {
        Self::new(IdentifierValue::AliasList { name: name.into() }, Role::Any)
    }

    pub fn form(&self) -> Form {
        self.value.form()
    }

    pub fn class(&self) -> IdentifierClass {
        self.value.class()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Ordered set of identifiers for one call.
///
/// `update` keeps at most one identifier per (class, form, role) key,
/// `add` appends without replacing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierCollection {
    identifiers: Vec<Identifier>,
}

impl IdentifierCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_identifiers(identifiers: Vec<Identifier>) -> Self {
        let mut collection = Self::new();
        for identifier in identifiers {
            collection.update(identifier);
        }
        collection
    }

    /// Replace the identifier with the same class, form and role, or append it.
    /// Returns true when the collection changed.
    pub fn update(&mut self, identifier: Identifier) -> bool {
        let existing = self.identifiers.iter_mut().find(|id| {
            id.class() == identifier.class()
                && id.form() == identifier.form()
                && id.role == identifier.role
        });
        match existing {
            Some(id) if *id == identifier => false,
            Some(id) => {
                *id = identifier;
                true
            }
            None => {
                self.identifiers.push(identifier);
                true
            }
        }
    }

    /// Append an identifier unless an identical one is already present.
    pub fn add(&mut self, identifier: Identifier) -> bool {
        if self.contains(&identifier) {
            return false;
        }
        self.identifiers.push(identifier);
        true
    }

    pub fn remove(&mut self, identifier: &Identifier) -> bool {
        let before = self.identifiers.len();
        self.identifiers.retain(|id| id != identifier);
        before != self.identifiers.len()
    }

    pub fn remove_class(&mut self, class: IdentifierClass) {
        self.identifiers.retain(|id| id.class() != class);
    }

    pub fn clear(&mut self) {
        self.identifiers.clear();
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.identifiers.contains(identifier)
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn identifier(&self, class: IdentifierClass, form: Form, role: Role) -> Option<&Identifier> {
        self.identifiers
            .iter()
            .find(|id| id.class() == class && id.form() == form && id.role == role)
    }

    pub fn identifiers_by_role(&self, role: Role) -> Vec<Identifier> {
        self.identifiers
            .iter()
            .filter(|id| id.role == role)
            .cloned()
            .collect()
    }

    /// Primary TO identifier: patch group, then talkgroup, then anything else.
    pub fn to_identifier(&self) -> Option<&Identifier> {
        self.first_with_role(Role::To, &[Form::PatchGroup, Form::Talkgroup])
    }

    /// Primary FROM identifier: radio first.
    pub fn from_identifier(&self) -> Option<&Identifier> {
        self.first_with_role(Role::From, &[Form::Radio])
    }

    fn first_with_role(&self, role: Role, preferred: &[Form]) -> Option<&Identifier> {
        preferred
            .iter()
            .find_map(|form| {
                self.identifiers
                    .iter()
                    .find(|id| id.role == role && id.form() == *form)
            })
            .or_else(|| self.identifiers.iter().find(|id| id.role == role))
    }

    pub fn system_name(&self) -> Option<&str> {
        match self.configuration(Form::System) {
            Some(IdentifierValue::System { name }) => Some(name),
            _ => None,
        }
    }

    pub fn site_name(&self) -> Option<&str> {
        match self.configuration(Form::Site) {
            Some(IdentifierValue::Site { name }) => Some(name),
            _ => None,
        }
    }

    pub fn channel_name(&self) -> Option<&str> {
        match self.configuration(Form::Channel) {
            Some(IdentifierValue::Channel { name }) => Some(name),
            _ => None,
        }
    }

    pub fn frequency_hz(&self) -> Option<u64> {
        match self.configuration(Form::ChannelFrequency) {
            Some(IdentifierValue::Frequency { hz }) => Some(*hz),
            _ => None,
        }
    }

    pub fn protocol(&self) -> Option<&str> {
        match self.configuration(Form::DecoderType) {
            Some(IdentifierValue::DecoderType { protocol }) => Some(protocol),
            _ => None,
        }
    }

    fn configuration(&self, form: Form) -> Option<&IdentifierValue> {
        self.identifier(IdentifierClass::Configuration, form, Role::Any)
            .map(|id| &id.value)
    }
}

/// Kind of change announced by an identifier update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    SilentAdd,
    Remove,
    SilentRemove,
}

impl Operation {
    pub fn is_add(self) -> bool {
        matches!(self, Self::Add | Self::SilentAdd)
    }
}

/// Late-arriving identifier change published by a decoder for one timeslot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierUpdateNotification {
    pub identifier: Identifier,
    pub operation: Operation,
    #[serde(default)]
    pub timeslot: u8,
}

impl IdentifierUpdateNotification {
    pub fn new(identifier: Identifier, operation: Operation, timeslot: u8) -> Self {
        Self {
            identifier,
            operation,
            timeslot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_replaces_same_form_and_role() {
        let mut ids = IdentifierCollection::new();
        assert!(ids.update(Identifier::talkgroup(100, Role::To)));
        assert!(ids.update(Identifier::talkgroup(200, Role::To)));
        assert!(!ids.update(Identifier::talkgroup(200, Role::To)));
        assert_eq!(ids.len(), 1);
        assert_eq!(
            ids.to_identifier(),
            Some(&Identifier::talkgroup(200, Role::To))
        );
    }

    #[test]
    fn test_add_keeps_both_values() {
        let mut ids = IdentifierCollection::new();
        ids.update(Identifier::talkgroup(100, Role::To));
        assert!(ids.add(Identifier::talkgroup(200, Role::To)));
        assert!(!ids.add(Identifier::talkgroup(200, Role::To)));
        assert_eq!(ids.identifiers_by_role(Role::To).len(), 2);
    }

    #[test]
    fn test_to_identifier_prefers_patch_group() {
        let ids = IdentifierCollection::from_identifiers(vec![
            Identifier::talkgroup(100, Role::To),
            Identifier::patch_group(500, vec![100, 101]),
            Identifier::radio(7, Role::From),
        ]);
        assert_eq!(ids.to_identifier().map(|id| id.form()), Some(Form::PatchGroup));
        assert_eq!(ids.from_identifier(), Some(&Identifier::radio(7, Role::From)));
    }

    #[test]
    fn test_configuration_lookups() {
        let ids = IdentifierCollection::from_identifiers(vec![
            Identifier::system("Metro"),
            Identifier::site("North"),
            Identifier::frequency(851_012_500),
            Identifier::decoder_type("P25 Phase 1"),
        ]);
        assert_eq!(ids.system_name(), Some("Metro"));
        assert_eq!(ids.site_name(), Some("North"));
        assert_eq!(ids.frequency_hz(), Some(851_012_500));
        assert_eq!(ids.protocol(), Some("P25 Phase 1"));
        assert_eq!(ids.channel_name(), None);
    }

    #[test]
    fn test_identifier_json_shape() {
        let id: Identifier =
            serde_json::from_str(r#"{"kind":"talkgroup","value":100,"role":"to"}"#).unwrap();
        assert_eq!(id, Identifier::talkgroup(100, Role::To));

        let sys: Identifier = serde_json::from_str(r#"{"kind":"system","name":"Metro"}"#).unwrap();
        assert_eq!(sys.role, Role::Any);
        assert_eq!(sys.class(), IdentifierClass::Configuration);
    }

    #[test]
    fn test_remove_class() {
        let mut ids = IdentifierCollection::from_identifiers(vec![
            Identifier::system("Metro"),
            Identifier::talkgroup(1, Role::To),
        ]);
        ids.remove_class(IdentifierClass::Configuration);
        assert_eq!(ids.len(), 1);
        assert!(ids.remove(&Identifier::talkgroup(1, Role::To)));
        assert!(ids.is_empty());
    }
}
