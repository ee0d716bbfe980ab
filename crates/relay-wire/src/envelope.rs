//! Typed, validated wrappers around the protobuf envelope/content tree.
//!
//! The wire messages in `proto/relay.proto` make almost every field
//! `optional` (proto3's way of expressing "this was never a required
//! field and never will be"). The receive pipeline doesn't want to carry
//! that optionality through every call site, so each type here either
//! fills in the documented default or rejects the message outright
//! (`Envelope`'s legacyBody/content exclusivity, for instance).

use prost::Message;
use thiserror::Error;

use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    Unknown,
    Ciphertext,
    PrekeyBundle,
    Receipt,
}

impl From<wire::envelope::Type> for EnvelopeType {
    fn from(t: wire::envelope::Type) -> Self {
        match t {
            wire::envelope::Type::Unknown => EnvelopeType::Unknown,
            wire::envelope::Type::Ciphertext => EnvelopeType::Ciphertext,
            wire::envelope::Type::PrekeyBundle => EnvelopeType::PrekeyBundle,
            wire::envelope::Type::Receipt => EnvelopeType::Receipt,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope missing source address")]
    MissingSource,
    #[error("envelope carries neither legacyBody nor content")]
    EmptyBody,
    #[error("envelope carries both legacyBody and content")]
    AmbiguousBody,
    #[error("failed to decode protobuf envelope: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// A wire-level encrypted record, decoded but not yet decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub envelope_type: EnvelopeType,
    pub source: String,
    pub source_device: u32,
    pub timestamp: u64,
    pub legacy_body: Option<Vec<u8>>,
    pub content: Option<Vec<u8>>,
}

impl Envelope {
    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeError> {
        Envelope::try_from(wire::Envelope::decode(buf)?)
    }

    /// The ciphertext to hand to the session cipher, from whichever of
    /// `legacyBody`/`content` is present.
    pub fn ciphertext(&self) -> &[u8] {
        self.content
            .as_deref()
            .or(self.legacy_body.as_deref())
            .unwrap_or(&[])
    }
}

impl TryFrom<wire::Envelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(e: wire::Envelope) -> Result<Self, EnvelopeError> {
        match (&e.legacy_body, &e.content) {
            (None, None) => return Err(EnvelopeError::EmptyBody),
            (Some(_), Some(_)) => return Err(EnvelopeError::AmbiguousBody),
            _ => {}
        }
        Ok(Envelope {
            envelope_type: EnvelopeType::from(e.r#type()),
            source: e.source.ok_or(EnvelopeError::MissingSource)?,
            source_device: e.source_device.unwrap_or(1),
            timestamp: e.timestamp.unwrap_or_default(),
            legacy_body: e.legacy_body,
            content: e.content,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPointer {
    pub id: u64,
    pub key: Vec<u8>,
    /// Populated only after a successful fetch+decrypt (spec's `data?`
    /// field) — absent on every pointer as it comes off the wire.
    pub data: Option<Vec<u8>>,
}

impl From<wire::AttachmentPointer> for AttachmentPointer {
    fn from(p: wire::AttachmentPointer) -> Self {
        AttachmentPointer {
            id: p.id.unwrap_or_default(),
            key: p.key.unwrap_or_default(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupContextType {
    Unknown,
    Update,
    Deliver,
    Quit,
}

impl From<wire::group_context::Type> for GroupContextType {
    fn from(t: wire::group_context::Type) -> Self {
        match t {
            wire::group_context::Type::Unknown => GroupContextType::Unknown,
            wire::group_context::Type::Update => GroupContextType::Update,
            wire::group_context::Type::Deliver => GroupContextType::Deliver,
            wire::group_context::Type::Quit => GroupContextType::Quit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupContext {
    pub id: Vec<u8>,
    pub group_type: GroupContextType,
    pub name: Option<String>,
    pub avatar: Option<AttachmentPointer>,
    pub members: Vec<String>,
}

impl From<wire::GroupContext> for GroupContext {
    fn from(g: wire::GroupContext) -> Self {
        GroupContext {
            id: g.id.unwrap_or_default(),
            group_type: GroupContextType::from(g.r#type()),
            name: g.name,
            avatar: g.avatar.map(AttachmentPointer::from),
            members: g.members,
        }
    }
}

/// Bitmask carried in `DataMessage.flags`. proto3 has no native bitflag
/// type, so this just wraps the raw `u32` with named accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataMessageFlags(pub u32);

impl DataMessageFlags {
    pub const END_SESSION: u32 = 0x01;
    pub const EXPIRATION_TIMER_UPDATE: u32 = 0x02;

    pub fn end_session(self) -> bool {
        self.0 & Self::END_SESSION != 0
    }

    pub fn expiration_timer_update(self) -> bool {
        self.0 & Self::EXPIRATION_TIMER_UPDATE != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub flags: DataMessageFlags,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub group: Option<GroupContext>,
    pub expire_timer: Option<u32>,
}

impl From<wire::DataMessage> for DataMessage {
    fn from(d: wire::DataMessage) -> Self {
        DataMessage {
            flags: DataMessageFlags(d.flags.unwrap_or_default()),
            body: d.body,
            attachments: d.attachments.into_iter().map(AttachmentPointer::from).collect(),
            group: d.group.map(GroupContext::from),
            expire_timer: d.expire_timer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSent {
    pub destination: Option<String>,
    pub timestamp: Option<u64>,
    pub message: Option<DataMessage>,
    pub expiration_start_timestamp: Option<u64>,
}

impl From<wire::sync_message::Sent> for SyncSent {
    fn from(s: wire::sync_message::Sent) -> Self {
        SyncSent {
            destination: s.destination,
            timestamp: s.timestamp,
            message: s.message.map(DataMessage::from),
            expiration_start_timestamp: s.expiration_start_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRead {
    pub sender: String,
    pub timestamp: u64,
}

impl From<wire::sync_message::Read> for SyncRead {
    fn from(r: wire::sync_message::Read) -> Self {
        SyncRead {
            sender: r.sender.unwrap_or_default(),
            timestamp: r.timestamp.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequestType {
    Unknown,
    Contacts,
    Groups,
    Blocked,
}

impl From<wire::sync_message::request::Type> for SyncRequestType {
    fn from(t: wire::sync_message::request::Type) -> Self {
        use wire::sync_message::request::Type as WireType;
        match t {
            WireType::Unknown => SyncRequestType::Unknown,
            WireType::Contacts => SyncRequestType::Contacts,
            WireType::Groups => SyncRequestType::Groups,
            WireType::Blocked => SyncRequestType::Blocked,
        }
    }
}

/// A message a device sends to its own sibling devices so they stay in
/// sync: a copy of something it just sent, a blocked-list snapshot, a
/// request for the contacts/groups blob, or read receipts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncMessage {
    pub sent: Option<SyncSent>,
    pub contacts_blob: Option<AttachmentPointer>,
    pub groups_blob: Option<AttachmentPointer>,
    pub blocked: Option<Vec<String>>,
    pub request: Option<SyncRequestType>,
    pub read: Vec<SyncRead>,
}

impl From<wire::SyncMessage> for SyncMessage {
    fn from(s: wire::SyncMessage) -> Self {
        SyncMessage {
            sent: s.sent.map(SyncSent::from),
            contacts_blob: s.contacts.and_then(|c| c.blob).map(AttachmentPointer::from),
            groups_blob: s.groups.and_then(|g| g.blob).map(AttachmentPointer::from),
            blocked: s.blocked.map(|b| b.numbers),
            request: s.request.map(|r| SyncRequestType::from(r.r#type())),
            read: s.read.into_iter().map(SyncRead::from).collect(),
        }
    }
}

/// The payload carried by a ciphertext envelope once decrypted: exactly
/// one of a data message or a sync message, per `spec.md` §4.6.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Content {
    pub data_message: Option<DataMessage>,
    pub sync_message: Option<SyncMessage>,
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content carries neither a data message nor a sync message")]
    Empty,
    #[error("failed to decode protobuf content: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl Content {
    pub fn decode(buf: &[u8]) -> Result<Self, ContentError> {
        let c = wire::Content::decode(buf)?;
        if c.data_message.is_none() && c.sync_message.is_none() {
            return Err(ContentError::Empty);
        }
        Ok(Content {
            data_message: c.data_message.map(DataMessage::from),
            sync_message: c.sync_message.map(SyncMessage::from),
        })
    }
}

/// One record streamed out of a contacts-sync attachment blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDetails {
    pub number: String,
    pub name: Option<String>,
    pub avatar: Option<AttachmentPointer>,
    pub blocked: bool,
    pub expire_timer: Option<u32>,
}

impl From<wire::ContactDetails> for ContactDetails {
    fn from(c: wire::ContactDetails) -> Self {
        ContactDetails {
            number: c.number.unwrap_or_default(),
            name: c.name,
            avatar: c.avatar.map(AttachmentPointer::from),
            blocked: c.blocked.unwrap_or(false),
            expire_timer: c.expire_timer,
        }
    }
}

/// One record streamed out of a groups-sync attachment blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDetails {
    pub id: Vec<u8>,
    pub name: Option<String>,
    pub members: Vec<String>,
    pub avatar: Option<AttachmentPointer>,
    pub active: bool,
    pub expire_timer: Option<u32>,
}

impl From<wire::GroupDetails> for GroupDetails {
    fn from(g: wire::GroupDetails) -> Self {
        GroupDetails {
            id: g.id.unwrap_or_default(),
            name: g.name,
            members: g.members,
            avatar: g.avatar.map(AttachmentPointer::from),
            active: g.active.unwrap_or(true),
            expire_timer: g.expire_timer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: impl Message) -> Vec<u8> {
        msg.encode_to_vec()
    }

    #[test]
    fn envelope_rejects_empty_body() {
        let wire_env = wire::Envelope {
            r#type: Some(wire::envelope::Type::Ciphertext as i32),
            source: Some("+15555550123".into()),
            source_device: Some(1),
            timestamp: Some(1),
            legacy_body: None,
            content: None,
        };
        assert!(matches!(
            Envelope::try_from(wire_env),
            Err(EnvelopeError::EmptyBody)
        ));
    }

    #[test]
    fn envelope_rejects_ambiguous_body() {
        let wire_env = wire::Envelope {
            r#type: Some(wire::envelope::Type::Ciphertext as i32),
            source: Some("+15555550123".into()),
            source_device: Some(1),
            timestamp: Some(1),
            legacy_body: Some(vec![1]),
            content: Some(vec![2]),
        };
        assert!(matches!(
            Envelope::try_from(wire_env),
            Err(EnvelopeError::AmbiguousBody)
        ));
    }

    #[test]
    fn envelope_decodes_from_content_field() {
        let wire_env = wire::Envelope {
            r#type: Some(wire::envelope::Type::Ciphertext as i32),
            source: Some("+15555550123".into()),
            source_device: Some(2),
            timestamp: Some(1_700_000_000),
            legacy_body: None,
            content: Some(vec![9, 9, 9]),
        };
        let env = Envelope::try_from(wire_env).unwrap();
        assert_eq!(env.source_device, 2);
        assert_eq!(env.ciphertext(), &[9, 9, 9]);
    }

    #[test]
    fn content_rejects_when_neither_variant_present() {
        let bytes = encode(wire::Content::default());
        assert!(matches!(Content::decode(&bytes), Err(ContentError::Empty)));
    }

    #[test]
    fn content_decodes_data_message_with_flags() {
        let wire_content = wire::Content {
            data_message: Some(wire::DataMessage {
                flags: Some(DataMessageFlags::END_SESSION),
                body: Some("bye".into()),
                attachments: vec![],
                group: None,
                expire_timer: None,
            }),
            sync_message: None,
        };
        let bytes = encode(wire_content);
        let content = Content::decode(&bytes).unwrap();
        let dm = content.data_message.unwrap();
        assert!(dm.flags.end_session());
        assert!(!dm.flags.expiration_timer_update());
        assert_eq!(dm.body.as_deref(), Some("bye"));
    }

    #[test]
    fn sync_message_flattens_nested_blob_wrappers() {
        let wire_sync = wire::SyncMessage {
            contacts: Some(wire::sync_message::Contacts {
                blob: Some(wire::AttachmentPointer {
                    id: Some(5),
                    key: Some(vec![1, 2]),
                }),
            }),
            ..Default::default()
        };
        let sync = SyncMessage::from(wire_sync);
        assert_eq!(sync.contacts_blob.unwrap().id, 5);
    }
}
