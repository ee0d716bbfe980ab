//! Content Dispatcher (spec §4.6): routes a decrypted `Content` to its
//! data-message or sync-message handling, and `processDecrypted` (§4.8):
//! flag normalization plus concurrent attachment fetch / group
//! reconciliation for a single data message.

use std::collections::HashMap;

use relay_wire::{Content, DataMessage, DataMessageFlags, Envelope, SyncMessage};
use thiserror::Error;

use crate::attachments::{self, AttachmentCipher, AttachmentError, AttachmentTransport};
use crate::collaborators::{BlockedStore, GroupStore, SessionCipherStore};
use crate::error::ReceiverError;
use crate::events::{EventSink, ReceiverEvent};
use crate::group::{self, GroupError};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content carries neither a data message nor a sync message")]
    EmptyContent,
    #[error("sync message carries none of its recognized fields")]
    EmptySyncMessage,
    #[error("sync message source is not this account's own number")]
    InvalidSyncSource,
    #[error("sync message declares this device as its own sender")]
    SelfDeviceSync,
    #[error("data message carries unknown flag bits: {0:#x}")]
    UnknownFlags(u32),
    #[error("group: {0}")]
    Group(#[from] GroupError),
}

pub struct ContentDispatcherDeps<'a> {
    pub self_number: &'a str,
    pub self_device_id: u32,
    pub groups: &'a dyn GroupStore,
    pub blocked: &'a dyn BlockedStore,
    pub sessions: &'a dyn SessionCipherStore,
    pub attachment_transport: &'a dyn AttachmentTransport,
    pub attachment_cipher: &'a dyn AttachmentCipher,
    pub events: &'a dyn EventSink,
}

pub async fn dispatch_content(
    envelope: &Envelope,
    content: Content,
    deps: &ContentDispatcherDeps<'_>,
) -> Result<(), ContentError> {
    match (content.data_message, content.sync_message) {
        (Some(dm), None) => dispatch_data_message(envelope, dm, deps).await,
        (None, Some(sm)) => dispatch_sync_message(envelope, sm, deps).await,
        _ => Err(ContentError::EmptyContent),
    }
}

async fn dispatch_data_message(
    envelope: &Envelope,
    message: DataMessage,
    deps: &ContentDispatcherDeps<'_>,
) -> Result<(), ContentError> {
    if message.flags.end_session() {
        group::end_session(&envelope.source, deps.sessions).await;
    }
    let processed = process_decrypted(message, envelope.source.clone(), deps).await?;
    deps.events.emit(ReceiverEvent::Message {
        source: envelope.source.clone(),
        timestamp: envelope.timestamp,
        message: processed,
    });
    Ok(())
}

async fn dispatch_sync_message(
    envelope: &Envelope,
    sync: SyncMessage,
    deps: &ContentDispatcherDeps<'_>,
) -> Result<(), ContentError> {
    if envelope.source != deps.self_number {
        return Err(ContentError::InvalidSyncSource);
    }
    if envelope.source_device == deps.self_device_id {
        return Err(ContentError::SelfDeviceSync);
    }

    if let Some(sent) = sync.sent {
        let message = match sent.message {
            Some(m) => process_decrypted(m, deps.self_number.to_owned(), deps).await?,
            None => empty_data_message(),
        };
        deps.events.emit(ReceiverEvent::Sent {
            destination: sent.destination,
            timestamp: sent.timestamp.unwrap_or(envelope.timestamp),
            message,
            expiration_start_timestamp: sent.expiration_start_timestamp,
        });
        return Ok(());
    }

    if let Some(pointer) = sync.contacts_blob {
        match fetch_and_decode::<relay_wire::wire::ContactDetails>(pointer, deps).await {
            Ok(records) => {
                for record in records {
                    deps.events.emit(ReceiverEvent::Contact {
                        record: record.into(),
                    });
                }
                deps.events.emit(ReceiverEvent::ContactSync);
            }
            Err(e) => deps.events.emit(ReceiverEvent::Error(ReceiverError::Attachment(e))),
        }
        return Ok(());
    }

    if let Some(pointer) = sync.groups_blob {
        match fetch_and_decode::<relay_wire::wire::GroupDetails>(pointer, deps).await {
            Ok(records) => {
                for record in records {
                    let record: relay_wire::GroupDetails = record.into();
                    if record.active {
                        let mut members: std::collections::HashSet<String> =
                            record.members.iter().cloned().collect();
                        members.insert(deps.self_number.to_owned());
                        deps.groups.upsert_members(&record.id, members);
                    }
                    deps.events.emit(ReceiverEvent::Group {
                        event: crate::events::GroupEvent {
                            id: record.id,
                            name: record.name,
                            members: record.members,
                            added: Vec::new(),
                        },
                    });
                }
                deps.events.emit(ReceiverEvent::GroupSync);
            }
            Err(e) => deps.events.emit(ReceiverEvent::Error(ReceiverError::Attachment(e))),
        }
        return Ok(());
    }

    if let Some(numbers) = sync.blocked {
        deps.blocked.replace(numbers);
        return Ok(());
    }

    if let Some(request) = sync.request {
        tracing::info!(?request, "sync request noted (no outbound reply path in this pipeline)");
        return Ok(());
    }

    if !sync.read.is_empty() {
        for read in sync.read {
            deps.events.emit(ReceiverEvent::Read {
                sender: read.sender,
                timestamp: read.timestamp,
            });
        }
        return Ok(());
    }

    Err(ContentError::EmptySyncMessage)
}

/// Fetches and decrypts a sync attachment blob, then decodes it as a
/// stream of length-delimited records (spec §4.6: "fetch & decrypt the
/// attached blob, then stream records").
async fn fetch_and_decode<M: prost::Message + Default>(
    pointer: relay_wire::AttachmentPointer,
    deps: &ContentDispatcherDeps<'_>,
) -> Result<Vec<M>, AttachmentError> {
    let ciphertext = deps.attachment_transport.fetch(pointer.id).await?;
    let plaintext = deps.attachment_cipher.decrypt(&ciphertext, &pointer.key)?;
    attachments::read_length_delimited::<M>(&plaintext)
}

fn empty_data_message() -> DataMessage {
    DataMessage {
        flags: DataMessageFlags::default(),
        body: None,
        attachments: vec![],
        group: None,
        expire_timer: None,
    }
}

pub async fn process_decrypted(
    mut message: DataMessage,
    source: String,
    deps: &ContentDispatcherDeps<'_>,
) -> Result<DataMessage, ContentError> {
    let raw_flags = message.flags.0;
    message.expire_timer = Some(message.expire_timer.unwrap_or(0));

    if message.flags.end_session() {
        message.body = None;
        message.attachments.clear();
        message.group = None;
        return Ok(message);
    }

    if message.flags.expiration_timer_update() {
        message.body = None;
        message.attachments.clear();
    }

    let known_mask = DataMessageFlags::END_SESSION | DataMessageFlags::EXPIRATION_TIMER_UPDATE;
    if raw_flags & !known_mask != 0 {
        return Err(ContentError::UnknownFlags(raw_flags));
    }

    let group_event = match message.group.take() {
        Some(ctx) => Some(group::reconcile(&ctx, &source, deps.self_number, deps.groups)?),
        None => None,
    };

    let pointers = message.attachments.clone();
    let fetched = attachments::fetch_all(deps.attachment_transport, deps.attachment_cipher, pointers).await;
    let mut by_id = HashMap::new();
    for result in fetched {
        match result {
            Ok((id, bytes)) => {
                by_id.insert(id, bytes);
            }
            Err(e) => deps.events.emit(ReceiverEvent::Error(ReceiverError::Attachment(e))),
        }
    }
    for pointer in &mut message.attachments {
        pointer.data = by_id.remove(&pointer.id);
    }

    if let Some(outcome) = group_event {
        if outcome.meta_only {
            message.body = None;
            message.attachments.clear();
        }
        deps.events.emit(ReceiverEvent::Group { event: outcome.group_event });
    }

    Ok(message)
}
