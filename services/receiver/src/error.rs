//! Top-level error type the receive pipeline surfaces through
//! [`crate::events::ReceiverEvent::Error`]. Aggregates each component's
//! own error enum (spec §7's taxonomy) via `#[from]`, the way the rest of
//! this codebase gives each module its own error type and threads it
//! upward with `thiserror`.

use relay_wire::{Envelope, EnvelopeError};
use thiserror::Error;

use crate::attachments::AttachmentError;
use crate::collaborators::SignalingKeyError;
use crate::content::ContentError;
use crate::decryptor::DecryptError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("signaling key: {0}")]
    SignalingKey(#[from] SignalingKeyError),

    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("decrypt: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("content: {0}")]
    Content(#[from] ContentError),

    #[error("attachment: {0}")]
    Attachment(#[from] AttachmentError),

    /// A prekey message couldn't be decrypted because the sender's
    /// identity key doesn't match what's on file. Carries the full
    /// envelope so a caller can resolve the mismatch and call
    /// [`crate::receiver::ReceiverCore::try_message_again`] (spec §4.5).
    #[error("unknown identity key for {}.{}", envelope.source, envelope.source_device)]
    IncomingIdentityKey {
        envelope: Envelope,
        identity_key: Vec<u8>,
    },

    #[error("reconnect probe failed: {0}")]
    ProbeFailed(String),
}
