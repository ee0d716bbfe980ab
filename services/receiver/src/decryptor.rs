//! Per-envelope decryption (spec §4.5): dispatches on `Envelope.type`,
//! unpads the ratchet's plaintext, and parses it into either a `Content`
//! or a legacy bare `DataMessage`.

use prost::Message as _;
use relay_wire::{pad, Address, Content, DataMessage, Envelope, EnvelopeType};
use thiserror::Error;

use crate::collaborators::{SessionCipher, SessionCipherError};

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("failed to decode plaintext content: {0}")]
    BadPlaintext(String),
    #[error("invalid padding")]
    InvalidPadding,
    #[error("envelope carries an unknown message type")]
    UnknownMessageType,
    #[error("unknown identity key for {address}")]
    IncomingIdentityKey {
        address: Address,
        ciphertext: Vec<u8>,
        identity_key: Vec<u8>,
    },
    #[error("session cipher: {0}")]
    SessionCipher(#[from] SessionCipherError),
}

pub enum Decrypted {
    Content(Content),
    LegacyDataMessage(DataMessage),
    Receipt,
}

pub async fn decrypt_envelope(
    envelope: &Envelope,
    cipher: &dyn SessionCipher,
) -> Result<Decrypted, DecryptError> {
    match envelope.envelope_type {
        EnvelopeType::Receipt => Ok(Decrypted::Receipt),
        EnvelopeType::Ciphertext => {
            let padded = cipher.decrypt_whisper_message(envelope.ciphertext()).await?;
            parse_plaintext(envelope, &pad::unpad(&padded).map_err(|_| DecryptError::InvalidPadding)?)
        }
        EnvelopeType::PrekeyBundle => {
            let padded = match cipher.decrypt_prekey_whisper_message(envelope.ciphertext()).await {
                Ok(p) => p,
                Err(SessionCipherError::UnknownIdentityKey { identity_key }) => {
                    return Err(DecryptError::IncomingIdentityKey {
                        address: Address::new(envelope.source.clone(), envelope.source_device),
                        ciphertext: envelope.ciphertext().to_vec(),
                        identity_key,
                    });
                }
                Err(e) => return Err(DecryptError::SessionCipher(e)),
            };
            parse_plaintext(envelope, &pad::unpad(&padded).map_err(|_| DecryptError::InvalidPadding)?)
        }
        EnvelopeType::Unknown => Err(DecryptError::UnknownMessageType),
    }
}

fn parse_plaintext(envelope: &Envelope, plaintext: &[u8]) -> Result<Decrypted, DecryptError> {
    if envelope.content.is_some() {
        Content::decode(plaintext)
            .map(Decrypted::Content)
            .map_err(|e| DecryptError::BadPlaintext(e.to_string()))
    } else {
        relay_wire::wire::DataMessage::decode(plaintext)
            .map(|dm| Decrypted::LegacyDataMessage(DataMessage::from(dm)))
            .map_err(|e| DecryptError::BadPlaintext(e.to_string()))
    }
}
