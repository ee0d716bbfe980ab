//! ISO/IEC 7816-4 style message padding: `plaintext || 0x80 || 0x00*`.
//!
//! Applied to a `DataMessage` before encryption and stripped after
//! decryption, so ciphertext lengths don't leak the exact plaintext length.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PadError {
    #[error("padded message is empty")]
    Empty,
    #[error("padded message has no 0x80 marker byte")]
    MissingMarker,
}

/// Pads `plaintext` out to the next multiple of `block_size` bytes.
pub fn pad(plaintext: &[u8], block_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(plaintext.len() + block_size);
    out.extend_from_slice(plaintext);
    out.push(0x80);
    let remainder = out.len() % block_size;
    if remainder != 0 {
        out.resize(out.len() + (block_size - remainder), 0);
    }
    out
}

/// Strips the `0x80 || 0x00*` padding appended by [`pad`].
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>, PadError> {
    let marker = padded.iter().rposition(|&b| b != 0).ok_or(PadError::Empty)?;
    if padded[marker] != 0x80 {
        return Err(PadError::MissingMarker);
    }
    Ok(padded[..marker].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let msg = b"hello, this is a data message body";
        let padded = pad(msg, 160);
        assert_eq!(padded.len() % 160, 0);
        assert_eq!(unpad(&padded).unwrap(), msg);
    }

    #[test]
    fn round_trip_empty_plaintext() {
        let padded = pad(b"", 160);
        assert_eq!(unpad(&padded).unwrap(), b"");
    }

    #[test]
    fn round_trip_exact_block_boundary() {
        let msg = vec![0x41u8; 159];
        let padded = pad(&msg, 160);
        assert_eq!(padded.len(), 320);
        assert_eq!(unpad(&padded).unwrap(), msg);
    }

    #[test]
    fn rejects_all_zero_input() {
        assert_eq!(unpad(&[0u8; 32]).unwrap_err(), PadError::Empty);
    }

    #[test]
    fn rejects_missing_marker() {
        let mut bogus = vec![1, 2, 3, 0x7f];
        bogus.resize(16, 0);
        assert_eq!(unpad(&bogus).unwrap_err(), PadError::MissingMarker);
    }
}
