//! Wire schema for the relay receive pipeline.
//!
//! `wire` holds the raw protobuf-generated types (one-to-one with
//! `proto/relay.proto`). Everything else in this crate is a Rust-native
//! wrapper that turns the protobuf's all-optional fields into the typed,
//! normalized shapes the receive pipeline actually works with.

pub mod address;
pub mod envelope;
pub mod frame;
pub mod pad;

pub mod wire {
    include!(concat!(env!("OUT_DIR"), "/relay.rs"));
}

pub use address::Address;
pub use envelope::{
    AttachmentPointer, Content, ContactDetails, DataMessage, DataMessageFlags, Envelope,
    EnvelopeType, GroupContext, GroupContextType, GroupDetails, SyncMessage, SyncRead,
    SyncRequestType, SyncSent,
};
pub use frame::{Frame, Request, Response, ResponseStatus};
pub use pad::{PadError, pad, unpad};
