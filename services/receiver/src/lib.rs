pub mod attachments;
pub mod collaborators;
pub mod config;
pub mod content;
pub mod decryptor;
pub mod error;
pub mod events;
pub mod group;
pub mod keepalive;
pub mod queue;
pub mod receiver;
pub mod transport;

pub use config::{ConfigError, ReceiverConfig};
pub use error::ReceiverError;
pub use events::{EventSink, GroupEvent, MpscEventSink, ReceiverEvent};
pub use receiver::{http_base_url, CloseOutcome, ReceiverCore};
