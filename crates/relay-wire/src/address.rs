//! The recipient/sender identity carried on every frame and envelope:
//! a stable account identifier plus the device that owns a given session.

use std::fmt;

/// Identifies one device belonging to one account.
///
/// Used as a session-store key, so it derives `Hash`/`Eq` the same way the
/// teacher's stream keys do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub name: String,
    pub device_id: u32,
}

impl Address {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}
