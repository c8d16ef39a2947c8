//! Client identity.
//!
//! Every connected instance presents a `(name, uid)` pair to the broker.
//! `name` is the application class and may be shared by many instances;
//! `uid` must be unique per instance and is generated at construction when
//! not supplied. Both are immutable afterwards.

use serde::{Deserialize, Serialize};

/// The `(name, uid)` pair identifying a client instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Application name, shared by instances of the same application.
    pub name: String,
    /// Globally unique id of this instance.
    pub uid: String,
}

impl Identity {
    /// Create an identity from explicit parts.
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// Build an identity, generating whichever parts were not supplied.
    pub fn generate(name: Option<String>, uid: Option<String>) -> Self {
        let name = name.unwrap_or_else(|| format!("{:06}", rand_u64() % 1_000_000));
        let uid = uid.unwrap_or_else(|| format!("{}_{:x}", name, rand_u64()));
        Self { name, uid }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.uid)
    }
}

/// Simple random u64 using system time and process ID.
pub(crate) fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    // Mix in process ID and some bit shuffling for better randomness
    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid
}
