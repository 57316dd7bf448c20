use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SessionError;

/// Stable identifier for one physical device: 4 uppercase ASCII letters
/// followed by 4 ASCII digits (e.g. "ABCD1234").
///
/// `FromStr` is the only way to construct one, so a `DeviceId` in hand is
/// always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 8
            && bytes[..4].iter().all(|b| b.is_ascii_uppercase())
            && bytes[4..].iter().all(|b| b.is_ascii_digit());

        if well_formed {
            Ok(DeviceId(s.to_string()))
        } else {
            Err(SessionError::InvalidDeviceId(s.to_string()))
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
