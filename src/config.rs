//! Shared `serde` plumbing for limiter `*Options` structs.
//!
//! Every duration-typed option (`refill_interval`, `window_duration`,
//! `leak_interval`, `poll_interval`, ...) is represented on the wire as
//! whole milliseconds via a small named `with =` module per
//! non-primitive field, rather than a blanket newtype wrapper over
//! every `Duration`.

use std::time::Duration;

/// `#[serde(with = "crate::config::duration_millis")]`
pub mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
