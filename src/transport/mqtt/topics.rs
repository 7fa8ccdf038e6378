//! Per-device topic namespace
//!
//! Every device gets four topics under `{base}/{device_id}/`:
//!
//! - `cmd`    - commands to the device (subscribed)
//! - `resp`   - dispatcher responses (published)
//! - `status` - birth/last-will (published, retained)
//! - `event`  - unsolicited broadcasts (published)
//!
//! Topics and the device id are bounded. Oversized input is truncated to the
//! bound and the truncation is reported instead of silently swallowed.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Buffer size for a topic, terminator included
pub const TOPIC_MAX_LEN: usize = 80;
/// Buffer size for a device id, terminator included
pub const DEVICE_ID_MAX_LEN: usize = 32;

pub const COMMAND_SUFFIX: &str = "cmd";
pub const RESPONSE_SUFFIX: &str = "resp";
pub const STATUS_SUFFIX: &str = "status";
pub const EVENT_SUFFIX: &str = "event";

/// Text bounded to `capacity - 1` bytes, remembering whether it had to be cut
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedText {
    value: String,
    truncated: bool,
}

impl BoundedText {
    /// Bound `text` to a buffer of `capacity` bytes (one reserved for the terminator).
    /// Cuts on a character boundary.
    pub fn new(text: &str, capacity: usize) -> Self {
        let max = capacity.saturating_sub(1);
        if text.len() <= max {
            return Self {
                value: text.to_string(),
                truncated: false,
            };
        }

        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            value: text[..end].to_string(),
            truncated: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl fmt::Display for BoundedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// 6-byte hardware network address used to derive a device id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareAddress(pub [u8; 6]);

#[derive(Debug, Error, PartialEq)]
pub enum HardwareAddressError {
    #[error("hardware address must have 6 octets: {0}")]
    WrongLength(String),
    #[error("invalid hex octet '{0}'")]
    InvalidOctet(String),
}

impl HardwareAddress {
    pub const UNSPECIFIED: HardwareAddress = HardwareAddress([0; 6]);

    /// Fixed-width uppercase hex rendering without separators (`AABBCCDDEEFF`)
    pub fn to_device_id(&self) -> String {
        self.0.iter().map(|octet| format!("{octet:02X}")).collect()
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 6]
    }

    /// First non-loopback, non-zero interface address under `/sys/class/net`
    pub fn detect() -> Option<Self> {
        Self::detect_in(Path::new("/sys/class/net"))
    }

    fn detect_in(root: &Path) -> Option<Self> {
        let mut names: Vec<_> = std::fs::read_dir(root)
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .filter(|name| name != "lo")
            .collect();
        names.sort();

        names.into_iter().find_map(|name| {
            let raw = std::fs::read_to_string(root.join(&name).join("address")).ok()?;
            raw.trim()
                .parse::<HardwareAddress>()
                .ok()
                .filter(|addr| !addr.is_unspecified())
        })
    }
}

impl FromStr for HardwareAddress {
    type Err = HardwareAddressError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` or `AABBCCDDEEFF`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = if s.contains(':') || s.contains('-') {
            s.split(|c: char| c == ':' || c == '-').collect()
        } else if s.len() == 12 && s.is_ascii() {
            (0..6).map(|i| &s[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(HardwareAddressError::WrongLength(s.to_string()));
        };

        if octets.len() != 6 {
            return Err(HardwareAddressError::WrongLength(s.to_string()));
        }

        let mut addr = [0u8; 6];
        for (slot, octet) in addr.iter_mut().zip(octets) {
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(HardwareAddressError::InvalidOctet(octet.to_string()));
            }
            *slot = u8::from_str_radix(octet, 16)
                .map_err(|_| HardwareAddressError::InvalidOctet(octet.to_string()))?;
        }
        Ok(HardwareAddress(addr))
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// The device id and its four namespaced topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    device_id: BoundedText,
    command: BoundedText,
    response: BoundedText,
    status: BoundedText,
    event: BoundedText,
}

impl TopicSet {
    /// Derive the namespace for one device. The override wins over the hardware address.
    pub fn build(base: &str, device_override: Option<&str>, hardware: HardwareAddress) -> Self {
        let device_id = match device_override {
            Some(id) => BoundedText::new(id, DEVICE_ID_MAX_LEN),
            None => BoundedText::new(&hardware.to_device_id(), DEVICE_ID_MAX_LEN),
        };

        let topic = |suffix: &str| {
            BoundedText::new(
                &format!("{base}/{}/{suffix}", device_id.as_str()),
                TOPIC_MAX_LEN,
            )
        };

        let set = Self {
            command: topic(COMMAND_SUFFIX),
            response: topic(RESPONSE_SUFFIX),
            status: topic(STATUS_SUFFIX),
            event: topic(EVENT_SUFFIX),
            device_id,
        };

        if set.truncated() {
            warn!(
                base_topic = base,
                device_id = %set.device_id,
                "Topic namespace exceeds buffer limits and was truncated"
            );
        }
        set
    }

    pub fn device_id(&self) -> &str {
        self.device_id.as_str()
    }

    pub fn command(&self) -> &str {
        self.command.as_str()
    }

    pub fn response(&self) -> &str {
        self.response.as_str()
    }

    pub fn status(&self) -> &str {
        self.status.as_str()
    }

    pub fn event(&self) -> &str {
        self.event.as_str()
    }

    /// Whether any part of the namespace was cut to fit
    pub fn truncated(&self) -> bool {
        [
            &self.device_id,
            &self.command,
            &self.response,
            &self.status,
            &self.event,
        ]
        .iter()
        .any(|text| text.is_truncated())
    }
}

/// `true` when `topic` lives under `{base}/`. The bare base is not namespaced.
pub fn is_namespaced(topic: &str, base: &str) -> bool {
    topic
        .strip_prefix(base)
        .is_some_and(|rest| rest.starts_with('/'))
}
