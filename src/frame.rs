//! 802.11 frame classification.
//!
//! Decides whether a captured frame is a deauthentication management frame
//! and extracts the transmitter address (address 2) it claims to come from.
//! Frames that cannot be decoded are never an error, only a non-match.

use std::fmt;

use tracing::trace;

/// Frame control type/subtype constants (little-endian frame control word).
mod fc {
    pub const TYPE_MASK: u16 = 0x000C;
    pub const SUBTYPE_MASK: u16 = 0x00F0;
    pub const TYPE_MGMT: u16 = 0x0000;
    pub const SUBTYPE_DEAUTH: u16 = 0x00C0;
}

/// Fixed radiotap prefix: version (u8), pad (u8), length (u16 LE), present (u32).
const RADIOTAP_PREFIX_LEN: usize = 8;

/// Offset and length of address 2 inside a management header.
const ADDR2_OFFSET: usize = 10;
const ADDR_LEN: usize = 6;

/// Claimed source of a frame.
///
/// Compared by identity only; a missing address is normalized to
/// [`Address::unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    const UNKNOWN: &'static str = "unknown";

    #[cfg(test)]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn from_mac(octets: &[u8; ADDR_LEN]) -> Self {
        Self(format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            octets[0], octets[1], octets[2], octets[3], octets[4], octets[5]
        ))
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Link-layer encapsulation reported by the capture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// DLT_IEEE802_11_RADIO (127).
    Radiotap,
    /// DLT_IEEE802_11 (105), no radio header.
    Ieee80211,
    Other(i32),
}

impl From<i32> for LinkType {
    fn from(dlt: i32) -> Self {
        match dlt {
            127 => Self::Radiotap,
            105 => Self::Ieee80211,
            other => Self::Other(other),
        }
    }
}

impl From<pcap::Linktype> for LinkType {
    fn from(linktype: pcap::Linktype) -> Self {
        Self::from(linktype.0)
    }
}

/// A captured frame as handed over by the capture source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub link: LinkType,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(link: LinkType, data: Vec<u8>) -> Self {
        Self { link, data }
    }
}

/// Stateless deauthentication frame classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameClassifier;

impl FrameClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Returns the source address when `frame` is a deauthentication frame.
    pub fn classify(&self, frame: &RawFrame) -> Option<Address> {
        let dot11 = match frame.link {
            LinkType::Radiotap => strip_radiotap(&frame.data)?,
            LinkType::Ieee80211 => frame.data.as_slice(),
            LinkType::Other(dlt) => {
                trace!("Ignoring frame with unsupported link type {}", dlt);
                return None;
            }
        };

        classify_dot11(dot11)
    }
}

/// Skips the radiotap header using only its declared length. The present
/// bitmaps and fields are never walked.
fn strip_radiotap(data: &[u8]) -> Option<&[u8]> {
    if data.len() < RADIOTAP_PREFIX_LEN || data[0] != 0 {
        trace!("Not a radiotap header ({} bytes)", data.len());
        return None;
    }

    let length = usize::from(u16::from_le_bytes([data[2], data[3]]));
    if length < RADIOTAP_PREFIX_LEN || length > data.len() {
        trace!("Radiotap length {} invalid for {} byte frame", length, data.len());
        return None;
    }

    Some(&data[length..])
}

/// Classifies a bare 802.11 frame (no radio header).
pub fn classify_dot11(dot11: &[u8]) -> Option<Address> {
    if dot11.len() < 2 {
        return None;
    }

    let frame_control = u16::from_le_bytes([dot11[0], dot11[1]]);
    if !is_deauth(frame_control) {
        return None;
    }

    let address = dot11
        .get(ADDR2_OFFSET..ADDR2_OFFSET + ADDR_LEN)
        .and_then(|bytes| <&[u8; ADDR_LEN]>::try_from(bytes).ok())
        .map(Address::from_mac)
        .unwrap_or_else(Address::unknown);

    Some(address)
}

#[inline]
fn is_deauth(frame_control: u16) -> bool {
    (frame_control & fc::TYPE_MASK) == fc::TYPE_MGMT
        && (frame_control & fc::SUBTYPE_MASK) == fc::SUBTYPE_DEAUTH
}
