//! ClientHello fingerprint profiles.
//!
//! A profile fixes everything a passive observer can fingerprint in the first
//! flight: cipher suite list and order, advertised groups and signature
//! algorithms, GREASE placement, extension order and padding. The key exchange
//! itself is always x25519.

use rand::Rng;

use super::common::*;
use super::tls13_cipher_suite::CipherSuite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionSlot {
    /// GREASE extension with empty body.
    GreaseFirst,
    /// GREASE extension with a single zero byte body.
    GreaseLast,
    ServerName,
    ExtendedMasterSecret,
    RenegotiationInfo,
    SupportedGroups,
    EcPointFormats,
    SessionTicket,
    Alpn,
    StatusRequest,
    SignatureAlgorithms,
    SignedCertificateTimestamp,
    KeyShare,
    PskKeyExchangeModes,
    SupportedVersions,
    Padding,
}

/// GREASE values picked once per ClientHello (RFC 8701).
#[derive(Debug, Clone, Copy)]
pub struct GreaseValues {
    pub cipher_suite: u16,
    pub group: u16,
    pub version: u16,
    pub first_extension: u16,
    pub last_extension: u16,
}

impl GreaseValues {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let mut pick = || {
            let b: u16 = (rng.random_range(0..16u16) << 4) | 0x0a;
            (b << 8) | b
        };
        let first_extension = pick();
        let mut last_extension = pick();
        while last_extension == first_extension {
            last_extension = pick();
        }
        Self {
            cipher_suite: pick(),
            group: pick(),
            version: pick(),
            first_extension,
            last_extension,
        }
    }
}

#[cfg(test)]
pub(crate) fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a && (value >> 8) == (value & 0xff)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientHelloProfile {
    #[default]
    Chrome,
    Firefox,
    Minimal,
}

const CHROME_EXTENSIONS: &[ExtensionSlot] = &[
    ExtensionSlot::GreaseFirst,
    ExtensionSlot::ServerName,
    ExtensionSlot::ExtendedMasterSecret,
    ExtensionSlot::RenegotiationInfo,
    ExtensionSlot::SupportedGroups,
    ExtensionSlot::EcPointFormats,
    ExtensionSlot::SessionTicket,
    ExtensionSlot::Alpn,
    ExtensionSlot::StatusRequest,
    ExtensionSlot::SignatureAlgorithms,
    ExtensionSlot::SignedCertificateTimestamp,
    ExtensionSlot::KeyShare,
    ExtensionSlot::PskKeyExchangeModes,
    ExtensionSlot::SupportedVersions,
    ExtensionSlot::GreaseLast,
    ExtensionSlot::Padding,
];

const FIREFOX_EXTENSIONS: &[ExtensionSlot] = &[
    ExtensionSlot::ServerName,
    ExtensionSlot::ExtendedMasterSecret,
    ExtensionSlot::RenegotiationInfo,
    ExtensionSlot::SupportedGroups,
    ExtensionSlot::EcPointFormats,
    ExtensionSlot::SessionTicket,
    ExtensionSlot::Alpn,
    ExtensionSlot::StatusRequest,
    ExtensionSlot::KeyShare,
    ExtensionSlot::SupportedVersions,
    ExtensionSlot::SignatureAlgorithms,
    ExtensionSlot::PskKeyExchangeModes,
];

const MINIMAL_EXTENSIONS: &[ExtensionSlot] = &[
    ExtensionSlot::ServerName,
    ExtensionSlot::SupportedGroups,
    ExtensionSlot::SignatureAlgorithms,
    ExtensionSlot::Alpn,
    ExtensionSlot::KeyShare,
    ExtensionSlot::SupportedVersions,
];

impl ClientHelloProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "chrome" => Some(Self::Chrome),
            "firefox" => Some(Self::Firefox),
            "minimal" => Some(Self::Minimal),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Minimal => "minimal",
        }
    }

    pub fn uses_grease(&self) -> bool {
        matches!(self, Self::Chrome)
    }

    pub fn extensions(&self) -> &'static [ExtensionSlot] {
        match self {
            Self::Chrome => CHROME_EXTENSIONS,
            Self::Firefox => FIREFOX_EXTENSIONS,
            Self::Minimal => MINIMAL_EXTENSIONS,
        }
    }

    /// Cipher suite list as sent on the wire: TLS 1.3 suites (restricted to the
    /// configured ones, in profile order) followed by the profile's TLS 1.2 suites.
    pub fn cipher_suite_ids(&self, enabled: &[CipherSuite], grease: &GreaseValues) -> Vec<u16> {
        let tls13_order: &[u16] = match self {
            Self::Firefox => &[0x1301, 0x1303, 0x1302],
            _ => &[0x1301, 0x1302, 0x1303],
        };
        let legacy: &[u16] = match self {
            Self::Chrome => &[
                0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013, 0xc014, 0x009c, 0x009d,
                0x002f, 0x0035,
            ],
            Self::Firefox => &[
                0xc02b, 0xc02f, 0xcca9, 0xcca8, 0xc02c, 0xc030, 0xc00a, 0xc009, 0xc013, 0xc014,
                0x009c, 0x009d, 0x002f, 0x0035,
            ],
            Self::Minimal => &[],
        };

        let mut ids = Vec::with_capacity(1 + tls13_order.len() + legacy.len());
        if self.uses_grease() {
            ids.push(grease.cipher_suite);
        }
        if *self == Self::Minimal {
            ids.extend(enabled.iter().map(|cs| cs.id()));
        } else {
            ids.extend(
                tls13_order
                    .iter()
                    .copied()
                    .filter(|id| enabled.iter().any(|cs| cs.id() == *id)),
            );
        }
        ids.extend_from_slice(legacy);
        ids
    }

    pub fn groups(&self, grease: &GreaseValues) -> Vec<u16> {
        match self {
            Self::Chrome => vec![grease.group, GROUP_X25519, GROUP_SECP256R1, GROUP_SECP384R1],
            Self::Firefox => vec![
                GROUP_X25519,
                GROUP_SECP256R1,
                GROUP_SECP384R1,
                GROUP_SECP521R1,
                GROUP_FFDHE2048,
                GROUP_FFDHE3072,
            ],
            Self::Minimal => vec![GROUP_X25519],
        }
    }

    pub fn signature_schemes(&self) -> &'static [u16] {
        match self {
            Self::Chrome => &[
                0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
            ],
            Self::Firefox => &[
                0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601,
            ],
            Self::Minimal => &[0x0403, 0x0503, 0x0804, 0x0805, 0x0806, 0x0807, 0x0401],
        }
    }

    pub fn supported_versions(&self, grease: &GreaseValues) -> Vec<u16> {
        match self {
            Self::Chrome => vec![grease.version, VERSION_TLS_1_3, VERSION_TLS_1_2],
            Self::Firefox => vec![VERSION_TLS_1_3, VERSION_TLS_1_2],
            Self::Minimal => vec![VERSION_TLS_1_3],
        }
    }

    /// Size the ClientHello handshake message is padded up to, if the profile pads.
    pub fn padded_length(&self) -> Option<usize> {
        match self {
            Self::Chrome => Some(512),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientHelloProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
