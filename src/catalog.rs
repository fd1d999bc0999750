//! Static catalog of protocol versions and cipher suites.
//!
//! The catalog answers one question for the prober: is a cipher suite valid under
//! a given protocol version? TLS 1.3 suites never overlap with the TLS 1.0-1.2
//! suites. TLS 1.0 and TLS 1.1 share one compatibility list.

use openssl::ssl::SslVersion;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// A TLS/SSL protocol version, displayed the way probe rows report it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum ProtocolVersion {
    #[strum(serialize = "SSL v3")]
    #[serde(rename = "SSL v3")]
    Ssl3,
    #[strum(serialize = "TLS v1.0")]
    #[serde(rename = "TLS v1.0")]
    Tls10,
    #[strum(serialize = "TLS v1.1")]
    #[serde(rename = "TLS v1.1")]
    Tls11,
    #[strum(serialize = "TLS v1.2")]
    #[serde(rename = "TLS v1.2")]
    Tls12,
    #[strum(serialize = "TLS v1.3")]
    #[serde(rename = "TLS v1.3")]
    Tls13,
}

impl ProtocolVersion {
    /// Protocols probed when the caller does not narrow the list.
    pub const DEFAULT_PROBE_ORDER: [ProtocolVersion; 4] = [
        ProtocolVersion::Tls13,
        ProtocolVersion::Tls12,
        ProtocolVersion::Tls11,
        ProtocolVersion::Tls10,
    ];

    /// The version's wire identifier.
    pub fn wire_id(self) -> u16 {
        match self {
            ProtocolVersion::Ssl3 => 0x0300,
            ProtocolVersion::Tls10 => 0x0301,
            ProtocolVersion::Tls11 => 0x0302,
            ProtocolVersion::Tls12 => 0x0303,
            ProtocolVersion::Tls13 => 0x0304,
        }
    }

    pub fn from_wire_id(id: u16) -> Option<ProtocolVersion> {
        match id {
            0x0300 => Some(ProtocolVersion::Ssl3),
            0x0301 => Some(ProtocolVersion::Tls10),
            0x0302 => Some(ProtocolVersion::Tls11),
            0x0303 => Some(ProtocolVersion::Tls12),
            0x0304 => Some(ProtocolVersion::Tls13),
            _ => None,
        }
    }

    pub(crate) fn ssl_version(self) -> SslVersion {
        match self {
            ProtocolVersion::Ssl3 => SslVersion::SSL3,
            ProtocolVersion::Tls10 => SslVersion::TLS1,
            ProtocolVersion::Tls11 => SslVersion::TLS1_1,
            ProtocolVersion::Tls12 => SslVersion::TLS1_2,
            ProtocolVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub(crate) fn from_ssl_version(version: SslVersion) -> Option<ProtocolVersion> {
        [
            ProtocolVersion::Ssl3,
            ProtocolVersion::Tls10,
            ProtocolVersion::Tls11,
            ProtocolVersion::Tls12,
            ProtocolVersion::Tls13,
        ]
        .iter()
        .copied()
        .find(|p| p.ssl_version() == version)
    }

    /// The next lower protocol version, if any.
    pub fn previous(self) -> Option<ProtocolVersion> {
        match self {
            ProtocolVersion::Ssl3 => None,
            ProtocolVersion::Tls10 => Some(ProtocolVersion::Ssl3),
            ProtocolVersion::Tls11 => Some(ProtocolVersion::Tls10),
            ProtocolVersion::Tls12 => Some(ProtocolVersion::Tls11),
            ProtocolVersion::Tls13 => Some(ProtocolVersion::Tls12),
        }
    }
}

const UP_TO_TLS12: &[ProtocolVersion] = &[
    ProtocolVersion::Tls10,
    ProtocolVersion::Tls11,
    ProtocolVersion::Tls12,
];
const TLS12_ONLY: &[ProtocolVersion] = &[ProtocolVersion::Tls12];
const TLS13_ONLY: &[ProtocolVersion] = &[ProtocolVersion::Tls13];

/// A cipher suite catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite {
    /// IANA name, e.g. `TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`.
    pub name: &'static str,
    /// Name understood by OpenSSL's cipher configuration.
    pub openssl_name: &'static str,
    pub id: u16,
    pub supported_versions: &'static [ProtocolVersion],
    pub insecure: bool,
}

impl CipherSuite {
    /// The id rendered as `0x%04x`.
    pub fn hex_id(&self) -> String {
        format!("0x{:04x}", self.id)
    }

    pub fn supports(&self, protocol: ProtocolVersion) -> bool {
        self.supported_versions.contains(&protocol)
    }

    pub fn is_tls13(&self) -> bool {
        self.supports(ProtocolVersion::Tls13)
    }
}

macro_rules! suite {
    ($name:expr, $openssl:expr, $id:expr, $versions:expr, $insecure:expr) => {
        CipherSuite {
            name: $name,
            openssl_name: $openssl,
            id: $id,
            supported_versions: $versions,
            insecure: $insecure,
        }
    };
}

/// Pseudo cipher suite signalling a client-side protocol fallback (RFC 7507).
pub const TLS_FALLBACK_SCSV: u16 = 0x5600;

static CIPHER_SUITES: &[CipherSuite] = &[
    // TLS 1.3
    suite!("TLS_AES_128_GCM_SHA256", "TLS_AES_128_GCM_SHA256", 0x1301, TLS13_ONLY, false),
    suite!("TLS_AES_256_GCM_SHA384", "TLS_AES_256_GCM_SHA384", 0x1302, TLS13_ONLY, false),
    suite!("TLS_CHACHA20_POLY1305_SHA256", "TLS_CHACHA20_POLY1305_SHA256", 0x1303, TLS13_ONLY, false),
    // TLS 1.0 - 1.2
    suite!("TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA", "ECDHE-ECDSA-AES128-SHA", 0xc009, UP_TO_TLS12, false),
    suite!("TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA", "ECDHE-ECDSA-AES256-SHA", 0xc00a, UP_TO_TLS12, false),
    suite!("TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA", "ECDHE-RSA-AES128-SHA", 0xc013, UP_TO_TLS12, false),
    suite!("TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA", "ECDHE-RSA-AES256-SHA", 0xc014, UP_TO_TLS12, false),
    suite!("TLS_RSA_WITH_AES_128_CBC_SHA", "AES128-SHA", 0x002f, UP_TO_TLS12, false),
    suite!("TLS_RSA_WITH_AES_256_CBC_SHA", "AES256-SHA", 0x0035, UP_TO_TLS12, false),
    // TLS 1.2
    suite!("TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256", "ECDHE-ECDSA-AES128-GCM-SHA256", 0xc02b, TLS12_ONLY, false),
    suite!("TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384", "ECDHE-ECDSA-AES256-GCM-SHA384", 0xc02c, TLS12_ONLY, false),
    suite!("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256", "ECDHE-RSA-AES128-GCM-SHA256", 0xc02f, TLS12_ONLY, false),
    suite!("TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384", "ECDHE-RSA-AES256-GCM-SHA384", 0xc030, TLS12_ONLY, false),
    suite!("TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256", "ECDHE-RSA-CHACHA20-POLY1305", 0xcca8, TLS12_ONLY, false),
    suite!("TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256", "ECDHE-ECDSA-CHACHA20-POLY1305", 0xcca9, TLS12_ONLY, false),
    suite!("TLS_RSA_WITH_AES_128_GCM_SHA256", "AES128-GCM-SHA256", 0x009c, TLS12_ONLY, false),
    suite!("TLS_RSA_WITH_AES_256_GCM_SHA384", "AES256-GCM-SHA384", 0x009d, TLS12_ONLY, false),
    // Insecure, still enumerable
    suite!("TLS_RSA_WITH_RC4_128_SHA", "RC4-SHA", 0x0005, UP_TO_TLS12, true),
    suite!("TLS_RSA_WITH_3DES_EDE_CBC_SHA", "DES-CBC3-SHA", 0x000a, UP_TO_TLS12, true),
    suite!("TLS_RSA_WITH_AES_128_CBC_SHA256", "AES128-SHA256", 0x003c, TLS12_ONLY, true),
    suite!("TLS_ECDHE_ECDSA_WITH_RC4_128_SHA", "ECDHE-ECDSA-RC4-SHA", 0xc007, UP_TO_TLS12, true),
    suite!("TLS_ECDHE_RSA_WITH_RC4_128_SHA", "ECDHE-RSA-RC4-SHA", 0xc011, UP_TO_TLS12, true),
    suite!("TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA", "ECDHE-RSA-DES-CBC3-SHA", 0xc012, UP_TO_TLS12, true),
    suite!("TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256", "ECDHE-ECDSA-AES128-SHA256", 0xc023, TLS12_ONLY, true),
    suite!("TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256", "ECDHE-RSA-AES128-SHA256", 0xc027, TLS12_ONLY, true),
];

/// Read-only view over the known cipher suites.
///
/// `Catalog` is `Copy` and holds only `'static` data, so it can be handed to every
/// probe worker without synchronization.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    suites: &'static [CipherSuite],
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::standard()
    }
}

impl Catalog {
    pub fn standard() -> Catalog {
        Catalog {
            suites: CIPHER_SUITES,
        }
    }

    /// All suites: secure ones first, then the insecure ones, in a stable order.
    pub fn all_cipher_suites(&self) -> impl Iterator<Item = &'static CipherSuite> {
        let suites = self.suites;
        suites
            .iter()
            .filter(|s| !s.insecure)
            .chain(suites.iter().filter(|s| s.insecure))
    }

    pub fn cipher_suite(&self, name: &str) -> Option<&'static CipherSuite> {
        self.suites.iter().find(|s| s.name == name)
    }

    /// Names of the suites valid under `protocol`, in catalog order.
    pub fn compatible_ciphers(&self, protocol: ProtocolVersion) -> Vec<&'static str> {
        self.all_cipher_suites()
            .filter(|s| suite_matches(protocol, s))
            .map(|s| s.name)
            .collect()
    }

    /// Unknown cipher names are never compatible.
    pub fn is_compatible(&self, protocol: ProtocolVersion, cipher: &str) -> bool {
        self.cipher_suite(cipher)
            .map(|s| suite_matches(protocol, s))
            .unwrap_or(false)
    }
}

fn suite_matches(protocol: ProtocolVersion, suite: &CipherSuite) -> bool {
    match protocol {
        ProtocolVersion::Tls13 => suite.supports(ProtocolVersion::Tls13),
        ProtocolVersion::Tls12 => suite.supports(ProtocolVersion::Tls12),
        ProtocolVersion::Tls10 | ProtocolVersion::Tls11 => {
            UP_TO_TLS12.iter().any(|p| suite.supports(*p))
        }
        ProtocolVersion::Ssl3 => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_protocol_names_round_trip() {
        for protocol in ProtocolVersion::iter() {
            let name = protocol.to_string();
            assert_eq!(ProtocolVersion::from_str(&name).unwrap(), protocol);
            assert_eq!(ProtocolVersion::from_wire_id(protocol.wire_id()), Some(protocol));
        }
        assert_eq!(ProtocolVersion::Tls12.to_string(), "TLS v1.2");
        assert!(ProtocolVersion::from_str("TLS v9").is_err());
    }

    #[test]
    fn test_secure_suites_come_first() {
        let catalog = Catalog::standard();
        let flags: Vec<bool> = catalog.all_cipher_suites().map(|s| s.insecure).collect();
        let first_insecure = flags.iter().position(|f| *f).unwrap();
        assert!(flags[first_insecure..].iter().all(|f| *f));
    }

    #[test]
    fn test_suite_names_and_ids_are_unique() {
        let catalog = Catalog::standard();
        let names: HashSet<_> = catalog.all_cipher_suites().map(|s| s.name).collect();
        let ids: HashSet<_> = catalog.all_cipher_suites().map(|s| s.id).collect();
        assert_eq!(names.len(), CIPHER_SUITES.len());
        assert_eq!(ids.len(), CIPHER_SUITES.len());
        assert!(!ids.contains(&TLS_FALLBACK_SCSV));
    }

    #[test]
    fn test_tls13_is_disjoint_from_older_protocols() {
        let catalog = Catalog::standard();
        let tls13: HashSet<_> = catalog
            .compatible_ciphers(ProtocolVersion::Tls13)
            .into_iter()
            .collect();
        assert_eq!(tls13.len(), 3);
        for protocol in &[
            ProtocolVersion::Tls10,
            ProtocolVersion::Tls11,
            ProtocolVersion::Tls12,
        ] {
            for name in catalog.compatible_ciphers(*protocol) {
                assert!(!tls13.contains(name), "{} leaked into {}", name, protocol);
            }
        }
    }

    #[test]
    fn test_tls10_shares_tls11_list() {
        let catalog = Catalog::standard();
        assert_eq!(
            catalog.compatible_ciphers(ProtocolVersion::Tls10),
            catalog.compatible_ciphers(ProtocolVersion::Tls11)
        );
        assert!(catalog.is_compatible(ProtocolVersion::Tls10, "TLS_RSA_WITH_AES_128_CBC_SHA"));
    }

    #[test]
    fn test_is_compatible() {
        let catalog = Catalog::standard();
        assert!(catalog.is_compatible(ProtocolVersion::Tls13, "TLS_AES_128_GCM_SHA256"));
        assert!(!catalog.is_compatible(ProtocolVersion::Tls12, "TLS_AES_128_GCM_SHA256"));
        assert!(catalog.is_compatible(
            ProtocolVersion::Tls12,
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"
        ));
        assert!(!catalog.is_compatible(
            ProtocolVersion::Tls13,
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"
        ));
        assert!(!catalog.is_compatible(ProtocolVersion::Tls12, "NOT_A_CIPHER"));
        assert!(catalog.compatible_ciphers(ProtocolVersion::Ssl3).is_empty());
    }

    #[test]
    fn test_hex_id() {
        let suite = Catalog::standard()
            .cipher_suite("TLS_RSA_WITH_RC4_128_SHA")
            .unwrap();
        assert_eq!(suite.hex_id(), "0x0005");
        assert!(suite.insecure);
    }
}
