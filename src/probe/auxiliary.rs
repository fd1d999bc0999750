use super::matrix::Prober;
use super::open_builder;
use crate::catalog::{ProtocolVersion, TLS_FALLBACK_SCSV};
use crate::connect;
use crate::error::ProbeError;
use openssl::ssl::{SslConnector, SslMode};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuxiliaryKind {
    FallbackScsv,
    Alpn,
}

/// Result of a once-per-address check.
///
/// `supported` is `None` when the check could not reach a verdict; `error` then
/// says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryCheck {
    pub address: String,
    pub check: AuxiliaryKind,
    pub supported: Option<bool>,
    /// Negotiated protocol for ALPN, the fallback version for SCSV.
    pub detail: String,
    pub error: String,
}

impl AuxiliaryCheck {
    fn verdict(address: &str, check: AuxiliaryKind, supported: bool, detail: String) -> Self {
        AuxiliaryCheck {
            address: address.to_string(),
            check,
            supported: Some(supported),
            detail,
            error: String::new(),
        }
    }

    pub(crate) fn inconclusive(address: &str, check: AuxiliaryKind, err: &ProbeError) -> Self {
        AuxiliaryCheck {
            address: address.to_string(),
            check,
            supported: None,
            detail: String::new(),
            error: err.to_string(),
        }
    }
}

/// OpenSSL's rendering of the inappropriate_fallback alert (RFC 7507).
const INAPPROPRIATE_FALLBACK: &str = "inappropriate fallback";

impl Prober {
    /// Whether the server rejects a downgraded handshake that carries
    /// TLS_FALLBACK_SCSV.
    ///
    /// The server's best protocol is learned first; the second handshake is capped
    /// one version below it. A server whose best protocol is TLS 1.0 cannot be
    /// judged.
    pub fn check_fallback_scsv(&self, address: &str) -> AuxiliaryCheck {
        let kind = AuxiliaryKind::FallbackScsv;
        trace!(address, scsv = TLS_FALLBACK_SCSV, "checking TLS_FALLBACK_SCSV");

        let best = match self.negotiated_version(address) {
            Ok(best) => best,
            Err(err) => {
                warn!(address, error = %err, "fallback check: baseline handshake failed");
                return AuxiliaryCheck::inconclusive(address, kind, &err);
            }
        };
        let lower = match best.previous().filter(|p| *p >= ProtocolVersion::Tls10) {
            Some(lower) => lower,
            None => {
                let err = ProbeError::Other {
                    message: format!("no protocol below {} to fall back to", best),
                };
                return AuxiliaryCheck::inconclusive(address, kind, &err);
            }
        };

        let outcome = self.handshake_with(address, |builder| {
            builder.set_max_proto_version(Some(lower.ssl_version()))?;
            builder.set_mode(SslMode::SEND_FALLBACK_SCSV);
            Ok(())
        });
        match outcome {
            Ok(_) => {
                debug!(address, %lower, "server accepted fallback handshake");
                AuxiliaryCheck::verdict(address, kind, false, lower.to_string())
            }
            Err(ProbeError::HandshakeFailed { details })
                if details.to_lowercase().contains(INAPPROPRIATE_FALLBACK) =>
            {
                debug!(address, %lower, "server rejected fallback handshake");
                AuxiliaryCheck::verdict(address, kind, true, lower.to_string())
            }
            Err(err) => {
                warn!(address, error = %err, "fallback check inconclusive");
                AuxiliaryCheck::inconclusive(address, kind, &err)
            }
        }
    }

    /// Whether the server selects one of the configured ALPN identifiers.
    pub fn check_alpn(&self, address: &str) -> AuxiliaryCheck {
        let kind = AuxiliaryKind::Alpn;
        trace!(address, "checking ALPN");

        let wire = match alpn_wire_format(&self.settings.alpn_protocols) {
            Ok(wire) => wire,
            Err(err) => return AuxiliaryCheck::inconclusive(address, kind, &err),
        };
        let outcome = self.handshake_with(address, |builder| {
            builder.set_alpn_protos(&wire)?;
            Ok(())
        });
        match outcome {
            Ok(done) => {
                let supported = done.completed && !done.alpn.is_empty();
                AuxiliaryCheck::verdict(address, kind, supported, done.alpn)
            }
            Err(err) => {
                warn!(address, error = %err, "ALPN check inconclusive");
                AuxiliaryCheck::inconclusive(address, kind, &err)
            }
        }
    }

    fn negotiated_version(&self, address: &str) -> Result<ProtocolVersion, ProbeError> {
        let done = self.handshake_with(address, |_| Ok(()))?;
        done.version.ok_or_else(|| ProbeError::HandshakeFailed {
            details: "server negotiated an unknown protocol version".to_string(),
        })
    }

    /// One retried handshake over a permissive connector adjusted by `configure`.
    fn handshake_with<F>(&self, address: &str, configure: F) -> Result<Negotiated, ProbeError>
    where
        F: Fn(&mut openssl::ssl::SslConnectorBuilder) -> Result<(), ProbeError>,
    {
        let (host, port) = connect::split_host_port(address)?;
        self.settings.retry.run(&self.cancel, |attempt| {
            debug!(address, attempt, "auxiliary handshake attempt");
            let mut builder = open_builder(None)?;
            configure(&mut builder)?;
            let connector: SslConnector = builder.build();
            let config = connector.configure()?.verify_hostname(false);

            let tcp = connect::dial(&host, port, self.settings.timeout, &self.cancel)?;
            self.cancel.check()?;
            let mut stream = config
                .connect(&host, tcp)
                .map_err(|e| self.cancel.or_cancelled(e))?;
            let ssl = stream.ssl();
            let done = Negotiated {
                version: ssl.version2().and_then(ProtocolVersion::from_ssl_version),
                completed: ssl.is_init_finished(),
                alpn: ssl
                    .selected_alpn_protocol()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .unwrap_or_default(),
            };
            let _ = stream.shutdown();
            Ok(done)
        })
    }
}

struct Negotiated {
    version: Option<ProtocolVersion>,
    completed: bool,
    alpn: String,
}

/// Encodes identifiers as length-prefixed strings.
fn alpn_wire_format(protocols: &[String]) -> Result<Vec<u8>, ProbeError> {
    let mut wire = Vec::new();
    for protocol in protocols {
        let len = protocol.len();
        if len == 0 || len > 255 {
            return Err(ProbeError::InvalidInput {
                field: "alpn_protocols".to_string(),
                reason: format!("identifier must be 1 to 255 bytes: {:?}", protocol),
            });
        }
        wire.push(len as u8);
        wire.extend_from_slice(protocol.as_bytes());
    }
    Ok(wire)
}
