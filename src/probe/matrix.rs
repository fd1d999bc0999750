use super::auxiliary::{AuxiliaryCheck, AuxiliaryKind};
use super::pinned_connector;
use crate::catalog::{Catalog, CipherSuite, ProtocolVersion};
use crate::config::Settings;
use crate::connect::{self, CancellationToken};
use crate::error::{ErrorClass, ProbeError};
use openssl::ssl::NameType;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

/// One attempted (or skipped) protocol/cipher pair.
///
/// On success `error` is empty and the handshake fields are set. On failure only
/// `error` and `error_class` are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub address: String,
    pub version: String,
    pub cipher_suite_name: String,
    pub cipher_suite_id: String,
    /// Whether the pair is valid under the catalog. Unsupported pairs are never dialed.
    pub supported: bool,
    pub server_name: String,
    pub handshake_completed: bool,
    pub local_address: String,
    pub remote_address: String,
    pub error: String,
    pub error_class: Option<ErrorClass>,
}

impl ProbeResult {
    fn new(address: &str, version: &str, cipher: &str, suite: Option<&CipherSuite>) -> Self {
        ProbeResult {
            address: address.to_string(),
            version: version.to_string(),
            cipher_suite_name: cipher.to_string(),
            cipher_suite_id: suite
                .map(|s| s.hex_id())
                .unwrap_or_else(|| "0x0000".to_string()),
            supported: false,
            server_name: String::new(),
            handshake_completed: false,
            local_address: String::new(),
            remote_address: String::new(),
            error: String::new(),
            error_class: None,
        }
    }

    fn fail(mut self, err: &ProbeError) -> Self {
        self.server_name.clear();
        self.handshake_completed = false;
        self.local_address.clear();
        self.remote_address.clear();
        self.error = err.to_string();
        self.error_class = Some(err.class());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_empty()
    }
}

/// What to probe. Absent lists mean the full catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeRequest {
    pub address: String,
    pub protocols: Option<Vec<String>>,
    pub ciphers: Option<Vec<String>>,
}

impl ProbeRequest {
    pub fn new<S: Into<String>>(address: S) -> Self {
        ProbeRequest {
            address: address.into(),
            protocols: None,
            ciphers: None,
        }
    }

    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }

    pub fn ciphers<I, S>(mut self, ciphers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ciphers = Some(ciphers.into_iter().map(Into::into).collect());
        self
    }

    fn pairs(&self, catalog: &Catalog) -> Vec<(String, String)> {
        let protocols: Vec<String> = match &self.protocols {
            Some(list) => list.clone(),
            None => ProtocolVersion::DEFAULT_PROBE_ORDER
                .iter()
                .map(|p| p.to_string())
                .collect(),
        };
        let ciphers: Vec<String> = match &self.ciphers {
            Some(list) => list.clone(),
            None => catalog
                .all_cipher_suites()
                .map(|s| s.name.to_string())
                .collect(),
        };
        protocols
            .iter()
            .flat_map(|p| ciphers.iter().map(move |c| (p.clone(), c.clone())))
            .collect()
    }
}

/// Lazily yields one [`ProbeResult`] per requested pair, in completion order.
///
/// The stream ends once every worker has reported.
#[derive(Debug)]
pub struct ProbeStream {
    receiver: Receiver<ProbeResult>,
    expected: usize,
    received: usize,
}

impl ProbeStream {
    /// Number of rows the stream yields in total.
    pub fn expected(&self) -> usize {
        self.expected
    }
}

impl Iterator for ProbeStream {
    type Item = ProbeResult;

    fn next(&mut self) -> Option<ProbeResult> {
        let row = self.receiver.recv().ok()?;
        self.received += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.expected.saturating_sub(self.received);
        (remaining, Some(remaining))
    }
}

/// Matrix results plus the per-address auxiliary checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub address: String,
    pub results: Vec<ProbeResult>,
    pub fallback_scsv: AuxiliaryCheck,
    pub alpn: AuxiliaryCheck,
}

/// Enumerates the protocol/cipher pairs a TLS endpoint accepts.
#[derive(Debug, Clone)]
pub struct Prober {
    pub(super) settings: Arc<Settings>,
    catalog: Catalog,
    pub(super) cancel: CancellationToken,
}

impl Prober {
    pub fn new(settings: Settings) -> Self {
        Prober::with_catalog(settings, Catalog::standard())
    }

    pub fn with_catalog(settings: Settings, catalog: Catalog) -> Self {
        Prober {
            settings: Arc::new(settings),
            catalog,
            cancel: CancellationToken::new(),
        }
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog
    }

    /// Token that aborts in-flight and future probes of this prober and its clones.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Starts probing and returns the result stream immediately.
    ///
    /// Incompatible pairs are reported without any network I/O. Every compatible
    /// pair gets its own worker thread.
    pub fn probe(&self, request: &ProbeRequest) -> ProbeStream {
        let pairs = request.pairs(&self.catalog);
        let expected = pairs.len();
        let (sender, receiver) = mpsc::channel();
        trace!(address = %request.address, pairs = expected, "starting probe");

        let prober = self.clone();
        let address = request.address.clone();
        let coordinator = thread::Builder::new()
            .name("probe-coordinator".to_string())
            .spawn({
                let sender = sender.clone();
                move || prober.dispatch(&address, pairs, sender)
            });
        if let Err(e) = coordinator {
            // Without a coordinator no row would ever arrive; report every pair here.
            let err = ProbeError::from(e);
            for (version, cipher) in request.pairs(&self.catalog) {
                let row = ProbeResult::new(&request.address, &version, &cipher, None);
                let _ = sender.send(row.fail(&err));
            }
        }

        ProbeStream {
            receiver,
            expected,
            received: 0,
        }
    }

    fn dispatch(&self, address: &str, pairs: Vec<(String, String)>, sender: Sender<ProbeResult>) {
        for (version, cipher) in pairs {
            let protocol = ProtocolVersion::from_str(&version).ok();
            let suite = self.catalog.cipher_suite(&cipher);
            let row = ProbeResult::new(address, &version, &cipher, suite);

            let (protocol, suite) = match (protocol, suite) {
                (Some(p), Some(s)) if self.catalog.is_compatible(p, s.name) => (p, s),
                _ => {
                    let _ = sender.send(row.fail(&ProbeError::UnsupportedCombination));
                    continue;
                }
            };

            let worker = self.clone();
            let tx = sender.clone();
            let pending = ProbeResult {
                supported: true,
                ..row.clone()
            };
            let spawned = thread::Builder::new()
                .name(format!("probe-{}", suite.name))
                .spawn(move || {
                    let row = worker.attempt(pending, protocol, suite);
                    let _ = tx.send(row);
                });
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn probe worker");
                let row = ProbeResult {
                    supported: true,
                    ..row
                };
                let _ = sender.send(row.fail(&ProbeError::from(e)));
            }
        }
    }

    fn attempt(&self, row: ProbeResult, protocol: ProtocolVersion, suite: &CipherSuite) -> ProbeResult {
        let outcome = connect::split_host_port(&row.address).and_then(|(host, port)| {
            self.settings.retry.run(&self.cancel, |attempt| {
                debug!(address = %row.address, %protocol, cipher = suite.name, attempt, "handshake attempt");
                self.handshake(&host, port, protocol, suite)
            })
        });
        match outcome {
            Ok(done) => ProbeResult {
                server_name: done.server_name,
                handshake_completed: done.handshake_completed,
                local_address: done.local_address,
                remote_address: done.remote_address,
                ..row
            },
            Err(err) => {
                debug!(address = %row.address, %protocol, cipher = suite.name, error = %err, "handshake failed");
                row.fail(&err)
            }
        }
    }

    fn handshake(
        &self,
        host: &str,
        port: u16,
        protocol: ProtocolVersion,
        suite: &CipherSuite,
    ) -> Result<Handshake, ProbeError> {
        let config = pinned_connector(protocol, suite)?
            .configure()?
            .verify_hostname(false);
        let tcp = connect::dial(host, port, self.settings.timeout, &self.cancel)?;
        let local_address = tcp.local_addr()?.to_string();
        let remote_address = tcp.peer_addr()?.to_string();
        self.cancel.check()?;

        let mut stream = config
            .connect(host, tcp)
            .map_err(|e| self.cancel.or_cancelled(e))?;
        let ssl = stream.ssl();
        let done = Handshake {
            server_name: ssl
                .servername(NameType::HOST_NAME)
                .unwrap_or_default()
                .to_string(),
            handshake_completed: ssl.is_init_finished(),
            local_address,
            remote_address,
        };
        let _ = stream.shutdown();
        Ok(done)
    }

    /// Runs the matrix and both auxiliary checks, then waits for all of them.
    pub fn probe_all(&self, request: &ProbeRequest) -> ProbeReport {
        let fallback = self.spawn_check(&request.address, AuxiliaryKind::FallbackScsv);
        let alpn = self.spawn_check(&request.address, AuxiliaryKind::Alpn);

        let mut results: Vec<ProbeResult> = self.probe(request).collect();
        results.sort_by(|a, b| {
            (a.version.as_str(), a.cipher_suite_name.as_str())
                .cmp(&(b.version.as_str(), b.cipher_suite_name.as_str()))
        });

        ProbeReport {
            address: request.address.clone(),
            results,
            fallback_scsv: join_check(fallback, &request.address, AuxiliaryKind::FallbackScsv),
            alpn: join_check(alpn, &request.address, AuxiliaryKind::Alpn),
        }
    }

    fn spawn_check(
        &self,
        address: &str,
        kind: AuxiliaryKind,
    ) -> Result<thread::JoinHandle<AuxiliaryCheck>, ProbeError> {
        let prober = self.clone();
        let address = address.to_string();
        thread::Builder::new()
            .name(format!("probe-{}", kind))
            .spawn(move || match kind {
                AuxiliaryKind::FallbackScsv => prober.check_fallback_scsv(&address),
                AuxiliaryKind::Alpn => prober.check_alpn(&address),
            })
            .map_err(ProbeError::from)
    }
}

struct Handshake {
    server_name: String,
    handshake_completed: bool,
    local_address: String,
    remote_address: String,
}

fn join_check(
    handle: Result<thread::JoinHandle<AuxiliaryCheck>, ProbeError>,
    address: &str,
    kind: AuxiliaryKind,
) -> AuxiliaryCheck {
    match handle {
        Ok(handle) => handle.join().unwrap_or_else(|_| {
            AuxiliaryCheck::inconclusive(address, kind, &ProbeError::from("check panicked"))
        }),
        Err(err) => AuxiliaryCheck::inconclusive(address, kind, &err),
    }
}
