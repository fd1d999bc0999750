//! TCP dialing shared by the prober and the chain retriever.

use crate::error::ProbeError;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Cancellation flag shared between a caller and in-flight work.
///
/// The flag is observed before each dial, handshake, HTTP request and retry.
/// Cancelling also shuts down every socket handed out by [`dial`] that is still
/// open, so a blocked handshake returns immediately. A TCP connect that is
/// still in progress runs until its timeout.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    in_flight: Arc<Mutex<InFlight>>,
}

#[derive(Debug, Default)]
struct InFlight {
    next_id: u64,
    sockets: HashMap<u64, TcpStream>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Ok(in_flight) = self.in_flight.lock() {
            for socket in in_flight.sockets.values() {
                let _ = socket.shutdown(Shutdown::Both);
            }
            debug!(sockets = in_flight.sockets.len(), "cancelled in-flight connections");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ProbeError> {
        if self.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        Ok(())
    }

    /// `Cancelled` if the token fired, otherwise `err` converted.
    ///
    /// A socket shut down by [`cancel`](Self::cancel) surfaces as an I/O or
    /// handshake failure; this reports it as what it is.
    pub fn or_cancelled<E: Into<ProbeError>>(&self, err: E) -> ProbeError {
        if self.is_cancelled() {
            return ProbeError::Cancelled;
        }
        err.into()
    }

    fn track(&self, stream: &TcpStream) -> Result<u64, ProbeError> {
        let handle = stream.try_clone()?;
        let mut in_flight = self.in_flight.lock().map_err(|_| ProbeError::Other {
            message: "cancellation registry poisoned".to_string(),
        })?;
        in_flight.next_id += 1;
        let id = in_flight.next_id;
        in_flight.sockets.insert(id, handle);
        Ok(id)
    }

    fn release(&self, id: u64) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.sockets.remove(&id);
        }
    }
}

/// A dialed connection that [`CancellationToken::cancel`] can interrupt.
///
/// Dropping it releases the token's handle on the socket.
#[derive(Debug)]
pub struct CancellableStream {
    stream: TcpStream,
    token: CancellationToken,
    id: u64,
}

impl CancellableStream {
    fn new(stream: TcpStream, token: &CancellationToken) -> Result<Self, ProbeError> {
        let id = token.track(&stream)?;
        let tracked = CancellableStream {
            stream,
            token: token.clone(),
            id,
        };
        // cancel() may have run between connect and track.
        token.check()?;
        Ok(tracked)
    }
}

impl Deref for CancellableStream {
    type Target = TcpStream;

    fn deref(&self) -> &TcpStream {
        &self.stream
    }
}

impl Read for CancellableStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for CancellableStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for CancellableStream {
    fn drop(&mut self) {
        self.token.release(self.id);
    }
}

/// Splits `host:port`, accepting bracketed IPv6 literals.
pub fn split_host_port(address: &str) -> Result<(String, u16), ProbeError> {
    let invalid = |reason: &str| ProbeError::InvalidInput {
        field: "address".to_string(),
        reason: format!("{}: {}", reason, address),
    };
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
    Ok((host.to_string(), port))
}

/// Resolves `host:port` and connects to the first address that accepts.
///
/// Read and write timeouts on the returned stream are set to `timeout`, so a
/// stalled handshake surfaces as a timeout rather than hanging. The stream is
/// registered with `cancel` until it is dropped.
pub fn dial(
    host: &str,
    port: u16,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CancellableStream, ProbeError> {
    cancel.check()?;
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| ProbeError::DnsResolution {
            hostname: host.to_string(),
            source,
        })?
        .collect();
    if addresses.is_empty() {
        return Err(ProbeError::DnsResolution {
            hostname: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    let mut last_error = None;
    for address in addresses {
        cancel.check()?;
        trace!(%address, "dialing");
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                return CancellableStream::new(stream, cancel);
            }
            Err(source) => last_error = Some((address, source)),
        }
    }

    match last_error {
        Some((address, source)) if source.kind() == io::ErrorKind::TimedOut => {
            Err(ProbeError::Timeout {
                operation: format!("dial tcp {}: i/o timeout", address),
            })
        }
        Some((address, source)) => Err(ProbeError::ConnectionFailed {
            address: address.to_string(),
            source,
        }),
        None => Err(ProbeError::Other {
            message: format!("no address attempted for {}:{}", host, port),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:443").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            split_host_port("[::1]:8443").unwrap(),
            ("::1".to_string(), 8443)
        );
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port(":443").is_err());
        assert!(split_host_port("example.com:https").is_err());
    }

    #[test]
    fn test_dial_refused_is_connection_fatal() {
        // Port 1 on loopback is not expected to be listening.
        let err = dial(
            "127.0.0.1",
            1,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ProbeError::ConnectionFailed { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_dial_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dial("127.0.0.1", 1, Duration::from_secs(1), &cancel).unwrap_err();
        assert!(matches!(err, ProbeError::Cancelled));
    }

    #[test]
    fn test_cancel_interrupts_blocked_read() {
        use std::net::TcpListener;
        use std::thread;
        use std::time::Instant;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accepts and then stays silent.
        let server = thread::spawn(move || listener.accept().map(|(socket, _)| socket));

        let cancel = CancellationToken::new();
        let mut stream = dial("127.0.0.1", port, Duration::from_secs(30), &cancel).unwrap();
        let _silent = server.join().unwrap().unwrap();

        let canceller = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let started = Instant::now();
        let mut buf = [0u8; 16];
        let read = stream.read(&mut buf);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(matches!(
            cancel.or_cancelled(io::Error::from(io::ErrorKind::ConnectionReset)),
            ProbeError::Cancelled
        ));
    }

    #[test]
    fn test_dropped_stream_is_released() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let cancel = CancellationToken::new();

        let stream = dial("127.0.0.1", port, Duration::from_secs(2), &cancel).unwrap();
        assert_eq!(cancel.in_flight.lock().unwrap().sockets.len(), 1);
        drop(stream);
        assert!(cancel.in_flight.lock().unwrap().sockets.is_empty());
        assert!(matches!(
            CancellationToken::new().or_cancelled("boom"),
            ProbeError::Other { .. }
        ));
    }
}
