pub mod icmp;
pub mod packet;

use crate::resolver::AddressFamily;
use std::fmt;
use std::io;
use std::time::Duration;

#[derive(Debug)]
pub enum PingError {
    Resolution {
        host: String,
        reason: String,
    },
    SocketOpen {
        family: AddressFamily,
        source: io::Error,
    },
    UnsupportedFamily,
    Send {
        source: io::Error,
    },
    Receive {
        source: io::Error,
        elapsed: Duration,
    },
    Timeout {
        elapsed: Duration,
    },
    Cancelled {
        elapsed: Duration,
    },
    BackendClosed,
}

impl PingError {
    /// Time spent between the request leaving the host and the failure. Zero when the
    /// failure happened before anything was sent.
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Receive { elapsed, .. }
            | Self::Timeout { elapsed }
            | Self::Cancelled { elapsed } => *elapsed,
            _ => Duration::from_secs(0),
        }
    }

    /// Raw socket creation usually fails because the process lacks CAP_NET_RAW.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::SocketOpen { source, .. } => source.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution { host, reason } => {
                write!(f, "failed to resolve {}: {}", host, reason)
            }
            Self::SocketOpen { family, source } => {
                write!(f, "failed to open {} icmp socket: {}", family, source)
            }
            Self::UnsupportedFamily => write!(f, "unsupported address family"),
            Self::Send { source } => write!(f, "failed to send echo request: {}", source),
            Self::Receive { source, .. } => write!(f, "failed to read echo reply: {}", source),
            Self::Timeout { elapsed } => write!(f, "no echo reply after {:?}", elapsed),
            Self::Cancelled { elapsed } => write!(f, "ping cancelled after {:?}", elapsed),
            Self::BackendClosed => write!(f, "ping task ended without a result"),
        }
    }
}

impl std::error::Error for PingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SocketOpen { source, .. }
            | Self::Send { source }
            | Self::Receive { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Collapses a ping result into the `(success, seconds)` pair handed to result handlers.
pub fn report(result: &Result<Duration, PingError>) -> (bool, f64) {
    match result {
        Ok(latency) => (true, latency.as_secs_f64()),
        Err(error) => (false, error.elapsed().as_secs_f64()),
    }
}
