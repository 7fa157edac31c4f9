//! Relay target resolution.
//!
//! A target is either `tcp://host:port` (with `[host]:port` for IPv6
//! literals) or a bare filesystem path to a local stream socket.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use iotc_relay_protocol::constants::TCP_SCHEME;

use crate::error::RelayError;

/// Where the relay broker listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Local stream socket (Unix domain socket).
    Local { path: PathBuf },
    /// Routed TCP endpoint.
    Tcp { host: String, port: u16 },
}

impl ConnectionTarget {
    /// Parses a target string.
    ///
    /// Only `tcp://` targets are validated; anything else is taken as a
    /// socket path and checked at connect time.
    pub fn parse(target: &str) -> Result<Self, RelayError> {
        let Some(rest) = target.strip_prefix(TCP_SCHEME) else {
            return Ok(Self::Local {
                path: PathBuf::from(target),
            });
        };

        let (host, port) = match rest.strip_prefix('[') {
            Some(bracketed) => {
                let (host, after) = bracketed
                    .split_once(']')
                    .ok_or_else(|| RelayError::invalid_target(target, "unterminated '[' in host"))?;
                let port = after
                    .strip_prefix(':')
                    .ok_or_else(|| RelayError::invalid_target(target, "missing :port"))?;
                (host, port)
            }
            None => rest
                .rsplit_once(':')
                .ok_or_else(|| RelayError::invalid_target(target, "missing :port"))?,
        };

        if host.is_empty() {
            return Err(RelayError::invalid_target(target, "empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| RelayError::invalid_target(target, format!("invalid port {port:?}")))?;

        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl FromStr for ConnectionTarget {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::Tcp { host, port } if host.contains(':') => {
                write!(f, "{TCP_SCHEME}[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(f, "{TCP_SCHEME}{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(host: &str, port: u16) -> ConnectionTarget {
        ConnectionTarget::Tcp {
            host: host.into(),
            port,
        }
    }

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            ConnectionTarget::parse("tcp://172.17.0.1:8899").unwrap(),
            tcp("172.17.0.1", 8899)
        );
        assert_eq!(
            ConnectionTarget::parse("tcp://relay.local:1").unwrap(),
            tcp("relay.local", 1)
        );
    }

    #[test]
    fn parses_bracketed_ipv6() {
        assert_eq!(
            ConnectionTarget::parse("tcp://[::1]:8899").unwrap(),
            tcp("::1", 8899)
        );
        assert_eq!(
            ConnectionTarget::parse("tcp://[fe80::1%eth0]:65535").unwrap(),
            tcp("fe80::1%eth0", 65535)
        );
    }

    #[test]
    fn unbracketed_ipv6_splits_on_last_colon() {
        assert_eq!(
            ConnectionTarget::parse("tcp://::1:8899").unwrap(),
            tcp("::1", 8899)
        );
    }

    #[test]
    fn rejects_malformed_tcp_targets() {
        for bad in [
            "tcp://localhost",
            "tcp://localhost:",
            "tcp://localhost:http",
            "tcp://localhost:70000",
            "tcp://localhost:-1",
            "tcp://:8899",
            "tcp://[::1]",
            "tcp://[::1]8899",
            "tcp://[::1:8899",
            "tcp://[]:8899",
        ] {
            let err = ConnectionTarget::parse(bad).unwrap_err();
            assert!(
                matches!(err, RelayError::InvalidTarget { ref target, .. } if target == bad),
                "{bad} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn anything_else_is_a_local_path() {
        let target = ConnectionTarget::parse("/tmp/iotconnect-relay.sock").unwrap();
        assert_eq!(
            target,
            ConnectionTarget::Local {
                path: "/tmp/iotconnect-relay.sock".into()
            }
        );

        // No validation beyond the scheme check.
        for path in ["udp://host:1", ""] {
            assert!(matches!(
                ConnectionTarget::parse(path).unwrap(),
                ConnectionTarget::Local { .. }
            ));
        }
    }

    #[test]
    fn parse_is_deterministic() {
        let a: ConnectionTarget = "tcp://[::1]:9000".parse().unwrap();
        let b: ConnectionTarget = "tcp://[::1]:9000".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn display_round_trips() {
        for s in ["tcp://127.0.0.1:8899", "tcp://[::1]:8899", "/run/relay.sock"] {
            let target = ConnectionTarget::parse(s).unwrap();
            assert_eq!(target.to_string(), s);
        }
    }
}
