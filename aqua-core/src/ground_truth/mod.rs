//! Ground-truth side channel.
//!
//! Each server runs a small TCP responder that answers the token
//! [`REQUEST_TOKEN`] with one [`GroundTruthRecord`]. The bridge keeps one
//! connection per server open for its whole lifetime.

mod channel;
mod record;

pub use channel::{GroundTruthChannel, GroundTruthSample};
pub use record::{GroundTruthRecord, RECORD_SIZE, REQUEST_TOKEN};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::warn;

/// Port the ground-truth responders listen on in the reference deployment.
pub const DEFAULT_PORT: u16 = 50008;

/// Address prefix of the reference deployment's server hosts.
pub const DEFAULT_HOST_PREFIX: &str = "10.0.1.";

/// Where to reach one server's responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server id as used in the active-server bitmap.
    pub server_id: usize,
    /// `host:port` address.
    pub addr: String,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(server_id: usize, addr: impl Into<String>) -> Self {
        Self {
            server_id,
            addr: addr.into(),
        }
    }
}

/// Endpoints and per-request timeout of the ground-truth channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthConfig {
    /// One endpoint per server.
    pub endpoints: Vec<Endpoint>,
    /// Bound on each request/response exchange. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl GroundTruthConfig {
    /// Create a config over explicit endpoints with no timeout.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            timeout: None,
        }
    }

    /// Data-plane server ids count down from `n_servers` while hosts count
    /// up: server `s` lives on host `n_servers - s`, reachable at
    /// `<prefix><host + 1>:<port>`.
    pub fn reversed_hosts(prefix: &str, port: u16, n_servers: usize) -> Self {
        let endpoints = (1..=n_servers)
            .map(|server_id| {
                let host = n_servers - server_id;
                Endpoint::new(server_id, format!("{}{}:{}", prefix, host + 1, port))
            })
            .collect();
        Self::new(endpoints)
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint of a server.
    pub fn endpoint(&self, server_id: usize) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.server_id == server_id)
    }
}

/// Try to connect to every endpoint and return the ids of the servers that
/// could not be reached.
pub async fn check_endpoints(config: &GroundTruthConfig) -> Vec<usize> {
    let attempts = config.endpoints.iter().map(|endpoint| async move {
        let connect = TcpStream::connect(endpoint.addr.as_str());
        let reachable = match config.timeout {
            Some(limit) => matches!(tokio::time::timeout(limit, connect).await, Ok(Ok(_))),
            None => connect.await.is_ok(),
        };
        if !reachable {
            warn!(server = endpoint.server_id, addr = %endpoint.addr, "Ground-truth endpoint unreachable");
        }
        (endpoint.server_id, reachable)
    });
    futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|&(_, reachable)| !reachable)
        .map(|(server, _)| server)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GroundTruthStub;

    #[test]
    fn reversed_host_mapping() {
        let config = GroundTruthConfig::reversed_hosts(DEFAULT_HOST_PREFIX, DEFAULT_PORT, 3);
        assert_eq!(config.endpoint(3).unwrap().addr, "10.0.1.1:50008");
        assert_eq!(config.endpoint(1).unwrap().addr, "10.0.1.3:50008");
        assert!(config.endpoint(0).is_none());
        assert_eq!(config.timeout, None);
    }

    #[tokio::test]
    async fn check_reports_unreachable_servers() {
        let stub = GroundTruthStub::spawn(GroundTruthRecord {
            cpu: 0.1,
            memory: 1,
            busy_workers: 0,
            server_id: 0,
        })
        .await
        .unwrap();
        // Bind and drop a listener to get a port nobody listens on.
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_addr = closed.local_addr().unwrap().to_string();
        drop(closed);

        let config = GroundTruthConfig::new(vec![
            Endpoint::new(0, stub.addr().to_string()),
            Endpoint::new(1, closed_addr),
        ])
        .with_timeout(Some(Duration::from_secs(2)));
        assert_eq!(check_endpoints(&config).await, vec![1]);
    }
}
