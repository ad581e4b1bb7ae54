//! Persistent per-server connections.

use super::{GroundTruthConfig, GroundTruthRecord, RECORD_SIZE, REQUEST_TOKEN};
use crate::error::{AquaError, Result};
use crate::features::ActiveServers;
use futures::future::try_join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// One server's answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroundTruthSample {
    /// Server id the request was sent to.
    pub server: usize,
    /// The server's record.
    pub record: GroundTruthRecord,
}

/// A server's socket. The stream is taken out for the length of an
/// exchange; one that fails or is dropped midway never comes back, so a
/// late reply cannot be read as the answer to a later request.
#[derive(Debug)]
struct Connection {
    server: usize,
    addr: String,
    stream: Option<TcpStream>,
    buf: [u8; RECORD_SIZE],
}

/// Open connections to every configured server.
#[derive(Debug)]
pub struct GroundTruthChannel {
    connections: Vec<Connection>,
    timeout: Option<Duration>,
}

impl GroundTruthChannel {
    /// Connect to every endpoint. Any failed connection fails the whole call.
    pub async fn connect(config: &GroundTruthConfig) -> Result<Self> {
        let connects = config.endpoints.iter().map(|endpoint| async move {
            let stream = open_stream(endpoint.server_id, &endpoint.addr).await?;
            Ok::<_, AquaError>(Connection {
                server: endpoint.server_id,
                addr: endpoint.addr.clone(),
                stream: Some(stream),
                buf: [0; RECORD_SIZE],
            })
        });
        let connections = try_join_all(connects).await?;
        info!(servers = connections.len(), "Connected ground-truth channel");
        Ok(Self {
            connections,
            timeout: config.timeout,
        })
    }

    /// Server ids with an open connection.
    pub fn servers(&self) -> Vec<usize> {
        self.connections.iter().map(|c| c.server).collect()
    }

    /// Request one record from every active server with a connection.
    ///
    /// All requests run concurrently and are joined before returning; a
    /// single failure fails the whole fetch. Samples are ordered by server id.
    /// A server whose exchange did not complete is reconnected on its next
    /// fetch.
    pub async fn fetch(&mut self, active: &ActiveServers) -> Result<Vec<GroundTruthSample>> {
        let timeout = self.timeout;
        let exchanges = self
            .connections
            .iter_mut()
            .filter(|c| active.contains(c.server))
            .map(|c| c.exchange(timeout));
        let mut samples = try_join_all(exchanges).await?;
        samples.sort_by_key(|s| s.server);
        debug!(samples = samples.len(), "Fetched ground truth");
        Ok(samples)
    }
}

impl Connection {
    async fn exchange(&mut self, timeout: Option<Duration>) -> Result<GroundTruthSample> {
        let server = self.server;
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                debug!(server, addr = %self.addr, "Reconnecting ground-truth server");
                open_stream(server, &self.addr).await?
            }
        };
        let buf = &mut self.buf;
        let request = async {
            stream.write_all(REQUEST_TOKEN).await?;
            stream.read_exact(buf).await?;
            Ok::<_, std::io::Error>(())
        };
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| AquaError::GroundTruthTimeout { server, timeout: limit })?,
            None => request.await,
        };
        outcome.map_err(|e| AquaError::GroundTruthExchange {
            server,
            cause: e.to_string(),
        })?;
        self.stream = Some(stream);
        Ok(GroundTruthSample {
            server,
            record: GroundTruthRecord::from_bytes(&self.buf)?,
        })
    }
}

async fn open_stream(server: usize, addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| AquaError::GroundTruthConnect {
            server,
            addr: addr.to_string(),
            cause: e.to_string(),
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ground_truth::Endpoint;
    use crate::testing::GroundTruthStub;

    fn record(server_id: i32) -> GroundTruthRecord {
        GroundTruthRecord {
            cpu: 0.25 * f64::from(server_id),
            memory: 1024 * i64::from(server_id),
            busy_workers: server_id,
            server_id,
        }
    }

    #[tokio::test]
    async fn fetch_only_active_servers() {
        let a = GroundTruthStub::spawn(record(1)).await.unwrap();
        let b = GroundTruthStub::spawn(record(2)).await.unwrap();
        let config = GroundTruthConfig::new(vec![
            Endpoint::new(2, b.addr().to_string()),
            Endpoint::new(1, a.addr().to_string()),
        ]);
        let mut channel = GroundTruthChannel::connect(&config).await.unwrap();
        assert_eq!(channel.servers(), vec![2, 1]);

        let active = ActiveServers::from_ids([1, 2], 4).unwrap();
        let samples = channel.fetch(&active).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].server, 1);
        assert_eq!(samples[0].record, record(1));
        assert_eq!(samples[1].record, record(2));

        // The connections stay open across fetches.
        let active = ActiveServers::from_ids([2], 4).unwrap();
        let samples = channel.fetch(&active).await.unwrap();
        assert_eq!(samples, vec![GroundTruthSample { server: 2, record: record(2) }]);
    }

    #[tokio::test]
    async fn hung_server_times_out() {
        let stub = GroundTruthStub::silent().await.unwrap();
        let config = GroundTruthConfig::new(vec![Endpoint::new(0, stub.addr().to_string())])
            .with_timeout(Some(Duration::from_millis(50)));
        let mut channel = GroundTruthChannel::connect(&config).await.unwrap();
        let active = ActiveServers::from_ids([0], 4).unwrap();
        let err = channel.fetch(&active).await.unwrap_err();
        assert!(matches!(err, AquaError::GroundTruthTimeout { server: 0, .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_one() {
        let stub = GroundTruthStub::slow_first(record(0), Duration::from_millis(300))
            .await
            .unwrap();
        let config = GroundTruthConfig::new(vec![Endpoint::new(0, stub.addr().to_string())])
            .with_timeout(Some(Duration::from_millis(50)));
        let mut channel = GroundTruthChannel::connect(&config).await.unwrap();
        let active = ActiveServers::from_ids([0], 4).unwrap();

        let err = channel.fetch(&active).await.unwrap_err();
        assert!(matches!(err, AquaError::GroundTruthTimeout { server: 0, .. }));

        // Replies carry the request number in `busy_workers`.
        let samples = channel.fetch(&active).await.unwrap();
        assert_eq!(samples[0].record.busy_workers, 2);
        let samples = channel.fetch(&active).await.unwrap();
        assert_eq!(samples[0].record.busy_workers, 3);
    }

    #[tokio::test]
    async fn failed_sibling_does_not_desync_the_others() {
        let slow = GroundTruthStub::slow_first(record(0), Duration::from_millis(300))
            .await
            .unwrap();
        let hung = GroundTruthStub::silent().await.unwrap();
        let config = GroundTruthConfig::new(vec![
            Endpoint::new(0, slow.addr().to_string()),
            Endpoint::new(1, hung.addr().to_string()),
        ])
        .with_timeout(Some(Duration::from_millis(50)));
        let mut channel = GroundTruthChannel::connect(&config).await.unwrap();

        let both = ActiveServers::from_ids([0, 1], 4).unwrap();
        assert!(channel.fetch(&both).await.is_err());

        let only_slow = ActiveServers::from_ids([0], 4).unwrap();
        let samples = channel.fetch(&only_slow).await.unwrap();
        assert_eq!(samples[0].record.busy_workers, 2);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let config = GroundTruthConfig::new(vec![Endpoint::new(5, addr)]);
        let err = GroundTruthChannel::connect(&config).await.unwrap_err();
        assert!(matches!(err, AquaError::GroundTruthConnect { server: 5, .. }));
    }
}
