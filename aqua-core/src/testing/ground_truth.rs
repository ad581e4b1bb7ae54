//! In-process ground-truth responder.

use crate::error::Result;
use crate::ground_truth::{GroundTruthRecord, REQUEST_TOKEN};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the stub answers a request token.
#[derive(Debug, Clone, Copy)]
enum Reply {
    Fixed(GroundTruthRecord),
    Silent,
    /// `busy_workers` is the 1-based request number; the first reply is
    /// held back for the delay.
    SlowFirst(GroundTruthRecord, Duration),
}

/// A TCP responder that answers every request token with a fixed record.
///
/// The listener task is aborted when the stub is dropped.
#[derive(Debug)]
pub struct GroundTruthStub {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl GroundTruthStub {
    /// Listen on an ephemeral localhost port and answer with `record`.
    pub async fn spawn(record: GroundTruthRecord) -> Result<Self> {
        Self::listen(Reply::Fixed(record)).await
    }

    /// Listen on an ephemeral localhost port and never answer.
    pub async fn silent() -> Result<Self> {
        Self::listen(Reply::Silent).await
    }

    /// Answer with `record`, numbering replies in `busy_workers` and holding
    /// the very first one back for `delay`.
    pub async fn slow_first(record: GroundTruthRecord, delay: Duration) -> Result<Self> {
        Self::listen(Reply::SlowFirst(record, delay)).await
    }

    async fn listen(reply: Reply) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, reply, Arc::clone(&counter)));
            }
        });
        Ok(Self { addr, requests, task })
    }

    /// Address to connect to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of request tokens received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for GroundTruthStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, reply: Reply, requests: Arc<AtomicUsize>) {
    let mut token = [0u8; REQUEST_TOKEN.len()];
    while stream.read_exact(&mut token).await.is_ok() {
        let number = requests.fetch_add(1, Ordering::SeqCst) + 1;
        if &token != REQUEST_TOKEN {
            return;
        }
        let record = match reply {
            Reply::Fixed(record) => record,
            Reply::Silent => continue,
            Reply::SlowFirst(record, delay) => {
                if number == 1 {
                    tokio::time::sleep(delay).await;
                }
                GroundTruthRecord {
                    busy_workers: number as i32,
                    ..record
                }
            }
        };
        if stream.write_all(&record.to_bytes()).await.is_err() {
            return;
        }
    }
}
