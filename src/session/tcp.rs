use super::{OutputSink, Transport};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

/// Transport for serial ports exposed over TCP (ser2net, socat). The
/// bridge relays raw bytes; nothing here negotiates telnet options.
pub struct TcpTransport {
    outbound: mpsc::Sender<Option<Vec<u8>>>,
    remote_closed: Arc<AtomicBool>,
}

impl TcpTransport {
    pub async fn connect(
        addr: &str,
        connect_timeout_ms: u64,
        output: OutputSink,
    ) -> StorageResult<Self> {
        let budget = Duration::from_millis(connect_timeout_ms);
        let stream = match timeout(budget, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(StorageError::connect(format!("Bridge connect failed: {addr}"))
                    .with_details(err.to_string()));
            }
            Err(_) => {
                return Err(StorageError::connect(format!(
                    "Bridge connect timeout: {addr}"
                )));
            }
        };

        let (read_half, write_half) = stream.into_split();
        // A `None` message tells the writer half to shut down.
        let (outbound, rx) = mpsc::channel(32);
        let remote_closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(pump_outbound(rx, write_half));
        tokio::spawn(pump_inbound(read_half, output, remote_closed.clone()));

        tracing::info!(addr = %addr, "Bridge connected");
        Ok(Self {
            outbound,
            remote_closed,
        })
    }
}

async fn pump_outbound(mut rx: mpsc::Receiver<Option<Vec<u8>>>, mut half: OwnedWriteHalf) {
    loop {
        match rx.recv().await {
            Some(Some(bytes)) => {
                if let Err(err) = half.write_all(&bytes).await {
                    tracing::warn!(error = %err, "Bridge write failed");
                    break;
                }
                let _ = half.flush().await;
            }
            Some(None) | None => {
                let _ = half.shutdown().await;
                break;
            }
        }
    }
}

async fn pump_inbound(mut half: OwnedReadHalf, output: OutputSink, remote_closed: Arc<AtomicBool>) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        buf.clear();
        match half.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => output.push(&buf),
            Err(err) => {
                tracing::warn!(error = %err, "Bridge read failed");
                break;
            }
        }
    }
    // Bytes land in the sink before the flag flips, so a poller that
    // snapshots eof first can trust its subsequent peek.
    remote_closed.store(true, Ordering::SeqCst);
    output.mark_eof();
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&self, data: &[u8]) -> StorageResult<usize> {
        if self.outbound.send(Some(data.to_vec())).await.is_err() {
            return Err(StorageError::transport(
                "Bridge write failed; connection closed",
            ));
        }
        Ok(data.len())
    }

    async fn close(&self) -> StorageResult<()> {
        // Already-closed is fine; disconnect stays idempotent.
        let _ = self.outbound.send(None).await;
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.remote_closed.load(Ordering::SeqCst)
    }
}
