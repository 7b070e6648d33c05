mod buffer;
mod command;
mod listing;
mod prompt;
mod serial;
mod tcp;
mod transfer;

use crate::config::{ConnectionConfig, TimingConfig};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use buffer::LineBuffer;
use prompt::contains_ready_prompt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep};

pub use listing::{DirEntry, EntryKind};
pub use prompt::READY_PROMPT;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Ctrl-C. Interrupts the shell on connect and ends streaming write mode.
pub(crate) const INTERRUPT: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
}

impl SessionState {
    fn from_u64(value: u64) -> Self {
        match value {
            x if x == SessionState::Connecting as u64 => SessionState::Connecting,
            x if x == SessionState::Ready as u64 => SessionState::Ready,
            x if x == SessionState::Closing as u64 => SessionState::Closing,
            _ => SessionState::Disconnected,
        }
    }
}

/// Duplex byte channel to the device. Implementations spawn their own
/// read loop at construction time and feed it into an [`OutputSink`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn write(&self, data: &[u8]) -> StorageResult<usize>;
    async fn close(&self) -> StorageResult<()>;
    fn is_eof(&self) -> bool;
}

struct Shared {
    buffer: Mutex<LineBuffer>,
    state: AtomicU64,
    eof: AtomicBool,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Handle a transport's read loop pushes received bytes into.
#[derive(Clone)]
pub struct OutputSink {
    shared: Arc<Shared>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(LineBuffer::new()),
                state: AtomicU64::new(SessionState::Disconnected as u64),
                eof: AtomicBool::new(false),
                bytes_in: AtomicU64::new(0),
                bytes_out: AtomicU64::new(0),
            }),
        }
    }

    pub fn push(&self, bytes: &[u8]) {
        {
            let mut buffer = self.shared.buffer.lock().expect("line buffer mutex poisoned");
            buffer.append(bytes);
        }
        self.shared
            .bytes_in
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);
    }

    /// Called by the read loop on end-of-stream or a fatal read error.
    /// Forces the session out of Ready so in-flight and later operations
    /// fail with `NotConnected` instead of hanging.
    pub fn mark_eof(&self) {
        self.shared.eof.store(true, Ordering::SeqCst);
        self.shared
            .state
            .store(SessionState::Disconnected as u64, Ordering::SeqCst);
    }

    pub fn is_eof(&self) -> bool {
        self.shared.eof.load(Ordering::SeqCst)
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}

/// One live connection to the device shell. Owned by the caller and
/// torn down with [`Session::disconnect`].
pub struct Session {
    transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    timing: TimingConfig,
    busy: AtomicBool,
}

impl Session {
    /// Opens the transport named by the connection config and performs
    /// the shell handshake.
    pub async fn open(
        connection: &ConnectionConfig,
        timing: &TimingConfig,
    ) -> StorageResult<Self> {
        let sink = OutputSink::new();
        let transport: Box<dyn Transport> = if connection.tcp.is_empty() {
            Box::new(SerialTransport::open(
                &connection.port,
                connection.baud,
                sink.clone(),
            )?)
        } else {
            Box::new(
                TcpTransport::connect(&connection.tcp, timing.connect_timeout_ms, sink.clone())
                    .await?,
            )
        };
        Self::connect(transport, sink, timing.clone()).await
    }

    /// Takes an already-opened transport and forces the remote shell to
    /// a known idle prompt. On handshake failure the transport is closed
    /// and the error returned.
    pub async fn connect(
        transport: Box<dyn Transport>,
        sink: OutputSink,
        timing: TimingConfig,
    ) -> StorageResult<Self> {
        let session = Self {
            transport,
            shared: sink.shared.clone(),
            timing,
            busy: AtomicBool::new(false),
        };
        session.set_state(SessionState::Connecting);
        match session.handshake().await {
            Ok(()) => {
                session.set_state(SessionState::Ready);
                tracing::info!("Device shell ready");
                Ok(session)
            }
            Err(err) => {
                if let Err(close_err) = session.transport.close().await {
                    tracing::warn!(error = %close_err, "Transport close after failed handshake");
                }
                session.set_state(SessionState::Disconnected);
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> StorageResult<()> {
        // Interrupt whatever the shell is doing, then ask for a fresh prompt.
        self.write_bytes(&[INTERRUPT]).await?;
        self.write_bytes(b"\r").await?;

        let budget = Duration::from_millis(self.timing.connect_timeout_ms);
        let poll = Duration::from_millis(self.timing.prompt_poll_interval_ms);
        let deadline = Instant::now() + budget;
        loop {
            // Snapshot eof before peeking: the reader pushes bytes before
            // it marks eof, so a true snapshot means the peek sees all of
            // them and is authoritative.
            let eof = self.shared.eof.load(Ordering::SeqCst) || self.transport.is_eof();
            {
                let buffer = self.lock_buffer();
                if contains_ready_prompt(&buffer.peek_text()) {
                    break;
                }
            }
            if eof {
                return Err(StorageError::connect("Transport closed during handshake"));
            }
            if Instant::now() >= deadline {
                return Err(StorageError::connect(format!(
                    "No shell prompt within {} ms",
                    self.timing.connect_timeout_ms
                )));
            }
            sleep(poll).await;
        }

        let banner = self.drain_buffer();
        tracing::debug!(bytes = banner.len(), "Handshake output discarded");
        Ok(())
    }

    /// Tears the session down. Close failures are logged, never
    /// propagated; calling this on an already-disconnected session is a
    /// no-op.
    pub async fn disconnect(&self) {
        let previous = self.swap_state(SessionState::Closing);
        if let Err(err) = self.transport.close().await {
            tracing::warn!(error = %err, "Transport close failed");
        }
        self.set_state(SessionState::Disconnected);
        if previous != SessionState::Disconnected {
            tracing::info!(
                bytes_in = self.shared.bytes_in.load(Ordering::SeqCst),
                bytes_out = self.shared.bytes_out.load(Ordering::SeqCst),
                "Disconnected"
            );
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u64(self.shared.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.shared.state.store(state as u64, Ordering::SeqCst);
    }

    fn swap_state(&self, state: SessionState) -> SessionState {
        SessionState::from_u64(self.shared.state.swap(state as u64, Ordering::SeqCst))
    }

    pub(crate) fn ensure_ready(&self) -> StorageResult<()> {
        if self.transport.is_eof() {
            self.set_state(SessionState::Disconnected);
        }
        match self.state() {
            SessionState::Ready => Ok(()),
            _ => Err(StorageError::NotConnected),
        }
    }

    pub(crate) async fn write_bytes(&self, data: &[u8]) -> StorageResult<usize> {
        let written = self.transport.write(data).await?;
        self.shared
            .bytes_out
            .fetch_add(written as u64, Ordering::SeqCst);
        Ok(written)
    }

    pub(crate) fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub(crate) fn busy_flag(&self) -> &AtomicBool {
        &self.busy
    }

    pub(crate) fn lock_buffer(&self) -> std::sync::MutexGuard<'_, LineBuffer> {
        self.shared.buffer.lock().expect("line buffer mutex poisoned")
    }

    pub(crate) fn drain_buffer(&self) -> String {
        self.lock_buffer().snapshot_and_clear()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Fake device transport; records each write as its own entry,
    /// answers `\r` with a prompt, and plays back scripted responses
    /// keyed on the exact bytes a command writes.
    pub(crate) struct ScriptedTransport {
        pub sink: OutputSink,
        pub wrote: Arc<StdMutex<Vec<Vec<u8>>>>,
        pub closed: Arc<AtomicBool>,
        pub prompt_on_cr: bool,
        scripted: Arc<StdMutex<Vec<(Vec<u8>, Vec<u8>)>>>,
    }

    impl ScriptedTransport {
        pub fn new(sink: OutputSink) -> Self {
            Self {
                sink,
                wrote: Arc::new(StdMutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
                prompt_on_cr: true,
                scripted: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        /// Queues device output to emit when `when_written` arrives.
        pub fn respond(&self, when_written: &[u8], with: &[u8]) {
            self.scripted
                .lock()
                .unwrap()
                .push((when_written.to_vec(), with.to_vec()));
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn write(&self, data: &[u8]) -> StorageResult<usize> {
            self.wrote.lock().unwrap().push(data.to_vec());
            if self.prompt_on_cr && data == b"\r" {
                self.sink.push(b"\r\n>: ");
            }
            let response = {
                let mut scripted = self.scripted.lock().unwrap();
                match scripted.iter().position(|(pattern, _)| pattern == data) {
                    Some(index) => Some(scripted.remove(index).1),
                    None => None,
                }
            };
            if let Some(response) = response {
                self.sink.push(&response);
            }
            Ok(data.len())
        }

        async fn close(&self) -> StorageResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_eof(&self) -> bool {
            false
        }
    }

    pub(crate) fn fast_timing() -> TimingConfig {
        TimingConfig {
            connect_timeout_ms: 200,
            prompt_poll_interval_ms: 5,
            command_settle_ms: 10,
            list_settle_ms: 10,
            read_settle_ms: 10,
            write_chunk_size: 512,
            chunk_pacing_ms: 1,
            write_finalize_ms: 10,
            post_delete_settle_ms: 1,
        }
    }

    pub(crate) async fn connected_session() -> (Session, Arc<StdMutex<Vec<Vec<u8>>>>, OutputSink) {
        let sink = OutputSink::new();
        let transport = ScriptedTransport::new(sink.clone());
        let wrote = transport.wrote.clone();
        let session = Session::connect(Box::new(transport), sink.clone(), fast_timing())
            .await
            .expect("connect");
        (session, wrote, sink)
    }

    #[tokio::test]
    async fn connect_interrupts_then_waits_for_prompt() {
        let (session, wrote, _sink) = connected_session().await;
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(
            wrote.lock().unwrap().as_slice(),
            &[vec![INTERRUPT], b"\r".to_vec()]
        );
        // Banner and echo are discarded once the prompt appears.
        assert!(session.lock_buffer().is_empty());
    }

    #[tokio::test]
    async fn connect_times_out_without_prompt() {
        let sink = OutputSink::new();
        let mut transport = ScriptedTransport::new(sink.clone());
        transport.prompt_on_cr = false;
        let closed = transport.closed.clone();

        let mut timing = fast_timing();
        timing.connect_timeout_ms = 40;
        let result = Session::connect(Box::new(transport), sink.clone(), timing).await;

        assert!(matches!(result, Err(StorageError::Connect { .. })));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (session, _wrote, _sink) = connected_session().await;
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn eof_forces_disconnected() {
        let (session, _wrote, sink) = connected_session().await;
        sink.mark_eof();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.ensure_ready(),
            Err(StorageError::NotConnected)
        ));
    }
}
