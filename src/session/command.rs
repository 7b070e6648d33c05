use super::prompt::contains_ready_prompt;
use super::{Session, SessionState};
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Marks the session busy for the lifetime of one transaction.
///
/// Dropping the guard releases the flag, so a caller cancelled
/// mid-exchange (including disconnect) cannot wedge the session.
pub(crate) struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> StorageResult<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(StorageError::Busy);
        }
        Ok(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Session {
    /// Sends one command line and waits until the shell prints its
    /// prompt again, returning everything received in between.
    pub async fn send_command_await_prompt(
        &self,
        line: &str,
        timeout: Duration,
    ) -> StorageResult<String> {
        self.ensure_ready()?;
        let _guard = BusyGuard::acquire(self.busy_flag())?;
        self.exchange_await_prompt(line, timeout).await
    }

    /// Sends one command line, lets the shell settle for a fixed delay,
    /// then returns whatever accumulated. Used where the shell's output
    /// has no completion marker that is safe to match on.
    pub async fn send_command_settle(
        &self,
        line: &str,
        settle: Duration,
    ) -> StorageResult<String> {
        self.ensure_ready()?;
        let _guard = BusyGuard::acquire(self.busy_flag())?;
        self.exchange_settle(line, settle).await
    }

    /// Prompt-awaiting exchange without busy bookkeeping. Composed
    /// operations hold one guard across several of these.
    ///
    /// On timeout the buffer is drained and discarded so a response
    /// arriving late cannot bleed into the next exchange.
    pub(crate) async fn exchange_await_prompt(
        &self,
        line: &str,
        timeout: Duration,
    ) -> StorageResult<String> {
        self.write_line(line).await?;
        let poll = Duration::from_millis(self.timing().prompt_poll_interval_ms);
        let deadline = Instant::now() + timeout;
        loop {
            // State before peek: the reader pushes bytes before it forces
            // Disconnected, so a response that completed just before the
            // session dropped is still returned.
            let ready = self.state() == SessionState::Ready;
            {
                let buffer = self.lock_buffer();
                if contains_ready_prompt(&buffer.peek_text()) {
                    break;
                }
            }
            if !ready {
                self.drain_buffer();
                return Err(StorageError::NotConnected);
            }
            if Instant::now() >= deadline {
                let stale = self.drain_buffer();
                tracing::debug!(
                    command = line,
                    discarded_bytes = stale.len(),
                    "Prompt timeout; stale output discarded"
                );
                return Err(StorageError::Timeout { waited: timeout });
            }
            sleep(poll).await;
        }
        let response = self.drain_buffer();
        tracing::debug!(
            command = line,
            response_bytes = response.len(),
            "Prompt observed"
        );
        Ok(response)
    }

    /// Fixed-delay exchange without busy bookkeeping.
    pub(crate) async fn exchange_settle(
        &self,
        line: &str,
        settle: Duration,
    ) -> StorageResult<String> {
        self.write_line(line).await?;
        sleep(settle).await;
        let response = self.drain_buffer();
        tracing::debug!(
            command = line,
            response_bytes = response.len(),
            "Command settled"
        );
        Ok(response)
    }

    /// Writes a command line terminated by the CR the shell expects.
    pub(crate) async fn write_line(&self, line: &str) -> StorageResult<()> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\r');
        self.write_bytes(&payload).await?;
        Ok(())
    }
}
