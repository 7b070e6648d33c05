use super::command::BusyGuard;
use super::prompt::READY_PROMPT;
use super::{INTERRUPT, Session};
use crate::error::StorageResult;
use std::time::Duration;
use tokio::time::sleep;

impl Session {
    /// Reads a text file from the device.
    ///
    /// A missing file and an empty file both come back as empty
    /// content; the shell's response gives no way to tell them apart.
    /// Callers that need to know use [`Session::list_directory`] on the
    /// parent directory first.
    pub async fn read_file(&self, path: &str) -> StorageResult<String> {
        self.ensure_ready()?;
        let _guard = BusyGuard::acquire(self.busy_flag())?;
        let settle = Duration::from_millis(self.timing().read_settle_ms);
        let command = format!("storage read {path}");
        let response = self.exchange_settle(&command, settle).await?;
        let content = extract_file_content(&response);
        tracing::debug!(path, bytes = content.len(), "File read");
        Ok(content)
    }

    /// Replaces a device file with `content`, streamed in bounded
    /// chunks. The chunk size must stay within the remote input buffer
    /// or the device drops bytes without any error indication.
    ///
    /// There is no per-chunk acknowledgement. A transport error aborts
    /// the remaining chunks and leaves the remote file undefined; the
    /// caller re-attempts the whole write.
    pub async fn write_file(&self, path: &str, content: &str) -> StorageResult<()> {
        self.ensure_ready()?;
        let _guard = BusyGuard::acquire(self.busy_flag())?;
        let settle = Duration::from_millis(self.timing().command_settle_ms);

        // Replace any existing file so the stream starts from empty.
        // The shell reports nothing useful if the file was absent.
        self.exchange_settle(&format!("storage remove {path}"), settle)
            .await?;
        sleep(settle).await;

        // Enter streaming input mode.
        self.write_line(&format!("storage write {path}")).await?;
        sleep(settle).await;

        let chunk_size = self.timing().write_chunk_size.max(1);
        let pacing = Duration::from_millis(self.timing().chunk_pacing_ms);
        for chunk in content.as_bytes().chunks(chunk_size) {
            self.write_bytes(chunk).await?;
            sleep(pacing).await;
        }

        // Line-mode input needs the final line terminated.
        if !content.ends_with('\n') {
            self.write_bytes(b"\n").await?;
        }

        // Leave write mode and give the device time to flush.
        sleep(settle).await;
        self.write_bytes(&[INTERRUPT]).await?;
        sleep(Duration::from_millis(self.timing().write_finalize_ms)).await;

        // Everything echoed while streaming is noise, not a response.
        let echoed = self.drain_buffer();
        tracing::debug!(
            path,
            bytes = content.len(),
            echoed_bytes = echoed.len(),
            "File written"
        );
        Ok(())
    }

    /// Removes a device file. The shell emits no distinguishable
    /// failure text for a missing file, so this succeeds unless the
    /// transport itself fails.
    pub async fn delete_file(&self, path: &str) -> StorageResult<()> {
        self.ensure_ready()?;
        let _guard = BusyGuard::acquire(self.busy_flag())?;
        let settle = Duration::from_millis(self.timing().command_settle_ms);
        self.exchange_settle(&format!("storage remove {path}"), settle)
            .await?;
        sleep(Duration::from_millis(self.timing().post_delete_settle_ms)).await;
        self.drain_buffer();
        tracing::debug!(path, "File removed");
        Ok(())
    }
}

/// Recovers file content from a `storage read` response by dropping
/// the command echo, prompt lines, and blank filler.
pub(crate) fn extract_file_content(response: &str) -> String {
    let content: Vec<&str> = response
        .lines()
        .filter(|line| {
            !line.contains("storage read")
                && !line.contains(READY_PROMPT)
                && !line.trim().is_empty()
        })
        .collect();
    content.join("\n").trim().to_string()
}
