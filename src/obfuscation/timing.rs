//! Connection-scoped pauses and serialized writes
//!
//! Every inter-fragment and inter-noise delay goes through a [`Pacer`] so that
//! closing the connection stops all pending waits at once. Writes take the
//! shared writer lock for the whole segment, so the fragment engine and the
//! noise task never interleave partial writes.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Write half shared by the fragment engine and the noise task
pub type SharedWriter<W> = Arc<Mutex<W>>;

/// Pauses and writes bound to one connection's lifetime
#[derive(Debug, Clone, Default)]
pub struct Pacer {
    closed: CancellationToken,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the connection closed and wake every pending pause
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Sleep for `delay` unless the connection closes first
    pub async fn pause(&self, delay: Duration) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(closed_error()),
            _ = sleep(delay) => Ok(()),
        }
    }

    /// Write and flush `bytes` while holding the writer lock
    pub async fn send<W>(&self, writer: &Mutex<W>, bytes: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut writer = writer.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            result = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => result,
        }
    }
}

/// Error returned by pauses and writes after the connection closed
pub fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
}

/// Millisecond delay
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_pause_waits() {
        let pacer = Pacer::new();
        let start = Instant::now();
        pacer.pause(millis(250)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_zero_pause_is_immediate() {
        let pacer = Pacer::new();
        let start = std::time::Instant::now();
        pacer.pause(Duration::ZERO).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_close_interrupts_pause() {
        let pacer = Pacer::new();
        let waiter = pacer.clone();
        let handle = tokio::spawn(async move { waiter.pause(Duration::from_secs(3600)).await });

        tokio::task::yield_now().await;
        pacer.close();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pause should end promptly")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert!(pacer.pause(Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_send_writes_whole_segment() {
        let pacer = Pacer::new();
        let writer: SharedWriter<Vec<u8>> = Arc::new(Mutex::new(Vec::new()));
        pacer.send(&writer, b"hello ").await.unwrap();
        pacer.send(&writer, b"world").await.unwrap();
        assert_eq!(&writer.lock().await[..], b"hello world");

        pacer.close();
        assert!(pacer.send(&writer, b"!").await.is_err());
    }
}
