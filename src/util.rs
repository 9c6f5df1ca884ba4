use std::future::Future;
use std::time::Duration;

use crate::error::{GossamerError, Result};

/// Broadcast shutdown signal shared by every actor loop in a node.
#[derive(Debug)]
pub struct Shutdown(
    tokio::sync::broadcast::Sender<()>,
    tokio::sync::broadcast::Receiver<()>,
);

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        Shutdown(tx, rx)
    }

    pub fn shutdown(&self) {
        // no receivers left means everything already stopped
        let _ = self.0.send(());
    }

    pub async fn wait(&mut self) {
        let _ = self.1.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Shutdown(self.0.clone(), self.0.subscribe())
    }
}

/// Bounds a call into an external collaborator with a deadline.
pub async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!(operation, ?timeout, "deadline elapsed");
            Err(GossamerError::Timeout { operation, timeout })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{with_timeout, Shutdown};
    use crate::error::GossamerError;

    #[tokio::test]
    async fn shutdown_reaches_clones() {
        let shutdown = Shutdown::new();
        let mut waiter = shutdown.clone();
        let task = tokio::spawn(async move { waiter.wait().await });
        shutdown.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_elapses() {
        let res: Result<(), _> = with_timeout(
            "sleep",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(
            res,
            Err(GossamerError::Timeout {
                operation: "sleep",
                ..
            })
        ));
    }
}
