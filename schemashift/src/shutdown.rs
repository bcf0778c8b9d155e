//! Graceful shutdown signalling for the executor's background task.
//!
//! A [`ShutdownSender`]/[`ShutdownReceiver`] pair wraps a watch channel.
//! Receivers can be cloned freely; a single `shutdown()` call reaches all
//! of them.

use tokio::sync::watch;

/// Creates a new shutdown channel.
pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    let (tx, rx) = watch::channel(());
    (ShutdownSender(tx), ShutdownReceiver(rx))
}

/// Broadcasts a shutdown signal to all associated [`ShutdownReceiver`]s.
#[derive(Debug)]
pub struct ShutdownSender(watch::Sender<()>);

impl ShutdownSender {
    /// Signals shutdown and waits for every receiver to be dropped, which
    /// indicates the background tasks have wound down.
    pub async fn shutdown(self) {
        let _ = self.0.send(());
        self.0.closed().await;
    }
}

/// Receives a shutdown signal sent from the associated [`ShutdownSender`].
#[derive(Clone, Debug)]
pub struct ShutdownReceiver(watch::Receiver<()>);

impl ShutdownReceiver {
    /// Completes when a shutdown signal is received.
    pub async fn recv(&mut self) {
        let _ = self.0.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_reaches_cloned_receivers() {
        let (tx, mut rx) = channel();
        let mut rx2 = rx.clone();

        let task = tokio::spawn(async move {
            rx.recv().await;
            rx2.recv().await;
        });

        tx.shutdown().await;
        task.await.unwrap();
    }
}
