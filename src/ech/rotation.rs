//! Background ECH key rotation.
//!
//! Runs one rotation tick at startup and then every 24 hours until the
//! shutdown token fires. A failed tick is logged and retried on the next
//! interval; it never tears the task down.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::now_ts;

use super::keystore::EchKeystore;

const ROTATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct RotationScheduler {
    keystore: Arc<EchKeystore>,
    interval: Duration,
}

impl RotationScheduler {
    pub fn new(keystore: Arc<EchKeystore>) -> Self {
        Self {
            keystore,
            interval: ROTATION_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(keystore: Arc<EchKeystore>, interval: Duration) -> Self {
        Self { keystore, interval }
    }

    /// Run until `shutdown` is cancelled. The first tick fires immediately
    /// so a cold deployment has an active key before serving traffic.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "ECH rotation started");
        loop {
            self.tick();
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("ECH rotation stopped");
                    return;
                }
            }
        }
    }

    fn tick(&self) {
        match self.keystore.rotate(now_ts()) {
            Ok(report) => {
                if report != Default::default() {
                    tracing::info!(
                        transitioned = report.transitioned,
                        retired = report.retired,
                        generated = report.generated,
                        deleted = report.deleted,
                        "ECH rotation tick"
                    );
                }
            }
            Err(err) => tracing::error!(error = %err, "ECH rotation tick failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ech::SecretBox;
    use crate::test_support::open_store;

    #[tokio::test]
    async fn startup_tick_provisions_a_key_before_first_interval() {
        let (store, _dir) = open_store();
        let store = Arc::new(store);
        let keystore = Arc::new(EchKeystore::new(store, SecretBox::new(&[7u8; 32])));

        let shutdown = CancellationToken::new();
        let scheduler =
            RotationScheduler::with_interval(keystore.clone(), Duration::from_secs(3600));
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        // The startup tick is synchronous inside the task; give it a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(keystore.active_key().unwrap().is_some());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
