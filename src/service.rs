//! Periodic auto-sync loop.
//!
//! Tablets in the field sync on a timer rather than on demand. The loop
//! drives the blocking engine from a worker thread, logs each round, and on
//! a shutdown signal stops accepting new sessions while the in-flight round
//! finishes cleanly.

use std::sync::Arc;
use std::time::Duration;

use crate::store::MasterStore;
use crate::sync::{Guarded, SyncEngine};

pub const DEFAULT_INTERVAL_SECS: u64 = 300;

pub async fn run_autosync<S>(engine: Arc<SyncEngine<S>>, interval: Duration)
where
    S: MasterStore + 'static,
{
    log::info!("autosync started; interval {}s", interval.as_secs());
    loop {
        let eng = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || eng.full_sync(false)).await {
            Ok(Ok(Guarded::Ok(report))) => {
                let pulled: usize = report.pull.inserted_by_table.values().sum::<usize>()
                    + report.pull.updated_by_table.values().sum::<usize>();
                let pushed: usize = report.push.pushed_by_table.values().sum();
                let errors = report.pull.errors.len() + report.push.errors.len();
                if errors > 0 {
                    log::warn!(
                        "autosync round: {} pulled, {} pushed, {} error(s)",
                        pulled,
                        pushed,
                        errors
                    );
                } else {
                    log::info!("autosync round: {} pulled, {} pushed", pulled, pushed);
                }
            }
            Ok(Ok(Guarded::Blocked { warnings })) => {
                for warning in &warnings {
                    log::warn!("autosync blocked: {}", warning);
                }
            }
            Ok(Err(e)) if e.is_retryable() => {
                log::warn!("autosync round failed, will retry: {}", e);
            }
            Ok(Err(e)) => {
                log::error!("autosync round failed: {}", e);
            }
            Err(e) => {
                log::error!("autosync task panicked: {}", e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown signal received; stopping autosync");
                engine.shutdown();
                break;
            }
        }
    }
}
