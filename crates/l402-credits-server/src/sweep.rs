use std::sync::Arc;
use std::time::Duration;

use l402::LedgerStore;

use crate::metrics::REQUESTS_EXPIRED;

/// Periodically mark pending payment requests past their expiry as expired.
pub fn start_expiry_sweep(store: Arc<dyn LedgerStore>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Some(expired) = sweep_once(store.as_ref(), chrono::Utc::now().timestamp()) {
                if expired > 0 {
                    tracing::info!(expired, "expired stale payment requests");
                }
            }
        }
    });
}

/// One sweep pass. Returns `None` if the store failed.
pub fn sweep_once(store: &dyn LedgerStore, now: i64) -> Option<usize> {
    match store.expire_pending(now) {
        Ok(expired) => {
            REQUESTS_EXPIRED.inc_by(expired as u64);
            Some(expired)
        }
        Err(e) => {
            tracing::warn!(error = %e, "expiry sweep failed");
            None
        }
    }
}
