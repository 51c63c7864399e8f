//! Multi-backend scan aggregation (§4.2.b): when an EVM plugin is configured
//! with more than one [`ScanBackend`], shuffle them and try in order,
//! returning the first `true`, the first `false`, or — if every backend
//! throws — `true` (fail-open, §9 Design Notes).

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use chainwatch_core::HubError;
use chainwatch_scan::ScanBackend;

pub struct MultiScanBackend {
    backends: Vec<Arc<dyn ScanBackend>>,
}

impl MultiScanBackend {
    pub fn new(backends: Vec<Arc<dyn ScanBackend>>) -> Self {
        Self { backends }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl ScanBackend for MultiScanBackend {
    async fn scan(&self, address: &str, checkpoint: Option<&str>) -> Result<bool, HubError> {
        if self.backends.is_empty() {
            return Ok(true);
        }
        let mut order: Vec<usize> = (0..self.backends.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        let mut any_error = false;
        for idx in order {
            match self.backends[idx].scan(address, checkpoint).await {
                Ok(true) => return Ok(true),
                Ok(false) => return Ok(false),
                Err(e) => {
                    tracing::warn!(error = %e, "scan backend failed, trying next");
                    any_error = true;
                }
            }
        }
        // Every configured backend threw: better to waste a client refresh
        // than silently miss activity.
        debug_assert!(any_error);
        Ok(true)
    }
}
