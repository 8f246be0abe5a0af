//! Runs synchronous store calls on the blocking pool.

use crate::error::{PipelineError, PipelineResult};
use mdsync_persistence::{MarketStore, PersistenceResult};
use std::sync::Arc;

pub(crate) async fn with_store<T, F>(store: &Arc<dyn MarketStore>, f: F) -> PipelineResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn MarketStore) -> PersistenceResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))?
        .map_err(PipelineError::from)
}
