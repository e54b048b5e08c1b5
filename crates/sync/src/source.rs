//! The external data source the executor pulls from.

use async_trait::async_trait;

use crate::{
    Result,
    types::{HealthStatus, SourceSyncResult, SyncResult},
};

/// Performs the actual network synchronization.
///
/// A returned `Ok` with `success: false` is a logical failure recorded on the
/// run's log; an `Err` means the call itself broke.
#[async_trait]
pub trait DataSourceClient: Send + Sync {
    async fn check_health(&self) -> Result<HealthStatus>;
    async fn sync_events(&self) -> Result<SourceSyncResult>;
    async fn sync_news(&self) -> Result<SourceSyncResult>;
    async fn sync_all(&self) -> Result<SyncResult>;
}
