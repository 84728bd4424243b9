//! Connection Pool Health Reporting

use std::time::Duration;

use serde::Serialize;

use crate::backends::DatabasePool;
use crate::error::OrmResult;

/// Snapshot of a pool's responsiveness and occupancy
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealthReport {
    pub check_duration: Duration,
    pub pool_size: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

impl PoolHealthReport {
    /// Run a liveness check and combine it with current pool statistics
    pub async fn collect(pool: &dyn DatabasePool) -> OrmResult<Self> {
        let check_duration = pool.health_check().await?;
        let stats = pool.stats();

        Ok(Self {
            check_duration,
            pool_size: stats.total_connections,
            idle_connections: stats.idle_connections,
            active_connections: stats.active_connections,
        })
    }

    /// Check completed within one second
    pub fn is_responsive(&self) -> bool {
        self.check_duration < Duration::from_millis(1000)
    }

    /// Pool utilization percentage
    pub fn utilization(&self) -> f64 {
        if self.pool_size > 0 {
            (self.active_connections as f64 / self.pool_size as f64) * 100.0
        } else {
            0.0
        }
    }
}
