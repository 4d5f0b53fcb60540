use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::queue::JobQueue;
use crate::services::stats::StatsAggregator;

/// Samples the queue depth on a fixed tick, independent of submission rate.
pub struct DepthSampler {
    queue: Arc<JobQueue>,
    stats: Arc<StatsAggregator>,
    interval: Duration,
}

impl DepthSampler {
    pub fn new(queue: Arc<JobQueue>, stats: Arc<StatsAggregator>, interval: Duration) -> Self {
        Self {
            queue,
            stats,
            interval,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => self.sample().await,
                }
            }
        })
    }

    pub async fn sample(&self) {
        let depth = self.queue.len().await;
        self.stats.record_depth(depth).await;
    }
}
