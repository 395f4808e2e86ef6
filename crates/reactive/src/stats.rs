//! Periodic statistics polling.

use crate::channel::{RemoteChannel, Resource, ResourceStats};
use crate::config::StatsPollerConfig;
use crate::error::{Error, Result};
use crate::scheduler::schedule;

use std::sync::Arc;
use std::time::SystemTime;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Statistics of one resource at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Resource the statistics belong to.
    pub resource: Resource,
    /// When the snapshot was taken.
    pub taken_at: SystemTime,
    /// The statistics.
    pub stats: ResourceStats,
}

/// Fetches statistics for `resource` every `config.interval`.
///
/// A failed fetch is retried up to `config.max_retries` times, `config.retry_delay`
/// apart. When every attempt fails the stream yields a single
/// [`Error::StatsExhausted`] and ends. It also ends, without an error, once
/// `cancel` fires. An invalid `config` yields a single [`Error::Config`].
pub fn poll_stats(
    channel: Arc<dyn RemoteChannel>,
    resource: Resource,
    config: StatsPollerConfig,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StatsSnapshot>> + Send {
    async_stream::stream! {
        if let Err(error) = config.validate() {
            warn!(%resource, %error, "refusing to poll stats");
            yield Err(error);
            return;
        }

        let ticks = schedule(config.interval, cancel.clone());
        tokio::pin!(ticks);

        while ticks.next().await.is_some() {
            match fetch_with_retry(channel.as_ref(), &resource, &config, &cancel).await {
                Some(Ok(stats)) => {
                    yield Ok(StatsSnapshot {
                        resource: resource.clone(),
                        taken_at: SystemTime::now(),
                        stats,
                    });
                }
                Some(Err(error)) => {
                    warn!(%resource, %error, "giving up on stats polling");
                    yield Err(error);
                    break;
                }
                None => break,
            }
        }

        debug!(%resource, "stats polling stopped");
    }
}

/// Returns `None` if cancelled while waiting to retry.
async fn fetch_with_retry(
    channel: &dyn RemoteChannel,
    resource: &Resource,
    config: &StatsPollerConfig,
    cancel: &CancellationToken,
) -> Option<Result<ResourceStats>> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match channel.stats(resource).await {
            Ok(stats) => return Some(Ok(stats)),
            Err(error) => error,
        };

        if attempt > config.max_retries {
            return Some(Err(Error::StatsExhausted {
                resource: resource.to_string(),
                attempts: attempt,
                source: Box::new(error),
            }));
        }

        warn!(%resource, %error, attempt, "stats fetch failed, retrying");

        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            () = sleep(config.retry_delay) => {}
        }
    }
}
