use std::time::Duration;

use futures::Stream;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// One scheduler tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    /// Zero-based tick number.
    pub seq: u64,
    /// When the tick was due.
    pub due: Instant,
}

/// Emits a tick immediately and then every `period`, until `cancel` fires.
///
/// Ticks that fall behind (because the consumer is saturated) are delivered
/// late rather than dropped. Once cancelled, the stream ends and never
/// produces again.
pub fn schedule(period: Duration, cancel: CancellationToken) -> impl Stream<Item = Tick> + Send {
    async_stream::stream! {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut seq = 0;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                due = ticker.tick() => {
                    yield Tick { seq, due };
                    seq += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::StreamExt;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_first_tick_is_immediate() {
        let cancel = CancellationToken::new();
        let ticks = schedule(Duration::from_secs(60), cancel.clone());
        tokio::pin!(ticks);

        let first = timeout(Duration::from_millis(100), ticks.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.seq, 0);
    }

    #[tokio::test]
    async fn test_ticks_follow_interval() {
        let cancel = CancellationToken::new();
        let ticks = schedule(Duration::from_millis(10), cancel.clone());
        tokio::pin!(ticks);

        let seqs: Vec<u64> = timeout(Duration::from_secs(1), ticks.take(3).map(|t| t.seq).collect())
            .await
            .unwrap();

        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let cancel = CancellationToken::new();
        let ticks = schedule(Duration::from_millis(5), cancel.clone());
        tokio::pin!(ticks);

        ticks.next().await.unwrap();
        cancel.cancel();

        assert!(
            timeout(Duration::from_secs(1), ticks.next())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_ticks() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ticks = schedule(Duration::from_millis(5), cancel);
        tokio::pin!(ticks);

        assert!(ticks.next().await.is_none());
    }
}
