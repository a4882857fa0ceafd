use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::StatUpdater;
use crate::{debug_log, info_log, warn_log};

const SOURCE: &str = "StatPoller";

fn interval_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

/// Polls hardware counters every `interval` until `cancel` fires.
///
/// SDK reads block, so each poll runs on the blocking pool.
pub fn spawn_stat_poller(
    updater: Arc<StatUpdater>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info_log!(SOURCE, interval_ms = interval_ms(interval), "stat poller started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let updater = updater.clone();
                    match tokio::task::spawn_blocking(move || updater.update_stats()).await {
                        Ok(updated) => debug_log!(SOURCE, updated, "polled stats"),
                        Err(e) => warn_log!(SOURCE, "stat poll failed: {}", e),
                    }
                }
            }
        }
        info_log!(SOURCE, "stat poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::hw::HwContext;
    use crate::stats::StatChangeQueue;
    use crate::capabilities::StatTableAccess;
    use bcm_sdk::api::{FlexCounterApi, StatType};
    use bcm_sdk::FakeSdk;

    #[test]
    fn test_interval_ms_saturates() {
        assert_eq!(interval_ms(Duration::from_millis(250)), 250);
        assert_eq!(interval_ms(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_poller_updates_until_cancelled() {
        let sdk = Arc::new(FakeSdk::new());
        let ctx = HwContext::new(sdk.clone(), HalConfig::default());
        let updater = Arc::new(StatUpdater::new(ctx));
        let stat = sdk.flexctr_create(24, &[StatType::Bytes]).unwrap();
        let mut queue = StatChangeQueue::default();
        queue.to_be_added_teflow_stat(stat, "c0", &[StatType::Bytes]);
        updater.refresh(&mut queue).unwrap();
        sdk.set_flexctr_value(stat, StatType::Bytes, 1500);

        let cancel = CancellationToken::new();
        let poller = spawn_stat_poller(updater.clone(), Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        poller.await.unwrap();

        assert_eq!(updater.counter(stat, StatType::Bytes).unwrap(), 1500);
    }
}
