//! Periodic keepalive frames
//!
//! Keeps idle SSH sessions (and any NAT in between) from timing out. A
//! keepalive is best effort: when the outbound queue is full the tick is
//! skipped, since real traffic is already flowing.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;

use sm_protocol::Frame;

use crate::forwarder::ForwarderContext;

/// Emit a `KeepAlive` frame every `interval` until the tunnel closes
pub async fn run_keepalive(ctx: ForwarderContext, interval: Duration) {
    if interval.is_zero() {
        tracing::debug!("Keepalive disabled");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ctx.closed() => break,
            _ = ctx.shutting_down() => break,
            _ = ticker.tick() => {}
        }

        if !ctx.is_open() || ctx.is_shutting_down() {
            break;
        }

        match ctx.try_send(Frame::keep_alive()) {
            Ok(()) => tracing::trace!("Keepalive queued"),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full, skipping keepalive");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    tracing::debug!("Keepalive stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::ForwarderSettings;
    use sm_protocol::Message;

    fn settings(capacity: usize) -> ForwarderSettings {
        ForwarderSettings {
            queue_capacity: capacity,
            keepalive_interval: Duration::from_secs(10),
            ..ForwarderSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_emitted_each_interval() {
        let (ctx, mut outbound) = ForwarderContext::new(&settings(4));
        let task = tokio::spawn(run_keepalive(ctx, Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(outbound.try_recv().is_err(), "no keepalive before the first interval");

        tokio::time::sleep(Duration::from_secs(6)).await;
        let frame = outbound.try_recv().unwrap();
        assert_eq!(frame.message, Message::KeepAlive);
        assert!(frame.connection_id.is_control());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(outbound.try_recv().unwrap().message, Message::KeepAlive);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_skips_tick_without_blocking() {
        let (ctx, mut outbound) = ForwarderContext::new(&settings(1));
        let task = tokio::spawn(run_keepalive(ctx.clone(), Duration::from_secs(10)));

        // Two ticks: the second finds the queue full and is skipped
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(!task.is_finished());
        assert_eq!(outbound.try_recv().unwrap().message, Message::KeepAlive);
        assert!(outbound.try_recv().is_err());

        // Space again: the next tick goes through
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(outbound.try_recv().unwrap().message, Message::KeepAlive);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_once_queue_closed() {
        let (ctx, outbound) = ForwarderContext::new(&settings(4));
        let task = tokio::spawn(run_keepalive(ctx, Duration::from_secs(1)));

        drop(outbound);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_disables() {
        let (ctx, _outbound) = ForwarderContext::new(&settings(4));
        run_keepalive(ctx, Duration::ZERO).await;
    }
}
