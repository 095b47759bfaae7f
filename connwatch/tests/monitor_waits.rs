use std::sync::Arc;
use std::time::Duration;

use connwatch::feed::MemoryFeed;
use connwatch::monitor::Connectivity;
use connwatch::{
    BackoffPolicy, ConnectionKind, ConnectivityEvent, DeviceId, Monitor, MonitorConfig,
    MonitorError, Since, WaitOptions,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn device() -> DeviceId {
    DeviceId::new("00000000-00000000-00409DFF-FF5A7E01").unwrap()
}

async fn started(feed: &MemoryFeed) -> Arc<Monitor> {
    let monitor = Arc::new(Monitor::new(Arc::new(feed.clone()), device()));
    monitor.start().await.expect("start monitor");
    monitor
}

/// Let the ingestion task drain whatever was published.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_waiter_woken_by_disconnect() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    let waiter = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.wait_for_disconnect(Duration::from_secs(30)).await }
    });
    settle().await;
    assert_eq!(monitor.pending_waiters(), 1);

    feed.publish(ConnectivityEvent::disconnected(device(), 1_700_000_000_000));

    let transition = waiter.await.unwrap().expect("disconnect observed");
    assert_eq!(transition.kind, ConnectionKind::Disconnected);
    assert_eq!(transition.observed_at_ms, 1_700_000_000_000);
    assert_eq!(monitor.state().current, Connectivity::Disconnected);
    assert_eq!(monitor.pending_waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_deadline() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    let start = Instant::now();
    let err = monitor
        .wait_for_connect(Duration::from_secs(5))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(5) + Duration::from_millis(100));
    assert_eq!(
        err.to_string(),
        format!("device {} did not become connected within 5s", device())
    );
    assert_eq!(monitor.pending_waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_event_before_wait_is_not_lost() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    feed.publish(ConnectivityEvent::disconnected(device(), 100));
    settle().await;

    let transition = monitor
        .wait_for_disconnect(Duration::from_secs(1))
        .await
        .expect("recent disconnect satisfies the wait");
    assert_eq!(transition.observed_at_ms, 100);
}

#[tokio::test(start_paused = true)]
async fn test_returned_transition_does_not_satisfy_again() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    feed.publish(ConnectivityEvent::disconnected(device(), 100));
    settle().await;

    monitor
        .wait_for_disconnect(Duration::from_secs(1))
        .await
        .expect("first wait");
    let err = monitor
        .wait_for_disconnect(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_stale_transition_ages_out() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    feed.publish(ConnectivityEvent::disconnected(device(), 100));
    settle().await;
    tokio::time::sleep(Duration::from_secs(11)).await;

    // Still disconnected, but the edge happened long before this wait.
    assert_eq!(monitor.state().current, Connectivity::Disconnected);
    let err = monitor
        .wait_for_disconnect(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_seconds_before_wait_is_stale() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;
    let before = monitor.checkpoint();

    feed.publish(ConnectivityEvent::disconnected(device(), 100));
    settle().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let started_at = Instant::now();
    let err = monitor
        .wait_for_disconnect(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert_eq!(started_at.elapsed(), Duration::from_secs(5));

    // A checkpoint taken before the edge still finds it.
    let transition = monitor
        .wait_for(
            ConnectionKind::Disconnected,
            WaitOptions::new(Duration::from_secs(1)).since(Since::Checkpoint(before)),
        )
        .await
        .expect("checkpoint-anchored wait");
    assert_eq!(transition.observed_at_ms, 100);
}

#[tokio::test(start_paused = true)]
async fn test_wait_since_now_ignores_recent() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    feed.publish(ConnectivityEvent::disconnected(device(), 100));
    settle().await;

    let err = monitor
        .wait_for(
            ConnectionKind::Disconnected,
            WaitOptions::new(Duration::from_secs(1)).since(Since::Now),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_events_wake_once() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    feed.publish(ConnectivityEvent::disconnected(device(), 100));
    feed.publish(ConnectivityEvent::disconnected(device(), 150));
    // Same event delivered twice by the service.
    feed.publish(ConnectivityEvent::disconnected(device(), 150));
    settle().await;

    assert_eq!(monitor.recent_transitions().len(), 1);
    monitor
        .wait_for_disconnect(Duration::from_secs(1))
        .await
        .expect("one disconnect");
    let err = monitor
        .wait_for_disconnect(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_all_waiters_see_same_transition() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_for_connect(Duration::from_secs(30)).await })
        })
        .collect();
    settle().await;
    assert_eq!(monitor.pending_waiters(), 3);

    feed.publish(ConnectivityEvent::connected(device(), 42));

    let mut seqs = Vec::new();
    for waiter in waiters {
        seqs.push(waiter.await.unwrap().expect("connect observed").seq);
    }
    assert!(seqs.iter().all(|seq| *seq == seqs[0]));
}

#[tokio::test(start_paused = true)]
async fn test_reboot_sequence() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;
    feed.publish(ConnectivityEvent::connected(device(), 1_000));
    settle().await;

    let start = Instant::now();
    let cp = monitor.checkpoint();

    // Device drops after 2 s and is back 5 s later.
    let device_sim = tokio::spawn({
        let feed = feed.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            feed.publish(ConnectivityEvent::disconnected(device(), 3_000));
            tokio::time::sleep(Duration::from_secs(5)).await;
            feed.publish(ConnectivityEvent::connected(device(), 8_000));
        }
    });

    let down = monitor
        .wait_for(
            ConnectionKind::Disconnected,
            WaitOptions::new(Duration::from_secs(30)).since(Since::Checkpoint(cp)),
        )
        .await
        .expect("device went down");
    let up = monitor
        .wait_for(
            ConnectionKind::Connected,
            WaitOptions::new(Duration::from_secs(30)).since(Since::Checkpoint(down.checkpoint())),
        )
        .await
        .expect("device came back");
    device_sim.await.unwrap();

    assert!(up.seq > down.seq);
    assert_eq!(down.observed_at_ms, 3_000);
    assert_eq!(up.observed_at_ms, 8_000);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    assert_eq!(monitor.state().current, Connectivity::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_device_that_never_returns_times_out() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    feed.publish(ConnectivityEvent::disconnected(device(), 10));
    let down = monitor
        .wait_for_disconnect(Duration::from_secs(30))
        .await
        .expect("disconnect");

    let err = monitor
        .wait_for(
            ConnectionKind::Connected,
            WaitOptions::new(Duration::from_secs(5)).since(Since::Checkpoint(down.checkpoint())),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        MonitorError::Timeout {
            device: device(),
            kind: ConnectionKind::Connected,
            timeout: Duration::from_secs(5),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait_is_deregistered() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;
    let token = CancellationToken::new();

    let waiter = tokio::spawn({
        let monitor = monitor.clone();
        let token = token.clone();
        async move {
            monitor
                .wait_for(
                    ConnectionKind::Connected,
                    WaitOptions::new(Duration::from_secs(30)).cancel_on(token),
                )
                .await
        }
    });
    settle().await;
    assert_eq!(monitor.pending_waiters(), 1);

    token.cancel();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, MonitorError::Cancelled { kind: ConnectionKind::Connected, .. }));
    assert_eq!(monitor.pending_waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_wait_is_deregistered() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        monitor.wait_for_connect(Duration::from_secs(30)),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(monitor.pending_waiters(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_waiters() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;
    assert_eq!(feed.subscriber_count(), 1);

    let waiter = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.wait_for_disconnect(Duration::from_secs(30)).await }
    });
    settle().await;

    monitor.stop().await;
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, MonitorError::MonitorStopped { .. }));
    assert!(err.is_systemic());

    // Later waits fail fast instead of running into their timeout.
    let start = Instant::now();
    let err = monitor
        .wait_for_connect(Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::MonitorStopped { .. }));
    assert_eq!(start.elapsed(), Duration::ZERO);

    assert!(!monitor.is_running().await);
    assert_eq!(feed.subscriber_count(), 0);

    // Stopping twice is harmless; restarting is not allowed.
    monitor.stop().await;
    assert!(matches!(
        monitor.start().await,
        Err(MonitorError::MonitorStopped { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;
    monitor.start().await.unwrap();

    assert!(monitor.is_running().await);
    assert_eq!(feed.subscribe_calls(), 1);
    assert_eq!(feed.subscriber_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_for_other_devices_ignored() {
    let feed = MemoryFeed::new();
    let monitor = started(&feed).await;
    let other = DeviceId::new("dev-other").unwrap();

    feed.publish(ConnectivityEvent::disconnected(other, 100));
    settle().await;

    assert_eq!(monitor.state().current, Connectivity::Unknown);
    let err = monitor
        .wait_for_disconnect(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_device_is_invalid() {
    let feed = MemoryFeed::new();
    feed.authorize([DeviceId::new("dev-other").unwrap()]);

    let monitor = Monitor::new(Arc::new(feed.clone()), device());
    let err = monitor.start().await.unwrap_err();
    assert!(matches!(err, MonitorError::InvalidDevice(_)));
    assert!(!monitor.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_when_feed_down() {
    let feed = MemoryFeed::new();
    feed.begin_outage("broker unreachable");

    let monitor = Monitor::new(Arc::new(feed.clone()), device());
    let err = monitor.start().await.unwrap_err();
    assert!(matches!(err, MonitorError::FeedUnavailable { .. }));
    assert!(!monitor.is_running().await);

    // The monitor stays usable once the feed is back.
    feed.end_outage();
    monitor.start().await.expect("start after outage");
    assert!(monitor.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_feed_outage_fails_waiters_then_recovers() {
    let feed = MemoryFeed::new();
    let config = MonitorConfig {
        reconnect: BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2,
            attempts_before_unavailable: 2,
        },
        ..MonitorConfig::default()
    };
    let monitor = Arc::new(Monitor::with_config(Arc::new(feed.clone()), device(), config));
    monitor.start().await.unwrap();

    let waiter = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.wait_for_connect(Duration::from_secs(30)).await }
    });
    settle().await;

    feed.begin_outage("broker restarting");
    let start = Instant::now();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, MonitorError::FeedUnavailable { .. }), "unexpected: {err}");
    assert!(start.elapsed() < Duration::from_secs(1));

    let err = monitor
        .wait_for_connect(Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::FeedUnavailable { .. }));

    feed.end_outage();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(feed.subscriber_count(), 1);

    feed.publish(ConnectivityEvent::connected(device(), 500));
    let transition = monitor
        .wait_for_connect(Duration::from_secs(5))
        .await
        .expect("feed recovered");
    assert_eq!(transition.observed_at_ms, 500);
}
