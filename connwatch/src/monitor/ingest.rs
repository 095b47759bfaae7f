use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Shared;
use crate::error::FeedError;
use crate::feed::EventStream;

/// Apply feed events until `shutdown` fires, re-subscribing whenever the feed
/// goes away.
pub(super) async fn run(shared: Arc<Shared>, mut events: EventStream, shutdown: CancellationToken) {
    loop {
        let lost = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            item = events.next() => match item {
                Some(Ok(event)) => {
                    shared.ingest(event);
                    continue;
                }
                Some(Err(err)) => err.to_string(),
                None => "event stream ended".to_string(),
            },
        };

        warn!(device = %shared.device, "Connectivity feed lost: {lost}");
        match resubscribe(&shared, &shutdown).await {
            Some(stream) => events = stream,
            None => return,
        }
    }
}

async fn resubscribe(shared: &Shared, shutdown: &CancellationToken) -> Option<EventStream> {
    let policy = &shared.config.reconnect;
    let declare_after = policy.attempts_before_unavailable.max(1);
    let mut failures: u32 = 0;

    loop {
        let delay = policy.delay(failures);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        let result = if shared.feed.is_available() {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                result = shared.feed.subscribe(&shared.device) => result,
            }
        } else {
            Err(FeedError::Unavailable("session is not connected".to_string()))
        };

        match result {
            Ok(stream) => {
                info!(device = %shared.device, attempts = failures + 1, "Connectivity feed re-established");
                shared.feed_restored();
                return Some(stream);
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                debug!(device = %shared.device, failures, "Re-subscribe failed: {err}");
                if failures == declare_after {
                    shared.declare_unavailable(format!("{err} (after {failures} attempts)"));
                }
            }
        }
    }
}
