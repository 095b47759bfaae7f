use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;

use super::{EventFeed, EventStream};
use crate::device::DeviceId;
use crate::error::FeedError;
use crate::messages::ConnectivityEvent;

type Subscriber = mpsc::UnboundedSender<Result<ConnectivityEvent, FeedError>>;

/// In-process event feed for tests and simulations.
///
/// Every published event reaches every live subscription regardless of the
/// device it was subscribed for.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<MemoryFeedInner>>,
}

#[derive(Default)]
struct MemoryFeedInner {
    subscribers: Vec<Subscriber>,
    outage: Option<String>,
    authorized: Option<HashSet<DeviceId>>,
    subscribe_calls: usize,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryFeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to all live subscriptions. Returns how many received it.
    pub fn publish(&self, event: ConnectivityEvent) -> usize {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
        inner.subscribers.len()
    }

    /// Error out and close every live subscription.
    pub fn fail(&self, reason: &str) {
        let mut inner = self.lock();
        for tx in inner.subscribers.drain(..) {
            let _ = tx.send(Err(FeedError::Disconnected(reason.to_string())));
        }
    }

    /// Fail live subscriptions and refuse new ones until [`Self::end_outage`].
    pub fn begin_outage(&self, reason: &str) {
        self.fail(reason);
        self.lock().outage = Some(reason.to_string());
    }

    pub fn end_outage(&self) {
        self.lock().outage = None;
    }

    /// Only allow subscriptions for the given devices.
    pub fn authorize(&self, devices: impl IntoIterator<Item = DeviceId>) {
        self.lock().authorized = Some(devices.into_iter().collect());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }
}

impl EventFeed for MemoryFeed {
    fn subscribe<'a>(&'a self, device: &'a DeviceId) -> BoxFuture<'a, Result<EventStream, FeedError>> {
        let mut inner = self.lock();
        inner.subscribe_calls += 1;

        if let Some(reason) = &inner.outage {
            return future::ready(Err(FeedError::Unavailable(reason.clone()))).boxed();
        }
        if let Some(authorized) = &inner.authorized {
            if !authorized.contains(device) {
                return future::ready(Err(FeedError::Unauthorized(device.clone()))).boxed();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(tx);

        let events = futures::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        future::ready(Ok(events.boxed())).boxed()
    }
}
