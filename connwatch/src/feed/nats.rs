use std::time::Duration;

use async_nats::connection::State;
use async_nats::Client;
use futures::future::{self, BoxFuture};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::{EventFeed, EventStream};
use crate::device::DeviceId;
use crate::error::FeedError;
use crate::messages::{subject_connectivity, ConnectivityEvent};

/// Event feed backed by a NATS connection.
///
/// Each subscription listens on the device's connectivity subject and polls
/// the client's connection state. Once the client is no longer connected the
/// stream yields [`FeedError::Disconnected`], so the consumer re-subscribes
/// instead of waiting on a subscription that cannot deliver.
#[derive(Clone)]
pub struct NatsFeed {
    nc: Client,
    health_interval: Duration,
}

impl NatsFeed {
    pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_millis(250);

    pub fn new(nc: Client) -> Self {
        NatsFeed {
            nc,
            health_interval: Self::DEFAULT_HEALTH_INTERVAL,
        }
    }

    /// How often subscriptions check the connection state.
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Publish an event on the subject of the device it describes.
    pub async fn publish(&self, event: ConnectivityEvent) -> Result<(), FeedError> {
        let subject = subject_connectivity(&event.device);
        self.nc
            .publish(subject, Vec::from(event).into())
            .await
            .map_err(|e| FeedError::Disconnected(e.to_string()))?;
        self.nc
            .flush()
            .await
            .map_err(|e| FeedError::Disconnected(e.to_string()))
    }
}

impl EventFeed for NatsFeed {
    fn subscribe<'a>(&'a self, device: &'a DeviceId) -> BoxFuture<'a, Result<EventStream, FeedError>> {
        Box::pin(async move {
            let subject = subject_connectivity(device);
            let sub = self
                .nc
                .subscribe(subject.clone())
                .await
                .map_err(|e| FeedError::Unavailable(e.to_string()))?;
            debug!(%subject, "Subscribed to connectivity events");

            let events = sub.filter_map(move |msg| {
                let event = match ConnectivityEvent::try_from(msg.payload.as_ref()) {
                    Ok(event) => Some(Ok(event)),
                    Err(err) => {
                        warn!(subject = %msg.subject, "Dropping undecodable connectivity event: {err}");
                        None
                    }
                };
                future::ready(event)
            });

            let nc = self.nc.clone();
            let interval = self.health_interval;
            let lost = stream::once(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let state = nc.connection_state();
                    if !matches!(state, State::Connected) {
                        return Err::<ConnectivityEvent, _>(FeedError::Disconnected(format!(
                            "NATS connection is {state:?}"
                        )));
                    }
                }
            });

            Ok(stream::select(events, lost).boxed())
        })
    }

    fn is_available(&self) -> bool {
        matches!(self.nc.connection_state(), State::Connected)
    }
}
