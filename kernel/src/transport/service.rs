//! Client for arbitrary services reached through the shared builder.

use std::future::Future;
use std::time::Duration;
use tonic::Status;
use tonic::transport::Channel;

use super::{TransportError, bounded};

/// Connected channel to a user service plus the call timeout.
///
/// Generated tonic clients are created over [`ServiceClient::channel`];
/// [`ServiceClient::call`] applies the timeout to one call.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    channel: Channel,
    timeout: Duration,
}

impl ServiceClient {
    /// Wraps a connected channel.
    #[must_use]
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// The underlying channel.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one call built from the channel, bounded by the timeout.
    ///
    /// # Errors
    ///
    /// Returns the remote status or [`TransportError::Timeout`].
    pub async fn call<T, F, Fut>(&self, call: F) -> Result<T, TransportError>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<tonic::Response<T>, Status>>,
    {
        bounded(self.timeout, call(self.channel())).await
    }
}
