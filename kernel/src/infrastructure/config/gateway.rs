//! WebSocket gateway settings.

use serde::Deserialize;

/// Gateway settings.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    /// Gateway instance id, registered under the `gate` service.
    pub id: String,
    /// Outbound queue depth per connection.
    pub queue_capacity: usize,
    /// Node the gateway forwards client messages to, as a target string.
    pub node: Option<String>,
}
