//! Cluster node kinds and the service names they register under.

pub mod mesh;

/// Registry service name of gateways.
pub const GATE: &str = "gate";
/// Registry service name of logic nodes.
pub const NODE: &str = "node";
/// Registry kind of mesh instances.
pub const MESH: &str = "mesh";
