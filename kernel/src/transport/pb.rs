//! Generated protobuf code for the gate and node RPC roles.

#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::too_many_lines)]

/// Gateway role messages and service.
pub mod gate {
    tonic::include_proto!("gate");
}

/// Logic-node role messages and service.
pub mod node {
    tonic::include_proto!("node");
}
