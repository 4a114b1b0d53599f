use bytes::Bytes;
use std::sync::Arc;
use tonic::{Request, Response, Status};

use super::{Delivery, Event, NodeProvider, local_uid};
use crate::transport::pb::node::{
    DeliverReply, DeliverRequest, TriggerReply, TriggerRequest, node_server::Node,
};

/// gRPC implementation of the node role over a [`NodeProvider`].
#[derive(Clone)]
pub struct NodeService {
    provider: Arc<dyn NodeProvider>,
}

impl NodeService {
    /// Serves `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn NodeProvider>) -> Self {
        Self { provider }
    }
}

#[tonic::async_trait]
impl Node for NodeService {
    async fn trigger(&self, request: Request<TriggerRequest>) -> Result<Response<TriggerReply>, Status> {
        let req = request.into_inner();
        let event = Event::try_from(req.event)?;
        self.provider
            .trigger(event, req.gid, req.cid, local_uid(req.uid))
            .await?;
        Ok(Response::new(TriggerReply {}))
    }

    async fn deliver(&self, request: Request<DeliverRequest>) -> Result<Response<DeliverReply>, Status> {
        let req = request.into_inner();
        self.provider
            .deliver(Delivery {
                gid: req.gid,
                nid: req.nid,
                cid: req.cid,
                uid: local_uid(req.uid),
                message: Bytes::from(req.message),
            })
            .await?;
        Ok(Response::new(DeliverReply {}))
    }
}
