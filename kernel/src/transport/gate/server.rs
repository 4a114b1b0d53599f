use bytes::Bytes;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::debug;

use super::{GateProvider, count, decode_kind};
use crate::session::BroadcastReport;
use crate::transport::pb::gate::{
    BindReply, BindRequest, BroadcastReply, BroadcastRequest, DisconnectReply, DisconnectRequest,
    GetIpReply, GetIpRequest, MulticastReply, MulticastRequest, PushReply, PushRequest, StatReply,
    StatRequest, UnbindReply, UnbindRequest, gate_server::Gate,
};

/// gRPC implementation of the gate role over a [`GateProvider`].
#[derive(Clone)]
pub struct GateService {
    provider: Arc<dyn GateProvider>,
}

impl GateService {
    /// Serves `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn GateProvider>) -> Self {
        Self { provider }
    }
}

fn fanout(report: &BroadcastReport) -> (i64, Vec<i64>) {
    (count(report.total()), report.failed_cids())
}

#[tonic::async_trait]
impl Gate for GateService {
    async fn bind(&self, request: Request<BindRequest>) -> Result<Response<BindReply>, Status> {
        let req = request.into_inner();
        debug!(cid = req.cid, uid = req.uid, "gate bind");
        self.provider.bind(req.cid, req.uid).await?;
        Ok(Response::new(BindReply {}))
    }

    async fn unbind(&self, request: Request<UnbindRequest>) -> Result<Response<UnbindReply>, Status> {
        let req = request.into_inner();
        self.provider.unbind(req.uid).await?;
        Ok(Response::new(UnbindReply {}))
    }

    async fn get_ip(&self, request: Request<GetIpRequest>) -> Result<Response<GetIpReply>, Status> {
        let req = request.into_inner();
        let ip = self.provider.get_ip(decode_kind(req.kind)?, req.target).await?;
        Ok(Response::new(GetIpReply { ip: ip.to_string() }))
    }

    async fn push(&self, request: Request<PushRequest>) -> Result<Response<PushReply>, Status> {
        let req = request.into_inner();
        self.provider
            .push(decode_kind(req.kind)?, req.target, Bytes::from(req.message))
            .await?;
        Ok(Response::new(PushReply {}))
    }

    async fn multicast(
        &self,
        request: Request<MulticastRequest>,
    ) -> Result<Response<MulticastReply>, Status> {
        let req = request.into_inner();
        let report = self
            .provider
            .multicast(decode_kind(req.kind)?, req.targets, Bytes::from(req.message))
            .await?;
        let (total, failed) = fanout(&report);
        Ok(Response::new(MulticastReply { total, failed }))
    }

    async fn broadcast(
        &self,
        request: Request<BroadcastRequest>,
    ) -> Result<Response<BroadcastReply>, Status> {
        let req = request.into_inner();
        let report = self
            .provider
            .broadcast(decode_kind(req.kind)?, Bytes::from(req.message))
            .await?;
        let (total, failed) = fanout(&report);
        Ok(Response::new(BroadcastReply { total, failed }))
    }

    async fn stat(&self, request: Request<StatRequest>) -> Result<Response<StatReply>, Status> {
        let req = request.into_inner();
        let total = self.provider.stat(decode_kind(req.kind)?).await?;
        Ok(Response::new(StatReply { total: count(total) }))
    }

    async fn disconnect(
        &self,
        request: Request<DisconnectRequest>,
    ) -> Result<Response<DisconnectReply>, Status> {
        let req = request.into_inner();
        self.provider
            .disconnect(decode_kind(req.kind)?, req.target, req.force)
            .await?;
        Ok(Response::new(DisconnectReply {}))
    }
}
