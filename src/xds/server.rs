//! xDS gRPC server serving snapshots to gateway instances.
//!
//! Implements the state-of-the-world Aggregated Discovery Service: each
//! connected node is identified by its node id, which doubles as the
//! gateway label. The stream answers every subscription request from the
//! current snapshot and re-sends subscribed resource types whenever a new
//! snapshot version is published for the node's label. Delta streams are
//! not supported.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::{
        AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
    },
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};

use crate::config::Settings;
use crate::errors::Error;
use crate::xds::deployment::GatewayController;
use crate::xds::snapshot::{
    ResourceKind, Snapshot, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
};

fn kind_for_type_url(type_url: &str) -> Option<ResourceKind> {
    match type_url {
        CLUSTER_TYPE_URL => Some(ResourceKind::Cluster),
        ENDPOINT_TYPE_URL => Some(ResourceKind::Endpoint),
        ROUTE_TYPE_URL => Some(ResourceKind::Route),
        LISTENER_TYPE_URL => Some(ResourceKind::Listener),
        _ => None,
    }
}

fn response_for(snapshot: &Snapshot, type_url: &str) -> DiscoveryResponse {
    let resources = kind_for_type_url(type_url)
        .map(|kind| snapshot.resources_of(kind).iter().map(|r| r.body.clone()).collect())
        .unwrap_or_default();
    DiscoveryResponse {
        version_info: snapshot.version().to_string(),
        resources,
        type_url: type_url.to_string(),
        nonce: Uuid::new_v4().to_string(),
        ..Default::default()
    }
}

/// Aggregated Discovery Service backed by the controller's proxy cache.
#[derive(Debug)]
pub struct AdsService {
    controller: Arc<GatewayController>,
}

impl AdsService {
    pub fn new(controller: Arc<GatewayController>) -> Self {
        Self { controller }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = ReceiverStream<Result<DiscoveryResponse, Status>>;
    type DeltaAggregatedResourcesStream = ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let mut requests = request.into_inner();
        let controller = self.controller.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut label = String::new();
            let mut subscriptions: Vec<String> = Vec::new();
            let mut updates = controller.proxy_cache().subscribe();

            loop {
                tokio::select! {
                    incoming = requests.next() => {
                        let discovery_request = match incoming {
                            Some(Ok(discovery_request)) => discovery_request,
                            Some(Err(status)) => {
                                warn!(error = %status, "xDS request stream error");
                                break;
                            }
                            None => break,
                        };
                        if label.is_empty() {
                            label = discovery_request
                                .node
                                .as_ref()
                                .map(|node| node.id.clone())
                                .unwrap_or_default();
                            info!(label = %label, "Gateway node connected");
                        }
                        let type_url = discovery_request.type_url.clone();
                        if type_url.is_empty() {
                            continue;
                        }
                        if !subscriptions.contains(&type_url) {
                            subscriptions.push(type_url.clone());
                        }
                        if let Some(snapshot) = controller.proxy_cache().snapshot(&label) {
                            let response = response_for(&snapshot, &type_url);
                            if tx.send(Ok(response)).await.is_err() {
                                break;
                            }
                        } else {
                            debug!(label = %label, type_url = %type_url, "No snapshot yet for label");
                        }
                    }
                    event = updates.recv() => {
                        match event {
                            Ok(event) if event.label == label => {
                                let Some(snapshot) = controller.proxy_cache().snapshot(&label) else {
                                    continue;
                                };
                                let mut closed = false;
                                for type_url in &subscriptions {
                                    let response = response_for(&snapshot, type_url);
                                    if tx.send(Ok(response)).await.is_err() {
                                        closed = true;
                                        break;
                                    }
                                }
                                if closed {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                // Snapshot publishes are idempotent; the next
                                // event carries the latest state anyway.
                                debug!(label = %label, skipped, "Update stream lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!(label = %label, "Gateway node stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }
}

/// Run the xDS gRPC server until the process shuts down.
pub async fn start_ads_server(
    settings: &Settings,
    controller: Arc<GatewayController>,
) -> crate::errors::Result<()> {
    let addr = format!("{}:{}", settings.xds.bind_address, settings.xds.port)
        .parse()
        .map_err(|e| Error::transport(format!("invalid xDS bind address: {e}")))?;

    info!(address = %addr, "Starting xDS server");
    Server::builder()
        .add_service(AggregatedDiscoveryServiceServer::new(AdsService::new(controller)))
        .serve(addr)
        .await
        .map_err(|e| Error::transport(format!("xDS server failed: {e}")))
}
