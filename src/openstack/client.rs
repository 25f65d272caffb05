//! OpenStack REST Clients
//!
//! reqwest-backed implementations of the service traits for Cinder (v3),
//! Neutron (v2.0) and Nova (v2.1).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::auth::Session;
use super::{
    BlockStorage, ClientSet, Compute, Networking, PortCreateRequest, PortQuery, Server,
    ServerCreateRequest, VolumeQuery, VolumeSummary,
};
use crate::cancel::until_cancelled;
use crate::config::OpenStackArgs;
use crate::error::{ApiError, ReconcileError};
use crate::types::{TargetPort, TargetVolume};

const USER_AGENT: &str = concat!("migrate-reconciler/", env!("CARGO_PKG_VERSION"));
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Build the shared HTTP client
pub fn http_client(insecure: bool) -> Result<Client, ApiError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .danger_accept_invalid_certs(insecure)
        .timeout(Duration::from_secs(30))
        .build()?;

    Ok(client)
}

/// Authenticate and build clients for all three services
pub async fn connect(args: &OpenStackArgs) -> Result<ClientSet, ApiError> {
    let http = http_client(args.insecure)?;
    let session = Session::authenticate(&http, args).await?;
    let region = args.region_name.as_deref();

    let block_storage = session.endpoint(&["volumev3", "block-storage"], &args.interface, region)?;
    let compute = session.endpoint(&["compute"], &args.interface, region)?;
    let network = session.endpoint(&["network"], &args.interface, region)?;

    debug!(%block_storage, %compute, %network, "Resolved service endpoints");

    Ok(ClientSet::new(
        Arc::new(BlockStorageClient::new(ServiceClient::new(
            http.clone(),
            "block-storage",
            block_storage,
            session.token.clone(),
        ))),
        Arc::new(ComputeClient::new(ServiceClient::new(
            http.clone(),
            "compute",
            compute,
            session.token.clone(),
        ))),
        Arc::new(NetworkingClient::new(ServiceClient::new(
            http,
            "network",
            format!("{}/v2.0", network),
            session.token,
        ))),
    ))
}

/// `connect`, abandoned as soon as `cancel` fires
pub async fn connect_until_cancelled(
    args: &OpenStackArgs,
    cancel: &CancellationToken,
) -> Result<ClientSet, ReconcileError> {
    Ok(until_cancelled(cancel, connect(args)).await??)
}

// ============================================================
// Shared plumbing
// ============================================================

/// Authenticated client bound to one service endpoint
#[derive(Clone)]
pub struct ServiceClient {
    http: Client,
    service: &'static str,
    endpoint: String,
    token: String,
}

impl ServiceClient {
    pub fn new(http: Client, service: &'static str, endpoint: String, token: String) -> Self {
        Self {
            http,
            service,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.header(AUTH_TOKEN_HEADER, &self.token).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                service: self.service,
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            service: self.service,
            message: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.send(self.http.get(self.url(path)).query(query)).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.send(self.http.get(url)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }
}

/// Pagination link as returned in `*_links`
#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

fn next_page(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|link| link.rel == "next")
        .map(|link| link.href.as_str())
}

// ============================================================
// Block storage
// ============================================================

#[derive(Debug, Deserialize)]
struct VolumeListPage {
    volumes: Vec<VolumeSummary>,
    #[serde(default)]
    volumes_links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct VolumeEnvelope {
    volume: TargetVolume,
}

pub struct BlockStorageClient {
    client: ServiceClient,
}

impl BlockStorageClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlockStorage for BlockStorageClient {
    async fn list_volumes(&self, query: &VolumeQuery) -> Result<Vec<VolumeSummary>, ApiError> {
        let mut params = vec![("name", query.name.clone())];
        if let Some(filter) = query.metadata_filter() {
            params.push(("metadata", filter));
        }

        debug!(%query, "Listing volumes");

        let mut page: VolumeListPage = self.client.get("volumes", &params).await?;
        let mut volumes = std::mem::take(&mut page.volumes);

        while let Some(next) = next_page(&page.volumes_links).map(str::to_string) {
            page = self.client.get_url(&next).await?;
            volumes.append(&mut page.volumes);
        }

        Ok(volumes)
    }

    async fn get_volume(&self, id: &str) -> Result<TargetVolume, ApiError> {
        let envelope: VolumeEnvelope = self.client.get(&format!("volumes/{}", id), &[]).await?;
        Ok(envelope.volume)
    }
}

// ============================================================
// Networking
// ============================================================

#[derive(Debug, Deserialize)]
struct PortListPage {
    ports: Vec<TargetPort>,
    #[serde(default)]
    ports_links: Vec<Link>,
}

#[derive(Debug, Serialize)]
struct PortCreateEnvelope<'a> {
    port: &'a PortCreateRequest,
}

#[derive(Debug, Deserialize)]
struct PortEnvelope {
    port: TargetPort,
}

pub struct NetworkingClient {
    client: ServiceClient,
}

impl NetworkingClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Networking for NetworkingClient {
    async fn list_ports(&self, query: &PortQuery) -> Result<Vec<TargetPort>, ApiError> {
        let params = [
            ("network_id", query.network_id.clone()),
            ("mac_address", query.mac_address.clone()),
        ];

        debug!(%query, "Listing ports");

        let mut page: PortListPage = self.client.get("ports", &params).await?;
        let mut ports = std::mem::take(&mut page.ports);

        while let Some(next) = next_page(&page.ports_links).map(str::to_string) {
            page = self.client.get_url(&next).await?;
            ports.append(&mut page.ports);
        }

        Ok(ports)
    }

    async fn create_port(&self, request: &PortCreateRequest) -> Result<TargetPort, ApiError> {
        let envelope: PortEnvelope = self
            .client
            .post("ports", &PortCreateEnvelope { port: request })
            .await?;
        Ok(envelope.port)
    }
}

// ============================================================
// Compute
// ============================================================

#[derive(Debug, Serialize)]
struct ServerCreateEnvelope<'a> {
    server: &'a ServerCreateRequest,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: Server,
}

pub struct ComputeClient {
    client: ServiceClient,
}

impl ComputeClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Compute for ComputeClient {
    async fn create_server(&self, request: &ServerCreateRequest) -> Result<Server, ApiError> {
        let envelope: ServerEnvelope = self
            .client
            .post("servers", &ServerCreateEnvelope { server: request })
            .await?;
        Ok(envelope.server)
    }

    async fn get_server(&self, id: &str) -> Result<Server, ApiError> {
        let envelope: ServerEnvelope = self.client.get(&format!("servers/{}", id), &[]).await?;
        Ok(envelope.server)
    }
}
