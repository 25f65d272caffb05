//! Identity (Keystone v3)
//!
//! Password authentication scoped to a project. The issued token and the
//! service catalog from the same response are all the service clients need.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::OpenStackArgs;
use crate::error::ApiError;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// An authenticated identity session
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

/// Identity v3 base URL for `auth_url`
///
/// `https://keystone:5000` becomes `https://keystone:5000/v3`; an explicit
/// `/v2.0` is replaced, since only v3 tokens are requested.
fn identity_url(auth_url: &str) -> String {
    let trimmed = auth_url.trim_end_matches('/');
    let (base, last) = match trimmed.rsplit_once('/') {
        Some((base, last)) if !base.ends_with('/') => (base, last),
        _ => return format!("{}/v3", trimmed),
    };

    let is_version = last
        .strip_prefix('v')
        .map_or(false, |n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit() || c == '.'));

    match (is_version, last) {
        (true, "v3") => trimmed.to_string(),
        (true, _) => format!("{}/v3", base),
        (false, _) => format!("{}/v3", trimmed),
    }
}

/// Build the `POST /auth/tokens` body for password authentication
fn password_auth_body(args: &OpenStackArgs) -> serde_json::Value {
    let project = match (&args.project_id, &args.project_name) {
        (Some(id), _) => json!({ "id": id }),
        (None, Some(name)) => json!({
            "name": name,
            "domain": { "name": args.project_domain_name }
        }),
        (None, None) => serde_json::Value::Null,
    };

    let mut body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": args.username,
                        "domain": { "name": args.user_domain_name },
                        "password": args.password
                    }
                }
            }
        }
    });

    if !project.is_null() {
        body["auth"]["scope"] = json!({ "project": project });
    }

    body
}

impl Session {
    /// Authenticate with username/password against the identity service
    pub async fn authenticate(http: &Client, args: &OpenStackArgs) -> Result<Self, ApiError> {
        let url = format!("{}/auth/tokens", identity_url(&args.auth_url));
        debug!(auth_url = %args.auth_url, user = %args.username, "Authenticating");

        let response = http
            .post(&url)
            .json(&password_auth_body(args))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!("{}: {}", status, text)));
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Auth(format!("response has no {} header", SUBJECT_TOKEN_HEADER)))?;

        let text = response.text().await?;
        let body: TokenResponse = serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            service: "identity",
            message: e.to_string(),
        })?;

        info!(services = body.token.catalog.len(), "Authenticated with identity service");

        Ok(Self {
            token,
            catalog: body.token.catalog,
        })
    }

    /// Find an endpoint URL for the first matching service type
    pub fn endpoint(
        &self,
        service_types: &[&str],
        interface: &str,
        region: Option<&str>,
    ) -> Result<String, ApiError> {
        for service_type in service_types {
            let Some(entry) = self
                .catalog
                .iter()
                .find(|entry| entry.service_type == *service_type)
            else {
                continue;
            };

            let endpoint = entry.endpoints.iter().find(|ep| {
                ep.interface == interface
                    && region.map_or(true, |r| {
                        ep.region_id.as_deref() == Some(r) || ep.region.as_deref() == Some(r)
                    })
            });

            if let Some(ep) = endpoint {
                return Ok(ep.url.trim_end_matches('/').to_string());
            }
        }

        Err(ApiError::MissingEndpoint {
            service_type: service_types.join("|"),
        })
    }
}
