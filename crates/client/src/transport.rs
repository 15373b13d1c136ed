use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::error::ClientError;
use crate::v1::V1Response;

const CLIENT_VERSION: &str = concat!("Kingest.Rust:", env!("CARGO_PKG_VERSION"));

/// Bearer-authenticated channel to one endpoint (engine or data management).
#[derive(Clone)]
pub struct KustoTransport {
    client: Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Serialize)]
struct MgmtRequest<'a> {
    db: &'a str,
    csl: &'a str,
}

/// One streaming ingest request.
#[derive(Debug, Clone)]
pub struct StreamingPost {
    pub database: String,
    pub table: String,
    pub format: String,
    pub mapping: Option<String>,
    pub content_encoding: Option<&'static str>,
    pub client_request_id: String,
    pub body: Bytes,
}

impl StreamingPost {
    /// `{endpoint}/v1/rest/ingest/{db}/{table}?streamFormat=..[&mappingName=..]`
    pub fn url(&self, endpoint: &str) -> Result<Url, ClientError> {
        let mut url =
            Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(endpoint.to_string()))?
            .pop_if_empty()
            .extend(["v1", "rest", "ingest", self.database.as_str(), self.table.as_str()]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("streamFormat", &self.format);
            if let Some(mapping) = &self.mapping {
                query.append_pair("mappingName", mapping);
            }
        }
        Ok(url)
    }
}

impl KustoTransport {
    pub fn new(
        endpoint: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ClientError::InvalidEndpoint(endpoint));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn headers(&self, activity: &str, request_id: &str) -> Result<HeaderMap, ClientError> {
        let token = self.tokens.token().await?;
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ClientError::Auth(format!("token is not a valid header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("x-ms-client-version", HeaderValue::from_static(CLIENT_VERSION));
        if let Ok(v) = HeaderValue::from_str(&format!("{activity};{request_id}")) {
            headers.insert("x-ms-client-request-id", v);
        }
        Ok(headers)
    }

    /// Execute a management command and decode its v1 result.
    pub async fn execute_mgmt(&self, database: &str, command: &str) -> Result<V1Response, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let headers = self.headers("KIC.execute_mgmt", &request_id).await?;

        debug!(command, request_id = %request_id, "Executing management command");

        let response = self
            .client
            .post(format!("{}/v1/rest/mgmt", self.endpoint))
            .headers(headers)
            .json(&MgmtRequest { db: database, csl: command })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_response(status.as_u16(), &body));
        }

        response
            .json::<V1Response>()
            .await
            .map_err(|e| ClientError::Decode(format!("management response: {e}")))
    }

    /// Post a streaming ingest payload. Success means the data is committed.
    pub async fn post_streaming(&self, post: StreamingPost) -> Result<(), ClientError> {
        let mut headers = self
            .headers("KIC.execute_streaming_ingest", &post.client_request_id)
            .await?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        if let Some(encoding) = post.content_encoding {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }

        let url = post.url(&self.endpoint)?;
        debug!(
            url = %url,
            bytes = post.body.len(),
            request_id = %post.client_request_id,
            "Posting streaming payload"
        );

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(post.body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::from_response(status.as_u16(), &body))
    }
}
