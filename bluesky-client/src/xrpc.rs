use crate::api::{BlobRef, DestinationPlatform, PostRecord, Session, POST_COLLECTION};
use async_trait::async_trait;
use bluemigrate_core::{BlueskyApiError, StrongRef};
use reqwest::{header::HeaderMap, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// XRPC error codes the server reports for a dead session.
const AUTH_ERROR_CODES: [&str; 3] = ["ExpiredToken", "InvalidToken", "AuthenticationRequired"];

#[derive(Debug, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct CreateSessionInput<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CreateRecordInput<'a> {
    repo: &'a str,
    collection: &'static str,
    record: &'a PostRecord,
}

#[derive(Deserialize)]
struct UploadBlobOutput {
    blob: BlobRef,
}

#[derive(Deserialize)]
struct ResolveHandleOutput {
    did: String,
}

/// reqwest-backed client for an AT Protocol PDS.
#[derive(Debug, Clone)]
pub struct XrpcClient {
    http: Client,
    service_url: Url,
}

impl XrpcClient {
    pub fn new(service_url: &str) -> Result<Self, BlueskyApiError> {
        let service_url = Url::parse(service_url).map_err(|e| BlueskyApiError::BadRequest {
            details: format!("invalid service url '{}': {}", service_url, e),
        })?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BlueskyApiError::Unknown {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http, service_url })
    }

    fn endpoint(&self, nsid: &str) -> Result<Url, BlueskyApiError> {
        self.service_url
            .join(&format!("xrpc/{}", nsid))
            .map_err(|e| BlueskyApiError::BadRequest {
                details: format!("invalid endpoint {}: {}", nsid, e),
            })
    }

    fn request(&self, method: Method, nsid: &str) -> Result<RequestBuilder, BlueskyApiError> {
        Ok(self.http.request(method, self.endpoint(nsid)?))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        nsid: &str,
        request: RequestBuilder,
    ) -> Result<T, BlueskyApiError> {
        debug!("Making XRPC request: {}", nsid);
        let response = request.send().await.map_err(|e| {
            warn!("XRPC request {} failed before a response: {}", nsid, e);
            BlueskyApiError::Transient {
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("Request failed with status: {} for {}", status, nsid);
            return Err(error_from_response(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BlueskyApiError::Unknown {
                message: format!("unexpected {} response body: {}", nsid, e),
            })
    }
}

/// Maps a failed response to the error taxonomy.
async fn error_from_response(response: Response) -> BlueskyApiError {
    let status = response.status();
    let retry_after = retry_after_secs(response.headers());
    let body: Option<XrpcErrorBody> = response.json().await.ok();
    let code = body.as_ref().and_then(|b| b.error.clone());
    let details = body
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| status.to_string());

    if code
        .as_deref()
        .is_some_and(|c| AUTH_ERROR_CODES.contains(&c))
    {
        return BlueskyApiError::AuthExpired { reason: details };
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!("Rate limited, retry after {} seconds", retry_after);
            BlueskyApiError::RateLimited { retry_after }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BlueskyApiError::AuthExpired { reason: details }
        }
        StatusCode::NOT_FOUND => BlueskyApiError::NotFound { details },
        StatusCode::PAYLOAD_TOO_LARGE => BlueskyApiError::PayloadTooLarge,
        StatusCode::UNSUPPORTED_MEDIA_TYPE => BlueskyApiError::UnsupportedFormat { details },
        StatusCode::BAD_REQUEST => BlueskyApiError::BadRequest { details },
        s if s.is_server_error() => BlueskyApiError::ServerError {
            status_code: s.as_u16(),
        },
        s => BlueskyApiError::Unknown {
            message: format!("{}: {}", s, details),
        },
    }
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[async_trait]
impl DestinationPlatform for XrpcClient {
    async fn login(&self, identifier: &str, password: &str) -> Result<Session, BlueskyApiError> {
        let request = self
            .request(Method::POST, "com.atproto.server.createSession")?
            .json(&CreateSessionInput {
                identifier,
                password,
            });
        let session: Session = self
            .send("com.atproto.server.createSession", request)
            .await?;
        info!(did = %session.did, "Logged in as {}", session.handle);
        Ok(session)
    }

    async fn resolve_handle(&self, handle: &str) -> Result<String, BlueskyApiError> {
        let request = self
            .request(Method::GET, "com.atproto.identity.resolveHandle")?
            .query(&[("handle", handle)]);
        let output: ResolveHandleOutput = self
            .send("com.atproto.identity.resolveHandle", request)
            .await?;
        Ok(output.did)
    }

    async fn upload_media(
        &self,
        session: &Session,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<BlobRef, BlueskyApiError> {
        let request = self
            .request(Method::POST, "com.atproto.repo.uploadBlob")?
            .bearer_auth(&session.access_jwt)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(data);
        let output: UploadBlobOutput = self.send("com.atproto.repo.uploadBlob", request).await?;
        Ok(output.blob)
    }

    async fn publish_post(
        &self,
        session: &Session,
        record: &PostRecord,
    ) -> Result<StrongRef, BlueskyApiError> {
        let request = self
            .request(Method::POST, "com.atproto.repo.createRecord")?
            .bearer_auth(&session.access_jwt)
            .json(&CreateRecordInput {
                repo: &session.did,
                collection: POST_COLLECTION,
                record,
            });
        self.send("com.atproto.repo.createRecord", request).await
    }
}
