//! HTTP adapters of the client core.
//!
//! Everything that talks to the backend goes through [`Transport`], which knows
//! the base URL and how to unwrap the response envelope. The adapters on top of
//! it implement the trait seams the loaders and the pipeline are written against.

mod api;
mod identity;
mod storage;

pub use api::ApiClient;
pub use identity::HttpIdentityProvider;
pub use storage::HttpObjectStore;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::ApiResponse;
use crate::config::ClientConfig;
use crate::errors::{ClientError, ErrorResponse};

/// Failed response, decoded from the error envelope when possible.
#[derive(Debug)]
pub(crate) struct RemoteFailure {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<RemoteFailure> for ClientError {
    fn from(failure: RemoteFailure) -> Self {
        ClientError::from_status(failure.status, failure.message)
    }
}

/// Shared HTTP client bound to one backend.
#[derive(Debug, Clone)]
pub struct Transport {
    http: Client,
    base_url: String,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(http, &config.api_base_url))
    }

    pub fn with_client(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the endpoint made of `segments`, each one percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Network(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Network(format!("Base URL {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn get(
        &self,
        segments: &[&str],
        bearer: Option<&str>,
    ) -> Result<RequestBuilder, ClientError> {
        Ok(authorize(self.http.get(self.endpoint(segments)?), bearer))
    }

    pub(crate) fn post(
        &self,
        segments: &[&str],
        bearer: Option<&str>,
    ) -> Result<RequestBuilder, ClientError> {
        Ok(authorize(self.http.post(self.endpoint(segments)?), bearer))
    }

    /// `GET` the endpoint and unwrap the envelope.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        bearer: Option<&str>,
    ) -> Result<T, ClientError> {
        let response = self.get(segments, bearer)?.send().await?;
        Ok(decode(response).await?)
    }

    /// `POST` a JSON body to the endpoint and unwrap the envelope.
    pub async fn post_json<B, T>(
        &self,
        segments: &[&str],
        body: &B,
        bearer: Option<&str>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(segments, bearer)?.json(body).send().await?;
        Ok(decode(response).await?)
    }
}

fn authorize(request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
    match bearer {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Unwrap a success envelope, or describe the failure.
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, DecodeError> {
    let status = response.status();
    if status.is_success() {
        let envelope: ApiResponse<T> = response.json().await.map_err(ClientError::from)?;
        return Ok(envelope.data);
    }

    let fallback = status.canonical_reason().unwrap_or("request failed").to_string();
    let failure = match response.json::<ErrorResponse>().await {
        Ok(body) => RemoteFailure {
            status,
            message: body.error.message,
            details: body.error.details,
        },
        Err(_) => RemoteFailure {
            status,
            message: fallback,
            details: None,
        },
    };
    Err(DecodeError::Remote(failure))
}

/// Why a response could not be unwrapped.
#[derive(Debug)]
pub(crate) enum DecodeError {
    /// The server answered with a non-success status
    Remote(RemoteFailure),
    /// The body could not be read or parsed
    Client(ClientError),
}

impl From<ClientError> for DecodeError {
    fn from(err: ClientError) -> Self {
        DecodeError::Client(err)
    }
}

impl From<DecodeError> for ClientError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Remote(failure) => failure.into(),
            DecodeError::Client(err) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base_url: &str) -> Transport {
        Transport::with_client(Client::new(), base_url)
    }

    #[test]
    fn test_endpoint_encodes_each_segment() {
        let url = transport("http://127.0.0.1:8080/")
            .endpoint(&["posts", "a b/../c?x=1", "like"])
            .unwrap();
        assert_eq!(url.path(), "/posts/a%20b%2F..%2Fc%3Fx=1/like");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let url = transport("http://127.0.0.1:8080/herbs")
            .endpoint(&["users", "fern", "posts"])
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/herbs/users/fern/posts");
    }

    #[test]
    fn test_endpoint_rejects_bad_base() {
        let err = transport("not a url").endpoint(&["posts"]).unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }
}
