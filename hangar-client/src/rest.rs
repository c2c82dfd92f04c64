//! HTTP/JSON transport over reqwest.
//!
//! Routes, relative to `{base}/{namespace}`:
//!
//! | operation | request                  |
//! |-----------|--------------------------|
//! | list      | `GET /`  (query string)  |
//! | get       | `GET /{id}`              |
//! | create    | `POST /`                 |
//! | update    | `PUT /{id}`              |
//! | delete    | `DELETE /{id}`           |
//! | restore   | `POST /{id}/restore`     |

use async_trait::async_trait;
use hangar_core::{ConfigError, FieldError, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

use crate::transport::{ListParams, Page, ResourceTransport};

/// Credentials attached to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientCredentials {
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
}

/// Build the shared HTTP client with auth headers and a request timeout.
pub fn build_http_client(
    timeout: Duration,
    credentials: &ClientCredentials,
) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .default_headers(build_auth_headers(credentials)?)
        .build()
        .map_err(|e| ConfigError::InvalidValue {
            field: "http_client",
            reason: e.to_string(),
        })
}

fn build_auth_headers(credentials: &ClientCredentials) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &credentials.api_key {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key).map_err(|e| ConfigError::InvalidValue {
                field: "auth.api_key",
                reason: e.to_string(),
            })?,
        );
    }
    if let Some(token) = &credentials.bearer_token {
        let value = format!("Bearer {}", token);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| ConfigError::InvalidValue {
                field: "auth.bearer_token",
                reason: e.to_string(),
            })?,
        );
    }
    Ok(headers)
}

/// REST transport for one namespace.
///
/// `R` is the record type decoded from responses, `D` the draft type
/// sent on create and update.
pub struct RestTransport<R, D> {
    client: Client,
    base: Url,
    namespace: String,
    _marker: PhantomData<fn() -> (R, D)>,
}

impl<R, D> RestTransport<R, D> {
    pub fn new(
        client: Client,
        base_url: &str,
        namespace: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            field: "api_base_url",
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: format!("{} cannot be used as a base URL", base_url),
            });
        }
        Ok(Self {
            client,
            base,
            namespace: namespace.into(),
            _marker: PhantomData,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `{base}/{namespace}/{segments...}`, each segment percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.namespace);
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.url(segments);
        debug!(%method, %url, "request");
        self.client.request(method, url)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        id: Option<&str>,
    ) -> Result<Vec<u8>, TransportError> {
        let response = request.send().await.map_err(transport_error)?;
        self.read_body(response, id).await
    }

    async fn read_body(&self, response: Response, id: Option<&str>) -> Result<Vec<u8>, TransportError> {
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(error_from_status(
                status.as_u16(),
                &String::from_utf8_lossy(&body),
                &self.namespace,
                id,
            ))
        }
    }
}

impl<R, D> Clone for RestTransport<R, D> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base: self.base.clone(),
            namespace: self.namespace.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R, D> fmt::Debug for RestTransport<R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestTransport")
            .field("base", &self.base.as_str())
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait]
impl<R, D> ResourceTransport for RestTransport<R, D>
where
    R: DeserializeOwned + Send + Sync + 'static,
    D: Serialize + Send + Sync + 'static,
{
    type Record = R;
    type Draft = D;

    async fn list(&self, params: &ListParams) -> Result<Page<R>, TransportError> {
        let request = self.request(Method::GET, &[]).query(&params.query_pairs());
        let body = self.send(request, None).await?;
        decode_page(&body)
    }

    async fn get_by_id(&self, id: &str) -> Result<R, TransportError> {
        let body = self.send(self.request(Method::GET, &[id]), Some(id)).await?;
        decode(&body)
    }

    async fn create(&self, draft: D) -> Result<R, TransportError> {
        let request = self.request(Method::POST, &[]).json(&draft);
        let body = self.send(request, None).await?;
        decode(&body)
    }

    async fn update(&self, id: &str, draft: D) -> Result<R, TransportError> {
        let request = self.request(Method::PUT, &[id]).json(&draft);
        let body = self.send(request, Some(id)).await?;
        decode(&body)
    }

    async fn delete(&self, id: &str) -> Result<(), TransportError> {
        self.send(self.request(Method::DELETE, &[id]), Some(id))
            .await
            .map(|_| ())
    }

    async fn restore(&self, id: &str) -> Result<R, TransportError> {
        let request = self.request(Method::POST, &[id, "restore"]);
        let body = self.send(request, Some(id)).await?;
        decode(&body)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::Decode {
        reason: e.to_string(),
    })
}

/// Accept both a page object and a bare JSON array.
pub fn decode_page<T: DeserializeOwned>(body: &[u8]) -> Result<Page<T>, TransportError> {
    let value: Value = decode(body)?;
    if value.is_array() {
        let items: Vec<T> = serde_json::from_value(value).map_err(|e| TransportError::Decode {
            reason: e.to_string(),
        })?;
        return Ok(Page::complete(items));
    }
    serde_json::from_value(value).map_err(|e| TransportError::Decode {
        reason: e.to_string(),
    })
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        return TransportError::Decode {
            reason: err.to_string(),
        };
    }
    TransportError::transient(err.status().map(|s| s.as_u16()), err.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "error")]
    message: Option<String>,
    #[serde(default)]
    errors: BTreeMap<String, FieldMessages>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldMessages {
    One(String),
    Many(Vec<String>),
}

/// Map a non-success HTTP response onto the transport taxonomy.
pub fn error_from_status(status: u16, body: &str, resource: &str, id: Option<&str>) -> TransportError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.clone().unwrap_or_else(|| {
        let text = body.trim();
        if text.is_empty() {
            format!("HTTP {}", status)
        } else {
            text.chars().take(200).collect()
        }
    });

    match status {
        404 => TransportError::not_found(resource, id.unwrap_or_default()),
        408 | 429 | 500..=599 => TransportError::transient(Some(status), message),
        400 | 409 | 422 => TransportError::Validation {
            message,
            fields: field_errors(parsed.errors),
        },
        400..=499 => TransportError::validation(message),
        _ => TransportError::Decode {
            reason: format!("unexpected status {}: {}", status, message),
        },
    }
}

fn field_errors(errors: BTreeMap<String, FieldMessages>) -> Vec<FieldError> {
    errors
        .into_iter()
        .flat_map(|(field, messages)| {
            let messages = match messages {
                FieldMessages::One(message) => vec![message],
                FieldMessages::Many(messages) => messages,
            };
            messages
                .into_iter()
                .map(move |message| FieldError::new(field.clone(), message))
        })
        .collect()
}
