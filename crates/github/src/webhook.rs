use std::{borrow::Cow, sync::Arc};

use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use mime::Mime;
use pullhook_core::config::Config;

use crate::{
    events::{EVENT_HEADER, WebhookEvent},
    signature::{self, SIGNATURE_256_HEADER, SIGNATURE_HEADER, SignatureError},
};

/// GitHub caps webhook payloads at 25 MB.
pub const MAX_PAYLOAD_SIZE: usize = 25 * 1024 * 1024;

/// Why a webhook delivery was refused.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("invalid secret: {0}")]
    Signature(#[from] SignatureError),
    #[error("error reading body")]
    BodyRead,
    #[error("X-GitHub-Event header missing")]
    MissingEvent,
    #[error("invalid payload: {0}")]
    BadPayload(String),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Signature(_) => StatusCode::UNAUTHORIZED,
            Self::BodyRead | Self::MissingEvent | Self::BadPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        tracing::warn!("- {self}");
        let status = self.status();
        let message = match self {
            Self::Signature(_) => "Invalid secret",
            _ => "Invalid payload",
        };
        (status, message).into_response()
    }
}

/// Verify and extract a GitHub webhook delivery.
#[derive(Clone, Debug)]
#[must_use]
pub struct GitHubEvent {
    pub event: WebhookEvent,
}

impl<S> FromRequest<S> for GitHubEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Rejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let config = <Arc<Config>>::from_ref(state);
        let headers = req.headers().clone();
        let body = Bytes::from_request(req, state).await.map_err(|_| Rejection::BodyRead)?;
        let event = validate(config.webhook.secret.as_bytes(), &headers, &body)?;
        Ok(GitHubEvent { event })
    }
}

/// Check the signature of a raw delivery, then parse it.
///
/// An empty secret skips signature verification, matching what GitHub sends
/// for hooks configured without one.
pub fn validate(
    secret: &[u8],
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookEvent, Rejection> {
    if !secret.is_empty() {
        signature::verify(
            secret,
            body,
            header_str(headers, SIGNATURE_256_HEADER),
            header_str(headers, SIGNATURE_HEADER),
        )?;
    }
    let kind = header_str(headers, EVENT_HEADER).ok_or(Rejection::MissingEvent)?;
    let payload = match extract_payload(headers, body) {
        Ok(payload) => payload,
        Err(_) if kind == "ping" => Cow::Borrowed(body),
        Err(e) => return Err(e),
    };
    WebhookEvent::parse(kind, &payload).map_err(|e| Rejection::BadPayload(e.to_string()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// GitHub delivers either raw JSON or a form with the JSON in `payload`.
fn extract_payload<'a>(headers: &HeaderMap, body: &'a [u8]) -> Result<Cow<'a, [u8]>, Rejection> {
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str())
        .and_then(|v| v.parse::<Mime>().ok());
    match content_type {
        Some(mime) if mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() => {
            url::form_urlencoded::parse(body)
                .find(|(key, _)| key == "payload")
                .map(|(_, value)| Cow::Owned(value.into_owned().into_bytes()))
                .ok_or_else(|| Rejection::BadPayload("form payload field missing".to_string()))
        }
        _ => Ok(Cow::Borrowed(body)),
    }
}
