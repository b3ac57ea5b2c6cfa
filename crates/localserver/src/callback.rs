//! Outbound callback queue for `EcKryptoMiddleware` (spec.md §3 "Callback
//! datum", §4.4 step 4, §5 "producer-many / consumer-one").
//!
//! A bounded MPSC channel plus a single drain task: a small owned worker
//! rather than a shared background service.

use base64::Engine;
use http::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{CALLBACK_CLIENT_TIMEOUT, CALLBACK_QUEUE_CAPACITY};

/// `{Time, UserAgent, Error, Response}` (spec.md §3).
#[derive(Debug, Clone, Serialize)]
pub struct CallbackDatum {
    #[serde(rename = "Time")]
    pub time: u64,
    #[serde(rename = "UserAgent")]
    pub user_agent: String,
    #[serde(rename = "Error")]
    pub error: Option<CallbackError>,
    #[serde(rename = "Response")]
    pub response: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackError {
    TimeOutOfRange,
    ResponseFailure,
}

impl CallbackDatum {
    pub fn success(response_bytes: &[u8], user_agent: String) -> Self {
        Self {
            time: now_epoch_secs(),
            user_agent,
            error: None,
            response: base64::engine::general_purpose::STANDARD.encode(response_bytes),
        }
    }

    pub fn failed(error: CallbackError, user_agent: String) -> Self {
        Self {
            time: now_epoch_secs(),
            user_agent,
            error: Some(error),
            response: String::new(),
        }
    }
}

fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A queued outbound POST: destination, caller-supplied headers, and the
/// datum to serialize as the JSON body.
pub struct QueuedCallback {
    pub url: String,
    pub headers: HeaderMap,
    pub datum: CallbackDatum,
}

/// Producer handle. Cheap to clone; held by every in-flight request.
#[derive(Clone)]
pub struct CallbackSender {
    tx: mpsc::Sender<QueuedCallback>,
}

impl CallbackSender {
    /// Enqueue a callback. On overflow the callback is dropped with a
    /// warning rather than blocking the request path (spec.md §4.4).
    pub fn enqueue(&self, callback: QueuedCallback) {
        if let Err(err) = self.tx.try_send(callback) {
            tracing::warn!(error = %err, "callback queue full, dropping callback");
        }
    }
}

/// Build the bounded queue and spawn its single drain worker.
pub fn spawn_worker() -> CallbackSender {
    let (tx, rx) = mpsc::channel(CALLBACK_QUEUE_CAPACITY);
    tokio::spawn(drain(rx));
    CallbackSender { tx }
}

async fn drain(mut rx: mpsc::Receiver<QueuedCallback>) {
    let client = match Client::builder().timeout(CALLBACK_CLIENT_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(error = %err, "failed to build callback HTTP client; callback worker exiting");
            return;
        }
    };

    while let Some(callback) = rx.recv().await {
        if callback.url.is_empty() {
            continue;
        }
        dispatch_one(&client, callback).await;
    }
}

async fn dispatch_one(client: &Client, callback: QueuedCallback) {
    let mut request = client
        .post(&callback.url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .json(&callback.datum);

    for (name, value) in callback.headers.iter() {
        request = request.header(name.as_str(), value.as_bytes());
    }

    match request.send().await {
        Ok(resp) => {
            tracing::debug!(url = %callback.url, status = %resp.status(), "callback dispatched");
        }
        Err(err) => {
            tracing::warn!(url = %callback.url, error = %err, "callback dispatch failed");
        }
    }
}

/// Convert wire `CallbackHeaders: map<string, list<string>>` into an
/// `http::HeaderMap`, copied verbatim (spec.md §3).
pub fn headers_from_map(map: &std::collections::HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in map {
        let Ok(header_name) = http::header::HeaderName::try_from(name.as_str()) else {
            continue;
        };
        for value in values {
            if let Ok(header_value) = HeaderValue::from_str(value) {
                headers.append(header_name.clone(), header_value);
            }
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_datum_has_no_error_and_base64_response() {
        let datum = CallbackDatum::success(b"hello", "test-agent".to_string());
        assert!(datum.error.is_none());
        assert_eq!(
            base64::engine::general_purpose::STANDARD.decode(&datum.response).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn failed_datum_carries_the_literal_error_strings() {
        let datum = CallbackDatum::failed(CallbackError::TimeOutOfRange, "ua".to_string());
        let json = serde_json::to_value(&datum).unwrap();
        assert_eq!(json["Error"], "time-out-of-range");

        let datum = CallbackDatum::failed(CallbackError::ResponseFailure, "ua".to_string());
        let json = serde_json::to_value(&datum).unwrap();
        assert_eq!(json["Error"], "response-failure");
    }

    #[tokio::test]
    async fn overflowing_the_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = CallbackSender { tx };

        let make = || QueuedCallback {
            url: "http://127.0.0.1:1/unused".to_string(),
            headers: HeaderMap::new(),
            datum: CallbackDatum::success(b"x", "ua".to_string()),
        };

        sender.enqueue(make());
        // Second enqueue must not block even though the channel is full and
        // nothing is draining it.
        sender.enqueue(make());
    }
}
