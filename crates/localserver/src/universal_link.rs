//! `UniversalLinkForwarder` (spec.md §4.9): demultiplexes OS-dispatched
//! deep-link URLs across every candidate local port.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{PORT_CANDIDATES, UNIVERSAL_LINK_TIMEOUT};

const APPLINKS_PREFIX: &str = "/launcher/applinks/";

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("malformed universal link: {0}")]
    Malformed(String),
}

/// Ingress handle: send a deep-link URL, get it fanned out to every
/// candidate port (spec.md §4.9 "exposes an ingress channel of URL strings").
#[derive(Clone)]
pub struct ForwarderHandle {
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

impl ForwarderHandle {
    pub fn forward(&self, url: String) {
        if let Err(err) = self.tx.try_send(url) {
            tracing::warn!(error = %err, "universal link ingress full, dropping");
        }
    }

    /// Idempotent, non-blocking under repeated calls (spec.md §4.9).
    pub fn interrupt(&self) {
        self.shutdown.cancel();
    }
}

/// Spawn the forwarder actor; returns the handle used to feed it URLs.
pub fn spawn(client: Arc<reqwest::Client>) -> ForwarderHandle {
    let (tx, rx) = mpsc::channel(64);
    let shutdown = CancellationToken::new();
    tokio::spawn(run(rx, client, shutdown.clone()));
    ForwarderHandle { tx, shutdown }
}

async fn run(mut rx: mpsc::Receiver<String>, client: Arc<reqwest::Client>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            maybe_url = rx.recv() => {
                match maybe_url {
                    Some(url) => dispatch(&client, &url).await,
                    None => return,
                }
            }
        }
    }
}

async fn dispatch(client: &reqwest::Client, raw_url: &str) {
    let (origin, path_and_query) = match parse_universal_link(raw_url) {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(error = %err, url = %raw_url, "dropping malformed universal link");
            return;
        }
    };

    let futures = PORT_CANDIDATES.iter().map(|&port| {
        let client = client.clone();
        let origin = origin.clone();
        let path_and_query = path_and_query.clone();
        async move {
            let target = format!("http://127.0.0.1:{port}{path_and_query}");
            match client.get(&target).header(reqwest::header::ORIGIN, &origin).send().await {
                Ok(_) => {}
                Err(err) if err.is_connect() => {
                    // Port not bound; expected for all but one candidate.
                }
                Err(err) => {
                    tracing::warn!(port, error = %err, "universal link forward failed");
                }
            }
        }
    });

    let _ = tokio::time::timeout(UNIVERSAL_LINK_TIMEOUT, futures::future::join_all(futures)).await;
}

/// Parse `scheme://host/launcher/applinks/<rest>` into `(scheme://host,
/// /<rest>)`, stripping the applinks prefix (spec.md §4.9).
fn parse_universal_link(raw_url: &str) -> Result<(String, String), ForwarderError> {
    let url = url::Url::parse(raw_url).map_err(|e| ForwarderError::Malformed(e.to_string()))?;
    let origin = format!(
        "{}://{}",
        url.scheme(),
        url.host_str().ok_or_else(|| ForwarderError::Malformed("missing host".to_string()))?
    );

    let path = url.path();
    let stripped = path.strip_prefix(APPLINKS_PREFIX).unwrap_or(path).trim_start_matches('/');

    let path_and_query = match url.query() {
        Some(query) => format!("/{stripped}?{query}"),
        None => format!("/{stripped}"),
    };

    Ok((origin, path_and_query))
}
