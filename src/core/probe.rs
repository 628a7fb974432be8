use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ModelInfo, ModelsResponse, API_KEY_HEADER};
use crate::core::config::Settings;
use crate::utils::url::construct_api_url;

/// Hard cap on one probe round trip. The in-flight request is aborted when
/// the timer fires.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(4);

/// Cadence of the background connectivity monitor.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// The proxy answers liveness on its bare root.
pub const LIVENESS_PATH: &str = "/";

/// What the host's connectivity indicator shows. Recomputed on every probe,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Transport context of the embedding surface. A page served over HTTPS
/// cannot fetch plain-HTTP origins, and that block surfaces as a generic
/// transport failure; knowing the context lets the prober name the real
/// cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportContext {
    /// Plain-HTTP page or a native shell; no downgrade rules apply.
    #[default]
    Insecure,
    /// HTTPS page; plain-HTTP targets are candidates for a mixed-content
    /// block.
    Secure,
}

impl TransportContext {
    pub fn is_secure(self) -> bool {
        matches!(self, TransportContext::Secure)
    }

    /// Best-effort from an origin string such as `https://app.example`.
    pub fn of_origin(origin: &str) -> Self {
        if origin
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("https://")
        {
            TransportContext::Secure
        } else {
            TransportContext::Insecure
        }
    }
}

/// Why a probe never produced an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkReason {
    /// The bounded timer fired before the request resolved.
    Timeout,
    /// Secure page, insecure target: the failure is almost certainly the
    /// browser refusing the downgrade, not the server being down. The
    /// remediation differs (site permission vs. firewall), so it gets its
    /// own tag.
    MixedContentBlocked,
    Unreachable(String),
}

impl fmt::Display for NetworkReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkReason::Timeout => write!(f, "request timed out"),
            NetworkReason::MixedContentBlocked => write!(
                f,
                "blocked secure-to-insecure request: allow insecure content for this site, or serve the proxy over HTTPS"
            ),
            NetworkReason::Unreachable(detail) => write!(f, "{detail}"),
        }
    }
}

/// Classified result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Any 2xx.
    Ok,
    /// HTTP 403: shared secret mismatch.
    AuthError,
    /// Other non-2xx status.
    HttpError(u16),
    /// The request never produced a status.
    NetworkError(NetworkReason),
}

impl ProbeOutcome {
    pub fn connectivity(&self) -> ConnectivityStatus {
        match self {
            ProbeOutcome::Ok => ConnectivityStatus::Reachable,
            _ => ConnectivityStatus::Unreachable,
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Ok => write!(f, "server reachable"),
            ProbeOutcome::AuthError => {
                write!(f, "authentication rejected (HTTP 403): check the shared secret")
            }
            ProbeOutcome::HttpError(status) => write!(f, "server error (HTTP {status})"),
            ProbeOutcome::NetworkError(reason) => write!(f, "{reason}"),
        }
    }
}

fn has_insecure_scheme(base_url: &str) -> bool {
    base_url
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("http://")
}

/// Heuristic, not a diagnosis: the browser does not say *why* a fetch
/// failed, so secure-page + insecure-target is taken as a downgrade block.
fn classify_transport_failure(
    context: TransportContext,
    base_url: &str,
    detail: String,
) -> NetworkReason {
    if context.is_secure() && has_insecure_scheme(base_url) {
        NetworkReason::MixedContentBlocked
    } else {
        NetworkReason::Unreachable(detail)
    }
}

fn classify_status(status: StatusCode) -> ProbeOutcome {
    if status.is_success() {
        ProbeOutcome::Ok
    } else if status == StatusCode::FORBIDDEN {
        ProbeOutcome::AuthError
    } else {
        ProbeOutcome::HttpError(status.as_u16())
    }
}

async fn send_probe(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    path: &str,
    timeout: Duration,
    context: TransportContext,
) -> Result<reqwest::Response, NetworkReason> {
    let url = construct_api_url(base_url, path);
    let request = client.get(url).header(API_KEY_HEADER, api_key).send();
    match tokio::time::timeout(timeout, request).await {
        // Dropping the future aborts the in-flight request.
        Err(_) => Err(NetworkReason::Timeout),
        Ok(Err(err)) if err.is_timeout() => Err(NetworkReason::Timeout),
        Ok(Err(err)) => Err(classify_transport_failure(context, base_url, err.to_string())),
        Ok(Ok(response)) => Ok(response),
    }
}

/// Issue one GET against `{base_url}/{path}` with the shared secret and a
/// hard timeout, and classify what came back. Does not touch shared state;
/// the caller decides what to do with the outcome.
pub async fn probe(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    path: &str,
    timeout: Duration,
    context: TransportContext,
) -> ProbeOutcome {
    if base_url.trim().is_empty() {
        return ProbeOutcome::NetworkError(NetworkReason::Unreachable(
            "no server URL configured".to_string(),
        ));
    }
    match send_probe(client, base_url, api_key, path, timeout, context).await {
        Err(reason) => ProbeOutcome::NetworkError(reason),
        Ok(response) => classify_status(response.status()),
    }
}

/// Failure of the model-listing diagnostic. A reachable server that returns
/// junk is a decode failure, not a connectivity failure.
#[derive(Debug, PartialEq)]
pub enum ModelProbeError {
    Connectivity(ProbeOutcome),
    Decode(String),
}

impl fmt::Display for ModelProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelProbeError::Connectivity(outcome) => write!(f, "{outcome}"),
            ModelProbeError::Decode(detail) => {
                write!(f, "model list was not valid JSON: {detail}")
            }
        }
    }
}

impl std::error::Error for ModelProbeError {}

/// Diagnostic variant of [`probe`]: `GET {base_url}/models`, with the body
/// decoded into the available model list, sorted by id for stable display.
pub async fn probe_models(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    timeout: Duration,
    context: TransportContext,
) -> Result<Vec<ModelInfo>, ModelProbeError> {
    if base_url.trim().is_empty() {
        return Err(ModelProbeError::Connectivity(ProbeOutcome::NetworkError(
            NetworkReason::Unreachable("no server URL configured".to_string()),
        )));
    }
    let response = send_probe(client, base_url, api_key, "models", timeout, context)
        .await
        .map_err(|reason| ModelProbeError::Connectivity(ProbeOutcome::NetworkError(reason)))?;

    match classify_status(response.status()) {
        ProbeOutcome::Ok => {}
        outcome => return Err(ModelProbeError::Connectivity(outcome)),
    }

    let body = response.text().await.map_err(|err| {
        ModelProbeError::Connectivity(ProbeOutcome::NetworkError(NetworkReason::Unreachable(
            err.to_string(),
        )))
    })?;
    let parsed: ModelsResponse =
        serde_json::from_str(&body).map_err(|err| ModelProbeError::Decode(err.to_string()))?;

    let mut models = parsed.data;
    models.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(models)
}

/// Probe coordinates captured from settings at invocation time. The monitor
/// clones one of these per probe, so an active chat stream and the ticker
/// never share mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    pub base_url: String,
    pub api_key: String,
    pub context: TransportContext,
}

impl ProbeTarget {
    pub fn from_settings(settings: &Settings, context: TransportContext) -> Self {
        Self {
            base_url: settings.server_url.clone(),
            api_key: settings.api_key.clone(),
            context,
        }
    }
}

/// Run liveness probes on a fixed cadence, re-probing immediately when the
/// target changes (i.e. the user edited settings), and publish the status
/// for the host's indicator. Runs until cancelled or until every receiver
/// and the target sender are gone.
pub fn spawn_connectivity_monitor(
    client: reqwest::Client,
    mut target_rx: watch::Receiver<ProbeTarget>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> watch::Receiver<ConnectivityStatus> {
    let (status_tx, status_rx) = watch::channel(ConnectivityStatus::Unknown);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                changed = target_rx.changed() => {
                    match changed {
                        Ok(()) => ticker.reset(),
                        Err(_) => break,
                    }
                }
            }
            let target = target_rx.borrow_and_update().clone();
            let outcome = probe(
                &client,
                &target.base_url,
                &target.api_key,
                LIVENESS_PATH,
                timeout,
                target.context,
            )
            .await;
            debug!(%outcome, "connectivity probe");
            if status_tx.send(outcome.connectivity()).is_err() {
                break;
            }
        }
    });
    status_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_page_with_insecure_target_reads_as_mixed_content() {
        let reason = classify_transport_failure(
            TransportContext::Secure,
            "http://192.168.1.109:6969",
            "fetch failed".to_string(),
        );
        assert_eq!(reason, NetworkReason::MixedContentBlocked);
    }

    #[test]
    fn other_transport_failures_stay_unreachable() {
        let reason = classify_transport_failure(
            TransportContext::Insecure,
            "http://192.168.1.109:6969",
            "connection refused".to_string(),
        );
        assert_eq!(reason, NetworkReason::Unreachable("connection refused".into()));

        let reason = classify_transport_failure(
            TransportContext::Secure,
            "https://proxy.example",
            "connection refused".to_string(),
        );
        assert_eq!(reason, NetworkReason::Unreachable("connection refused".into()));
    }

    #[test]
    fn context_derives_from_origin_scheme() {
        assert_eq!(
            TransportContext::of_origin("https://app.example"),
            TransportContext::Secure
        );
        assert_eq!(
            TransportContext::of_origin("http://localhost:8080"),
            TransportContext::Insecure
        );
        assert_eq!(TransportContext::of_origin(""), TransportContext::Insecure);
    }

    #[test]
    fn statuses_map_to_outcomes() {
        assert_eq!(classify_status(StatusCode::OK), ProbeOutcome::Ok);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), ProbeOutcome::Ok);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ProbeOutcome::AuthError);
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            ProbeOutcome::HttpError(404)
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ProbeOutcome::HttpError(500)
        );
    }

    #[test]
    fn only_ok_counts_as_reachable() {
        assert_eq!(ProbeOutcome::Ok.connectivity(), ConnectivityStatus::Reachable);
        assert_eq!(
            ProbeOutcome::AuthError.connectivity(),
            ConnectivityStatus::Unreachable
        );
        assert_eq!(
            ProbeOutcome::NetworkError(NetworkReason::Timeout).connectivity(),
            ConnectivityStatus::Unreachable
        );
    }

    #[tokio::test]
    async fn empty_base_url_short_circuits() {
        let client = reqwest::Client::new();
        let outcome = probe(
            &client,
            "",
            "secret",
            LIVENESS_PATH,
            PROBE_TIMEOUT,
            TransportContext::Insecure,
        )
        .await;
        assert!(matches!(
            outcome,
            ProbeOutcome::NetworkError(NetworkReason::Unreachable(_))
        ));
    }
}
