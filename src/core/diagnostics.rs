use std::time::Duration;

use crate::api::ModelInfo;
use crate::core::config::Settings;
use crate::core::probe::{
    probe, probe_models, ModelProbeError, NetworkReason, ProbeOutcome, TransportContext,
    LIVENESS_PATH,
};

/// Combined result of the connection check-up: the liveness probe and the
/// model listing. The host renders it; nothing here prints or retries.
#[derive(Debug)]
pub struct DiagnosticsReport {
    pub liveness: ProbeOutcome,
    pub models: Result<Vec<ModelInfo>, ModelProbeError>,
}

impl DiagnosticsReport {
    pub fn healthy(&self) -> bool {
        self.liveness == ProbeOutcome::Ok && self.models.is_ok()
    }

    /// Actionable hint for the dominant failure, if any. Liveness failures
    /// win: if the server is down, the model listing failing too is noise.
    pub fn remediation(&self) -> Option<&'static str> {
        match &self.liveness {
            ProbeOutcome::Ok => match &self.models {
                Ok(_) => None,
                Err(ModelProbeError::Decode(_)) => Some(
                    "The server answered, but not with a model list; check that the URL points at a HomeLink proxy.",
                ),
                Err(ModelProbeError::Connectivity(outcome)) => remediation_for(outcome),
            },
            outcome => remediation_for(outcome),
        }
    }
}

fn remediation_for(outcome: &ProbeOutcome) -> Option<&'static str> {
    match outcome {
        ProbeOutcome::Ok => None,
        ProbeOutcome::AuthError => {
            Some("The server rejected the shared secret; update it in settings to match the proxy.")
        }
        ProbeOutcome::HttpError(404) => {
            Some("Nothing answers on the expected path; is the proxy running at this URL?")
        }
        ProbeOutcome::HttpError(_) => {
            Some("The server is reachable but failing; check the proxy logs.")
        }
        ProbeOutcome::NetworkError(NetworkReason::MixedContentBlocked) => Some(
            "This page is secure but the server URL is plain HTTP; allow insecure content for this site, or serve the proxy over HTTPS.",
        ),
        ProbeOutcome::NetworkError(NetworkReason::Timeout) => Some(
            "The server did not answer in time; is it running, and are both devices on the same network?",
        ),
        ProbeOutcome::NetworkError(NetworkReason::Unreachable(_)) => Some(
            "Cannot reach the server; check the URL, that the proxy is started, and that no firewall blocks the port.",
        ),
    }
}

/// Run both probes against the configured server.
pub async fn run_diagnostics(
    client: &reqwest::Client,
    settings: &Settings,
    context: TransportContext,
    timeout: Duration,
) -> DiagnosticsReport {
    let liveness = probe(
        client,
        &settings.server_url,
        &settings.api_key,
        LIVENESS_PATH,
        timeout,
        context,
    )
    .await;
    let models = probe_models(
        client,
        &settings.server_url,
        &settings.api_key,
        timeout,
        context,
    )
    .await;
    DiagnosticsReport { liveness, models }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(liveness: ProbeOutcome, models: Result<Vec<ModelInfo>, ModelProbeError>) -> DiagnosticsReport {
        DiagnosticsReport { liveness, models }
    }

    #[test]
    fn healthy_report_has_no_remediation() {
        let report = report(ProbeOutcome::Ok, Ok(vec![]));
        assert!(report.healthy());
        assert_eq!(report.remediation(), None);
    }

    #[test]
    fn liveness_failures_dominate() {
        let report = report(
            ProbeOutcome::AuthError,
            Err(ModelProbeError::Connectivity(ProbeOutcome::AuthError)),
        );
        assert!(!report.healthy());
        assert!(report.remediation().unwrap().contains("shared secret"));
    }

    #[test]
    fn mixed_content_gets_site_permission_guidance() {
        let report = report(
            ProbeOutcome::NetworkError(NetworkReason::MixedContentBlocked),
            Err(ModelProbeError::Connectivity(ProbeOutcome::NetworkError(
                NetworkReason::MixedContentBlocked,
            ))),
        );
        assert!(report.remediation().unwrap().contains("insecure content"));
    }

    #[test]
    fn bad_model_list_body_is_called_out_separately() {
        let report = report(
            ProbeOutcome::Ok,
            Err(ModelProbeError::Decode("expected value".into())),
        );
        assert!(!report.healthy());
        assert!(report.remediation().unwrap().contains("model list"));
    }

    #[test]
    fn endpoint_not_found_hints_at_a_stopped_proxy() {
        let report = report(ProbeOutcome::HttpError(404), Ok(vec![]));
        assert!(report.remediation().unwrap().contains("running"));
    }
}
