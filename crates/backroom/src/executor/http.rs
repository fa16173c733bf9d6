//! Analyzer that posts documents to an endpoint's HTTP analysis service.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;

use crate::endpoint::Endpoint;
use crate::executor::analysis::{AnalysisError, Analyzer, ProgressHandle};
use crate::job::{AnalysisResult, DocumentRef};

/// Maximum length of a provider error body kept in a job's error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    document: &'a DocumentRef,
    regulation: &'a str,
    model: &'a str,
}

/// Calls `POST <base_url>/analyze` on the assigned endpoint.
#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
    client: Client,
}

impl HttpAnalyzer {
    pub fn new(request_timeout: Duration) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AnalysisError::Provider(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn analyze_url(endpoint: &Endpoint) -> Result<String, AnalysisError> {
        let base = endpoint
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AnalysisError::NotConfigured(endpoint.id.clone()))?;
        Ok(format!("{}/analyze", base.trim_end_matches('/')))
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(
        &self,
        document: &DocumentRef,
        regulation: &str,
        endpoint: &Endpoint,
        progress: ProgressHandle,
    ) -> Result<AnalysisResult, AnalysisError> {
        let url = Self::analyze_url(endpoint)?;
        debug!("Posting {} to {} for job {}", document.name, url, progress.job_id());
        progress.report(10);

        let response = self
            .client
            .post(&url)
            .json(&AnalyzeRequest {
                document,
                regulation,
                model: &endpoint.model,
            })
            .send()
            .await
            .map_err(|e| AnalysisError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Endpoint {} answered {}", endpoint.id, status);
            return Err(AnalysisError::Provider(format!(
                "HTTP {}: {}",
                status,
                truncate_body(&body)
            )));
        }
        progress.report(90);

        let result: AnalysisResult = response
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;
        if !(0.0..=100.0).contains(&result.confidence)
            || !(0.0..=100.0).contains(&result.quality_score)
        {
            return Err(AnalysisError::InvalidResponse(
                "confidence and qualityScore must be within 0..=100".to_string(),
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base_url: Option<&str>) -> Endpoint {
        let mut endpoint = Endpoint::new("local", "Local", "Local", "on-premise");
        endpoint.base_url = base_url.map(str::to_string);
        endpoint
    }

    #[test]
    fn test_analyze_url() {
        let url = HttpAnalyzer::analyze_url(&endpoint(Some("http://localhost:8080/"))).unwrap();
        assert_eq!(url, "http://localhost:8080/analyze");
    }

    #[test]
    fn test_analyze_url_missing() {
        assert_eq!(
            HttpAnalyzer::analyze_url(&endpoint(None)),
            Err(AnalysisError::NotConfigured("local".to_string()))
        );
        assert!(HttpAnalyzer::analyze_url(&endpoint(Some("  "))).is_err());
    }

    #[tokio::test]
    async fn test_analyze_without_url_fails_fast() {
        let analyzer = HttpAnalyzer::new(Duration::from_secs(1)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let document = DocumentRef {
            name: "a.pdf".to_string(),
            size: 1,
            mime_type: "application/pdf".to_string(),
        };

        let result = analyzer
            .analyze(&document, "ISO 13485:2016", &endpoint(None), ProgressHandle::new("j", 1, tx))
            .await;

        assert!(matches!(result, Err(AnalysisError::NotConfigured(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(500);
        assert!(truncate_body(&long).ends_with("... (truncated)"));
        assert_eq!(truncate_body("short"), "short");
    }
}
