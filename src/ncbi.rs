use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::datasets::SequenceSource;
use crate::error::ImportError;
use crate::retry::RetryPolicy;
use crate::sequence::SequenceRecord;

const PAGE_SIZE: &str = "1000";

#[derive(Debug, Deserialize)]
struct SequenceReportPage {
    #[serde(default)]
    reports: Vec<SequenceRecord>,
    #[serde(default, alias = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Sequence reports from the NCBI Datasets v2 REST API.
#[derive(Clone)]
pub struct NcbiHttpClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl NcbiHttpClient {
    pub fn new() -> Result<Self, ImportError> {
        Self::with_base_url("https://api.ncbi.nlm.nih.gov/datasets/v2")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, ImportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gh-assemblies/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ImportError::NcbiHttp(err.to_string()))?,
        );
        headers.insert("X-Datasets-Client", HeaderValue::from_static("gh-assemblies"));
        headers.insert(
            "X-Datasets-Client-Version",
            HeaderValue::from_str(env!("CARGO_PKG_VERSION"))
                .map_err(|err| ImportError::NcbiHttp(err.to_string()))?,
        );

        if let Ok(api_key) = std::env::var("NCBI_API_KEY") {
            if !api_key.trim().is_empty() {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(api_key.trim())
                        .map_err(|err| ImportError::NcbiHttp(err.to_string()))?,
                );
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| ImportError::NcbiHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::linear(3, Duration::from_millis(200)),
        })
    }

    pub fn sequence_reports_url(&self, accession: &str) -> String {
        format!(
            "{}/genome/accession/{}/sequence_reports",
            self.base_url, accession
        )
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, reqwest::Error>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let response = make_req().send();
            let retry = match &response {
                Ok(resp) => is_retryable_status(resp.status().as_u16()),
                Err(err) => err.is_connect(),
            };
            if !retry || attempt >= self.retry.retries {
                return response;
            }
            thread::sleep(self.retry.delay_for(attempt));
            attempt += 1;
        }
    }
}

impl SequenceSource for NcbiHttpClient {
    fn sequence_report(
        &self,
        accession: &str,
        timeout: Duration,
    ) -> Result<Vec<SequenceRecord>, ImportError> {
        let url = self.sequence_reports_url(accession);
        let to_error = |err: reqwest::Error| {
            if err.is_timeout() {
                ImportError::SequenceTimeout {
                    accession: accession.to_string(),
                    seconds: timeout.as_secs(),
                }
            } else {
                ImportError::NcbiHttp(err.to_string())
            }
        };

        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let response = self
                .send_with_retries(|| {
                    let mut request = self
                        .client
                        .get(&url)
                        .timeout(timeout)
                        .query(&[("page_size", PAGE_SIZE)]);
                    if let Some(token) = &page_token {
                        request = request.query(&[("page_token", token.as_str())]);
                    }
                    request
                })
                .map_err(to_error)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let message = response
                    .text()
                    .unwrap_or_else(|_| "NCBI request failed".to_string());
                return Err(ImportError::NcbiStatus { status, message });
            }

            let page: SequenceReportPage = response.json().map_err(|err| {
                if err.is_timeout() {
                    to_error(err)
                } else {
                    ImportError::SequenceParse {
                        accession: accession.to_string(),
                        message: err.to_string(),
                    }
                }
            })?;
            records.extend(page.reports);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(records)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
