/// Azure Blob Storage sink
///
/// Talks to the Blob REST API directly, authorised with a SAS token. The whole
/// document is uploaded with a single Put Blob call, which is atomic.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};

use crate::error::SinkError;
use crate::storage::BlobSink;

/// Blob service REST version sent with every request
pub const API_VERSION: &str = "2021-08-06";

#[derive(Clone)]
pub struct AzureBlobConfig {
    /// e.g. `https://myaccount.blob.core.windows.net`
    pub account_url: String,
    /// SAS query string, with or without the leading `?`
    pub sas_token: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for AzureBlobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobConfig")
            .field("account_url", &self.account_url)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct AzureBlobSink {
    http: reqwest::Client,
    account_url: Url,
    sas_token: Option<String>,
}

impl AzureBlobSink {
    pub fn new(config: AzureBlobConfig) -> Result<Self, SinkError> {
        let raw = if config.account_url.ends_with('/') {
            config.account_url.clone()
        } else {
            format!("{}/", config.account_url)
        };
        let account_url = Url::parse(&raw)
            .map_err(|e| SinkError::InvalidUrl(format!("{}: {}", config.account_url, e)))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| SinkError::Transport {
                url: config.account_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            account_url,
            sas_token: config
                .sas_token
                .map(|t| t.trim_start_matches('?').to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    /// Build a request URL, with `params` ahead of the SAS query
    fn url_for(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, SinkError> {
        let mut url = self
            .account_url
            .join(path)
            .map_err(|e| SinkError::InvalidUrl(format!("{}: {}", path, e)))?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        if let Some(sas) = &self.sas_token {
            query.push(sas.clone());
        }
        if !query.is_empty() {
            url.set_query(Some(&query.join("&")));
        }

        Ok(url)
    }

    /// URL without the SAS signature, safe to log
    fn display_url(url: &Url) -> String {
        let mut clean = url.clone();
        clean.set_query(None);
        clean.to_string()
    }
}

#[async_trait]
impl BlobSink for AzureBlobSink {
    async fn ensure_container(&self, container: &str) -> Result<(), SinkError> {
        let url = self.url_for(container, &[("restype", "container")])?;
        let shown = Self::display_url(&url);

        let response = self
            .http
            .put(url)
            .header("x-ms-version", API_VERSION)
            .body(Vec::<u8>::new())
            .send()
            .await
            .map_err(|source| SinkError::Transport {
                url: shown.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::CREATED => {
                tracing::info!("Created container {}", container);
                Ok(())
            }
            StatusCode::CONFLICT => {
                tracing::debug!("Container {} already exists", container);
                Ok(())
            }
            status => Err(SinkError::Status {
                url: shown,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn commit(
        &self,
        container: &str,
        blob_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, SinkError> {
        let url = self.url_for(&format!("{}/{}", container, blob_name), &[])?;
        let shown = Self::display_url(&url);

        let response = self
            .http
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header("If-None-Match", "*")
            .header(CONTENT_TYPE, "text/csv")
            .body(bytes)
            .send()
            .await
            .map_err(|source| SinkError::Transport {
                url: shown.clone(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(shown),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(SinkError::AlreadyExists(format!("{}/{}", container, blob_name)))
            }
            status => Err(SinkError::Status {
                url: shown,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("azure blob storage at {}", self.account_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(sas: Option<&str>) -> AzureBlobSink {
        AzureBlobSink::new(AzureBlobConfig {
            account_url: "https://acct.blob.core.windows.net".to_string(),
            sas_token: sas.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_container_url_with_sas() {
        let url = sink(Some("?sv=2021&sig=abc"))
            .url_for("merged-patients", &[("restype", "container")])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/merged-patients?restype=container&sv=2021&sig=abc"
        );
    }

    #[test]
    fn test_blob_url_without_sas() {
        let url = sink(None)
            .url_for("merged-patients/merged_patients_20240101_000000.csv", &[])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/merged-patients/merged_patients_20240101_000000.csv"
        );
    }

    #[test]
    fn test_display_url_hides_signature() {
        let url = sink(Some("sv=2021&sig=secret")).url_for("c1c", &[]).unwrap();

        let shown = AzureBlobSink::display_url(&url);
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_empty_sas_ignored() {
        let url = sink(Some("?")).url_for("abc", &[]).unwrap();
        assert_eq!(url.query(), None);
    }
}
