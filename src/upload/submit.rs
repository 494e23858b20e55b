use std::time::Duration;

use geojson::{FeatureCollection, GeoJson};
use serde::Deserialize;
use thiserror::Error;

use crate::collection::kind::CollectionKind;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("could not reach {url}: {source}")]
    Transport { url: String, source: reqwest::Error },
    #[error("{url} rejected the upload with status {status}")]
    Status { url: String, status: u16 },
}

/// Called from several threads at once during an upload cycle.
pub trait Submitter: Sync {
    fn submit(
        &self,
        kind: CollectionKind,
        collection: &FeatureCollection,
    ) -> Result<(), SubmissionError>;
}

fn default_user_agent() -> String {
    "gps-marker".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, Debug, Clone)]
pub struct UploadEndpoint {
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Posts collections as JSON to a fixed URL. Any 2xx status is a success.
pub struct HttpSubmitter {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpSubmitter {
    pub fn new(endpoint: &UploadEndpoint) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(endpoint.user_agent.as_str())
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()?;
        Ok(Self {
            url: endpoint.url.clone(),
            client,
        })
    }
}

impl Submitter for HttpSubmitter {
    fn submit(
        &self,
        kind: CollectionKind,
        collection: &FeatureCollection,
    ) -> Result<(), SubmissionError> {
        log::debug!(
            "Posting {} {} features to {}",
            collection.features.len(),
            kind,
            self.url
        );
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(GeoJson::from(collection.clone()).to_string())
            .send()
            .map_err(|source| SubmissionError::Transport {
                url: self.url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SubmissionError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
