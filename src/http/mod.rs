use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument};

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP request failed: {0}")]
    Status(StatusCode),

    #[error("HTTP request timed out")]
    Timeout,

    #[error("HTTP transport error: {0}")]
    Transport(reqwest::Error),

    #[error("Failed to decode response body: {0}")]
    Decode(reqwest::Error),
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout
        } else if e.is_decode() {
            HttpError::Decode(e)
        } else {
            HttpError::Transport(e)
        }
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("calendarr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client })
    }

    /// GET `url` with `query` parameters and decode the JSON body.
    #[instrument(skip(self, query), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        debug!("Making GET request");
        let response = self.client.get(url).query(query).send().await?;

        if !response.status().is_success() {
            error!("HTTP request failed with status: {}", response.status());
            return Err(HttpError::Status(response.status()));
        }

        let json = response.json::<T>().await?;
        Ok(json)
    }
}
