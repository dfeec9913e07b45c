//! Download of the CSV export from the forms API.

use std::time::Duration;

use log::{debug, info};
use reqwest::{Client, header};

use crate::{config::ApiConfig, error::FetchError, io_utils};

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub fn build_client(timeout: Duration) -> Result<Client, FetchError> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Issues one authenticated GET for the export and returns the body text.
///
/// Any non-2xx response is returned as [`FetchError::Status`] carrying the
/// status code and the response body. There is no retry.
pub async fn fetch_export(client: &Client, api: &ApiConfig) -> Result<String, FetchError> {
    debug!("Requesting export from {}", api.export_url);
    let response = client
        .get(&api.export_url)
        .basic_auth(&api.username, Some(&api.password))
        .header(header::ACCEPT, "text/csv, text/plain;q=0.9, */*;q=0.5")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Status { status, body });
    }

    let bytes = response.bytes().await?;
    let text = io_utils::decode_export(&bytes, None).map_err(|e| FetchError::Decode(e.to_string()))?;
    info!(
        "Fetched export ({} byte(s)) from {}",
        bytes.len(),
        api.export_url
    );
    Ok(text)
}
