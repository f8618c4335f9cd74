use google_cloud_auth::credentials::{self, Credentials};
use tracing::info;

use crate::error::GcpError;

/// Build GCP credentials from a service account JSON key file.
///
/// Returns `None` when no path is given so the client falls back to
/// Application Default Credentials.
///
/// # Errors
///
/// Returns [`GcpError::Credentials`] if the file cannot be read or the key
/// is invalid.
pub async fn build_gcp_credentials(
    credentials_file: Option<&str>,
) -> Result<Option<Credentials>, GcpError> {
    let Some(path) = credentials_file else {
        info!("using Application Default Credentials (ADC) for GCP");
        return Ok(None);
    };

    info!("loading GCP credentials from service account file");
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        GcpError::Credentials(format!("failed to read credentials file '{path}': {e}"))
    })?;

    service_account_from_json(&content).map(Some)
}

/// Parse a service account key and build credentials from it.
pub fn service_account_from_json(content: &str) -> Result<Credentials, GcpError> {
    let key_value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| GcpError::Credentials(format!("invalid credentials JSON: {e}")))?;

    credentials::service_account::Builder::new(key_value)
        .build()
        .map_err(|e| {
            GcpError::Credentials(format!("failed to build service account credentials: {e}"))
        })
}
