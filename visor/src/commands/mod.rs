//! Subcommand implementations.

pub mod build;
pub mod containers;
pub mod login;

use crate::api::ApiClient;
use anyhow::Result;
use visor_core::ClientConfig;

/// API client for the configured default server.
pub(crate) fn client(config: &ClientConfig) -> Result<ApiClient> {
    let url = config.server_url(None)?;
    Ok(ApiClient::new(&url)?)
}
