//! `visor login` — authenticate against a server and store its connection
//! material.

use crate::api::ApiClient;
use anyhow::{Context, Result, bail};
use visor_core::ClientConfig;
use visor_core::config::ServerAuth;
use visor_core::protocol::{LoginRequest, LoginResponse};

pub async fn login(
    config: &mut ClientConfig,
    url: &str,
    username: &str,
    password: &str,
) -> Result<()> {
    if !url.starts_with("http") {
        bail!("url must start with http or https");
    }

    let api = ApiClient::new(url)?;
    let response: LoginResponse = api
        .post_json("login", &LoginRequest { username, password })
        .await?;

    let host = reqwest::Url::parse(url)
        .context("invalid server url")?
        .host_str()
        .context("server url has no host")?
        .to_string();

    config.record_login(
        url,
        ServerAuth {
            username: username.to_string(),
            ssh_host: host,
            ssh_port: response.ssh_port,
            ssh_username: response.username,
            ssh_key: response.key,
        },
    );
    config.save()?;
    println!("Logged into {url}");
    Ok(())
}
