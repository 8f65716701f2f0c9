//! Container and image management commands — thin wrappers over single API
//! calls, plus the nested-ssh hop into a running container.

use crate::stream::{self, StreamOutcome};
use anyhow::Result;
use visor_core::ClientConfig;
use visor_core::protocol::{
    ContainerIdRequest, ContainerIdResponse, ImageIdRequest, ImageIdResponse, ImagesResponse,
    PsResponse, RunRequest, ThrottleRequest, WipeRequest,
};

pub async fn ps(config: &ClientConfig, quiet: bool) -> Result<()> {
    let api = super::client(config)?;
    let response: PsResponse = api.get_json("ps").await?;

    if quiet {
        for container in response.containers {
            println!("{}", container.id);
        }
        return Ok(());
    }

    println!(
        "{:<35}{:<15}{:<15}{:<10}{:<15}",
        "CONTAINER ID", "MACHINE ID", "NETWORK ID", "STATUS", "STARTED"
    );
    for c in response.containers {
        println!(
            "{:<35}{:<15}{:<15}{:<10}{:<15}",
            c.id, c.machine_id, c.network_id, c.status, c.birth
        );
    }
    Ok(())
}

pub async fn run(config: &ClientConfig, image_id: &str) -> Result<()> {
    let api = super::client(config)?;
    // Booting a VM can take a while; give this call a longer leash.
    let response: ContainerIdResponse = api
        .post_json_with_timeout(
            "run",
            &RunRequest { image_id },
            Some(std::time::Duration::from_secs(600)),
        )
        .await?;
    println!("{}", response.container_id);
    Ok(())
}

pub async fn pause(config: &ClientConfig, container_id: &str) -> Result<()> {
    let api = super::client(config)?;
    let response: ContainerIdResponse = api
        .post_json("pause", &ContainerIdRequest { container_id })
        .await?;
    println!("{}", response.container_id);
    Ok(())
}

pub async fn unpause(config: &ClientConfig, container_id: &str) -> Result<()> {
    let api = super::client(config)?;
    let response: ContainerIdResponse = api
        .post_json("unpause", &ContainerIdRequest { container_id })
        .await?;
    println!("{}", response.container_id);
    Ok(())
}

pub async fn rm(config: &ClientConfig, container_id: &str) -> Result<()> {
    let api = super::client(config)?;
    let response: ContainerIdResponse = api
        .post_json("rm", &ContainerIdRequest { container_id })
        .await?;
    println!("{}", response.container_id);
    Ok(())
}

pub async fn images(config: &ClientConfig) -> Result<()> {
    let api = super::client(config)?;
    let response: ImagesResponse = api.get_json("images").await?;
    for image in response.images {
        println!("{image}");
    }
    Ok(())
}

pub async fn rmi(config: &ClientConfig, image_id: &str) -> Result<()> {
    let api = super::client(config)?;
    let response: ImageIdResponse = api
        .post_json("rmi", &ImageIdRequest { image_id })
        .await?;
    println!("{}", response.image_id);
    Ok(())
}

pub async fn throttle(
    config: &ClientConfig,
    container_id: &str,
    disk_bps: Option<u64>,
    disk_iops: Option<u64>,
) -> Result<()> {
    let api = super::client(config)?;
    let _: serde_json::Value = api
        .post_json(
            "throttle",
            &ThrottleRequest {
                container_id,
                disk_bps,
                disk_iops,
            },
        )
        .await?;
    Ok(())
}

pub async fn wipe(config: &ClientConfig, include_bases: bool) -> Result<StreamOutcome> {
    let api = super::client(config)?;
    let response = api.post_stream("wipe", &WipeRequest { include_bases }).await?;
    stream::consume(response).await
}

/// SSH into a running container: the outer hop lands on the server host with
/// the key stored at login, the inner hop (built server-side) reaches the
/// guest. Replaces the current process on success.
#[cfg(unix)]
pub async fn ssh(config: &ClientConfig, container_id: &str, cmd: Option<&str>) -> Result<()> {
    use crate::api::ApiClient;
    use anyhow::anyhow;
    use std::io::Write;
    use std::os::unix::process::CommandExt;
    use visor_core::protocol::GuestSshArgs;

    let (url, auth) = config.logged_in_server(None)?;
    let api = ApiClient::new(&url)?;
    let guest: GuestSshArgs = api
        .get_json_with_body("guest_ssh_args", &ContainerIdRequest { container_id })
        .await?;

    let mut key_file = tempfile::NamedTempFile::new()?;
    key_file.write_all(auth.ssh_key.as_bytes())?;
    key_file.flush()?;

    let remote_cmd = cmd
        .map(|c| shell_escape::escape(c.into()).into_owned())
        .unwrap_or_default();
    let inner = format!(
        "ssh -t -p {} -i {} -o \"StrictHostKeyChecking no\" {}@localhost {}",
        guest.port, guest.key_file, guest.username, remote_cmd
    );

    let err = std::process::Command::new("ssh")
        .arg("-t")
        .arg("-p")
        .arg(auth.ssh_port.to_string())
        .arg("-i")
        .arg(key_file.path())
        .arg("-o")
        .arg("StrictHostKeyChecking no")
        .arg(format!("{}@{}", auth.ssh_username, auth.ssh_host))
        .arg(inner)
        .exec();
    // exec only returns on failure.
    Err(anyhow!("failed to exec ssh: {err}"))
}

#[cfg(not(unix))]
pub async fn ssh(_config: &ClientConfig, _container_id: &str, _cmd: Option<&str>) -> Result<()> {
    anyhow::bail!("ssh is only supported on unix hosts")
}
