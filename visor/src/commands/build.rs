//! `visor build`, `visor multirun`, and `visor log` — the streamed build
//! commands plus multirun log retrieval.

use crate::api::ApiClient;
use crate::stream::{self, StreamOutcome};
use crate::upload;
use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::path::Path;
use visor_core::ClientConfig;
use visor_core::protocol::{BuildRequest, MultirunRequest, SnapshotRule};

/// Split repeated `KEY=VALUE` arguments on the first `=`. Values are passed
/// through opaquely.
pub fn parse_buildenvs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("invalid --build-env {pair:?}: expected KEY=VALUE"))
        })
        .collect()
}

/// Group the flattened `--snapshot-on-failure` triples back into rules,
/// parsing the rate field.
pub fn parse_snapshot_rules(flat: &[String]) -> Result<Vec<SnapshotRule>> {
    flat.chunks(3)
        .map(|triple| match triple {
            [failure, minutes, note] => {
                let minutes: u32 = minutes.parse().map_err(|_| {
                    anyhow!("invalid --snapshot-on-failure rate {minutes:?}: expected minutes")
                })?;
                Ok(SnapshotRule(failure.clone(), minutes, note.clone()))
            }
            other => Err(anyhow!(
                "--snapshot-on-failure takes 3 arguments, got {}",
                other.len()
            )),
        })
        .collect()
}

async fn transmit(
    config: &ClientConfig,
    visorfile: &Path,
) -> Result<(ApiClient, visor_core::BuildContext, visor_core::FileNode)> {
    // Streaming commands require login material to exist, like the original
    // client, even though the build endpoints authenticate by other means.
    let (url, _auth) = config.logged_in_server(None)?;
    let api = ApiClient::new(&url)?;

    println!("Sending build context...");
    let (context, filemap) = upload::transmit_context(&api, visorfile).await?;
    println!("Done sending build context\n");
    Ok((api, context, filemap))
}

pub async fn build(
    config: &ClientConfig,
    visorfile: &Path,
    keep_running: bool,
    snapshot_on_failure: &[String],
    buildenvs: &[String],
) -> Result<StreamOutcome> {
    let snapshot_rules = parse_snapshot_rules(snapshot_on_failure)?;
    let buildenvs = parse_buildenvs(buildenvs)?;
    let (api, context, filemap) = transmit(config, visorfile).await?;

    let request = BuildRequest {
        visorfile_relpath: context.manifest_relpath.display().to_string(),
        buildenvs: &buildenvs,
        keep_running,
        snapshot_on_failure: &snapshot_rules,
        filemap: &filemap,
    };
    let response = api.post_stream("build", &request).await?;
    stream::consume(response).await
}

pub async fn multirun(
    config: &ClientConfig,
    visorfile: &Path,
    num_runs: u32,
    pass_string: &str,
    fail_string: &str,
    buildenvs: &[String],
) -> Result<StreamOutcome> {
    let buildenvs = parse_buildenvs(buildenvs)?;
    let (api, context, filemap) = transmit(config, visorfile).await?;

    let request = MultirunRequest {
        visorfile_relpath: context.manifest_relpath.display().to_string(),
        buildenvs: &buildenvs,
        num_runs,
        pass_string,
        fail_string,
        filemap: &filemap,
    };
    let response = api.post_stream("multirun", &request).await?;
    stream::consume(response).await
}

pub async fn log(config: &ClientConfig, multirun_id: &str, run_num: &str) -> Result<()> {
    let api = super::client(config)?;
    let text = api
        .get_text(&format!("result/{multirun_id}?run={run_num}"))
        .await?;
    print!("{text}");
    Ok(())
}
