//! Wire types for the Visor server API.
//!
//! Field names follow the server's JSON vocabulary (camelCase), so every
//! request/response struct here carries explicit serde renames rather than
//! relying on Rust field names surviving the trip.

use crate::filemap::FileNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `POST transmitmeta` — phase one of a context upload: the full directory
/// map, answered with the chunk hashes the server does not hold yet.
#[derive(Debug, Serialize)]
pub struct TransmitMetaRequest<'a> {
    pub filemap: &'a FileNode,
}

#[derive(Debug, Deserialize)]
pub struct TransmitMetaResponse {
    pub missing: Vec<String>,
}

/// `POST transmit` — phase two: one batch of missing chunks, base64-encoded,
/// keyed by hash.
#[derive(Debug, Serialize)]
pub struct TransmitChunksRequest {
    pub chunks: BTreeMap<String, String>,
}

/// `POST login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub ssh_port: u16,
    pub username: String,
    pub key: String,
}

/// One `--snapshot-on-failure` rule: failure-match string, minimum minutes
/// between snapshots, free-form note. Serialized as a 3-element array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRule(pub String, pub u32, pub String);

/// `POST build` — references the already-transmitted context by resending
/// its directory map, so the server holds no cross-request state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest<'a> {
    pub visorfile_relpath: String,
    pub buildenvs: &'a BTreeMap<String, String>,
    pub keep_running: bool,
    pub snapshot_on_failure: &'a [SnapshotRule],
    pub filemap: &'a FileNode,
}

/// `POST multirun`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultirunRequest<'a> {
    pub visorfile_relpath: String,
    pub buildenvs: &'a BTreeMap<String, String>,
    pub num_runs: u32,
    pub pass_string: &'a str,
    pub fail_string: &'a str,
    pub filemap: &'a FileNode,
}

/// `POST run`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest<'a> {
    pub image_id: &'a str,
}

/// Requests addressing a single container (`pause`, `unpause`, `rm`,
/// `guest_ssh_args`).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerIdRequest<'a> {
    pub container_id: &'a str,
}

/// Requests addressing a single image (`rmi`).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIdRequest<'a> {
    pub image_id: &'a str,
}

/// `POST throttle`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleRequest<'a> {
    pub container_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_bps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_iops: Option<u64>,
}

/// `POST wipe`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeRequest {
    pub include_bases: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerIdResponse {
    pub container_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIdResponse {
    pub image_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PsResponse {
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub id: String,
    pub machine_id: String,
    pub network_id: String,
    pub status: String,
    pub birth: String,
}

#[derive(Debug, Deserialize)]
pub struct ImagesResponse {
    pub images: Vec<String>,
}

/// `GET guest_ssh_args` — material for the inner hop of a nested ssh.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSshArgs {
    pub port: u16,
    pub key_file: String,
    pub username: String,
}
