//! Two-phase build-context transmission.
//!
//! Phase one posts the directory map and learns which chunk hashes the
//! server is missing; phase two uploads exactly those chunks in bounded,
//! sequential batches. Neither phase retries: chunking is deterministic and
//! the server treats re-uploaded chunks as no-ops, so a failed transmission
//! is simply re-run from the top.

use crate::api::{ApiClient, ApiError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use visor_core::errors::ContextError;
use visor_core::filemap::{ChunkStore, FileNode};
use visor_core::protocol::{TransmitChunksRequest, TransmitMetaRequest, TransmitMetaResponse};
use visor_core::{BuildContext, discover, run_bounded};

/// Upper bound on chunk hashes per upload request, keeping request payloads
/// at a size the server commits atomically.
pub const MAX_CHUNKS_PER_UPLOAD: usize = 1000;

/// A failed context transmission.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("context metadata transmission failed: {0}")]
    Meta(#[source] ApiError),
    #[error("chunk transmission failed: {0}")]
    Chunks(#[source] ApiError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Resolve, chunk, and upload the build context of `visorfile`.
///
/// Returns the resolved context and its directory map; the map is embedded
/// again in the subsequent build-trigger request so the server needs no
/// cross-request state.
pub async fn transmit_context(
    api: &ApiClient,
    visorfile: &Path,
) -> Result<(BuildContext, FileNode), TransmitError> {
    let visorfile = visorfile.to_path_buf();
    let (context, filemap, store) = tokio::task::spawn_blocking(
        move || -> Result<(BuildContext, FileNode, ChunkStore), ContextError> {
            let context = discover(&visorfile)?;
            let (filemap, store) = run_bounded(&context.root, &context.files)?;
            Ok((context, filemap, store))
        },
    )
    .await
    .map_err(|e| ContextError::WorkerExited(e.to_string()))??;

    let missing = api
        .post_json::<_, TransmitMetaResponse>("transmitmeta", &TransmitMetaRequest { filemap: &filemap })
        .await
        .map_err(TransmitError::Meta)?
        .missing;
    info!(
        files = context.files.len(),
        chunks = store.len(),
        missing = missing.len(),
        "context metadata accepted"
    );

    for batch in chunk_batches(&missing) {
        let chunks = encode_batch(batch, &store)?;
        let _: serde_json::Value = api
            .post_json("transmit", &TransmitChunksRequest { chunks })
            .await
            .map_err(TransmitError::Chunks)?;
        debug!(batch = batch.len(), "chunk batch uploaded");
    }

    Ok((context, filemap))
}

/// Partition the missing-hash list into upload batches, preserving server
/// order.
fn chunk_batches(missing: &[String]) -> std::slice::Chunks<'_, String> {
    missing.chunks(MAX_CHUNKS_PER_UPLOAD)
}

/// Base64-encode one batch out of the chunk store. A hash the server asked
/// for but the store does not hold indicates a bug in the chunking pass.
fn encode_batch(
    hashes: &[String],
    store: &ChunkStore,
) -> Result<BTreeMap<String, String>, ContextError> {
    hashes
        .iter()
        .map(|hash| match store.get(hash) {
            Some(bytes) => Ok((hash.clone(), STANDARD.encode(bytes))),
            None => Err(ContextError::IllegalState(format!(
                "server requested unknown chunk {hash}"
            ))),
        })
        .collect()
}
