//! Core library for the Visor remote-build client.
//!
//! Everything needed to turn a Visorfile into an uploadable build context
//! lives here: directive parsing, context discovery, content-defined
//! chunking, the serialized file-map representation, and the host-wide
//! admission lock that bounds peak chunking memory. The `visor` binary
//! layers the CLI and network calls on top.

pub mod chunker;
pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod filemap;
pub mod logging;
pub mod manifest;
pub mod protocol;
pub mod vcs;

pub use chunker::chunk;
pub use config::ClientConfig;
pub use context::{BuildContext, discover};
pub use errors::ContextError;
pub use executor::run_bounded;
pub use filemap::{ChunkStore, FileNode};
pub use logging::{LogConfig, init_logging};
pub use manifest::{Directive, ManifestCommand, parse_manifest};
