//! Content-defined chunking of a discovered file set.
//!
//! Every regular file is split with FastCDC and each chunk is addressed by
//! its blake3 hex digest, so identical content collapses to one stored chunk
//! no matter how many files (or how many builds) share it. Chunk boundaries
//! depend only on file bytes, which makes the whole pass deterministic:
//! re-running it over unchanged input reproduces the same hash sequences and
//! the same store keys.

use crate::errors::ContextError;
use crate::filemap::{ChunkStore, FileNode};
use fastcdc::v2020::FastCDC;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Chunk boundary configuration, fixed for wire compatibility: changing any
/// of these re-addresses every chunk on the server.
pub const MIN_CHUNK_SIZE: u32 = 2 * 1024;
pub const AVG_CHUNK_SIZE: u32 = 16 * 1024;
pub const MAX_CHUNK_SIZE: u32 = 32 * 1024;

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o40755 } else { 0o100644 }
}

/// Build the directory map and chunk store for `files`, each resolved
/// relative to `root`.
///
/// Directories are never listed in the file set; they materialize implicitly
/// as ancestors of the entries beneath them, with mode bits read from the
/// filesystem. A file-set entry that turns out to be a directory indicates a
/// discovery bug and fails with [`ContextError::IllegalState`].
pub fn chunk(root: &Path, files: &BTreeSet<PathBuf>) -> Result<(FileNode, ChunkStore), ContextError> {
    let mut tree = FileNode::root();
    let mut store = ChunkStore::new();

    for rel in files {
        let abs = root.join(rel);
        let meta = std::fs::symlink_metadata(&abs).map_err(|e| ContextError::io(&abs, e))?;

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&abs).map_err(|e| ContextError::io(&abs, e))?;
            insert_node(
                &mut tree,
                root,
                rel,
                FileNode::Symlink {
                    target: target.to_string_lossy().into_owned(),
                },
            )?;
            continue;
        }

        if meta.is_dir() {
            return Err(ContextError::IllegalState(format!(
                "file set names a directory: {}",
                rel.display()
            )));
        }

        let data = std::fs::read(&abs).map_err(|e| ContextError::io(&abs, e))?;
        let mut chunks = Vec::new();
        for cut in FastCDC::new(&data, MIN_CHUNK_SIZE, AVG_CHUNK_SIZE, MAX_CHUNK_SIZE) {
            let bytes = &data[cut.offset..cut.offset + cut.length];
            let hash = blake3::hash(bytes).to_hex().to_string();
            store.insert(&hash, bytes);
            chunks.push(hash);
        }
        debug!(file = %rel.display(), chunks = chunks.len(), "chunked");
        insert_node(
            &mut tree,
            root,
            rel,
            FileNode::File {
                chunks,
                mode: mode_bits(&meta),
            },
        )?;
    }

    Ok((tree, store))
}

/// Place `node` at `rel` inside `tree`, creating ancestor directory nodes
/// with mode bits read from the filesystem under `root`.
fn insert_node(
    tree: &mut FileNode,
    root: &Path,
    rel: &Path,
    node: FileNode,
) -> Result<(), ContextError> {
    let mut segments: Vec<String> = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => segments.push(s.to_string_lossy().into_owned()),
            // Inherited manifests outside a marker-less context surface as
            // "../..." entries; the parent segment is a literal map key.
            Component::ParentDir => segments.push("..".to_string()),
            Component::CurDir => {}
            other => {
                return Err(ContextError::IllegalState(format!(
                    "unexpected component {other:?} in relative path {}",
                    rel.display()
                )));
            }
        }
    }
    let Some((leaf, ancestors)) = segments.split_last() else {
        return Err(ContextError::IllegalState(
            "empty relative path in file set".to_string(),
        ));
    };

    let mut cursor = tree;
    let mut fs_path = root.to_path_buf();
    for segment in ancestors {
        fs_path.push(segment);
        let FileNode::Dir { children, .. } = cursor else {
            return Err(ContextError::IllegalState(format!(
                "path {} crosses a non-directory entry",
                rel.display()
            )));
        };
        if !children.contains_key(segment) {
            let meta = std::fs::metadata(&fs_path).map_err(|e| ContextError::io(&fs_path, e))?;
            children.insert(
                segment.clone(),
                FileNode::Dir {
                    children: BTreeMap::new(),
                    mode: Some(mode_bits(&meta)),
                },
            );
        }
        cursor = children
            .get_mut(segment)
            .ok_or_else(|| ContextError::IllegalState("directory entry vanished".to_string()))?;
    }

    let FileNode::Dir { children, .. } = cursor else {
        return Err(ContextError::IllegalState(format!(
            "path {} crosses a non-directory entry",
            rel.display()
        )));
    };
    children.insert(leaf.clone(), node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fileset(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    /// Deterministic pseudo-random bytes so chunk boundaries are stable but
    /// non-trivial.
    fn patterned_bytes(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x9e37_79b9;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect()
    }

    fn lookup<'a>(tree: &'a FileNode, path: &[&str]) -> &'a FileNode {
        let mut cursor = tree;
        for segment in path {
            match cursor {
                FileNode::Dir { children, .. } => cursor = &children[*segment],
                other => panic!("expected directory at {segment}, got {other:?}"),
            }
        }
        cursor
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.bin"), patterned_bytes(100 * 1024)).unwrap();
        let files = fileset(&["data.bin"]);

        let (tree_a, store_a) = chunk(dir.path(), &files).unwrap();
        let (tree_b, store_b) = chunk(dir.path(), &files).unwrap();

        assert_eq!(tree_a, tree_b);
        let mut keys_a: Vec<_> = store_a.hashes().collect();
        let mut keys_b: Vec<_> = store_b.hashes().collect();
        keys_a.sort_unstable();
        keys_b.sort_unstable();
        assert_eq!(keys_a, keys_b);
    }

    #[test]
    fn test_identical_files_share_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let content = patterned_bytes(64 * 1024);
        fs::write(dir.path().join("a.bin"), &content).unwrap();
        fs::write(dir.path().join("b.bin"), &content).unwrap();

        let (tree, store) = chunk(dir.path(), &fileset(&["a.bin", "b.bin"])).unwrap();

        let FileNode::File { chunks: chunks_a, .. } = lookup(&tree, &["a.bin"]) else {
            panic!("a.bin should be a file node");
        };
        let FileNode::File { chunks: chunks_b, .. } = lookup(&tree, &["b.bin"]) else {
            panic!("b.bin should be a file node");
        };
        assert_eq!(chunks_a, chunks_b);
        // Both files reference the same stored chunks; the store holds each
        // hash exactly once.
        let unique: BTreeSet<_> = chunks_a.iter().collect();
        assert_eq!(store.len(), unique.len());
    }

    #[test]
    fn test_file_reconstructs_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let content = patterned_bytes(50 * 1024);
        fs::write(dir.path().join("app.py"), &content).unwrap();

        let (tree, store) = chunk(dir.path(), &fileset(&["app.py"])).unwrap();
        let FileNode::File { chunks, .. } = lookup(&tree, &["app.py"]) else {
            panic!("app.py should be a file node");
        };

        // ~3 chunks for 50 KiB at a 16 KiB average, every chunk bounded.
        assert!((2..=8).contains(&chunks.len()), "got {} chunks", chunks.len());
        let mut rebuilt = Vec::new();
        for hash in chunks {
            let bytes = store.get(hash).expect("chunk present in store");
            assert!(bytes.len() <= MAX_CHUNK_SIZE as usize);
            rebuilt.extend_from_slice(bytes);
        }
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty"), b"").unwrap();

        let (tree, store) = chunk(dir.path(), &fileset(&["empty"])).unwrap();
        let FileNode::File { chunks, .. } = lookup(&tree, &["empty"]) else {
            panic!("empty should be a file node");
        };
        assert!(chunks.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_ancestor_directories_materialize_with_modes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/mod.rs"), b"pub fn f() {}").unwrap();

        let (tree, _) = chunk(dir.path(), &fileset(&["src/nested/mod.rs"])).unwrap();

        let FileNode::Dir { mode, .. } = lookup(&tree, &["src"]) else {
            panic!("src should be a directory node");
        };
        assert!(mode.is_some());
        assert!(matches!(
            lookup(&tree, &["src", "nested", "mod.rs"]),
            FileNode::File { .. }
        ));
        // The root itself never carries mode bits.
        let FileNode::Dir { mode: root_mode, .. } = &tree else {
            panic!("root should be a directory node");
        };
        assert!(root_mode.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_records_literal_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("real.txt"), b"content").unwrap();
        std::os::unix::fs::symlink("../outside/real.txt", dir.path().join("link")).unwrap();

        let (tree, store) = chunk(dir.path(), &fileset(&["link"])).unwrap();
        match lookup(&tree, &["link"]) {
            FileNode::Symlink { target } => assert_eq!(target, "../outside/real.txt"),
            other => panic!("expected symlink node, got {other:?}"),
        }
        // The link is not read through.
        assert!(store.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_bits_recorded() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let (tree, _) = chunk(dir.path(), &fileset(&["run.sh"])).unwrap();
        let FileNode::File { mode, .. } = lookup(&tree, &["run.sh"]) else {
            panic!("run.sh should be a file node");
        };
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_directory_entry_is_illegal_state() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let err = chunk(dir.path(), &fileset(&["subdir"])).unwrap_err();
        assert!(matches!(err, ContextError::IllegalState(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = chunk(dir.path(), &fileset(&["ghost.txt"])).unwrap_err();
        assert!(matches!(err, ContextError::Io { .. }));
    }

    #[test]
    fn test_parent_relative_entries_use_literal_segments() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::create_dir_all(dir.path().join("base")).unwrap();
        fs::write(dir.path().join("base/Visorfile"), b"run true\n").unwrap();

        let root = dir.path().join("app");
        let (tree, _) = chunk(&root, &fileset(&["../base/Visorfile"])).unwrap();
        assert!(matches!(
            lookup(&tree, &["..", "base", "Visorfile"]),
            FileNode::File { .. }
        ));
    }
}
