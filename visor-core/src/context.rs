//! Build-context discovery.
//!
//! Starting from an entry Visorfile, walks the `inherit` chain and every
//! `copy` / `repeatable script` source to determine exactly which files are
//! in scope, validates that copy references stay inside the context root,
//! and filters out VCS-ignored paths. The result is a set of root-relative
//! paths ready for chunking.

use crate::errors::ContextError;
use crate::manifest::{DEFAULT_MANIFEST_NAME, Directive, parse_manifest};
use crate::vcs;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Upper bound on the number of manifests in an inherit chain. A chain that
/// would exceed this is reported as an error rather than truncated; cycles
/// hit the same bound.
pub const MAX_INHERIT_CHAIN: usize = 10;

/// A resolved build context: the root directory, the root-relative file set
/// to transmit, and the entry manifest's root-relative path.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub root: PathBuf,
    pub files: BTreeSet<PathBuf>,
    pub manifest_relpath: PathBuf,
}

/// Resolve the file scope of `entry_manifest`.
///
/// A directory argument is resolved to the `Visorfile` inside it. The
/// context root is the nearest ancestor carrying a `.git` marker, falling
/// back to the manifest's own directory when no marker exists.
pub fn discover(entry_manifest: &Path) -> Result<BuildContext, ContextError> {
    let mut entry = absolutize(entry_manifest)?;
    if entry.is_dir() {
        entry.push(DEFAULT_MANIFEST_NAME);
    }
    let root = find_context_root(&entry);
    debug!(root = %root.display(), entry = %entry.display(), "resolving build context");

    // Inherit targets are kept unnormalized here: containment for them is a
    // literal prefix check, so a `../sibling` chain inside a marker-less
    // tree survives and later relativizes to a `../` entry.
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();
    let mut manifests: BTreeSet<PathBuf> = BTreeSet::new();
    files.insert(entry.clone());
    manifests.insert(entry.clone());

    let mut current = entry.clone();
    let mut processed = 0usize;
    loop {
        processed += 1;
        let manifest_dir = current.parent().map(Path::to_path_buf).ok_or_else(|| {
            ContextError::IllegalState(format!(
                "manifest {} has no parent directory",
                current.display()
            ))
        })?;
        let text =
            std::fs::read_to_string(&current).map_err(|e| ContextError::io(&current, e))?;
        let commands = parse_manifest(&text, &current)?;

        let mut next: Option<PathBuf> = None;
        for command in &commands {
            match &command.directive {
                Directive::Inherit(value) => {
                    // Values with a leading separator would be registry-style
                    // references; the directive format only links local
                    // relative paths.
                    if value.is_empty() || value.starts_with('/') {
                        continue;
                    }
                    let mut target = manifest_dir.join(value);
                    if target.is_dir() {
                        target.push(DEFAULT_MANIFEST_NAME);
                    }
                    if !target.starts_with(&root) {
                        return Err(ContextError::IllegalPath {
                            path: normalize(&target),
                            root: root.clone(),
                        });
                    }
                    files.insert(target.clone());
                    manifests.insert(normalize(&target));
                    next = Some(target);
                }
                Directive::Copy(value) => {
                    let tokens: Vec<&str> = value.split_whitespace().collect();
                    // Everything but the trailing destination is a host
                    // source.
                    if tokens.len() < 2 {
                        continue;
                    }
                    for source in &tokens[..tokens.len() - 1] {
                        let resolved = resolve_source(&root, &manifest_dir, source);
                        add_source(&root, &mut files, &resolved)?;
                    }
                }
                Directive::Repeatable(value) => {
                    let tokens: Vec<&str> = value.split_whitespace().collect();
                    if tokens.len() == 3 && tokens[0].eq_ignore_ascii_case("script") {
                        let resolved = resolve_source(&root, &manifest_dir, tokens[2]);
                        add_source(&root, &mut files, &resolved)?;
                    }
                }
                Directive::Other { .. } => {}
            }
        }

        match next {
            None => break,
            Some(target) => {
                if processed >= MAX_INHERIT_CHAIN {
                    return Err(ContextError::ChainTooLong {
                        limit: MAX_INHERIT_CHAIN,
                    });
                }
                current = target;
            }
        }
    }

    let mut normalized: BTreeSet<PathBuf> = files.iter().map(|p| normalize(p)).collect();

    if root.join(".git").exists() {
        let ignored = vcs::list_ignored(&root)?;
        // Ignore wins over explicit copy; manifests are always retained.
        normalized.retain(|p| manifests.contains(p) || !ignored.contains(&relative_to(p, &root)));
    }

    let file_count = normalized.len();
    let files = normalized.iter().map(|p| relative_to(p, &root)).collect();
    let manifest_relpath = relative_to(&entry, &root);
    debug!(files = file_count, "build context resolved");

    Ok(BuildContext {
        root,
        files,
        manifest_relpath,
    })
}

/// Resolve one copy/repeatable source string: a leading separator anchors it
/// at the context root, anything else is relative to the manifest's
/// directory.
fn resolve_source(root: &Path, manifest_dir: &Path, source: &str) -> PathBuf {
    match source.strip_prefix('/') {
        Some(stripped) => root.join(stripped.trim_start_matches('/')),
        None => manifest_dir.join(source),
    }
}

/// Add a source to the file set: files and symlinks become entries,
/// directories expand recursively. Symlinks are leaf entries at any level
/// and are never followed.
fn add_source(
    root: &Path,
    files: &mut BTreeSet<PathBuf>,
    path: &Path,
) -> Result<(), ContextError> {
    let path = normalize(path);
    match std::fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            ensure_contained(&path, root)?;
            files.insert(path);
        }
        Ok(meta) if meta.is_dir() => {
            for entry in std::fs::read_dir(&path).map_err(|e| ContextError::io(&path, e))? {
                let entry = entry.map_err(|e| ContextError::io(&path, e))?;
                add_source(root, files, &entry.path())?;
            }
        }
        // Regular file, or a reference that does not exist yet; containment
        // is enforced either way and a dangling reference surfaces at chunk
        // time.
        _ => {
            ensure_contained(&path, root)?;
            files.insert(path);
        }
    }
    Ok(())
}

fn ensure_contained(path: &Path, root: &Path) -> Result<(), ContextError> {
    if path.starts_with(root) {
        Ok(())
    } else {
        Err(ContextError::IllegalPath {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

/// Nearest ancestor of the entry manifest containing a `.git` marker, or the
/// manifest's own directory when none exists up to the filesystem root.
fn find_context_root(entry: &Path) -> PathBuf {
    let fallback = entry
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let mut current = fallback.clone();
    loop {
        if current.join(".git").exists() {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return fallback,
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, ContextError> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| ContextError::io(path, e))?
            .join(path)
    };
    Ok(normalize(&abs))
}

/// Lexical path normalization: drops `.`, resolves `..` against preceding
/// segments without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(prefix) => result.push(prefix.as_os_str()),
            Component::RootDir => result.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                // "/.." collapses to "/".
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(".."),
            },
            Component::Normal(segment) => result.push(segment),
        }
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Lexical relative path from `base` to `path`; both must already be
/// normalized and absolute. Escapes surface as leading `..` segments.
pub(crate) fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_comps: Vec<Component<'_>> = path.components().collect();
    let base_comps: Vec<Component<'_>> = base.components().collect();
    let mut shared = 0;
    while shared < path_comps.len()
        && shared < base_comps.len()
        && path_comps[shared] == base_comps[shared]
    {
        shared += 1;
    }
    let mut rel = PathBuf::new();
    for _ in shared..base_comps.len() {
        rel.push("..");
    }
    for comp in &path_comps[shared..] {
        rel.push(comp.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    /// Create a real repository so the marker is valid when the ignore
    /// filter consults git. Returns false when git is unavailable.
    fn init_repo(dir: &Path) -> bool {
        std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn rel_set(context: &BuildContext) -> BTreeSet<String> {
        context
            .files
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/a/./b/")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize(Path::new(".")), PathBuf::from("."));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Path::new("/a/b/c"), Path::new("/a")),
            PathBuf::from("b/c")
        );
        assert_eq!(
            relative_to(Path::new("/a/x/f"), Path::new("/a/b")),
            PathBuf::from("../x/f")
        );
        assert_eq!(
            relative_to(Path::new("/a/b"), Path::new("/a/b")),
            PathBuf::from(".")
        );
    }

    #[test]
    fn test_entry_manifest_always_included() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("Visorfile"), "run make\n");

        let context = discover(&dir.path().join("Visorfile")).unwrap();
        assert!(rel_set(&context).contains("Visorfile"));
        assert_eq!(context.manifest_relpath, PathBuf::from("Visorfile"));
    }

    #[test]
    fn test_directory_entry_resolves_to_visorfile() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("Visorfile"), "run make\n");

        let context = discover(dir.path()).unwrap();
        assert_eq!(context.manifest_relpath, PathBuf::from("Visorfile"));
    }

    #[test]
    fn test_context_root_is_git_marker_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        if !init_repo(dir.path()) {
            eprintln!("git not available; skipping");
            return;
        }
        write(&dir.path().join("services/api/Visorfile"), "run make\n");

        let context = discover(&dir.path().join("services/api/Visorfile")).unwrap();
        assert_eq!(context.root, normalize(dir.path()));
        assert_eq!(
            context.manifest_relpath,
            PathBuf::from("services/api/Visorfile")
        );
    }

    #[test]
    fn test_copy_adds_file_relative_to_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("Visorfile"), "copy app.py /app/\n");
        write(&dir.path().join("app.py"), "print('hi')\n");

        let context = discover(&dir.path().join("Visorfile")).unwrap();
        let files = rel_set(&context);
        assert!(files.contains("app.py"));
        // The destination never enters the file set.
        assert!(!files.iter().any(|f| f.starts_with("app/")));
    }

    #[test]
    fn test_copy_with_leading_separator_resolves_from_root() {
        let dir = tempfile::tempdir().unwrap();
        if !init_repo(dir.path()) {
            eprintln!("git not available; skipping");
            return;
        }
        write(&dir.path().join("sub/Visorfile"), "copy /shared/lib.py /app/\n");
        write(&dir.path().join("shared/lib.py"), "x = 1\n");

        let context = discover(&dir.path().join("sub/Visorfile")).unwrap();
        assert!(rel_set(&context).contains("shared/lib.py"));
    }

    #[test]
    fn test_copy_directory_expands_to_descendants() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("Visorfile"), "copy vendor /app/\n");
        write(&dir.path().join("vendor/a.py"), "a\n");
        write(&dir.path().join("vendor/deep/b.py"), "b\n");

        let context = discover(&dir.path().join("Visorfile")).unwrap();
        let files = rel_set(&context);
        assert!(files.contains("vendor/a.py"));
        assert!(files.contains("vendor/deep/b.py"));
        // Directories themselves are implicit.
        assert!(!files.contains("vendor"));
        assert!(!files.contains("vendor/deep"));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_records_symlinks_as_leaves() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("Visorfile"), "copy tree /app/\n");
        write(&dir.path().join("tree/real.txt"), "data\n");
        std::os::unix::fs::symlink("real.txt", dir.path().join("tree/alias")).unwrap();
        std::os::unix::fs::symlink("..", dir.path().join("tree/loop")).unwrap();

        let context = discover(&dir.path().join("Visorfile")).unwrap();
        let files = rel_set(&context);
        assert!(files.contains("tree/real.txt"));
        assert!(files.contains("tree/alias"));
        // The directory symlink is a leaf, not an expansion point.
        assert!(files.contains("tree/loop"));
        assert!(!files.iter().any(|f| f.starts_with("tree/loop/")));
    }

    #[test]
    fn test_copy_escaping_root_is_illegal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("Visorfile"),
            "copy ../../outside.txt /app/\n",
        );

        let err = discover(&dir.path().join("Visorfile")).unwrap_err();
        assert!(matches!(err, ContextError::IllegalPath { .. }));
    }

    #[test]
    fn test_inherit_follows_chain_and_keeps_manifests() {
        let dir = tempfile::tempdir().unwrap();
        if !init_repo(dir.path()) {
            eprintln!("git not available; skipping");
            return;
        }
        write(
            &dir.path().join("app/Visorfile"),
            "inherit ../base\ncopy app.py /app/\n",
        );
        write(&dir.path().join("app/app.py"), "print('hi')\n");
        write(&dir.path().join("base/Visorfile"), "copy setup.sh /\n");
        write(&dir.path().join("base/setup.sh"), "#!/bin/sh\n");

        let context = discover(&dir.path().join("app/Visorfile")).unwrap();
        let files = rel_set(&context);
        assert!(files.contains("app/Visorfile"));
        assert!(files.contains("app/app.py"));
        // Directory inherit target resolves to its Visorfile.
        assert!(files.contains("base/Visorfile"));
        assert!(files.contains("base/setup.sh"));
    }

    #[test]
    fn test_sibling_inherit_without_marker_stays_parent_relative() {
        // No .git marker anywhere: the context root is the entry manifest's
        // directory and the inherited sibling surfaces as a ../ entry.
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("app/Visorfile"),
            "copy app.py app/\ninherit ../base/Visorfile\n",
        );
        write(&dir.path().join("app/app.py"), "print('hi')\n");
        write(&dir.path().join("base/Visorfile"), "run true\n");

        let context = discover(&dir.path().join("app/Visorfile")).unwrap();
        assert_eq!(context.root, normalize(&dir.path().join("app")));
        let expected: BTreeSet<String> = ["Visorfile", "app.py", "../base/Visorfile"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(rel_set(&context), expected);
    }

    #[test]
    fn test_repeatable_script_expands_third_field() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("Visorfile"),
            "repeatable script 15 jobs/nightly.sh\nrepeatable snapshot 15\n",
        );
        write(&dir.path().join("jobs/nightly.sh"), "#!/bin/sh\n");

        let context = discover(&dir.path().join("Visorfile")).unwrap();
        assert!(rel_set(&context).contains("jobs/nightly.sh"));
    }

    #[test]
    fn test_repeatable_requires_exactly_three_fields() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("Visorfile"),
            "repeatable script 15 jobs/nightly.sh extra\n",
        );
        write(&dir.path().join("jobs/nightly.sh"), "#!/bin/sh\n");

        let context = discover(&dir.path().join("Visorfile")).unwrap();
        assert!(!rel_set(&context).contains("jobs/nightly.sh"));
    }

    #[test]
    fn test_inherit_chain_of_ten_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..9 {
            write(
                &dir.path().join(format!("m{i}")),
                &format!("inherit ./m{}\n", i + 1),
            );
        }
        write(&dir.path().join("m9"), "run make\n");

        let context = discover(&dir.path().join("m0")).unwrap();
        assert_eq!(context.files.len(), 10);
    }

    #[test]
    fn test_inherit_chain_of_eleven_is_too_long() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write(
                &dir.path().join(format!("m{i}")),
                &format!("inherit ./m{}\n", i + 1),
            );
        }
        write(&dir.path().join("m10"), "run make\n");

        let err = discover(&dir.path().join("m0")).unwrap_err();
        assert!(matches!(
            err,
            ContextError::ChainTooLong {
                limit: MAX_INHERIT_CHAIN
            }
        ));
    }

    #[test]
    fn test_inherit_cycle_hits_chain_bound() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a"), "inherit ./b\n");
        write(&dir.path().join("b"), "inherit ./a\n");

        let err = discover(&dir.path().join("a")).unwrap_err();
        assert!(matches!(err, ContextError::ChainTooLong { .. }));
    }

    #[test]
    fn test_duplicate_sources_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("Visorfile"),
            "copy app.py /a/\ncopy app.py app.py /b/\n",
        );
        write(&dir.path().join("app.py"), "print('hi')\n");

        let context = discover(&dir.path().join("Visorfile")).unwrap();
        assert_eq!(context.files.len(), 2); // Visorfile + app.py
    }

    #[test]
    fn test_missing_manifest_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("Visorfile")).unwrap_err();
        assert!(matches!(err, ContextError::Io { .. }));
    }
}
