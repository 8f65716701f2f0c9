//! VCS-ignore oracle.
//!
//! Asks git which paths under the context root are ignored, including paths
//! inside nested submodules, so the discoverer can keep them out of the
//! transmitted file set. Git is invoked directly; the submodule listing
//! needs its own invocation because `git ls-files` at the root does not
//! descend into submodules.

use crate::context::normalize;
use crate::errors::ContextError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Root-relative paths ignored by git at `root`, recursively across nested
/// submodules.
pub fn list_ignored(root: &Path) -> Result<BTreeSet<PathBuf>, ContextError> {
    let mut lines = run_git(root, &["ls-files", "-o", "-i", "--exclude-standard"])?;
    lines.extend(run_git(
        root,
        &[
            "submodule",
            "foreach",
            "--recursive",
            // Prefix each submodule-relative path with the submodule's own
            // path so everything is rooted at the context root.
            "git ls-files -o -i --exclude-standard | sed \"s|^|$path/|\"",
        ],
    )?);

    let ignored: BTreeSet<PathBuf> = lines
        .iter()
        // `submodule foreach` interleaves "Entering '<path>'" banners with
        // the payload lines.
        .filter(|line| !line.starts_with("Entering "))
        .filter(|line| !line.is_empty())
        .map(|line| normalize(Path::new(line)))
        .collect();
    debug!(count = ignored.len(), "collected vcs-ignored paths");
    Ok(ignored)
}

fn run_git(root: &Path, args: &[&str]) -> Result<Vec<String>, ContextError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| ContextError::Vcs(format!("failed to run git {}: {e}", args[0])))?;
    if !output.status.success() {
        return Err(ContextError::Vcs(format!(
            "git {} exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}
