//! Visorfile directive parsing.
//!
//! A Visorfile is a Dockerfile-style manifest: newline-separated directives
//! of the form `KEYWORD value...`, with `#` comments and backslash line
//! continuations. Beyond the conventional vocabulary it carries two
//! extensions, `inherit` and `repeatable`; everything else is preserved as
//! [`Directive::Other`] so the scope discovery can skip it without choking
//! on directives it does not understand.

use crate::errors::ContextError;
use std::path::Path;

/// Default manifest filename used when a reference names a directory.
pub const DEFAULT_MANIFEST_NAME: &str = "Visorfile";

/// One decoded directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `inherit <path-or-ref>` — continue the manifest chain.
    Inherit(String),
    /// `copy <src...> <dst>` — host paths entering the build context.
    Copy(String),
    /// `repeatable <kind> ...` — periodic guest-side work; only the
    /// `script` form references host paths.
    Repeatable(String),
    /// Any other well-formed directive, kept verbatim.
    Other { keyword: String, value: String },
}

/// A parsed manifest line: the decoded directive plus enough source context
/// to report useful errors downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestCommand {
    pub directive: Directive,
    /// The logical source line (continuations joined).
    pub raw: String,
    /// 1-based line number where the logical line starts.
    pub line: usize,
}

fn is_directive_keyword(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && token.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// Parse the raw text of one manifest into its ordered directive sequence.
///
/// `file` is used for error context only; no filesystem access happens here.
pub fn parse_manifest(source: &str, file: &Path) -> Result<Vec<ManifestCommand>, ContextError> {
    let mut commands = Vec::new();
    let mut lines = source.lines().enumerate();

    while let Some((idx, first)) = lines.next() {
        let line_no = idx + 1;
        let trimmed = first.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Join backslash continuations into one logical line.
        let mut logical = trimmed.trim_end_matches('\\').trim_end().to_string();
        let mut continued = trimmed.ends_with('\\');
        while continued {
            match lines.next() {
                Some((_, next)) => {
                    let next = next.trim();
                    continued = next.ends_with('\\');
                    let fragment = next.trim_end_matches('\\').trim_end();
                    if !fragment.is_empty() {
                        logical.push(' ');
                        logical.push_str(fragment);
                    }
                }
                None => break,
            }
        }

        let (keyword, value) = match logical.split_once(char::is_whitespace) {
            Some((k, v)) => (k, v.trim()),
            None => (logical.as_str(), ""),
        };

        if !is_directive_keyword(keyword) {
            return Err(ContextError::Parse {
                file: file.to_path_buf(),
                line: line_no,
                message: format!("expected a directive keyword, found {keyword:?}"),
            });
        }

        let directive = match keyword.to_ascii_lowercase().as_str() {
            "inherit" => Directive::Inherit(value.to_string()),
            "copy" => Directive::Copy(value.to_string()),
            "repeatable" => Directive::Repeatable(value.to_string()),
            other => Directive::Other {
                keyword: other.to_string(),
                value: value.to_string(),
            },
        };

        commands.push(ManifestCommand {
            directive,
            raw: logical,
            line: line_no,
        });
    }

    Ok(commands)
}
