//! Error types with fix suggestions
//!
//! Three kinds reach callers of a render: parse failures (synchronous, from
//! `compile`), fetch failures and rejected data sources (through the render's
//! failure path). The rest describe misuse of the public API.

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// `Clone` because a failed in-flight cache entry is reported to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TetherError {
    // ─────────────────────────────────────────────────────────────
    // Template errors (TETHER-010 to TETHER-013)
    // ─────────────────────────────────────────────────────────────
    #[error("TETHER-010: Template parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("TETHER-011: No template registered under '{id}'")]
    UnknownTemplate { id: String },

    #[error("TETHER-012: Cannot tell which engine renders '{path}'")]
    UnknownEngine { path: String },

    #[error("TETHER-013: '{source_desc}' cannot be rendered synchronously")]
    NotReady { source_desc: String },

    // ─────────────────────────────────────────────────────────────
    // Transport errors (TETHER-020)
    // ─────────────────────────────────────────────────────────────
    #[error("TETHER-020: Failed to fetch template '{path}': {reason}")]
    Fetch { path: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Data errors (TETHER-030 to TETHER-031)
    // ─────────────────────────────────────────────────────────────
    #[error("TETHER-030: Async data source rejected: {message}")]
    Resolution { message: String },

    #[error("TETHER-031: Cannot write '{path}': {reason}")]
    ScopeWrite { path: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Hookup errors (TETHER-040)
    // ─────────────────────────────────────────────────────────────
    #[error("TETHER-040: Hookup for '{name}' failed: {message}")]
    Hookup { name: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Environment errors (TETHER-050 to TETHER-051)
    // ─────────────────────────────────────────────────────────────
    #[error("TETHER-050: Invalid configuration: {0}")]
    Config(String),

    #[error("TETHER-051: IO error: {0}")]
    Io(String),
}

impl TetherError {
    /// Build a parse error from a byte offset into `source`.
    pub fn parse_at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_column(source, offset);
        TetherError::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    /// Error for a user-registered hookup that gave up.
    pub fn hookup(name: impl Into<String>, message: impl Into<String>) -> Self {
        TetherError::Hookup {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from parsing template text.
    pub fn is_parse(&self) -> bool {
        matches!(self, TetherError::Parse { .. })
    }
}

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        TetherError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for TetherError {
    fn from(err: serde_yaml::Error) -> Self {
        TetherError::Config(err.to_string())
    }
}

/// 1-based line and column of a byte offset.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

impl FixSuggestion for TetherError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TetherError::Parse { .. } => {
                Some("Check that every {{#section}} and <element> is closed in order")
            }
            TetherError::UnknownTemplate { .. } => {
                Some("Register the template with View::register before rendering it by id")
            }
            TetherError::UnknownEngine { .. } => {
                Some("Use a .stache/.mustache extension or pass an explicit engine")
            }
            TetherError::NotReady { .. } => {
                Some("Use the async render (or render_with) for remote templates and pending data")
            }
            TetherError::Fetch { .. } => Some("Check the template path and the loader's root"),
            TetherError::Resolution { .. } => {
                Some("Handle the rejected source before rendering, or retry at the transport")
            }
            TetherError::ScopeWrite { .. } => {
                Some("Writes need an observable map somewhere in the scope chain")
            }
            TetherError::Hookup { .. } => Some("Fix the registered tag/attribute callback"),
            TetherError::Config(_) => Some("Check the YAML keys: template_root, default_engine, extensions"),
            TetherError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_at_reports_line_and_column() {
        let src = "<h1>\n  {{#if}}\n</h1>";
        let err = TetherError::parse_at(src, 7, "bad section");
        assert_eq!(
            err,
            TetherError::Parse {
                line: 2,
                column: 3,
                message: "bad section".to_string()
            }
        );
        assert!(err.to_string().contains("TETHER-010"));
        assert!(err.to_string().contains("2:3"));
    }

    #[test]
    fn parse_at_clamps_offset() {
        let err = TetherError::parse_at("ab", 99, "eof");
        assert!(matches!(err, TetherError::Parse { line: 1, column: 3, .. }));
    }

    #[test]
    fn every_variant_has_a_suggestion() {
        let errors = [
            TetherError::parse_at("", 0, "x"),
            TetherError::UnknownTemplate { id: "a".into() },
            TetherError::UnknownEngine { path: "a".into() },
            TetherError::NotReady { source_desc: "a".into() },
            TetherError::Fetch {
                path: "a".into(),
                reason: "b".into(),
            },
            TetherError::Resolution {
                message: "a".into(),
            },
            TetherError::ScopeWrite {
                path: "a".into(),
                reason: "b".into(),
            },
            TetherError::hookup("panel", "boom"),
            TetherError::Config("a".into()),
            TetherError::Io("a".into()),
        ];
        for err in errors {
            assert!(err.fix_suggestion().is_some(), "{err}");
        }
    }
}
