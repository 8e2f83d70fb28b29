//! Decomposer adapter
//!
//! Turns one input file into an ordered list of components plus the
//! auxiliary declarations (custom commands, imports) found next to them.
//! The structural parsing itself is delegated to tree-sitter.

mod javascript;
pub(crate) mod syntax;

pub use javascript::JavaScriptDecomposer;

use crate::component::{Component, CustomCommand, SourceImport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Source dialect of the input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDialect {
    #[default]
    JavaScript,
    TypeScript,
}

impl SourceDialect {
    /// Pick the dialect from a file extension (`.ts`/`.tsx` → TypeScript).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts") | Some("tsx") | Some("mts") | Some("cts") => Self::TypeScript,
            _ => Self::JavaScript,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
        }
    }
}

/// Errors from decomposition. Fatal for the run that hit them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecompositionError {
    #[error("structural parser unavailable: {0}")]
    ParserUnavailable(String),

    #[error("structural parser produced no syntax tree")]
    NoTree,

    #[error("malformed source at line {line}, column {column}: {reason}")]
    Malformed {
        reason: String,
        line: usize,
        column: usize,
    },
}

impl DecompositionError {
    /// 1-based (line, column) of the problem, when known.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            Self::Malformed { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }
}

/// Output of a successful decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    /// Components in source order (`order` == index)
    pub components: Vec<Component>,
    pub custom_commands: Vec<CustomCommand>,
    pub imports: Vec<SourceImport>,
}

impl Decomposition {
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Contract for decomposers. Pure: no side effects over the input.
pub trait Decomposer: Send + Sync {
    fn decompose(
        &self,
        source: &str,
        dialect: SourceDialect,
    ) -> Result<Decomposition, DecompositionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_from_extension() {
        assert_eq!(
            SourceDialect::from_path(Path::new("cypress/e2e/login.cy.ts")),
            SourceDialect::TypeScript
        );
        assert_eq!(
            SourceDialect::from_path(Path::new("login.cy.js")),
            SourceDialect::JavaScript
        );
        assert_eq!(
            SourceDialect::from_path(Path::new("README")),
            SourceDialect::JavaScript
        );
    }

    #[test]
    fn malformed_error_reports_location() {
        let err = DecompositionError::Malformed {
            reason: "missing `}`".to_string(),
            line: 4,
            column: 2,
        };
        assert_eq!(err.location(), Some((4, 2)));
        assert!(err.to_string().contains("line 4"));
        assert_eq!(DecompositionError::NoTree.location(), None);
    }
}
