use serde::Serialize;
use thiserror::Error;

/// What went wrong while compiling a script.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CompileErrorKind {
    #[error("failed to initialize tree-sitter parser")]
    ParserInit,

    #[error("failed to parse source code")]
    ParseFailed,

    #[error("syntax error")]
    Syntax,

    #[error("missing `{0}`")]
    Missing(String),

    #[error("unsupported syntax: {0}")]
    Unsupported(String),

    #[error("invalid assignment target")]
    InvalidAssignment,

    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),

    #[error("function has more than {0} constants")]
    TooManyConstants(usize),
}

/// A compile failure with its position in the source.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind} at {line}:{column} (near `{context}`)")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub byte_start: usize,
    pub byte_end: usize,
    /// 1-based
    pub line: usize,
    /// 1-based
    pub column: usize,
    pub context: String,
}

impl CompileError {
    /// An error not tied to any source position.
    pub fn global(kind: CompileErrorKind) -> Self {
        Self {
            kind,
            byte_start: 0,
            byte_end: 0,
            line: 1,
            column: 1,
            context: String::new(),
        }
    }

    pub(crate) fn at(kind: CompileErrorKind, node: tree_sitter::Node<'_>, source: &str) -> Self {
        let start = node.start_position();
        let byte_start = node.start_byte();
        let byte_end = node.end_byte();

        let context_start = floor_char_boundary(source, byte_start.saturating_sub(20));
        let context_end = floor_char_boundary(source, (byte_end + 20).min(source.len()));
        let context = source
            .get(context_start..context_end)
            .unwrap_or("")
            .replace('\n', "\\n");

        Self {
            kind,
            byte_start,
            byte_end,
            line: start.row + 1,
            column: start.column + 1,
            context,
        }
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
