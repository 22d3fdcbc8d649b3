//! Thread-local parser pooling.
//!
//! Creating a tree-sitter parser and loading the JavaScript grammar is not
//! free; each thread keeps one [`ScriptParser`] and reuses it.

use crate::compiler::{CompileError, CompileErrorKind, ScriptParser};
use std::cell::RefCell;

thread_local! {
    static SCRIPT_PARSER: RefCell<Option<ScriptParser>> = const { RefCell::new(None) };
}

/// Execute function with pooled parser instance.
///
/// # Example
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use live_edit::pool::with_parser;
///
/// let has_errors = with_parser(|parser| {
///     parser.parse_with_source("function f() {}").map(|p| p.has_errors())
/// })??;
/// # Ok(())
/// # }
/// ```
pub fn with_parser<F, R>(f: F) -> Result<R, CompileError>
where
    F: FnOnce(&mut ScriptParser) -> R,
{
    SCRIPT_PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(ScriptParser::new()?);
        }
        match slot.as_mut() {
            Some(parser) => Ok(f(parser)),
            None => Err(CompileError::global(CompileErrorKind::ParserInit)),
        }
    })
}
