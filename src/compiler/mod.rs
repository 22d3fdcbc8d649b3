//! Script compiler: tree-sitter parse, scope resolution and bytecode
//! generation for the supported JavaScript subset.
//!
//! [`compile`] produces a [`CompiledScript`], an arena of
//! [`FunctionDescriptor`]s in pre-order with the top-level script at index 0.

pub mod code;
mod codegen;
pub mod errors;
pub mod parser;
pub mod scope;

pub use code::{BinaryOp, Code, Constant, Op, UnaryOp};
pub use errors::{CompileError, CompileErrorKind};
pub use parser::{ParsedSource, ScriptParser};
pub use scope::{resolve, Resolved, ScopeInfo};

use serde::Serialize;
use std::sync::Arc;

/// Compiled description of one function of a script.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDescriptor {
    /// Empty for the top-level script and anonymous functions.
    pub name: String,
    /// Byte offset of the function's first character (0 for the root).
    pub start_position: usize,
    /// Byte offset one past the function's last character.
    pub end_position: usize,
    pub param_count: usize,
    pub literal_count: usize,
    pub parent_index: Option<usize>,
    #[serde(skip)]
    pub code: Arc<Code>,
    pub scope: ScopeInfo,
    /// Enclosing function scopes, innermost first. The top-level scope is
    /// the global object and never appears here.
    pub outer_scopes: Vec<ScopeInfo>,
}

impl FunctionDescriptor {
    pub fn is_root(&self) -> bool {
        self.parent_index.is_none()
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    /// True when both functions see the same enclosing variable layout.
    pub fn same_expectations(&self, other: &FunctionDescriptor) -> bool {
        self.outer_scopes == other.outer_scopes
    }

    pub fn contains(&self, position: usize) -> bool {
        self.start_position <= position && position < self.end_position
    }

    pub fn display_name(&self) -> &str {
        if self.is_root() {
            "<top-level>"
        } else if self.is_anonymous() {
            "<anonymous>"
        } else {
            &self.name
        }
    }
}

/// All functions of one script version, parents before children.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledScript {
    pub functions: Vec<FunctionDescriptor>,
    #[serde(skip)]
    children: Vec<Vec<usize>>,
}

impl CompiledScript {
    pub(crate) fn new(functions: Vec<FunctionDescriptor>) -> Self {
        let mut children = vec![Vec::new(); functions.len()];
        for (index, function) in functions.iter().enumerate() {
            if let Some(parent) = function.parent_index {
                children[parent].push(index);
            }
        }
        Self {
            functions,
            children,
        }
    }

    pub fn root(&self) -> &FunctionDescriptor {
        &self.functions[0]
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FunctionDescriptor> {
        self.functions.get(index)
    }

    /// Direct children of `index` in source order.
    pub fn children(&self, index: usize) -> &[usize] {
        self.children.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent chain of `index`, nearest first, ending at the root.
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(
            self.functions.get(index).and_then(|f| f.parent_index),
            move |&i| self.functions[i].parent_index,
        )
    }

    /// Innermost function whose text contains the byte range
    /// `[start, end)`. An empty range must fall strictly inside a function
    /// to belong to it; the root contains everything.
    pub fn innermost_containing(&self, start: usize, end: usize) -> usize {
        let mut best = 0;
        for (index, function) in self.functions.iter().enumerate().skip(1) {
            let contains = if start == end {
                function.start_position < start && start < function.end_position
            } else {
                function.start_position <= start && end <= function.end_position
            };
            if contains {
                // pre-order: a later containing function is nested deeper
                best = index;
            }
        }
        best
    }
}

/// Compile a script. Syntax errors are reported at the first error node.
pub fn compile(source: &str) -> Result<CompiledScript, CompileError> {
    crate::pool::with_parser(|parser| {
        let parsed = parser.parse_with_source(source)?;
        if let Some(error) = parsed.first_error() {
            return Err(error);
        }
        codegen::compile_program(&parsed)
    })?
}
