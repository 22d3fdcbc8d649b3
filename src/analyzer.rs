//! Script analysis: source versions and their descriptor trees.

use crate::cache;
use crate::compiler::{CompileError, CompiledScript, FunctionDescriptor};
use crate::runtime::{ScriptId, VersionId};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Immutable source text of one script revision plus its descriptor tree.
#[derive(Debug, Clone, Serialize)]
pub struct SourceVersion {
    pub id: VersionId,
    pub script: ScriptId,
    #[serde(skip)]
    pub source: Arc<str>,
    /// xxh3 digest of `source`.
    pub hash: u64,
    #[serde(skip)]
    pub tree: Arc<CompiledScript>,
}

impl SourceVersion {
    pub fn new(id: VersionId, script: ScriptId, source: Arc<str>, tree: Arc<CompiledScript>) -> Self {
        let hash = source_hash(&source);
        Self {
            id,
            script,
            source,
            hash,
            tree,
        }
    }

    pub fn descriptors(&self) -> &[FunctionDescriptor] {
        &self.tree.functions
    }

    /// Source text of the descriptor at `index`.
    pub fn function_text(&self, index: usize) -> Option<&str> {
        let f = self.tree.get(index)?;
        self.source.get(f.start_position..f.end_position)
    }
}

pub fn source_hash(source: &str) -> u64 {
    xxh3_64(source.as_bytes())
}

/// Compile `source` into its descriptor tree.
///
/// Deterministic: identical text yields identical positions, counts and
/// parent structure.
pub fn analyze(source: &str) -> Result<Arc<CompiledScript>, CompileError> {
    let tree = cache::get_or_compile(source)?;
    debug!(functions = tree.len(), bytes = source.len(), "analyzed script");
    Ok(tree)
}
