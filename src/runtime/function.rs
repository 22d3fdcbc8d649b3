//! Shared function records: the live, patchable side of a function.
//!
//! Closures and frames refer to functions through [`FunctionId`] handles
//! into a [`FunctionTable`]. Records are never moved or removed, so a handle
//! stays valid for the lifetime of the runtime while the record's contents
//! are swapped by live edits.

use super::{FunctionId, ScriptId, VersionId};
use crate::compiler::{Code, FunctionDescriptor};
use serde::Serialize;
use std::rc::Rc;
use std::sync::Arc;

/// Code currently installed in a record, with the records its nested
/// function literals instantiate (parallel to `code.nested`).
#[derive(Debug, Clone)]
pub struct InstalledCode {
    pub code: Arc<Code>,
    pub nested: Vec<FunctionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharedFunctionRecord {
    pub id: FunctionId,
    pub name: String,
    pub script: ScriptId,
    /// Source version the installed code was compiled from.
    pub version: VersionId,
    pub start_position: usize,
    pub end_position: usize,
    pub param_count: usize,
    pub top_level: bool,
    #[serde(skip)]
    pub installed: Rc<InstalledCode>,
    /// Set when an edit could not replace this record's code; the next edit
    /// of the script retries it.
    pub stale: bool,
}

impl SharedFunctionRecord {
    pub fn code(&self) -> &Arc<Code> {
        &self.installed.code
    }

    pub fn display_name(&self) -> &str {
        if self.top_level {
            "<top-level>"
        } else if self.name.is_empty() {
            "<anonymous>"
        } else {
            &self.name
        }
    }

    /// Swap the installed code and take over the descriptor's metadata.
    pub fn install(
        &mut self,
        descriptor: &FunctionDescriptor,
        nested: Vec<FunctionId>,
        version: VersionId,
    ) {
        self.installed = Rc::new(InstalledCode {
            code: Arc::clone(&descriptor.code),
            nested,
        });
        self.name = descriptor.name.clone();
        self.param_count = descriptor.param_count;
        self.version = version;
        self.stale = false;
        self.move_to(descriptor);
    }

    pub fn move_to(&mut self, descriptor: &FunctionDescriptor) {
        self.start_position = descriptor.start_position;
        self.end_position = descriptor.end_position;
    }
}

#[derive(Debug, Default)]
pub struct FunctionTable {
    records: Vec<SharedFunctionRecord>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a record for `descriptor` with no nested links yet.
    pub fn allocate(
        &mut self,
        descriptor: &FunctionDescriptor,
        script: ScriptId,
        version: VersionId,
    ) -> FunctionId {
        let id = FunctionId(self.records.len());
        self.records.push(SharedFunctionRecord {
            id,
            name: descriptor.name.clone(),
            script,
            version,
            start_position: descriptor.start_position,
            end_position: descriptor.end_position,
            param_count: descriptor.param_count,
            top_level: descriptor.is_root(),
            installed: Rc::new(InstalledCode {
                code: Arc::clone(&descriptor.code),
                nested: Vec::new(),
            }),
            stale: false,
        });
        id
    }

    pub fn get(&self, id: FunctionId) -> Option<&SharedFunctionRecord> {
        self.records.get(id.0)
    }

    pub fn get_mut(&mut self, id: FunctionId) -> Option<&mut SharedFunctionRecord> {
        self.records.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedFunctionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Allocate one record per descriptor of `tree` and link nested
    /// literals to their records. Returns the records in descriptor order.
    pub fn allocate_tree(
        &mut self,
        functions: &[FunctionDescriptor],
        script: ScriptId,
        version: VersionId,
    ) -> Vec<FunctionId> {
        let ids: Vec<FunctionId> = functions
            .iter()
            .map(|d| self.allocate(d, script, version))
            .collect();
        for (descriptor, &id) in functions.iter().zip(&ids) {
            let nested = descriptor.code.nested.iter().map(|&n| ids[n]).collect();
            if let Some(record) = self.get_mut(id) {
                record.installed = Rc::new(InstalledCode {
                    code: Arc::clone(&descriptor.code),
                    nested,
                });
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    #[test]
    fn allocate_tree_links_nested_literals() {
        let script = compile("function f() { return function g() {}; }").unwrap();
        let mut table = FunctionTable::new();
        let ids = table.allocate_tree(&script.functions, ScriptId(0), VersionId(0));

        assert_eq!(ids.len(), 3);
        assert_eq!(table.get(ids[0]).unwrap().installed.nested, vec![ids[1]]);
        assert_eq!(table.get(ids[1]).unwrap().installed.nested, vec![ids[2]]);
        assert!(table.get(ids[2]).unwrap().installed.nested.is_empty());
    }

    #[test]
    fn install_swaps_code_in_place() {
        let old = compile("function f() { return 1; }").unwrap();
        let new = compile("function f(a) { return 2; }").unwrap();
        let mut table = FunctionTable::new();
        let ids = table.allocate_tree(&old.functions, ScriptId(0), VersionId(0));

        let record = table.get_mut(ids[1]).unwrap();
        record.stale = true;
        record.install(&new.functions[1], Vec::new(), VersionId(1));

        let record = table.get(ids[1]).unwrap();
        assert_eq!(record.id, ids[1]);
        assert_eq!(record.param_count, 1);
        assert_eq!(record.version, VersionId(1));
        assert!(!record.stale);
        assert!(Arc::ptr_eq(record.code(), &new.functions[1].code));
    }
}
