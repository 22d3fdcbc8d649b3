use serde::Serialize;

/// Slot layout of one function environment: parameters first, then declared
/// variables and hoisted function declarations in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeInfo {
    pub names: Vec<String>,
}

impl ScopeInfo {
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Add `name` unless already declared; returns its slot.
    pub fn declare(&mut self, name: &str) -> usize {
        match self.slot_of(name) {
            Some(slot) => slot,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Where an identifier lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    Local { depth: u32, slot: u32 },
    Global,
}

/// Resolve `name` against a function scope and its enclosing function
/// scopes (innermost first). The top-level scope is the global object, so
/// `own` is `None` while compiling top-level code.
pub fn resolve(name: &str, own: Option<&ScopeInfo>, outer: &[ScopeInfo]) -> Resolved {
    let chain = own.into_iter().chain(outer.iter());
    for (depth, scope) in chain.enumerate() {
        if let Some(slot) = scope.slot_of(name) {
            return Resolved::Local {
                depth: depth as u32,
                slot: slot as u32,
            };
        }
    }
    Resolved::Global
}
