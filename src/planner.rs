//! Patch planning: which functions get new code.
//!
//! Every diff chunk is attributed to the innermost old function containing
//! it. The old and new descriptor trees are matched top-down, and a touched
//! function whose match is missing or incompatible escalates to its parent
//! until a compatible function is found. The root is always compatible.

use crate::compiler::{CompiledScript, FunctionDescriptor};
use crate::diff::{DiffChunk, PositionTranslator};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Why a function appears in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// Its own text changed and it can take new code directly.
    SourceChanged,
    ParameterCountChanged,
    ScopeChanged,
    NoMatchingFunction,
    /// An earlier edit could not replace it.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub old_index: usize,
    pub new_index: Option<usize>,
    /// Old index of the function whose code is replaced on behalf of this
    /// entry. Equal to `old_index` for direct targets.
    pub target: usize,
    pub directly_patchable: bool,
    pub reason: PlanReason,
}

/// What a nested function literal of replaced code instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "old_index")]
pub enum Binding {
    /// Keep using the record of this old function.
    Existing(usize),
    /// A new record (and new records for its whole subtree).
    Fresh,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PatchPlan {
    /// Every touched function, by old index (source order).
    pub entries: BTreeMap<usize, PlanEntry>,
    pub targets: BTreeSet<usize>,
    /// Old index to matched new index.
    pub matches: Vec<Option<usize>>,
    /// New index to matched old index.
    pub reverse: Vec<Option<usize>>,
    /// Binding of every new child of a target's new function, by new index.
    pub bindings: BTreeMap<usize, Binding>,
}

impl PatchPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, old_index: usize) -> Option<&PlanEntry> {
        self.entries.get(&old_index)
    }

    pub fn is_target(&self, old_index: usize) -> bool {
        self.targets.contains(&old_index)
    }

    pub fn is_touched(&self, old_index: usize) -> bool {
        self.entries.contains_key(&old_index)
    }

    /// New index of a target, which always has a match.
    pub fn target_new_index(&self, old_index: usize) -> Option<usize> {
        self.matches.get(old_index).copied().flatten()
    }
}

fn compatible(old: &FunctionDescriptor, new: &FunctionDescriptor) -> Option<PlanReason> {
    if old.param_count != new.param_count {
        Some(PlanReason::ParameterCountChanged)
    } else if !old.same_expectations(new) {
        Some(PlanReason::ScopeChanged)
    } else {
        None
    }
}

/// Plan the replacement of `old` by `new`. `stale` holds old indices whose
/// records still run superseded code and must be retried.
pub fn plan(
    old: &CompiledScript,
    new: &CompiledScript,
    chunks: &[DiffChunk],
    stale: &BTreeSet<usize>,
) -> PatchPlan {
    let translator = PositionTranslator::new(chunks);
    let (matches, reverse) = match_trees(old, new, &translator);

    let mut touched: BTreeMap<usize, PlanReason> = BTreeMap::new();
    for chunk in chunks {
        let index = old.innermost_containing(chunk.old_start, chunk.old_end);
        touched.insert(index, PlanReason::SourceChanged);
    }
    for &index in stale {
        if index < old.len() {
            touched.entry(index).or_insert(PlanReason::Retry);
        }
    }

    let mut plan = PatchPlan {
        matches,
        reverse,
        ..PatchPlan::default()
    };

    for (&start, &initial_reason) in &touched {
        let mut path = Vec::new();
        let mut current = start;
        let target = loop {
            let descriptor = &old.functions[current];
            let failure = match plan.matches[current] {
                _ if descriptor.is_root() => None,
                None => Some(PlanReason::NoMatchingFunction),
                Some(new_index) => compatible(descriptor, &new.functions[new_index]),
            };
            match (failure, descriptor.parent_index) {
                (Some(reason), Some(parent)) => {
                    warn!(
                        function = descriptor.display_name(),
                        ?reason,
                        "cannot patch directly, escalating to enclosing function"
                    );
                    path.push((current, reason));
                    current = parent;
                }
                _ => break current,
            }
        };

        for (index, reason) in path {
            plan.entries.entry(index).or_insert(PlanEntry {
                old_index: index,
                new_index: plan.matches[index],
                target,
                directly_patchable: false,
                reason,
            });
        }
        let reason = if target == start {
            initial_reason
        } else {
            PlanReason::SourceChanged
        };
        let entry = plan.entries.entry(target).or_insert(PlanEntry {
            old_index: target,
            new_index: plan.matches[target],
            target,
            directly_patchable: true,
            reason,
        });
        if reason == PlanReason::SourceChanged {
            entry.reason = reason;
        }
        plan.targets.insert(target);
    }

    // a target is always matched; the root matches the root
    let target_pairs: Vec<(usize, usize)> = plan
        .targets
        .iter()
        .filter_map(|&t| plan.matches[t].map(|n| (t, n)))
        .collect();
    for (_, new_index) in target_pairs {
        for &child in new.children(new_index) {
            let binding = match plan.reverse[child] {
                Some(old_child) if plan.is_target(old_child) => Binding::Existing(old_child),
                Some(old_child)
                    if !plan.is_touched(old_child)
                        && compatible(&old.functions[old_child], &new.functions[child])
                            .is_none() =>
                {
                    Binding::Existing(old_child)
                }
                _ => Binding::Fresh,
            };
            plan.bindings.insert(child, binding);
        }
    }

    debug!(
        touched = plan.entries.len(),
        targets = plan.targets.len(),
        "planned patch"
    );
    plan
}

/// Match old descriptors to new ones, recursively from root to root.
fn match_trees(
    old: &CompiledScript,
    new: &CompiledScript,
    translator: &PositionTranslator,
) -> (Vec<Option<usize>>, Vec<Option<usize>>) {
    let mut matches = vec![None; old.len()];
    let mut reverse = vec![None; new.len()];
    if old.is_empty() || new.is_empty() {
        return (matches, reverse);
    }

    let mut pending = vec![(0usize, 0usize)];
    matches[0] = Some(0);
    reverse[0] = Some(0);
    while let Some((old_parent, new_parent)) = pending.pop() {
        let old_children = old.children(old_parent);
        let new_children = new.children(new_parent);
        let mut taken = vec![false; new_children.len()];

        for (old_pos, &old_child) in old_children.iter().enumerate() {
            let o = &old.functions[old_child];
            let translated = translator.translate_exact(o.start_position);
            let candidate = |rule: u8, new_pos: usize, n: &FunctionDescriptor| match rule {
                0 => translated == Some(n.start_position) && o.name == n.name,
                1 => old_pos == new_pos && o.name == n.name,
                2 => o.name == n.name && !o.is_anonymous(),
                _ => old_pos == new_pos && o.is_anonymous() && n.is_anonymous(),
            };
            let found = (0..4u8).find_map(|rule| {
                new_children
                    .iter()
                    .enumerate()
                    .find(|&(new_pos, &n)| !taken[new_pos] && candidate(rule, new_pos, &new.functions[n]))
                    .map(|(new_pos, &n)| (new_pos, n))
            });
            if let Some((new_pos, new_child)) = found {
                taken[new_pos] = true;
                matches[old_child] = Some(new_child);
                reverse[new_child] = Some(old_child);
                pending.push((old_child, new_child));
            }
        }
    }
    (matches, reverse)
}
