//! Code replacement: install new code into shared function records.
//!
//! Records are updated in place, so closures holding a record's handle run
//! the new code on their next call. Nested function literals of replaced
//! code are linked to the records chosen by the plan's bindings; functions
//! that are new or changed shape get fresh records.

use crate::analyzer::SourceVersion;
use crate::planner::{Binding, PatchPlan};
use crate::runtime::{FunctionId, Runtime, RuntimeError, ScriptId, VersionId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ReplaceOutcome {
    pub version: VersionId,
    /// Record of each descriptor of the new version.
    pub records: Vec<FunctionId>,
    /// Targets (by old index) whose code was swapped, with their records.
    pub replaced: BTreeMap<usize, FunctionId>,
    /// Records created for new or reshaped functions.
    pub created: Vec<FunctionId>,
}

/// Commit `plan` for `script`, moving it to `version`. Targets listed in
/// `blocked` keep their code and are marked stale. Their nested functions
/// are still resolved through the plan's bindings, so a function escalated
/// into a blocked target gets a fresh record holding its new code, ready to
/// be linked when the target is retried.
pub fn commit(
    runtime: &mut Runtime,
    script: ScriptId,
    version: SourceVersion,
    plan: &PatchPlan,
    blocked: &BTreeSet<usize>,
) -> Result<ReplaceOutcome, RuntimeError> {
    let old_records = runtime.script(script)?.records.clone();
    let tree = std::sync::Arc::clone(&version.tree);
    let version_id = version.id;

    // new index of every target whose code is swapped
    let committed: BTreeMap<usize, usize> = plan
        .targets
        .iter()
        .filter(|t| !blocked.contains(t))
        .filter_map(|&t| plan.target_new_index(t).map(|n| (n, t)))
        .collect();
    // new index of every target, blocked or not
    let planned: BTreeSet<usize> = plan
        .targets
        .iter()
        .filter_map(|&t| plan.target_new_index(t))
        .collect();

    let mut records: Vec<FunctionId> = Vec::with_capacity(tree.len());
    let mut fresh = vec![false; tree.len()];
    for (index, descriptor) in tree.functions.iter().enumerate() {
        let Some(parent) = descriptor.parent_index else {
            records.push(old_records[0]);
            continue;
        };
        let existing = if fresh[parent] {
            None
        } else if planned.contains(&parent) {
            match plan.bindings.get(&index) {
                Some(Binding::Existing(old)) => Some(old_records[*old]),
                _ => None,
            }
        } else {
            plan.reverse[index].map(|old| old_records[old])
        };
        let id = match existing {
            Some(id) => id,
            None => {
                fresh[index] = true;
                runtime.functions.allocate(descriptor, script, version_id)
            }
        };
        records.push(id);
    }

    let mut replaced = BTreeMap::new();
    let mut created = Vec::new();
    for (index, descriptor) in tree.functions.iter().enumerate() {
        let id = records[index];
        let nested: Vec<FunctionId> = descriptor.code.nested.iter().map(|&n| records[n]).collect();
        let record = runtime
            .functions
            .get_mut(id)
            .ok_or(RuntimeError::UnknownFunction(id))?;
        if fresh[index] {
            record.install(descriptor, nested, version_id);
            created.push(id);
        } else if let Some(&old_index) = committed.get(&index) {
            record.install(descriptor, nested, version_id);
            replaced.insert(old_index, id);
            debug!(function = record.display_name(), record = %id, "replaced code");
        } else if !plan.reverse[index].is_some_and(|old| blocked.contains(&old)) {
            record.move_to(descriptor);
            record.version = version_id;
        }
    }

    for &old_index in blocked {
        if let Some(record) = old_records
            .get(old_index)
            .and_then(|&id| runtime.functions.get_mut(id))
        {
            record.stale = true;
        }
    }

    let state = runtime.script_mut(script)?;
    state.versions.push(version);
    state.records = records.clone();
    info!(
        %script,
        version = %version_id,
        replaced = replaced.len(),
        created = created.len(),
        stale = blocked.len(),
        "committed live edit"
    );

    Ok(ReplaceOutcome {
        version: version_id,
        records,
        replaced,
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::diff::compare_strings;
    use crate::planner::plan;
    use crate::runtime::{RunOutcome, Value};
    use std::sync::Arc;

    fn edit(rt: &mut Runtime, script: ScriptId, new: &str, blocked: &[usize]) -> ReplaceOutcome {
        let old = rt.script(script).unwrap().current().clone();
        let tree = analyze(new).unwrap();
        let chunks = compare_strings(&old.source, new);
        let plan = plan(&old.tree, &tree, &chunks, &BTreeSet::new());
        let id = rt.next_version_id();
        let version = SourceVersion::new(id, script, Arc::from(new), tree);
        let blocked: BTreeSet<usize> = blocked.iter().copied().collect();
        commit(rt, script, version, &plan, &blocked).unwrap()
    }

    fn call(rt: &mut Runtime, name: &str) -> f64 {
        match rt.call_global(name, vec![]).unwrap().1 {
            RunOutcome::Completed(v) => v.to_number(),
            RunOutcome::Paused(_) => panic!("paused"),
        }
    }

    #[test]
    fn existing_closures_observe_new_code() {
        let mut rt = Runtime::default();
        let source = "function make() { return function () { return 1; }; } var c = make();";
        let script = rt.load_script("c.js", source).unwrap();
        rt.run_script(script).unwrap();
        let before = rt.global("c").cloned().unwrap();

        let outcome = edit(
            &mut rt,
            script,
            "function make() { return function () { return 5; }; } var c = make();",
            &[],
        );
        assert_eq!(outcome.replaced.len(), 1);
        assert!(outcome.created.is_empty());
        assert_eq!(call(&mut rt, "c"), 5.0);
        // same closure object, same record
        assert!(before.strict_equals(rt.global("c").unwrap()));
    }

    #[test]
    fn untouched_functions_move_to_new_version() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script("m.js", "function a() { return 1; }\nfunction b() { return 2; }\n")
            .unwrap();
        rt.run_script(script).unwrap();
        let b = rt.script(script).unwrap().records[2];

        let outcome = edit(
            &mut rt,
            script,
            "function a() { return 10; }\nfunction b() { return 2; }\n",
            &[],
        );
        let record = rt.function(b).unwrap();
        assert_eq!(record.version, outcome.version);
        assert_eq!(record.start_position, 28);
        assert_eq!(call(&mut rt, "a"), 10.0);
        assert_eq!(call(&mut rt, "b"), 2.0);
    }

    #[test]
    fn reshaped_nested_function_gets_fresh_record() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script(
                "n.js",
                "function f() { function g() { return 1; } return g; } var old = f();",
            )
            .unwrap();
        rt.run_script(script).unwrap();
        let old_g = rt.script(script).unwrap().records[2];

        let outcome = edit(
            &mut rt,
            script,
            "function f() { function g(x) { return 2; } return g; } var old = f();",
            &[],
        );
        assert_eq!(outcome.created.len(), 1);
        assert_ne!(outcome.records[2], old_g);
        // the old closure keeps running the old code through the old record
        assert_eq!(call(&mut rt, "old"), 1.0);
        assert_eq!(rt.function(old_g).unwrap().param_count, 0);
    }

    #[test]
    fn blocked_targets_become_stale() {
        let mut rt = Runtime::default();
        let script = rt.load_script("s.js", "function f() { return 1; }").unwrap();
        rt.run_script(script).unwrap();
        let f = rt.script(script).unwrap().records[1];
        let before = rt.function(f).unwrap().version;

        let outcome = edit(&mut rt, script, "function f() { return 2; }", &[1]);
        assert!(outcome.replaced.is_empty());
        let record = rt.function(f).unwrap();
        assert!(record.stale);
        assert_eq!(record.version, before);
        assert_eq!(call(&mut rt, "f"), 1.0);
    }

    #[test]
    fn function_escalated_into_blocked_target_gets_fresh_record() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script("e.js", "function f() { function g() { return 1; } return g(); }")
            .unwrap();
        rt.run_script(script).unwrap();
        let old_g = rt.script(script).unwrap().records[2];
        let old_version = rt.function(old_g).unwrap().version;

        let outcome = edit(
            &mut rt,
            script,
            "function f() { function g(x) { return 2; } return g(); }",
            &[1],
        );
        assert!(outcome.replaced.is_empty());
        assert_eq!(outcome.created, vec![outcome.records[2]]);
        assert_ne!(outcome.records[2], old_g);
        assert_eq!(rt.function(outcome.records[2]).unwrap().param_count, 1);

        // the old record is left exactly as it was
        let record = rt.function(old_g).unwrap();
        assert_eq!(record.param_count, 0);
        assert_eq!(record.version, old_version);
        assert_eq!(call(&mut rt, "f"), 1.0);
    }

    #[test]
    fn values_survive_commit() {
        let mut rt = Runtime::default();
        let script = rt.load_script("v.js", "var keep = 7; function f() { return keep; }").unwrap();
        rt.run_script(script).unwrap();
        edit(&mut rt, script, "var keep = 7; function f() { return keep + 1; }", &[]);
        assert_eq!(call(&mut rt, "f"), 8.0);
        assert!(matches!(rt.global("keep"), Some(Value::Number(n)) if *n == 7.0));
    }
}
