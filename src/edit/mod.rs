//! The live-edit pipeline: diff, analyze, plan, check activations, replace.
//!
//! A request runs to completion without yielding. Failures that concern
//! single functions (blocked activations, refused drops, unmatched
//! functions) are reported per function; only request-level problems are
//! returned as [`LiveEditError`].

mod report;
mod request;

pub use report::{FunctionReport, PatchIssue, PatchOutcome, PatchReport};
pub use request::{EditOptions, EditRequest, SourceVerification};

use crate::analyzer::{self, SourceVersion};
use crate::config::LiveEditConfig;
use crate::diff::{compare_strings_with_limit, texts_identical};
use crate::planner::{self, PatchPlan, PlanReason};
use crate::replace;
use crate::runtime::{FunctionId, RunOutcome, Runtime, RuntimeError, ScriptId, VersionId};
use crate::safety::{self, ActivationReport};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LiveEditError {
    #[error("edit against {requested} of {script}, but the current version is {current}")]
    StaleVersion {
        script: ScriptId,
        requested: VersionId,
        current: VersionId,
    },

    #[error("old source of {script} does not match the expected text")]
    SourceMismatch { script: ScriptId },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A runtime together with the defaults edits are submitted with.
#[derive(Debug)]
pub struct LiveEditor {
    runtime: Runtime,
    config: LiveEditConfig,
}

impl Default for LiveEditor {
    fn default() -> Self {
        Self::new(LiveEditConfig::default())
    }
}

impl LiveEditor {
    pub fn new(config: LiveEditConfig) -> Self {
        Self {
            runtime: Runtime::new(config.runtime.max_stack_depth),
            config,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn config(&self) -> &LiveEditConfig {
        &self.config
    }

    pub fn default_options(&self) -> EditOptions {
        EditOptions::from_config(&self.config)
    }

    /// Current version of `script`.
    pub fn current_version(&self, script: ScriptId) -> Result<VersionId, LiveEditError> {
        Ok(self.runtime.script(script)?.current().id)
    }

    /// Replace the current source of `script` with `new_source` using the
    /// configured defaults.
    pub fn edit_script(
        &mut self,
        script: ScriptId,
        new_source: &str,
    ) -> Result<PatchReport, LiveEditError> {
        let request = EditRequest::new(script, self.current_version(script)?, new_source);
        let options = self.default_options();
        self.submit_edit(request, &options)
    }

    pub fn submit_edit(
        &mut self,
        request: EditRequest,
        options: &EditOptions,
    ) -> Result<PatchReport, LiveEditError> {
        let script = request.script;
        let old = self.runtime.script(script)?.current().clone();
        if request.old_version != old.id {
            return Err(LiveEditError::StaleVersion {
                script,
                requested: request.old_version,
                current: old.id,
            });
        }
        if let Some(expected) = &request.expected_old {
            if !expected.matches(&old.source) {
                return Err(LiveEditError::SourceMismatch { script });
            }
        }

        let stale = self.stale_descriptors(script)?;
        let identical = texts_identical(&old.source, &request.new_source);
        if identical && stale.is_empty() {
            debug!(%script, "no changes detected");
            return Ok(PatchReport::empty(
                PatchOutcome::NoChangesDetected,
                script,
                old.id,
            ));
        }

        let new_tree = match analyzer::analyze(&request.new_source) {
            Ok(tree) => tree,
            Err(error) => {
                warn!(%script, %error, "new source does not compile");
                let mut report = PatchReport::empty(PatchOutcome::CompileError, script, old.id);
                report.compile_error = Some(error);
                return Ok(report);
            }
        };

        let chunks = if identical {
            Vec::new()
        } else {
            compare_strings_with_limit(&old.source, &request.new_source, options.fine_diff_limit)
        };
        debug!(%script, chunks = chunks.len(), stale = stale.len(), "diffed sources");
        let plan = planner::plan(&old.tree, &new_tree, &chunks, &stale);

        let records = self.runtime.script(script)?.records.clone();
        let target_records: BTreeSet<FunctionId> =
            plan.targets.iter().map(|&t| records[t]).collect();
        let requesting = options
            .requesting_context
            .or_else(|| self.runtime.paused_context());
        let activation = safety::check_activations(
            &self.runtime,
            &target_records,
            requesting,
            options.do_drop,
        );
        let blocked: BTreeSet<usize> = plan
            .targets
            .iter()
            .copied()
            .filter(|&t| activation.status(records[t]).is_blocked())
            .collect();

        let mut report = PatchReport::empty(PatchOutcome::Success, script, old.id);
        report.chunks = chunks;
        report.dry_run = options.dry_run;
        report.functions = function_reports(&old, &plan, &records, &activation);
        report.outcome = if blocked.is_empty() {
            PatchOutcome::Success
        } else if blocked.len() == plan.targets.len() {
            PatchOutcome::Blocked
        } else {
            PatchOutcome::PartialSuccess
        };

        report.dropped_frames = activation.dropped_frames.clone();
        if options.dry_run || report.outcome == PatchOutcome::Blocked {
            if report.outcome == PatchOutcome::Blocked {
                warn!(%script, targets = plan.targets.len(), "every target is blocked");
            }
            return Ok(report);
        }

        let version = SourceVersion::new(
            self.runtime.next_version_id(),
            script,
            Arc::from(request.new_source.as_str()),
            new_tree,
        );
        let committed = replace::commit(&mut self.runtime, script, version, &plan, &blocked)?;
        report.new_version = Some(committed.version);
        for function in &mut report.functions {
            let target = plan.entry(function.old_index).map_or(function.old_index, |e| e.target);
            function.replaced = committed.replaced.contains_key(&target);
            function.new_record = function.new_index.map(|n| committed.records[n]);
        }

        let root_restarted = match activation.drop {
            Some(drop) => {
                safety::perform_drop(&mut self.runtime, drop)?;
                drop.frame == 0
            }
            None => false,
        };

        if committed.replaced.contains_key(&0) && !root_restarted && options.rerun_top_level {
            let context = self.runtime.start_root(script)?;
            report.rerun_context = Some(context);
            match self.runtime.execute(context) {
                Ok(RunOutcome::Paused(_)) => debug!(%context, "re-run paused"),
                Ok(RunOutcome::Completed(_)) => debug!(%context, "re-run completed"),
                Err(error) => {
                    warn!(%context, %error, "re-run of top-level code failed");
                    report.rerun_error = Some(error.to_string());
                }
            }
        }

        info!(
            %script,
            outcome = %report.outcome,
            replaced = committed.replaced.len(),
            "live edit finished"
        );
        Ok(report)
    }

    /// Descriptor indices of the current version whose records still run
    /// code an earlier edit could not replace.
    fn stale_descriptors(&self, script: ScriptId) -> Result<BTreeSet<usize>, RuntimeError> {
        let state = self.runtime.script(script)?;
        let mut stale = BTreeSet::new();
        for (index, &id) in state.records.iter().enumerate() {
            if self.runtime.function(id)?.stale {
                stale.insert(index);
            }
        }
        Ok(stale)
    }
}

fn function_reports(
    old: &SourceVersion,
    plan: &PatchPlan,
    records: &[FunctionId],
    activation: &ActivationReport,
) -> Vec<FunctionReport> {
    plan.entries
        .values()
        .map(|entry| {
            let target_record = records[entry.target];
            let status = activation.status(target_record);
            let mut issues = Vec::new();
            if entry.reason == PlanReason::NoMatchingFunction {
                issues.push(PatchIssue::NoMatchingFunction);
            }
            if status.is_blocked() {
                issues.push(PatchIssue::BlockedActivation);
            }
            if activation.unsafe_drop.contains(&target_record) {
                issues.push(PatchIssue::UnsafeDrop);
            }
            FunctionReport {
                name: old.tree.functions[entry.old_index].display_name().to_string(),
                old_index: entry.old_index,
                new_index: entry.new_index,
                record: records[entry.old_index],
                new_record: None,
                directly_patchable: entry.directly_patchable,
                reason: entry.reason,
                status,
                replaced: false,
                issues,
            }
        })
        .collect()
}
