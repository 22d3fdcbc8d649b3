use crate::compiler::CompileError;
use crate::diff::DiffChunk;
use crate::planner::PlanReason;
use crate::runtime::{ContextId, FunctionId, ScriptId, VersionId};
use crate::safety::{DroppedFrame, PatchabilityStatus};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchOutcome {
    Success,
    /// Some targets were replaced, others are blocked and stale.
    PartialSuccess,
    /// Every target is blocked; nothing was committed.
    Blocked,
    CompileError,
    NoChangesDetected,
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchOutcome::Success => "success",
            PatchOutcome::PartialSuccess => "partial success",
            PatchOutcome::Blocked => "blocked",
            PatchOutcome::CompileError => "compile error",
            PatchOutcome::NoChangesDetected => "no changes detected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchIssue {
    NoMatchingFunction,
    BlockedActivation,
    UnsafeDrop,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionReport {
    pub name: String,
    pub old_index: usize,
    pub new_index: Option<usize>,
    pub record: FunctionId,
    /// Record bound to the new descriptor after commit.
    pub new_record: Option<FunctionId>,
    pub directly_patchable: bool,
    pub reason: PlanReason,
    pub status: PatchabilityStatus,
    pub replaced: bool,
    pub issues: Vec<PatchIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    pub outcome: PatchOutcome,
    pub script: ScriptId,
    pub old_version: VersionId,
    pub new_version: Option<VersionId>,
    pub dry_run: bool,
    pub chunks: Vec<DiffChunk>,
    pub functions: Vec<FunctionReport>,
    pub dropped_frames: Vec<DroppedFrame>,
    pub rerun_context: Option<ContextId>,
    pub rerun_error: Option<String>,
    pub compile_error: Option<CompileError>,
}

impl PatchReport {
    pub(crate) fn empty(outcome: PatchOutcome, script: ScriptId, old_version: VersionId) -> Self {
        Self {
            outcome,
            script,
            old_version,
            new_version: None,
            dry_run: false,
            chunks: Vec::new(),
            functions: Vec::new(),
            dropped_frames: Vec::new(),
            rerun_context: None,
            rerun_error: None,
            compile_error: None,
        }
    }

    /// First report entry for a function named `name`.
    pub fn function(&self, name: &str) -> Option<&FunctionReport> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn replaced_count(&self) -> usize {
        self.functions
            .iter()
            .filter(|f| f.replaced && f.directly_patchable)
            .count()
    }
}

impl fmt::Display for PatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.script, self.outcome)?;
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        match self.new_version {
            Some(new) => writeln!(f, " [{} -> {}]", self.old_version, new)?,
            None => writeln!(f, " [{}]", self.old_version)?,
        }
        if let Some(error) = &self.compile_error {
            writeln!(f, "  {error}")?;
        }
        for function in &self.functions {
            write!(
                f,
                "  {} ({}): {}",
                function.name, function.record, function.status
            )?;
            if !function.directly_patchable {
                write!(f, ", via enclosing function ({:?})", function.reason)?;
            }
            if function.replaced {
                write!(f, ", replaced")?;
            }
            for issue in &function.issues {
                write!(f, ", {issue:?}")?;
            }
            writeln!(f)?;
        }
        for frame in &self.dropped_frames {
            writeln!(
                f,
                "  dropped frame {} of {}: {}{}",
                frame.depth,
                frame.context,
                frame.name,
                if frame.restarted { " (restarted)" } else { "" }
            )?;
        }
        Ok(())
    }
}
