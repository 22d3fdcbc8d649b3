//! Live editing of running scripts.
//!
//! Source text of a loaded script can be replaced while the script runs.
//! The compiled code of affected functions is swapped in place, so existing
//! closures pick up the change on their next call.
//!
//! # Architecture
//!
//! One edit flows through five stages:
//!
//! 1. [`diff`]: line diff refined by a token diff inside changed lines
//! 2. [`analyzer`]: descriptor trees of the old and new source
//! 3. [`planner`]: innermost function per change, old/new matching,
//!    escalation to an enclosing function when the signature or scope
//!    layout changed
//! 4. [`safety`]: classification of targets against live call stacks,
//!    optional drop-and-restart of the requesting stack
//! 5. [`replace`]: code swap in the shared function records
//!
//! [`edit::LiveEditor`] runs the whole pipeline against a [`runtime::Runtime`].
//!
//! # Example
//!
//! ```no_run
//! use live_edit::edit::{LiveEditor, PatchOutcome};
//! use live_edit::runtime::RunOutcome;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut editor = LiveEditor::default();
//! let script = editor
//!     .runtime_mut()
//!     .load_script("main.js", "function f() { return 1; } f();")?;
//! editor.runtime_mut().run_script(script)?;
//!
//! let report = editor.edit_script(script, "function f() { return 2; } f();")?;
//! assert_eq!(report.outcome, PatchOutcome::Success);
//!
//! let (_, outcome) = editor.runtime_mut().call_global("f", vec![])?;
//! assert!(matches!(outcome, RunOutcome::Completed(v) if v.to_number() == 2.0));
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod diff;
pub mod edit;
pub mod planner;
pub mod pool;
pub mod replace;
pub mod runtime;
pub mod safety;

// Re-exports
pub use analyzer::{analyze, SourceVersion};
pub use compiler::{compile, CompileError, CompiledScript, FunctionDescriptor};
pub use config::{load_from_path, load_from_str, ConfigError, LiveEditConfig};
pub use diff::{compare_strings, DiffChunk, Input, Output};
pub use edit::{
    EditOptions, EditRequest, FunctionReport, LiveEditError, LiveEditor, PatchIssue,
    PatchOutcome, PatchReport,
};
pub use planner::{PatchPlan, PlanEntry, PlanReason};
pub use runtime::{FunctionId, Runtime, RuntimeError, SharedFunctionRecord};
pub use safety::{DroppedFrame, PatchabilityStatus};
