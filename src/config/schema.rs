use crate::diff::DEFAULT_FINE_DIFF_LIMIT;
use crate::runtime::DEFAULT_MAX_STACK_DEPTH;
use serde::Deserialize;
use std::fmt;

/// Contents of `live-edit.toml`. Every section and key is optional.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LiveEditConfig {
    #[serde(default)]
    pub edit: EditSettings,
    #[serde(default)]
    pub diff: DiffSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl LiveEditConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.diff.fine_diff_limit == 0 {
            issues.push(ValidationIssue::OutOfRange {
                field: "diff.fine_diff_limit",
                message: "must be at least 1".to_string(),
            });
        }
        if self.runtime.max_stack_depth == 0 {
            issues.push(ValidationIssue::OutOfRange {
                field: "runtime.max_stack_depth",
                message: "must be at least 1".to_string(),
            });
        }
        if self.runtime.max_stack_depth > MAX_STACK_DEPTH_LIMIT {
            issues.push(ValidationIssue::OutOfRange {
                field: "runtime.max_stack_depth",
                message: format!("must not exceed {MAX_STACK_DEPTH_LIMIT}"),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

pub const MAX_STACK_DEPTH_LIMIT: usize = 100_000;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EditSettings {
    /// Drop and restart frames that block a patch on the requesting stack.
    #[serde(default)]
    pub do_drop: bool,
    /// Re-run top-level code after the root script is patched.
    #[serde(default = "default_true")]
    pub rerun_top_level: bool,
}

impl Default for EditSettings {
    fn default() -> Self {
        Self {
            do_drop: false,
            rerun_top_level: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DiffSettings {
    /// Changed regions longer than this many bytes skip the token pass.
    #[serde(default = "default_fine_diff_limit")]
    pub fine_diff_limit: usize,
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            fine_diff_limit: DEFAULT_FINE_DIFF_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSettings {
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_fine_diff_limit() -> usize {
    DEFAULT_FINE_DIFF_LIMIT
}

fn default_max_stack_depth() -> usize {
    DEFAULT_MAX_STACK_DEPTH
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    OutOfRange {
        field: &'static str,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::OutOfRange { field, message } => {
                write!(f, "'{field}' {message}")
            }
        }
    }
}
