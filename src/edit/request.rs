use crate::analyzer::source_hash;
use crate::config::LiveEditConfig;
use crate::runtime::{ContextId, ScriptId, VersionId};
use serde::Serialize;

/// A request to replace a script's source while it runs.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub script: ScriptId,
    /// Version the edit was made against; must be the script's current one.
    pub old_version: VersionId,
    pub new_source: String,
    /// What the caller believes the old source is.
    pub expected_old: Option<SourceVerification>,
}

impl EditRequest {
    pub fn new(script: ScriptId, old_version: VersionId, new_source: impl Into<String>) -> Self {
        Self {
            script,
            old_version,
            new_source: new_source.into(),
            expected_old: None,
        }
    }

    pub fn with_verification(mut self, expected_old: SourceVerification) -> Self {
        self.expected_old = Some(expected_old);
        self
    }
}

/// The caller's copy of the old source, checked against the current version
/// so an edit made from an outdated buffer is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SourceVerification {
    ExactMatch(String),
    /// xxh3 digest, as stored in [`SourceVersion::hash`](crate::analyzer::SourceVersion).
    Hash(u64),
}

impl SourceVerification {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            SourceVerification::ExactMatch(expected) => text == expected,
            SourceVerification::Hash(digest) => source_hash(text) == *digest,
        }
    }

    /// Scripts up to 1 KiB are kept verbatim; anything longer is reduced
    /// to its digest.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            SourceVerification::Hash(source_hash(text))
        } else {
            SourceVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOptions {
    /// Drop and restart frames blocking a patch on the requesting stack.
    pub do_drop: bool,
    /// Re-run top-level code in a fresh context when the root is patched
    /// and not restarted by a drop.
    pub rerun_top_level: bool,
    /// Plan and check only; nothing is mutated.
    pub dry_run: bool,
    /// Context the edit is issued from. Defaults to the paused context.
    pub requesting_context: Option<ContextId>,
    pub fine_diff_limit: usize,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self::from_config(&LiveEditConfig::default())
    }
}

impl EditOptions {
    pub fn from_config(config: &LiveEditConfig) -> Self {
        Self {
            do_drop: config.edit.do_drop,
            rerun_top_level: config.edit.rerun_top_level,
            dry_run: false,
            requesting_context: None,
            fine_diff_limit: config.diff.fine_diff_limit,
        }
    }

    pub fn with_drop(mut self, do_drop: bool) -> Self {
        self.do_drop = do_drop;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn requesting(mut self, context: ContextId) -> Self {
        self.requesting_context = Some(context);
        self
    }
}
