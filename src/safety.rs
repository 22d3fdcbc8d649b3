//! Activation safety: may a function's code be replaced right now?
//!
//! Every target is classified against the live call stacks. The requesting
//! context is walked from the top down and the first frame running a target
//! fixes its status; any frame on another live context blocks the target
//! outright. With `do_drop`, frames of the requesting context down to the
//! lowest blocking frame are discarded and that frame is re-entered once the
//! new code is installed. Locals of dropped frames are lost; every dropped
//! frame is reported.

use crate::runtime::{ContextId, Frame, FunctionId, Runtime, RuntimeError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchabilityStatus {
    Available,
    BlockedActiveStack,
    BlockedOtherStack,
    BlockedNativeFrame,
    ReplacedActiveStack,
}

impl PatchabilityStatus {
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            PatchabilityStatus::BlockedActiveStack
                | PatchabilityStatus::BlockedOtherStack
                | PatchabilityStatus::BlockedNativeFrame
        )
    }
}

impl fmt::Display for PatchabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchabilityStatus::Available => "available",
            PatchabilityStatus::BlockedActiveStack => "blocked (active stack)",
            PatchabilityStatus::BlockedOtherStack => "blocked (other stack)",
            PatchabilityStatus::BlockedNativeFrame => "blocked (native frame)",
            PatchabilityStatus::ReplacedActiveStack => "replaced (active stack)",
        })
    }
}

/// A frame discarded by drop-and-restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedFrame {
    pub context: ContextId,
    /// `None` for native frames.
    pub function: Option<FunctionId>,
    pub name: String,
    /// Frame index, 0 = bottom of the stack.
    pub depth: usize,
    /// The lowest dropped frame is re-entered instead of discarded.
    pub restarted: bool,
}

/// Frames of `context` above `frame` are discarded and `frame` restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DropPlan {
    pub context: ContextId,
    pub frame: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub statuses: BTreeMap<FunctionId, PatchabilityStatus>,
    /// Targets for which a requested drop was refused.
    pub unsafe_drop: BTreeSet<FunctionId>,
    pub drop: Option<DropPlan>,
    pub dropped_frames: Vec<DroppedFrame>,
}

impl ActivationReport {
    pub fn status(&self, function: FunctionId) -> PatchabilityStatus {
        self.statuses
            .get(&function)
            .copied()
            .unwrap_or(PatchabilityStatus::Available)
    }

    pub fn all_blocked(&self) -> bool {
        !self.statuses.is_empty() && self.statuses.values().all(|s| s.is_blocked())
    }
}

/// Classify `targets` against every live stack. Read-only: the drop, if
/// any, is described in the report and carried out by [`perform_drop`].
pub fn check_activations(
    runtime: &Runtime,
    targets: &BTreeSet<FunctionId>,
    requesting: Option<ContextId>,
    do_drop: bool,
) -> ActivationReport {
    let mut report = ActivationReport {
        statuses: targets
            .iter()
            .map(|&t| (t, PatchabilityStatus::Available))
            .collect(),
        ..ActivationReport::default()
    };
    let mut lowest: BTreeMap<FunctionId, usize> = BTreeMap::new();

    let requesting_ctx = requesting.and_then(|id| runtime.context(id).ok()).filter(|c| c.is_live());
    if let Some(ctx) = requesting_ctx {
        let mut below_native = false;
        for (index, frame) in ctx.walk_from_top() {
            let function = match frame {
                Frame::Native(_) => {
                    below_native = true;
                    continue;
                }
                Frame::Script(frame) => frame.function,
            };
            let Some(status) = report.statuses.get_mut(&function) else {
                continue;
            };
            lowest.insert(function, index);
            if *status == PatchabilityStatus::Available {
                *status = if below_native {
                    PatchabilityStatus::BlockedNativeFrame
                } else {
                    PatchabilityStatus::BlockedActiveStack
                };
            }
        }
    }

    for ctx in runtime.contexts() {
        if Some(ctx.id) == requesting_ctx.map(|c| c.id) || !ctx.is_live() {
            continue;
        }
        for frame in &ctx.frames {
            let Some(status) = frame.function().and_then(|f| report.statuses.get_mut(&f)) else {
                continue;
            };
            if matches!(
                *status,
                PatchabilityStatus::Available | PatchabilityStatus::BlockedActiveStack
            ) {
                *status = PatchabilityStatus::BlockedOtherStack;
            }
        }
    }

    if do_drop {
        plan_drop(&mut report, requesting_ctx.map(|c| (c.id, &c.frames[..])), &lowest);
        for dropped in &mut report.dropped_frames {
            if let Some(record) = dropped.function.and_then(|f| runtime.function(f).ok()) {
                dropped.name = record.display_name().to_string();
            }
        }
    }

    for (function, status) in &report.statuses {
        if status.is_blocked() {
            warn!(%function, %status, "function is blocked by a live activation");
        }
    }
    report
}

fn plan_drop(
    report: &mut ActivationReport,
    requesting: Option<(ContextId, &[Frame])>,
    lowest: &BTreeMap<FunctionId, usize>,
) {
    let active: Vec<FunctionId> = report
        .statuses
        .iter()
        .filter(|(_, s)| **s == PatchabilityStatus::BlockedActiveStack)
        .map(|(&f, _)| f)
        .collect();

    if let (Some((context, frames)), false) = (requesting, active.is_empty()) {
        let bottom = active
            .iter()
            .filter_map(|f| lowest.get(f))
            .copied()
            .min()
            .unwrap_or(0);
        let native_above = frames.iter().skip(bottom + 1).any(Frame::is_native);
        if native_above {
            // a deeper activation sits below a native caller
            for f in active {
                report
                    .statuses
                    .insert(f, PatchabilityStatus::BlockedNativeFrame);
            }
        } else {
            for f in active {
                report
                    .statuses
                    .insert(f, PatchabilityStatus::ReplacedActiveStack);
            }
            report.drop = Some(DropPlan {
                context,
                frame: bottom,
            });
            report.dropped_frames = frames
                .iter()
                .enumerate()
                .skip(bottom)
                .rev()
                .map(|(depth, frame)| DroppedFrame {
                    context,
                    function: frame.function(),
                    name: match frame {
                        Frame::Native(native) => native.name.to_string(),
                        Frame::Script(_) => String::new(),
                    },
                    depth,
                    restarted: depth == bottom,
                })
                .collect();
        }
    }

    for (&function, status) in &report.statuses {
        if matches!(
            status,
            PatchabilityStatus::BlockedOtherStack | PatchabilityStatus::BlockedNativeFrame
        ) {
            warn!(%function, %status, "refusing to drop frames");
            report.unsafe_drop.insert(function);
        }
    }
}

/// Carry out a planned drop: discard the frames above the restart frame and
/// re-enter it with the code now installed in its record.
pub fn perform_drop(runtime: &mut Runtime, plan: DropPlan) -> Result<(), RuntimeError> {
    debug!(context = %plan.context, frame = plan.frame, "dropping frames");
    runtime.reenter_frame(plan.context, plan.frame)
}
