//! Execution contexts and their call frames.

use super::function::InstalledCode;
use super::value::{EnvRef, Value};
use super::{ContextId, FunctionId};
use serde::Serialize;
use std::rc::Rc;

/// An activation of a script function.
#[derive(Debug, Clone)]
pub struct ScriptFrame {
    pub function: FunctionId,
    /// Code snapshot taken at entry; a patch does not affect running frames.
    pub code: Rc<InstalledCode>,
    pub pc: usize,
    /// Own environment; `None` for top-level code, which uses globals.
    pub env: Option<EnvRef>,
    /// Environment the closure captured, parent of `env`.
    pub closure_env: Option<EnvRef>,
    /// Arguments as passed, kept for restarts.
    pub args: Vec<Value>,
    /// Operand stack height at entry.
    pub stack_base: usize,
}

/// A trusted native caller between script frames.
#[derive(Debug, Clone)]
pub struct NativeFrame {
    pub name: &'static str,
    pub stack_base: usize,
}

#[derive(Debug, Clone)]
pub enum Frame {
    Script(ScriptFrame),
    Native(NativeFrame),
}

impl Frame {
    pub fn function(&self) -> Option<FunctionId> {
        match self {
            Frame::Script(frame) => Some(frame.function),
            Frame::Native(_) => None,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Frame::Native(_))
    }

    pub fn stack_base(&self) -> usize {
        match self {
            Frame::Script(frame) => frame.stack_base,
            Frame::Native(frame) => frame.stack_base,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Running,
    /// Stopped at `debugger;`; the most recent pause.
    Paused,
    /// Stopped at `debugger;` while another context paused later.
    Suspended,
    Finished,
}

/// One independent call stack.
#[derive(Debug)]
pub struct ExecutionContext {
    pub id: ContextId,
    /// Bottom first.
    pub frames: Vec<Frame>,
    pub stack: Vec<Value>,
    pub state: ContextState,
    pub result: Option<Value>,
}

impl ExecutionContext {
    pub fn new(id: ContextId) -> Self {
        Self {
            id,
            frames: Vec::new(),
            stack: Vec::new(),
            state: ContextState::Running,
            result: None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, ContextState::Paused | ContextState::Suspended)
    }

    pub fn script_depth(&self) -> usize {
        self.frames.iter().filter(|f| !f.is_native()).count()
    }

    /// Functions on the stack from the top down, with frame indices.
    pub fn walk_from_top(&self) -> impl Iterator<Item = (usize, &Frame)> {
        self.frames.iter().enumerate().rev()
    }
}
