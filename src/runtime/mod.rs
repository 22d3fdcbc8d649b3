//! The runtime that live edits are applied to.
//!
//! A [`Runtime`] owns the function table, the loaded scripts with their
//! version history, the globals and any number of execution contexts.
//! Script code runs until it completes or reaches `debugger;`, at which
//! point control returns to the host with the context paused.

pub mod frames;
pub mod function;
mod natives;
pub mod value;
mod vm;

pub use frames::{ContextState, ExecutionContext, Frame, NativeFrame, ScriptFrame};
pub use function::{FunctionTable, InstalledCode, SharedFunctionRecord};
pub use value::{Builtin, Closure, Env, EnvRef, Value};

use crate::analyzer::{self, SourceVersion};
use crate::compiler::{Code, CompileError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MAX_STACK_DEPTH: usize = 512;

macro_rules! handle {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(FunctionId, "fn#");
handle!(ScriptId, "script#");
handle!(VersionId, "v");
handle!(ContextId, "ctx#");

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("{name} is not defined{}", suggestion_hint(.suggestion))]
    UnknownGlobal {
        name: String,
        suggestion: Option<String>,
    },

    #[error("{value} is not a function")]
    NotCallable { value: String },

    #[error("unknown execution context {0}")]
    UnknownContext(ContextId),

    #[error("unknown script {0}")]
    UnknownScript(ScriptId),

    #[error("unknown function {0}")]
    UnknownFunction(FunctionId),

    #[error("no script named `{0}`")]
    UnknownScriptName(String),

    #[error("execution context {0} is not paused")]
    ContextNotPaused(ContextId),

    #[error("execution context {context} has no frame {frame}")]
    UnknownFrame { context: ContextId, frame: usize },

    #[error("cannot restart frame {frame} of {context}: a native frame sits above it")]
    NativeFrameAbove { context: ContextId, frame: usize },

    #[error("maximum call stack depth of {0} exceeded")]
    StackOverflow(usize),

    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean `{name}`?)"),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Value),
    Paused(ContextId),
}

/// A loaded script and its version history, oldest first.
#[derive(Debug)]
pub struct ScriptState {
    pub id: ScriptId,
    pub name: String,
    pub versions: Vec<SourceVersion>,
    /// Record of each descriptor of the current version, by descriptor index.
    pub records: Vec<FunctionId>,
}

impl ScriptState {
    pub fn current(&self) -> &SourceVersion {
        // a script is never created without a version
        &self.versions[self.versions.len() - 1]
    }

    pub fn version(&self, id: VersionId) -> Option<&SourceVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    pub fn root_record(&self) -> FunctionId {
        self.records[0]
    }
}

#[derive(Debug)]
pub struct Runtime {
    pub(crate) functions: FunctionTable,
    pub(crate) scripts: Vec<ScriptState>,
    pub(crate) contexts: BTreeMap<ContextId, ExecutionContext>,
    globals: HashMap<String, Value>,
    output: Vec<String>,
    max_stack_depth: usize,
    next_context: usize,
    next_version: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STACK_DEPTH)
    }
}

impl Runtime {
    pub fn new(max_stack_depth: usize) -> Self {
        let mut globals = HashMap::new();
        for builtin in [Builtin::Print, Builtin::Apply] {
            globals.insert(builtin.name().to_string(), Value::Native(builtin));
        }
        Self {
            functions: FunctionTable::new(),
            scripts: Vec::new(),
            contexts: BTreeMap::new(),
            globals,
            output: Vec::new(),
            max_stack_depth,
            next_context: 0,
            next_version: 0,
        }
    }

    /// Compile `source` and register it as a new script. Nothing runs yet.
    pub fn load_script(&mut self, name: &str, source: &str) -> Result<ScriptId, RuntimeError> {
        let tree = analyzer::analyze(source)?;
        let id = ScriptId(self.scripts.len());
        let version = SourceVersion::new(self.next_version_id(), id, Arc::from(source), tree);
        let records = self
            .functions
            .allocate_tree(version.descriptors(), id, version.id);
        debug!(script = %id, name, functions = records.len(), "loaded script");
        self.scripts.push(ScriptState {
            id,
            name: name.to_string(),
            versions: vec![version],
            records,
        });
        Ok(id)
    }

    /// Run a script's top-level code in a fresh context.
    pub fn run_script(&mut self, script: ScriptId) -> Result<(ContextId, RunOutcome), RuntimeError> {
        let id = self.start_root(script)?;
        let outcome = self.execute(id)?;
        Ok((id, outcome))
    }

    /// Create a context positioned at the start of the script's top-level
    /// code.
    pub(crate) fn start_root(&mut self, script: ScriptId) -> Result<ContextId, RuntimeError> {
        let root = self.script(script)?.root_record();
        let installed = self.installed(root)?;
        let id = self.next_context_id();
        let mut ctx = ExecutionContext::new(id);
        ctx.frames.push(Frame::Script(ScriptFrame {
            function: root,
            code: installed,
            pc: 0,
            env: None,
            closure_env: None,
            args: Vec::new(),
            stack_base: 0,
        }));
        self.contexts.insert(id, ctx);
        Ok(id)
    }

    /// Call a global function in a fresh context.
    pub fn call_global(
        &mut self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<(ContextId, RunOutcome), RuntimeError> {
        let callee = self
            .globals
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown_global(name))?;
        let id = self.next_context_id();
        let mut ctx = ExecutionContext::new(id);
        self.call_value(&mut ctx, callee, args)?;
        self.contexts.insert(id, ctx);
        let outcome = self.execute(id)?;
        Ok((id, outcome))
    }

    /// Continue a paused or suspended context.
    pub fn resume(&mut self, id: ContextId) -> Result<RunOutcome, RuntimeError> {
        let ctx = self.context(id)?;
        if !ctx.is_live() {
            return Err(RuntimeError::ContextNotPaused(id));
        }
        self.execute(id)
    }

    /// Restart the script frame at `index` (0 is the bottom) of a stopped
    /// context. The next [`resume`](Self::resume) runs it from the top.
    ///
    /// Refused when the context is not stopped or has no such frame. A native
    /// frame at or above `index` cannot be unwound, so it refuses too.
    pub fn restart_frame(&mut self, id: ContextId, index: usize) -> Result<(), RuntimeError> {
        let ctx = self.context(id)?;
        if !ctx.is_live() {
            return Err(RuntimeError::ContextNotPaused(id));
        }
        if index >= ctx.frames.len() {
            return Err(RuntimeError::UnknownFrame {
                context: id,
                frame: index,
            });
        }
        if ctx.frames[index..].iter().any(Frame::is_native) {
            return Err(RuntimeError::NativeFrameAbove {
                context: id,
                frame: index,
            });
        }
        self.reenter_frame(id, index)
    }

    /// Re-enter the script frame at `index` from its start with the code
    /// currently installed in its record. Frames above it are discarded.
    /// Arguments are padded with `undefined` or truncated to the new
    /// parameter count and the frame gets a fresh environment.
    pub(crate) fn reenter_frame(&mut self, id: ContextId, index: usize) -> Result<(), RuntimeError> {
        let ctx = self
            .contexts
            .get_mut(&id)
            .ok_or(RuntimeError::UnknownContext(id))?;
        ctx.frames.truncate(index + 1);
        let Some(Frame::Script(frame)) = ctx.frames.get_mut(index) else {
            return Err(RuntimeError::InvalidBytecode(format!(
                "frame {index} of {id} is not a script frame"
            )));
        };
        let record = self
            .functions
            .get(frame.function)
            .ok_or(RuntimeError::UnknownFunction(frame.function))?;
        let installed = Rc::clone(&record.installed);

        ctx.stack.truncate(frame.stack_base);
        frame.args.resize(installed.code.param_count, Value::Undefined);
        if frame.env.is_some() {
            frame.env = Some(new_env(&installed.code, &frame.args, frame.closure_env.clone()));
        }
        frame.code = installed;
        frame.pc = 0;
        debug!(context = %id, function = %frame.function, "restarted frame");
        Ok(())
    }

    pub fn script(&self, id: ScriptId) -> Result<&ScriptState, RuntimeError> {
        self.scripts.get(id.0).ok_or(RuntimeError::UnknownScript(id))
    }

    pub(crate) fn script_mut(&mut self, id: ScriptId) -> Result<&mut ScriptState, RuntimeError> {
        self.scripts
            .get_mut(id.0)
            .ok_or(RuntimeError::UnknownScript(id))
    }

    pub fn script_by_name(&self, name: &str) -> Result<&ScriptState, RuntimeError> {
        self.scripts
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| RuntimeError::UnknownScriptName(name.to_string()))
    }

    pub fn scripts(&self) -> impl Iterator<Item = &ScriptState> {
        self.scripts.iter()
    }

    pub fn context(&self, id: ContextId) -> Result<&ExecutionContext, RuntimeError> {
        self.contexts.get(&id).ok_or(RuntimeError::UnknownContext(id))
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ExecutionContext> {
        self.contexts.values()
    }

    /// The context that most recently stopped at `debugger;`, if it is
    /// still stopped there.
    pub fn paused_context(&self) -> Option<ContextId> {
        self.contexts
            .values()
            .find(|c| c.state == ContextState::Paused)
            .map(|c| c.id)
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn function(&self, id: FunctionId) -> Result<&SharedFunctionRecord, RuntimeError> {
        self.functions.get(id).ok_or(RuntimeError::UnknownFunction(id))
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub(crate) fn next_version_id(&mut self) -> VersionId {
        let id = VersionId(self.next_version);
        self.next_version += 1;
        id
    }

    fn next_context_id(&mut self) -> ContextId {
        let id = ContextId(self.next_context);
        self.next_context += 1;
        id
    }

    fn installed(&self, id: FunctionId) -> Result<Rc<InstalledCode>, RuntimeError> {
        Ok(Rc::clone(&self.function(id)?.installed))
    }

    fn unknown_global(&self, name: &str) -> RuntimeError {
        let suggestion = self
            .globals
            .keys()
            .map(|candidate| (strsim::levenshtein(name, candidate), candidate))
            .filter(|(distance, _)| *distance <= 2)
            .min()
            .map(|(_, candidate)| candidate.clone());
        RuntimeError::UnknownGlobal {
            name: name.to_string(),
            suggestion,
        }
    }
}

/// Fresh environment for a call: parameters from `args`, everything else
/// `undefined`.
pub(crate) fn new_env(code: &Code, args: &[Value], parent: Option<EnvRef>) -> EnvRef {
    let mut slots = vec![Value::Undefined; code.local_count.max(code.param_count)];
    for (slot, arg) in slots.iter_mut().zip(args.iter().take(code.param_count)) {
        *slot = arg.clone();
    }
    Env::new(slots, parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(outcome: RunOutcome) -> Value {
        match outcome {
            RunOutcome::Completed(value) => value,
            RunOutcome::Paused(id) => panic!("unexpected pause in {id}"),
        }
    }

    #[test]
    fn runs_top_level_and_calls_globals() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script("main.js", "function add(a, b) { return a + b; } var r = add(2, 3);")
            .unwrap();
        rt.run_script(script).unwrap();
        assert_eq!(rt.global("r").unwrap().to_number(), 5.0);

        let (_, outcome) = rt
            .call_global("add", vec![Value::from("a"), Value::from("b")])
            .unwrap();
        assert_eq!(completed(outcome).to_string(), "ab");
    }

    #[test]
    fn restart_frame_reruns_from_the_top() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script(
                "r.js",
                "var n = 0;\nfunction f() { n += 1; debugger; return n; }\nvar r = f();",
            )
            .unwrap();
        let (ctx, outcome) = rt.run_script(script).unwrap();
        assert!(matches!(outcome, RunOutcome::Paused(_)));

        rt.restart_frame(ctx, 1).unwrap();
        assert_eq!(rt.context(ctx).unwrap().frames.len(), 2);
        // f runs again from its first statement and stops at the same place
        assert!(matches!(rt.resume(ctx).unwrap(), RunOutcome::Paused(_)));
        completed(rt.resume(ctx).unwrap());
        assert_eq!(rt.global("r").unwrap().to_number(), 2.0);

        let err = rt.restart_frame(ctx, 0).unwrap_err();
        assert!(matches!(err, RuntimeError::ContextNotPaused(_)));
    }

    #[test]
    fn restart_frame_refuses_native_frames_and_bad_indices() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script(
                "n.js",
                "function g() { debugger; }\nfunction f() { apply(g); return 1; }\nf();",
            )
            .unwrap();
        let (ctx, _) = rt.run_script(script).unwrap();
        assert_eq!(rt.context(ctx).unwrap().frames.len(), 4);

        let err = rt.restart_frame(ctx, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::NativeFrameAbove { frame: 1, .. }));
        let err = rt.restart_frame(ctx, 2).unwrap_err();
        assert!(matches!(err, RuntimeError::NativeFrameAbove { frame: 2, .. }));
        let err = rt.restart_frame(ctx, 9).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownFrame { frame: 9, .. }));
        assert_eq!(rt.context(ctx).unwrap().frames.len(), 4);

        // the paused frame itself can always be restarted
        rt.restart_frame(ctx, 3).unwrap();
        assert!(matches!(rt.resume(ctx).unwrap(), RunOutcome::Paused(_)));
    }

    #[test]
    fn closures_capture_environment() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script(
                "counter.js",
                "function counter() { var n = 0; return function () { n += 1; return n; }; }\n\
                 var c = counter(); c(); var r = c();",
            )
            .unwrap();
        rt.run_script(script).unwrap();
        assert_eq!(rt.global("r").unwrap().to_number(), 2.0);
    }

    #[test]
    fn control_flow() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script(
                "loop.js",
                "var i = 0; var s = 0;\n\
                 while (i < 5) { if (i % 2 == 0) { s += i; } else { s -= 1; } i++; }\n\
                 var t = s > 3 ? 'big' : 'small';\n\
                 var u = null || 'fallback';\n\
                 var v = 0 && missing();",
            )
            .unwrap();
        rt.run_script(script).unwrap();
        assert_eq!(rt.global("s").unwrap().to_number(), 4.0);
        assert_eq!(rt.global("t").unwrap().to_string(), "big");
        assert_eq!(rt.global("u").unwrap().to_string(), "fallback");
        assert_eq!(rt.global("v").unwrap().to_number(), 0.0);
    }

    #[test]
    fn debugger_pauses_and_resumes() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script("pause.js", "var a = 1; debugger; a = 2;")
            .unwrap();
        let (ctx, outcome) = rt.run_script(script).unwrap();
        assert!(matches!(outcome, RunOutcome::Paused(id) if id == ctx));
        assert_eq!(rt.global("a").unwrap().to_number(), 1.0);
        assert_eq!(rt.paused_context(), Some(ctx));

        rt.resume(ctx).unwrap();
        assert_eq!(rt.global("a").unwrap().to_number(), 2.0);
        assert_eq!(rt.context(ctx).unwrap().state, ContextState::Finished);
        assert!(matches!(
            rt.resume(ctx),
            Err(RuntimeError::ContextNotPaused(_))
        ));
    }

    #[test]
    fn later_pause_suspends_earlier_context() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script("p.js", "function f() { debugger; return 1; }")
            .unwrap();
        rt.run_script(script).unwrap();
        let (first, _) = rt.call_global("f", vec![]).unwrap();
        let (second, _) = rt.call_global("f", vec![]).unwrap();
        assert_eq!(rt.context(first).unwrap().state, ContextState::Suspended);
        assert_eq!(rt.paused_context(), Some(second));
    }

    #[test]
    fn apply_inserts_native_frame() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script(
                "apply.js",
                "function g(x) { debugger; return x * 2; } var r = apply(g, 21);",
            )
            .unwrap();
        let (ctx, _) = rt.run_script(script).unwrap();
        let frames = &rt.context(ctx).unwrap().frames;
        assert_eq!(frames.len(), 3);
        assert!(frames[1].is_native());

        rt.resume(ctx).unwrap();
        assert_eq!(rt.global("r").unwrap().to_number(), 42.0);
    }

    #[test]
    fn print_collects_output() {
        let mut rt = Runtime::default();
        let script = rt
            .load_script("print.js", "print('x =', 1 + 1, true);")
            .unwrap();
        rt.run_script(script).unwrap();
        assert_eq!(rt.take_output(), vec!["x = 2 true".to_string()]);
    }

    #[test]
    fn unknown_global_suggests_close_name() {
        let mut rt = Runtime::default();
        let script = rt.load_script("typo.js", "prnt('hi');").unwrap();
        let err = rt.run_script(script).unwrap_err();
        assert_eq!(
            err.to_string(),
            "prnt is not defined (did you mean `print`?)"
        );
    }

    #[test]
    fn recursion_limit() {
        let mut rt = Runtime::new(16);
        let script = rt
            .load_script("rec.js", "function f() { return f(); } f();")
            .unwrap();
        assert!(matches!(
            rt.run_script(script),
            Err(RuntimeError::StackOverflow(16))
        ));
    }
}
