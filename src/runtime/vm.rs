//! Bytecode interpreter.

use super::frames::{ContextState, ExecutionContext, Frame, ScriptFrame};
use super::value::{env_at, Closure, Value};
use super::{new_env, ContextId, RunOutcome, Runtime, RuntimeError};
use crate::compiler::{BinaryOp, Constant, Op, UnaryOp};
use std::rc::Rc;

fn top_script(frames: &mut [Frame]) -> Result<&mut ScriptFrame, RuntimeError> {
    match frames.last_mut() {
        Some(Frame::Script(frame)) => Ok(frame),
        _ => Err(RuntimeError::InvalidBytecode(
            "no script frame on top of the stack".to_string(),
        )),
    }
}

fn pop(ctx: &mut ExecutionContext) -> Result<Value, RuntimeError> {
    ctx.stack
        .pop()
        .ok_or_else(|| RuntimeError::InvalidBytecode("operand stack underflow".to_string()))
}

impl Runtime {
    /// Run a context until it completes, pauses or fails. A failed context
    /// is finished and its frames are discarded.
    pub(crate) fn execute(&mut self, id: ContextId) -> Result<RunOutcome, RuntimeError> {
        let mut ctx = self
            .contexts
            .remove(&id)
            .ok_or(RuntimeError::UnknownContext(id))?;
        ctx.state = ContextState::Running;

        let result = self.run(&mut ctx);
        match &result {
            Ok(RunOutcome::Paused(_)) => {
                for other in self.contexts.values_mut() {
                    if other.state == ContextState::Paused {
                        other.state = ContextState::Suspended;
                    }
                }
                ctx.state = ContextState::Paused;
            }
            Ok(RunOutcome::Completed(value)) => {
                ctx.state = ContextState::Finished;
                ctx.result = Some(value.clone());
            }
            Err(_) => {
                ctx.state = ContextState::Finished;
                ctx.frames.clear();
                ctx.stack.clear();
            }
        }
        self.contexts.insert(id, ctx);
        result
    }

    fn run(&mut self, ctx: &mut ExecutionContext) -> Result<RunOutcome, RuntimeError> {
        loop {
            if ctx.frames.is_empty() {
                return Ok(RunOutcome::Completed(ctx.stack.pop().unwrap_or_default()));
            }
            let frame = top_script(&mut ctx.frames)?;
            let op = frame.code.code.ops.get(frame.pc).copied().ok_or_else(|| {
                RuntimeError::InvalidBytecode(format!("pc {} out of range", frame.pc))
            })?;
            frame.pc += 1;

            match op {
                Op::Constant(idx) => {
                    let value = match frame.code.code.constant(idx) {
                        Some(Constant::Number(n)) => Value::Number(*n),
                        Some(Constant::Str(s)) => Value::Str(Rc::from(s.as_ref())),
                        None => {
                            return Err(RuntimeError::InvalidBytecode(format!(
                                "constant {idx} out of range"
                            )))
                        }
                    };
                    ctx.stack.push(value);
                }
                Op::Undefined => ctx.stack.push(Value::Undefined),
                Op::Null => ctx.stack.push(Value::Null),
                Op::True => ctx.stack.push(Value::Bool(true)),
                Op::False => ctx.stack.push(Value::Bool(false)),
                Op::LoadLocal { depth, slot } => {
                    let env = frame
                        .env
                        .as_ref()
                        .and_then(|env| env_at(env, depth))
                        .ok_or_else(|| {
                            RuntimeError::InvalidBytecode(format!("no environment at depth {depth}"))
                        })?;
                    let value = env.borrow().slots.get(slot as usize).cloned();
                    ctx.stack.push(value.unwrap_or_default());
                }
                Op::StoreLocal { depth, slot } => {
                    let env = frame
                        .env
                        .as_ref()
                        .and_then(|env| env_at(env, depth))
                        .ok_or_else(|| {
                            RuntimeError::InvalidBytecode(format!("no environment at depth {depth}"))
                        })?;
                    let value = ctx.stack.last().cloned().unwrap_or_default();
                    let mut env = env.borrow_mut();
                    let slot = slot as usize;
                    if slot >= env.slots.len() {
                        env.slots.resize(slot + 1, Value::Undefined);
                    }
                    env.slots[slot] = value;
                }
                Op::LoadGlobal(idx) => {
                    let name = global_name(frame, idx)?;
                    let value = self
                        .globals
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| self.unknown_global(&name))?;
                    ctx.stack.push(value);
                }
                Op::StoreGlobal(idx) => {
                    let name = global_name(frame, idx)?;
                    let value = ctx.stack.last().cloned().unwrap_or_default();
                    self.globals.insert(name, value);
                }
                Op::Closure(n) => {
                    let function = frame.code.nested.get(n as usize).copied().ok_or_else(|| {
                        RuntimeError::InvalidBytecode(format!("nested function {n} not linked"))
                    })?;
                    let env = frame.env.clone();
                    ctx.stack
                        .push(Value::Closure(Rc::new(Closure { function, env })));
                }
                Op::Call(argc) => {
                    let argc = argc as usize;
                    if ctx.stack.len() < argc + 1 {
                        return Err(RuntimeError::InvalidBytecode(
                            "operand stack underflow".to_string(),
                        ));
                    }
                    let args = ctx.stack.split_off(ctx.stack.len() - argc);
                    let callee = pop(ctx)?;
                    self.call_value(ctx, callee, args)?;
                }
                Op::Return => {
                    let value = pop(ctx)?;
                    if let Some(frame) = ctx.frames.pop() {
                        ctx.stack.truncate(frame.stack_base());
                    }
                    if let Some(Frame::Native(native)) = ctx.frames.last() {
                        ctx.stack.truncate(native.stack_base);
                        ctx.frames.pop();
                    }
                    if ctx.frames.is_empty() {
                        return Ok(RunOutcome::Completed(value));
                    }
                    ctx.stack.push(value);
                }
                Op::Pop => {
                    pop(ctx)?;
                }
                Op::Dup => {
                    let value = ctx.stack.last().cloned().unwrap_or_default();
                    ctx.stack.push(value);
                }
                Op::Jump(target) => frame.pc = target as usize,
                Op::JumpIfFalse(target) => {
                    let frame_pc = target as usize;
                    if !pop(ctx)?.truthy() {
                        top_script(&mut ctx.frames)?.pc = frame_pc;
                    }
                }
                Op::JumpIfTrue(target) => {
                    let frame_pc = target as usize;
                    if pop(ctx)?.truthy() {
                        top_script(&mut ctx.frames)?.pc = frame_pc;
                    }
                }
                Op::Binary(op) => {
                    let right = pop(ctx)?;
                    let left = pop(ctx)?;
                    ctx.stack.push(binary(op, &left, &right));
                }
                Op::Unary(op) => {
                    let value = pop(ctx)?;
                    ctx.stack.push(match op {
                        UnaryOp::Neg => Value::Number(-value.to_number()),
                        UnaryOp::Plus => Value::Number(value.to_number()),
                        UnaryOp::Not => Value::Bool(!value.truthy()),
                        UnaryOp::TypeOf => Value::from(value.type_of()),
                    });
                }
                Op::Debugger => return Ok(RunOutcome::Paused(ctx.id)),
            }
        }
    }

    /// Invoke `callee`. Script functions get a new frame; builtins run to
    /// completion and push their result.
    pub(super) fn call_value(
        &mut self,
        ctx: &mut ExecutionContext,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.enter(ctx, &closure, args),
            Value::Native(builtin) => self.call_native(ctx, builtin, args),
            other => Err(RuntimeError::NotCallable {
                value: other.to_string(),
            }),
        }
    }

    pub(super) fn enter(
        &mut self,
        ctx: &mut ExecutionContext,
        closure: &Closure,
        args: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        if ctx.script_depth() >= self.max_stack_depth {
            return Err(RuntimeError::StackOverflow(self.max_stack_depth));
        }
        let installed = self.installed(closure.function)?;
        let env = new_env(&installed.code, &args, closure.env.clone());
        ctx.frames.push(Frame::Script(ScriptFrame {
            function: closure.function,
            code: installed,
            pc: 0,
            env: Some(env),
            closure_env: closure.env.clone(),
            args,
            stack_base: ctx.stack.len(),
        }));
        Ok(())
    }
}

fn global_name(frame: &ScriptFrame, idx: u32) -> Result<String, RuntimeError> {
    frame
        .code
        .code
        .global_name(idx)
        .map(str::to_string)
        .ok_or_else(|| RuntimeError::InvalidBytecode(format!("global name {idx} out of range")))
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let numbers = || (left.to_number(), right.to_number());
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::from(format!("{left}{right}").as_str()),
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => {
                    let (a, b) = numbers();
                    a.partial_cmp(&b)
                }
            };
            Value::Bool(match ordering {
                None => false,
                Some(ordering) => match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                },
            })
        }
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_concatenation_and_comparison() {
        let a = Value::from("a");
        let one = Value::Number(1.0);
        assert_eq!(binary(BinaryOp::Add, &a, &one).to_string(), "a1");
        assert_eq!(binary(BinaryOp::Add, &one, &one).to_string(), "2");
        assert!(binary(BinaryOp::Lt, &Value::from("a"), &Value::from("b")).truthy());
        assert!(!binary(BinaryOp::Lt, &Value::Undefined, &one).truthy());
    }
}
