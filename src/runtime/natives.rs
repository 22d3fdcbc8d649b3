//! Builtin functions.

use super::frames::{ExecutionContext, Frame, NativeFrame};
use super::value::{Builtin, Value};
use super::{Runtime, RuntimeError};

impl Runtime {
    pub(super) fn call_native(
        &mut self,
        ctx: &mut ExecutionContext,
        builtin: Builtin,
        args: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.output.push(line);
                ctx.stack.push(Value::Undefined);
                Ok(())
            }
            // apply(fn, ...args): the call goes through a native frame,
            // popped again when the callee returns.
            Builtin::Apply => {
                let mut args = args.into_iter();
                let target = args.next().unwrap_or_default();
                let rest: Vec<Value> = args.collect();
                match target {
                    Value::Closure(closure) => {
                        ctx.frames.push(Frame::Native(NativeFrame {
                            name: Builtin::Apply.name(),
                            stack_base: ctx.stack.len(),
                        }));
                        self.enter(ctx, &closure, rest)
                    }
                    Value::Native(inner) => self.call_native(ctx, inner, rest),
                    other => Err(RuntimeError::NotCallable {
                        value: other.to_string(),
                    }),
                }
            }
        }
    }
}
