//! Bytecode produced by the compiler and executed by the runtime.

use std::fmt;
use std::sync::Arc;

/// Entry of a function's constant pool.
#[derive(Debug, Clone)]
pub enum Constant {
    Number(f64),
    Str(Arc<str>),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

impl BinaryOp {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "===" => BinaryOp::StrictEq,
            "!==" => BinaryOp::StrictNe,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

/// One instruction. Jump targets are instruction indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Constant(u32),
    Undefined,
    Null,
    True,
    False,
    /// Read slot `slot` of the environment `depth` levels up (0 = own).
    LoadLocal { depth: u32, slot: u32 },
    /// Write the top of stack into a slot, leaving it on the stack.
    StoreLocal { depth: u32, slot: u32 },
    /// Read the global named by a string constant.
    LoadGlobal(u32),
    /// Write the top of stack into a global, leaving it on the stack.
    StoreGlobal(u32),
    /// Create a closure over nested function literal `n` of this code.
    Closure(u32),
    Call(u32),
    Return,
    Pop,
    Dup,
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    Binary(BinaryOp),
    Unary(UnaryOp),
    Debugger,
}

/// Compiled code of one function.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub ops: Vec<Op>,
    pub constants: Vec<Constant>,
    /// Descriptor indices (within the same compiled script) of the nested
    /// function literals this code instantiates, in source order.
    pub nested: Vec<usize>,
    pub param_count: usize,
    /// Size of the function environment (parameters first).
    pub local_count: usize,
}

impl Code {
    pub fn constant(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    pub fn global_name(&self, index: u32) -> Option<&str> {
        match self.constant(index) {
            Some(Constant::Str(name)) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, op) in self.ops.iter().enumerate() {
            write!(f, "{pc:04} {op:?}")?;
            match op {
                Op::Constant(idx) | Op::LoadGlobal(idx) | Op::StoreGlobal(idx) => {
                    if let Some(constant) = self.constant(*idx) {
                        write!(f, "    ; {constant:?}")?;
                    }
                }
                _ => {}
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
