//! Lowering of the tree-sitter syntax tree to bytecode, one function at a time.
//!
//! Functions are numbered in pre-order: a function's descriptor slot is
//! reserved before its nested functions are compiled, and nested functions
//! are compiled left to right, so parents always precede their children and
//! siblings keep source order.

use crate::compiler::code::{BinaryOp, Code, Constant, Op, UnaryOp};
use crate::compiler::errors::{CompileError, CompileErrorKind};
use crate::compiler::parser::ParsedSource;
use crate::compiler::scope::{resolve, Resolved, ScopeInfo};
use crate::compiler::{CompiledScript, FunctionDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tree_sitter::Node;

const MAX_CONSTANTS: usize = u16::MAX as usize;

pub(crate) fn compile_program(parsed: &ParsedSource<'_>) -> Result<CompiledScript, CompileError> {
    let mut codegen = Codegen {
        source: parsed.source,
        functions: Vec::new(),
    };
    codegen.compile_function(parsed.root_node(), None, Vec::new())?;

    let functions = codegen
        .functions
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| CompileError::global(CompileErrorKind::ParseFailed))?;
    Ok(CompiledScript::new(functions))
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

fn first_named(node: Node<'_>) -> Option<Node<'_>> {
    named_children(node).into_iter().next()
}

fn is_function_literal(node: Node<'_>) -> bool {
    node.is_named() && matches!(node.kind(), "function_expression" | "function")
}

/// Declarations found in one function body, not descending into nested
/// functions.
#[derive(Default)]
struct Scan<'t> {
    declared: Vec<String>,
    hoisted: Vec<(String, usize)>,
    functions: Vec<Node<'t>>,
}

struct Codegen<'s> {
    source: &'s str,
    functions: Vec<Option<FunctionDescriptor>>,
}

struct FunctionBuilder {
    /// `None` while compiling top-level code, whose variables are globals.
    scope: Option<ScopeInfo>,
    outer: Vec<ScopeInfo>,
    ops: Vec<Op>,
    constants: Vec<Constant>,
    nested: Vec<usize>,
    nested_by_node: HashMap<usize, u32>,
}

impl FunctionBuilder {
    fn emit(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn here(&self) -> u32 {
        self.ops.len() as u32
    }

    fn patch_jump(&mut self, at: usize, target: u32) {
        match &mut self.ops[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfTrue(t) => *t = target,
            _ => {}
        }
    }

    fn constant(&mut self, constant: Constant) -> Option<u32> {
        if let Some(idx) = self.constants.iter().position(|c| *c == constant) {
            return Some(idx as u32);
        }
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(constant);
        Some((self.constants.len() - 1) as u32)
    }

    fn resolve(&self, name: &str) -> Resolved {
        resolve(name, self.scope.as_ref(), &self.outer)
    }
}

impl<'s> Codegen<'s> {
    fn err(&self, kind: CompileErrorKind, node: Node<'_>) -> CompileError {
        CompileError::at(kind, node, self.source)
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        &self.source[node.byte_range()]
    }

    fn scan<'t>(&self, node: Node<'t>, scan: &mut Scan<'t>) -> Result<(), CompileError> {
        for child in named_children(node) {
            match child.kind() {
                "function_declaration" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let name = self.text(name).to_string();
                        scan.declared.push(name.clone());
                        scan.hoisted.push((name, child.id()));
                    }
                    scan.functions.push(child);
                }
                "function_expression" | "function" if child.is_named() => {
                    scan.functions.push(child);
                }
                "variable_declarator" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        if name.kind() != "identifier" {
                            return Err(self.err(
                                CompileErrorKind::Unsupported("destructuring".to_string()),
                                name,
                            ));
                        }
                        scan.declared.push(self.text(name).to_string());
                    }
                    self.scan(child, scan)?;
                }
                kind @ ("arrow_function"
                | "generator_function"
                | "generator_function_declaration"
                | "class"
                | "class_declaration"
                | "method_definition") => {
                    return Err(self.err(CompileErrorKind::Unsupported(kind.to_string()), child));
                }
                _ => self.scan(child, scan)?,
            }
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        node: Node<'_>,
        parent: Option<usize>,
        outer: Vec<ScopeInfo>,
    ) -> Result<usize, CompileError> {
        let index = self.functions.len();
        self.functions.push(None);
        let is_root = parent.is_none();

        let (name, params, body) = if is_root {
            (String::new(), None, node)
        } else {
            let name = node
                .child_by_field_name("name")
                .map(|n| self.text(n).to_string())
                .unwrap_or_default();
            let body = node
                .child_by_field_name("body")
                .ok_or_else(|| self.err(CompileErrorKind::Missing("body".to_string()), node))?;
            (name, node.child_by_field_name("parameters"), body)
        };

        let mut scope = ScopeInfo::default();
        if let Some(params) = params {
            for param in named_children(params) {
                if param.kind() != "identifier" {
                    return Err(self.err(
                        CompileErrorKind::Unsupported(format!("parameter pattern {}", param.kind())),
                        param,
                    ));
                }
                scope.declare(self.text(param));
            }
        }
        let param_count = scope.len();

        let mut scan = Scan::default();
        self.scan(body, &mut scan)?;
        if !is_root {
            for name in &scan.declared {
                scope.declare(name);
            }
        }

        let child_outer: Vec<ScopeInfo> = if is_root {
            Vec::new()
        } else {
            std::iter::once(scope.clone())
                .chain(outer.iter().cloned())
                .collect()
        };

        let mut builder = FunctionBuilder {
            scope: (!is_root).then(|| scope.clone()),
            outer: outer.clone(),
            ops: Vec::new(),
            constants: Vec::new(),
            nested: Vec::new(),
            nested_by_node: HashMap::new(),
        };

        for function in scan.functions {
            let child = self.compile_function(function, Some(index), child_outer.clone())?;
            builder
                .nested_by_node
                .insert(function.id(), builder.nested.len() as u32);
            builder.nested.push(child);
        }

        for (name, node_id) in &scan.hoisted {
            if let Some(&nested) = builder.nested_by_node.get(node_id) {
                builder.emit(Op::Closure(nested));
                self.store(&mut builder, name, node)?;
                builder.emit(Op::Pop);
            }
        }

        let statements = if is_root || body.kind() == "statement_block" {
            named_children(body)
        } else {
            vec![body]
        };
        for statement in statements {
            self.statement(&mut builder, statement)?;
        }
        builder.emit(Op::Undefined);
        builder.emit(Op::Return);

        let literal_count = builder.constants.len();
        let code = Code {
            ops: builder.ops,
            constants: builder.constants,
            nested: builder.nested,
            param_count,
            local_count: if is_root { 0 } else { scope.len() },
        };

        self.functions[index] = Some(FunctionDescriptor {
            name,
            start_position: if is_root { 0 } else { node.start_byte() },
            end_position: if is_root {
                self.source.len()
            } else {
                node.end_byte()
            },
            param_count,
            literal_count,
            parent_index: parent,
            code: Arc::new(code),
            scope: if is_root { ScopeInfo::default() } else { scope },
            outer_scopes: outer,
        });
        Ok(index)
    }

    fn load(&self, b: &mut FunctionBuilder, name: &str, node: Node<'_>) -> Result<(), CompileError> {
        match b.resolve(name) {
            Resolved::Local { depth, slot } => {
                b.emit(Op::LoadLocal { depth, slot });
            }
            Resolved::Global => {
                let idx = self.name_constant(b, name, node)?;
                b.emit(Op::LoadGlobal(idx));
            }
        }
        Ok(())
    }

    fn store(&self, b: &mut FunctionBuilder, name: &str, node: Node<'_>) -> Result<(), CompileError> {
        match b.resolve(name) {
            Resolved::Local { depth, slot } => {
                b.emit(Op::StoreLocal { depth, slot });
            }
            Resolved::Global => {
                let idx = self.name_constant(b, name, node)?;
                b.emit(Op::StoreGlobal(idx));
            }
        }
        Ok(())
    }

    fn name_constant(
        &self,
        b: &mut FunctionBuilder,
        name: &str,
        node: Node<'_>,
    ) -> Result<u32, CompileError> {
        b.constant(Constant::Str(Arc::from(name)))
            .ok_or_else(|| self.err(CompileErrorKind::TooManyConstants(MAX_CONSTANTS), node))
    }

    fn push_constant(
        &self,
        b: &mut FunctionBuilder,
        constant: Constant,
        node: Node<'_>,
    ) -> Result<(), CompileError> {
        let idx = b
            .constant(constant)
            .ok_or_else(|| self.err(CompileErrorKind::TooManyConstants(MAX_CONSTANTS), node))?;
        b.emit(Op::Constant(idx));
        Ok(())
    }

    fn statement(&self, b: &mut FunctionBuilder, node: Node<'_>) -> Result<(), CompileError> {
        match node.kind() {
            "comment" | "empty_statement" | "hash_bang_line" | "function_declaration" => {}
            "expression_statement" => {
                let expr = first_named(node)
                    .ok_or_else(|| self.err(CompileErrorKind::Syntax, node))?;
                self.expression(b, expr)?;
                b.emit(Op::Pop);
            }
            "variable_declaration" | "lexical_declaration" => {
                for declarator in named_children(node) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    let Some(name) = declarator.child_by_field_name("name") else {
                        continue;
                    };
                    if let Some(value) = declarator.child_by_field_name("value") {
                        self.expression(b, value)?;
                        self.store(b, self.text(name), name)?;
                        b.emit(Op::Pop);
                    }
                }
            }
            "return_statement" => {
                match first_named(node) {
                    Some(expr) => self.expression(b, expr)?,
                    None => {
                        b.emit(Op::Undefined);
                    }
                }
                b.emit(Op::Return);
            }
            "if_statement" => {
                let condition = self.field(node, "condition")?;
                let consequence = self.field(node, "consequence")?;
                self.expression(b, condition)?;
                let skip_then = b.emit(Op::JumpIfFalse(0));
                self.statement(b, consequence)?;
                match node.child_by_field_name("alternative") {
                    Some(alternative) => {
                        let skip_else = b.emit(Op::Jump(0));
                        let target = b.here();
                        b.patch_jump(skip_then, target);
                        let else_body = if alternative.kind() == "else_clause" {
                            first_named(alternative)
                                .ok_or_else(|| self.err(CompileErrorKind::Syntax, alternative))?
                        } else {
                            alternative
                        };
                        self.statement(b, else_body)?;
                        let end = b.here();
                        b.patch_jump(skip_else, end);
                    }
                    None => {
                        let target = b.here();
                        b.patch_jump(skip_then, target);
                    }
                }
            }
            "while_statement" => {
                let condition = self.field(node, "condition")?;
                let body = self.field(node, "body")?;
                let start = b.here();
                self.expression(b, condition)?;
                let exit = b.emit(Op::JumpIfFalse(0));
                self.statement(b, body)?;
                b.emit(Op::Jump(start));
                let end = b.here();
                b.patch_jump(exit, end);
            }
            "statement_block" => {
                for statement in named_children(node) {
                    self.statement(b, statement)?;
                }
            }
            "debugger_statement" => {
                b.emit(Op::Debugger);
            }
            other => {
                return Err(self.err(CompileErrorKind::Unsupported(other.to_string()), node));
            }
        }
        Ok(())
    }

    fn field<'t>(&self, node: Node<'t>, name: &str) -> Result<Node<'t>, CompileError> {
        node.child_by_field_name(name)
            .ok_or_else(|| self.err(CompileErrorKind::Missing(name.to_string()), node))
    }

    fn assignment_target<'t>(&self, node: Node<'t>) -> Result<&'s str, CompileError> {
        let target = if node.kind() == "parenthesized_expression" {
            first_named(node).ok_or_else(|| self.err(CompileErrorKind::InvalidAssignment, node))?
        } else {
            node
        };
        if target.kind() != "identifier" {
            return Err(self.err(CompileErrorKind::InvalidAssignment, target));
        }
        Ok(self.text(target))
    }

    fn expression(&self, b: &mut FunctionBuilder, node: Node<'_>) -> Result<(), CompileError> {
        match node.kind() {
            "number" => {
                let text = self.text(node);
                let value = parse_number(text)
                    .ok_or_else(|| self.err(CompileErrorKind::InvalidNumber(text.to_string()), node))?;
                self.push_constant(b, Constant::Number(value), node)?;
            }
            "string" => {
                let value = unescape_string(self.text(node));
                self.push_constant(b, Constant::Str(Arc::from(value.as_str())), node)?;
            }
            "true" => {
                b.emit(Op::True);
            }
            "false" => {
                b.emit(Op::False);
            }
            "null" => {
                b.emit(Op::Null);
            }
            "undefined" => {
                b.emit(Op::Undefined);
            }
            "identifier" => {
                let name = self.text(node);
                if name == "undefined" {
                    b.emit(Op::Undefined);
                } else {
                    self.load(b, name, node)?;
                }
            }
            "parenthesized_expression" => {
                let inner =
                    first_named(node).ok_or_else(|| self.err(CompileErrorKind::Syntax, node))?;
                self.expression(b, inner)?;
            }
            "assignment_expression" => {
                let name = self.assignment_target(self.field(node, "left")?)?;
                self.expression(b, self.field(node, "right")?)?;
                self.store(b, name, node)?;
            }
            "augmented_assignment_expression" => {
                let name = self.assignment_target(self.field(node, "left")?)?;
                let operator = self.field(node, "operator")?.kind();
                let op = BinaryOp::from_token(operator.trim_end_matches('='))
                    .ok_or_else(|| self.err(CompileErrorKind::Unsupported(operator.to_string()), node))?;
                self.load(b, name, node)?;
                self.expression(b, self.field(node, "right")?)?;
                b.emit(Op::Binary(op));
                self.store(b, name, node)?;
            }
            "update_expression" => {
                let argument = self.field(node, "argument")?;
                let name = self.assignment_target(argument)?;
                let operator = self.field(node, "operator")?;
                let op = if operator.kind() == "++" {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                let prefix = operator.start_byte() < argument.start_byte();
                self.load(b, name, node)?;
                if !prefix {
                    b.emit(Op::Dup);
                }
                self.push_constant(b, Constant::Number(1.0), node)?;
                b.emit(Op::Binary(op));
                self.store(b, name, node)?;
                if !prefix {
                    b.emit(Op::Pop);
                }
            }
            "binary_expression" => {
                let left = self.field(node, "left")?;
                let right = self.field(node, "right")?;
                let operator = self.field(node, "operator")?.kind();
                match operator {
                    "&&" | "||" => {
                        self.expression(b, left)?;
                        b.emit(Op::Dup);
                        let short = if operator == "&&" {
                            b.emit(Op::JumpIfFalse(0))
                        } else {
                            b.emit(Op::JumpIfTrue(0))
                        };
                        b.emit(Op::Pop);
                        self.expression(b, right)?;
                        let end = b.here();
                        b.patch_jump(short, end);
                    }
                    _ => {
                        let op = BinaryOp::from_token(operator).ok_or_else(|| {
                            self.err(CompileErrorKind::Unsupported(operator.to_string()), node)
                        })?;
                        self.expression(b, left)?;
                        self.expression(b, right)?;
                        b.emit(Op::Binary(op));
                    }
                }
            }
            "unary_expression" => {
                let operator = self.field(node, "operator")?.kind();
                let op = match operator {
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Plus,
                    "!" => UnaryOp::Not,
                    "typeof" => UnaryOp::TypeOf,
                    other => {
                        return Err(self.err(CompileErrorKind::Unsupported(other.to_string()), node))
                    }
                };
                self.expression(b, self.field(node, "argument")?)?;
                b.emit(Op::Unary(op));
            }
            "ternary_expression" => {
                self.expression(b, self.field(node, "condition")?)?;
                let skip_then = b.emit(Op::JumpIfFalse(0));
                self.expression(b, self.field(node, "consequence")?)?;
                let skip_else = b.emit(Op::Jump(0));
                let target = b.here();
                b.patch_jump(skip_then, target);
                self.expression(b, self.field(node, "alternative")?)?;
                let end = b.here();
                b.patch_jump(skip_else, end);
            }
            "call_expression" => {
                self.expression(b, self.field(node, "function")?)?;
                let arguments = named_children(self.field(node, "arguments")?);
                for argument in &arguments {
                    if argument.kind() == "spread_element" {
                        return Err(self.err(
                            CompileErrorKind::Unsupported("spread_element".to_string()),
                            *argument,
                        ));
                    }
                    self.expression(b, *argument)?;
                }
                b.emit(Op::Call(arguments.len() as u32));
            }
            _ if is_function_literal(node) => {
                let nested = b
                    .nested_by_node
                    .get(&node.id())
                    .copied()
                    .ok_or_else(|| self.err(CompileErrorKind::Syntax, node))?;
                b.emit(Op::Closure(nested));
            }
            other => {
                return Err(self.err(CompileErrorKind::Unsupported(other.to_string()), node));
            }
        }
        Ok(())
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let radix = |prefix_lower: &str, prefix_upper: &str, radix: u32| {
        cleaned
            .strip_prefix(prefix_lower)
            .or_else(|| cleaned.strip_prefix(prefix_upper))
            .map(|digits| u64::from_str_radix(digits, radix).ok().map(|v| v as f64))
    };
    if let Some(value) = radix("0x", "0X", 16) {
        return value;
    }
    if let Some(value) = radix("0o", "0O", 8) {
        return value;
    }
    if let Some(value) = radix("0b", "0B", 2) {
        return value;
    }
    cleaned.parse::<f64>().ok()
}

fn unescape_string(raw: &str) -> String {
    let inner = if raw.len() >= 2 {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some('u') => {
                let hex: String = if chars.peek() == Some(&'{') {
                    chars.next();
                    chars.by_ref().take_while(|c| *c != '}').collect()
                } else {
                    chars.by_ref().take(4).collect()
                };
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some('\n') => {}
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
