//! # Lowering / Optimizer
//!
//! Rewrites a parsed [`Program`] into the flat form the interpreter runs:
//!
//! 1. **Flattening**: conditions and loops become label declarations,
//!    `goto`s and label-conditions; `break` becomes a jump to the innermost
//!    loop's end label.
//! 2. **Inlining**: synchronous calls that appear as a statement, as the
//!    value of an assignment, or as a declaration initializer are replaced by
//!    a copy of the callee body with fresh variable names. Recursive callees
//!    are inlined at most `recursion_inline_limit` levels deep; past that the
//!    call stays a genuine invocation.
//! 3. **Validation**: unresolved callees, arity mismatches, misplaced
//!    `break` and duplicate method names are reported as [`Diagnostic`]s.
//!
//! Try/catch nodes survive lowering; only their bodies are rewritten.
//!
//! The input is never mutated. A program that is already marked `lowered`
//! is returned unchanged.

pub mod diagnostics;
pub mod inlining;
pub mod labels;


use std::collections::HashSet;

use tracing::debug;

use crate::program::{
    Block, Expr, IterationKind, Method, MethodId, Program, Receiver, Shape, Span, Stmt,
};

pub use diagnostics::{Diagnostic, Severity};
use inlining::{active_count, InliningContext};
use labels::LabelGenerator;

/// Default number of nested inlined copies of one recursive method
pub const DEFAULT_RECURSION_INLINE_LIMIT: usize = 2;

#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    /// Inline synchronous calls at all
    pub inline: bool,
    /// How many copies of the same method may be nested while inlining
    pub recursion_inline_limit: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            inline: true,
            recursion_inline_limit: DEFAULT_RECURSION_INLINE_LIMIT,
        }
    }
}

/// Output of one optimization run
#[derive(Debug, Clone)]
pub struct Optimized {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

impl Optimized {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

/// Lower a program. See the module documentation for the rewrite rules.
pub fn optimize(program: &Program, options: &OptimizerOptions) -> Optimized {
    if program.lowered {
        return Optimized {
            program: program.clone(),
            diagnostics: Vec::new(),
        };
    }

    let mut optimizer = Optimizer::new(program, options);
    optimizer.check_duplicate_methods();

    let methods = program
        .methods
        .iter()
        .map(|method| optimizer.lower_method(method))
        .collect();

    // Global initializers are validated but never inlined: they run before
    // any method frame exists.
    for global in &program.globals {
        if let Some(init) = &global.init {
            optimizer.lower_expr(init);
        }
    }

    debug!(
        methods = program.methods.len(),
        labels = optimizer.labels.issued(),
        diagnostics = optimizer.diagnostics.len(),
        "program lowered"
    );

    Optimized {
        program: Program {
            methods,
            globals: program.globals.clone(),
            assemblies: program.assemblies.clone(),
            lowered: true,
        },
        diagnostics: optimizer.diagnostics,
    }
}

/* ===================== Optimizer ===================== */

struct Optimizer<'p> {
    program: &'p Program,
    options: &'p OptimizerOptions,
    labels: LabelGenerator,
    /// End labels of the enclosing loops, innermost last
    loop_ends: Vec<String>,
    /// Active inlining contexts, innermost last
    contexts: Vec<InliningContext>,
    fresh_names: usize,
    refused: HashSet<MethodId>,
    diagnostics: Vec<Diagnostic>,
}

impl<'p> Optimizer<'p> {
    fn new(program: &'p Program, options: &'p OptimizerOptions) -> Self {
        Self {
            program,
            options,
            labels: LabelGenerator::new(),
            loop_ends: Vec::new(),
            contexts: Vec::new(),
            fresh_names: 0,
            refused: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    fn check_duplicate_methods(&mut self) {
        let mut seen = HashSet::new();
        for method in &self.program.methods {
            if !seen.insert(method.name.as_str()) {
                self.diagnostics.push(Diagnostic::error(
                    method.span,
                    format!("method '{}' is defined more than once", method.name),
                    diagnostics::DUPLICATE_METHOD,
                ));
            }
        }
    }

    /// Errors inside inlined copies are reported by the callee's own
    /// lowering, so they are dropped here to avoid duplicates.
    fn report(&mut self, diagnostic: Diagnostic) {
        if self.contexts.is_empty() {
            self.diagnostics.push(diagnostic);
        }
    }

    fn fresh_name(&mut self, base: &str) -> String {
        self.fresh_names += 1;
        format!("{}${}", base, self.fresh_names)
    }

    fn lower_method(&mut self, method: &Method) -> Method {
        self.loop_ends.clear();
        self.contexts.clear();

        let mut body = Vec::new();
        self.lower_statements(&method.body, &mut body);

        Method {
            body: Block::new(body),
            ..method.clone()
        }
    }

    fn lower_statements(&mut self, block: &Block, out: &mut Vec<Stmt>) {
        let mut terminated_at: Option<Span> = None;
        for stmt in block {
            if let Some(span) = terminated_at.take() {
                if !stmt.is_jump_plumbing() {
                    self.report(Diagnostic::warning(
                        stmt.span(),
                        format!("statement is unreachable after the statement at {}", span),
                        diagnostics::UNREACHABLE_CODE,
                    ));
                }
            }
            if matches!(
                stmt,
                Stmt::Return { .. } | Stmt::Break { .. } | Stmt::Throw { .. }
            ) {
                terminated_at = Some(stmt.span());
            }
            self.lower_stmt(stmt, out);
        }
    }

    fn lower_nested(&mut self, block: &Block) -> Block {
        let mut out = Vec::new();
        self.lower_statements(block, &mut out);
        Block::new(out)
    }

    /* ===================== Statements ===================== */

    fn lower_stmt(&mut self, stmt: &Stmt, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::Declare {
                name,
                shape,
                init,
                span,
            } => match init {
                Some(call) if call.as_program_call().is_some() => {
                    // Arguments see the scope before the new name exists
                    let (method, args) = self.lower_call_args(call);
                    let name = self.declare_name(name);
                    out.push(Stmt::Declare {
                        name: name.clone(),
                        shape: *shape,
                        init: None,
                        span: *span,
                    });
                    let dest = variable(name, *span);
                    self.emit_call(&method, args, Some(dest), call.span(), *span, out);
                }
                _ => {
                    let init = init.as_ref().map(|e| self.lower_expr(e));
                    let name = self.declare_name(name);
                    out.push(Stmt::Declare {
                        name,
                        shape: *shape,
                        init,
                        span: *span,
                    });
                }
            },

            Stmt::Assign {
                target,
                value,
                span,
            } => {
                let target = self.lower_expr(target);
                if value.as_program_call().is_some() {
                    self.lower_call_statement(value, Some(target), *span, out);
                } else {
                    out.push(Stmt::Assign {
                        target,
                        value: self.lower_expr(value),
                        span: *span,
                    });
                }
            }

            Stmt::Expr { expr, span } => {
                if expr.as_program_call().is_some() {
                    self.lower_call_statement(expr, None, *span, out);
                } else {
                    out.push(Stmt::Expr {
                        expr: self.lower_expr(expr),
                        span: *span,
                    });
                }
            }

            Stmt::Condition {
                test,
                then_block,
                else_block,
                span,
            } => {
                let test = self.lower_expr(test);
                match else_block {
                    None => {
                        let end = self.labels.next_label();
                        out.push(Stmt::LabelCondition {
                            test,
                            label: end.clone(),
                            span: *span,
                        });
                        self.lower_statements(then_block, out);
                        out.push(label(end));
                    }
                    Some(else_block) => {
                        let else_label = self.labels.next_label();
                        let end = self.labels.next_label();
                        out.push(Stmt::LabelCondition {
                            test,
                            label: else_label.clone(),
                            span: *span,
                        });
                        self.lower_statements(then_block, out);
                        out.push(goto(end.clone(), Span::default()));
                        out.push(label(else_label));
                        self.lower_statements(else_block, out);
                        out.push(label(end));
                    }
                }
            }

            Stmt::Iteration {
                kind,
                test,
                body,
                span,
            } => {
                let start = self.labels.next_label();
                let end = self.labels.next_label();

                out.push(label(start.clone()));
                if *kind == IterationKind::PreCondition {
                    out.push(Stmt::LabelCondition {
                        test: self.lower_expr(test),
                        label: end.clone(),
                        span: *span,
                    });
                }

                self.loop_ends.push(end.clone());
                self.lower_statements(body, out);
                self.loop_ends.pop();

                if *kind == IterationKind::PostCondition {
                    out.push(Stmt::LabelCondition {
                        test: self.lower_expr(test),
                        label: end.clone(),
                        span: *span,
                    });
                }
                out.push(goto(start, Span::default()));
                out.push(label(end));
            }

            Stmt::Break { span } => match self.loop_ends.last() {
                Some(end) => out.push(goto(end.clone(), *span)),
                None => {
                    self.report(Diagnostic::error(
                        *span,
                        "'break' is only allowed inside a loop",
                        diagnostics::BREAK_OUTSIDE_LOOP,
                    ));
                    out.push(stmt.clone());
                }
            },

            Stmt::Return { value, span } => self.lower_return(value.as_ref(), *span, out),

            Stmt::Throw { value, span } => out.push(Stmt::Throw {
                value: self.lower_expr(value),
                span: *span,
            }),

            Stmt::TryCatch {
                body,
                catch_var,
                catch_body,
                span,
            } => {
                self.push_inline_scope();
                let body = self.lower_nested(body);
                self.pop_inline_scope();

                // The catch variable shares its scope with the catch body
                self.push_inline_scope();
                let catch_var = catch_var.as_ref().map(|name| self.declare_name(name));
                let catch_body = self.lower_nested(catch_body);
                self.pop_inline_scope();
                out.push(Stmt::TryCatch {
                    body,
                    catch_var,
                    catch_body,
                    span: *span,
                });
            }

            // Already in jump form
            Stmt::LabelCondition { .. } | Stmt::Label { .. } | Stmt::Goto { .. } => {
                out.push(stmt.clone())
            }
        }
    }

    fn lower_return(&mut self, value: Option<&Expr>, span: Span, out: &mut Vec<Stmt>) {
        let inlined = self
            .contexts
            .last()
            .map(|ctx| (ctx.receiver.clone(), ctx.end_label.clone()));

        match inlined {
            Some((receiver, end)) => {
                if let Some(value) = value {
                    let dest = variable(receiver, span);
                    if value.as_program_call().is_some() {
                        self.lower_call_statement(value, Some(dest), span, out);
                    } else {
                        let value = self.hoist_calls(value, out);
                        out.push(Stmt::Assign {
                            target: dest,
                            value,
                            span,
                        });
                    }
                }
                out.push(goto(end, span));
            }
            None => {
                let value = value.map(|v| self.hoist_calls(v, out));
                out.push(Stmt::Return { value, span });
            }
        }
    }

    /// Lower a declaration/assignment/statement whose value is a program call
    fn lower_call_statement(
        &mut self,
        call: &Expr,
        dest: Option<Expr>,
        span: Span,
        out: &mut Vec<Stmt>,
    ) {
        let (method, args) = self.lower_call_args(call);
        self.emit_call(&method, args, dest, call.span(), span, out);
    }

    fn lower_call_args(&mut self, call: &Expr) -> (String, Vec<Expr>) {
        match call.as_program_call() {
            Some((name, args)) => (
                name.to_string(),
                args.iter().map(|arg| self.lower_expr(arg)).collect(),
            ),
            None => (String::new(), Vec::new()),
        }
    }

    /// Emit a call with already-lowered arguments and destination, inlining
    /// the callee when allowed.
    fn emit_call(
        &mut self,
        name: &str,
        args: Vec<Expr>,
        dest: Option<Expr>,
        call_span: Span,
        span: Span,
        out: &mut Vec<Stmt>,
    ) {
        let callee = self
            .resolve(name, args.len(), call_span)
            .filter(|callee| self.can_inline(callee, call_span));

        let Some(callee) = callee else {
            let call = Expr::Invoke {
                receiver: None,
                method: name.to_string(),
                args,
                span: call_span,
            };
            out.push(match dest {
                Some(target) => Stmt::Assign {
                    target,
                    value: call,
                    span,
                },
                None => Stmt::Expr { expr: call, span },
            });
            return;
        };

        let start = self.labels.next_label();
        let end = self.labels.next_label();
        let receiver = self.fresh_name(&format!("{}.return", callee.name));
        let mut ctx = InliningContext::new(callee.id, start, end, receiver);

        for (param, arg) in callee.params.iter().zip(args) {
            let fresh = self.fresh_name(&param.name);
            ctx.bind(&param.name, fresh.clone());
            out.push(Stmt::Declare {
                name: fresh,
                shape: param.shape,
                init: Some(arg),
                span,
            });
        }
        out.push(Stmt::Declare {
            name: ctx.receiver.clone(),
            shape: Shape::Dynamic,
            init: None,
            span,
        });
        out.push(label(ctx.start_label.clone()));

        let end_label = ctx.end_label.clone();
        let receiver = ctx.receiver.clone();

        // A callee's loops never see the caller's loops
        let caller_loops = std::mem::take(&mut self.loop_ends);
        self.contexts.push(ctx);
        self.lower_statements(&callee.body, out);
        self.contexts.pop();
        self.loop_ends = caller_loops;

        out.push(label(end_label));
        if let Some(target) = dest {
            out.push(Stmt::Assign {
                target,
                value: variable(receiver, span),
                span,
            });
        }
    }

    fn resolve(&mut self, name: &str, argc: usize, span: Span) -> Option<&'p Method> {
        let program = self.program;
        let Some(callee) = program.method(name) else {
            self.report(Diagnostic::error(
                span,
                format!("method '{}' is not defined", name),
                diagnostics::UNRESOLVED_METHOD,
            ));
            return None;
        };

        if callee.params.len() != argc {
            self.report(Diagnostic::error(
                span,
                format!(
                    "method '{}' expects {} argument(s), got {}",
                    name,
                    callee.params.len(),
                    argc
                ),
                diagnostics::ARITY_MISMATCH,
            ));
            return None;
        }

        Some(callee)
    }

    fn can_inline(&mut self, callee: &Method, span: Span) -> bool {
        if !self.options.inline || callee.is_async {
            return false;
        }

        if active_count(&self.contexts, callee.id) >= self.options.recursion_inline_limit {
            if self.refused.insert(callee.id) {
                self.diagnostics.push(Diagnostic::info(
                    span,
                    format!(
                        "recursive calls to '{}' are inlined {} level(s) deep, deeper calls stay genuine invocations",
                        callee.name, self.options.recursion_inline_limit
                    ),
                    diagnostics::INLINE_REFUSED,
                ));
            }
            return false;
        }

        true
    }

    /// Name to declare: fresh inside an inlined copy, unchanged otherwise
    fn declare_name(&mut self, name: &str) -> String {
        if self.contexts.is_empty() {
            return name.to_string();
        }
        let fresh = self.fresh_name(name);
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.bind(name, fresh.clone());
        }
        fresh
    }

    fn push_inline_scope(&mut self) {
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.push_scope();
        }
    }

    fn pop_inline_scope(&mut self) {
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.pop_scope();
        }
    }

    /* ===================== Expressions ===================== */

    /// Move synchronous program calls out of a returned expression into
    /// temporaries so they get the same inlining treatment as statements.
    /// Operands of short-circuit operators are left in place.
    fn hoist_calls(&mut self, expr: &Expr, out: &mut Vec<Stmt>) -> Expr {
        match expr {
            Expr::Invoke {
                receiver: None,
                method,
                args,
                span,
            } if self.is_sync_method(method) => {
                let args = args.iter().map(|arg| self.hoist_calls(arg, out)).collect();
                let temp = self.fresh_name("temp");
                out.push(Stmt::Declare {
                    name: temp.clone(),
                    shape: Shape::Dynamic,
                    init: None,
                    span: *span,
                });
                let dest = variable(temp.clone(), *span);
                self.emit_call(method, args, Some(dest), *span, *span, out);
                variable(temp, *span)
            }

            Expr::Invoke {
                receiver,
                method,
                args,
                span,
            } => {
                let args: Vec<Expr> = args.iter().map(|arg| self.hoist_calls(arg, out)).collect();
                if receiver.is_none() {
                    self.resolve(method, args.len(), *span);
                }
                Expr::Invoke {
                    receiver: receiver.as_ref().map(|r| self.hoist_receiver(r, out)),
                    method: method.clone(),
                    args,
                    span: *span,
                }
            }

            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let left = self.hoist_calls(left, out);
                let right = if op.is_short_circuit() {
                    self.lower_expr(right)
                } else {
                    self.hoist_calls(right, out)
                };
                Expr::Binary {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span: *span,
                }
            }

            Expr::Unary { op, operand, span } => Expr::Unary {
                op: *op,
                operand: Box::new(self.hoist_calls(operand, out)),
                span: *span,
            },

            Expr::Index {
                target,
                index,
                span,
            } => Expr::Index {
                target: Box::new(self.hoist_calls(target, out)),
                index: Box::new(self.hoist_calls(index, out)),
                span: *span,
            },

            Expr::Property {
                receiver,
                name,
                span,
            } => Expr::Property {
                receiver: self.hoist_receiver(receiver, out),
                name: name.clone(),
                span: *span,
            },

            Expr::Instantiate {
                type_name,
                args,
                span,
            } => Expr::Instantiate {
                type_name: type_name.clone(),
                args: args.iter().map(|arg| self.hoist_calls(arg, out)).collect(),
                span: *span,
            },

            Expr::ArrayCreation { items, span } => Expr::ArrayCreation {
                items: items.iter().map(|item| self.hoist_calls(item, out)).collect(),
                span: *span,
            },

            Expr::Literal { .. } | Expr::Variable { .. } => self.lower_expr(expr),
        }
    }

    fn hoist_receiver(&mut self, receiver: &Receiver, out: &mut Vec<Stmt>) -> Receiver {
        match receiver {
            Receiver::Static { type_name } => Receiver::Static {
                type_name: type_name.clone(),
            },
            Receiver::Instance { object } => Receiver::Instance {
                object: Box::new(self.hoist_calls(object, out)),
            },
        }
    }

    fn is_sync_method(&self, name: &str) -> bool {
        self.program
            .method(name)
            .is_some_and(|method| !method.is_async)
    }

    /// Rewrite sub-expressions: substitute inlined variable names and
    /// validate program calls. Never inlines.
    fn lower_expr(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Literal { .. } => expr.clone(),

            Expr::Variable { name, global, span } => {
                if *global {
                    return expr.clone();
                }
                match self.contexts.last() {
                    Some(ctx) => match ctx.lookup(name) {
                        Some(fresh) => variable(fresh.to_string(), *span),
                        None => Expr::Variable {
                            name: name.clone(),
                            global: true,
                            span: *span,
                        },
                    },
                    None => expr.clone(),
                }
            }

            Expr::Property {
                receiver,
                name,
                span,
            } => Expr::Property {
                receiver: self.lower_receiver(receiver),
                name: name.clone(),
                span: *span,
            },

            Expr::Index {
                target,
                index,
                span,
            } => Expr::Index {
                target: Box::new(self.lower_expr(target)),
                index: Box::new(self.lower_expr(index)),
                span: *span,
            },

            Expr::Binary {
                op,
                left,
                right,
                span,
            } => Expr::Binary {
                op: *op,
                left: Box::new(self.lower_expr(left)),
                right: Box::new(self.lower_expr(right)),
                span: *span,
            },

            Expr::Unary { op, operand, span } => Expr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(operand)),
                span: *span,
            },

            Expr::Invoke {
                receiver,
                method,
                args,
                span,
            } => {
                let args: Vec<Expr> = args.iter().map(|arg| self.lower_expr(arg)).collect();
                if receiver.is_none() {
                    self.resolve(method, args.len(), *span);
                }
                Expr::Invoke {
                    receiver: receiver.as_ref().map(|r| self.lower_receiver(r)),
                    method: method.clone(),
                    args,
                    span: *span,
                }
            }

            Expr::Instantiate {
                type_name,
                args,
                span,
            } => Expr::Instantiate {
                type_name: type_name.clone(),
                args: args.iter().map(|arg| self.lower_expr(arg)).collect(),
                span: *span,
            },

            Expr::ArrayCreation { items, span } => Expr::ArrayCreation {
                items: items.iter().map(|item| self.lower_expr(item)).collect(),
                span: *span,
            },
        }
    }

    fn lower_receiver(&mut self, receiver: &Receiver) -> Receiver {
        match receiver {
            Receiver::Static { type_name } => Receiver::Static {
                type_name: type_name.clone(),
            },
            Receiver::Instance { object } => Receiver::Instance {
                object: Box::new(self.lower_expr(object)),
            },
        }
    }
}

/* ===================== Node helpers ===================== */

fn label(name: String) -> Stmt {
    Stmt::Label {
        name,
        span: Span::default(),
    }
}

fn goto(label: String, span: Span) -> Stmt {
    Stmt::Goto { label, span }
}

fn variable(name: String, span: Span) -> Expr {
    Expr::Variable {
        name,
        global: false,
        span,
    }
}
