//! Execution engine
//!
//! Runs one call stack sequentially. A block is a flat statement vector
//! walked with an instruction pointer; `goto` resolves through the block's
//! label index, and a label the block does not declare is handed up to the
//! enclosing block, which retries in its own scope.
//!
//! ## Function Organization
//! 1. `invoke` / `call` - real calls: depth limit, worker hops, frames
//! 2. `run_block` - the instruction-pointer loop with checkpoints
//! 3. `exec_stmt` - per-statement dispatch
//!
//! Expression evaluation lives in `expressions.rs`.

use std::sync::Arc;

use tracing::debug;

use super::errors::{ErrorKind, ExecResult, RuntimeError, Unwind};
use super::frames::CallStack;
use super::host::MemberTarget;
use super::memory::Variable;
use super::observer::StatementEvent;
use super::runtime::Runtime;
use super::value::Val;
use crate::program::{Block, Expr, IterationKind, Method, Receiver, Shape, Stmt};

/// Exit status of one block run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockState {
    /// A `return` ran
    pub exit_method: bool,
    /// A `break` ran
    pub exit_iteration: bool,
    /// A jump targeted a label this block does not declare
    pub exit_via_label: Option<String>,
    in_iteration: bool,
}

impl BlockState {
    fn new(in_iteration: bool) -> Self {
        Self {
            in_iteration,
            ..Self::default()
        }
    }

    pub fn in_iteration(&self) -> bool {
        self.in_iteration
    }
}

/// What the block loop does after a statement
#[derive(Debug)]
enum Flow {
    Next,
    Jump(String),
    ExitMethod,
    ExitIteration,
}

impl From<BlockState> for Flow {
    /// How a nested block's exit looks to the enclosing block
    fn from(state: BlockState) -> Self {
        if state.exit_method {
            Flow::ExitMethod
        } else if let Some(label) = state.exit_via_label {
            Flow::Jump(label)
        } else if state.exit_iteration {
            Flow::ExitIteration
        } else {
            Flow::Next
        }
    }
}

pub struct Engine {
    pub(super) runtime: Arc<Runtime>,
    pub(super) stack: CallStack,
}

impl Engine {
    pub fn new(runtime: Arc<Runtime>, stack: CallStack) -> Self {
        Self { runtime, stack }
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /* ===================== Calls ===================== */

    /// Perform a real call of a program method
    pub fn invoke(&mut self, method: &Method, args: Vec<Val>) -> ExecResult<Val> {
        let depth = self.stack.depth();
        let max_depth = self.runtime.settings.max_call_depth;
        let per_worker = self.runtime.settings.calls_per_worker;

        if depth >= max_depth {
            return Err(RuntimeError::new(
                ErrorKind::StackOverflow,
                format!(
                    "call depth limit of {} reached calling '{}'",
                    max_depth, method.name
                ),
            )
            .into());
        }

        if depth > 0 && per_worker > 0 && depth % per_worker == 0 {
            return self.invoke_on_worker(method, args);
        }
        self.call(method, args)
    }

    /// Continue the call on a fresh thread with a large stack. The current
    /// thread waits, so the call stack stays strictly sequential.
    fn invoke_on_worker(&mut self, method: &Method, args: Vec<Val>) -> ExecResult<Val> {
        let depth = self.stack.depth();
        let stack_size = self.runtime.settings.worker_stack_size;
        debug!(depth, method = %method.name, "continuing on a fresh worker thread");

        std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name(format!("cadence-worker-{}", depth))
                .stack_size(stack_size)
                .spawn_scoped(scope, || self.call(method, args))
                .map_err(|e| RuntimeError::internal(format!("failed to start worker thread: {}", e)))?;

            worker
                .join()
                .unwrap_or_else(|_| Err(RuntimeError::internal("worker thread panicked").into()))
        })
    }

    fn call(&mut self, method: &Method, args: Vec<Val>) -> ExecResult<Val> {
        if method.params.len() != args.len() {
            return Err(RuntimeError::bad_argument(format!(
                "method '{}' expects {} argument(s), got {}",
                method.name,
                method.params.len(),
                args.len()
            ))
            .into());
        }

        self.stack.push_frame(method.id, &method.name);
        let outcome = self.bind_and_run(method, args);
        // The frame goes away whatever happened
        let result = self.stack.pop_frame();
        outcome?;

        Ok(result.unwrap_or(Val::Null))
    }

    fn bind_and_run(&mut self, method: &Method, args: Vec<Val>) -> ExecResult<()> {
        for (param, arg) in method.params.iter().zip(args) {
            let variable = Arc::new(Variable::new(param.name.clone(), param.shape));
            variable.set_value(arg)?;
            self.stack.declare(variable);
        }

        let state = self.run_block(&method.body, false)?;
        if let Some(label) = state.exit_via_label {
            return Err(RuntimeError::internal(format!(
                "label '{}' is not declared in '{}'",
                label, method.name
            ))
            .into());
        }
        Ok(())
    }

    /* ===================== Blocks ===================== */

    pub fn run_block(&mut self, block: &Block, in_iteration: bool) -> ExecResult<BlockState> {
        let mut state = BlockState::new(in_iteration);
        let statements = block.statements();
        let mut ip = 0;

        while ip < statements.len() {
            let stmt = &statements[ip];
            let span = stmt.span();
            if !span.is_synthetic() {
                self.stack.set_current_span(span);
            }
            self.checkpoint(stmt)?;

            self.notify(stmt, true);
            let flow = match self.exec_stmt(stmt, in_iteration) {
                Ok(flow) => flow,
                Err(Unwind::Error(err)) => return Err(self.annotate(*err, stmt)),
                Err(cancelled) => return Err(cancelled),
            };
            self.notify(stmt, false);

            match flow {
                Flow::Next => ip += 1,
                Flow::Jump(label) => match block.position(&label) {
                    Some(target) => ip = target,
                    None => {
                        state.exit_via_label = Some(label);
                        return Ok(state);
                    }
                },
                Flow::ExitMethod => {
                    state.exit_method = true;
                    return Ok(state);
                }
                Flow::ExitIteration => {
                    state.exit_iteration = true;
                    return Ok(state);
                }
            }
        }

        Ok(state)
    }

    /// Run a block in its own scope
    fn run_nested(&mut self, block: &Block, in_iteration: bool) -> ExecResult<BlockState> {
        let mark = self.stack.scope_mark();
        self.stack.push_scope();
        let result = self.run_block(block, in_iteration);
        self.stack.restore_scopes(mark);
        result
    }

    fn checkpoint(&self, stmt: &Stmt) -> ExecResult<()> {
        let runtime = &self.runtime;
        runtime
            .controls
            .gate
            .checkpoint(stmt, &runtime.controls.machine, || runtime.capture(&self.stack))
    }

    fn notify(&self, stmt: &Stmt, before: bool) {
        let event = StatementEvent {
            call_stack: self.stack.id,
            method: self
                .stack
                .current()
                .map_or("<global>", |f| f.method_name.as_str()),
            depth: self.stack.depth(),
            stmt,
        };
        let observer = &self.runtime.controls.observer;
        if before {
            observer.before_statement(&event);
        } else {
            observer.after_statement(&event);
        }
    }

    /// Record where the failure happened, and the call stack, while the
    /// frames still exist
    fn annotate(&self, err: RuntimeError, stmt: &Stmt) -> Unwind {
        let mut err = err.at(stmt.span(), stmt.kind_name());
        if err.debug_info.is_none() {
            err.debug_info = Some(Box::new(self.runtime.capture(&self.stack)));
        }
        err.into()
    }

    /* ===================== Statements ===================== */

    fn exec_stmt(&mut self, stmt: &Stmt, in_iteration: bool) -> ExecResult<Flow> {
        match stmt {
            Stmt::Declare {
                name, shape, init, ..
            } => {
                let value = match init {
                    Some(init) => self.eval(init)?,
                    None => Val::Null,
                };
                let variable = Arc::new(Variable::new(name.clone(), *shape));
                variable.set_value(value)?;
                if !self.stack.declare(Arc::clone(&variable)) {
                    self.runtime.globals.declare(variable);
                }
                Ok(Flow::Next)
            }

            Stmt::Assign { target, value, .. } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
                Ok(Flow::Next)
            }

            Stmt::Condition {
                test,
                then_block,
                else_block,
                ..
            } => {
                if self.eval_condition(test)? {
                    Ok(self.run_nested(then_block, in_iteration)?.into())
                } else if let Some(else_block) = else_block {
                    Ok(self.run_nested(else_block, in_iteration)?.into())
                } else {
                    Ok(Flow::Next)
                }
            }

            Stmt::LabelCondition { test, label, .. } => {
                if self.eval_condition(test)? {
                    Ok(Flow::Next)
                } else {
                    Ok(Flow::Jump(label.clone()))
                }
            }

            Stmt::Iteration {
                kind, test, body, ..
            } => self.run_iteration(*kind, test, body),

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Val::Null,
                };
                if let Some(frame) = self.stack.current_mut() {
                    frame.result = Some(value);
                }
                Ok(Flow::ExitMethod)
            }

            Stmt::Break { .. } => {
                if in_iteration {
                    Ok(Flow::ExitIteration)
                } else {
                    Err(RuntimeError::new(
                        ErrorKind::IllegalStatement,
                        "'break' is only allowed inside a loop",
                    )
                    .into())
                }
            }

            Stmt::Throw { value, .. } => match self.eval(value)? {
                exception @ Val::Exception(_) => Err(RuntimeError::thrown(exception).into()),
                other => Err(RuntimeError::bad_type(format!(
                    "only exceptions can be thrown, got {}",
                    other.type_name()
                ))
                .into()),
            },

            Stmt::TryCatch {
                body,
                catch_var,
                catch_body,
                ..
            } => self.run_try(body, catch_var.as_deref(), catch_body, in_iteration),

            Stmt::Expr { expr, .. } => {
                self.eval(expr)?;
                Ok(Flow::Next)
            }

            Stmt::Label { .. } => Ok(Flow::Next),

            Stmt::Goto { label, .. } => Ok(Flow::Jump(label.clone())),
        }
    }

    fn run_iteration(&mut self, kind: IterationKind, test: &Expr, body: &Block) -> ExecResult<Flow> {
        loop {
            if self.runtime.controls.gate.is_cancelled() {
                return Err(Unwind::Cancelled);
            }
            if kind == IterationKind::PreCondition && !self.eval_condition(test)? {
                return Ok(Flow::Next);
            }

            let state = self.run_nested(body, true)?;
            if state.exit_method || state.exit_via_label.is_some() {
                return Ok(state.into());
            }
            if state.exit_iteration {
                return Ok(Flow::Next);
            }

            if kind == IterationKind::PostCondition && !self.eval_condition(test)? {
                return Ok(Flow::Next);
            }
        }
    }

    fn run_try(
        &mut self,
        body: &Block,
        catch_var: Option<&str>,
        catch_body: &Block,
        in_iteration: bool,
    ) -> ExecResult<Flow> {
        let err = match self.run_nested(body, in_iteration) {
            Ok(state) => return Ok(state.into()),
            Err(Unwind::Cancelled) => return Err(Unwind::Cancelled),
            Err(Unwind::Error(err)) => err,
        };
        debug!(kind = %err.kind, "caught: {}", err.message);

        let mark = self.stack.scope_mark();
        self.stack.push_scope();
        if let Some(name) = catch_var {
            let variable = Arc::new(Variable::new(name, Shape::Scalar));
            variable.set_value(err.to_exception())?;
            self.stack.declare(variable);
        }
        let result = self.run_block(catch_body, in_iteration);
        self.stack.restore_scopes(mark);

        Ok(result?.into())
    }

    /* ===================== Assignment ===================== */

    fn assign(&mut self, target: &Expr, value: Val) -> Result<(), Unwind> {
        match target {
            Expr::Variable { name, global, .. } => {
                self.lookup(name, *global)?.set_value(value)?;
            }

            Expr::Index {
                target: container,
                index,
                ..
            } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                match container {
                    Val::Array(items) => {
                        let mut items = items.lock();
                        let position = super::expressions::element_position(&index, items.len())?;
                        items[position] = value;
                    }
                    Val::Map(entries) => {
                        let key = index.as_key().ok_or_else(|| {
                            RuntimeError::bad_type(format!(
                                "{} cannot be used as a map key",
                                index.type_name()
                            ))
                        })?;
                        entries.lock().insert(key, value);
                    }
                    Val::Null => {
                        return Err(RuntimeError::null_value("cannot index into null").into())
                    }
                    other => {
                        return Err(RuntimeError::bad_type(format!(
                            "cannot assign an element of {}",
                            other.type_name()
                        ))
                        .into())
                    }
                }
            }

            Expr::Property { receiver, name, .. } => {
                let host = Arc::clone(&self.runtime.host);
                match receiver {
                    Receiver::Static { type_name } => {
                        host.set_property(MemberTarget::Static(type_name), name, value)?
                    }
                    Receiver::Instance { object } => {
                        let object = self.eval(object)?;
                        host.set_property(MemberTarget::Instance(&object), name, value)?
                    }
                }
            }

            other => {
                return Err(RuntimeError::new(
                    ErrorKind::NotAssignable,
                    format!("cannot assign to {}", other.kind_name()),
                )
                .into())
            }
        }
        Ok(())
    }

    /// Resolve a variable: locals of the current frame, then globals
    pub(super) fn lookup(&self, name: &str, global: bool) -> Result<Arc<Variable>, RuntimeError> {
        let local = if global {
            None
        } else {
            self.stack.lookup_local(name)
        };
        local
            .or_else(|| self.runtime.globals.get(name))
            .ok_or_else(|| RuntimeError::internal(format!("variable '{}' is not declared", name)))
    }
}
