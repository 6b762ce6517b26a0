//! Convenience constructors for program trees
//!
//! Hosts that embed the core without the external parser, and the tests,
//! build programs through these helpers instead of spelling out spans.
//!
//! ```
//! use cadence_core::program::builder::*;
//!
//! let program = ProgramBuilder::new()
//!     .method(
//!         MethodBuilder::new("Main")
//!             .entry_point()
//!             .array_param("args")
//!             .body(vec![ret(index(var("args"), int(0)))]),
//!     )
//!     .build();
//! assert_eq!(program.methods.len(), 1);
//! ```

use super::ast::*;

/* ===================== Expressions ===================== */

pub fn null() -> Expr {
    literal(Literal::Null)
}

pub fn boolean(v: bool) -> Expr {
    literal(Literal::Bool(v))
}

pub fn int(v: i64) -> Expr {
    literal(Literal::Int(v))
}

pub fn float(v: f64) -> Expr {
    literal(Literal::Float(v))
}

pub fn string(v: impl Into<String>) -> Expr {
    literal(Literal::Str(v.into()))
}

fn literal(value: Literal) -> Expr {
    Expr::Literal {
        value,
        span: Span::default(),
    }
}

pub fn var(name: impl Into<String>) -> Expr {
    Expr::Variable {
        name: name.into(),
        global: false,
        span: Span::default(),
    }
}

pub fn index(target: Expr, idx: Expr) -> Expr {
    Expr::Index {
        target: Box::new(target),
        index: Box::new(idx),
        span: Span::default(),
    }
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span: Span::default(),
    }
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Add, left, right)
}

pub fn sub(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Sub, left, right)
}

pub fn mul(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Mul, left, right)
}

pub fn div(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Div, left, right)
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Eq, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Lt, left, right)
}

pub fn le(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Le, left, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Gt, left, right)
}

pub fn and(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::And, left, right)
}

pub fn or(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Or, left, right)
}

pub fn not(operand: Expr) -> Expr {
    Expr::Unary {
        op: UnaryOp::Not,
        operand: Box::new(operand),
        span: Span::default(),
    }
}

pub fn neg(operand: Expr) -> Expr {
    Expr::Unary {
        op: UnaryOp::Neg,
        operand: Box::new(operand),
        span: Span::default(),
    }
}

/// Call a method of the program
pub fn call(method: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Invoke {
        receiver: None,
        method: method.into(),
        args,
        span: Span::default(),
    }
}

/// Call a static host method, e.g. `Console.WriteLine(...)`
pub fn call_static(type_name: impl Into<String>, method: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Invoke {
        receiver: Some(Receiver::Static {
            type_name: type_name.into(),
        }),
        method: method.into(),
        args,
        span: Span::default(),
    }
}

/// Call a method on a host object
pub fn call_method(object: Expr, method: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Invoke {
        receiver: Some(Receiver::Instance {
            object: Box::new(object),
        }),
        method: method.into(),
        args,
        span: Span::default(),
    }
}

pub fn prop(object: Expr, name: impl Into<String>) -> Expr {
    Expr::Property {
        receiver: Receiver::Instance {
            object: Box::new(object),
        },
        name: name.into(),
        span: Span::default(),
    }
}

pub fn static_prop(type_name: impl Into<String>, name: impl Into<String>) -> Expr {
    Expr::Property {
        receiver: Receiver::Static {
            type_name: type_name.into(),
        },
        name: name.into(),
        span: Span::default(),
    }
}

pub fn new(type_name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Instantiate {
        type_name: type_name.into(),
        args,
        span: Span::default(),
    }
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::ArrayCreation {
        items,
        span: Span::default(),
    }
}

/* ===================== Statements ===================== */

pub fn declare(name: impl Into<String>, init: Option<Expr>) -> Stmt {
    Stmt::Declare {
        name: name.into(),
        shape: Shape::Scalar,
        init,
        span: Span::default(),
    }
}

pub fn declare_array(name: impl Into<String>, init: Option<Expr>) -> Stmt {
    Stmt::Declare {
        name: name.into(),
        shape: Shape::Array,
        init,
        span: Span::default(),
    }
}

pub fn assign(target: Expr, value: Expr) -> Stmt {
    Stmt::Assign {
        target,
        value,
        span: Span::default(),
    }
}

pub fn if_then(test: Expr, then_block: Vec<Stmt>) -> Stmt {
    Stmt::Condition {
        test,
        then_block: Block::new(then_block),
        else_block: None,
        span: Span::default(),
    }
}

pub fn if_else(test: Expr, then_block: Vec<Stmt>, else_block: Vec<Stmt>) -> Stmt {
    Stmt::Condition {
        test,
        then_block: Block::new(then_block),
        else_block: Some(Block::new(else_block)),
        span: Span::default(),
    }
}

pub fn while_loop(test: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::Iteration {
        kind: IterationKind::PreCondition,
        test,
        body: Block::new(body),
        span: Span::default(),
    }
}

pub fn do_while(body: Vec<Stmt>, test: Expr) -> Stmt {
    Stmt::Iteration {
        kind: IterationKind::PostCondition,
        test,
        body: Block::new(body),
        span: Span::default(),
    }
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return {
        value: Some(value),
        span: Span::default(),
    }
}

pub fn ret_void() -> Stmt {
    Stmt::Return {
        value: None,
        span: Span::default(),
    }
}

pub fn brk() -> Stmt {
    Stmt::Break {
        span: Span::default(),
    }
}

pub fn throw(value: Expr) -> Stmt {
    Stmt::Throw {
        value,
        span: Span::default(),
    }
}

pub fn try_catch(body: Vec<Stmt>, catch_var: Option<&str>, catch_body: Vec<Stmt>) -> Stmt {
    Stmt::TryCatch {
        body: Block::new(body),
        catch_var: catch_var.map(str::to_string),
        catch_body: Block::new(catch_body),
        span: Span::default(),
    }
}

pub fn expr(expr: Expr) -> Stmt {
    Stmt::Expr {
        expr,
        span: Span::default(),
    }
}

/// Attach a source line to a statement (0-indexed, as in [`Span`])
pub fn at_line(line: usize, stmt: Stmt) -> Stmt {
    stmt.with_span(Span::line(line))
}

/* ===================== Methods & Programs ===================== */

pub struct MethodBuilder {
    name: String,
    is_entry_point: bool,
    is_async: bool,
    params: Vec<Param>,
    body: Vec<Stmt>,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_entry_point: false,
            is_async: false,
            params: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn entry_point(mut self) -> Self {
        self.is_entry_point = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            shape: Shape::Scalar,
        });
        self
    }

    pub fn array_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            shape: Shape::Array,
        });
        self
    }

    pub fn body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }

    fn build(self, id: MethodId) -> Method {
        Method {
            id,
            name: self.name,
            is_entry_point: self.is_entry_point,
            is_async: self.is_async,
            params: self.params,
            body: Block::new(self.body),
            span: Span::default(),
        }
    }
}

/// Builds a [`Program`], assigning method ids in declaration order
#[derive(Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: MethodBuilder) -> Self {
        let id = MethodId(self.program.methods.len() as u32);
        self.program.methods.push(method.build(id));
        self
    }

    pub fn global(mut self, name: impl Into<String>, shape: Shape, init: Option<Expr>) -> Self {
        self.program.globals.push(VarDecl {
            name: name.into(),
            shape,
            init,
            span: Span::default(),
        });
        self
    }

    pub fn assembly(mut self, name: impl Into<String>) -> Self {
        self.program.assemblies.push(name.into());
        self
    }

    pub fn build(self) -> Program {
        self.program
    }
}
