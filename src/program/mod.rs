//! Program Model
//!
//! The immutable tree of methods, statements and expressions handed over by
//! the external parser. The optimizer consumes one [`Program`] and produces a
//! new one; nothing in this crate edits a tree in place.

pub mod ast;
pub mod builder;

pub use ast::{
    BinaryOp, Block, Expr, IterationKind, Literal, Method, MethodId, Param, Program, Receiver,
    Shape, Span, Stmt, UnaryOp, VarDecl,
};
