//! Abstract Syntax Tree node types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source location span for error reporting and breakpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset
    pub end: usize,
    /// Start line (0-indexed)
    pub start_line: usize,
    /// Start column (0-indexed)
    pub start_col: usize,
    /// End line (0-indexed)
    pub end_line: usize,
    /// End column (0-indexed)
    pub end_col: usize,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            start,
            end,
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// A span covering the start of a single line
    pub fn line(line: usize) -> Self {
        Self {
            start_line: line,
            end_line: line,
            end_col: 1,
            ..Self::default()
        }
    }

    /// Synthetic nodes produced by the optimizer carry the default span
    pub fn is_synthetic(&self) -> bool {
        *self == Span::default()
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, col {}", self.start_line + 1, self.start_col + 1)
    }
}

/// Stable method identity. Names are not unique after inlining duplicates
/// bodies, ids are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub u32);

/// Declared shape of a variable or parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Scalar,
    Array,
    /// Only produced by the optimizer for return receivers and hoisted
    /// temporaries, whose shape is decided by the value they receive.
    Dynamic,
}

/// Method parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub shape: Shape,
}

/// Global variable declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    #[serde(default)]
    pub shape: Shape,
    #[serde(default)]
    pub init: Option<Expr>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub id: MethodId,
    pub name: String,
    #[serde(default)]
    pub is_entry_point: bool,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub params: Vec<Param>,
    pub body: Block,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/// A complete program as produced by the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Program {
    pub methods: Vec<Method>,
    #[serde(default)]
    pub globals: Vec<VarDecl>,
    /// Referenced host assemblies, resolved when a session prepares
    #[serde(default)]
    pub assemblies: Vec<String>,
    /// Set by the optimizer; a lowered program is never lowered again
    #[serde(default)]
    pub lowered: bool,
}

impl Program {
    /// Find a method by its exact name
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter().filter(|m| m.is_entry_point)
    }
}

/* ===================== Blocks ===================== */

/// Ordered statement sequence with a precomputed label index.
///
/// The index is built once when the block is constructed (or deserialized),
/// so a jump is a single map lookup instead of a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Stmt>", into = "Vec<Stmt>")]
pub struct Block {
    statements: Vec<Stmt>,
    labels: HashMap<String, usize>,
}

impl Block {
    pub fn new(statements: Vec<Stmt>) -> Self {
        let mut labels = HashMap::new();
        for (idx, stmt) in statements.iter().enumerate() {
            if let Stmt::Label { name, .. } = stmt {
                labels.entry(name.clone()).or_insert(idx);
            }
        }
        Self { statements, labels }
    }

    pub fn statements(&self) -> &[Stmt] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Position of a label declaration in this block (not in nested blocks)
    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stmt> {
        self.statements.iter()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.statements == other.statements
    }
}

impl From<Vec<Stmt>> for Block {
    fn from(statements: Vec<Stmt>) -> Self {
        Block::new(statements)
    }
}

impl From<Block> for Vec<Stmt> {
    fn from(block: Block) -> Self {
        block.statements
    }
}

impl<'a> IntoIterator for &'a Block {
    type Item = &'a Stmt;
    type IntoIter = std::slice::Iter<'a, Stmt>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

/* ===================== Statements ===================== */

/// Loop kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterationKind {
    /// `while (test) { ... }`
    PreCondition,
    /// `do { ... } while (test)`
    PostCondition,
}

/// Statement AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Declare {
        name: String,
        #[serde(default)]
        shape: Shape,
        init: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Assign {
        target: Expr,
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Condition {
        test: Expr,
        then_block: Block,
        else_block: Option<Block>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// Jumps to `label` when `test` is false, falls through otherwise
    LabelCondition {
        test: Expr,
        label: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Iteration {
        kind: IterationKind,
        test: Expr,
        body: Block,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Return {
        value: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Break {
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Throw {
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    TryCatch {
        body: Block,
        catch_var: Option<String>,
        catch_body: Block,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Expr {
        expr: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Label {
        name: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Goto {
        label: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

impl Stmt {
    /// Get the span of this statement
    pub fn span(&self) -> Span {
        match self {
            Stmt::Declare { span, .. } => *span,
            Stmt::Assign { span, .. } => *span,
            Stmt::Condition { span, .. } => *span,
            Stmt::LabelCondition { span, .. } => *span,
            Stmt::Iteration { span, .. } => *span,
            Stmt::Return { span, .. } => *span,
            Stmt::Break { span } => *span,
            Stmt::Throw { span, .. } => *span,
            Stmt::TryCatch { span, .. } => *span,
            Stmt::Expr { span, .. } => *span,
            Stmt::Label { span, .. } => *span,
            Stmt::Goto { span, .. } => *span,
        }
    }

    /// Replace the span of this statement
    pub fn with_span(mut self, new_span: Span) -> Self {
        match &mut self {
            Stmt::Declare { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Condition { span, .. }
            | Stmt::LabelCondition { span, .. }
            | Stmt::Iteration { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Break { span }
            | Stmt::Throw { span, .. }
            | Stmt::TryCatch { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Label { span, .. }
            | Stmt::Goto { span, .. } => *span = new_span,
        }
        self
    }

    /// Short node name used in diagnostics and error snapshots
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::Declare { .. } => "declare-variable",
            Stmt::Assign { .. } => "assign",
            Stmt::Condition { .. } => "condition",
            Stmt::LabelCondition { .. } => "label-condition",
            Stmt::Iteration { .. } => "iteration",
            Stmt::Return { .. } => "return",
            Stmt::Break { .. } => "break",
            Stmt::Throw { .. } => "throw",
            Stmt::TryCatch { .. } => "try-catch",
            Stmt::Expr { .. } => "expression",
            Stmt::Label { .. } => "label-declaration",
            Stmt::Goto { .. } => "goto-label",
        }
    }

    /// Label declarations and jumps are bookkeeping nodes, not user code
    pub fn is_jump_plumbing(&self) -> bool {
        matches!(self, Stmt::Label { .. } | Stmt::Goto { .. })
    }
}

/* ===================== Expressions ===================== */

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuit `and`
    And,
    /// Short-circuit `or`
    Or,
}

impl BinaryOp {
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Owner of a host member: a type (static access) or an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Receiver {
    Static { type_name: String },
    Instance { object: Box<Expr> },
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    Literal {
        value: Literal,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Variable {
        name: String,
        /// Skips local scopes; set on references inlined from a callee that
        /// does not declare the name itself
        #[serde(default, skip_serializing_if = "is_false")]
        global: bool,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Property {
        receiver: Receiver,
        name: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `receiver: None` calls a method of the program itself
    Invoke {
        receiver: Option<Receiver>,
        method: String,
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Instantiate {
        type_name: String,
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    ArrayCreation {
        items: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

impl Expr {
    /// Get the span of this expression
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. } => *span,
            Expr::Variable { span, .. } => *span,
            Expr::Property { span, .. } => *span,
            Expr::Index { span, .. } => *span,
            Expr::Binary { span, .. } => *span,
            Expr::Unary { span, .. } => *span,
            Expr::Invoke { span, .. } => *span,
            Expr::Instantiate { span, .. } => *span,
            Expr::ArrayCreation { span, .. } => *span,
        }
    }

    /// Name and arguments when this is a call to a program method
    pub fn as_program_call(&self) -> Option<(&str, &[Expr])> {
        match self {
            Expr::Invoke {
                receiver: None,
                method,
                args,
                ..
            } => Some((method.as_str(), args.as_slice())),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Literal { .. } => "literal",
            Expr::Variable { .. } => "variable-reference",
            Expr::Property { .. } => "property-reference",
            Expr::Index { .. } => "array-index",
            Expr::Binary { .. } => "binary-operator",
            Expr::Unary { .. } => "unary-operator",
            Expr::Invoke { .. } => "invoke",
            Expr::Instantiate { .. } => "instantiate",
            Expr::ArrayCreation { .. } => "array-creation",
        }
    }
}

/// Helper function for serde to skip serializing default spans
fn is_default_span(span: &Span) -> bool {
    *span == Span::default()
}

fn is_false(value: &bool) -> bool {
    !*value
}
