//! Abstract syntax tree for the surface language.
//!
//! The tree is a closed sum: declarations at the top, then statements, then
//! expressions. Every node carries the line/column of its introducing token
//! so the emitter can anchor semantic diagnostics.

use crate::ty::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  And,
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
  Neg,     // -x
  Not,     // !x
  BitNot,  // ~x (byte complement)
  PreInc,  // ++x
  PreDec,  // --x
  PostInc, // x++
  PostDec, // x--
}

#[derive(Debug, Clone)]
pub struct Expr {
  pub kind: ExprKind,
  pub line: u32,
  pub column: u32,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
  IntLit(u8),
  CharLit(u8),
  BoolLit(bool),
  /// Only legal as the argument of `print`; checked by the emitter.
  StrLit(String),
  Ident(String),
  /// `name[i]...[k]` – one index expression per declared dimension.
  Index { name: String, indices: Vec<Expr> },
  Unary {
    op: UnOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Ternary {
    cond: Box<Expr>,
    then_val: Box<Expr>,
    else_val: Box<Expr>,
  },
  Call { name: String, args: Vec<Expr> },
}

impl Expr {
  pub fn new(kind: ExprKind, line: u32, column: u32) -> Self {
    Self { kind, line, column }
  }

  /// Compile-time value, if the expression is a plain literal.
  pub fn const_value(&self) -> Option<u8> {
    match self.kind {
      ExprKind::IntLit(v) | ExprKind::CharLit(v) => Some(v),
      ExprKind::BoolLit(b) => Some(b as u8),
      _ => None,
    }
  }
}

/// Initializer attached to a variable declaration.
#[derive(Debug, Clone)]
pub enum VarInit {
  None,
  Expr(Expr),
  /// Flattened literal list (or string bytes) for array declarations.
  List(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Stmt {
  pub kind: StmtKind,
  pub line: u32,
  pub column: u32,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
  Block(Vec<Stmt>),
  VarDecl {
    name: String,
    ty: Type,
    init: VarInit,
  },
  /// `target = value` or a compound form (`op` holds the folded operator).
  Assign {
    target: Expr,
    op: Option<BinOp>,
    value: Expr,
  },
  If {
    cond: Expr,
    then_branch: Box<Stmt>,
    else_branch: Option<Box<Stmt>>,
  },
  While { cond: Expr, body: Box<Stmt> },
  DoWhile { body: Box<Stmt>, cond: Expr },
  For {
    init: Option<Box<Stmt>>,
    cond: Option<Expr>,
    step: Option<Box<Stmt>>,
    body: Box<Stmt>,
  },
  Switch {
    scrutinee: Expr,
    cases: Vec<SwitchCase>,
  },
  Break,
  Return(Option<Expr>),
  Expr(Expr),
  Empty,
}

/// One `case lit:` (or `default:`) arm and its statements.
#[derive(Debug, Clone)]
pub struct SwitchCase {
  /// `None` marks the `default` arm.
  pub value: Option<u8>,
  pub body: Vec<Stmt>,
  pub line: u32,
  pub column: u32,
}

#[derive(Debug, Clone)]
pub struct Param {
  pub name: String,
  pub ty: Type,
  pub line: u32,
  pub column: u32,
}

#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  pub ret: Type,
  pub params: Vec<Param>,
  pub body: Vec<Stmt>,
  pub line: u32,
  pub column: u32,
}

#[derive(Debug, Clone)]
pub enum Decl {
  /// Global scalar or array; initializers are restricted to literals.
  Global {
    name: String,
    ty: Type,
    init: VarInit,
    line: u32,
    column: u32,
  },
  Function(Function),
}

/// A complete source file.
#[derive(Debug)]
pub struct TranslationUnit {
  pub decls: Vec<Decl>,
}

impl Stmt {
  pub fn new(kind: StmtKind, line: u32, column: u32) -> Self {
    Self { kind, line, column }
  }

  /// True if executing this statement can hit a `break` that would escape
  /// it – i.e. a `break` not already captured by a nested loop or switch.
  pub fn can_break(&self) -> bool {
    match &self.kind {
      StmtKind::Break => true,
      StmtKind::Block(stmts) => stmts.iter().any(Stmt::can_break),
      StmtKind::If {
        then_branch,
        else_branch,
        ..
      } => {
        then_branch.can_break() || else_branch.as_deref().is_some_and(Stmt::can_break)
      }
      // Loops and switches capture their own breaks.
      StmtKind::While { .. }
      | StmtKind::DoWhile { .. }
      | StmtKind::For { .. }
      | StmtKind::Switch { .. } => false,
      _ => false,
    }
  }

  /// True if executing this statement can hit a `return`. Calls do not
  /// count: a callee's return terminates the callee's own frame.
  pub fn can_return(&self) -> bool {
    match &self.kind {
      StmtKind::Return(_) => true,
      StmtKind::Block(stmts) => stmts.iter().any(Stmt::can_return),
      StmtKind::If {
        then_branch,
        else_branch,
        ..
      } => {
        then_branch.can_return() || else_branch.as_deref().is_some_and(Stmt::can_return)
      }
      StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => body.can_return(),
      StmtKind::For { body, .. } => body.can_return(),
      StmtKind::Switch { cases, .. } => {
        cases.iter().any(|case| case.body.iter().any(Stmt::can_return))
      }
      _ => false,
    }
  }
}
