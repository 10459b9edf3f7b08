//! Shared error utilities used across the compilation pipeline.
//!
//! Every diagnostic carries the line/column of the offending token so the
//! driver can print `line:col` style messages. The taxonomy mirrors the
//! pipeline: lexical and syntax errors halt before emission, semantic and
//! capacity errors halt before optimization, and an internal error always
//! means a bug in the emitter's bookkeeping, never in the compiled program.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("{line}:{column}: lexical error: {message}"))]
  Lexical {
    message: String,
    line: u32,
    column: u32,
  },

  #[snafu(display("{line}:{column}: syntax error: {message}"))]
  Syntax {
    message: String,
    line: u32,
    column: u32,
  },

  #[snafu(display("{line}:{column}: semantic error: {message}"))]
  Semantic {
    message: String,
    line: u32,
    column: u32,
  },

  #[snafu(display("{line}:{column}: capacity error: {message}"))]
  Capacity {
    message: String,
    line: u32,
    column: u32,
  },

  #[snafu(display("internal error: {message}"))]
  Internal { message: String },
}

impl CompileError {
  pub fn lexical(message: impl Into<String>, line: u32, column: u32) -> Self {
    Self::Lexical {
      message: message.into(),
      line,
      column,
    }
  }

  pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
    Self::Syntax {
      message: message.into(),
      line,
      column,
    }
  }

  pub fn semantic(message: impl Into<String>, line: u32, column: u32) -> Self {
    Self::Semantic {
      message: message.into(),
      line,
      column,
    }
  }

  pub fn capacity(message: impl Into<String>, line: u32, column: u32) -> Self {
    Self::Capacity {
      message: message.into(),
      line,
      column,
    }
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }

  /// Process exit code for the driver: compilation errors are `2`, broken
  /// compiler invariants are `3`. (`1` is reserved for usage errors and is
  /// decided before compilation starts.)
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::Internal { .. } => 3,
      _ => 2,
    }
  }
}
