//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns the AST.
//! - `codegen` lowers the AST onto the eight-instruction tape machine,
//!   with `tape` handling cell bookkeeping and `library` the built-in I/O
//!   routines.
//! - `optimize` rewrites the emitted instruction buffer (behind a flag).
//! - `program` holds the instruction buffer and the final minifier.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod ast;
pub mod error;
pub mod optimize;
pub mod parser;
pub mod program;
pub mod tokenizer;
pub mod ty;

mod codegen;
mod library;
mod tape;

pub use error::{CompileError, CompileResult};
pub use program::Program;

/// Knobs exposed by the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
  pub optimize: bool,
  pub verbose: bool,
}

/// Compile a source string down to the instruction buffer, stopping short of
/// minification.
pub fn compile_to_program(source: &str, options: &Options) -> CompileResult<Program> {
  let tokens = tokenizer::tokenize(source)?;
  if options.verbose {
    eprintln!("byteflow: {} token(s)", tokens.len());
  }

  let unit = parser::parse(tokens)?;
  if options.verbose {
    eprintln!("byteflow: {} top-level declaration(s)", unit.decls.len());
  }

  let (emitted, stats) = codegen::generate(&unit)?;
  if options.verbose {
    eprintln!(
      "byteflow: emitted {} instruction(s), tape high-water mark {} cell(s)",
      stats.instructions, stats.tape_cells
    );
  }

  if options.optimize {
    let optimized = optimize::optimize(&emitted);
    if options.verbose {
      eprintln!(
        "byteflow: peephole kept {} of {} instruction(s)",
        optimized.len(),
        stats.instructions
      );
    }
    Ok(optimized)
  } else {
    Ok(emitted)
  }
}

/// Compile a source string into the final minified program text.
pub fn compile(source: &str, options: &Options) -> CompileResult<String> {
  Ok(compile_to_program(source, options)?.minified())
}
