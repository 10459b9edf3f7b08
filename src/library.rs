//! Built-in I/O routines, emitted as pre-lowered code templates.
//!
//! These are not functions in the surface language sense: each call site
//! expands to a template built from the same emitter primitives as user
//! code, under the same tape discipline (fresh temporaries, everything
//! zeroed on the way out).

use crate::ast::{Expr, ExprKind};
use crate::codegen::{CodeGen, Value};
use crate::error::{CompileError, CompileResult};
use crate::program::Instruction;
use crate::ty::Type;

const NAMES: &[&str] = &["print", "printchar", "printint", "readchar", "readint"];

pub(crate) fn is_library(name: &str) -> bool {
  NAMES.contains(&name)
}

pub(crate) fn emit_call(
  cg: &mut CodeGen,
  name: &str,
  args: &[Expr],
  line: u32,
  column: u32,
) -> CompileResult<Value> {
  match name {
    "print" => emit_print(cg, args, line, column),
    "printchar" => emit_printchar(cg, args, line, column),
    "printint" => emit_printint(cg, args, line, column),
    "readchar" => emit_readchar(cg, args, line, column),
    "readint" => emit_readint(cg, args, line, column),
    _ => Err(CompileError::internal(format!(
      "unknown library routine '{name}'"
    ))),
  }
}

fn expect_arity(
  name: &str,
  args: &[Expr],
  arity: usize,
  line: u32,
  column: u32,
) -> CompileResult<()> {
  if args.len() == arity {
    Ok(())
  } else {
    Err(CompileError::semantic(
      format!("'{name}' takes {arity} argument(s), called with {}", args.len()),
      line,
      column,
    ))
  }
}

fn emit_scalar_arg(cg: &mut CodeGen, arg: &Expr) -> CompileResult<Value> {
  let value = cg.emit_expr(arg)?;
  if !value.ty.is_scalar() {
    return Err(CompileError::semantic(
      "void value used where a byte value is required",
      arg.line,
      arg.column,
    ));
  }
  Ok(value)
}

/// `print("...")`: one scratch cell walks the character values by deltas and
/// prints each; nothing is stored.
fn emit_print(cg: &mut CodeGen, args: &[Expr], line: u32, column: u32) -> CompileResult<Value> {
  expect_arity("print", args, 1, line, column)?;
  let ExprKind::StrLit(text) = &args[0].kind else {
    return Err(CompileError::semantic(
      "'print' takes a single string literal",
      args[0].line,
      args[0].column,
    ));
  };
  cg.lib_note("print");
  let cell = cg.lib_alloc();
  let mut previous = 0u8;
  for &byte in text.as_bytes() {
    cg.lib_add_const(cell, byte.wrapping_sub(previous));
    cg.lib_move_to(cell);
    cg.lib_emit(Instruction::Output);
    previous = byte;
  }
  cg.lib_sub_const(cell, previous);
  Ok(Value {
    cell,
    ty: Type::Void,
  })
}

fn emit_printchar(
  cg: &mut CodeGen,
  args: &[Expr],
  line: u32,
  column: u32,
) -> CompileResult<Value> {
  expect_arity("printchar", args, 1, line, column)?;
  let v = emit_scalar_arg(cg, &args[0])?;
  cg.lib_move_to(v.cell);
  cg.lib_emit(Instruction::Output);
  Ok(Value {
    cell: v.cell,
    ty: Type::Void,
  })
}

/// Decimal print without leading zeros (`0` still prints `0`): split into
/// hundreds/tens/ones with the division template, then print each digit
/// under a visibility flag.
fn emit_printint(
  cg: &mut CodeGen,
  args: &[Expr],
  line: u32,
  column: u32,
) -> CompileResult<Value> {
  expect_arity("printint", args, 1, line, column)?;
  let v = emit_scalar_arg(cg, &args[0])?;
  cg.lib_note("printint");

  // hundreds in v, tens in `tens`, ones in `ones`.
  let tens = cg.lib_alloc();
  cg.lib_add_const(tens, 100);
  cg.lower_divmod(v.cell, tens)?;
  let ones = cg.lib_alloc();
  cg.lib_add_const(ones, 10);
  cg.lower_divmod(tens, ones)?;

  let show_hundreds = cg.lib_copy_temp(v.cell)?;
  let show_tens = cg.lib_alloc();
  let probe = cg.lib_copy_temp(v.cell)?;
  cg.lib_drain(probe, &[(show_tens, true)])?;
  cg.lib_free(probe)?;
  let probe = cg.lib_copy_temp(tens)?;
  cg.lib_drain(probe, &[(show_tens, true)])?;
  cg.lib_free(probe)?;

  cg.lib_begin_loop(show_hundreds);
  cg.lib_add_const(v.cell, b'0');
  cg.lib_move_to(v.cell);
  cg.lib_emit(Instruction::Output);
  cg.lib_clear(v.cell)?;
  cg.lib_clear(show_hundreds)?;
  cg.lib_end_loop(show_hundreds)?;

  cg.lib_begin_loop(show_tens);
  cg.lib_add_const(tens, b'0');
  cg.lib_move_to(tens);
  cg.lib_emit(Instruction::Output);
  cg.lib_clear(tens)?;
  cg.lib_clear(show_tens)?;
  cg.lib_end_loop(show_tens)?;

  cg.lib_add_const(ones, b'0');
  cg.lib_move_to(ones);
  cg.lib_emit(Instruction::Output);
  cg.lib_clear(ones)?;

  cg.lib_free(show_tens)?;
  cg.lib_free(show_hundreds)?;
  cg.lib_free(ones)?;
  cg.lib_free(tens)?;
  Ok(Value {
    cell: v.cell,
    ty: Type::Void,
  })
}

fn emit_readchar(
  cg: &mut CodeGen,
  args: &[Expr],
  line: u32,
  column: u32,
) -> CompileResult<Value> {
  expect_arity("readchar", args, 0, line, column)?;
  let cell = cg.lib_alloc();
  cg.lib_move_to(cell);
  cg.lib_emit(Instruction::Input);
  Ok(Value {
    cell,
    ty: Type::Char,
  })
}

/// Read decimal digits until the first non-digit byte (EOF reads as 0 and
/// stops too), accumulating `acc = acc * 10 + digit` with wrap.
fn emit_readint(cg: &mut CodeGen, args: &[Expr], line: u32, column: u32) -> CompileResult<Value> {
  expect_arity("readint", args, 0, line, column)?;
  cg.lib_note("readint");
  let acc = cg.lib_alloc();
  let c = cg.lib_alloc();
  cg.lib_move_to(c);
  cg.lib_emit(Instruction::Input);
  let is_digit = cg.lib_alloc();
  emit_digit_test(cg, c, is_digit)?;

  cg.lib_begin_loop(is_digit);
  cg.lib_clear(is_digit)?;
  // acc = acc * 10
  let shifted = cg.lib_alloc();
  cg.lib_begin_loop(acc);
  cg.lib_emit(Instruction::Dec);
  cg.lib_add_const(shifted, 10);
  cg.lib_end_loop(acc)?;
  cg.lib_drain(shifted, &[(acc, true)])?;
  cg.lib_free(shifted)?;
  // acc += c - '0'
  cg.lib_sub_const(c, b'0');
  cg.lib_drain(c, &[(acc, true)])?;
  cg.lib_move_to(c);
  cg.lib_emit(Instruction::Input);
  emit_digit_test(cg, c, is_digit)?;
  cg.lib_end_loop(is_digit)?;

  cg.lib_clear(c)?;
  cg.lib_free(is_digit)?;
  cg.lib_free(c)?;
  Ok(Value {
    cell: acc,
    ty: Type::Int,
  })
}

/// `flag += ('0' <= c && c <= '9')`, preserving `c`.
fn emit_digit_test(cg: &mut CodeGen, c: usize, flag: usize) -> CompileResult<()> {
  let at_least = cg.lib_copy_temp(c)?;
  let low = cg.lib_alloc();
  cg.lib_add_const(low, b'0');
  cg.lib_lower_lt(at_least, low)?;
  cg.lib_not_in_place(at_least)?;

  let at_most = cg.lib_copy_temp(c)?;
  let high = cg.lib_alloc();
  cg.lib_add_const(high, b'9');
  cg.lib_swap(at_most, high)?;
  cg.lib_lower_lt(at_most, high)?;
  cg.lib_not_in_place(at_most)?;

  cg.lib_begin_loop(at_least);
  cg.lib_begin_loop(at_most);
  cg.lib_move_to(flag);
  cg.lib_emit(Instruction::Inc);
  cg.lib_clear(at_most)?;
  cg.lib_end_loop(at_most)?;
  cg.lib_clear(at_least)?;
  cg.lib_end_loop(at_least)?;
  cg.lib_free(at_most)?;
  cg.lib_free(at_least)
}
