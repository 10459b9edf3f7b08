//! Code generation: lower the parsed AST onto the eight-instruction tape
//! machine.
//!
//! The emitter owns all mutable compilation state (symbol table, cell
//! allocator, instruction buffer, compile-time pointer position) and walks
//! the AST directly; there is no further IR. The discipline throughout:
//!
//! - Every cell address is known at compile time. `move_to` emits the
//!   `>`/`<` run between two known cells; the lone exception is the array
//!   indexing walker, which carries its state alongside the pointer and
//!   provably returns it to a known cell.
//! - Every expression leaves its one-byte result in a fresh temporary and
//!   every statement returns the pointer to the frame's work origin (the
//!   return-flag cell of the active frame).
//! - Temporaries are zero when acquired and must be zero again when
//!   released, which is what makes `[`…`]` usable as a conditional.
//! - Function bodies sit inside a return-flag envelope and every loop inside
//!   a live-flag envelope, so `return` and `break` lower to clearing a flag
//!   plus flag-guarded emission of whatever statements follow.
//!
//! Calls are lowered per call site: the callee's frame is laid out after the
//! caller's live cells and its body is emitted right there, which is why
//! recursion is rejected up front.

use std::collections::HashMap;

use crate::ast::{
  BinOp, Decl, Expr, ExprKind, Function, Stmt, StmtKind, SwitchCase, TranslationUnit, UnOp,
  VarInit,
};
use crate::error::{CompileError, CompileResult};
use crate::library;
use crate::program::{Instruction, Program};
use crate::tape::{cells_for, CellAllocator, SymbolTable, Symbol, ARRAY_HEADER};
use crate::ty::Type;

/// Flattened arrays must stay addressable by a byte-wide index.
const MAX_ARRAY_CELLS: usize = 255;

/// Figures the driver reports in verbose mode.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
  pub instructions: usize,
  pub tape_cells: usize,
}

/// An expression result: one byte in a temporary cell.
pub(crate) struct Value {
  pub cell: usize,
  pub ty: Type,
}

struct Frame {
  function: String,
  /// Work origin; also the frame base.
  origin: usize,
  return_flag: usize,
  return_value: usize,
  ret: Type,
  /// Live-flag cells of enclosing loops/switches, innermost last.
  breaks: Vec<usize>,
}

/// A resolved array mention, detached from the symbol table borrow.
struct ArrayRef {
  header: usize,
  data: usize,
  dims: Vec<usize>,
  flat: usize,
  elem: Type,
}

/// Where an assignment lands.
enum Slot {
  /// A scalar variable or a constant-index element: a fixed cell.
  Cell(usize),
  /// A variable-index element: the walker header plus an owned temporary
  /// holding the flattened index.
  Walker { header: usize, index: usize },
}

pub struct CodeGen<'a> {
  functions: HashMap<&'a str, &'a Function>,
  symbols: SymbolTable,
  cells: CellAllocator,
  buf: Program,
  ptr: usize,
  open_loops: Vec<usize>,
  frames: Vec<Frame>,
  emitting: Vec<String>,
}

/// Lower a whole translation unit to a tape program.
pub fn generate(unit: &TranslationUnit) -> CompileResult<(Program, Stats)> {
  let mut functions: HashMap<&str, &Function> = HashMap::new();
  for decl in &unit.decls {
    if let Decl::Function(f) = decl {
      if library::is_library(&f.name) {
        return Err(CompileError::semantic(
          format!("'{}' is a built-in routine and cannot be redefined", f.name),
          f.line,
          f.column,
        ));
      }
      if functions.insert(f.name.as_str(), f).is_some() {
        return Err(CompileError::semantic(
          format!("function '{}' is already defined", f.name),
          f.line,
          f.column,
        ));
      }
    }
  }

  let mut cg = CodeGen {
    functions,
    symbols: SymbolTable::new(),
    cells: CellAllocator::new(),
    buf: Program::new(),
    ptr: 0,
    open_loops: Vec::new(),
    frames: Vec::new(),
    emitting: Vec::new(),
  };

  cg.emit_globals(unit)?;
  cg.emit_entry()?;

  if !cg.open_loops.is_empty() {
    return Err(CompileError::internal("unclosed loop at end of emission"));
  }
  let stats = Stats {
    instructions: cg.buf.len(),
    tape_cells: cg.cells.high_water(),
  };
  Ok((cg.buf, stats))
}

impl<'a> CodeGen<'a> {
  // ----- Top level -----

  /// Globals occupy the fixed prefix of the tape, initialized in place.
  fn emit_globals(&mut self, unit: &'a TranslationUnit) -> CompileResult<()> {
    self.symbols.enter(self.cells.mark());
    for decl in &unit.decls {
      let Decl::Global {
        name,
        ty,
        init,
        line,
        column,
      } = decl
      else {
        continue;
      };
      self.check_array_capacity(ty, *line, *column)?;
      let base = self.cells.reserve(cells_for(ty));
      let symbol = Symbol {
        name: name.clone(),
        ty: ty.clone(),
        cell: base,
        is_param: false,
      };
      let data = symbol.data_cell();
      if !self.symbols.declare(symbol) {
        return Err(CompileError::semantic(
          format!("redeclaration of global '{name}'"),
          *line,
          *column,
        ));
      }
      match init {
        VarInit::None => {}
        VarInit::Expr(e) => {
          let value = e.const_value().ok_or_else(|| {
            CompileError::internal("non-literal global initializer escaped the parser")
          })?;
          self.add_const(base, value);
        }
        VarInit::List(values) => {
          self.emit_list_init(ty, data, values, *line, *column)?;
        }
      }
    }
    Ok(())
  }

  /// The program is one call to `main` in a frame just past the globals.
  fn emit_entry(&mut self) -> CompileResult<()> {
    let Some(main) = self.functions.get("main").copied() else {
      return Err(CompileError::semantic("no 'main' function defined", 1, 1));
    };
    if main.ret != Type::Int || !main.params.is_empty() {
      return Err(CompileError::semantic(
        "'main' must be declared as 'int main()'",
        main.line,
        main.column,
      ));
    }
    let result = self.emit_call("main", &[], main.line, main.column)?;
    self.clear(result.cell)?;
    self.free(result.cell)?;
    self.move_to(0);
    Ok(())
  }

  // ----- Instruction-level primitives -----

  fn emit(&mut self, instruction: Instruction) {
    self.buf.push(instruction);
  }

  fn note(&mut self, text: &str) {
    self.buf.push(Instruction::comment(text));
  }

  fn move_to(&mut self, cell: usize) {
    while self.ptr < cell {
      self.emit(Instruction::Right);
      self.ptr += 1;
    }
    while self.ptr > cell {
      self.emit(Instruction::Left);
      self.ptr -= 1;
    }
  }

  /// Add `n` (mod 256) to a cell, taking the shorter direction around.
  fn add_const(&mut self, cell: usize, n: u8) {
    if n == 0 {
      return;
    }
    self.move_to(cell);
    if n <= 128 {
      for _ in 0..n {
        self.emit(Instruction::Inc);
      }
    } else {
      for _ in 0..(256 - n as u16) {
        self.emit(Instruction::Dec);
      }
    }
  }

  fn sub_const(&mut self, cell: usize, n: u8) {
    self.add_const(cell, 0u8.wrapping_sub(n));
  }

  fn begin_loop(&mut self, cell: usize) {
    self.move_to(cell);
    self.emit(Instruction::LoopStart);
    self.open_loops.push(cell);
  }

  fn end_loop(&mut self, cell: usize) -> CompileResult<()> {
    self.move_to(cell);
    match self.open_loops.pop() {
      Some(open) if open == cell => {
        self.emit(Instruction::LoopEnd);
        Ok(())
      }
      Some(open) => Err(CompileError::internal(format!(
        "loop opened at cell {open} but closed at cell {cell}"
      ))),
      None => Err(CompileError::internal("loop closed without a matching open")),
    }
  }

  /// `[-]`: zero a cell of unknown value.
  fn clear(&mut self, cell: usize) -> CompileResult<()> {
    self.begin_loop(cell);
    self.emit(Instruction::Dec);
    self.end_loop(cell)
  }

  /// Move `src` into the targets: `targets` receive +src or -src each and
  /// `src` ends zero.
  fn drain(&mut self, src: usize, targets: &[(usize, bool)]) -> CompileResult<()> {
    self.begin_loop(src);
    self.emit(Instruction::Dec);
    for &(cell, inc) in targets {
      self.move_to(cell);
      self.emit(if inc { Instruction::Inc } else { Instruction::Dec });
    }
    self.end_loop(src)
  }

  pub(crate) fn alloc(&mut self) -> usize {
    self.cells.alloc_temp()
  }

  pub(crate) fn free(&mut self, cell: usize) -> CompileResult<()> {
    self.cells.free_temp(cell)
  }

  /// The copy idiom: duplicate a cell through a scratch, restoring the
  /// source. Returns a fresh temporary holding the copy.
  fn copy_temp(&mut self, src: usize) -> CompileResult<usize> {
    let dst = self.alloc();
    let scratch = self.alloc();
    self.drain(src, &[(dst, true), (scratch, true)])?;
    self.drain(scratch, &[(src, true)])?;
    self.free(scratch)?;
    Ok(dst)
  }

  // ----- Cell-level algorithms -----

  /// Normalize a cell to 0/1 in place.
  fn bool_cast(&mut self, cell: usize) -> CompileResult<()> {
    let t = self.alloc();
    self.begin_loop(cell);
    self.add_const(t, 1);
    self.clear(cell)?;
    self.end_loop(cell)?;
    self.drain(t, &[(cell, true)])?;
    self.free(t)
  }

  /// `cell ← (cell == 0)` for any input value.
  fn not_in_place(&mut self, cell: usize) -> CompileResult<()> {
    let t = self.alloc();
    self.add_const(t, 1);
    self.begin_loop(cell);
    self.move_to(t);
    self.emit(Instruction::Dec);
    self.clear(cell)?;
    self.end_loop(cell)?;
    self.drain(t, &[(cell, true)])?;
    self.free(t)
  }

  /// `dst += (x != 0 && y != 0)`, preserving `x` and `y`.
  fn both_nonzero_into(&mut self, x: usize, y: usize, dst: usize) -> CompileResult<()> {
    let cx = self.copy_temp(x)?;
    let cy = self.copy_temp(y)?;
    self.begin_loop(cx);
    self.begin_loop(cy);
    self.move_to(dst);
    self.emit(Instruction::Inc);
    self.clear(cy)?;
    self.end_loop(cy)?;
    self.clear(cx)?;
    self.end_loop(cx)?;
    self.free(cy)?;
    self.free(cx)
  }

  fn swap(&mut self, x: usize, y: usize) -> CompileResult<()> {
    let t = self.alloc();
    self.drain(x, &[(t, true)])?;
    self.drain(y, &[(x, true)])?;
    self.drain(t, &[(y, true)])?;
    self.free(t)
  }

  fn lower_add(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.drain(y, &[(x, true)])?;
    self.free(y)
  }

  fn lower_sub(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.drain(y, &[(x, false)])?;
    self.free(y)
  }

  /// `x ← x * y`: repeated addition of `y`, re-copying `y` each round.
  fn lower_mul(&mut self, x: usize, y: usize) -> CompileResult<()> {
    let acc = self.alloc();
    let scratch = self.alloc();
    self.begin_loop(x);
    self.emit(Instruction::Dec);
    self.drain(y, &[(acc, true), (scratch, true)])?;
    self.drain(scratch, &[(y, true)])?;
    self.end_loop(x)?;
    self.clear(y)?;
    self.drain(acc, &[(x, true)])?;
    self.free(scratch)?;
    self.free(acc)?;
    self.free(y)
  }

  /// `x ← (x == y)`: fold `x` into `y` by simultaneous decrement, then test
  /// the difference for zero. Wrap-around keeps this exact on bytes.
  fn lower_eq(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.drain(x, &[(y, false)])?;
    self.add_const(x, 1);
    self.begin_loop(y);
    self.move_to(x);
    self.emit(Instruction::Dec);
    self.clear(y)?;
    self.end_loop(y)?;
    self.free(y)
  }

  fn lower_ne(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.drain(x, &[(y, false)])?;
    self.begin_loop(y);
    self.move_to(x);
    self.emit(Instruction::Inc);
    self.clear(y)?;
    self.end_loop(y)?;
    self.free(y)
  }

  /// `x ← (x < y)`: decrement both while both are non-zero; whoever keeps a
  /// remainder decides. Unsigned bytes, so no wrap subtleties.
  fn lower_lt(&mut self, x: usize, y: usize) -> CompileResult<()> {
    let cond = self.alloc();
    self.both_nonzero_into(x, y, cond)?;
    self.begin_loop(cond);
    self.clear(cond)?;
    self.move_to(x);
    self.emit(Instruction::Dec);
    self.move_to(y);
    self.emit(Instruction::Dec);
    self.both_nonzero_into(x, y, cond)?;
    self.end_loop(cond)?;
    self.clear(x)?;
    self.begin_loop(y);
    self.move_to(x);
    self.emit(Instruction::Inc);
    self.clear(y)?;
    self.end_loop(y)?;
    self.free(cond)?;
    self.free(y)
  }

  fn lower_gt(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.swap(x, y)?;
    self.lower_lt(x, y)
  }

  fn lower_le(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.lower_gt(x, y)?;
    self.not_in_place(x)
  }

  fn lower_ge(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.lower_lt(x, y)?;
    self.not_in_place(x)
  }

  /// `dst += (n >= d)`, preserving `n` and `d`.
  fn ge_into(&mut self, n: usize, d: usize, dst: usize) -> CompileResult<()> {
    let cn = self.copy_temp(n)?;
    let cd = self.copy_temp(d)?;
    self.lower_lt(cn, cd)?;
    self.not_in_place(cn)?;
    self.drain(cn, &[(dst, true)])?;
    self.free(cn)
  }

  /// Division by repeated subtraction: afterwards `n` holds the quotient and
  /// `d` the remainder. Callers must emit the zero-divisor guard first.
  pub(crate) fn lower_divmod(&mut self, n: usize, d: usize) -> CompileResult<()> {
    let quotient = self.alloc();
    let cond = self.alloc();
    self.ge_into(n, d, cond)?;
    self.begin_loop(cond);
    self.clear(cond)?;
    let step = self.copy_temp(d)?;
    self.drain(step, &[(n, false)])?;
    self.free(step)?;
    self.add_const(quotient, 1);
    self.ge_into(n, d, cond)?;
    self.end_loop(cond)?;
    self.clear(d)?;
    self.drain(n, &[(d, true)])?;
    self.drain(quotient, &[(n, true)])?;
    self.free(cond)?;
    self.free(quotient)
  }

  /// A zero divisor writes 255 into a sentinel cell and parks the program
  /// in a loop that never terminates (the cell is never decremented).
  pub(crate) fn emit_divzero_guard(&mut self, divisor: usize) -> CompileResult<()> {
    let is_zero = self.alloc();
    let probe = self.copy_temp(divisor)?;
    self.add_const(is_zero, 1);
    self.begin_loop(probe);
    self.move_to(is_zero);
    self.emit(Instruction::Dec);
    self.clear(probe)?;
    self.end_loop(probe)?;
    self.free(probe)?;
    self.begin_loop(is_zero);
    let sentinel = self.alloc();
    self.add_const(sentinel, 255);
    self.begin_loop(sentinel);
    self.end_loop(sentinel)?;
    // Unreachable at runtime; the bookkeeping below keeps emission sound.
    self.clear(sentinel)?;
    self.free(sentinel)?;
    self.clear(is_zero)?;
    self.end_loop(is_zero)?;
    self.free(is_zero)
  }

  fn lower_div(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.emit_divzero_guard(y)?;
    self.lower_divmod(x, y)?;
    self.clear(y)?;
    self.free(y)
  }

  fn lower_mod(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.emit_divzero_guard(y)?;
    self.lower_divmod(x, y)?;
    self.clear(x)?;
    self.drain(y, &[(x, true)])?;
    self.free(y)
  }

  // ----- The array indexing walker -----

  /// Raw command sequence with the pointer bookkeeping suspended. Only the
  /// walker uses this; its caravan provably returns the pointer to
  /// `header + 1`, which the callers restore by hand.
  fn emit_raw(&mut self, code: &str) {
    for c in code.chars() {
      let instruction = match c {
        '>' => Instruction::Right,
        '<' => Instruction::Left,
        '+' => Instruction::Inc,
        '-' => Instruction::Dec,
        '[' => Instruction::LoopStart,
        ']' => Instruction::LoopEnd,
        _ => continue,
      };
      self.buf.push(instruction);
    }
  }

  /// Read `data[index]`: consumes the index temporary and leaves the element
  /// value in it. The caravan carries (spare, return-copy, countdown-copy)
  /// of the index rightwards, shifting each passed element three cells back,
  /// then walks home restoring everything. Three cells wide, so it rides in
  /// the upper three header cells, right against the data run.
  fn walker_read(&mut self, header: usize, index: usize) -> CompileResult<()> {
    self.drain(index, &[(header + 2, true), (header + 3, true)])?;
    self.move_to(header + 3);
    self.emit_raw("[->[-<<<+>>>]<[->+<]<[->+<]>>]");
    self.emit_raw(">[-<+<<+>>>]<<<[->>>+<<<]>");
    self.emit_raw("[-[-<+>]>[-<+>]<<<[->>>+<<<]>]");
    self.ptr = header + 2;
    self.drain(header + 3, &[(index, true)])
  }

  /// Write `data[index] = value`: same caravan one cell wider, carrying the
  /// payload out to the element. Consumes both temporaries (they end zero;
  /// the caller still releases them).
  fn walker_write(&mut self, header: usize, index: usize, value: usize) -> CompileResult<()> {
    self.drain(index, &[(header + 1, true), (header + 2, true)])?;
    self.drain(value, &[(header + 3, true)])?;
    self.move_to(header + 2);
    self.emit_raw("[->>[-<<<<+>>>>]<[->+<]<[->+<]<[->+<]>>]");
    self.emit_raw(">>[-]<[->+<]<<");
    self.emit_raw("[-[-<+>]<<[->>>>+<<<<]>]");
    self.ptr = header + 1;
    Ok(())
  }

  // ----- Symbols and lvalues -----

  fn frame(&self) -> CompileResult<&Frame> {
    self
      .frames
      .last()
      .ok_or_else(|| CompileError::internal("statement emitted outside any frame"))
  }

  fn lookup_scalar(&self, name: &str, line: u32, column: u32) -> CompileResult<Symbol> {
    let symbol = self.symbols.lookup(name).ok_or_else(|| {
      CompileError::semantic(format!("use of undeclared identifier '{name}'"), line, column)
    })?;
    if symbol.ty.is_array() {
      return Err(CompileError::semantic(
        format!("array '{name}' cannot be used as a scalar value"),
        line,
        column,
      ));
    }
    Ok(symbol.clone())
  }

  fn lookup_array(&self, name: &str, line: u32, column: u32) -> CompileResult<ArrayRef> {
    let symbol = self.symbols.lookup(name).ok_or_else(|| {
      CompileError::semantic(format!("use of undeclared identifier '{name}'"), line, column)
    })?;
    let Type::Array(elem, dims) = &symbol.ty else {
      return Err(CompileError::semantic(
        format!("'{name}' is not an array"),
        line,
        column,
      ));
    };
    Ok(ArrayRef {
      header: symbol.cell,
      data: symbol.cell + ARRAY_HEADER,
      dims: dims.clone(),
      flat: symbol.ty.flat_len(),
      elem: (**elem).clone(),
    })
  }

  /// Flatten a (possibly multi-dimensional) index expression list.
  ///
  /// Returns either a compile-time element offset or a temporary holding the
  /// flattened index. A single index into a multi-dimensional array is
  /// accepted and addresses the flattened run directly.
  fn flatten_index(
    &mut self,
    array: &ArrayRef,
    indices: &[Expr],
    line: u32,
    column: u32,
  ) -> CompileResult<Result<usize, usize>> {
    if indices.len() != array.dims.len() && indices.len() != 1 {
      return Err(CompileError::semantic(
        format!(
          "expected {} index expression(s), found {}",
          array.dims.len(),
          indices.len()
        ),
        line,
        column,
      ));
    }
    let strides: Vec<usize> = (0..indices.len())
      .map(|k| {
        if indices.len() == 1 {
          1
        } else {
          array.dims[k + 1..].iter().product()
        }
      })
      .collect();

    if indices.iter().all(|e| e.const_value().is_some()) {
      let mut flat = 0usize;
      for (expr, stride) in indices.iter().zip(&strides) {
        flat += expr.const_value().unwrap_or(0) as usize * stride;
      }
      if flat >= array.flat {
        return Err(CompileError::semantic(
          format!("index {flat} is out of bounds for an array of {} cells", array.flat),
          line,
          column,
        ));
      }
      return Ok(Ok(flat));
    }

    let mut flat_cell = None;
    for (expr, &stride) in indices.iter().zip(&strides) {
      let part = self.emit_expr(expr)?;
      self.expect_scalar(&part, expr)?;
      if stride != 1 {
        self.mul_const(part.cell, stride as u8)?;
      }
      match flat_cell {
        None => flat_cell = Some(part.cell),
        Some(acc) => {
          self.drain(part.cell, &[(acc, true)])?;
          self.free(part.cell)?;
        }
      }
    }
    flat_cell
      .map(Err)
      .ok_or_else(|| CompileError::internal("index flattening produced no cell"))
  }

  /// `cell ← cell * k` for a compile-time factor.
  fn mul_const(&mut self, cell: usize, k: u8) -> CompileResult<()> {
    let acc = self.alloc();
    self.begin_loop(cell);
    self.emit(Instruction::Dec);
    self.add_const(acc, k);
    self.end_loop(cell)?;
    self.drain(acc, &[(cell, true)])?;
    self.free(acc)
  }

  fn lvalue_slot(&mut self, target: &Expr) -> CompileResult<(Slot, Type)> {
    match &target.kind {
      ExprKind::Ident(name) => {
        let symbol = self.lookup_scalar(name, target.line, target.column)?;
        Ok((Slot::Cell(symbol.cell), symbol.ty))
      }
      ExprKind::Index { name, indices } => {
        let array = self.lookup_array(name, target.line, target.column)?;
        match self.flatten_index(&array, indices, target.line, target.column)? {
          Ok(offset) => Ok((Slot::Cell(array.data + offset), array.elem)),
          Err(index) => Ok((
            Slot::Walker {
              header: array.header,
              index,
            },
            array.elem,
          )),
        }
      }
      _ => Err(CompileError::semantic(
        "left-hand side of assignment is not assignable",
        target.line,
        target.column,
      )),
    }
  }

  /// Read the slot into a fresh temporary.
  fn slot_read(&mut self, slot: &Slot) -> CompileResult<usize> {
    match slot {
      Slot::Cell(cell) => self.copy_temp(*cell),
      Slot::Walker { header, index } => {
        let i = self.copy_temp(*index)?;
        self.walker_read(*header, i)?;
        Ok(i)
      }
    }
  }

  /// Store the (top) temporary into the slot, consuming and releasing it.
  fn slot_write(&mut self, slot: &Slot, value: usize) -> CompileResult<()> {
    match slot {
      Slot::Cell(cell) => {
        self.clear(*cell)?;
        self.drain(value, &[(*cell, true)])?;
        self.free(value)
      }
      Slot::Walker { header, index } => {
        let i = self.copy_temp(*index)?;
        self.walker_write(*header, i, value)?;
        self.free(i)?;
        self.free(value)
      }
    }
  }

  fn slot_release(&mut self, slot: Slot) -> CompileResult<()> {
    match slot {
      Slot::Cell(_) => Ok(()),
      Slot::Walker { index, .. } => {
        self.clear(index)?;
        self.free(index)
      }
    }
  }

  // ----- Expressions -----

  fn expect_scalar(&self, value: &Value, expr: &Expr) -> CompileResult<()> {
    if value.ty.is_scalar() {
      Ok(())
    } else {
      Err(CompileError::semantic(
        "void value used where a byte value is required",
        expr.line,
        expr.column,
      ))
    }
  }

  pub(crate) fn emit_expr(&mut self, expr: &Expr) -> CompileResult<Value> {
    match &expr.kind {
      ExprKind::IntLit(v) => {
        let cell = self.alloc();
        self.add_const(cell, *v);
        Ok(Value { cell, ty: Type::Int })
      }
      ExprKind::CharLit(v) => {
        let cell = self.alloc();
        self.add_const(cell, *v);
        Ok(Value { cell, ty: Type::Char })
      }
      ExprKind::BoolLit(b) => {
        let cell = self.alloc();
        if *b {
          self.add_const(cell, 1);
        }
        Ok(Value { cell, ty: Type::Bool })
      }
      ExprKind::StrLit(_) => Err(CompileError::semantic(
        "string literals are only allowed as the argument of print",
        expr.line,
        expr.column,
      )),
      ExprKind::Ident(name) => {
        let symbol = self.lookup_scalar(name, expr.line, expr.column)?;
        let cell = self.copy_temp(symbol.cell)?;
        Ok(Value { cell, ty: symbol.ty })
      }
      ExprKind::Index { name, indices } => {
        let array = self.lookup_array(name, expr.line, expr.column)?;
        match self.flatten_index(&array, indices, expr.line, expr.column)? {
          Ok(offset) => {
            let cell = self.copy_temp(array.data + offset)?;
            Ok(Value { cell, ty: array.elem })
          }
          Err(index) => {
            self.walker_read(array.header, index)?;
            Ok(Value { cell: index, ty: array.elem })
          }
        }
      }
      ExprKind::Unary { op, operand } => self.emit_unary(*op, operand, expr),
      ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),
      ExprKind::Ternary {
        cond,
        then_val,
        else_val,
      } => self.emit_ternary(cond, then_val, else_val),
      ExprKind::Call { name, args } => self.emit_call(name, args, expr.line, expr.column),
    }
  }

  fn emit_unary(&mut self, op: UnOp, operand: &Expr, expr: &Expr) -> CompileResult<Value> {
    match op {
      UnOp::Not => {
        let v = self.emit_expr(operand)?;
        self.expect_scalar(&v, operand)?;
        self.not_in_place(v.cell)?;
        Ok(Value {
          cell: v.cell,
          ty: Type::Bool,
        })
      }
      UnOp::Neg => {
        // Cells are unsigned; negation is 0 - x with wrap.
        let v = self.emit_expr(operand)?;
        self.expect_scalar(&v, operand)?;
        let t = self.alloc();
        self.drain(v.cell, &[(t, false)])?;
        self.drain(t, &[(v.cell, true)])?;
        self.free(t)?;
        Ok(Value {
          cell: v.cell,
          ty: Type::Int,
        })
      }
      UnOp::BitNot => {
        let v = self.emit_expr(operand)?;
        self.expect_scalar(&v, operand)?;
        let t = self.alloc();
        self.add_const(t, 255);
        self.drain(v.cell, &[(t, false)])?;
        self.drain(t, &[(v.cell, true)])?;
        self.free(t)?;
        Ok(Value {
          cell: v.cell,
          ty: Type::Int,
        })
      }
      UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
        if !matches!(operand.kind, ExprKind::Ident(_) | ExprKind::Index { .. }) {
          return Err(CompileError::semantic(
            "can only increment or decrement a variable or array element",
            expr.line,
            expr.column,
          ));
        }
        let (slot, ty) = self.lvalue_slot(operand)?;
        let result = self.slot_read(&slot)?;
        let delta_up = matches!(op, UnOp::PreInc | UnOp::PostInc);
        if matches!(op, UnOp::PreInc | UnOp::PreDec) {
          if delta_up {
            self.add_const(result, 1);
          } else {
            self.sub_const(result, 1);
          }
          let back = self.copy_temp(result)?;
          self.slot_write(&slot, back)?;
        } else {
          let back = self.copy_temp(result)?;
          if delta_up {
            self.add_const(back, 1);
          } else {
            self.sub_const(back, 1);
          }
          self.slot_write(&slot, back)?;
        }
        // Hoist the result below the slot's index temporary, if any.
        match slot {
          Slot::Cell(_) => Ok(Value { cell: result, ty }),
          Slot::Walker { index, .. } => {
            self.clear(index)?;
            self.drain(result, &[(index, true)])?;
            self.free(result)?;
            Ok(Value { cell: index, ty })
          }
        }
      }
    }
  }

  fn emit_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CompileResult<Value> {
    // Short-circuit forms evaluate the right operand conditionally.
    match op {
      BinOp::And => {
        let a = self.emit_expr(lhs)?;
        self.expect_scalar(&a, lhs)?;
        let r = self.alloc();
        self.begin_loop(a.cell);
        let b = self.emit_expr(rhs)?;
        self.expect_scalar(&b, rhs)?;
        self.begin_loop(b.cell);
        self.move_to(r);
        self.emit(Instruction::Inc);
        self.clear(b.cell)?;
        self.end_loop(b.cell)?;
        self.free(b.cell)?;
        self.clear(a.cell)?;
        self.end_loop(a.cell)?;
        self.drain(r, &[(a.cell, true)])?;
        self.free(r)?;
        return Ok(Value {
          cell: a.cell,
          ty: Type::Bool,
        });
      }
      BinOp::Or => {
        let a = self.emit_expr(lhs)?;
        self.expect_scalar(&a, lhs)?;
        let r = self.alloc();
        let rhs_flag = self.alloc();
        self.add_const(rhs_flag, 1);
        self.begin_loop(a.cell);
        self.move_to(r);
        self.emit(Instruction::Inc);
        self.move_to(rhs_flag);
        self.emit(Instruction::Dec);
        self.clear(a.cell)?;
        self.end_loop(a.cell)?;
        self.begin_loop(rhs_flag);
        let b = self.emit_expr(rhs)?;
        self.expect_scalar(&b, rhs)?;
        self.begin_loop(b.cell);
        self.move_to(r);
        self.emit(Instruction::Inc);
        self.clear(b.cell)?;
        self.end_loop(b.cell)?;
        self.free(b.cell)?;
        self.move_to(rhs_flag);
        self.emit(Instruction::Dec);
        self.end_loop(rhs_flag)?;
        self.free(rhs_flag)?;
        self.drain(r, &[(a.cell, true)])?;
        self.free(r)?;
        return Ok(Value {
          cell: a.cell,
          ty: Type::Bool,
        });
      }
      _ => {}
    }

    // Left-to-right evaluation, observable through call side effects.
    let a = self.emit_expr(lhs)?;
    self.expect_scalar(&a, lhs)?;
    let b = self.emit_expr(rhs)?;
    self.expect_scalar(&b, rhs)?;
    let (x, y) = (a.cell, b.cell);
    let ty = match op {
      BinOp::Add => {
        self.lower_add(x, y)?;
        Type::Int
      }
      BinOp::Sub => {
        self.lower_sub(x, y)?;
        Type::Int
      }
      BinOp::Mul => {
        self.lower_mul(x, y)?;
        Type::Int
      }
      BinOp::Div => {
        self.lower_div(x, y)?;
        Type::Int
      }
      BinOp::Mod => {
        self.lower_mod(x, y)?;
        Type::Int
      }
      BinOp::Eq => {
        self.lower_eq(x, y)?;
        Type::Bool
      }
      BinOp::Ne => {
        self.lower_ne(x, y)?;
        Type::Bool
      }
      BinOp::Lt => {
        self.lower_lt(x, y)?;
        Type::Bool
      }
      BinOp::Le => {
        self.lower_le(x, y)?;
        Type::Bool
      }
      BinOp::Gt => {
        self.lower_gt(x, y)?;
        Type::Bool
      }
      BinOp::Ge => {
        self.lower_ge(x, y)?;
        Type::Bool
      }
      BinOp::And | BinOp::Or => {
        return Err(CompileError::internal("short-circuit operator fell through"));
      }
    };
    Ok(Value { cell: x, ty })
  }

  fn emit_ternary(
    &mut self,
    cond: &Expr,
    then_val: &Expr,
    else_val: &Expr,
  ) -> CompileResult<Value> {
    let c = self.emit_expr(cond)?;
    self.expect_scalar(&c, cond)?;
    let r = self.alloc();
    let else_flag = self.alloc();
    self.add_const(else_flag, 1);
    self.begin_loop(c.cell);
    self.move_to(else_flag);
    self.emit(Instruction::Dec);
    let v = self.emit_expr(then_val)?;
    self.expect_scalar(&v, then_val)?;
    self.drain(v.cell, &[(r, true)])?;
    self.free(v.cell)?;
    self.clear(c.cell)?;
    self.end_loop(c.cell)?;
    self.begin_loop(else_flag);
    let v = self.emit_expr(else_val)?;
    self.expect_scalar(&v, else_val)?;
    self.drain(v.cell, &[(r, true)])?;
    self.free(v.cell)?;
    self.move_to(else_flag);
    self.emit(Instruction::Dec);
    self.end_loop(else_flag)?;
    self.free(else_flag)?;
    self.drain(r, &[(c.cell, true)])?;
    self.free(r)?;
    Ok(Value {
      cell: c.cell,
      ty: Type::Int,
    })
  }

  // ----- Function calls -----

  /// Lower a call: lay the callee frame `[rf | rv | p1 … pk | locals]` after
  /// the caller's live cells, evaluate arguments into the parameter slots,
  /// then emit the body inside the return-flag envelope.
  pub(crate) fn emit_call(
    &mut self,
    name: &str,
    args: &[Expr],
    line: u32,
    column: u32,
  ) -> CompileResult<Value> {
    if library::is_library(name) {
      return library::emit_call(self, name, args, line, column);
    }
    let Some(&func) = self.functions.get(name) else {
      return Err(CompileError::semantic(
        format!("call to undefined function '{name}'"),
        line,
        column,
      ));
    };
    if args.len() != func.params.len() {
      return Err(CompileError::semantic(
        format!(
          "function '{name}' takes {} argument(s), called with {}",
          func.params.len(),
          args.len()
        ),
        line,
        column,
      ));
    }
    if self.emitting.iter().any(|f| f == name) {
      return Err(CompileError::semantic(
        format!("recursive call to '{name}' is not supported"),
        line,
        column,
      ));
    }

    self.note(&format!("call {name}"));
    let return_flag = self.alloc();
    let return_value = self.alloc();
    let params: Vec<usize> = func.params.iter().map(|_| self.alloc()).collect();

    for (arg, &param_cell) in args.iter().zip(&params) {
      let v = self.emit_expr(arg)?;
      self.expect_scalar(&v, arg)?;
      self.drain(v.cell, &[(param_cell, true)])?;
      self.free(v.cell)?;
    }
    self.add_const(return_flag, 1);

    self.emitting.push(func.name.clone());
    self.frames.push(Frame {
      function: func.name.clone(),
      origin: return_flag,
      return_flag,
      return_value,
      ret: func.ret.clone(),
      breaks: Vec::new(),
    });
    self.symbols.enter_function(self.cells.mark());
    for (param, &cell) in func.params.iter().zip(&params) {
      let declared = self.symbols.declare(Symbol {
        name: param.name.clone(),
        ty: param.ty.clone(),
        cell,
        is_param: true,
      });
      if !declared {
        return Err(CompileError::semantic(
          format!("duplicate parameter '{}'", param.name),
          param.line,
          param.column,
        ));
      }
    }

    self.begin_loop(return_flag);
    self.emit_stmt_list(&func.body)?;
    // Zero the frame unconditionally: the guard machinery may have skipped
    // trailing statements, but cells written before a return are still hot.
    let scope = self.symbols.exit()?;
    for symbol in &scope.symbols {
      self.zero_symbol(symbol)?;
    }
    self.clear(return_flag)?;
    self.end_loop(return_flag)?;
    self.cells.release_to(scope.mark())?;

    self.frames.pop();
    self.emitting.pop();
    for &param_cell in params.iter().rev() {
      self.free(param_cell)?;
    }
    self.drain(return_value, &[(return_flag, true)])?;
    self.free(return_value)?;
    self.note(&format!("end call {name}"));
    Ok(Value {
      cell: return_flag,
      ty: func.ret.clone(),
    })
  }

  // ----- Statements -----

  /// Emit a statement sequence. After any statement whose subtree can
  /// `break`/`return`, the remainder is nested under the matching flag(s) so
  /// a taken exit skips it.
  fn emit_stmt_list(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
    for (i, stmt) in stmts.iter().enumerate() {
      self.emit_stmt(stmt)?;
      let rest = &stmts[i + 1..];
      if rest.is_empty() {
        break;
      }
      let guard_return = stmt.can_return();
      let guard_break = stmt.can_break() && !self.frame()?.breaks.is_empty();
      if guard_return || guard_break {
        return self.emit_under_guard(guard_return, guard_break, |cg| cg.emit_stmt_list(rest));
      }
    }
    Ok(())
  }

  /// Run `body` only if the selected flags are still set.
  fn emit_under_guard(
    &mut self,
    guard_return: bool,
    guard_break: bool,
    body: impl FnOnce(&mut Self) -> CompileResult<()>,
  ) -> CompileResult<()> {
    let frame = self.frame()?;
    let return_flag = frame.return_flag;
    let break_flag = frame.breaks.last().copied();
    let guard = match (guard_return, guard_break, break_flag) {
      (true, false, _) => self.copy_temp(return_flag)?,
      (false, true, Some(flag)) => self.copy_temp(flag)?,
      (true, true, Some(flag)) => {
        let g = self.alloc();
        self.both_nonzero_into(return_flag, flag, g)?;
        g
      }
      _ => return Err(CompileError::internal("break guard without a break scope")),
    };
    self.begin_loop(guard);
    body(self)?;
    self.clear(guard)?;
    self.end_loop(guard)?;
    self.free(guard)
  }

  fn emit_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
    let origin = self.frame()?.origin;
    match &stmt.kind {
      StmtKind::Block(stmts) => {
        self.symbols.enter(self.cells.mark());
        self.emit_stmt_list(stmts)?;
        self.exit_scope()?;
      }
      StmtKind::VarDecl { name, ty, init } => {
        self.emit_var_decl(name, ty, init, stmt)?;
      }
      StmtKind::Assign { target, op, value } => {
        self.emit_assign(target, *op, value)?;
      }
      StmtKind::If {
        cond,
        then_branch,
        else_branch,
      } => {
        self.emit_if(cond, then_branch, else_branch.as_deref())?;
      }
      StmtKind::While { cond, body } => {
        self.emit_loop(None, Some(cond), Some("while"), body)?;
      }
      StmtKind::DoWhile { body, cond } => {
        self.note("do-while");
        let live = self.alloc();
        self.add_const(live, 1);
        let entry = self.alloc();
        self.add_const(entry, 1);
        self.push_break_scope(live)?;
        self.begin_loop(entry);
        self.clear(entry)?;
        self.emit_stmt(body)?;
        let guard_break = body.can_break();
        let guard_return = body.can_return();
        let reevaluate = |cg: &mut Self| -> CompileResult<()> {
          let t = cg.emit_expr(cond)?;
          cg.expect_scalar(&t, cond)?;
          cg.gate_into(t.cell, entry)?;
          cg.free(t.cell)
        };
        if guard_break || guard_return {
          self.emit_under_guard(guard_return, guard_break, reevaluate)?;
        } else {
          reevaluate(self)?;
        }
        self.end_loop(entry)?;
        self.pop_break_scope()?;
        self.free(entry)?;
        self.clear(live)?;
        self.free(live)?;
      }
      StmtKind::For {
        init,
        cond,
        step,
        body,
      } => {
        self.symbols.enter(self.cells.mark());
        if let Some(init) = init {
          self.emit_stmt(init)?;
        }
        self.emit_loop(step.as_deref(), cond.as_ref(), Some("for"), body)?;
        self.exit_scope()?;
      }
      StmtKind::Switch { scrutinee, cases } => {
        self.emit_switch(scrutinee, cases)?;
      }
      StmtKind::Break => {
        let flag = self.frame()?.breaks.last().copied().ok_or_else(|| {
          CompileError::semantic("break outside of a loop or switch", stmt.line, stmt.column)
        })?;
        // The flag is exactly 1 whenever this statement actually runs.
        self.move_to(flag);
        self.emit(Instruction::Dec);
      }
      StmtKind::Return(value) => {
        self.emit_return(value.as_ref(), stmt)?;
      }
      StmtKind::Expr(expr) => {
        let v = self.emit_expr(expr)?;
        self.clear(v.cell)?;
        self.free(v.cell)?;
      }
      StmtKind::Empty => {}
    }
    self.move_to(origin);
    Ok(())
  }

  fn emit_var_decl(
    &mut self,
    name: &str,
    ty: &Type,
    init: &VarInit,
    stmt: &Stmt,
  ) -> CompileResult<()> {
    self.check_array_capacity(ty, stmt.line, stmt.column)?;
    let base = self.cells.reserve(cells_for(ty));
    let symbol = Symbol {
      name: name.to_string(),
      ty: ty.clone(),
      cell: base,
      is_param: false,
    };
    let data = symbol.data_cell();
    if !self.symbols.declare(symbol) {
      return Err(CompileError::semantic(
        format!("redeclaration of '{name}' in the same scope"),
        stmt.line,
        stmt.column,
      ));
    }
    match init {
      VarInit::None => Ok(()),
      VarInit::Expr(e) => {
        if ty.is_array() {
          return Err(CompileError::semantic(
            format!("array '{name}' needs a brace or string initializer"),
            stmt.line,
            stmt.column,
          ));
        }
        let v = self.emit_expr(e)?;
        self.expect_scalar(&v, e)?;
        if *ty == Type::Bool {
          self.bool_cast(v.cell)?;
        }
        // Fresh cells are zero, but a declaration in a loop body runs its
        // initializer once per iteration, so reset before filling.
        self.clear(base)?;
        self.drain(v.cell, &[(base, true)])?;
        self.free(v.cell)
      }
      VarInit::List(values) => {
        if !ty.is_array() {
          return Err(CompileError::semantic(
            format!("scalar '{name}' cannot take a list initializer"),
            stmt.line,
            stmt.column,
          ));
        }
        for k in 0..values.len() {
          self.clear(data + k)?;
        }
        self.emit_list_init(ty, data, values, stmt.line, stmt.column)
      }
    }
  }

  fn emit_list_init(
    &mut self,
    ty: &Type,
    data: usize,
    values: &[u8],
    line: u32,
    column: u32,
  ) -> CompileResult<()> {
    if values.len() > ty.flat_len() {
      return Err(CompileError::semantic(
        format!(
          "initializer has {} values for an array of {} cells",
          values.len(),
          ty.flat_len()
        ),
        line,
        column,
      ));
    }
    // Missing trailing elements stay zero.
    for (k, &value) in values.iter().enumerate() {
      self.add_const(data + k, value);
    }
    Ok(())
  }

  fn emit_assign(&mut self, target: &Expr, op: Option<BinOp>, value: &Expr) -> CompileResult<()> {
    let (slot, target_ty) = self.lvalue_slot(target)?;
    match op {
      None => {
        let v = self.emit_expr(value)?;
        self.expect_scalar(&v, value)?;
        if target_ty == Type::Bool {
          self.bool_cast(v.cell)?;
        }
        self.slot_write(&slot, v.cell)?;
      }
      Some(op) => {
        let current = self.slot_read(&slot)?;
        let v = self.emit_expr(value)?;
        self.expect_scalar(&v, value)?;
        match op {
          BinOp::Add => self.lower_add(current, v.cell)?,
          BinOp::Sub => self.lower_sub(current, v.cell)?,
          BinOp::Mul => self.lower_mul(current, v.cell)?,
          BinOp::Div => self.lower_div(current, v.cell)?,
          BinOp::Mod => self.lower_mod(current, v.cell)?,
          _ => {
            return Err(CompileError::internal("non-arithmetic compound assignment"));
          }
        }
        if target_ty == Type::Bool {
          self.bool_cast(current)?;
        }
        self.slot_write(&slot, current)?;
      }
    }
    self.slot_release(slot)
  }

  /// The two-flag conditional: `[` on the condition runs the then-branch and
  /// clears the else flag; a second `[` on the flag runs the else-branch.
  fn emit_if(
    &mut self,
    cond: &Expr,
    then_branch: &Stmt,
    else_branch: Option<&Stmt>,
  ) -> CompileResult<()> {
    self.note("if");
    let c = self.emit_expr(cond)?;
    self.expect_scalar(&c, cond)?;
    let else_flag = else_branch.map(|_| {
      let flag = self.alloc();
      self.add_const(flag, 1);
      flag
    });
    self.begin_loop(c.cell);
    if let Some(flag) = else_flag {
      self.move_to(flag);
      self.emit(Instruction::Dec);
    }
    self.emit_stmt(then_branch)?;
    self.clear(c.cell)?;
    self.end_loop(c.cell)?;
    if let (Some(flag), Some(else_branch)) = (else_flag, else_branch) {
      self.begin_loop(flag);
      self.emit_stmt(else_branch)?;
      self.move_to(flag);
      self.emit(Instruction::Dec);
      self.end_loop(flag)?;
      self.free(flag)?;
    }
    self.free(c.cell)
  }

  /// Shared lowering for `while` and `for`: a live-flag envelope around a
  /// condition-re-evaluating `[` loop. A missing condition means "loop until
  /// break or return".
  fn emit_loop(
    &mut self,
    step: Option<&Stmt>,
    cond: Option<&Expr>,
    entry_note: Option<&str>,
    body: &Stmt,
  ) -> CompileResult<()> {
    self.note(entry_note.unwrap_or("loop"));
    let live = self.alloc();
    self.add_const(live, 1);
    self.push_break_scope(live)?;

    let header = match cond {
      Some(cond) => {
        let c = self.emit_expr(cond)?;
        self.expect_scalar(&c, cond)?;
        c.cell
      }
      None => {
        let c = self.alloc();
        self.add_const(c, 1);
        c
      }
    };

    self.begin_loop(header);
    self.clear(header)?;
    self.emit_stmt(body)?;
    // A taken `break` skips the step and the re-evaluation (the condition's
    // side effects must not run again); `return` abandons both as well.
    let guard_break = body.can_break();
    let guard_return = body.can_return();
    let guarded = guard_break || guard_return;
    if let Some(step) = step {
      if guarded {
        self.emit_under_guard(guard_return, guard_break, |cg| cg.emit_stmt(step))?;
      } else {
        self.emit_stmt(step)?;
      }
    }
    let reevaluate = |cg: &mut Self| -> CompileResult<()> {
      match cond {
        Some(cond) => {
          let t = cg.emit_expr(cond)?;
          cg.expect_scalar(&t, cond)?;
          cg.gate_into(t.cell, header)?;
          cg.free(t.cell)
        }
        None => {
          let t = cg.alloc();
          cg.add_const(t, 1);
          cg.gate_into(t, header)?;
          cg.free(t)
        }
      }
    };
    if guarded {
      self.emit_under_guard(guard_return, guard_break, reevaluate)?;
    } else {
      reevaluate(self)?;
    }
    self.end_loop(header)?;

    self.pop_break_scope()?;
    self.free(header)?;
    self.clear(live)?;
    self.free(live)
  }

  /// `dst += t && live && return_flag`, consuming `t` and preserving the
  /// flags: the loop continues only while nothing broke out and nothing
  /// returned.
  fn gate_into(&mut self, t: usize, dst: usize) -> CompileResult<()> {
    let frame = self.frame()?;
    let return_flag = frame.return_flag;
    let live = frame
      .breaks
      .last()
      .copied()
      .ok_or_else(|| CompileError::internal("loop gate outside a break scope"))?;
    let cl = self.copy_temp(live)?;
    let cr = self.copy_temp(return_flag)?;
    self.begin_loop(t);
    self.begin_loop(cl);
    self.begin_loop(cr);
    self.move_to(dst);
    self.emit(Instruction::Inc);
    self.clear(cr)?;
    self.end_loop(cr)?;
    self.clear(cl)?;
    self.end_loop(cl)?;
    self.clear(t)?;
    self.end_loop(t)?;
    self.free(cr)?;
    self.free(cl)
  }

  fn emit_switch(&mut self, scrutinee: &Expr, cases: &[SwitchCase]) -> CompileResult<()> {
    self.note("switch");
    let sv = self.emit_expr(scrutinee)?;
    self.expect_scalar(&sv, scrutinee)?;
    let live = self.alloc();
    self.add_const(live, 1);
    let matched = self.alloc();
    // `default` fires only when no case in the whole switch matches, wherever
    // it sits in source order, so every case value is checked up front.
    let any_hit = if cases.iter().any(|case| case.value.is_none()) {
      let flag = self.alloc();
      for case in cases {
        if let Some(value) = case.value {
          self.emit_match_flag(sv.cell, value, flag)?;
        }
      }
      Some(flag)
    } else {
      None
    };
    self.push_break_scope(live)?;

    for case in cases {
      match case.value {
        Some(value) => {
          // matched |= (scrutinee == value)
          self.emit_match_flag(sv.cell, value, matched)?;
          self.emit_switch_arm(matched, live, None, &case.body)?;
        }
        None => {
          let hit = any_hit
            .ok_or_else(|| CompileError::internal("default arm without a match flag"))?;
          let not_matched = self.copy_temp(hit)?;
          self.not_in_place(not_matched)?;
          self.emit_switch_arm(not_matched, live, Some(matched), &case.body)?;
          self.free(not_matched)?;
        }
      }
    }

    self.pop_break_scope()?;
    if let Some(flag) = any_hit {
      self.clear(flag)?;
      self.free(flag)?;
    }
    self.clear(matched)?;
    self.free(matched)?;
    self.clear(live)?;
    self.free(live)?;
    self.clear(sv.cell)?;
    self.free(sv.cell)
  }

  /// `dst ← 1` when the cell equals the literal; left unchanged otherwise.
  fn emit_match_flag(&mut self, cell: usize, value: u8, dst: usize) -> CompileResult<()> {
    let diff = self.copy_temp(cell)?;
    self.sub_const(diff, value);
    let hit = self.alloc();
    self.add_const(hit, 1);
    self.begin_loop(diff);
    self.move_to(hit);
    self.emit(Instruction::Dec);
    self.clear(diff)?;
    self.end_loop(diff)?;
    self.begin_loop(hit);
    self.clear(dst)?;
    self.add_const(dst, 1);
    self.clear(hit)?;
    self.end_loop(hit)?;
    self.free(hit)?;
    self.free(diff)
  }

  /// Run one switch arm when `selector && live && return_flag` all hold: a
  /// taken `break` or an earlier `return` silences the remaining arms.
  fn emit_switch_arm(
    &mut self,
    selector: usize,
    live: usize,
    mark_matched: Option<usize>,
    body: &[Stmt],
  ) -> CompileResult<()> {
    let return_flag = self.frame()?.return_flag;
    let pre = self.alloc();
    self.both_nonzero_into(selector, live, pre)?;
    let exec = self.alloc();
    self.both_nonzero_into(pre, return_flag, exec)?;
    self.begin_loop(exec);
    if let Some(matched) = mark_matched {
      // Entering at default counts as a match so later arms fall through.
      self.clear(matched)?;
      self.add_const(matched, 1);
    }
    self.emit_stmt_list(body)?;
    self.clear(exec)?;
    self.end_loop(exec)?;
    self.free(exec)?;
    self.clear(pre)?;
    self.free(pre)
  }

  fn emit_return(&mut self, value: Option<&Expr>, stmt: &Stmt) -> CompileResult<()> {
    let frame = self.frame()?;
    let (function, return_flag, return_value, ret) = (
      frame.function.clone(),
      frame.return_flag,
      frame.return_value,
      frame.ret.clone(),
    );
    match value {
      Some(expr) => {
        if ret == Type::Void {
          return Err(CompileError::semantic(
            format!("void function '{function}' cannot return a value"),
            stmt.line,
            stmt.column,
          ));
        }
        let v = self.emit_expr(expr)?;
        self.expect_scalar(&v, expr)?;
        self.drain(v.cell, &[(return_value, true)])?;
        self.free(v.cell)?;
      }
      None => {
        if ret != Type::Void {
          return Err(CompileError::semantic(
            format!("function '{function}' must return a value of type {ret}"),
            stmt.line,
            stmt.column,
          ));
        }
      }
    }
    // The flag is exactly 1 whenever this statement actually runs.
    self.move_to(return_flag);
    self.emit(Instruction::Dec);
    Ok(())
  }

  // ----- Scope plumbing -----

  fn push_break_scope(&mut self, flag: usize) -> CompileResult<()> {
    self
      .frames
      .last_mut()
      .ok_or_else(|| CompileError::internal("break scope outside any frame"))?
      .breaks
      .push(flag);
    Ok(())
  }

  fn pop_break_scope(&mut self) -> CompileResult<()> {
    self
      .frames
      .last_mut()
      .and_then(|frame| frame.breaks.pop())
      .ok_or_else(|| CompileError::internal("break scope underflow"))?;
    Ok(())
  }

  /// Zero a departing scope's cells and lower the watermark. A cell that was
  /// never written is zeroed redundantly, which costs three commands and
  /// keeps the invariant local.
  fn exit_scope(&mut self) -> CompileResult<()> {
    let scope = self.symbols.exit()?;
    for symbol in &scope.symbols {
      self.zero_symbol(symbol)?;
    }
    self.cells.release_to(scope.mark())
  }

  fn zero_symbol(&mut self, symbol: &Symbol) -> CompileResult<()> {
    // Array headers stay zero (the walker restores them), so only the data
    // run needs sweeping.
    let data = symbol.data_cell();
    for cell in data..data + symbol.ty.flat_len() {
      self.clear(cell)?;
    }
    Ok(())
  }

  fn check_array_capacity(&self, ty: &Type, line: u32, column: u32) -> CompileResult<()> {
    if ty.is_array() && ty.flat_len() > MAX_ARRAY_CELLS {
      return Err(CompileError::capacity(
        format!(
          "array spans {} cells; a byte-wide index reaches at most {MAX_ARRAY_CELLS}",
          ty.flat_len()
        ),
        line,
        column,
      ));
    }
    Ok(())
  }

  // ----- Library support (used by `library.rs`) -----

  pub(crate) fn lib_alloc(&mut self) -> usize {
    self.alloc()
  }

  pub(crate) fn lib_free(&mut self, cell: usize) -> CompileResult<()> {
    self.free(cell)
  }

  pub(crate) fn lib_emit(&mut self, instruction: Instruction) {
    self.emit(instruction);
  }

  pub(crate) fn lib_move_to(&mut self, cell: usize) {
    self.move_to(cell);
  }

  pub(crate) fn lib_add_const(&mut self, cell: usize, n: u8) {
    self.add_const(cell, n);
  }

  pub(crate) fn lib_sub_const(&mut self, cell: usize, n: u8) {
    self.sub_const(cell, n);
  }

  pub(crate) fn lib_clear(&mut self, cell: usize) -> CompileResult<()> {
    self.clear(cell)
  }

  pub(crate) fn lib_drain(&mut self, src: usize, targets: &[(usize, bool)]) -> CompileResult<()> {
    self.drain(src, targets)
  }

  pub(crate) fn lib_begin_loop(&mut self, cell: usize) {
    self.begin_loop(cell);
  }

  pub(crate) fn lib_end_loop(&mut self, cell: usize) -> CompileResult<()> {
    self.end_loop(cell)
  }

  pub(crate) fn lib_copy_temp(&mut self, src: usize) -> CompileResult<usize> {
    self.copy_temp(src)
  }

  pub(crate) fn lib_swap(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.swap(x, y)
  }

  pub(crate) fn lib_lower_lt(&mut self, x: usize, y: usize) -> CompileResult<()> {
    self.lower_lt(x, y)
  }

  pub(crate) fn lib_not_in_place(&mut self, cell: usize) -> CompileResult<()> {
    self.not_in_place(cell)
  }

  pub(crate) fn lib_note(&mut self, text: &str) {
    self.note(text);
  }
}
