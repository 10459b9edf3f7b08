//! Tape bookkeeping: the scoped symbol table and the cell allocator.
//!
//! Cells are handed out left to right by a monotonically increasing
//! watermark. Named symbols are pinned for the lifetime of their scope;
//! temporaries sit above all named cells of the moment and are recycled in
//! strict LIFO order. Nothing here emits code – the allocator is pure
//! compile-time bookkeeping, and the emitter is responsible for keeping the
//! zero-cell invariant (a released cell must hold zero) on the real tape.

use crate::error::{CompileError, CompileResult};
use crate::ty::Type;

/// Cells reserved in front of every array's data run. The indexing walker
/// uses them to carry its index and payload alongside the moving pointer.
pub const ARRAY_HEADER: usize = 4;

/// Number of cells a named symbol of this type occupies.
pub fn cells_for(ty: &Type) -> usize {
  if ty.is_array() {
    ARRAY_HEADER + ty.flat_len()
  } else {
    1
  }
}

#[derive(Debug, Clone)]
pub struct Symbol {
  pub name: String,
  pub ty: Type,
  /// First cell of the allocation: for arrays this is the header base and
  /// the data run starts at `cell + ARRAY_HEADER`.
  pub cell: usize,
  pub is_param: bool,
}

impl Symbol {
  /// First data cell (past the walker header for arrays).
  pub fn data_cell(&self) -> usize {
    if self.ty.is_array() {
      self.cell + ARRAY_HEADER
    } else {
      self.cell
    }
  }
}

#[derive(Debug)]
pub struct Scope {
  pub symbols: Vec<Symbol>,
  mark: usize,
  /// Function scopes stop name resolution from reaching the caller's
  /// locals; only the globals remain visible past a barrier.
  barrier: bool,
}

/// Name resolution, innermost scope outward. Scope 0 holds the globals.
#[derive(Debug, Default)]
pub struct SymbolTable {
  scopes: Vec<Scope>,
}

impl SymbolTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn enter(&mut self, mark: usize) {
    self.scopes.push(Scope {
      symbols: Vec::new(),
      mark,
      barrier: false,
    });
  }

  /// Open a function scope: bodies are emitted at their call sites, so the
  /// caller's scopes are still on the stack and must be hidden.
  pub fn enter_function(&mut self, mark: usize) {
    self.scopes.push(Scope {
      symbols: Vec::new(),
      mark,
      barrier: true,
    });
  }

  pub fn exit(&mut self) -> CompileResult<Scope> {
    self
      .scopes
      .pop()
      .ok_or_else(|| CompileError::internal("scope stack underflow"))
  }

  /// Record a symbol in the innermost scope. Returns `false` when the name
  /// is already taken in that scope (shadowing outer scopes is fine).
  pub fn declare(&mut self, symbol: Symbol) -> bool {
    let Some(scope) = self.scopes.last_mut() else {
      return false;
    };
    if scope.symbols.iter().any(|s| s.name == symbol.name) {
      return false;
    }
    scope.symbols.push(symbol);
    true
  }

  pub fn lookup(&self, name: &str) -> Option<&Symbol> {
    for scope in self.scopes.iter().rev() {
      if let Some(symbol) = scope.symbols.iter().find(|s| s.name == name) {
        return Some(symbol);
      }
      if scope.barrier {
        break;
      }
    }
    // Globals stay visible from inside any function.
    self
      .scopes
      .first()
      .and_then(|globals| globals.symbols.iter().find(|s| s.name == name))
  }
}

impl Scope {
  pub fn mark(&self) -> usize {
    self.mark
  }
}

/// Hands out tape cells. Named reservations and temporaries share one
/// watermark: a call site allocates the callee's return-flag/value and
/// parameter cells as caller temporaries, and the callee's named locals then
/// stack above them. Frames strictly nest, so releases always come back in
/// the reverse order of acquisition.
#[derive(Debug, Default)]
pub struct CellAllocator {
  next: usize,
  temps: Vec<usize>,
  high_water: usize,
}

impl CellAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reserve a run of cells for a named symbol at the top of the frame.
  pub fn reserve(&mut self, cells: usize) -> usize {
    let base = self.next;
    self.next += cells;
    self.high_water = self.high_water.max(self.next);
    base
  }

  /// Acquire one temporary cell above everything currently live.
  pub fn alloc_temp(&mut self) -> usize {
    let cell = self.next;
    self.next += 1;
    self.high_water = self.high_water.max(self.next);
    self.temps.push(cell);
    cell
  }

  /// Release a temporary. Releases must mirror acquisitions exactly.
  pub fn free_temp(&mut self, cell: usize) -> CompileResult<()> {
    match self.temps.pop() {
      Some(top) if top == cell => {
        self.next = cell;
        Ok(())
      }
      _ => Err(CompileError::internal(format!(
        "temporary cell {cell} released out of order"
      ))),
    }
  }

  /// Current watermark; scopes snapshot it on entry.
  pub fn mark(&self) -> usize {
    self.next
  }

  /// Drop back to a scope-entry watermark. Temporaries acquired before the
  /// scope opened (below the mark) may still be live; a temporary above the
  /// mark would be orphaned by the release and flags an emitter bug.
  pub fn release_to(&mut self, mark: usize) -> CompileResult<()> {
    if self.temps.iter().any(|&t| t >= mark) {
      return Err(CompileError::internal(
        "scope released while temporaries above it are outstanding",
      ));
    }
    if mark > self.next {
      return Err(CompileError::internal("scope watermark moved forward"));
    }
    self.next = mark;
    Ok(())
  }

  pub fn high_water(&self) -> usize {
    self.high_water
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn temporaries_are_lifo() {
    let mut cells = CellAllocator::new();
    let a = cells.alloc_temp();
    let b = cells.alloc_temp();
    assert_eq!((a, b), (0, 1));
    assert!(cells.free_temp(a).is_err());
    assert!(cells.free_temp(b).is_ok());
    assert!(cells.free_temp(a).is_ok());
    // Released cells are handed out again.
    assert_eq!(cells.alloc_temp(), 0);
  }

  #[test]
  fn named_cells_stack_per_scope() {
    let mut cells = CellAllocator::new();
    let mut symbols = SymbolTable::new();
    symbols.enter(cells.mark());
    let x = cells.reserve(1);
    assert!(symbols.declare(Symbol {
      name: "x".into(),
      ty: Type::Int,
      cell: x,
      is_param: false,
    }));
    symbols.enter(cells.mark());
    let shadow = cells.reserve(1);
    assert!(symbols.declare(Symbol {
      name: "x".into(),
      ty: Type::Bool,
      cell: shadow,
      is_param: false,
    }));
    assert_eq!(symbols.lookup("x").unwrap().cell, shadow);
    let inner = symbols.exit().unwrap();
    cells.release_to(inner.mark()).unwrap();
    assert_eq!(symbols.lookup("x").unwrap().cell, x);
    assert_eq!(cells.mark(), 1);
  }

  #[test]
  fn redeclaration_in_same_scope_is_rejected() {
    let mut symbols = SymbolTable::new();
    symbols.enter(0);
    let sym = Symbol {
      name: "x".into(),
      ty: Type::Int,
      cell: 0,
      is_param: false,
    };
    assert!(symbols.declare(sym.clone()));
    assert!(!symbols.declare(sym));
  }

  #[test]
  fn function_scopes_hide_callers_but_not_globals() {
    let mut symbols = SymbolTable::new();
    symbols.enter(0); // globals
    assert!(symbols.declare(Symbol {
      name: "g".into(),
      ty: Type::Int,
      cell: 0,
      is_param: false,
    }));
    symbols.enter(1); // caller body
    assert!(symbols.declare(Symbol {
      name: "local".into(),
      ty: Type::Int,
      cell: 1,
      is_param: false,
    }));
    symbols.enter_function(2); // callee emitted at the call site
    assert!(symbols.lookup("local").is_none());
    assert_eq!(symbols.lookup("g").map(|s| s.cell), Some(0));
  }

  #[test]
  fn arrays_reserve_header_cells() {
    assert_eq!(cells_for(&Type::array_of(Type::Int, vec![3])), ARRAY_HEADER + 3);
    assert_eq!(cells_for(&Type::Int), 1);
  }
}
