//! Peephole optimization over the linear instruction buffer.
//!
//! Three rewrites run alternately until the buffer stops shrinking:
//!
//! - *Cancellation*: adjacent `+`/`-` and `>`/`<` pairs annihilate. Working
//!   against the tail of the output vector makes this transitive, so mixed
//!   runs like `>>><<` fold to their net movement in one sweep.
//! - *Pointer-arithmetic folding*: a stretch containing only `+ - > <` has
//!   no observable behavior beyond its net per-cell deltas and its net
//!   pointer movement, so `>` and `<` can be moved across the neighbouring
//!   instructions freely. Each such stretch is re-sequenced into one visit
//!   per touched cell in address order; the rewrite is kept only when it is
//!   actually shorter.
//! - *Dead loops*: a `[` that opens where the cell is provably zero – at the
//!   start of the program or right after a `]` (a loop only exits on zero) –
//!   is removed together with its whole body. `[-][-]` collapses this way
//!   too. A region containing `.` or `,` is never removed.
//!
//! All rewrites leave brackets matched, never touch I/O instructions, and
//! never grow the buffer. At the fixed point a second run changes nothing.

use std::collections::BTreeMap;

use crate::program::{Instruction, Program};

/// Rewrite to a fixed point. Comments are diagnostic only and are dropped
/// here; the minifier would discard them anyway.
pub fn optimize(program: &Program) -> Program {
  let mut instructions: Vec<Instruction> = program
    .instructions()
    .iter()
    .filter(|i| !matches!(i, Instruction::Comment(_)))
    .cloned()
    .collect();

  loop {
    let before = instructions.len();
    instructions = cancel_pairs(instructions);
    instructions = fold_pointer_arithmetic(instructions);
    instructions = remove_dead_loops(instructions);
    if instructions.len() == before {
      break;
    }
  }

  let mut optimized = Program::new();
  optimized.replace(instructions);
  optimized
}

fn cancel_pairs(instructions: Vec<Instruction>) -> Vec<Instruction> {
  use Instruction::*;

  let mut out: Vec<Instruction> = Vec::with_capacity(instructions.len());
  for instruction in instructions {
    match (out.last(), &instruction) {
      (Some(Inc), Dec) | (Some(Dec), Inc) | (Some(Right), Left) | (Some(Left), Right) => {
        out.pop();
      }
      _ => out.push(instruction),
    }
  }
  out
}

/// Split the buffer into flat (loop-free, I/O-free) stretches and re-emit
/// each by net effect.
fn fold_pointer_arithmetic(instructions: Vec<Instruction>) -> Vec<Instruction> {
  let mut out: Vec<Instruction> = Vec::with_capacity(instructions.len());
  let mut i = 0;
  while i < instructions.len() {
    if is_flat(&instructions[i]) {
      let start = i;
      while i < instructions.len() && is_flat(&instructions[i]) {
        i += 1;
      }
      fold_segment(&instructions[start..i], &mut out);
    } else {
      out.push(instructions[i].clone());
      i += 1;
    }
  }
  out
}

fn is_flat(instruction: &Instruction) -> bool {
  matches!(
    instruction,
    Instruction::Inc | Instruction::Dec | Instruction::Right | Instruction::Left
  )
}

/// Re-sequence one flat stretch: apply the same per-cell deltas, visiting
/// the touched cells in address order, and end at the same cell. Kept only
/// when shorter than the original, so folding can never grow the program
/// and re-running it reproduces itself.
fn fold_segment(segment: &[Instruction], out: &mut Vec<Instruction>) {
  use Instruction::*;

  let mut offset = 0i64;
  let mut deltas: BTreeMap<i64, i64> = BTreeMap::new();
  for instruction in segment {
    match instruction {
      Right => offset += 1,
      Left => offset -= 1,
      Inc => *deltas.entry(offset).or_insert(0) += 1,
      Dec => *deltas.entry(offset).or_insert(0) -= 1,
      _ => {}
    }
  }

  let mut candidate = Vec::new();
  let mut cursor = 0i64;
  for (&cell, &delta) in &deltas {
    let step = delta.rem_euclid(256) as u8;
    if step == 0 {
      continue;
    }
    push_moves(&mut candidate, cursor, cell);
    cursor = cell;
    if step <= 128 {
      for _ in 0..step {
        candidate.push(Inc);
      }
    } else {
      for _ in 0..(256 - step as u16) {
        candidate.push(Dec);
      }
    }
  }
  push_moves(&mut candidate, cursor, offset);

  if candidate.len() < segment.len() {
    out.extend(candidate);
  } else {
    out.extend_from_slice(segment);
  }
}

fn push_moves(out: &mut Vec<Instruction>, from: i64, to: i64) {
  for _ in 0..(to - from).abs() {
    out.push(if to > from {
      Instruction::Right
    } else {
      Instruction::Left
    });
  }
}

fn remove_dead_loops(instructions: Vec<Instruction>) -> Vec<Instruction> {
  use Instruction::*;

  let mut out: Vec<Instruction> = Vec::with_capacity(instructions.len());
  let mut i = 0;
  while i < instructions.len() {
    let cell_is_zero = out.is_empty() || matches!(out.last(), Some(LoopEnd));
    if matches!(instructions[i], LoopStart) && cell_is_zero {
      if let Some(end) = matching_bracket(&instructions, i) {
        let body = &instructions[i..=end];
        if !body.iter().any(|b| matches!(b, Output | Input)) {
          i = end + 1;
          continue;
        }
      }
    }
    out.push(instructions[i].clone());
    i += 1;
  }
  out
}

fn matching_bracket(instructions: &[Instruction], open: usize) -> Option<usize> {
  let mut depth = 0usize;
  for (i, instruction) in instructions.iter().enumerate().skip(open) {
    match instruction {
      Instruction::LoopStart => depth += 1,
      Instruction::LoopEnd => {
        depth -= 1;
        if depth == 0 {
          return Some(i);
        }
      }
      _ => {}
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::program::{is_balanced, Instruction, Program};

  fn program_of(text: &str) -> Program {
    let mut program = Program::new();
    for c in text.chars() {
      let instruction = match c {
        '>' => Instruction::Right,
        '<' => Instruction::Left,
        '+' => Instruction::Inc,
        '-' => Instruction::Dec,
        '[' => Instruction::LoopStart,
        ']' => Instruction::LoopEnd,
        '.' => Instruction::Output,
        ',' => Instruction::Input,
        _ => continue,
      };
      program.push(instruction);
    }
    program
  }

  fn optimized(text: &str) -> String {
    optimize(&program_of(text)).minified()
  }

  #[test]
  fn cancels_adjacent_pairs() {
    assert_eq!(optimized("+-"), "");
    assert_eq!(optimized("<>"), "");
    assert_eq!(optimized(">>><<"), ">");
    assert_eq!(optimized("++--+"), "+");
  }

  #[test]
  fn cancellation_is_transitive_through_runs() {
    // The middle collapses step by step.
    assert_eq!(optimized("+>><<-"), "");
  }

  #[test]
  fn folds_pointer_moves_across_a_flat_stretch() {
    // One visit per cell in address order: `>+<+>` nets to the same tape
    // state and final position as `+>+`.
    assert_eq!(optimized(">+<+>"), "+>+");
    assert_eq!(optimized(">>+<<+>>+<<"), "+>>++<<");
  }

  #[test]
  fn keeps_flat_stretches_it_cannot_shorten() {
    assert_eq!(optimized("+>+<"), "+>+<");
  }

  #[test]
  fn removes_loop_at_program_start() {
    assert_eq!(optimized("[-]+++"), "+++");
  }

  #[test]
  fn removes_loop_after_loop_end() {
    assert_eq!(optimized("+[-][-]+"), "+[-]+");
    assert_eq!(optimized("+[>+<-][>]"), "+[>+<-]");
  }

  #[test]
  fn keeps_loops_with_io() {
    assert_eq!(optimized("+[-][.]"), "+[-][.]");
    assert_eq!(optimized("[,]"), "[,]");
  }

  #[test]
  fn keeps_live_loops() {
    assert_eq!(optimized("+[-]"), "+[-]");
  }

  #[test]
  fn cancellation_can_expose_dead_loops() {
    // After `+-` cancels, the loop opens on a provably zero cell.
    assert_eq!(optimized("+-[>+<]"), "");
  }

  #[test]
  fn preserves_bracket_balance() {
    for source in ["+[[-]><[->+<]]", "[-]+[.[-]]", "+[>[-]<[-]]"] {
      assert!(is_balanced(&optimized(source)));
    }
  }

  #[test]
  fn is_idempotent_at_fixed_point() {
    for source in ["+-+[>><<[-]]", "+[-][-]+", ">>><<<+-"] {
      let once = optimize(&program_of(source));
      let twice = optimize(&once);
      assert_eq!(once.minified(), twice.minified());
    }
  }
}
