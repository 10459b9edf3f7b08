//! The emitted program: a growable buffer of tape-machine instructions.
//!
//! The instruction set is the eight primitives of the target machine plus a
//! comment annotation the emitter may interleave for diagnostics. Comments
//! never survive minification, and their text is sanitized on construction
//! so an annotation can never smuggle a command character into the output.

use std::fmt;

pub const COMMAND_CHARS: &[char] = &['+', '-', '<', '>', '[', ']', '.', ','];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
  /// `>` – advance the data pointer.
  Right,
  /// `<` – retreat the data pointer.
  Left,
  /// `+` – increment the current cell (mod 256).
  Inc,
  /// `-` – decrement the current cell (mod 256).
  Dec,
  /// `[` – enter the loop if the current cell is non-zero.
  LoopStart,
  /// `]` – jump back to the matching `[` if the current cell is non-zero.
  LoopEnd,
  /// `.` – write the current cell to stdout.
  Output,
  /// `,` – read one byte from stdin into the current cell (EOF reads 0).
  Input,
  /// Diagnostic annotation, stripped by the minifier.
  Comment(String),
}

impl Instruction {
  /// Build a comment whose text cannot collide with the command alphabet.
  pub fn comment(text: impl Into<String>) -> Self {
    let text: String = text
      .into()
      .chars()
      .filter(|c| !COMMAND_CHARS.contains(c) && *c != '\n')
      .collect();
    Instruction::Comment(text)
  }

  pub fn command_char(&self) -> Option<char> {
    Some(match self {
      Instruction::Right => '>',
      Instruction::Left => '<',
      Instruction::Inc => '+',
      Instruction::Dec => '-',
      Instruction::LoopStart => '[',
      Instruction::LoopEnd => ']',
      Instruction::Output => '.',
      Instruction::Input => ',',
      Instruction::Comment(_) => return None,
    })
  }
}

/// Append-only instruction buffer. The emitters push into it, the peephole
/// optimizer rewrites it wholesale, and the minifier reads it last.
#[derive(Debug, Default)]
pub struct Program {
  instructions: Vec<Instruction>,
}

impl Program {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, instruction: Instruction) {
    self.instructions.push(instruction);
  }

  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  pub fn instructions(&self) -> &[Instruction] {
    &self.instructions
  }

  pub fn replace(&mut self, instructions: Vec<Instruction>) {
    self.instructions = instructions;
  }

  /// The final program text: command characters only.
  pub fn minified(&self) -> String {
    self
      .instructions
      .iter()
      .filter_map(Instruction::command_char)
      .collect()
  }
}

impl fmt::Display for Program {
  /// Annotated rendering: commands on running lines, one comment per line.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut column = 0;
    for instruction in &self.instructions {
      match instruction {
        Instruction::Comment(text) => {
          if column > 0 {
            writeln!(f)?;
          }
          writeln!(f, "# {text}")?;
          column = 0;
        }
        other => {
          if let Some(c) = other.command_char() {
            write!(f, "{c}")?;
            column += 1;
            if column == 72 {
              writeln!(f)?;
              column = 0;
            }
          }
        }
      }
    }
    if column > 0 {
      writeln!(f)?;
    }
    Ok(())
  }
}

/// Strip anything that is not one of the eight command characters.
/// Idempotent by construction.
pub fn minify(text: &str) -> String {
  text.chars().filter(|c| COMMAND_CHARS.contains(c)).collect()
}

/// Check that `[` and `]` pair up.
pub fn is_balanced(text: &str) -> bool {
  let mut depth = 0i64;
  for c in text.chars() {
    match c {
      '[' => depth += 1,
      ']' => {
        depth -= 1;
        if depth < 0 {
          return false;
        }
      }
      _ => {}
    }
  }
  depth == 0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minify_keeps_only_command_characters() {
    assert_eq!(minify("+a-b<c>d[e]f.g,h #\n"), "+-<>[].,");
  }

  #[test]
  fn minify_is_idempotent() {
    let noisy = "# set x\n+++[->+<] done.";
    assert_eq!(minify(&minify(noisy)), minify(noisy));
  }

  #[test]
  fn comments_cannot_contain_command_characters() {
    let comment = Instruction::comment("move a -> b [cell 3]");
    let Instruction::Comment(text) = &comment else {
      panic!("expected a comment");
    };
    assert!(!text.contains(|c| COMMAND_CHARS.contains(&c)));
  }

  #[test]
  fn balance_checker() {
    assert!(is_balanced("[[-]>[<]]"));
    assert!(!is_balanced("[[-]"));
    assert!(!is_balanced("]["));
  }
}
