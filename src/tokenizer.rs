//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer is intentionally tiny – it knows nothing about semantics
//! beyond recognising keywords, literals and punctuators. Multi-character
//! punctuators are matched before single-character ones to avoid ambiguity,
//! and escape sequences in char/string literals are resolved here so later
//! stages only ever see plain bytes.

use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  // Keywords.
  Int,
  Bool,
  Char,
  Void,
  If,
  Else,
  While,
  Do,
  For,
  Switch,
  Case,
  Default,
  Break,
  Return,
  True,
  False,
  // Literals and names.
  Ident,
  Num,
  CharLit,
  Str,
  // Punctuators.
  LParen,
  RParen,
  LBrace,
  RBrace,
  LBracket,
  RBracket,
  Semicolon,
  Comma,
  Colon,
  Question,
  Plus,
  Minus,
  Star,
  Slash,
  Percent,
  Bang,
  Tilde,
  Assign,
  PlusAssign,
  MinusAssign,
  StarAssign,
  SlashAssign,
  PercentAssign,
  PlusPlus,
  MinusMinus,
  EqEq,
  BangEq,
  Lt,
  Le,
  Gt,
  Ge,
  AmpAmp,
  PipePipe,
  Amp,
  Pipe,
  Caret,
  Shl,
  Shr,
  Eof,
}

impl TokenKind {
  fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
      "int" => TokenKind::Int,
      "bool" => TokenKind::Bool,
      "char" => TokenKind::Char,
      "void" => TokenKind::Void,
      "if" => TokenKind::If,
      "else" => TokenKind::Else,
      "while" => TokenKind::While,
      "do" => TokenKind::Do,
      "for" => TokenKind::For,
      "switch" => TokenKind::Switch,
      "case" => TokenKind::Case,
      "default" => TokenKind::Default,
      "break" => TokenKind::Break,
      "return" => TokenKind::Return,
      "true" => TokenKind::True,
      "false" => TokenKind::False,
      _ => return None,
    })
  }
}

/// One lexical unit. For char and string literals the lexeme holds the
/// *resolved* content (escapes already applied); for everything else it is
/// the source text verbatim.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub lexeme: String,
  pub line: u32,
  pub column: u32,
}

impl Token {
  fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32, column: u32) -> Self {
    Self {
      kind,
      lexeme: lexeme.into(),
      line,
      column,
    }
  }

  /// Human-friendly description used in diagnostics.
  pub fn describe(&self) -> String {
    match self.kind {
      TokenKind::Eof => "end of input".to_string(),
      TokenKind::Str => format!("\"{}\"", self.lexeme),
      _ => format!("'{}'", self.lexeme),
    }
  }
}

struct Lexer<'a> {
  input: &'a [u8],
  pos: usize,
  line: u32,
  column: u32,
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut lexer = Lexer {
    input: input.as_bytes(),
    pos: 0,
    line: 1,
    column: 1,
  };
  let mut tokens = Vec::new();

  loop {
    lexer.skip_trivia()?;
    let (line, column) = (lexer.line, lexer.column);
    let Some(c) = lexer.peek() else {
      tokens.push(Token::new(TokenKind::Eof, "", line, column));
      return Ok(tokens);
    };

    let token = if c.is_ascii_digit() {
      lexer.read_number()?
    } else if c.is_ascii_alphabetic() || c == b'_' {
      lexer.read_word()
    } else if c == b'\'' {
      lexer.read_char_literal()?
    } else if c == b'"' {
      lexer.read_string_literal()?
    } else {
      lexer.read_punctuator()?
    };
    tokens.push(token);
  }
}

impl<'a> Lexer<'a> {
  fn peek(&self) -> Option<u8> {
    self.input.get(self.pos).copied()
  }

  fn peek_next(&self) -> Option<u8> {
    self.input.get(self.pos + 1).copied()
  }

  fn advance(&mut self) -> Option<u8> {
    let c = self.peek()?;
    self.pos += 1;
    if c == b'\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(c)
  }

  /// Skip whitespace and both comment styles.
  fn skip_trivia(&mut self) -> CompileResult<()> {
    loop {
      match self.peek() {
        Some(c) if c.is_ascii_whitespace() => {
          self.advance();
        }
        Some(b'/') if self.peek_next() == Some(b'/') => {
          while let Some(c) = self.peek() {
            if c == b'\n' {
              break;
            }
            self.advance();
          }
        }
        Some(b'/') if self.peek_next() == Some(b'*') => {
          let (line, column) = (self.line, self.column);
          self.advance();
          self.advance();
          loop {
            match self.peek() {
              Some(b'*') if self.peek_next() == Some(b'/') => {
                self.advance();
                self.advance();
                break;
              }
              Some(_) => {
                self.advance();
              }
              None => {
                return Err(CompileError::lexical("unterminated block comment", line, column));
              }
            }
          }
        }
        _ => return Ok(()),
      }
    }
  }

  fn read_number(&mut self) -> CompileResult<Token> {
    let (line, column) = (self.line, self.column);
    let start = self.pos;
    while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
      self.advance();
    }
    let text = std::str::from_utf8(&self.input[start..self.pos])
      .map_err(|_| CompileError::lexical("invalid number", line, column))?;
    if text.parse::<u8>().is_err() {
      return Err(CompileError::lexical(
        format!("integer literal '{text}' does not fit in a byte cell"),
        line,
        column,
      ));
    }
    Ok(Token::new(TokenKind::Num, text, line, column))
  }

  fn read_word(&mut self) -> Token {
    let (line, column) = (self.line, self.column);
    let start = self.pos;
    while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
      self.advance();
    }
    let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or_default();
    match TokenKind::keyword(text) {
      Some(kind) => Token::new(kind, text, line, column),
      None => Token::new(TokenKind::Ident, text, line, column),
    }
  }

  /// Resolve one (possibly escaped) character of a quoted literal.
  fn read_escaped(&mut self, line: u32, column: u32) -> CompileResult<u8> {
    let c = self
      .advance()
      .ok_or_else(|| CompileError::lexical("unterminated literal", line, column))?;
    if c != b'\\' {
      return Ok(c);
    }
    let esc = self
      .advance()
      .ok_or_else(|| CompileError::lexical("unterminated escape sequence", line, column))?;
    match esc {
      b'n' => Ok(b'\n'),
      b't' => Ok(b'\t'),
      b'r' => Ok(b'\r'),
      b'0' => Ok(0),
      b'\\' => Ok(b'\\'),
      b'\'' => Ok(b'\''),
      b'"' => Ok(b'"'),
      other => Err(CompileError::lexical(
        format!("unknown escape sequence '\\{}'", other as char),
        line,
        column,
      )),
    }
  }

  fn read_char_literal(&mut self) -> CompileResult<Token> {
    let (line, column) = (self.line, self.column);
    self.advance(); // opening quote
    if self.peek() == Some(b'\'') {
      return Err(CompileError::lexical("empty char literal", line, column));
    }
    let value = self.read_escaped(line, column)?;
    if self.advance() != Some(b'\'') {
      return Err(CompileError::lexical("unterminated char literal", line, column));
    }
    Ok(Token::new(
      TokenKind::CharLit,
      (value as char).to_string(),
      line,
      column,
    ))
  }

  fn read_string_literal(&mut self) -> CompileResult<Token> {
    let (line, column) = (self.line, self.column);
    self.advance(); // opening quote
    let mut content = String::new();
    loop {
      match self.peek() {
        Some(b'"') => {
          self.advance();
          return Ok(Token::new(TokenKind::Str, content, line, column));
        }
        Some(b'\n') | None => {
          return Err(CompileError::lexical("unterminated string literal", line, column));
        }
        Some(_) => {
          content.push(self.read_escaped(line, column)? as char);
        }
      }
    }
  }

  fn read_punctuator(&mut self) -> CompileResult<Token> {
    let (line, column) = (self.line, self.column);
    let rest = &self.input[self.pos..];

    const TWO_BYTE: &[(&[u8], TokenKind)] = &[
      (b"==", TokenKind::EqEq),
      (b"!=", TokenKind::BangEq),
      (b"<=", TokenKind::Le),
      (b">=", TokenKind::Ge),
      (b"&&", TokenKind::AmpAmp),
      (b"||", TokenKind::PipePipe),
      (b"<<", TokenKind::Shl),
      (b">>", TokenKind::Shr),
      (b"++", TokenKind::PlusPlus),
      (b"--", TokenKind::MinusMinus),
      (b"+=", TokenKind::PlusAssign),
      (b"-=", TokenKind::MinusAssign),
      (b"*=", TokenKind::StarAssign),
      (b"/=", TokenKind::SlashAssign),
      (b"%=", TokenKind::PercentAssign),
    ];

    for (text, kind) in TWO_BYTE {
      if rest.starts_with(text) {
        self.advance();
        self.advance();
        let lexeme = std::str::from_utf8(text).unwrap_or_default();
        return Ok(Token::new(*kind, lexeme, line, column));
      }
    }

    let c = self.advance().unwrap_or(0);
    let kind = match c {
      b'(' => TokenKind::LParen,
      b')' => TokenKind::RParen,
      b'{' => TokenKind::LBrace,
      b'}' => TokenKind::RBrace,
      b'[' => TokenKind::LBracket,
      b']' => TokenKind::RBracket,
      b';' => TokenKind::Semicolon,
      b',' => TokenKind::Comma,
      b':' => TokenKind::Colon,
      b'?' => TokenKind::Question,
      b'+' => TokenKind::Plus,
      b'-' => TokenKind::Minus,
      b'*' => TokenKind::Star,
      b'/' => TokenKind::Slash,
      b'%' => TokenKind::Percent,
      b'!' => TokenKind::Bang,
      b'~' => TokenKind::Tilde,
      b'=' => TokenKind::Assign,
      b'<' => TokenKind::Lt,
      b'>' => TokenKind::Gt,
      b'&' => TokenKind::Amp,
      b'|' => TokenKind::Pipe,
      b'^' => TokenKind::Caret,
      other => {
        return Err(CompileError::lexical(
          format!("unrecognized character '{}'", other as char),
          line,
          column,
        ));
      }
    };
    Ok(Token::new(kind, (c as char).to_string(), line, column))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(input: &str) -> Vec<TokenKind> {
    tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
  }

  #[test]
  fn lexes_a_minimal_program() {
    let kinds = kinds("int main() { return 0; }");
    assert_eq!(
      kinds,
      vec![
        TokenKind::Int,
        TokenKind::Ident,
        TokenKind::LParen,
        TokenKind::RParen,
        TokenKind::LBrace,
        TokenKind::Return,
        TokenKind::Num,
        TokenKind::Semicolon,
        TokenKind::RBrace,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn multi_char_punctuators_win_over_single() {
    assert_eq!(
      kinds("a <= b == c"),
      vec![
        TokenKind::Ident,
        TokenKind::Le,
        TokenKind::Ident,
        TokenKind::EqEq,
        TokenKind::Ident,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn resolves_escapes_in_literals() {
    let tokens = tokenize("'\\n' \"a\\tb\"").unwrap();
    assert_eq!(tokens[0].lexeme, "\n");
    assert_eq!(tokens[1].lexeme, "a\tb");
  }

  #[test]
  fn tracks_line_and_column() {
    let tokens = tokenize("int\n  x;").unwrap();
    assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
  }

  #[test]
  fn rejects_literals_wider_than_a_cell() {
    assert!(tokenize("256").is_err());
    assert!(tokenize("255").is_ok());
  }

  #[test]
  fn rejects_unterminated_string() {
    assert!(tokenize("\"abc").is_err());
  }

  #[test]
  fn skips_comments() {
    assert_eq!(
      kinds("// line\nx /* block\nstill */ y"),
      vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
    );
  }
}
