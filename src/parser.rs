//! Recursive-descent parser producing the declaration/statement/expression AST.
//!
//! The parser mirrors the classic chibicc structure: a lightweight cursor
//! over the token vector plus a precedence ladder for expressions. All
//! syntactic knowledge lives here; the emitter only ever sees the tree.
//! Assignments are statements (plain or compound), which keeps lvalue
//! handling out of the expression grammar.

use crate::ast::{
  BinOp, Decl, Expr, ExprKind, Function, Param, Stmt, StmtKind, SwitchCase, TranslationUnit, UnOp,
  VarInit,
};
use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind};
use crate::ty::Type;

/// Parse a token vector (as produced by [`crate::tokenizer::tokenize`]) into
/// a translation unit.
pub fn parse(tokens: Vec<Token>) -> CompileResult<TranslationUnit> {
  if tokens.is_empty() {
    return Err(CompileError::syntax("empty token stream", 1, 1));
  }
  let mut stream = TokenStream::new(tokens);
  let mut decls = Vec::new();

  while !stream.at_eof() {
    // Stray semicolons between declarations are tolerated.
    if stream.accept(TokenKind::Semicolon).is_some() {
      continue;
    }
    decls.push(parse_decl(&mut stream)?);
  }

  Ok(TranslationUnit { decls })
}

// ----- Declarations -----

fn parse_decl(stream: &mut TokenStream) -> CompileResult<Decl> {
  let ty_token = stream.peek().clone();
  let base_ty = parse_type_spec(stream)?;
  let name_token = stream.expect(TokenKind::Ident, "a name")?;

  if stream.peek_kind() == TokenKind::LParen {
    let function = parse_function(stream, base_ty, &name_token)?;
    return Ok(Decl::Function(function));
  }

  if base_ty == Type::Void {
    return Err(CompileError::semantic(
      format!("variable '{}' cannot have type void", name_token.lexeme),
      ty_token.line,
      ty_token.column,
    ));
  }

  let ty = parse_array_dims(stream, base_ty)?;
  let init = parse_global_init(stream, &ty)?;
  stream.expect(TokenKind::Semicolon, "';'")?;

  Ok(Decl::Global {
    name: name_token.lexeme,
    ty,
    init,
    line: name_token.line,
    column: name_token.column,
  })
}

fn parse_type_spec(stream: &mut TokenStream) -> CompileResult<Type> {
  let token = stream.peek().clone();
  let ty = match token.kind {
    TokenKind::Int => Type::Int,
    TokenKind::Bool => Type::Bool,
    TokenKind::Char => Type::Char,
    TokenKind::Void => Type::Void,
    _ => {
      return Err(CompileError::syntax(
        format!("expected a type specifier, found {}", token.describe()),
        token.line,
        token.column,
      ));
    }
  };
  stream.advance();
  Ok(ty)
}

fn is_type_keyword(kind: TokenKind) -> bool {
  matches!(
    kind,
    TokenKind::Int | TokenKind::Bool | TokenKind::Char | TokenKind::Void
  )
}

/// Parse `[N]...` suffixes, turning a scalar type into an array type.
fn parse_array_dims(stream: &mut TokenStream, base: Type) -> CompileResult<Type> {
  let mut dims = Vec::new();
  while stream.accept(TokenKind::LBracket).is_some() {
    let len_token = stream.expect(TokenKind::Num, "an array length")?;
    let len = byte_value(&len_token)? as usize;
    if len == 0 {
      return Err(CompileError::semantic(
        "array length must be positive",
        len_token.line,
        len_token.column,
      ));
    }
    dims.push(len);
    stream.expect(TokenKind::RBracket, "']'")?;
  }
  if dims.is_empty() {
    Ok(base)
  } else {
    Ok(Type::array_of(base, dims))
  }
}

/// Global initializers are restricted to literals so they can be written
/// into the tape's fixed prefix without evaluation machinery.
fn parse_global_init(stream: &mut TokenStream, ty: &Type) -> CompileResult<VarInit> {
  if stream.accept(TokenKind::Assign).is_none() {
    return Ok(VarInit::None);
  }
  if ty.is_array() {
    return Ok(VarInit::List(parse_init_list(stream)?));
  }
  let token = stream.peek().clone();
  let value = parse_literal_value(stream).map_err(|_| {
    CompileError::semantic(
      format!(
        "global initializer must be a literal, found {}",
        token.describe()
      ),
      token.line,
      token.column,
    )
  })?;
  Ok(VarInit::Expr(Expr::new(
    ExprKind::IntLit(value),
    token.line,
    token.column,
  )))
}

/// Brace (possibly nested, flattened row-major) or string initializer.
fn parse_init_list(stream: &mut TokenStream) -> CompileResult<Vec<u8>> {
  let token = stream.peek().clone();
  match token.kind {
    TokenKind::Str => {
      stream.advance();
      Ok(token.lexeme.into_bytes())
    }
    TokenKind::LBrace => {
      stream.advance();
      let mut values = Vec::new();
      if stream.peek_kind() != TokenKind::RBrace {
        loop {
          if stream.peek_kind() == TokenKind::LBrace || stream.peek_kind() == TokenKind::Str {
            values.extend(parse_init_list(stream)?);
          } else {
            values.push(parse_literal_value(stream)?);
          }
          if stream.accept(TokenKind::Comma).is_none() {
            break;
          }
        }
      }
      stream.expect(TokenKind::RBrace, "'}'")?;
      Ok(values)
    }
    _ => Err(CompileError::syntax(
      format!("expected an initializer list, found {}", token.describe()),
      token.line,
      token.column,
    )),
  }
}

fn parse_literal_value(stream: &mut TokenStream) -> CompileResult<u8> {
  let token = stream.peek().clone();
  let value = match token.kind {
    TokenKind::Num => byte_value(&token)?,
    TokenKind::CharLit => char_value(&token),
    TokenKind::True => 1,
    TokenKind::False => 0,
    _ => {
      return Err(CompileError::syntax(
        format!("expected a literal, found {}", token.describe()),
        token.line,
        token.column,
      ));
    }
  };
  stream.advance();
  Ok(value)
}

fn parse_function(
  stream: &mut TokenStream,
  ret: Type,
  name_token: &Token,
) -> CompileResult<Function> {
  stream.expect(TokenKind::LParen, "'('")?;
  let mut params = Vec::new();
  if stream.peek_kind() != TokenKind::RParen {
    loop {
      let ty_token = stream.peek().clone();
      let ty = parse_type_spec(stream)?;
      if !ty.is_scalar() {
        return Err(CompileError::semantic(
          format!("function parameters must be scalar, found {ty}"),
          ty_token.line,
          ty_token.column,
        ));
      }
      let param_name = stream.expect(TokenKind::Ident, "a parameter name")?;
      if stream.peek_kind() == TokenKind::LBracket {
        return Err(CompileError::semantic(
          format!("parameter '{}' cannot be an array", param_name.lexeme),
          param_name.line,
          param_name.column,
        ));
      }
      params.push(Param {
        name: param_name.lexeme,
        ty,
        line: param_name.line,
        column: param_name.column,
      });
      if stream.accept(TokenKind::Comma).is_none() {
        break;
      }
    }
  }
  stream.expect(TokenKind::RParen, "')'")?;

  stream.expect(TokenKind::LBrace, "'{'")?;
  let body = parse_stmt_list(stream, TokenKind::RBrace)?;
  stream.expect(TokenKind::RBrace, "'}'")?;

  Ok(Function {
    name: name_token.lexeme.clone(),
    ret,
    params,
    body,
    line: name_token.line,
    column: name_token.column,
  })
}

// ----- Statements -----

fn parse_stmt_list(stream: &mut TokenStream, terminator: TokenKind) -> CompileResult<Vec<Stmt>> {
  let mut stmts = Vec::new();
  while stream.peek_kind() != terminator {
    if stream.at_eof() {
      let token = stream.peek();
      return Err(CompileError::syntax(
        "unexpected end of input inside a block",
        token.line,
        token.column,
      ));
    }
    stmts.push(parse_stmt(stream)?);
  }
  Ok(stmts)
}

fn parse_stmt(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let token = stream.peek().clone();
  match token.kind {
    TokenKind::LBrace => {
      stream.advance();
      let body = parse_stmt_list(stream, TokenKind::RBrace)?;
      stream.expect(TokenKind::RBrace, "'}'")?;
      Ok(Stmt::new(StmtKind::Block(body), token.line, token.column))
    }
    kind if is_type_keyword(kind) => {
      let stmt = parse_var_decl(stream)?;
      stream.expect(TokenKind::Semicolon, "';'")?;
      Ok(stmt)
    }
    TokenKind::If => parse_if(stream),
    TokenKind::While => parse_while(stream),
    TokenKind::Do => parse_do_while(stream),
    TokenKind::For => parse_for(stream),
    TokenKind::Switch => parse_switch(stream),
    TokenKind::Break => {
      stream.advance();
      stream.expect(TokenKind::Semicolon, "';'")?;
      Ok(Stmt::new(StmtKind::Break, token.line, token.column))
    }
    TokenKind::Return => {
      stream.advance();
      let value = if stream.peek_kind() == TokenKind::Semicolon {
        None
      } else {
        Some(parse_expr(stream)?)
      };
      stream.expect(TokenKind::Semicolon, "';'")?;
      Ok(Stmt::new(StmtKind::Return(value), token.line, token.column))
    }
    TokenKind::Semicolon => {
      stream.advance();
      Ok(Stmt::new(StmtKind::Empty, token.line, token.column))
    }
    TokenKind::Case | TokenKind::Default => Err(CompileError::syntax(
      format!("{} outside of a switch statement", token.describe()),
      token.line,
      token.column,
    )),
    TokenKind::Else => Err(CompileError::syntax(
      "'else' without a matching 'if'",
      token.line,
      token.column,
    )),
    _ => {
      let stmt = parse_simple_stmt(stream)?;
      stream.expect(TokenKind::Semicolon, "';'")?;
      Ok(stmt)
    }
  }
}

/// Local declaration without its trailing semicolon (shared with `for`).
fn parse_var_decl(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let ty_token = stream.peek().clone();
  let base_ty = parse_type_spec(stream)?;
  if base_ty == Type::Void {
    return Err(CompileError::semantic(
      "variables cannot have type void",
      ty_token.line,
      ty_token.column,
    ));
  }
  let name_token = stream.expect(TokenKind::Ident, "a variable name")?;
  let ty = parse_array_dims(stream, base_ty)?;

  let init = if stream.accept(TokenKind::Assign).is_some() {
    if ty.is_array() {
      VarInit::List(parse_init_list(stream)?)
    } else {
      VarInit::Expr(parse_expr(stream)?)
    }
  } else {
    VarInit::None
  };

  Ok(Stmt::new(
    StmtKind::VarDecl {
      name: name_token.lexeme,
      ty,
      init,
    },
    name_token.line,
    name_token.column,
  ))
}

/// Assignment, increment/decrement, or call – the statements that begin with
/// an expression. The trailing semicolon is left to the caller so `for`
/// headers can reuse this.
fn parse_simple_stmt(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let token = stream.peek().clone();

  if token.kind == TokenKind::Ident {
    let after = stream.peek_past_index_suffix();
    if let Some(op) = assign_op(after) {
      let target = parse_lvalue(stream)?;
      stream.advance(); // the assignment operator
      let value = parse_expr(stream)?;
      return Ok(Stmt::new(
        StmtKind::Assign { target, op, value },
        token.line,
        token.column,
      ));
    }
  }

  let expr = parse_expr(stream)?;
  Ok(Stmt::new(StmtKind::Expr(expr), token.line, token.column))
}

fn assign_op(kind: TokenKind) -> Option<Option<BinOp>> {
  match kind {
    TokenKind::Assign => Some(None),
    TokenKind::PlusAssign => Some(Some(BinOp::Add)),
    TokenKind::MinusAssign => Some(Some(BinOp::Sub)),
    TokenKind::StarAssign => Some(Some(BinOp::Mul)),
    TokenKind::SlashAssign => Some(Some(BinOp::Div)),
    TokenKind::PercentAssign => Some(Some(BinOp::Mod)),
    _ => None,
  }
}

/// An identifier, optionally with index suffixes: the only assignable forms.
fn parse_lvalue(stream: &mut TokenStream) -> CompileResult<Expr> {
  let name_token = stream.expect(TokenKind::Ident, "an assignable name")?;
  if stream.peek_kind() != TokenKind::LBracket {
    return Ok(Expr::new(
      ExprKind::Ident(name_token.lexeme),
      name_token.line,
      name_token.column,
    ));
  }
  let mut indices = Vec::new();
  while stream.accept(TokenKind::LBracket).is_some() {
    indices.push(parse_expr(stream)?);
    stream.expect(TokenKind::RBracket, "']'")?;
  }
  Ok(Expr::new(
    ExprKind::Index {
      name: name_token.lexeme,
      indices,
    },
    name_token.line,
    name_token.column,
  ))
}

fn parse_if(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let token = stream.advance(); // 'if'
  stream.expect(TokenKind::LParen, "'('")?;
  let cond = parse_expr(stream)?;
  stream.expect(TokenKind::RParen, "')'")?;
  let then_branch = Box::new(parse_stmt(stream)?);
  let else_branch = if stream.accept(TokenKind::Else).is_some() {
    Some(Box::new(parse_stmt(stream)?))
  } else {
    None
  };
  Ok(Stmt::new(
    StmtKind::If {
      cond,
      then_branch,
      else_branch,
    },
    token.line,
    token.column,
  ))
}

fn parse_while(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let token = stream.advance(); // 'while'
  stream.expect(TokenKind::LParen, "'('")?;
  let cond = parse_expr(stream)?;
  stream.expect(TokenKind::RParen, "')'")?;
  let body = Box::new(parse_stmt(stream)?);
  Ok(Stmt::new(StmtKind::While { cond, body }, token.line, token.column))
}

fn parse_do_while(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let token = stream.advance(); // 'do'
  let body = Box::new(parse_stmt(stream)?);
  stream.expect(TokenKind::While, "'while'")?;
  stream.expect(TokenKind::LParen, "'('")?;
  let cond = parse_expr(stream)?;
  stream.expect(TokenKind::RParen, "')'")?;
  stream.expect(TokenKind::Semicolon, "';'")?;
  Ok(Stmt::new(StmtKind::DoWhile { body, cond }, token.line, token.column))
}

fn parse_for(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let token = stream.advance(); // 'for'
  stream.expect(TokenKind::LParen, "'('")?;

  let init = if stream.accept(TokenKind::Semicolon).is_some() {
    None
  } else {
    let stmt = if is_type_keyword(stream.peek_kind()) {
      parse_var_decl(stream)?
    } else {
      parse_simple_stmt(stream)?
    };
    stream.expect(TokenKind::Semicolon, "';'")?;
    Some(Box::new(stmt))
  };

  let cond = if stream.peek_kind() == TokenKind::Semicolon {
    None
  } else {
    Some(parse_expr(stream)?)
  };
  stream.expect(TokenKind::Semicolon, "';'")?;

  let step = if stream.peek_kind() == TokenKind::RParen {
    None
  } else {
    Some(Box::new(parse_simple_stmt(stream)?))
  };
  stream.expect(TokenKind::RParen, "')'")?;

  let body = Box::new(parse_stmt(stream)?);
  Ok(Stmt::new(
    StmtKind::For {
      init,
      cond,
      step,
      body,
    },
    token.line,
    token.column,
  ))
}

fn parse_switch(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let token = stream.advance(); // 'switch'
  stream.expect(TokenKind::LParen, "'('")?;
  let scrutinee = parse_expr(stream)?;
  stream.expect(TokenKind::RParen, "')'")?;
  stream.expect(TokenKind::LBrace, "'{'")?;

  let mut cases: Vec<SwitchCase> = Vec::new();
  loop {
    let arm_token = stream.peek().clone();
    let value = match arm_token.kind {
      TokenKind::Case => {
        stream.advance();
        let value = parse_literal_value(stream)?;
        if cases.iter().any(|c| c.value == Some(value)) {
          return Err(CompileError::semantic(
            format!("duplicate case value {value}"),
            arm_token.line,
            arm_token.column,
          ));
        }
        Some(value)
      }
      TokenKind::Default => {
        stream.advance();
        if cases.iter().any(|c| c.value.is_none()) {
          return Err(CompileError::semantic(
            "duplicate default case",
            arm_token.line,
            arm_token.column,
          ));
        }
        None
      }
      TokenKind::RBrace => break,
      _ => {
        return Err(CompileError::syntax(
          format!("expected 'case', 'default' or '}}', found {}", arm_token.describe()),
          arm_token.line,
          arm_token.column,
        ));
      }
    };
    stream.expect(TokenKind::Colon, "':'")?;

    let mut body = Vec::new();
    while !matches!(
      stream.peek_kind(),
      TokenKind::Case | TokenKind::Default | TokenKind::RBrace
    ) {
      if stream.at_eof() {
        let t = stream.peek();
        return Err(CompileError::syntax("unterminated switch body", t.line, t.column));
      }
      body.push(parse_stmt(stream)?);
    }
    cases.push(SwitchCase {
      value,
      body,
      line: arm_token.line,
      column: arm_token.column,
    });
  }
  stream.expect(TokenKind::RBrace, "'}'")?;

  Ok(Stmt::new(
    StmtKind::Switch { scrutinee, cases },
    token.line,
    token.column,
  ))
}

// ----- Expressions -----

fn parse_expr(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_ternary(stream)
}

fn parse_ternary(stream: &mut TokenStream) -> CompileResult<Expr> {
  let cond = parse_logical_or(stream)?;
  if stream.peek_kind() != TokenKind::Question {
    return Ok(cond);
  }
  let token = stream.advance(); // '?'
  let then_val = parse_expr(stream)?;
  stream.expect(TokenKind::Colon, "':'")?;
  let else_val = parse_ternary(stream)?;
  Ok(Expr::new(
    ExprKind::Ternary {
      cond: Box::new(cond),
      then_val: Box::new(then_val),
      else_val: Box::new(else_val),
    },
    token.line,
    token.column,
  ))
}

fn parse_logical_or(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_logical_and(stream)?;
  while stream.peek_kind() == TokenKind::PipePipe {
    let token = stream.advance();
    let rhs = parse_logical_and(stream)?;
    node = binary(BinOp::Or, node, rhs, &token);
  }
  Ok(node)
}

fn parse_logical_and(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_equality(stream)?;
  while stream.peek_kind() == TokenKind::AmpAmp {
    let token = stream.advance();
    let rhs = parse_equality(stream)?;
    node = binary(BinOp::And, node, rhs, &token);
  }
  Ok(node)
}

fn parse_equality(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_relational(stream)?;
  loop {
    let op = match stream.peek_kind() {
      TokenKind::EqEq => BinOp::Eq,
      TokenKind::BangEq => BinOp::Ne,
      _ => break,
    };
    let token = stream.advance();
    let rhs = parse_relational(stream)?;
    node = binary(op, node, rhs, &token);
  }
  Ok(node)
}

fn parse_relational(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_additive(stream)?;
  loop {
    let op = match stream.peek_kind() {
      TokenKind::Lt => BinOp::Lt,
      TokenKind::Le => BinOp::Le,
      TokenKind::Gt => BinOp::Gt,
      TokenKind::Ge => BinOp::Ge,
      _ => break,
    };
    let token = stream.advance();
    let rhs = parse_additive(stream)?;
    node = binary(op, node, rhs, &token);
  }
  Ok(node)
}

fn parse_additive(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_multiplicative(stream)?;
  loop {
    let op = match stream.peek_kind() {
      TokenKind::Plus => BinOp::Add,
      TokenKind::Minus => BinOp::Sub,
      _ => break,
    };
    let token = stream.advance();
    let rhs = parse_multiplicative(stream)?;
    node = binary(op, node, rhs, &token);
  }
  Ok(node)
}

fn parse_multiplicative(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_unary(stream)?;
  loop {
    let op = match stream.peek_kind() {
      TokenKind::Star => BinOp::Mul,
      TokenKind::Slash => BinOp::Div,
      TokenKind::Percent => BinOp::Mod,
      _ => break,
    };
    let token = stream.advance();
    let rhs = parse_unary(stream)?;
    node = binary(op, node, rhs, &token);
  }
  Ok(node)
}

fn parse_unary(stream: &mut TokenStream) -> CompileResult<Expr> {
  let token = stream.peek().clone();
  let op = match token.kind {
    TokenKind::Bang => Some(UnOp::Not),
    TokenKind::Minus => Some(UnOp::Neg),
    TokenKind::Tilde => Some(UnOp::BitNot),
    TokenKind::PlusPlus => Some(UnOp::PreInc),
    TokenKind::MinusMinus => Some(UnOp::PreDec),
    TokenKind::Plus => {
      // Unary plus is the identity.
      stream.advance();
      return parse_unary(stream);
    }
    TokenKind::Amp | TokenKind::Pipe | TokenKind::Caret | TokenKind::Shl | TokenKind::Shr => {
      return Err(CompileError::syntax(
        format!("bitwise operator {} is not supported", token.describe()),
        token.line,
        token.column,
      ));
    }
    _ => None,
  };

  if let Some(op) = op {
    stream.advance();
    let operand = parse_unary(stream)?;
    return Ok(Expr::new(
      ExprKind::Unary {
        op,
        operand: Box::new(operand),
      },
      token.line,
      token.column,
    ));
  }

  parse_postfix(stream)
}

fn parse_postfix(stream: &mut TokenStream) -> CompileResult<Expr> {
  let node = parse_primary(stream)?;
  let op = match stream.peek_kind() {
    TokenKind::PlusPlus => UnOp::PostInc,
    TokenKind::MinusMinus => UnOp::PostDec,
    _ => return Ok(node),
  };
  let token = stream.advance();
  Ok(Expr::new(
    ExprKind::Unary {
      op,
      operand: Box::new(node),
    },
    token.line,
    token.column,
  ))
}

fn parse_primary(stream: &mut TokenStream) -> CompileResult<Expr> {
  let token = stream.peek().clone();
  match token.kind {
    TokenKind::Num => {
      stream.advance();
      Ok(Expr::new(
        ExprKind::IntLit(byte_value(&token)?),
        token.line,
        token.column,
      ))
    }
    TokenKind::CharLit => {
      stream.advance();
      Ok(Expr::new(
        ExprKind::CharLit(char_value(&token)),
        token.line,
        token.column,
      ))
    }
    TokenKind::True | TokenKind::False => {
      stream.advance();
      Ok(Expr::new(
        ExprKind::BoolLit(token.kind == TokenKind::True),
        token.line,
        token.column,
      ))
    }
    TokenKind::Str => {
      stream.advance();
      Ok(Expr::new(
        ExprKind::StrLit(token.lexeme),
        token.line,
        token.column,
      ))
    }
    TokenKind::LParen => {
      stream.advance();
      let node = parse_expr(stream)?;
      stream.expect(TokenKind::RParen, "')'")?;
      Ok(node)
    }
    TokenKind::Ident => {
      stream.advance();
      match stream.peek_kind() {
        TokenKind::LParen => {
          stream.advance();
          let mut args = Vec::new();
          if stream.peek_kind() != TokenKind::RParen {
            loop {
              args.push(parse_expr(stream)?);
              if stream.accept(TokenKind::Comma).is_none() {
                break;
              }
            }
          }
          stream.expect(TokenKind::RParen, "')'")?;
          Ok(Expr::new(
            ExprKind::Call {
              name: token.lexeme,
              args,
            },
            token.line,
            token.column,
          ))
        }
        TokenKind::LBracket => {
          let mut indices = Vec::new();
          while stream.accept(TokenKind::LBracket).is_some() {
            indices.push(parse_expr(stream)?);
            stream.expect(TokenKind::RBracket, "']'")?;
          }
          Ok(Expr::new(
            ExprKind::Index {
              name: token.lexeme,
              indices,
            },
            token.line,
            token.column,
          ))
        }
        _ => Ok(Expr::new(
          ExprKind::Ident(token.lexeme),
          token.line,
          token.column,
        )),
      }
    }
    _ => Err(CompileError::syntax(
      format!("expected an expression, found {}", token.describe()),
      token.line,
      token.column,
    )),
  }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr, token: &Token) -> Expr {
  Expr::new(
    ExprKind::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    },
    token.line,
    token.column,
  )
}

fn byte_value(token: &Token) -> CompileResult<u8> {
  token.lexeme.parse::<u8>().map_err(|_| {
    CompileError::internal(format!(
      "numeric token '{}' escaped lexical validation",
      token.lexeme
    ))
  })
}

fn char_value(token: &Token) -> u8 {
  token.lexeme.as_bytes().first().copied().unwrap_or(0)
}

/// Lightweight cursor over the token vector.
struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  fn new(tokens: Vec<Token>) -> Self {
    Self { tokens, pos: 0 }
  }

  /// The current token. The vector is `Eof`-terminated, so once the cursor
  /// reaches the end this keeps returning the `Eof` marker.
  fn peek(&self) -> &Token {
    let last = self.tokens.len() - 1;
    &self.tokens[self.pos.min(last)]
  }

  fn peek_kind(&self) -> TokenKind {
    self.peek().kind
  }

  fn advance(&mut self) -> Token {
    let token = self.peek().clone();
    if self.pos < self.tokens.len() {
      self.pos += 1;
    }
    token
  }

  fn accept(&mut self, kind: TokenKind) -> Option<Token> {
    if self.peek_kind() == kind {
      Some(self.advance())
    } else {
      None
    }
  }

  fn expect(&mut self, kind: TokenKind, what: &str) -> CompileResult<Token> {
    if self.peek_kind() == kind {
      Ok(self.advance())
    } else {
      let token = self.peek();
      Err(CompileError::syntax(
        format!("expected {what}, found {}", token.describe()),
        token.line,
        token.column,
      ))
    }
  }

  fn at_eof(&self) -> bool {
    self.peek_kind() == TokenKind::Eof
  }

  /// Looking at `IDENT ('[' ... ']')*`, return the kind of the token right
  /// after the bracket suffixes without moving the cursor. Used to decide
  /// whether an identifier starts an assignment or a plain expression.
  fn peek_past_index_suffix(&self) -> TokenKind {
    let mut i = self.pos + 1; // past the identifier
    loop {
      let Some(token) = self.tokens.get(i) else {
        return TokenKind::Eof;
      };
      if token.kind != TokenKind::LBracket {
        return token.kind;
      }
      let mut depth = 0usize;
      while let Some(t) = self.tokens.get(i) {
        match t.kind {
          TokenKind::LBracket => depth += 1,
          TokenKind::RBracket => {
            depth -= 1;
            if depth == 0 {
              break;
            }
          }
          TokenKind::Eof => return TokenKind::Eof,
          _ => {}
        }
        i += 1;
      }
      i += 1; // past the closing bracket
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;

  fn parse_source(source: &str) -> CompileResult<TranslationUnit> {
    parse(tokenize(source)?)
  }

  #[test]
  fn parses_function_with_params() {
    let unit = parse_source("int add(int a, int b) { return a + b; }").unwrap();
    assert_eq!(unit.decls.len(), 1);
    let Decl::Function(f) = &unit.decls[0] else {
      panic!("expected a function");
    };
    assert_eq!(f.name, "add");
    assert_eq!(f.params.len(), 2);
    assert_eq!(f.body.len(), 1);
  }

  #[test]
  fn parses_global_array_with_initializer() {
    let unit = parse_source("int a[2][2] = {{1, 2}, {3, 4}};").unwrap();
    let Decl::Global { ty, init, .. } = &unit.decls[0] else {
      panic!("expected a global");
    };
    assert_eq!(ty.flat_len(), 4);
    let VarInit::List(values) = init else {
      panic!("expected a list initializer");
    };
    assert_eq!(values, &[1, 2, 3, 4]);
  }

  #[test]
  fn distinguishes_indexed_assignment_from_expression() {
    let unit = parse_source("int main() { a[i + 1] = 2; f(a[0]); return 0; }").unwrap();
    let Decl::Function(f) = &unit.decls[0] else {
      panic!("expected a function");
    };
    assert!(matches!(f.body[0].kind, StmtKind::Assign { .. }));
    assert!(matches!(f.body[1].kind, StmtKind::Expr(_)));
  }

  #[test]
  fn compound_assignment_folds_operator() {
    let unit = parse_source("int main() { x += 3; return 0; }").unwrap();
    let Decl::Function(f) = &unit.decls[0] else {
      panic!("expected a function");
    };
    let StmtKind::Assign { op, .. } = &f.body[0].kind else {
      panic!("expected an assignment");
    };
    assert_eq!(*op, Some(BinOp::Add));
  }

  #[test]
  fn rejects_duplicate_case() {
    let err = parse_source("int main() { switch (1) { case 1: break; case 1: break; } }")
      .unwrap_err();
    assert!(err.to_string().contains("duplicate case"));
  }

  #[test]
  fn rejects_bitwise_operators() {
    assert!(parse_source("int main() { return 1 & 2; }").is_err());
  }

  #[test]
  fn rejects_missing_semicolon() {
    assert!(parse_source("int main() { return 0 }").is_err());
  }
}
