//! The surface language's type lattice.
//!
//! Every scalar occupies exactly one byte cell on the tape; arrays are
//! statically sized runs of scalar cells, flattened row-major.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
  Int,
  Bool,
  Char,
  Void,
  Array(Box<Type>, Vec<usize>),
}

impl Type {
  pub fn array_of(elem: Type, dims: Vec<usize>) -> Self {
    Self::Array(Box::new(elem), dims)
  }

  pub fn is_scalar(&self) -> bool {
    matches!(self, Type::Int | Type::Bool | Type::Char)
  }

  pub fn is_array(&self) -> bool {
    matches!(self, Type::Array(..))
  }

  /// Number of value cells this type occupies (array headers not included).
  pub fn flat_len(&self) -> usize {
    match self {
      Type::Void => 0,
      Type::Int | Type::Bool | Type::Char => 1,
      Type::Array(_, dims) => dims.iter().product(),
    }
  }

  pub fn dims(&self) -> &[usize] {
    match self {
      Type::Array(_, dims) => dims,
      _ => &[],
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::Int => write!(f, "int"),
      Type::Bool => write!(f, "bool"),
      Type::Char => write!(f, "char"),
      Type::Void => write!(f, "void"),
      Type::Array(elem, dims) => {
        write!(f, "{elem}")?;
        for dim in dims {
          write!(f, "[{dim}]")?;
        }
        Ok(())
      }
    }
  }
}
