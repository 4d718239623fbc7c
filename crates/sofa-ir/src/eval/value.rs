//! Runtime values for the reference evaluator.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::EvalError;

/// A runtime value.
///
/// Arrays are stored row-major as nested `Array`s; a two-dimensional array
/// is an array of arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Integer.
    Int(i64),
    /// Float.
    Real(f64),
    /// Boolean.
    Bool(bool),
    /// Character.
    Char(char),
    /// Tuple.
    Tuple(Vec<Value>),
    /// Array.
    Array(Vec<Value>),
}

impl Value {
    /// A human-readable name of the value's shape, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Real(_) => "real",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::Tuple(_) => "tuple",
            Self::Array(_) => "array",
        }
    }

    /// An integer array from a slice.
    #[must_use]
    pub fn int_array(xs: &[i64]) -> Self {
        Self::Array(xs.iter().copied().map(Self::Int).collect())
    }

    /// Packs several results: a single value stays as is, several become a
    /// tuple.
    #[must_use]
    pub fn from_results(mut vs: Vec<Value>) -> Self {
        if vs.len() == 1 {
            vs.remove(0)
        } else {
            Self::Tuple(vs)
        }
    }

    /// Unpacks `arity` results, the inverse of [`Value::from_results`].
    pub fn into_results(self, arity: usize) -> Result<Vec<Value>, EvalError> {
        if arity == 1 {
            return Ok(vec![self]);
        }
        match self {
            Self::Tuple(vs) if vs.len() == arity => Ok(vs),
            other => Err(EvalError::TypeError {
                expected: format!("tuple of {arity}"),
                got: other.kind().to_string(),
            }),
        }
    }

    /// Extracts an integer.
    pub fn as_int(&self) -> Result<i64, EvalError> {
        match self {
            Self::Int(n) => Ok(*n),
            other => Err(type_error("int", other)),
        }
    }

    /// Extracts a boolean.
    pub fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(type_error("bool", other)),
        }
    }

    /// Extracts the elements of an array.
    pub fn into_array(self) -> Result<Vec<Value>, EvalError> {
        match self {
            Self::Array(vs) => Ok(vs),
            other => Err(type_error("array", &other)),
        }
    }

    /// Borrows the elements of an array.
    pub fn as_array(&self) -> Result<&[Value], EvalError> {
        match self {
            Self::Array(vs) => Ok(vs),
            other => Err(type_error("array", other)),
        }
    }
}

fn type_error(expected: &str, got: &Value) -> EvalError {
    EvalError::TypeError {
        expected: expected.to_string(),
        got: got.kind().to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Real(x) => write!(f, "{x:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Char(c) => write!(f, "{c:?}"),
            Self::Tuple(vs) | Self::Array(vs) => {
                let (open, close) = if matches!(self, Self::Tuple(_)) {
                    ("(", ")")
                } else {
                    ("[", "]")
                };
                f.write_str(open)?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(close)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_packing() {
        assert_eq!(Value::from_results(vec![Value::Int(1)]), Value::Int(1));
        let pair = Value::from_results(vec![Value::Int(1), Value::Bool(true)]);
        assert_eq!(
            pair.clone().into_results(2).unwrap(),
            vec![Value::Int(1), Value::Bool(true)]
        );
        assert!(pair.into_results(3).is_err());
    }

    #[test]
    fn test_display() {
        let v = Value::Tuple(vec![Value::int_array(&[1, 2]), Value::Bool(false)]);
        assert_eq!(v.to_string(), "([1, 2], false)");
    }
}
