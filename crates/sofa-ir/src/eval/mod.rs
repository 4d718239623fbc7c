//! Reference evaluator for the IR.
//!
//! A direct, sequential interpreter. It exists to check transformations:
//! a program and its optimized form must evaluate to the same value on the
//! same arguments. It makes no attempt to be fast.
//!
//! SOAC semantics:
//!
//! - `map` applies its lambda elementwise and returns one array per result
//! - `reduce` and `redomap` are left folds from the neutral element;
//!   `redomap` folds with its inner lambda, since the outer one only
//!   matters for combining partial results of a parallel split
//! - `scan` is an inclusive left scan
//! - `filter` keeps the rows of all its inputs for which the predicate holds
//!
//! The evaluator counts calls to each top-level function, which lets tests
//! check how often a computation actually runs.

mod env;
mod value;

pub use env::Env;
pub use value::Value;

use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;
use sofa_intern::Symbol;
use thiserror::Error;

use crate::{BinOp, Exp, Lambda, Literal, Pattern, Program};

/// Errors that can occur during evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A variable had no binding.
    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    /// A call to a function not in the program.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A value had the wrong shape.
    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        /// The expected shape.
        expected: String,
        /// The shape found.
        got: String,
    },

    /// Wrong number of arguments to a function or lambda.
    #[error("arity mismatch: expected {expected} arguments, got {got}")]
    ArityMismatch {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        got: usize,
    },

    /// SOAC inputs of different lengths, or a ragged array.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Array index outside the bounds.
    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds {
        /// The index.
        index: i64,
        /// The array length.
        len: usize,
    },

    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Call depth exceeded.
    #[error("stack overflow: maximum call depth exceeded")]
    StackOverflow,
}

/// The IR evaluator.
pub struct Evaluator<'p> {
    program: &'p Program,
    /// Maximum call depth.
    max_depth: usize,
    depth: Cell<usize>,
    /// Calls per top-level function.
    calls: RefCell<FxHashMap<Symbol, usize>>,
}

impl<'p> Evaluator<'p> {
    /// Creates an evaluator for `program`.
    #[must_use]
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            max_depth: 1000,
            depth: Cell::new(0),
            calls: RefCell::new(FxHashMap::default()),
        }
    }

    /// Number of times `name` has been called so far.
    #[must_use]
    pub fn call_count(&self, name: Symbol) -> usize {
        self.calls.borrow().get(&name).copied().unwrap_or(0)
    }

    /// Calls the top-level function `name`.
    pub fn call(&self, name: Symbol, args: Vec<Value>) -> Result<Value, EvalError> {
        let fun = self
            .program
            .fun(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        if fun.params.len() != args.len() {
            return Err(EvalError::ArityMismatch {
                expected: fun.params.len(),
                got: args.len(),
            });
        }
        if self.depth.get() >= self.max_depth {
            return Err(EvalError::StackOverflow);
        }
        *self.calls.borrow_mut().entry(name).or_insert(0) += 1;

        let env = Env::new().extend_many(fun.params.iter().map(|p| p.name).zip(args));
        self.depth.set(self.depth.get() + 1);
        let result = self.eval(&fun.body, &env);
        self.depth.set(self.depth.get() - 1);
        result
    }

    /// Evaluates `exp` in `env`.
    pub fn eval(&self, exp: &Exp, env: &Env) -> Result<Value, EvalError> {
        match exp {
            Exp::Literal(lit, _) => Ok(match *lit {
                Literal::Int(n) => Value::Int(n),
                Literal::Real(x) => Value::Real(x),
                Literal::Bool(b) => Value::Bool(b),
                Literal::Char(c) => Value::Char(c),
            }),

            Exp::Var(id, _) => env
                .lookup(id.name)
                .cloned()
                .ok_or_else(|| EvalError::UnboundVariable(id.name.to_string())),

            Exp::TupLit(es, _) => Ok(Value::Tuple(self.eval_all(es, env)?)),

            Exp::ArrayLit(es, _, _) => Ok(Value::Array(self.eval_all(es, env)?)),

            Exp::BinOp(op, a, b, _, _) => {
                let a = self.eval(a, env)?;
                let b = self.eval(b, env)?;
                eval_binop(*op, &a, &b)
            }

            Exp::Not(e, _) => Ok(Value::Bool(!self.eval(e, env)?.as_bool()?)),

            Exp::Negate(e, _) => match self.eval(e, env)? {
                Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
                Value::Real(x) => Ok(Value::Real(-x)),
                other => Err(EvalError::TypeError {
                    expected: "number".to_string(),
                    got: other.kind().to_string(),
                }),
            },

            Exp::If(c, t, e, _, _) => {
                if self.eval(c, env)?.as_bool()? {
                    self.eval(t, env)
                } else {
                    self.eval(e, env)
                }
            }

            Exp::Apply(fname, args, _, _) => {
                let args = self.eval_all(args, env)?;
                self.call(*fname, args)
            }

            Exp::LetPat(pat, rhs, body, _) => {
                let v = self.eval(rhs, env)?;
                let env = bind_pattern(env, pat, v)?;
                self.eval(body, &env)
            }

            Exp::LetWith {
                dest,
                src,
                idxs,
                value,
                body,
                ..
            } => {
                let arr = env
                    .lookup(src.name)
                    .cloned()
                    .ok_or_else(|| EvalError::UnboundVariable(src.name.to_string()))?;
                let idxs = idxs
                    .iter()
                    .map(|i| self.eval(i, env)?.as_int())
                    .collect::<Result<Vec<_>, _>>()?;
                let v = self.eval(value, env)?;
                let updated = update_at(arr, &idxs, v)?;
                self.eval(body, &env.extend(dest.name, updated))
            }

            Exp::Index(arr, idxs, _) => {
                let mut cur = env
                    .lookup(arr.name)
                    .ok_or_else(|| EvalError::UnboundVariable(arr.name.to_string()))?
                    .clone();
                for i in idxs {
                    let i = self.eval(i, env)?.as_int()?;
                    let mut rows = cur.into_array()?;
                    let len = rows.len();
                    let slot = checked_index(i, len)?;
                    cur = rows.swap_remove(slot);
                }
                Ok(cur)
            }

            Exp::Iota(n, _) => {
                let n = self.eval(n, env)?.as_int()?;
                Ok(Value::Array((0..n.max(0)).map(Value::Int).collect()))
            }

            Exp::Size(e, _) => {
                let len = self.eval(e, env)?.as_array()?.len();
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }

            Exp::Replicate(n, v, _) => {
                let n = self.eval(n, env)?.as_int()?;
                let v = self.eval(v, env)?;
                let n = usize::try_from(n.max(0)).unwrap_or(0);
                Ok(Value::Array(vec![v; n]))
            }

            Exp::Transpose(e, _) => transpose(self.eval(e, env)?),

            Exp::DoLoop {
                merge,
                init,
                ivar,
                bound,
                body,
                rest,
                ..
            } => {
                let mut vals = self.eval_all(init, env)?;
                let n = self.eval(bound, env)?.as_int()?;
                for i in 0..n {
                    let inner = bind_pattern(env, merge, Value::from_results(vals))?
                        .extend(ivar.name, Value::Int(i));
                    vals = self.eval(body, &inner)?.into_results(merge.len())?;
                }
                let env = bind_pattern(env, merge, Value::from_results(vals))?;
                self.eval(rest, &env)
            }

            Exp::Map(lam, arrs, _, _) => {
                let rows = self.eval_rows(arrs, env)?;
                let mut columns = vec![Vec::with_capacity(rows.len()); lam.ret_types.len()];
                for elems in rows {
                    let results = self.apply_lambda(lam, elems, env)?;
                    for (col, r) in columns.iter_mut().zip(results) {
                        col.push(r);
                    }
                }
                Ok(Value::from_results(
                    columns.into_iter().map(Value::Array).collect(),
                ))
            }

            Exp::Reduce(lam, nes, arrs, _, _) | Exp::Redomap(_, lam, nes, arrs, _, _) => {
                let mut acc = self.eval_all(nes, env)?;
                for elems in self.eval_rows(arrs, env)? {
                    acc.extend(elems);
                    acc = self.apply_lambda(lam, acc, env)?;
                }
                Ok(Value::from_results(acc))
            }

            Exp::Scan(lam, nes, arrs, _, _) => {
                let mut acc = self.eval_all(nes, env)?;
                let rows = self.eval_rows(arrs, env)?;
                let mut columns = vec![Vec::with_capacity(rows.len()); acc.len()];
                for elems in rows {
                    acc.extend(elems);
                    acc = self.apply_lambda(lam, acc, env)?;
                    for (col, a) in columns.iter_mut().zip(&acc) {
                        col.push(a.clone());
                    }
                }
                Ok(Value::from_results(
                    columns.into_iter().map(Value::Array).collect(),
                ))
            }

            Exp::Filter(lam, arrs, _, _) => {
                let rows = self.eval_rows(arrs, env)?;
                let mut columns = vec![Vec::new(); arrs.len()];
                for elems in rows {
                    let keep = self.apply_lambda(lam, elems.clone(), env)?;
                    let keep = keep.first().map(Value::as_bool).transpose()?;
                    if keep == Some(true) {
                        for (col, e) in columns.iter_mut().zip(elems) {
                            col.push(e);
                        }
                    }
                }
                Ok(Value::from_results(
                    columns.into_iter().map(Value::Array).collect(),
                ))
            }
        }
    }

    fn eval_all(&self, es: &[Exp], env: &Env) -> Result<Vec<Value>, EvalError> {
        es.iter().map(|e| self.eval(e, env)).collect()
    }

    /// Evaluates SOAC inputs and zips them into rows of elements.
    fn eval_rows(&self, arrs: &[Exp], env: &Env) -> Result<Vec<Vec<Value>>, EvalError> {
        let arrays = arrs
            .iter()
            .map(|a| self.eval(a, env)?.into_array())
            .collect::<Result<Vec<_>, _>>()?;
        let len = arrays.first().map_or(0, Vec::len);
        if let Some(bad) = arrays.iter().find(|a| a.len() != len) {
            return Err(EvalError::ShapeMismatch(format!(
                "inputs of length {len} and {}",
                bad.len()
            )));
        }
        let mut rows = vec![Vec::with_capacity(arrays.len()); len];
        for array in arrays {
            for (row, v) in rows.iter_mut().zip(array) {
                row.push(v);
            }
        }
        Ok(rows)
    }

    /// Applies a lambda, returning one value per declared result.
    fn apply_lambda(
        &self,
        lam: &Lambda,
        args: Vec<Value>,
        env: &Env,
    ) -> Result<Vec<Value>, EvalError> {
        if lam.params.len() != args.len() {
            return Err(EvalError::ArityMismatch {
                expected: lam.params.len(),
                got: args.len(),
            });
        }
        let env = env.extend_many(lam.params.iter().map(|p| p.name).zip(args));
        self.eval(&lam.body, &env)?
            .into_results(lam.ret_types.len())
    }
}

fn bind_pattern(env: &Env, pat: &Pattern, v: Value) -> Result<Env, EvalError> {
    let vals = v.into_results(pat.len())?;
    Ok(env.extend_many(pat.names().zip(vals)))
}

fn checked_index(i: i64, len: usize) -> Result<usize, EvalError> {
    usize::try_from(i)
        .ok()
        .filter(|&i| i < len)
        .ok_or(EvalError::IndexOutOfBounds { index: i, len })
}

fn update_at(arr: Value, idxs: &[i64], v: Value) -> Result<Value, EvalError> {
    let Some((&first, rest)) = idxs.split_first() else {
        return Ok(v);
    };
    let mut rows = arr.into_array()?;
    let slot = checked_index(first, rows.len())?;
    let old = std::mem::replace(&mut rows[slot], Value::Bool(false));
    rows[slot] = update_at(old, rest, v)?;
    Ok(Value::Array(rows))
}

fn transpose(v: Value) -> Result<Value, EvalError> {
    let rows = v
        .into_array()?
        .into_iter()
        .map(Value::into_array)
        .collect::<Result<Vec<_>, _>>()?;
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != width) {
        return Err(EvalError::ShapeMismatch("ragged array in transpose".to_string()));
    }
    let mut cols = vec![Vec::with_capacity(rows.len()); width];
    for row in rows {
        for (col, x) in cols.iter_mut().zip(row) {
            col.push(x);
        }
    }
    Ok(Value::Array(cols.into_iter().map(Value::Array).collect()))
}

fn eval_binop(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    use Value::{Bool, Int, Real};
    Ok(match (op, a, b) {
        (BinOp::Plus, Int(x), Int(y)) => Int(x.wrapping_add(*y)),
        (BinOp::Minus, Int(x), Int(y)) => Int(x.wrapping_sub(*y)),
        (BinOp::Times, Int(x), Int(y)) => Int(x.wrapping_mul(*y)),
        (BinOp::Divide | BinOp::Mod, Int(_), Int(0)) => return Err(EvalError::DivisionByZero),
        (BinOp::Divide, Int(x), Int(y)) => Int(x.wrapping_div(*y)),
        (BinOp::Mod, Int(x), Int(y)) => Int(x.wrapping_rem(*y)),
        (BinOp::Min, Int(x), Int(y)) => Int(*x.min(y)),
        (BinOp::Max, Int(x), Int(y)) => Int(*x.max(y)),

        (BinOp::Plus, Real(x), Real(y)) => Real(x + y),
        (BinOp::Minus, Real(x), Real(y)) => Real(x - y),
        (BinOp::Times, Real(x), Real(y)) => Real(x * y),
        (BinOp::Divide, Real(x), Real(y)) => Real(x / y),
        (BinOp::Mod, Real(x), Real(y)) => Real(x % y),
        (BinOp::Min, Real(x), Real(y)) => Real(x.min(*y)),
        (BinOp::Max, Real(x), Real(y)) => Real(x.max(*y)),

        (BinOp::LogAnd, Bool(x), Bool(y)) => Bool(*x && *y),
        (BinOp::LogOr, Bool(x), Bool(y)) => Bool(*x || *y),

        (BinOp::Equal, x, y) => Bool(x == y),
        (BinOp::NotEqual, x, y) => Bool(x != y),
        (BinOp::Less | BinOp::Leq | BinOp::Greater | BinOp::Geq, x, y) => {
            let ord = match (x, y) {
                (Int(x), Int(y)) => x.partial_cmp(y),
                (Real(x), Real(y)) => x.partial_cmp(y),
                (Value::Char(x), Value::Char(y)) => x.partial_cmp(y),
                (Bool(x), Bool(y)) => x.partial_cmp(y),
                _ => None,
            };
            let Some(ord) = ord else {
                return Err(EvalError::TypeError {
                    expected: "comparable scalars".to_string(),
                    got: format!("{} and {}", x.kind(), y.kind()),
                });
            };
            Bool(match op {
                BinOp::Less => ord.is_lt(),
                BinOp::Leq => ord.is_le(),
                BinOp::Greater => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }

        (op, x, y) => {
            return Err(EvalError::TypeError {
                expected: format!("operands for {op}"),
                got: format!("{} and {}", x.kind(), y.kind()),
            })
        }
    })
}
