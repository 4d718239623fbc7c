//! The combinator model.
//!
//! A [`Soac`] is the classified form of one of the five SOAC expressions.
//! Its arguments are [`Input`]s instead of arbitrary expressions, which is
//! what lets the fusion analysis see which arrays a SOAC reads wholesale.
//! Classification is pure; nothing here touches fusion state.

use std::fmt;

use smallvec::SmallVec;
use sofa_ir::rename::freshen_lambda;
use sofa_ir::{Certificates, Exp, Ident, Lambda, NameSource, VName};
use sofa_span::Span;

use crate::error::{FusionError, FusionResult};

/// An array argument of a SOAC.
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    /// A whole array variable.
    Var(Ident),
    /// A row of an array: `a[i, ...]`.
    Index(Ident, Vec<Exp>),
    /// The transposition of an array variable.
    Transpose(Ident),
    /// `iota(n)`.
    Iota(Exp),
}

impl Input {
    /// Classifies a SOAC argument, or `None` if it is not a valid input.
    #[must_use]
    pub fn classify(exp: &Exp) -> Option<Self> {
        match exp {
            Exp::Var(id, _) if id.is_array() => Some(Self::Var(id.clone())),
            Exp::Index(arr, idxs, _) => Some(Self::Index(arr.clone(), idxs.clone())),
            Exp::Transpose(inner, _) => match inner.as_ref() {
                Exp::Var(id, _) if id.ty.rank() >= 2 => Some(Self::Transpose(id.clone())),
                _ => None,
            },
            Exp::Iota(n, _) => Some(Self::Iota(n.as_ref().clone())),
            _ => None,
        }
    }

    /// The variable underlying a plain or transposed input.
    #[must_use]
    pub fn var_name(&self) -> Option<VName> {
        match self {
            Self::Var(id) | Self::Transpose(id) => Some(id.name),
            Self::Index(..) | Self::Iota(_) => None,
        }
    }

    /// The variable, if this input reads it as a whole array.
    #[must_use]
    pub fn whole_var(&self) -> Option<&Ident> {
        match self {
            Self::Var(id) => Some(id),
            _ => None,
        }
    }

    /// Whether two inputs certainly read the same array in the same way.
    ///
    /// Only plain and transposed variables are compared; indexed inputs and
    /// ranges are never considered equal.
    #[must_use]
    pub fn same_source(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Var(a), Self::Var(b)) | (Self::Transpose(a), Self::Transpose(b)) => {
                a.name == b.name
            }
            _ => false,
        }
    }

    /// Turns the input back into an expression.
    #[must_use]
    pub fn into_exp(self, span: Span) -> Exp {
        match self {
            Self::Var(id) => Exp::Var(id, span),
            Self::Index(arr, idxs) => Exp::Index(arr, idxs, span),
            Self::Transpose(id) => Exp::Transpose(Box::new(Exp::Var(id, span)), span),
            Self::Iota(n) => Exp::Iota(Box::new(n), span),
        }
    }
}

/// Classifies an expression as a SOAC. See [`Soac::classify`].
pub fn classify(exp: &Exp) -> FusionResult<Option<Soac>> {
    Soac::classify(exp)
}

/// The kind of a SOAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SoacKind {
    /// `map`
    Map,
    /// `reduce`
    Reduce,
    /// `scan`
    Scan,
    /// `filter`
    Filter,
    /// `redomap`
    Redomap,
}

impl fmt::Display for SoacKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Map => "map",
            Self::Reduce => "reduce",
            Self::Scan => "scan",
            Self::Filter => "filter",
            Self::Redomap => "redomap",
        })
    }
}

/// The operation of a SOAC, with its kind-specific parts.
#[derive(Clone, Debug, PartialEq)]
pub enum SoacOp {
    /// `map(lam, ...)`
    Map(Lambda),
    /// `reduce(lam, neutral, ...)`
    Reduce(Lambda, Vec<Exp>),
    /// `scan(lam, neutral, ...)`
    Scan(Lambda, Vec<Exp>),
    /// `filter(pred, ...)`
    Filter(Lambda),
    /// `redomap(outer, inner, neutral, ...)`
    Redomap {
        /// Combines partial results.
        outer: Lambda,
        /// Folds one element into the accumulator.
        inner: Lambda,
        /// Initial accumulator.
        neutral: Vec<Exp>,
    },
}

/// A classified SOAC.
#[derive(Clone, Debug, PartialEq)]
pub struct Soac {
    /// The operation.
    pub op: SoacOp,
    /// The array arguments.
    pub inputs: Vec<Input>,
    /// Certificates, carried through untouched.
    pub certs: Certificates,
    /// Source location of the call.
    pub span: Span,
}

impl Soac {
    /// Classifies an expression.
    ///
    /// Returns `Ok(None)` for anything that is not a SOAC, and an
    /// [`FusionError::InvalidArrayInput`] for a SOAC with an argument that
    /// is not an [`Input`].
    pub fn classify(exp: &Exp) -> FusionResult<Option<Self>> {
        let (op, arrs, certs, span) = match exp {
            Exp::Map(lam, arrs, certs, span) => (SoacOp::Map(lam.clone()), arrs, certs, *span),
            Exp::Reduce(lam, nes, arrs, certs, span) => {
                (SoacOp::Reduce(lam.clone(), nes.clone()), arrs, certs, *span)
            }
            Exp::Scan(lam, nes, arrs, certs, span) => {
                (SoacOp::Scan(lam.clone(), nes.clone()), arrs, certs, *span)
            }
            Exp::Filter(lam, arrs, certs, span) => {
                (SoacOp::Filter(lam.clone()), arrs, certs, *span)
            }
            Exp::Redomap(outer, inner, nes, arrs, certs, span) => (
                SoacOp::Redomap {
                    outer: outer.clone(),
                    inner: inner.clone(),
                    neutral: nes.clone(),
                },
                arrs,
                certs,
                *span,
            ),
            _ => return Ok(None),
        };
        let inputs = arrs
            .iter()
            .map(|a| {
                Input::classify(a).ok_or_else(|| FusionError::InvalidArrayInput {
                    span: a.span().merge(span),
                    message: format!("`{a}` is not an array variable, row, transposition or range"),
                })
            })
            .collect::<FusionResult<Vec<_>>>()?;
        Ok(Some(Self {
            op,
            inputs,
            certs: certs.clone(),
            span,
        }))
    }

    /// The kind.
    #[must_use]
    pub fn kind(&self) -> SoacKind {
        match self.op {
            SoacOp::Map(_) => SoacKind::Map,
            SoacOp::Reduce(..) => SoacKind::Reduce,
            SoacOp::Scan(..) => SoacKind::Scan,
            SoacOp::Filter(_) => SoacKind::Filter,
            SoacOp::Redomap { .. } => SoacKind::Redomap,
        }
    }

    /// The lambda applied per element; the inner lambda of a redomap.
    #[must_use]
    pub fn lambda(&self) -> &Lambda {
        match &self.op {
            SoacOp::Map(lam) | SoacOp::Filter(lam) | SoacOp::Reduce(lam, _) | SoacOp::Scan(lam, _) => {
                lam
            }
            SoacOp::Redomap { inner, .. } => inner,
        }
    }

    /// Every lambda of the SOAC.
    #[must_use]
    pub fn lambdas(&self) -> SmallVec<[&Lambda; 2]> {
        match &self.op {
            SoacOp::Redomap { outer, inner, .. } => SmallVec::from_buf([outer, inner]),
            _ => SmallVec::from_elem(self.lambda(), 1),
        }
    }

    /// The neutral elements; empty for `map` and `filter`.
    #[must_use]
    pub fn neutral(&self) -> &[Exp] {
        match &self.op {
            SoacOp::Reduce(_, nes) | SoacOp::Scan(_, nes) => nes,
            SoacOp::Redomap { neutral, .. } => neutral,
            SoacOp::Map(_) | SoacOp::Filter(_) => &[],
        }
    }

    /// The number of values the SOAC returns.
    #[must_use]
    pub fn arity(&self) -> usize {
        match &self.op {
            SoacOp::Map(lam) => lam.ret_types.len(),
            SoacOp::Filter(_) => self.inputs.len(),
            SoacOp::Reduce(..) | SoacOp::Scan(..) | SoacOp::Redomap { .. } => self.neutral().len(),
        }
    }

    /// Names of the variables read through plain or transposed inputs.
    #[must_use]
    pub fn input_names(&self) -> SmallVec<[VName; 4]> {
        self.inputs.iter().filter_map(Input::var_name).collect()
    }

    /// Names read as whole arrays.
    #[must_use]
    pub fn whole_inputs(&self) -> SmallVec<[VName; 4]> {
        self.inputs
            .iter()
            .filter_map(|i| i.whole_var().map(|id| id.name))
            .collect()
    }

    /// Every variable the inputs read: plain, transposed and indexed arrays,
    /// and the free variables of index and range expressions.
    #[must_use]
    pub fn input_reads(&self) -> Vec<VName> {
        let mut reads = Vec::new();
        for input in &self.inputs {
            match input {
                Input::Var(id) | Input::Transpose(id) => reads.push(id.name),
                Input::Index(id, idxs) => {
                    reads.push(id.name);
                    reads.extend(idxs.iter().flat_map(Exp::free_vars).map(|v| v.name));
                }
                Input::Iota(n) => reads.extend(n.free_vars().into_iter().map(|v| v.name)),
            }
        }
        reads
    }

    /// Names free in any of the SOAC's lambdas.
    #[must_use]
    pub fn lambda_free_vars(&self) -> Vec<Ident> {
        let mut free: Vec<Ident> = Vec::new();
        for lam in self.lambdas() {
            for id in lam.free_vars() {
                if !free.iter().any(|f| f.name == id.name) {
                    free.push(id);
                }
            }
        }
        free
    }

    /// Rewrites a `reduce` into the equivalent `redomap` whose inner and
    /// outer lambda are both the reduction operator. The outer copy gets
    /// fresh binders from `names`. Other kinds are returned unchanged.
    #[must_use]
    pub fn into_redomap(self, names: &mut NameSource) -> Self {
        match self.op {
            SoacOp::Reduce(lam, neutral) => Self {
                op: SoacOp::Redomap {
                    outer: freshen_lambda(lam.clone(), names),
                    inner: lam,
                    neutral,
                },
                ..self
            },
            op => Self { op, ..self },
        }
    }

    /// Turns the SOAC back into an expression.
    #[must_use]
    pub fn into_exp(self) -> Exp {
        let span = self.span;
        let arrs = self.inputs.into_iter().map(|i| i.into_exp(span)).collect();
        match self.op {
            SoacOp::Map(lam) => Exp::Map(lam, arrs, self.certs, span),
            SoacOp::Reduce(lam, nes) => Exp::Reduce(lam, nes, arrs, self.certs, span),
            SoacOp::Scan(lam, nes) => Exp::Scan(lam, nes, arrs, self.certs, span),
            SoacOp::Filter(lam) => Exp::Filter(lam, arrs, self.certs, span),
            SoacOp::Redomap {
                outer,
                inner,
                neutral,
            } => Exp::Redomap(outer, inner, neutral, arrs, self.certs, span),
        }
    }
}
