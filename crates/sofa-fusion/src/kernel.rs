//! Kernels: the units of fusion progress.

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashSet;
use sofa_ir::{Exp, Ident, NameSource, Pattern, VName};
use sofa_span::Span;

use crate::error::{FusionError, FusionResult};
use crate::soac::{Input, Soac, SoacOp};

/// Identifies a kernel within one run of the pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelId(u32);

impl KernelId {
    /// Creates a kernel id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Post-processing of a kernel output, re-applied after the kernel is
/// emitted so downstream code sees the value it expects.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputTransform {
    /// `to = transpose(from)`.
    Transpose {
        /// The kernel output.
        from: Ident,
        /// The name downstream code uses.
        to: Ident,
    },
}

impl OutputTransform {
    /// Wraps `body` in the binding that applies this transform.
    #[must_use]
    pub fn bind(&self, body: Exp) -> Exp {
        match self {
            Self::Transpose { from, to } => Exp::let_pat(
                Pattern::single(to.clone()),
                Exp::Transpose(Box::new(Exp::var(from)), Span::DUMMY),
                body,
            ),
        }
    }
}

/// A SOAC together with everything fused into it so far.
#[derive(Clone, Debug)]
pub struct Kernel {
    /// Identity.
    pub id: KernelId,
    /// The current, possibly composed, SOAC.
    pub soac: Soac,
    /// Identifiers the SOAC's results are bound to.
    pub outputs: Vec<Ident>,
    /// The binding this kernel was created from. Emitting the kernel
    /// replaces that binding.
    pub pattern: Vec<Ident>,
    /// Transforms from `outputs` to the names in `pattern`.
    pub transforms: VecDeque<OutputTransform>,
    /// Producer outputs absorbed into this kernel.
    pub fused: Vec<VName>,
    /// Arrays updated in place somewhere between the producers that could
    /// still fuse into this kernel and the kernel itself.
    pub inplace: FxHashSet<VName>,
}

impl Kernel {
    /// A fresh kernel for the binding `pat = soac`.
    #[must_use]
    pub fn new(id: KernelId, soac: Soac, pat: &Pattern) -> Self {
        Self {
            id,
            soac,
            outputs: pat.idents.clone(),
            pattern: pat.idents.clone(),
            transforms: VecDeque::new(),
            fused: Vec::new(),
            inplace: FxHashSet::default(),
        }
    }

    /// Whether anything has been fused into this kernel.
    #[must_use]
    pub fn is_fused(&self) -> bool {
        !self.fused.is_empty()
    }

    /// Whether the kernel was created from a binding of exactly `names`.
    #[must_use]
    pub fn binds(&self, names: &[VName]) -> bool {
        self.pattern.len() == names.len()
            && self.pattern.iter().zip(names).all(|(p, n)| p.name == *n)
    }

    /// Checks that the output identifiers match the SOAC's arity.
    pub fn check_arity(&self) -> FusionResult<()> {
        if self.outputs.len() == self.soac.arity() {
            Ok(())
        } else {
            Err(FusionError::invariant(
                self.soac.span,
                format!(
                    "kernel {} binds {} outputs but its {} returns {}",
                    self.id,
                    self.outputs.len(),
                    self.soac.kind(),
                    self.soac.arity()
                ),
            ))
        }
    }

    /// Normalizes a map over transposed arrays.
    ///
    /// A kernel
    ///
    /// ```text
    /// let z = map(fn c => let r = map(g, c) in r, transpose(y))
    /// ```
    ///
    /// computes `transpose(map(fn c => map(g, c), y))`, so it is rewritten
    /// to read `y` directly into a fresh `z'`, with `z = transpose(z')`
    /// queued as an output transform. A producer of `y` can then fuse into
    /// it. Kernels of any other shape are returned unchanged.
    #[must_use]
    pub fn pull_transposes(self, names: &mut NameSource) -> Self {
        if !self.transforms.is_empty() || self.soac.inputs.is_empty() {
            return self;
        }
        let Some(arrays) = self
            .soac
            .inputs
            .iter()
            .map(|i| match i {
                Input::Transpose(id) => Some(id.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
        else {
            return self;
        };
        let SoacOp::Map(lam) = &self.soac.op else {
            return self;
        };
        let Exp::LetPat(inner_pat, rhs, result, _) = lam.body.as_ref() else {
            return self;
        };
        let Exp::Map(inner, args, inner_certs, inner_span) = rhs.as_ref() else {
            return self;
        };

        // The nest must be perfect: the inner map reads exactly the rows, in
        // order, and its results are the lambda's results.
        let reads_rows = args.len() == lam.params.len()
            && args
                .iter()
                .zip(&lam.params)
                .all(|(a, p)| matches!(a, Exp::Var(id, _) if id.name == p.name));
        let returns_results = returns_exactly(result, &inner_pat.idents);
        let row_free = !inner
            .free_vars()
            .iter()
            .any(|fv| lam.params.iter().any(|p| p.name == fv.name));
        if !reads_rows || !returns_results || !row_free || arrays.len() != lam.params.len() {
            return self;
        }

        let rows: Vec<Ident> = lam.params.iter().map(|p| names.fresh_ident(p)).collect();
        let inner_outs: Vec<Ident> = inner_pat
            .idents
            .iter()
            .map(|r| names.fresh_ident(r))
            .collect();
        let body = Exp::let_pat(
            Pattern::new(inner_outs.clone()),
            Exp::Map(
                inner.clone(),
                rows.iter().map(Exp::var).collect(),
                inner_certs.clone(),
                *inner_span,
            ),
            Exp::results(inner_outs.iter().map(Exp::var).collect()),
        );
        let lam = sofa_ir::Lambda::new(rows, body, lam.ret_types.clone());
        let outputs: Vec<Ident> = self.outputs.iter().map(|z| names.fresh_ident(z)).collect();
        let transforms = outputs
            .iter()
            .zip(&self.outputs)
            .map(|(from, to)| OutputTransform::Transpose {
                from: from.clone(),
                to: to.clone(),
            })
            .collect();
        Self {
            soac: Soac {
                op: SoacOp::Map(lam),
                inputs: arrays.into_iter().map(Input::Var).collect(),
                ..self.soac
            },
            outputs,
            transforms,
            ..self
        }
    }
}

/// Whether `exp` is just the variables `idents`, as a single variable or a
/// tuple of them.
fn returns_exactly(exp: &Exp, idents: &[Ident]) -> bool {
    let is = |e: &Exp, id: &Ident| matches!(e, Exp::Var(v, _) if v.name == id.name);
    match (exp, idents) {
        (e, [id]) => is(e, id),
        (Exp::TupLit(es, _), ids) => {
            es.len() == ids.len() && es.iter().zip(ids).all(|(e, id)| is(e, id))
        }
        _ => false,
    }
}
