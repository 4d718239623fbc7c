//! Applies a finished [`FusionState`] to the code it was gathered from.
//!
//! A single forward traversal. For each `let`:
//!
//! - names that no kernel produces: kept, sub-expressions rewritten
//! - the original binding of a fused kernel: replaced by the composed SOAC
//!   bound to the kernel's outputs, followed by its output transforms
//! - names produced by a kernel with a different pattern: fused away, the
//!   binding is dropped

use sofa_ir::visit::{walk_exp, walk_lambda, Mapper};
use sofa_ir::{Exp, Lambda, Pattern, VName};
use sofa_span::Span;

use crate::error::{FusionError, FusionResult};
use crate::kernel::KernelId;
use crate::state::FusionState;

struct Rewriter<'s> {
    state: &'s FusionState,
}

impl Rewriter<'_> {
    /// The kernel producing all of `names`, if any.
    fn kernel_of(&self, names: &[VName], span: Span) -> FusionResult<Option<KernelId>> {
        let mut ids = names.iter().map(|n| self.state.producer_of(*n));
        let Some(first) = ids.next() else {
            return Ok(None);
        };
        if ids.all(|id| id == first) {
            Ok(first)
        } else {
            Err(FusionError::invariant(span, "binding is split across kernels"))
        }
    }
}

impl Mapper for Rewriter<'_> {
    type Error = FusionError;

    fn map_exp(&mut self, exp: Exp) -> FusionResult<Exp> {
        let Exp::LetPat(pat, rhs, body, span) = exp else {
            return walk_exp(self, exp);
        };
        let names: Vec<VName> = pat.names().collect();
        let Some(id) = self.kernel_of(&names, span)? else {
            return walk_exp(self, Exp::LetPat(pat, rhs, body, span));
        };
        let state = self.state;
        let kernel = state.kernel(id, span)?;
        if !kernel.binds(&names) {
            // Fused into a kernel emitted further down.
            return self.map_exp(*body);
        }
        if !kernel.is_fused() {
            return walk_exp(self, Exp::LetPat(pat, rhs, body, span));
        }

        let soac = self.map_exp(kernel.soac.clone().into_exp())?;
        let body = self.map_exp(*body)?;
        let body = kernel
            .transforms
            .iter()
            .rev()
            .fold(body, |body, t| t.bind(body));
        Ok(Exp::LetPat(
            Pattern::new(kernel.outputs.clone()),
            Box::new(soac),
            Box::new(body),
            span,
        ))
    }
}

/// Rewrites an expression against a finished state.
pub(crate) fn rewrite_exp(state: &FusionState, exp: Exp) -> FusionResult<Exp> {
    Rewriter { state }.map_exp(exp)
}

/// Rewrites a lambda against the state gathered so far.
pub(crate) fn rewrite_lambda(state: &FusionState, lam: Lambda) -> FusionResult<Lambda> {
    walk_lambda(&mut Rewriter { state }, lam)
}
