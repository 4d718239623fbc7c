//! The greedy gather pass.
//!
//! Walks a function body bottom-up. For `let pat = e in body`, `body` is
//! gathered first so every kernel that could consume `pat` is known when
//! `e` is looked at. A SOAC binding is then either fused into all the
//! kernels consuming its outputs, or registered as a kernel of its own.

use smallvec::SmallVec;
use sofa_ir::rename::freshen_lambda;
use sofa_ir::{Exp, FunDef, Ident, Lambda, NameSource, Pattern, Type, VName};
use sofa_span::Span;
use tracing::{debug, trace};

use crate::compose::{self, Producer};
use crate::config::FusionConfig;
use crate::error::{FusionError, FusionResult};
use crate::kernel::{Kernel, KernelId};
use crate::report::{BlockReason, FusionDecision};
use crate::rewrite;
use crate::soac::{Input, Soac, SoacOp};
use crate::state::FusionState;

/// Per-function context threaded through both phases.
pub(crate) struct FusionCtx<'c> {
    pub config: &'c FusionConfig,
    pub names: NameSource,
    next_kernel: u32,
    pub decisions: Vec<FusionDecision>,
}

impl<'c> FusionCtx<'c> {
    pub fn new(config: &'c FusionConfig, names: NameSource) -> Self {
        Self {
            config,
            names,
            next_kernel: 0,
            decisions: Vec::new(),
        }
    }

    fn fresh_kernel_id(&mut self) -> KernelId {
        let id = KernelId::new(self.next_kernel);
        self.next_kernel += 1;
        id
    }
}

/// Where a SOAC handed to [`greedy_fuse`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    /// A SOAC binding in the program.
    Binding,
    /// A map standing in for `replicate(n, v)`. The replicate is cheap to
    /// recompute, so it may fuse even when its output is used elsewhere,
    /// and it never becomes a kernel of its own.
    Replicate,
}

/// Gathers a whole function and cleans the result.
pub(crate) fn gather_fun(ctx: &mut FusionCtx<'_>, fun: &FunDef) -> FusionResult<FusionState> {
    let state = gather_exp(ctx, &fun.body, FusionState::new())?;
    state.clean(fun.span)
}

fn gather_all<'e>(
    ctx: &mut FusionCtx<'_>,
    exps: impl DoubleEndedIterator<Item = &'e Exp>,
    state: FusionState,
) -> FusionResult<FusionState> {
    exps.rev()
        .try_fold(state, |state, e| gather_exp(ctx, e, state))
}

/// Gathers a scoped region from an empty state.
fn gather_region(ctx: &mut FusionCtx<'_>, exp: &Exp) -> FusionResult<FusionState> {
    gather_exp(ctx, exp, FusionState::new())
}

fn gather_exp(ctx: &mut FusionCtx<'_>, exp: &Exp, state: FusionState) -> FusionResult<FusionState> {
    match exp {
        Exp::LetPat(pat, rhs, body, _) => {
            let state = gather_exp(ctx, body, state)?;
            gather_binding(ctx, pat, rhs, state)
        }

        Exp::LetWith {
            dest,
            src,
            idxs,
            value,
            body,
            ..
        } => {
            let state = gather_exp(ctx, body, state)?
                .with_update(src.name)
                .with_unfusable([src.name, dest.name]);
            let state = gather_exp(ctx, value, state)?;
            gather_all(ctx, idxs.iter(), state)
        }

        Exp::If(cond, then_e, else_e, _, _) => {
            let then_state = gather_region(ctx, then_e)?;
            let else_state = gather_region(ctx, else_e)?;
            let branches = FusionState::union_branches(then_state, else_state);
            let state = state.merge_region(branches, []);
            gather_exp(ctx, cond, state)
        }

        Exp::DoLoop {
            init,
            bound,
            body,
            rest,
            ..
        } => {
            let state = gather_exp(ctx, rest, state)?;
            let region = gather_region(ctx, body)?;
            let escaping: Vec<VName> = region.consumers.keys().copied().collect();
            let state = state.merge_region(region, escaping);
            let state = gather_exp(ctx, bound, state)?;
            gather_all(ctx, init.iter(), state)
        }

        Exp::Map(..) | Exp::Reduce(..) | Exp::Scan(..) | Exp::Filter(..) | Exp::Redomap(..) => {
            Err(FusionError::normalization(
                exp.span(),
                "array combinator outside the right-hand side of a let",
            ))
        }

        Exp::Var(id, _) if id.is_array() => Ok(state.with_unfusable([id.name])),
        Exp::Literal(..) | Exp::Var(..) => Ok(state),

        Exp::Index(arr, idxs, _) => {
            let state = state.with_unfusable([arr.name]);
            gather_all(ctx, idxs.iter(), state)
        }

        Exp::TupLit(es, _) | Exp::ArrayLit(es, _, _) | Exp::Apply(_, es, _, _) => {
            gather_all(ctx, es.iter(), state)
        }
        Exp::BinOp(_, a, b, _, _) | Exp::Replicate(a, b, _) => {
            gather_all(ctx, [a.as_ref(), b.as_ref()].into_iter(), state)
        }
        Exp::Not(e, _)
        | Exp::Negate(e, _)
        | Exp::Iota(e, _)
        | Exp::Size(e, _)
        | Exp::Transpose(e, _) => gather_exp(ctx, e, state),
    }
}

fn gather_binding(
    ctx: &mut FusionCtx<'_>,
    pat: &Pattern,
    rhs: &Exp,
    state: FusionState,
) -> FusionResult<FusionState> {
    if let Some(soac) = Soac::classify(rhs)? {
        return gather_soac_binding(ctx, pat, soac, state);
    }
    if let Exp::Replicate(n, v, span) = rhs {
        if let Some(soac) = replicate_as_map(ctx, pat, n, v, *span) {
            let state = greedy_fuse(ctx, pat, soac, Origin::Replicate, state)?;
            return gather_exp(ctx, rhs, state);
        }
    }
    gather_exp(ctx, rhs, state)
}

/// `map(fn i => v, iota(n))` for `x = replicate(n, v)` with a trivial `v`.
fn replicate_as_map(
    ctx: &mut FusionCtx<'_>,
    pat: &Pattern,
    n: &Exp,
    v: &Exp,
    span: Span,
) -> Option<Soac> {
    if !ctx.config.replicate_fusion || pat.len() != 1 {
        return None;
    }
    if !matches!(v, Exp::Var(..) | Exp::Literal(..)) {
        return None;
    }
    let elem = pat.idents[0].ty.row_type()?.clone();
    let i = ctx.names.ident("i", Type::Int);
    Some(Soac {
        op: SoacOp::Map(Lambda::new(vec![i], v.clone(), vec![elem])),
        inputs: vec![Input::Iota(n.clone())],
        certs: sofa_ir::Certificates::none(),
        span,
    })
}

fn gather_soac_binding(
    ctx: &mut FusionCtx<'_>,
    pat: &Pattern,
    soac: Soac,
    mut state: FusionState,
) -> FusionResult<FusionState> {
    for lam in soac.lambdas() {
        let region = gather_region(ctx, &lam.body)?;
        let mut escaping: Vec<VName> = region.consumers.keys().copied().collect();
        escaping.extend(
            lam.free_vars()
                .into_iter()
                .filter(Ident::is_array)
                .map(|id| id.name),
        );
        state = state.merge_region(region, escaping);
    }
    if pat.len() != soac.arity() {
        return Err(FusionError::invariant(
            soac.span,
            format!(
                "{} returns {} values but {} are bound",
                soac.kind(),
                soac.arity(),
                pat.len()
            ),
        ));
    }

    let args = soac.inputs.iter().flat_map(|i| match i {
        Input::Index(_, idxs) => idxs.iter().collect::<SmallVec<[&Exp; 2]>>(),
        Input::Iota(n) => SmallVec::from_elem(n, 1),
        Input::Var(_) | Input::Transpose(_) => SmallVec::new(),
    });
    let side: Vec<&Exp> = soac.neutral().iter().chain(args).collect();
    state = gather_all(ctx, side.into_iter(), state)?;

    greedy_fuse(ctx, pat, soac, Origin::Binding, state)
}

/// Decides whether `soac` fuses into the kernels consuming its outputs.
///
/// Returns the updated candidate kernels, or why fusion was blocked.
fn decide(
    ctx: &mut FusionCtx<'_>,
    pat: &Pattern,
    soac: &Soac,
    origin: Origin,
    state: &FusionState,
) -> FusionResult<Result<Vec<Kernel>, BlockReason>> {
    let outs: Vec<VName> = pat.names().collect();
    if origin == Origin::Binding && outs.iter().any(|o| state.is_unfusable(*o)) {
        return Ok(Err(BlockReason::Unfusable));
    }

    let candidates = state.candidates(&outs);
    if candidates.is_empty() {
        return Ok(Err(BlockReason::NoConsumers));
    }
    let kernels = candidates
        .iter()
        .map(|id| state.kernel(*id, soac.span))
        .collect::<FusionResult<Vec<&Kernel>>>()?;

    if !kernels
        .iter()
        .all(|k| compose::compatible(soac, &outs, k, ctx.config))
    {
        return Ok(Err(BlockReason::IncompatibleKind));
    }

    let mut used = soac.input_reads();
    used.extend(soac.neutral().iter().flat_map(Exp::free_vars).map(|v| v.name));
    used.extend(soac.lambda_free_vars().into_iter().map(|id| id.name));
    if kernels
        .iter()
        .any(|k| used.iter().any(|n| k.inplace.contains(n)))
    {
        return Ok(Err(BlockReason::InPlaceHazard));
    }

    let mut fused = Vec::with_capacity(kernels.len());
    for (i, kernel) in kernels.into_iter().enumerate() {
        // Each copy of the producer after the first gets fresh binders so
        // names stay unique within the function.
        let producer_soac = if i == 0 {
            soac.clone()
        } else {
            freshen_soac(ctx, soac, state)?
        };
        let producer = Producer {
            soac: producer_soac,
            outputs: pat.idents.clone(),
        };
        match compose::fuse_into(&mut ctx.names, &producer, kernel)? {
            Some(k) => fused.push(k),
            None => return Ok(Err(BlockReason::CompositionDeclined)),
        }
    }
    Ok(Ok(fused))
}

/// A copy of `soac` whose lambdas are rewritten against `state` and then
/// alpha-renamed.
fn freshen_soac(ctx: &mut FusionCtx<'_>, soac: &Soac, state: &FusionState) -> FusionResult<Soac> {
    let mut fresh = |lam: &Lambda| -> FusionResult<Lambda> {
        let lam = rewrite::rewrite_lambda(state, lam.clone())?;
        Ok(freshen_lambda(lam, &mut ctx.names))
    };
    let op = match &soac.op {
        SoacOp::Map(lam) => SoacOp::Map(fresh(lam)?),
        SoacOp::Filter(lam) => SoacOp::Filter(fresh(lam)?),
        SoacOp::Reduce(lam, nes) => SoacOp::Reduce(fresh(lam)?, nes.clone()),
        SoacOp::Scan(lam, nes) => SoacOp::Scan(fresh(lam)?, nes.clone()),
        SoacOp::Redomap {
            outer,
            inner,
            neutral,
        } => SoacOp::Redomap {
            outer: fresh(outer)?,
            inner: fresh(inner)?,
            neutral: neutral.clone(),
        },
    };
    Ok(Soac {
        op,
        ..soac.clone()
    })
}

/// Fuses `soac`, bound to `pat`, into its consumers if it can, and
/// registers it as a kernel otherwise.
fn greedy_fuse(
    ctx: &mut FusionCtx<'_>,
    pat: &Pattern,
    soac: Soac,
    origin: Origin,
    mut state: FusionState,
) -> FusionResult<FusionState> {
    let outs: Vec<VName> = pat.names().collect();
    let kind = soac.kind();

    match decide(ctx, pat, &soac, origin, &state)? {
        Ok(fused) => {
            let into: Vec<KernelId> = fused.iter().map(|k| k.id).collect();
            for out in &outs {
                // Every consumer was fused into, so the binding is dead
                // unless a replicate's output is still used elsewhere.
                state.consumers.remove(out);
                if origin == Origin::Binding || !state.is_unfusable(*out) {
                    state.producers.insert(*out, into[0]);
                }
            }
            for kernel in fused {
                state.kernels.insert(kernel.id, kernel);
            }
            state.succeeded = true;
            state = record_inputs(state, &soac, &into);
            debug!(
                producer = ?outs,
                %kind,
                into = ?into,
                "fused"
            );
            ctx.decisions.push(FusionDecision::Fused {
                producer: outs,
                kind,
                into,
            });
        }
        Err(reason) => {
            debug!(outputs = ?outs, %kind, %reason, "not fused");
            if origin == Origin::Replicate {
                ctx.decisions.push(FusionDecision::Standalone {
                    outputs: outs,
                    kind,
                    kernel: None,
                    reason,
                });
                return Ok(state);
            }
            let id = ctx.fresh_kernel_id();
            let mut kernel = Kernel::new(id, soac, pat);
            if ctx.config.transpose_pull {
                kernel = kernel.pull_transposes(&mut ctx.names);
            }
            for out in &outs {
                state.producers.insert(*out, id);
            }
            state = record_inputs(state, &kernel.soac, &[id]);
            trace!(kernel = %id, pulled = !kernel.transforms.is_empty(), "registered kernel");
            state.kernels.insert(id, kernel);
            ctx.decisions.push(FusionDecision::Standalone {
                outputs: outs,
                kind,
                kernel: Some(id),
                reason,
            });
        }
    }
    Ok(state)
}

/// Registers `kernels` as the consumers of the inputs of `soac`.
///
/// An array that some other kernel already reads whole becomes unfusable:
/// fusing its producer into both would compute it twice. Transposed and
/// indexed inputs are never fused through.
fn record_inputs(mut state: FusionState, soac: &Soac, kernels: &[KernelId]) -> FusionState {
    let mut unfusable: SmallVec<[VName; 4]> = SmallVec::new();
    for input in &soac.inputs {
        match input {
            Input::Var(id) => {
                let consumers = state.consumers.entry(id.name).or_default();
                if consumers.iter().any(|k| !kernels.contains(k)) {
                    unfusable.push(id.name);
                }
                consumers.extend(kernels.iter().copied());
            }
            Input::Transpose(id) | Input::Index(id, _) => unfusable.push(id.name),
            Input::Iota(_) => {}
        }
    }
    state.with_unfusable(unfusable)
}
