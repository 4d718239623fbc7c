//! # Sofa Fusion
//!
//! Producer/consumer fusion of second-order array combinators.
//!
//! ## Overview
//!
//! Given a binding `ys = map(f, xs)` whose only use is as the input of a
//! later `zs = map(g, ys)`, the pass replaces both with a single
//! `zs = map(g . f, xs)`, so `ys` is never materialized. The same works for
//! a map feeding a reduction, a filter feeding a reduction, and a filter
//! feeding another filter.
//!
//! ## Pipeline
//!
//! ```text
//! FunDef ──▶ gather ──▶ FusionState ──▶ clean ──▶ rewrite ──▶ FunDef
//!            (bottom-up,                (drop     (forward,
//!             greedy)                    unfused)  one pass)
//! ```
//!
//! Gathering decides, per SOAC binding, whether it fuses into the kernels
//! that consume it. Rewriting then emits each kernel that absorbed
//! something at the binding it was created from and drops the bindings
//! fused into it.
//!
//! ## Guarantees
//!
//! - The fused program computes the same values as the original
//! - No producer lambda runs more often per element than before
//! - A function where nothing fused is returned unchanged
//!
//! Errors abort fusion of the offending function only; [`fuse_program`]
//! keeps that function as it was and reports why.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod compose;
pub mod config;
pub mod error;
mod gather;
pub mod kernel;
pub mod report;
mod rewrite;
pub mod soac;
pub mod state;

pub use config::{FusionConfig, OptLevel};
pub use error::{FusionError, FusionResult};
pub use report::{BlockReason, FunctionReport, FusionDecision, FusionReport};

use rayon::prelude::*;
use sofa_ir::{FunDef, NameSource, Program};
use tracing::{debug, info, instrument, warn};

use gather::FusionCtx;

/// The result of fusing one function.
#[derive(Clone, Debug)]
pub struct FusedFun {
    /// The function, rewritten if anything fused.
    pub fun: FunDef,
    /// Whether the body changed.
    pub changed: bool,
    /// What was decided.
    pub report: FunctionReport,
}

impl FusedFun {
    fn unchanged(fun: &FunDef, decisions: Vec<FusionDecision>) -> Self {
        Self {
            fun: fun.clone(),
            changed: false,
            report: FunctionReport {
                name: fun.name,
                changed: false,
                kernels: 0,
                decisions,
                error: None,
            },
        }
    }
}

/// Fuses the SOACs of one function.
///
/// # Errors
///
/// Returns an error if the body is not in normal form, a SOAC has an
/// invalid array argument, or the pass breaks one of its own invariants.
#[instrument(skip_all, fields(function = %fun.name))]
pub fn fuse_fun(fun: &FunDef, config: &FusionConfig) -> FusionResult<FusedFun> {
    if !config.enabled {
        return Ok(FusedFun::unchanged(fun, Vec::new()));
    }

    let mut ctx = FusionCtx::new(config, NameSource::for_fun(fun));
    let state = gather::gather_fun(&mut ctx, fun)?;
    let decisions = std::mem::take(&mut ctx.decisions);
    if !state.succeeded() {
        debug!("nothing to fuse");
        return Ok(FusedFun::unchanged(fun, decisions));
    }

    let body = rewrite::rewrite_exp(&state, fun.body.clone())?;
    let kernels = state.fused_kernels().count();
    debug!(kernels, "rewrote function");
    Ok(FusedFun {
        fun: FunDef {
            body,
            ..fun.clone()
        },
        changed: true,
        report: FunctionReport {
            name: fun.name,
            changed: true,
            kernels,
            decisions,
            error: None,
        },
    })
}

/// Fuses every function of a program.
///
/// A function whose fusion fails is kept unchanged and the error is
/// recorded in its report. Functions are processed on the rayon pool when
/// [`FusionConfig::parallel`] is set.
pub fn fuse_program(program: Program, config: &FusionConfig) -> (Program, FusionReport) {
    let run = |fun: FunDef| match fuse_fun(&fun, config) {
        Ok(fused) => (fused.fun, fused.report),
        Err(err) => {
            warn!(function = %fun.name, error = %err, "fusion failed, keeping function unchanged");
            let report = FunctionReport {
                name: fun.name,
                changed: false,
                kernels: 0,
                decisions: Vec::new(),
                error: Some(err),
            };
            (fun, report)
        }
    };

    let results: Vec<(FunDef, FunctionReport)> = if config.parallel {
        program.funs.into_par_iter().map(run).collect()
    } else {
        program.funs.into_iter().map(run).collect()
    };
    let (funs, functions): (Vec<_>, Vec<_>) = results.into_iter().unzip();
    let report = FusionReport { functions };
    info!(
        functions = funs.len(),
        changed = report.changed_count(),
        fused = report.fused_count(),
        failed = report.error_count(),
        "fusion complete"
    );
    (Program { funs }, report)
}
