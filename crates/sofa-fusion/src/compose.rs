//! Kernel compatibility and lambda composition.
//!
//! A producer `outs = soac_p` is fused into a consumer kernel by building a
//! single SOAC that computes the consumer's results without materializing
//! `outs`. Three recipes cover the legal kind pairs:
//!
//! - **map into map/redomap**: the producer body is inlined in front of the
//!   consumer body, binding its results to the consumer parameters that
//!   read `outs`
//! - **filter into redomap**: the producer predicate guards the fold step;
//!   rejected elements leave the accumulator unchanged
//! - **filter into filter**: the conjunction of both predicates, computed
//!   with the consumer predicate guarded by the producer predicate
//!
//! A `reduce` consumer is first turned into a `redomap` with equal inner
//! and outer lambdas. `scan` is never fused, neither as producer nor as
//! consumer.

use sofa_ir::{Exp, Ident, Lambda, NameSource, Pattern, Type, VName};
use sofa_span::Span;
use tracing::trace;

use crate::config::FusionConfig;
use crate::error::{FusionError, FusionResult};
use crate::kernel::Kernel;
use crate::soac::{Input, Soac, SoacKind, SoacOp};

/// A SOAC binding about to be fused.
#[derive(Clone, Debug)]
pub(crate) struct Producer {
    pub soac: Soac,
    pub outputs: Vec<Ident>,
}

impl Producer {
    pub fn output_names(&self) -> Vec<VName> {
        self.outputs.iter().map(|o| o.name).collect()
    }
}

/// The position of the producer output that `input` reads whole, if any.
fn link(input: &Input, outs: &[Ident]) -> Option<usize> {
    let v = input.whole_var()?;
    outs.iter().position(|o| o.name == v.name)
}

/// Whether the kind pair and the way `consumer` reads `outs` allow fusion.
pub(crate) fn compatible(
    producer: &Soac,
    outs: &[VName],
    consumer: &Kernel,
    config: &FusionConfig,
) -> bool {
    let inputs = &consumer.soac.inputs;
    let whole = |i: &Input| i.whole_var().is_some_and(|v| outs.contains(&v.name));
    let touches = |i: &Input| i.var_name().is_some_and(|n| outs.contains(&n));
    match (producer.kind(), consumer.soac.kind()) {
        (SoacKind::Map, SoacKind::Map | SoacKind::Reduce | SoacKind::Redomap) => {
            // Every output is read, and only ever as a whole array.
            outs.iter()
                .all(|o| inputs.iter().any(|i| i.whole_var().is_some_and(|v| v.name == *o)))
                && inputs.iter().all(|i| whole(i) || !touches(i))
        }
        (SoacKind::Filter, SoacKind::Filter | SoacKind::Reduce | SoacKind::Redomap) => {
            config.filter_fusion && !inputs.is_empty() && inputs.iter().all(whole)
        }
        (SoacKind::Map, SoacKind::Filter | SoacKind::Scan)
        | (SoacKind::Filter, SoacKind::Map | SoacKind::Scan)
        | (SoacKind::Reduce | SoacKind::Scan | SoacKind::Redomap, _) => false,
    }
}

/// Fuses `producer` into `consumer`.
///
/// Returns `Ok(None)` when the pair cannot be composed, and an error when
/// either side is malformed.
pub(crate) fn fuse_into(
    names: &mut NameSource,
    producer: &Producer,
    consumer: &Kernel,
) -> FusionResult<Option<Kernel>> {
    check_outputs(&producer.soac, producer.outputs.len())?;
    consumer.check_arity()?;

    let consumer_soac = match consumer.soac.kind() {
        SoacKind::Reduce => consumer.soac.clone().into_redomap(names),
        _ => consumer.soac.clone(),
    };
    let p_inputs = &producer.soac.inputs;
    let c_inputs = &consumer_soac.inputs;
    let outs = &producer.outputs;

    let composed = match (&producer.soac.op, &consumer_soac.op) {
        (SoacOp::Map(p), SoacOp::Map(c)) => {
            let (lam, inputs) = compose_maps(names, p, p_inputs, outs, c, 0, c_inputs)?;
            Some((SoacOp::Map(lam), inputs, consumer.outputs.clone()))
        }
        (
            SoacOp::Map(p),
            SoacOp::Redomap {
                outer,
                inner,
                neutral,
            },
        ) => {
            let (lam, inputs) =
                compose_maps(names, p, p_inputs, outs, inner, neutral.len(), c_inputs)?;
            let op = SoacOp::Redomap {
                outer: outer.clone(),
                inner: lam,
                neutral: neutral.clone(),
            };
            Some((op, inputs, consumer.outputs.clone()))
        }
        (SoacOp::Filter(p), SoacOp::Filter(c)) => {
            compose_filters(names, p, p_inputs, outs, c, c_inputs, &consumer.outputs)?
                .map(|(lam, inputs, outputs)| (SoacOp::Filter(lam), inputs, outputs))
        }
        (
            SoacOp::Filter(p),
            SoacOp::Redomap {
                outer,
                inner,
                neutral,
            },
        ) => compose_filter_into_fold(names, p, p_inputs, outs, inner, neutral.len(), c_inputs)?
            .map(|(lam, inputs)| {
                let op = SoacOp::Redomap {
                    outer: outer.clone(),
                    inner: lam,
                    neutral: neutral.clone(),
                };
                (op, inputs, consumer.outputs.clone())
            }),
        (SoacOp::Map(_), SoacOp::Filter(_) | SoacOp::Scan(..) | SoacOp::Reduce(..))
        | (SoacOp::Filter(_), SoacOp::Map(_) | SoacOp::Scan(..) | SoacOp::Reduce(..))
        | (SoacOp::Reduce(..) | SoacOp::Scan(..) | SoacOp::Redomap { .. }, _) => None,
    };

    let Some((op, inputs, outputs)) = composed else {
        return Ok(None);
    };
    let mut fused = consumer.clone();
    fused.soac = Soac {
        op,
        inputs,
        certs: producer.soac.certs.concat(&consumer.soac.certs),
        span: consumer.soac.span,
    };
    fused.outputs = outputs;
    fused.fused.extend(producer.output_names());
    fused.check_arity()?;
    trace!(
        kernel = %fused.id,
        producer = %producer.soac.kind(),
        consumer = %consumer.soac.kind(),
        "composed"
    );
    Ok(Some(fused))
}

fn check_outputs(soac: &Soac, bound: usize) -> FusionResult<()> {
    if soac.arity() == bound {
        Ok(())
    } else {
        Err(FusionError::invariant(
            soac.span,
            format!(
                "{} returns {} values but {bound} are bound",
                soac.kind(),
                soac.arity()
            ),
        ))
    }
}

fn check_params(lam: &Lambda, expected: usize, span: Span, what: &str) -> FusionResult<()> {
    if lam.params.len() == expected {
        Ok(())
    } else {
        Err(FusionError::normalization(
            span,
            format!(
                "{what} lambda takes {} parameters, expected {expected}",
                lam.params.len()
            ),
        ))
    }
}

/// `let p1 = s1 in ... let pn = sn in body`.
fn forward(bindings: Vec<(Ident, Ident)>, body: Exp) -> Exp {
    bindings.into_iter().rev().fold(body, |body, (param, src)| {
        Exp::let_pat(Pattern::single(param), Exp::var(&src), body)
    })
}

/// Composes a map producer into a map-like consumer lambda whose first
/// `acc` parameters are accumulators.
fn compose_maps(
    names: &mut NameSource,
    p: &Lambda,
    p_inputs: &[Input],
    outs: &[Ident],
    c: &Lambda,
    acc: usize,
    c_inputs: &[Input],
) -> FusionResult<(Lambda, Vec<Input>)> {
    check_params(p, p_inputs.len(), p.body.span(), "producer")?;
    check_params(c, acc + c_inputs.len(), c.body.span(), "consumer")?;

    let (acc_params, c_arrays) = c.params.split_at(acc);
    let mut result_binders: Vec<Option<Ident>> = vec![None; outs.len()];
    let mut forwards = Vec::new();
    let mut params = p.params.clone();
    let mut inputs = p_inputs.to_vec();
    for (param, input) in c_arrays.iter().zip(c_inputs) {
        match link(input, outs) {
            Some(i) => match &result_binders[i] {
                Some(first) => forwards.push((param.clone(), first.clone())),
                None => result_binders[i] = Some(param.clone()),
            },
            None => {
                params.push(param.clone());
                inputs.push(input.clone());
            }
        }
    }
    let pat = result_binders
        .into_iter()
        .zip(outs.iter().zip(&p.ret_types))
        .map(|(binder, (out, ty))| {
            binder.unwrap_or_else(|| names.ident(out.name.base.as_str(), ty.clone()))
        })
        .collect();

    let body = Exp::let_pat(
        Pattern::new(pat),
        (*p.body).clone(),
        forward(forwards, (*c.body).clone()),
    );
    let lam = Lambda::new(
        acc_params.iter().cloned().chain(params).collect(),
        body,
        c.ret_types.clone(),
    );
    Ok(dedup_inputs(lam, inputs, acc))
}

/// Collapses parameters bound to the same input into one, forwarding the
/// removed parameters from the kept one.
fn dedup_inputs(lam: Lambda, inputs: Vec<Input>, acc: usize) -> (Lambda, Vec<Input>) {
    let mut params = lam.params;
    let arrays = params.split_off(acc);
    let mut kept_inputs: Vec<Input> = Vec::with_capacity(inputs.len());
    let mut kept_params: Vec<Ident> = Vec::with_capacity(inputs.len());
    let mut forwards = Vec::new();
    for (param, input) in arrays.into_iter().zip(inputs) {
        match kept_inputs.iter().position(|k| k.same_source(&input)) {
            Some(j) => forwards.push((param, kept_params[j].clone())),
            None => {
                kept_inputs.push(input);
                kept_params.push(param);
            }
        }
    }
    params.extend(kept_params);
    let lam = Lambda::new(params, forward(forwards, *lam.body), lam.ret_types);
    (lam, kept_inputs)
}

/// Composes a filter producer into the inner lambda of a fold.
///
/// ```text
/// fn (acc.., x..) =>
///   let check = pred(x..) in
///   if check then <consumer body on x..> else (acc..)
/// ```
fn compose_filter_into_fold(
    names: &mut NameSource,
    p: &Lambda,
    p_inputs: &[Input],
    outs: &[Ident],
    c: &Lambda,
    acc: usize,
    c_inputs: &[Input],
) -> FusionResult<Option<(Lambda, Vec<Input>)>> {
    check_params(p, p_inputs.len(), p.body.span(), "predicate")?;
    check_params(c, acc + c_inputs.len(), c.body.span(), "consumer")?;

    let (acc_params, c_arrays) = c.params.split_at(acc);
    let mut forwards = Vec::with_capacity(c_arrays.len());
    for (param, input) in c_arrays.iter().zip(c_inputs) {
        let Some(i) = link(input, outs) else {
            return Ok(None);
        };
        forwards.push((param.clone(), p.params[i].clone()));
    }

    let check = names.ident("check", Type::Bool);
    let unchanged = Exp::results(acc_params.iter().map(Exp::var).collect());
    let body = Exp::let_pat(
        Pattern::single(check.clone()),
        (*p.body).clone(),
        Exp::If(
            Box::new(Exp::var(&check)),
            Box::new(forward(forwards, (*c.body).clone())),
            Box::new(unchanged),
            Type::of_results(&c.ret_types),
            Span::DUMMY,
        ),
    );
    let lam = Lambda::new(
        acc_params.iter().chain(&p.params).cloned().collect(),
        body,
        c.ret_types.clone(),
    );
    Ok(Some(dedup_inputs(lam, p_inputs.to_vec(), acc)))
}

/// Composes two filters into one whose predicate is the conjunction.
///
/// The fused filter reads the producer inputs in the order the consumer
/// read the corresponding outputs, so its results line up with the
/// consumer's outputs. Producer inputs the consumer did not read are still
/// needed by the producer predicate; they are appended and their filtered
/// results bound to fresh, unused outputs.
fn compose_filters(
    names: &mut NameSource,
    p: &Lambda,
    p_inputs: &[Input],
    outs: &[Ident],
    c: &Lambda,
    c_inputs: &[Input],
    c_outputs: &[Ident],
) -> FusionResult<Option<(Lambda, Vec<Input>, Vec<Ident>)>> {
    check_params(p, p_inputs.len(), p.body.span(), "predicate")?;
    check_params(c, c_inputs.len(), c.body.span(), "predicate")?;

    let mut read = vec![false; p.params.len()];
    let mut params = Vec::with_capacity(p.params.len());
    let mut inputs = Vec::with_capacity(p.params.len());
    let mut forwards = Vec::with_capacity(c.params.len());
    for (c_param, input) in c.params.iter().zip(c_inputs) {
        let Some(i) = link(input, outs) else {
            return Ok(None);
        };
        let param = if read[i] {
            names.fresh_ident(&p.params[i])
        } else {
            read[i] = true;
            p.params[i].clone()
        };
        forwards.push((c_param.clone(), param.clone()));
        params.push(param);
        inputs.push(p_inputs[i].clone());
    }

    let mut outputs = c_outputs.to_vec();
    for (i, was_read) in read.iter().enumerate() {
        if !was_read {
            params.push(p.params[i].clone());
            inputs.push(p_inputs[i].clone());
            outputs.push(names.fresh_ident(&outs[i]));
        }
    }

    let check = names.ident("check", Type::Bool);
    let body = Exp::let_pat(
        Pattern::single(check.clone()),
        (*p.body).clone(),
        Exp::If(
            Box::new(Exp::var(&check)),
            Box::new(forward(forwards, (*c.body).clone())),
            Box::new(Exp::bool(false)),
            Type::Bool,
            Span::DUMMY,
        ),
    );
    let lam = Lambda::new(params, body, vec![Type::Bool]);
    Ok(Some((lam, inputs, outputs)))
}
