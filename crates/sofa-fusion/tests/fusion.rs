//! End-to-end tests for the fusion pass.
//!
//! Programs are built directly as IR, fused, and evaluated before and after
//! with the reference evaluator.

use std::convert::Infallible;

use proptest::prelude::*;
use sofa_intern::Symbol;
use sofa_ir::eval::{Evaluator, Value};
use sofa_ir::visit::{walk_exp, Mapper};
use sofa_ir::{
    BinOp, Certificates, Exp, FunDef, Ident, Lambda, NameSource, Pattern, Program, Type,
};
use sofa_fusion::{
    fuse_fun, fuse_program, BlockReason, FusionConfig, FusionDecision, FusionError,
};
use sofa_span::Span;

fn int_arr() -> Type {
    Type::array(Type::Int)
}

fn int_mat() -> Type {
    Type::array(int_arr())
}

fn seq() -> FusionConfig {
    FusionConfig::default().sequential()
}

fn vars(ids: &[&Ident]) -> Vec<Exp> {
    ids.iter().map(|id| Exp::var(id)).collect()
}

fn let1(id: &Ident, rhs: Exp, body: Exp) -> Exp {
    Exp::let_pat(Pattern::single(id.clone()), rhs, body)
}

/// `fn x => x <op> k`
fn lam_op(ns: &mut NameSource, op: BinOp, k: i64, ret: Type) -> Lambda {
    let x = ns.ident("x", Type::Int);
    Lambda::new(
        vec![x.clone()],
        Exp::binop(op, Exp::var(&x), Exp::int(k), ret.clone()),
        vec![ret],
    )
}

/// `fn (a, b) => a + b`
fn lam_plus(ns: &mut NameSource) -> Lambda {
    let a = ns.ident("a", Type::Int);
    let b = ns.ident("b", Type::Int);
    Lambda::new(
        vec![a.clone(), b.clone()],
        Exp::binop(BinOp::Plus, Exp::var(&a), Exp::var(&b), Type::Int),
        vec![Type::Int],
    )
}

fn map_(lam: Lambda, ins: &[&Ident]) -> Exp {
    Exp::Map(lam, vars(ins), Certificates::none(), Span::DUMMY)
}

fn filter_(lam: Lambda, ins: &[&Ident]) -> Exp {
    Exp::Filter(lam, vars(ins), Certificates::none(), Span::DUMMY)
}

fn reduce_(lam: Lambda, ne: i64, ins: &[&Ident]) -> Exp {
    Exp::Reduce(lam, vec![Exp::int(ne)], vars(ins), Certificates::none(), Span::DUMMY)
}

fn scan_(lam: Lambda, ne: i64, ins: &[&Ident]) -> Exp {
    Exp::Scan(lam, vec![Exp::int(ne)], vars(ins), Certificates::none(), Span::DUMMY)
}

fn mk_fun(name: &str, params: Vec<Ident>, ret_type: Type, body: Exp) -> FunDef {
    FunDef {
        name: Symbol::intern(name),
        params,
        ret_type,
        body,
        span: Span::DUMMY,
    }
}

fn mk_prog(funs: Vec<FunDef>) -> Program {
    Program { funs }
}

fn run(prog: &Program, name: &str, args: Vec<Value>) -> Value {
    Evaluator::new(prog)
        .call(Symbol::intern(name), args)
        .unwrap()
}

struct CountSoacs(usize);

impl Mapper for CountSoacs {
    type Error = Infallible;

    fn map_exp(&mut self, exp: Exp) -> Result<Exp, Infallible> {
        if exp.is_soac() {
            self.0 += 1;
        }
        walk_exp(self, exp)
    }
}

fn count_soacs(exp: &Exp) -> usize {
    let mut counter = CountSoacs(0);
    let _ = counter.map_exp(exp.clone());
    counter.0
}

/// Fuses `fun`, checks it still computes the same on `args`, and returns it.
fn fuse_and_compare(fun: FunDef, args: Vec<Value>) -> (FunDef, bool) {
    let fused = fuse_fun(&fun, &seq()).unwrap();
    let name = fun.name.as_str();
    let before = run(&mk_prog(vec![fun]), name, args.clone());
    let after = run(&mk_prog(vec![fused.fun.clone()]), name, args);
    assert_eq!(before, after, "fusion changed the result of {name}");
    (fused.fun, fused.changed)
}

// =========================================================================
// Map Fusion
// =========================================================================

/// `(a, b) = map(fn x => (x + 1, x * 2), xs); c = map(fn (p, q) => p + q, a, b)`
fn mk_map_map(ns: &mut NameSource) -> FunDef {
    let xs = ns.ident("xs", int_arr());
    let a = ns.ident("a", int_arr());
    let b = ns.ident("b", int_arr());
    let c = ns.ident("c", int_arr());
    let x = ns.ident("x", Type::Int);
    let pair = Lambda::new(
        vec![x.clone()],
        Exp::TupLit(
            vec![
                Exp::binop(BinOp::Plus, Exp::var(&x), Exp::int(1), Type::Int),
                Exp::binop(BinOp::Times, Exp::var(&x), Exp::int(2), Type::Int),
            ],
            Span::DUMMY,
        ),
        vec![Type::Int, Type::Int],
    );
    let body = Exp::let_pat(
        Pattern::new(vec![a.clone(), b.clone()]),
        map_(pair, &[&xs]),
        let1(&c, map_(lam_plus(ns), &[&a, &b]), Exp::var(&c)),
    );
    mk_fun("map_map", vec![xs], int_arr(), body)
}

#[test]
fn test_map_map_becomes_one_kernel() {
    let mut ns = NameSource::new();
    let fun = mk_map_map(&mut ns);
    assert_eq!(count_soacs(&fun.body), 2);
    let (fused, changed) = fuse_and_compare(fun, vec![Value::int_array(&[1, 2, 3])]);
    assert!(changed);
    assert_eq!(count_soacs(&fused.body), 1);

    let out = run(&mk_prog(vec![fused]), "map_map", vec![Value::int_array(&[1, 2, 3])]);
    assert_eq!(out, Value::int_array(&[4, 7, 10]));
}

#[test]
fn test_map_into_reduce() {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let ys = ns.ident("ys", int_arr());
    let r = ns.ident("r", Type::Int);
    let body = let1(
        &ys,
        map_(lam_op(&mut ns, BinOp::Times, 3, Type::Int), &[&xs]),
        let1(&r, reduce_(lam_plus(&mut ns), 0, &[&ys]), Exp::var(&r)),
    );
    let fun = mk_fun("sum3", vec![xs], Type::Int, body);
    let (fused, changed) = fuse_and_compare(fun, vec![Value::int_array(&[1, -2, 5])]);
    assert!(changed);
    assert_eq!(count_soacs(&fused.body), 1);
    assert!(matches!(
        fused.body,
        Exp::LetPat(_, ref rhs, _, _) if matches!(rhs.as_ref(), Exp::Redomap(..))
    ));
}

#[test]
fn test_long_chain_into_reduce() {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let y1 = ns.ident("y", int_arr());
    let y2 = ns.ident("y", int_arr());
    let r = ns.ident("r", Type::Int);
    let body = let1(
        &y1,
        map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&xs]),
        let1(
            &y2,
            map_(lam_op(&mut ns, BinOp::Times, 2, Type::Int), &[&y1]),
            let1(&r, reduce_(lam_plus(&mut ns), 0, &[&y2]), Exp::var(&r)),
        ),
    );
    let fun = mk_fun("chain", vec![xs], Type::Int, body);
    let report = fuse_fun(&fun, &seq()).unwrap().report;
    assert_eq!(report.fused_count(), 2);
    assert_eq!(report.kernels, 1);
    let (fused, _) = fuse_and_compare(fun, vec![Value::int_array(&[0, 1, 2, 3])]);
    assert_eq!(count_soacs(&fused.body), 1);
}

// =========================================================================
// Filter Fusion
// =========================================================================

/// `ys = filter(fn x => x > 0, xs); r = reduce(+, 0, ys)`, optionally
/// returning `ys` as well.
fn mk_filter_reduce(ns: &mut NameSource, return_ys: bool) -> FunDef {
    let xs = ns.ident("xs", int_arr());
    let ys = ns.ident("ys", int_arr());
    let r = ns.ident("r", Type::Int);
    let result = if return_ys {
        Exp::TupLit(vec![Exp::var(&r), Exp::var(&ys)], Span::DUMMY)
    } else {
        Exp::var(&r)
    };
    let body = let1(
        &ys,
        filter_(lam_op(ns, BinOp::Greater, 0, Type::Bool), &[&xs]),
        let1(&r, reduce_(lam_plus(ns), 0, &[&ys]), result),
    );
    let ret = if return_ys {
        Type::Tuple(vec![Type::Int, int_arr()])
    } else {
        Type::Int
    };
    mk_fun("positive_sum", vec![xs], ret, body)
}

#[test]
fn test_filter_into_reduce() {
    let mut ns = NameSource::new();
    let fun = mk_filter_reduce(&mut ns, false);
    let (fused, changed) = fuse_and_compare(fun, vec![Value::int_array(&[-1, 2, -3, 4])]);
    assert!(changed);
    assert_eq!(count_soacs(&fused.body), 1);
    let out = run(&mk_prog(vec![fused]), "positive_sum", vec![Value::int_array(&[-1, 2, -3, 4])]);
    assert_eq!(out, Value::Int(6));
}

#[test]
fn test_filter_result_also_returned_stays() {
    let mut ns = NameSource::new();
    let fun = mk_filter_reduce(&mut ns, true);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(!fused.changed);
    assert_eq!(fused.fun, fun);
    assert!(fused.report.decisions.iter().any(|d| matches!(
        d,
        FusionDecision::Standalone {
            reason: BlockReason::Unfusable,
            ..
        }
    )));
}

#[test]
fn test_filter_into_filter() {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let ys = ns.ident("ys", int_arr());
    let zs = ns.ident("zs", int_arr());
    let body = let1(
        &ys,
        filter_(lam_op(&mut ns, BinOp::Greater, 0, Type::Bool), &[&xs]),
        let1(
            &zs,
            filter_(lam_op(&mut ns, BinOp::Less, 10, Type::Bool), &[&ys]),
            Exp::var(&zs),
        ),
    );
    let fun = mk_fun("window", vec![xs], int_arr(), body);
    let (fused, changed) =
        fuse_and_compare(fun, vec![Value::int_array(&[-5, 3, 12, 9, 0, 10, 1])]);
    assert!(changed);
    assert_eq!(count_soacs(&fused.body), 1);
}

#[test]
fn test_filter_not_fused_into_consumer_with_extra_array() {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let other = ns.ident("other", int_arr());
    let ys = ns.ident("ys", int_arr());
    let zs = ns.ident("zs", int_arr());
    let ws = ns.ident("ws", int_arr());
    let a = ns.ident("a", Type::Int);
    let b = ns.ident("b", Type::Int);
    let less = Lambda::new(
        vec![a.clone(), b.clone()],
        Exp::binop(BinOp::Less, Exp::var(&a), Exp::var(&b), Type::Bool),
        vec![Type::Bool],
    );
    let body = let1(
        &ys,
        filter_(lam_op(&mut ns, BinOp::Greater, 0, Type::Bool), &[&xs]),
        Exp::let_pat(
            Pattern::new(vec![zs.clone(), ws.clone()]),
            filter_(less, &[&ys, &other]),
            Exp::TupLit(vec![Exp::var(&zs), Exp::var(&ws)], Span::DUMMY),
        ),
    );
    let fun = mk_fun("pairs", vec![xs, other], Type::Tuple(vec![int_arr(), int_arr()]), body);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(!fused.changed);
    assert!(fused.report.decisions.iter().any(|d| matches!(
        d,
        FusionDecision::Standalone {
            reason: BlockReason::IncompatibleKind,
            ..
        }
    )));
}

#[test]
fn test_filter_fusion_can_be_disabled() {
    let mut ns = NameSource::new();
    let fun = mk_filter_reduce(&mut ns, false);
    let config = FusionConfig {
        filter_fusion: false,
        ..seq()
    };
    assert!(!fuse_fun(&fun, &config).unwrap().changed);
}

// =========================================================================
// Safety
// =========================================================================

#[test]
fn test_in_place_update_blocks_fusion() {
    // y = map(f, x); let x2 = x with [0] <- 5 in z = map(g, y)
    let mut ns = NameSource::new();
    let x = ns.ident("x", int_arr());
    let y = ns.ident("y", int_arr());
    let x2 = ns.ident("x", int_arr());
    let z = ns.ident("z", int_arr());
    let body = let1(
        &y,
        map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&x]),
        Exp::LetWith {
            dest: x2.clone(),
            src: x.clone(),
            idxs: vec![Exp::int(0)],
            value: Box::new(Exp::int(5)),
            body: Box::new(let1(
                &z,
                map_(lam_op(&mut ns, BinOp::Times, 2, Type::Int), &[&y]),
                Exp::TupLit(vec![Exp::var(&z), Exp::var(&x2)], Span::DUMMY),
            )),
            span: Span::DUMMY,
        },
    );
    let fun = mk_fun("update", vec![x], Type::Tuple(vec![int_arr(), int_arr()]), body);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(!fused.changed);
    assert!(fused.report.decisions.iter().any(|d| matches!(
        d,
        FusionDecision::Standalone {
            reason: BlockReason::InPlaceHazard,
            ..
        }
    )));
}

/// `expensive(x) = x * 3`
fn mk_expensive(ns: &mut NameSource) -> FunDef {
    let p = ns.ident("p", Type::Int);
    mk_fun(
        "expensive",
        vec![p.clone()],
        Type::Int,
        Exp::binop(BinOp::Times, Exp::var(&p), Exp::int(3), Type::Int),
    )
}

/// `fn x => expensive(x)`
fn lam_expensive(ns: &mut NameSource) -> Lambda {
    let x = ns.ident("x", Type::Int);
    Lambda::new(
        vec![x.clone()],
        Exp::Apply(
            Symbol::intern("expensive"),
            vec![Exp::var(&x)],
            Type::Int,
            Span::DUMMY,
        ),
        vec![Type::Int],
    )
}

/// `main` applying `expensive` through a map, read by one or two maps.
fn mk_counted(ns: &mut NameSource, consumers: usize) -> Program {
    let expensive = mk_expensive(ns);
    let xs = ns.ident("xs", int_arr());
    let y = ns.ident("y", int_arr());
    let call = lam_expensive(ns);
    let ret_type = if consumers == 1 {
        int_arr()
    } else {
        Type::Tuple(vec![int_arr(), int_arr()])
    };
    let rest = if consumers == 1 {
        // z = map(fn (a, b) => a + b, y, y)
        let z = ns.ident("z", int_arr());
        let1(&z, map_(lam_plus(ns), &[&y, &y]), Exp::var(&z))
    } else {
        let a = ns.ident("a", int_arr());
        let b = ns.ident("b", int_arr());
        let1(
            &a,
            map_(lam_op(ns, BinOp::Plus, 1, Type::Int), &[&y]),
            let1(
                &b,
                map_(lam_op(ns, BinOp::Minus, 1, Type::Int), &[&y]),
                Exp::TupLit(vec![Exp::var(&a), Exp::var(&b)], Span::DUMMY),
            ),
        )
    };
    let main = mk_fun(
        "main",
        vec![xs.clone()],
        ret_type,
        let1(&y, map_(call, &[&xs]), rest),
    );
    mk_prog(vec![expensive, main])
}

fn expensive_calls_with(prog: &Program, args: Vec<Value>) -> (Value, usize) {
    let eval = Evaluator::new(prog);
    let v = eval.call(Symbol::intern("main"), args).unwrap();
    (v, eval.call_count(Symbol::intern("expensive")))
}

fn expensive_calls(prog: &Program, xs: &[i64]) -> (Value, usize) {
    expensive_calls_with(prog, vec![Value::int_array(xs)])
}

#[test]
fn test_no_duplicated_work_single_consumer() {
    let mut ns = NameSource::new();
    let prog = mk_counted(&mut ns, 1);
    let (fused, report) = fuse_program(prog.clone(), &seq());
    assert_eq!(report.changed_count(), 1);

    let xs = [1, 2, 3, 4, 5];
    let (before, before_calls) = expensive_calls(&prog, &xs);
    let (after, after_calls) = expensive_calls(&fused, &xs);
    assert_eq!(before, after);
    assert_eq!(before_calls, xs.len());
    assert_eq!(after_calls, xs.len());
}

#[test]
fn test_no_duplicated_work_two_consumers() {
    let mut ns = NameSource::new();
    let prog = mk_counted(&mut ns, 2);
    let (fused, report) = fuse_program(prog.clone(), &seq());
    assert_eq!(report.changed_count(), 0);
    assert_eq!(fused, prog);

    let xs = [3, 1, 4];
    let (_, calls) = expensive_calls(&fused, &xs);
    assert_eq!(calls, xs.len());
}

#[test]
fn test_in_place_update_of_indexed_input_blocks_fusion() {
    // y = map(f, m[0]); let m2 = m with [0, 0] <- 9 in z = map(g, y)
    let mut ns = NameSource::new();
    let m = ns.ident("m", int_mat());
    let m2 = ns.ident("m", int_mat());
    let y = ns.ident("y", int_arr());
    let z = ns.ident("z", int_arr());
    let row = Exp::Index(m.clone(), vec![Exp::int(0)], Span::DUMMY);
    let body = let1(
        &y,
        Exp::Map(
            lam_op(&mut ns, BinOp::Plus, 1, Type::Int),
            vec![row],
            Certificates::none(),
            Span::DUMMY,
        ),
        Exp::LetWith {
            dest: m2.clone(),
            src: m.clone(),
            idxs: vec![Exp::int(0), Exp::int(0)],
            value: Box::new(Exp::int(9)),
            body: Box::new(let1(
                &z,
                map_(lam_op(&mut ns, BinOp::Times, 2, Type::Int), &[&y]),
                Exp::TupLit(vec![Exp::var(&z), Exp::var(&m2)], Span::DUMMY),
            )),
            span: Span::DUMMY,
        },
    );
    let fun = mk_fun("row_update", vec![m], Type::Tuple(vec![int_arr(), int_mat()]), body);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(!fused.changed);
    assert_eq!(fused.fun, fun);
    assert!(fused.report.decisions.iter().any(|d| matches!(
        d,
        FusionDecision::Standalone {
            reason: BlockReason::InPlaceHazard,
            ..
        }
    )));
}

// =========================================================================
// Scoping
// =========================================================================

/// `ys = map(f, xs); if c then (zs = map(g, ys); zs) else <else_arm>`
fn mk_branch(ns: &mut NameSource, both_arms: bool) -> FunDef {
    let c = ns.ident("c", Type::Bool);
    let xs = ns.ident("xs", int_arr());
    let ys = ns.ident("ys", int_arr());
    let zs = ns.ident("zs", int_arr());
    let then_arm = let1(
        &zs,
        map_(lam_op(ns, BinOp::Times, 2, Type::Int), &[&ys]),
        Exp::var(&zs),
    );
    let else_arm = if both_arms {
        let ws = ns.ident("ws", int_arr());
        let1(
            &ws,
            map_(lam_op(ns, BinOp::Minus, 2, Type::Int), &[&ys]),
            Exp::var(&ws),
        )
    } else {
        Exp::var(&xs)
    };
    let body = let1(
        &ys,
        map_(lam_op(ns, BinOp::Plus, 1, Type::Int), &[&xs]),
        Exp::If(
            Box::new(Exp::var(&c)),
            Box::new(then_arm),
            Box::new(else_arm),
            int_arr(),
            Span::DUMMY,
        ),
    );
    mk_fun("branch", vec![c, xs], int_arr(), body)
}

#[test]
fn test_fusion_into_one_branch() {
    let mut ns = NameSource::new();
    let fun = mk_branch(&mut ns, false);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(fused.changed);
    for c in [true, false] {
        let args = vec![Value::Bool(c), Value::int_array(&[1, 2, 3])];
        let before = run(&mk_prog(vec![fun.clone()]), "branch", args.clone());
        let after = run(&mk_prog(vec![fused.fun.clone()]), "branch", args);
        assert_eq!(before, after);
    }
}

#[test]
fn test_branches_with_different_consumers_block_fusion() {
    let mut ns = NameSource::new();
    let fun = mk_branch(&mut ns, true);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(!fused.changed);
    assert_eq!(fused.fun, fun);
}

#[test]
fn test_consumers_inside_and_after_branch_do_not_duplicate_work() {
    // y = map(expensive, xs)
    // r = if c then (a = map(+1, y); a) else xs
    // b = map(-1, y)
    let mut ns = NameSource::new();
    let expensive = mk_expensive(&mut ns);
    let c = ns.ident("c", Type::Bool);
    let xs = ns.ident("xs", int_arr());
    let y = ns.ident("y", int_arr());
    let a = ns.ident("a", int_arr());
    let r = ns.ident("r", int_arr());
    let b = ns.ident("b", int_arr());
    let then_arm = let1(
        &a,
        map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&y]),
        Exp::var(&a),
    );
    let branch = Exp::If(
        Box::new(Exp::var(&c)),
        Box::new(then_arm),
        Box::new(Exp::var(&xs)),
        int_arr(),
        Span::DUMMY,
    );
    let body = let1(
        &y,
        map_(lam_expensive(&mut ns), &[&xs]),
        let1(
            &r,
            branch,
            let1(
                &b,
                map_(lam_op(&mut ns, BinOp::Minus, 1, Type::Int), &[&y]),
                Exp::TupLit(vec![Exp::var(&r), Exp::var(&b)], Span::DUMMY),
            ),
        ),
    );
    let main = mk_fun(
        "main",
        vec![c, xs],
        Type::Tuple(vec![int_arr(), int_arr()]),
        body,
    );
    let prog = mk_prog(vec![expensive, main]);
    let (fused, report) = fuse_program(prog.clone(), &seq());
    assert_eq!(report.changed_count(), 0);

    for flag in [true, false] {
        let args = vec![Value::Bool(flag), Value::int_array(&[1, 2, 3])];
        let (before, before_calls) = expensive_calls_with(&prog, args.clone());
        let (after, after_calls) = expensive_calls_with(&fused, args);
        assert_eq!(before, after);
        assert_eq!(before_calls, 3);
        assert_eq!(after_calls, 3);
    }
}

#[test]
fn test_array_free_in_lambda_is_not_fused() {
    // ys = map(f, xs); zs = map(fn x => let s = reduce(+, 0, ys) in x + s, xs)
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let ys = ns.ident("ys", int_arr());
    let zs = ns.ident("zs", int_arr());
    let s = ns.ident("s", Type::Int);
    let x = ns.ident("x", Type::Int);
    let inner = Lambda::new(
        vec![x.clone()],
        let1(
            &s,
            reduce_(lam_plus(&mut ns), 0, &[&ys]),
            Exp::binop(BinOp::Plus, Exp::var(&x), Exp::var(&s), Type::Int),
        ),
        vec![Type::Int],
    );
    let body = let1(
        &ys,
        map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&xs]),
        let1(&zs, map_(inner, &[&xs]), Exp::var(&zs)),
    );
    let fun = mk_fun("shift", vec![xs], int_arr(), body);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(!fused.changed);
}

#[test]
fn test_loop_body_does_not_absorb_outer_producer() {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let ys = ns.ident("ys", int_arr());
    let acc = ns.ident("acc", Type::Int);
    let acc2 = ns.ident("acc", Type::Int);
    let i = ns.ident("i", Type::Int);
    let s = ns.ident("s", Type::Int);
    let loop_body = let1(
        &s,
        reduce_(lam_plus(&mut ns), 0, &[&ys]),
        Exp::binop(BinOp::Plus, Exp::var(&acc), Exp::var(&s), Type::Int),
    );
    let body = let1(
        &ys,
        map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&xs]),
        Exp::DoLoop {
            merge: Pattern::single(acc.clone()),
            init: vec![Exp::int(0)],
            ivar: i,
            bound: Box::new(Exp::int(3)),
            body: Box::new(loop_body),
            rest: Box::new(let1(&acc2, Exp::var(&acc), Exp::var(&acc2))),
            span: Span::DUMMY,
        },
    );
    let fun = mk_fun("looped", vec![xs], Type::Int, body);
    let fused = fuse_fun(&fun, &seq()).unwrap();
    assert!(!fused.changed);
    let out = run(&mk_prog(vec![fun]), "looped", vec![Value::int_array(&[1, 2])]);
    assert_eq!(out, Value::Int(15));
}

// =========================================================================
// Normalization
// =========================================================================

#[test]
fn test_transposed_consumer_is_pulled() {
    // y = map(fn row => let r = map(+1, row) in r, m)
    // z = map(fn col => let w = map(*2, col) in w, transpose(y))
    let mut ns = NameSource::new();
    let m = ns.ident("m", int_mat());
    let y = ns.ident("y", int_mat());
    let z = ns.ident("z", int_mat());
    let row = ns.ident("row", int_arr());
    let r = ns.ident("r", int_arr());
    let col = ns.ident("col", int_arr());
    let w = ns.ident("w", int_arr());
    let rows = Lambda::new(
        vec![row.clone()],
        let1(&r, map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&row]), Exp::var(&r)),
        vec![int_arr()],
    );
    let cols = Lambda::new(
        vec![col.clone()],
        let1(&w, map_(lam_op(&mut ns, BinOp::Times, 2, Type::Int), &[&col]), Exp::var(&w)),
        vec![int_arr()],
    );
    let body = let1(
        &y,
        map_(rows, &[&m]),
        let1(
            &z,
            Exp::Map(
                cols,
                vec![Exp::Transpose(Box::new(Exp::var(&y)), Span::DUMMY)],
                Certificates::none(),
                Span::DUMMY,
            ),
            Exp::var(&z),
        ),
    );
    let fun = mk_fun("grid", vec![m], int_mat(), body);

    let no_pull = FusionConfig {
        transpose_pull: false,
        ..seq()
    };
    assert!(!fuse_fun(&fun, &no_pull).unwrap().changed);

    let matrix = Value::Array(vec![
        Value::int_array(&[1, 2, 3]),
        Value::int_array(&[4, 5, 6]),
    ]);
    let (fused, changed) = fuse_and_compare(fun, vec![matrix]);
    assert!(changed);
    // Two outer maps became one; the inner maps stay.
    assert_eq!(count_soacs(&fused.body), 3);
}

#[test]
fn test_replicate_fuses_as_map() {
    // ys = replicate(n, 7); zs = map(fn (a, i) => a + i, ys, iota(n))
    let mut ns = NameSource::new();
    let n = ns.ident("n", Type::Int);
    let ys = ns.ident("ys", int_arr());
    let zs = ns.ident("zs", int_arr());
    let body = let1(
        &ys,
        Exp::Replicate(Box::new(Exp::var(&n)), Box::new(Exp::int(7)), Span::DUMMY),
        let1(
            &zs,
            Exp::Map(
                lam_plus(&mut ns),
                vec![Exp::var(&ys), Exp::Iota(Box::new(Exp::var(&n)), Span::DUMMY)],
                Certificates::none(),
                Span::DUMMY,
            ),
            Exp::var(&zs),
        ),
    );
    let fun = mk_fun("ramp", vec![n], int_arr(), body);
    let (fused, changed) = fuse_and_compare(fun.clone(), vec![Value::Int(4)]);
    assert!(changed);
    assert!(!matches!(
        fused.body,
        Exp::LetPat(_, ref rhs, _, _) if matches!(rhs.as_ref(), Exp::Replicate(..))
    ));
    let out = run(&mk_prog(vec![fused]), "ramp", vec![Value::Int(4)]);
    assert_eq!(out, Value::int_array(&[7, 8, 9, 10]));

    let config = FusionConfig {
        replicate_fusion: false,
        ..seq()
    };
    assert!(!fuse_fun(&fun, &config).unwrap().changed);
}

#[test]
fn test_scan_is_never_fused() {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let ys = ns.ident("ys", int_arr());
    let zs = ns.ident("zs", int_arr());
    let into_scan = let1(
        &ys,
        map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&xs]),
        let1(&zs, scan_(lam_plus(&mut ns), 0, &[&ys]), Exp::var(&zs)),
    );
    let from_scan = let1(
        &ys,
        scan_(lam_plus(&mut ns), 0, &[&xs]),
        let1(
            &zs,
            map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&ys]),
            Exp::var(&zs),
        ),
    );
    for body in [into_scan, from_scan] {
        let fun = mk_fun("scanned", vec![xs.clone()], int_arr(), body);
        let fused = fuse_fun(&fun, &seq()).unwrap();
        assert!(!fused.changed);
        assert!(fused.report.decisions.iter().any(|d| matches!(
            d,
            FusionDecision::Standalone {
                reason: BlockReason::IncompatibleKind,
                ..
            }
        )));
    }
}

// =========================================================================
// Driver
// =========================================================================

#[test]
fn test_fusion_reaches_fixed_point() {
    let mut ns = NameSource::new();
    let fun = mk_map_map(&mut ns);
    let once = fuse_fun(&fun, &seq()).unwrap();
    assert!(once.changed);
    let twice = fuse_fun(&once.fun, &seq()).unwrap();
    assert!(!twice.changed);
    assert_eq!(twice.fun, once.fun);
}

#[test]
fn test_disabled_fusion_is_identity() {
    let mut ns = NameSource::new();
    let fun = mk_map_map(&mut ns);
    let config = FusionConfig {
        enabled: false,
        ..seq()
    };
    let fused = fuse_fun(&fun, &config).unwrap();
    assert!(!fused.changed);
    assert_eq!(fused.fun, fun);
}

#[test]
fn test_bare_soac_is_a_normalization_violation() {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let bad = mk_fun(
        "bad",
        vec![xs.clone()],
        int_arr(),
        map_(lam_op(&mut ns, BinOp::Plus, 1, Type::Int), &[&xs]),
    );
    let err = fuse_fun(&bad, &seq()).unwrap_err();
    assert!(matches!(err, FusionError::NormalizationViolation { .. }));

    let good = mk_map_map(&mut ns);
    let prog = mk_prog(vec![bad.clone(), good]);
    for config in [seq(), FusionConfig::default()] {
        let (fused, report) = fuse_program(prog.clone(), &config);
        assert_eq!(fused.funs[0], bad);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.changed_count(), 1);
        assert!(report.function(Symbol::intern("bad")).is_some_and(|f| f.error.is_some()));
    }
}

#[test]
fn test_invalid_array_input() {
    let mut ns = NameSource::new();
    let n = ns.ident("n", Type::Int);
    let ys = ns.ident("ys", int_arr());
    let body = let1(
        &ys,
        Exp::Map(
            lam_op(&mut ns, BinOp::Plus, 1, Type::Int),
            vec![Exp::var(&n)],
            Certificates::none(),
            Span::point(3, 7),
        ),
        Exp::var(&ys),
    );
    let fun = mk_fun("scalar", vec![n], int_arr(), body);
    let err = fuse_fun(&fun, &seq()).unwrap_err();
    assert!(matches!(err, FusionError::InvalidArrayInput { .. }));
    assert_eq!(err.span(), Span::point(3, 7));
}

// =========================================================================
// Properties
// =========================================================================

#[derive(Clone, Debug)]
enum Stage {
    Add(i64),
    Mul(i64),
    Keep(i64),
}

fn stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        (-5i64..5).prop_map(Stage::Add),
        (-3i64..4).prop_map(Stage::Mul),
        (-5i64..5).prop_map(Stage::Keep),
    ]
}

/// A chain of maps and filters over `xs`, optionally summed at the end.
fn mk_pipeline(stages: &[Stage], sum: bool) -> FunDef {
    let mut ns = NameSource::new();
    let xs = ns.ident("xs", int_arr());
    let mut bindings = Vec::with_capacity(stages.len() + 1);
    let mut last = xs.clone();
    for s in stages {
        let out = ns.ident("ys", int_arr());
        let rhs = match *s {
            Stage::Add(k) => map_(lam_op(&mut ns, BinOp::Plus, k, Type::Int), &[&last]),
            Stage::Mul(k) => map_(lam_op(&mut ns, BinOp::Times, k, Type::Int), &[&last]),
            Stage::Keep(k) => filter_(lam_op(&mut ns, BinOp::Greater, k, Type::Bool), &[&last]),
        };
        bindings.push((out.clone(), rhs));
        last = out;
    }
    let (result, ret) = if sum {
        let r = ns.ident("r", Type::Int);
        bindings.push((r.clone(), reduce_(lam_plus(&mut ns), 0, &[&last])));
        (Exp::var(&r), Type::Int)
    } else {
        (Exp::var(&last), int_arr())
    };
    let body = bindings
        .into_iter()
        .rev()
        .fold(result, |body, (id, rhs)| let1(&id, rhs, body));
    mk_fun("pipeline", vec![xs], ret, body)
}

proptest! {
    #[test]
    fn prop_fusion_preserves_semantics(
        stages in prop::collection::vec(stage(), 1..6),
        sum in any::<bool>(),
        xs in prop::collection::vec(-20i64..20, 0..12),
    ) {
        let fun = mk_pipeline(&stages, sum);
        let fused = fuse_fun(&fun, &seq()).unwrap();
        let args = vec![Value::int_array(&xs)];
        let before = run(&mk_prog(vec![fun.clone()]), "pipeline", args.clone());
        let after = run(&mk_prog(vec![fused.fun.clone()]), "pipeline", args);
        prop_assert_eq!(before, after);
        prop_assert!(count_soacs(&fused.fun.body) <= count_soacs(&fun.body));
        prop_assert_eq!(fused.changed, fused.report.fused_count() > 0);
    }

    #[test]
    fn prop_fusion_is_idempotent(stages in prop::collection::vec(stage(), 1..6), sum in any::<bool>()) {
        let fun = mk_pipeline(&stages, sum);
        let once = fuse_fun(&fun, &seq()).unwrap();
        let twice = fuse_fun(&once.fun, &seq()).unwrap();
        prop_assert!(!twice.changed);
    }
}
