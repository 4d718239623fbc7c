//! Generic bottom-up rewriting traversal.
//!
//! A [`Mapper`] has one hook per node kind. Every hook defaults to the
//! matching `walk_*` function, which rebuilds the node after mapping its
//! children, so an implementation overrides only the cases it cares about
//! and calls back into `walk_*` to recurse into the rest.
//!
//! Children are visited left to right, and binders are visited before the
//! scope they introduce: for `let p = e in b` the order is `e`, `p`, `b`.
//! Passes that rename binders rely on this.

use crate::{Certificates, Exp, Ident, Lambda, Literal, Pattern, Type};

/// Per-node-kind rewriting hooks with identity defaults.
pub trait Mapper {
    /// Error produced by a failing hook.
    type Error;

    /// Rewrites an expression.
    fn map_exp(&mut self, exp: Exp) -> Result<Exp, Self::Error> {
        walk_exp(self, exp)
    }

    /// Rewrites a lambda.
    fn map_lambda(&mut self, lam: Lambda) -> Result<Lambda, Self::Error> {
        walk_lambda(self, lam)
    }

    /// Rewrites a binding pattern.
    fn map_pattern(&mut self, pat: Pattern) -> Result<Pattern, Self::Error> {
        walk_pattern(self, pat)
    }

    /// Rewrites an identifier in binding position.
    fn map_binder(&mut self, ident: Ident) -> Result<Ident, Self::Error> {
        self.map_ident(ident)
    }

    /// Rewrites an identifier in use position.
    fn map_ident(&mut self, ident: Ident) -> Result<Ident, Self::Error> {
        walk_ident(self, ident)
    }

    /// Rewrites a literal.
    fn map_literal(&mut self, lit: Literal) -> Result<Literal, Self::Error> {
        Ok(lit)
    }

    /// Rewrites a type.
    fn map_type(&mut self, ty: Type) -> Result<Type, Self::Error> {
        Ok(ty)
    }
}

/// Maps the type of an identifier.
pub fn walk_ident<M: Mapper + ?Sized>(m: &mut M, ident: Ident) -> Result<Ident, M::Error> {
    Ok(Ident {
        name: ident.name,
        ty: m.map_type(ident.ty)?,
    })
}

/// Maps every identifier of a pattern as a binder.
pub fn walk_pattern<M: Mapper + ?Sized>(m: &mut M, pat: Pattern) -> Result<Pattern, M::Error> {
    let idents = pat
        .idents
        .into_iter()
        .map(|id| m.map_binder(id))
        .collect::<Result<_, _>>()?;
    Ok(Pattern { idents })
}

/// Maps the parameters, then the body, then the return types.
pub fn walk_lambda<M: Mapper + ?Sized>(m: &mut M, lam: Lambda) -> Result<Lambda, M::Error> {
    let params = lam
        .params
        .into_iter()
        .map(|p| m.map_binder(p))
        .collect::<Result<_, _>>()?;
    let body = m.map_exp(*lam.body)?;
    let ret_types = lam
        .ret_types
        .into_iter()
        .map(|t| m.map_type(t))
        .collect::<Result<_, _>>()?;
    Ok(Lambda {
        params,
        body: Box::new(body),
        ret_types,
    })
}

fn walk_exps<M: Mapper + ?Sized>(m: &mut M, es: Vec<Exp>) -> Result<Vec<Exp>, M::Error> {
    es.into_iter().map(|e| m.map_exp(e)).collect()
}

fn walk_boxed<M: Mapper + ?Sized>(m: &mut M, e: Box<Exp>) -> Result<Box<Exp>, M::Error> {
    Ok(Box::new(m.map_exp(*e)?))
}

fn walk_certs<M: Mapper + ?Sized>(
    m: &mut M,
    certs: Certificates,
) -> Result<Certificates, M::Error> {
    let certs = certs
        .0
        .into_iter()
        .map(|c| m.map_ident(c))
        .collect::<Result<_, _>>()?;
    Ok(Certificates(certs))
}

/// Rebuilds `exp` after mapping each of its children.
pub fn walk_exp<M: Mapper + ?Sized>(m: &mut M, exp: Exp) -> Result<Exp, M::Error> {
    Ok(match exp {
        Exp::Literal(lit, span) => Exp::Literal(m.map_literal(lit)?, span),
        Exp::Var(id, span) => Exp::Var(m.map_ident(id)?, span),
        Exp::TupLit(es, span) => Exp::TupLit(walk_exps(m, es)?, span),
        Exp::ArrayLit(es, ty, span) => {
            let es = walk_exps(m, es)?;
            Exp::ArrayLit(es, m.map_type(ty)?, span)
        }
        Exp::BinOp(op, a, b, ty, span) => {
            let a = walk_boxed(m, a)?;
            let b = walk_boxed(m, b)?;
            Exp::BinOp(op, a, b, m.map_type(ty)?, span)
        }
        Exp::Not(e, span) => Exp::Not(walk_boxed(m, e)?, span),
        Exp::Negate(e, span) => Exp::Negate(walk_boxed(m, e)?, span),
        Exp::If(c, t, e, ty, span) => {
            let c = walk_boxed(m, c)?;
            let t = walk_boxed(m, t)?;
            let e = walk_boxed(m, e)?;
            Exp::If(c, t, e, m.map_type(ty)?, span)
        }
        Exp::Apply(fname, args, ty, span) => {
            let args = walk_exps(m, args)?;
            Exp::Apply(fname, args, m.map_type(ty)?, span)
        }
        Exp::LetPat(pat, rhs, body, span) => {
            let rhs = walk_boxed(m, rhs)?;
            let pat = m.map_pattern(pat)?;
            let body = walk_boxed(m, body)?;
            Exp::LetPat(pat, rhs, body, span)
        }
        Exp::LetWith {
            dest,
            src,
            idxs,
            value,
            body,
            span,
        } => {
            let src = m.map_ident(src)?;
            let idxs = walk_exps(m, idxs)?;
            let value = walk_boxed(m, value)?;
            let dest = m.map_binder(dest)?;
            let body = walk_boxed(m, body)?;
            Exp::LetWith {
                dest,
                src,
                idxs,
                value,
                body,
                span,
            }
        }
        Exp::Index(arr, idxs, span) => {
            let arr = m.map_ident(arr)?;
            Exp::Index(arr, walk_exps(m, idxs)?, span)
        }
        Exp::Iota(e, span) => Exp::Iota(walk_boxed(m, e)?, span),
        Exp::Size(e, span) => Exp::Size(walk_boxed(m, e)?, span),
        Exp::Replicate(n, v, span) => {
            let n = walk_boxed(m, n)?;
            Exp::Replicate(n, walk_boxed(m, v)?, span)
        }
        Exp::Transpose(e, span) => Exp::Transpose(walk_boxed(m, e)?, span),
        Exp::DoLoop {
            merge,
            init,
            ivar,
            bound,
            body,
            rest,
            span,
        } => {
            let init = walk_exps(m, init)?;
            let bound = walk_boxed(m, bound)?;
            let merge = m.map_pattern(merge)?;
            let ivar = m.map_binder(ivar)?;
            let body = walk_boxed(m, body)?;
            let rest = walk_boxed(m, rest)?;
            Exp::DoLoop {
                merge,
                init,
                ivar,
                bound,
                body,
                rest,
                span,
            }
        }
        Exp::Map(lam, arrs, certs, span) => {
            let certs = walk_certs(m, certs)?;
            let lam = m.map_lambda(lam)?;
            Exp::Map(lam, walk_exps(m, arrs)?, certs, span)
        }
        Exp::Reduce(lam, nes, arrs, certs, span) => {
            let certs = walk_certs(m, certs)?;
            let lam = m.map_lambda(lam)?;
            let nes = walk_exps(m, nes)?;
            Exp::Reduce(lam, nes, walk_exps(m, arrs)?, certs, span)
        }
        Exp::Scan(lam, nes, arrs, certs, span) => {
            let certs = walk_certs(m, certs)?;
            let lam = m.map_lambda(lam)?;
            let nes = walk_exps(m, nes)?;
            Exp::Scan(lam, nes, walk_exps(m, arrs)?, certs, span)
        }
        Exp::Filter(lam, arrs, certs, span) => {
            let certs = walk_certs(m, certs)?;
            let lam = m.map_lambda(lam)?;
            Exp::Filter(lam, walk_exps(m, arrs)?, certs, span)
        }
        Exp::Redomap(outer, inner, nes, arrs, certs, span) => {
            let certs = walk_certs(m, certs)?;
            let outer = m.map_lambda(outer)?;
            let inner = m.map_lambda(inner)?;
            let nes = walk_exps(m, nes)?;
            Exp::Redomap(outer, inner, nes, walk_exps(m, arrs)?, certs, span)
        }
    })
}
