//! Free variable computation.

use crate::{Exp, Ident, Lambda, VName};

impl Exp {
    /// The free variables of this expression, in order of first occurrence.
    ///
    /// Certificates count as uses.
    #[must_use]
    pub fn free_vars(&self) -> Vec<Ident> {
        let mut free = Vec::new();
        let mut bound = Vec::new();
        self.collect_free_vars(&mut free, &mut bound);
        free
    }

    fn collect_free_vars(&self, free: &mut Vec<Ident>, bound: &mut Vec<VName>) {
        match self {
            Self::Literal(..) => {}
            Self::Var(id, _) => use_ident(id, free, bound),
            Self::TupLit(es, _) | Self::ArrayLit(es, _, _) | Self::Apply(_, es, _, _) => {
                for e in es {
                    e.collect_free_vars(free, bound);
                }
            }
            Self::BinOp(_, a, b, _, _) | Self::Replicate(a, b, _) => {
                a.collect_free_vars(free, bound);
                b.collect_free_vars(free, bound);
            }
            Self::Not(e, _)
            | Self::Negate(e, _)
            | Self::Iota(e, _)
            | Self::Size(e, _)
            | Self::Transpose(e, _) => e.collect_free_vars(free, bound),
            Self::If(c, t, e, _, _) => {
                c.collect_free_vars(free, bound);
                t.collect_free_vars(free, bound);
                e.collect_free_vars(free, bound);
            }
            Self::LetPat(pat, rhs, body, _) => {
                rhs.collect_free_vars(free, bound);
                let mark = bound.len();
                bound.extend(pat.names());
                body.collect_free_vars(free, bound);
                bound.truncate(mark);
            }
            Self::LetWith {
                dest,
                src,
                idxs,
                value,
                body,
                ..
            } => {
                use_ident(src, free, bound);
                for e in idxs {
                    e.collect_free_vars(free, bound);
                }
                value.collect_free_vars(free, bound);
                bound.push(dest.name);
                body.collect_free_vars(free, bound);
                bound.pop();
            }
            Self::Index(arr, idxs, _) => {
                use_ident(arr, free, bound);
                for e in idxs {
                    e.collect_free_vars(free, bound);
                }
            }
            Self::DoLoop {
                merge,
                init,
                ivar,
                bound: n,
                body,
                rest,
                ..
            } => {
                for e in init {
                    e.collect_free_vars(free, bound);
                }
                n.collect_free_vars(free, bound);
                let mark = bound.len();
                bound.extend(merge.names());
                bound.push(ivar.name);
                body.collect_free_vars(free, bound);
                bound.pop();
                rest.collect_free_vars(free, bound);
                bound.truncate(mark);
            }
            Self::Map(lam, arrs, certs, _) | Self::Filter(lam, arrs, certs, _) => {
                for c in &certs.0 {
                    use_ident(c, free, bound);
                }
                lam.collect_free_vars(free, bound);
                for e in arrs {
                    e.collect_free_vars(free, bound);
                }
            }
            Self::Reduce(lam, nes, arrs, certs, _) | Self::Scan(lam, nes, arrs, certs, _) => {
                for c in &certs.0 {
                    use_ident(c, free, bound);
                }
                lam.collect_free_vars(free, bound);
                for e in nes.iter().chain(arrs) {
                    e.collect_free_vars(free, bound);
                }
            }
            Self::Redomap(outer, inner, nes, arrs, certs, _) => {
                for c in &certs.0 {
                    use_ident(c, free, bound);
                }
                outer.collect_free_vars(free, bound);
                inner.collect_free_vars(free, bound);
                for e in nes.iter().chain(arrs) {
                    e.collect_free_vars(free, bound);
                }
            }
        }
    }
}

impl Lambda {
    /// The free variables of the lambda: those of the body minus the
    /// parameters.
    #[must_use]
    pub fn free_vars(&self) -> Vec<Ident> {
        let mut free = Vec::new();
        let mut bound = Vec::new();
        self.collect_free_vars(&mut free, &mut bound);
        free
    }

    fn collect_free_vars(&self, free: &mut Vec<Ident>, bound: &mut Vec<VName>) {
        let mark = bound.len();
        bound.extend(self.params.iter().map(|p| p.name));
        self.body.collect_free_vars(free, bound);
        bound.truncate(mark);
    }
}

fn use_ident(id: &Ident, free: &mut Vec<Ident>, bound: &[VName]) {
    if !bound.contains(&id.name) && !free.iter().any(|fv| fv.name == id.name) {
        free.push(id.clone());
    }
}
