//! Fresh name generation.

use crate::{FunDef, Ident, Type, VName};

/// A single-owner supply of fresh [`VName`]s.
///
/// Tags handed out are strictly increasing, so names are unique as long as
/// the source starts above every tag already present. Passes take the
/// source by `&mut` and thread it through every phase that synthesizes
/// names.
#[derive(Clone, Debug)]
pub struct NameSource {
    next: u32,
}

impl Default for NameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NameSource {
    /// A source starting at tag 1.
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// A source whose first tag is `next`.
    #[must_use]
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// A source whose names cannot clash with any name in `fun`.
    #[must_use]
    pub fn for_fun(fun: &FunDef) -> Self {
        let mut max = 0;
        for p in &fun.params {
            max = max.max(p.name.tag);
        }
        fun.body.for_each_ident(&mut |id| max = max.max(id.name.tag));
        Self::starting_at(max.saturating_add(1))
    }

    /// The tag the next fresh name will get.
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// A fresh name with base `hint`.
    pub fn fresh(&mut self, hint: &str) -> VName {
        let tag = self.next;
        self.next += 1;
        VName::new(hint, tag)
    }

    /// A fresh name with the same base as `name`.
    pub fn fresh_like(&mut self, name: VName) -> VName {
        let tag = self.next;
        self.next += 1;
        VName {
            base: name.base,
            tag,
        }
    }

    /// A fresh identifier with base `hint` and type `ty`.
    pub fn ident(&mut self, hint: &str, ty: Type) -> Ident {
        Ident::new(self.fresh(hint), ty)
    }

    /// A fresh identifier with the base name and type of `like`.
    pub fn fresh_ident(&mut self, like: &Ident) -> Ident {
        Ident::new(self.fresh_like(like.name), like.ty.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Exp;
    use sofa_intern::Symbol;
    use sofa_span::Span;

    #[test]
    fn test_fresh_names_are_distinct() {
        let mut ns = NameSource::new();
        let a = ns.fresh("x");
        let b = ns.fresh("x");
        assert_ne!(a, b);
        assert_eq!(a.base, b.base);
    }

    #[test]
    fn test_for_fun_starts_above_existing_tags() {
        let x = Ident::new(VName::new("x", 41), Type::Int);
        let fun = FunDef {
            name: Symbol::intern("f"),
            params: vec![Ident::new(VName::new("p", 3), Type::Int)],
            ret_type: Type::Int,
            body: Exp::let_pat(crate::Pattern::single(x.clone()), Exp::int(1), Exp::var(&x)),
            span: Span::DUMMY,
        };
        let mut ns = NameSource::for_fun(&fun);
        assert_eq!(ns.peek(), 42);
        assert_eq!(ns.fresh("y").tag, 42);
    }
}
