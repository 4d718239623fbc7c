//! Alpha-renaming.
//!
//! Names are unique within a function. Inlining one lambda body into two
//! places would break that, so the second copy gets every binder renamed
//! with fresh names first.

use std::convert::Infallible;

use rustc_hash::FxHashMap;

use crate::visit::{walk_ident, Mapper};
use crate::{Ident, Lambda, NameSource, VName};

/// Renames every binder it meets to a fresh name, and every use of a
/// renamed binder accordingly. Free names are left alone.
struct Freshen<'a> {
    names: &'a mut NameSource,
    renames: FxHashMap<VName, VName>,
}

impl Mapper for Freshen<'_> {
    type Error = Infallible;

    fn map_binder(&mut self, ident: Ident) -> Result<Ident, Infallible> {
        let fresh = self.names.fresh_like(ident.name);
        self.renames.insert(ident.name, fresh);
        Ok(Ident::new(fresh, ident.ty))
    }

    fn map_ident(&mut self, ident: Ident) -> Result<Ident, Infallible> {
        let ident = walk_ident(self, ident)?;
        Ok(match self.renames.get(&ident.name) {
            Some(&name) => Ident::new(name, ident.ty),
            None => ident,
        })
    }
}

/// A copy of `lam` in which every parameter and every name bound inside the
/// body is replaced by a fresh one.
pub fn freshen_lambda(lam: Lambda, names: &mut NameSource) -> Lambda {
    let mut freshen = Freshen {
        names,
        renames: FxHashMap::default(),
    };
    match freshen.map_lambda(lam) {
        Ok(lam) => lam,
        Err(never) => match never {},
    }
}
