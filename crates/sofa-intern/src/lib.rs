//! String interning for identifiers.
//!
//! Every variable base name and function name in the IR is a [`Symbol`]:
//! a `u32` handle into a process-wide table. Comparing and hashing symbols
//! is a single integer operation, and interned strings live for the rest of
//! the process so [`Symbol::as_str`] can hand out `&'static str`.
//!
//! The table sits behind a `parking_lot::RwLock` because the fusion driver
//! processes functions on a rayon pool; lookups of already-interned strings
//! only take the read lock.

#![warn(missing_docs)]

use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An interned string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

#[derive(Default)]
struct Interner {
    ids: FxHashMap<&'static str, Symbol>,
    strings: Vec<&'static str>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.ids.get(s) {
            return sym;
        }
        // Strings are never freed; identifier sets are small and bounded by
        // program size.
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let sym = Symbol(u32::try_from(self.strings.len()).unwrap_or(u32::MAX));
        self.strings.push(leaked);
        self.ids.insert(leaked, sym);
        sym
    }
}

fn interner() -> &'static RwLock<Interner> {
    static INTERNER: OnceLock<RwLock<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| RwLock::new(Interner::default()))
}

impl Symbol {
    /// Intern `s`, returning its symbol.
    #[must_use]
    pub fn intern(s: &str) -> Self {
        if let Some(&sym) = interner().read().ids.get(s) {
            return sym;
        }
        interner().write().intern(s)
    }

    /// The interned string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        interner()
            .read()
            .strings
            .get(self.0 as usize)
            .copied()
            .unwrap_or("<invalid-symbol>")
    }

    /// The raw table index.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::intern(s)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::intern(&s))
    }
}
