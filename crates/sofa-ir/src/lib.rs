//! # Sofa IR
//!
//! The typed, normalized array IR that the fusion pass operates on.
//!
//! ## Overview
//!
//! The IR is a first-order expression language with:
//!
//! - **Typed identifiers**: every binder carries its type, so arrays can be
//!   told apart from scalars without re-running inference
//! - **Unique names**: a [`VName`] pairs a base symbol with a numeric tag
//!   that is unique within a function
//! - **Second-order array combinators** (SOACs): `map`, `reduce`, `scan`,
//!   `filter` and `redomap`, each taking lambdas and array arguments
//! - **In-place updates**: `let b = a with [i] <- v in ...` consumes `a`
//!
//! ## Normal Form
//!
//! Passes downstream of the front end expect programs where every SOAC is
//! the direct right-hand side of a `let`. Nothing in this crate enforces it;
//! the fusion pass reports a violation when it meets one.
//!
//! ## Main Types
//!
//! - [`Exp`]: expressions
//! - [`Lambda`]: anonymous functions passed to SOACs
//! - [`Ident`]: a name together with its type
//! - [`FunDef`] and [`Program`]: top-level definitions
//!
//! ## See Also
//!
//! - [`visit::Mapper`]: the generic bottom-up rewriting traversal
//! - [`eval`]: a reference interpreter used to check transformations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod eval;
mod free;
mod names;
pub mod pretty;
pub mod rename;
pub mod visit;

pub use names::NameSource;

use serde::{Deserialize, Serialize};
use sofa_intern::Symbol;
use sofa_span::Span;

/// A variable name: a base symbol plus a tag unique within its function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VName {
    /// The user-facing part of the name.
    pub base: Symbol,
    /// Disambiguating tag.
    pub tag: u32,
}

impl VName {
    /// Creates a name from a base string and tag.
    #[must_use]
    pub fn new(base: &str, tag: u32) -> Self {
        Self {
            base: Symbol::intern(base),
            tag,
        }
    }
}

/// A name together with its type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ident {
    /// The name.
    pub name: VName,
    /// The type of the bound value.
    pub ty: Type,
}

impl Ident {
    /// Creates a new identifier.
    #[must_use]
    pub fn new(name: VName, ty: Type) -> Self {
        Self { name, ty }
    }

    /// Whether this identifier is array-typed.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.ty.is_array()
    }
}

/// Value types.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// 64-bit signed integers.
    Int,
    /// 64-bit floats.
    Real,
    /// Booleans.
    Bool,
    /// Characters.
    Char,
    /// Tuples of the given component types.
    Tuple(Vec<Type>),
    /// Arrays whose rows have the given type.
    Array(Box<Type>),
}

impl Type {
    /// The array type with rows of type `elem`.
    #[must_use]
    pub fn array(elem: Type) -> Self {
        Self::Array(Box::new(elem))
    }

    /// Whether this is an array type.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// The row type of an array, or `None` for non-arrays.
    #[must_use]
    pub fn row_type(&self) -> Option<&Type> {
        match self {
            Self::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Number of array dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Self::Array(elem) => 1 + elem.rank(),
            _ => 0,
        }
    }

    /// The type of an expression returning `tys`: the single type, or a
    /// tuple of them.
    #[must_use]
    pub fn of_results(tys: &[Type]) -> Self {
        match tys {
            [ty] => ty.clone(),
            _ => Self::Tuple(tys.to_vec()),
        }
    }
}

/// Literal values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Real(f64),
    /// Boolean literal.
    Bool(bool),
    /// Character literal.
    Char(char),
}

impl Literal {
    /// The type of this literal.
    #[must_use]
    pub fn ty(self) -> Type {
        match self {
            Self::Int(_) => Type::Int,
            Self::Real(_) => Type::Real,
            Self::Bool(_) => Type::Bool,
            Self::Char(_) => Type::Char,
        }
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Times,
    /// `/`
    Divide,
    /// `%`
    Mod,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    Leq,
    /// `>`
    Greater,
    /// `>=`
    Geq,
    /// `&&`
    LogAnd,
    /// `||`
    LogOr,
    /// `min`
    Min,
    /// `max`
    Max,
}

/// The names bound by a `let`, in order.
///
/// A single identifier binds the whole value; several identifiers
/// destructure a tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pattern {
    /// Bound identifiers.
    pub idents: Vec<Ident>,
}

impl Pattern {
    /// A pattern binding the given identifiers.
    #[must_use]
    pub fn new(idents: Vec<Ident>) -> Self {
        Self { idents }
    }

    /// A pattern binding one identifier.
    #[must_use]
    pub fn single(ident: Ident) -> Self {
        Self {
            idents: vec![ident],
        }
    }

    /// The bound names.
    pub fn names(&self) -> impl Iterator<Item = VName> + '_ {
        self.idents.iter().map(|id| id.name)
    }

    /// Number of bound identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.idents.len()
    }

    /// Whether the pattern binds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.idents.is_empty()
    }
}

/// Safety certificates attached to a SOAC.
///
/// They witness checks (bounds, sizes) already performed on the inputs and
/// are carried through transformations without being interpreted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certificates(pub Vec<Ident>);

impl Certificates {
    /// No certificates.
    #[must_use]
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// The certificates of both, without duplicates, `self` first.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut certs = self.0.clone();
        for cert in &other.0 {
            if !certs.iter().any(|c| c.name == cert.name) {
                certs.push(cert.clone());
            }
        }
        Self(certs)
    }
}

/// An anonymous function passed to a SOAC.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    /// Parameters in order.
    pub params: Vec<Ident>,
    /// The body.
    pub body: Box<Exp>,
    /// Declared result types; a body returning several values produces a
    /// tuple literal of that many components.
    pub ret_types: Vec<Type>,
}

impl Lambda {
    /// Creates a lambda.
    #[must_use]
    pub fn new(params: Vec<Ident>, body: Exp, ret_types: Vec<Type>) -> Self {
        Self {
            params,
            body: Box::new(body),
            ret_types,
        }
    }
}

/// Expressions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Exp {
    /// A literal.
    Literal(Literal, Span),

    /// A variable reference.
    Var(Ident, Span),

    /// A tuple: `(e1, ..., en)`.
    TupLit(Vec<Exp>, Span),

    /// An array literal with the given row type.
    ArrayLit(Vec<Exp>, Type, Span),

    /// A binary operation with its result type.
    BinOp(BinOp, Box<Exp>, Box<Exp>, Type, Span),

    /// Boolean negation.
    Not(Box<Exp>, Span),

    /// Numeric negation.
    Negate(Box<Exp>, Span),

    /// `if c then t else f`, with the branch type.
    If(Box<Exp>, Box<Exp>, Box<Exp>, Type, Span),

    /// Call of a top-level function with its result type.
    Apply(Symbol, Vec<Exp>, Type, Span),

    /// `let pat = rhs in body`.
    LetPat(Pattern, Box<Exp>, Box<Exp>, Span),

    /// In-place update: `let dest = src with [idxs] <- value in body`.
    ///
    /// `src` must not be used after this point.
    LetWith {
        /// The updated array.
        dest: Ident,
        /// The consumed array.
        src: Ident,
        /// Index into `src`.
        idxs: Vec<Exp>,
        /// The written value.
        value: Box<Exp>,
        /// Scope of `dest`.
        body: Box<Exp>,
        /// Source location.
        span: Span,
    },

    /// Array indexing: `a[i, j, ...]`.
    Index(Ident, Vec<Exp>, Span),

    /// `iota(n)`: the array `[0, ..., n-1]`.
    Iota(Box<Exp>, Span),

    /// Outer size of an array.
    Size(Box<Exp>, Span),

    /// `replicate(n, v)`: an array of `n` copies of `v`.
    Replicate(Box<Exp>, Box<Exp>, Span),

    /// Transposition of the two outer dimensions.
    Transpose(Box<Exp>, Span),

    /// Sequential loop:
    /// `loop (merge = init) for ivar < bound do body in rest`.
    DoLoop {
        /// Loop-carried values.
        merge: Pattern,
        /// Initial values of `merge`.
        init: Vec<Exp>,
        /// Iteration counter.
        ivar: Ident,
        /// Number of iterations.
        bound: Box<Exp>,
        /// Computes the next `merge` values.
        body: Box<Exp>,
        /// Scope of the final `merge` values.
        rest: Box<Exp>,
        /// Source location.
        span: Span,
    },

    /// `map(f, a1, ..., an)`.
    Map(Lambda, Vec<Exp>, Certificates, Span),

    /// `reduce(op, neutral, arrays)`.
    Reduce(Lambda, Vec<Exp>, Vec<Exp>, Certificates, Span),

    /// `scan(op, neutral, arrays)`: inclusive prefix fold.
    Scan(Lambda, Vec<Exp>, Vec<Exp>, Certificates, Span),

    /// `filter(pred, arrays)`.
    Filter(Lambda, Vec<Exp>, Certificates, Span),

    /// `redomap(outer, inner, neutral, arrays)`: folds each element into
    /// the accumulator with `inner`; `outer` combines partial results.
    Redomap(Lambda, Lambda, Vec<Exp>, Vec<Exp>, Certificates, Span),
}

impl Exp {
    /// Returns the source span of this expression.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Literal(_, span)
            | Self::Var(_, span)
            | Self::TupLit(_, span)
            | Self::ArrayLit(_, _, span)
            | Self::BinOp(_, _, _, _, span)
            | Self::Not(_, span)
            | Self::Negate(_, span)
            | Self::If(_, _, _, _, span)
            | Self::Apply(_, _, _, span)
            | Self::LetPat(_, _, _, span)
            | Self::LetWith { span, .. }
            | Self::Index(_, _, span)
            | Self::Iota(_, span)
            | Self::Size(_, span)
            | Self::Replicate(_, _, span)
            | Self::Transpose(_, span)
            | Self::DoLoop { span, .. }
            | Self::Map(_, _, _, span)
            | Self::Reduce(_, _, _, _, span)
            | Self::Scan(_, _, _, _, span)
            | Self::Filter(_, _, _, span)
            | Self::Redomap(_, _, _, _, _, span) => *span,
        }
    }

    /// Whether this expression is one of the five SOAC forms.
    #[must_use]
    pub fn is_soac(&self) -> bool {
        matches!(
            self,
            Self::Map(..) | Self::Reduce(..) | Self::Scan(..) | Self::Filter(..) | Self::Redomap(..)
        )
    }

    /// A variable reference with a dummy span.
    #[must_use]
    pub fn var(ident: &Ident) -> Self {
        Self::Var(ident.clone(), Span::DUMMY)
    }

    /// An integer literal with a dummy span.
    #[must_use]
    pub fn int(n: i64) -> Self {
        Self::Literal(Literal::Int(n), Span::DUMMY)
    }

    /// A boolean literal with a dummy span.
    #[must_use]
    pub fn bool(b: bool) -> Self {
        Self::Literal(Literal::Bool(b), Span::DUMMY)
    }

    /// `let pat = rhs in body` with a dummy span.
    #[must_use]
    pub fn let_pat(pat: Pattern, rhs: Exp, body: Exp) -> Self {
        Self::LetPat(pat, Box::new(rhs), Box::new(body), Span::DUMMY)
    }

    /// A binary operation with a dummy span.
    #[must_use]
    pub fn binop(op: BinOp, lhs: Exp, rhs: Exp, ty: Type) -> Self {
        Self::BinOp(op, Box::new(lhs), Box::new(rhs), ty, Span::DUMMY)
    }

    /// The results `es` as one expression: the expression itself if there
    /// is exactly one, a tuple otherwise.
    #[must_use]
    pub fn results(mut es: Vec<Exp>) -> Self {
        if es.len() == 1 {
            es.remove(0)
        } else {
            Self::TupLit(es, Span::DUMMY)
        }
    }

    /// Calls `f` on every identifier in the expression, binders included.
    pub fn for_each_ident(&self, f: &mut impl FnMut(&Ident)) {
        match self {
            Self::Literal(..) => {}
            Self::Var(id, _) => f(id),
            Self::TupLit(es, _) | Self::ArrayLit(es, _, _) | Self::Apply(_, es, _, _) => {
                for e in es {
                    e.for_each_ident(f);
                }
            }
            Self::BinOp(_, a, b, _, _) | Self::Replicate(a, b, _) => {
                a.for_each_ident(f);
                b.for_each_ident(f);
            }
            Self::Not(e, _)
            | Self::Negate(e, _)
            | Self::Iota(e, _)
            | Self::Size(e, _)
            | Self::Transpose(e, _) => e.for_each_ident(f),
            Self::If(c, t, e, _, _) => {
                c.for_each_ident(f);
                t.for_each_ident(f);
                e.for_each_ident(f);
            }
            Self::LetPat(pat, rhs, body, _) => {
                pat.idents.iter().for_each(&mut *f);
                rhs.for_each_ident(f);
                body.for_each_ident(f);
            }
            Self::LetWith {
                dest,
                src,
                idxs,
                value,
                body,
                ..
            } => {
                f(dest);
                f(src);
                for e in idxs {
                    e.for_each_ident(f);
                }
                value.for_each_ident(f);
                body.for_each_ident(f);
            }
            Self::Index(arr, idxs, _) => {
                f(arr);
                for e in idxs {
                    e.for_each_ident(f);
                }
            }
            Self::DoLoop {
                merge,
                init,
                ivar,
                bound,
                body,
                rest,
                ..
            } => {
                merge.idents.iter().for_each(&mut *f);
                f(ivar);
                for e in init {
                    e.for_each_ident(f);
                }
                bound.for_each_ident(f);
                body.for_each_ident(f);
                rest.for_each_ident(f);
            }
            Self::Map(lam, arrs, certs, _) | Self::Filter(lam, arrs, certs, _) => {
                certs.0.iter().for_each(&mut *f);
                lam.for_each_ident(f);
                for e in arrs {
                    e.for_each_ident(f);
                }
            }
            Self::Reduce(lam, nes, arrs, certs, _) | Self::Scan(lam, nes, arrs, certs, _) => {
                certs.0.iter().for_each(&mut *f);
                lam.for_each_ident(f);
                for e in nes.iter().chain(arrs) {
                    e.for_each_ident(f);
                }
            }
            Self::Redomap(outer, inner, nes, arrs, certs, _) => {
                certs.0.iter().for_each(&mut *f);
                outer.for_each_ident(f);
                inner.for_each_ident(f);
                for e in nes.iter().chain(arrs) {
                    e.for_each_ident(f);
                }
            }
        }
    }
}

impl Lambda {
    /// Calls `f` on every identifier in the lambda, parameters included.
    pub fn for_each_ident(&self, f: &mut impl FnMut(&Ident)) {
        self.params.iter().for_each(&mut *f);
        self.body.for_each_ident(f);
    }
}

/// A top-level function definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunDef {
    /// Function name.
    pub name: Symbol,
    /// Parameters.
    pub params: Vec<Ident>,
    /// Result type.
    pub ret_type: Type,
    /// The body.
    pub body: Exp,
    /// Source location of the definition.
    pub span: Span,
}

/// A whole program: a list of function definitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// The functions, in definition order.
    pub funs: Vec<FunDef>,
}

impl Program {
    /// Looks up a function by name.
    #[must_use]
    pub fn fun(&self, name: Symbol) -> Option<&FunDef> {
        self.funs.iter().find(|f| f.name == name)
    }
}
