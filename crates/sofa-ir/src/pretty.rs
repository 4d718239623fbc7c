//! Pretty-printing for the IR.
//!
//! Renders programs in a small ML-like concrete syntax. The output is for
//! people (debug logs, `sofa print`), not meant to be parsed back.

use std::fmt;

use crate::{BinOp, Certificates, Exp, FunDef, Ident, Lambda, Literal, Pattern, Program, Type, VName};

const INDENT: usize = 2;

impl fmt::Display for VName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.tag)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Real => f.write_str("real"),
            Type::Bool => f.write_str("bool"),
            Type::Char => f.write_str("char"),
            Type::Tuple(tys) => {
                f.write_str("(")?;
                write_sep(f, tys, ", ")?;
                f.write_str(")")
            }
            Type::Array(elem) => write!(f, "[{elem}]"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Real(x) => write!(f, "{x:?}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Char(c) => write!(f, "{c:?}"),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Times => "*",
            BinOp::Divide => "/",
            BinOp::Mod => "%",
            BinOp::Equal => "==",
            BinOp::NotEqual => "!=",
            BinOp::Less => "<",
            BinOp::Leq => "<=",
            BinOp::Greater => ">",
            BinOp::Geq => ">=",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
            BinOp::Min => "`min`",
            BinOp::Max => "`max`",
        })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.idents.as_slice() {
            [single] => write!(f, "{}", single.name),
            idents => {
                f.write_str("(")?;
                write_sep(f, idents.iter().map(|id| id.name), ", ")?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_exp(f, self, 0, 0)
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_lambda(f, self, 0)
    }
}

impl fmt::Display for FunDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fun {}(", self.name)?;
        write_sep(f, &self.params, ", ")?;
        write!(f, "): {} =", self.ret_type)?;
        newline(f, INDENT)?;
        write_exp(f, &self.body, INDENT, 0)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fun) in self.funs.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{fun}")?;
        }
        Ok(())
    }
}

fn write_sep<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl IntoIterator<Item = T>,
    sep: &str,
) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn newline(f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    write!(f, "\n{:indent$}", "")
}

fn write_args(f: &mut fmt::Formatter<'_>, es: &[Exp], indent: usize) -> fmt::Result {
    for (i, e) in es.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_exp(f, e, indent, 0)?;
    }
    Ok(())
}

fn write_certs(f: &mut fmt::Formatter<'_>, certs: &Certificates) -> fmt::Result {
    if certs.0.is_empty() {
        return Ok(());
    }
    f.write_str("<")?;
    write_sep(f, certs.0.iter().map(|c| c.name), ", ")?;
    f.write_str(">")
}

fn write_lambda(f: &mut fmt::Formatter<'_>, lam: &Lambda, indent: usize) -> fmt::Result {
    f.write_str("fn (")?;
    write_sep(f, &lam.params, ", ")?;
    write!(f, "): {} =>", Type::of_results(&lam.ret_types))?;
    newline(f, indent + INDENT)?;
    write_exp(f, &lam.body, indent + INDENT, 0)
}

/// Write an expression at the given indentation and precedence.
///
/// Precedence levels:
/// - 0: statement position (lets and loops print unparenthesized)
/// - 1: operand of a binary operator
/// - 2: operand of a prefix operator
fn write_exp(f: &mut fmt::Formatter<'_>, exp: &Exp, indent: usize, prec: u8) -> fmt::Result {
    match exp {
        Exp::Literal(lit, _) => write!(f, "{lit}"),

        Exp::Var(id, _) => write!(f, "{}", id.name),

        Exp::TupLit(es, _) => {
            f.write_str("(")?;
            write_args(f, es, indent)?;
            f.write_str(")")
        }

        Exp::ArrayLit(es, _, _) => {
            f.write_str("[")?;
            write_args(f, es, indent)?;
            f.write_str("]")
        }

        Exp::BinOp(op, a, b, _, _) => {
            let parens = prec > 0;
            if parens {
                f.write_str("(")?;
            }
            write_exp(f, a, indent, 1)?;
            write!(f, " {op} ")?;
            write_exp(f, b, indent, 1)?;
            if parens {
                f.write_str(")")?;
            }
            Ok(())
        }

        Exp::Not(e, _) => {
            f.write_str("!")?;
            write_exp(f, e, indent, 2)
        }

        Exp::Negate(e, _) => {
            f.write_str("-")?;
            write_exp(f, e, indent, 2)
        }

        Exp::If(c, t, e, _, _) => {
            f.write_str("if ")?;
            write_exp(f, c, indent, 0)?;
            f.write_str(" then")?;
            newline(f, indent + INDENT)?;
            write_exp(f, t, indent + INDENT, 0)?;
            newline(f, indent)?;
            f.write_str("else")?;
            newline(f, indent + INDENT)?;
            write_exp(f, e, indent + INDENT, 0)
        }

        Exp::Apply(fname, args, _, _) => {
            write!(f, "{fname}(")?;
            write_args(f, args, indent)?;
            f.write_str(")")
        }

        Exp::LetPat(pat, rhs, body, _) => {
            write!(f, "let {pat} = ")?;
            write_exp(f, rhs, indent, 0)?;
            f.write_str(" in")?;
            newline(f, indent)?;
            write_exp(f, body, indent, 0)
        }

        Exp::LetWith {
            dest,
            src,
            idxs,
            value,
            body,
            ..
        } => {
            write!(f, "let {} = {} with [", dest.name, src.name)?;
            write_args(f, idxs, indent)?;
            f.write_str("] <- ")?;
            write_exp(f, value, indent, 0)?;
            f.write_str(" in")?;
            newline(f, indent)?;
            write_exp(f, body, indent, 0)
        }

        Exp::Index(arr, idxs, _) => {
            write!(f, "{}[", arr.name)?;
            write_args(f, idxs, indent)?;
            f.write_str("]")
        }

        Exp::Iota(e, _) => {
            f.write_str("iota(")?;
            write_exp(f, e, indent, 0)?;
            f.write_str(")")
        }

        Exp::Size(e, _) => {
            f.write_str("size(")?;
            write_exp(f, e, indent, 0)?;
            f.write_str(")")
        }

        Exp::Replicate(n, v, _) => {
            f.write_str("replicate(")?;
            write_exp(f, n, indent, 0)?;
            f.write_str(", ")?;
            write_exp(f, v, indent, 0)?;
            f.write_str(")")
        }

        Exp::Transpose(e, _) => {
            f.write_str("transpose(")?;
            write_exp(f, e, indent, 0)?;
            f.write_str(")")
        }

        Exp::DoLoop {
            merge,
            init,
            ivar,
            bound,
            body,
            rest,
            ..
        } => {
            write!(f, "loop ({merge} = (")?;
            write_args(f, init, indent)?;
            write!(f, ")) for {} < ", ivar.name)?;
            write_exp(f, bound, indent, 0)?;
            f.write_str(" do")?;
            newline(f, indent + INDENT)?;
            write_exp(f, body, indent + INDENT, 0)?;
            newline(f, indent)?;
            f.write_str("in")?;
            newline(f, indent)?;
            write_exp(f, rest, indent, 0)
        }

        Exp::Map(lam, arrs, certs, _) => {
            f.write_str("map")?;
            write_certs(f, certs)?;
            f.write_str("(")?;
            write_lambda(f, lam, indent)?;
            f.write_str(", ")?;
            write_args(f, arrs, indent)?;
            f.write_str(")")
        }

        Exp::Reduce(lam, nes, arrs, certs, _) | Exp::Scan(lam, nes, arrs, certs, _) => {
            f.write_str(if matches!(exp, Exp::Reduce(..)) {
                "reduce"
            } else {
                "scan"
            })?;
            write_certs(f, certs)?;
            f.write_str("(")?;
            write_lambda(f, lam, indent)?;
            f.write_str(", (")?;
            write_args(f, nes, indent)?;
            f.write_str("), ")?;
            write_args(f, arrs, indent)?;
            f.write_str(")")
        }

        Exp::Filter(lam, arrs, certs, _) => {
            f.write_str("filter")?;
            write_certs(f, certs)?;
            f.write_str("(")?;
            write_lambda(f, lam, indent)?;
            f.write_str(", ")?;
            write_args(f, arrs, indent)?;
            f.write_str(")")
        }

        Exp::Redomap(outer, inner, nes, arrs, certs, _) => {
            f.write_str("redomap")?;
            write_certs(f, certs)?;
            f.write_str("(")?;
            write_lambda(f, outer, indent)?;
            f.write_str(", ")?;
            write_lambda(f, inner, indent)?;
            f.write_str(", (")?;
            write_args(f, nes, indent)?;
            f.write_str("), ")?;
            write_args(f, arrs, indent)?;
            f.write_str(")")
        }
    }
}
