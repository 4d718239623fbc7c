//! What the pass decided, per binding and per function.

use std::fmt;

use sofa_intern::Symbol;
use sofa_ir::VName;

use crate::error::FusionError;
use crate::kernel::KernelId;
use crate::soac::SoacKind;

/// Why a SOAC binding was not fused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockReason {
    /// One of its outputs is used outside a fusable consumer.
    Unfusable,
    /// Nothing consumes its outputs as whole arrays.
    NoConsumers,
    /// Some consumer has a kind, or reads the outputs in a way, it cannot
    /// be fused into.
    IncompatibleKind,
    /// An array it reads is updated in place before some consumer runs.
    InPlaceHazard,
    /// The composer declined one of the candidates.
    CompositionDeclined,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unfusable => "output used outside a fusable consumer",
            Self::NoConsumers => "no consumers",
            Self::IncompatibleKind => "incompatible consumer",
            Self::InPlaceHazard => "input updated in place before a consumer",
            Self::CompositionDeclined => "composition declined",
        })
    }
}

/// The decision taken for one SOAC binding.
#[derive(Clone, Debug, PartialEq)]
pub enum FusionDecision {
    /// The binding was fused into every listed kernel and will disappear.
    Fused {
        /// Outputs of the fused binding.
        producer: Vec<VName>,
        /// Kind of the fused SOAC.
        kind: SoacKind,
        /// The kernels it went into.
        into: Vec<KernelId>,
    },
    /// The binding stays.
    Standalone {
        /// Outputs of the binding.
        outputs: Vec<VName>,
        /// Its kind.
        kind: SoacKind,
        /// The kernel registered for it, if any.
        kernel: Option<KernelId>,
        /// Why it was not fused.
        reason: BlockReason,
    },
}

impl FusionDecision {
    /// Whether the binding was fused.
    #[must_use]
    pub fn is_fused(&self) -> bool {
        matches!(self, Self::Fused { .. })
    }
}

fn write_names(f: &mut fmt::Formatter<'_>, names: &[VName]) -> fmt::Result {
    for (i, n) in names.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{n}")?;
    }
    Ok(())
}

impl fmt::Display for FusionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fused {
                producer,
                kind,
                into,
            } => {
                write!(f, "fused {kind} ")?;
                write_names(f, producer)?;
                f.write_str(" into ")?;
                for (i, k) in into.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}")?;
                }
                Ok(())
            }
            Self::Standalone {
                outputs,
                kind,
                reason,
                ..
            } => {
                write!(f, "kept {kind} ")?;
                write_names(f, outputs)?;
                write!(f, ": {reason}")
            }
        }
    }
}

/// The outcome of fusing one function.
#[derive(Clone, Debug)]
pub struct FunctionReport {
    /// The function.
    pub name: Symbol,
    /// Whether its body was rewritten.
    pub changed: bool,
    /// Kernels that something was fused into.
    pub kernels: usize,
    /// Per-binding decisions, in the order they were taken.
    pub decisions: Vec<FusionDecision>,
    /// Set when fusion of this function was abandoned.
    pub error: Option<FusionError>,
}

impl FunctionReport {
    /// Number of bindings that were fused away.
    #[must_use]
    pub fn fused_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_fused()).count()
    }
}

/// The outcome of fusing a whole program.
#[derive(Clone, Debug, Default)]
pub struct FusionReport {
    /// One entry per function, in program order.
    pub functions: Vec<FunctionReport>,
}

impl FusionReport {
    /// Functions whose bodies changed.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.functions.iter().filter(|f| f.changed).count()
    }

    /// Bindings fused away across the program.
    #[must_use]
    pub fn fused_count(&self) -> usize {
        self.functions.iter().map(FunctionReport::fused_count).sum()
    }

    /// Functions left unfused because of an error.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.functions.iter().filter(|f| f.error.is_some()).count()
    }

    /// The report for `name`.
    #[must_use]
    pub fn function(&self, name: Symbol) -> Option<&FunctionReport> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for FusionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fun in &self.functions {
            let status = match (&fun.error, fun.changed) {
                (Some(_), _) => "skipped",
                (None, true) => "fused",
                (None, false) => "unchanged",
            };
            writeln!(f, "{}: {status}", fun.name)?;
            if let Some(err) = &fun.error {
                writeln!(f, "  error: {err}")?;
            }
            for d in &fun.decisions {
                writeln!(f, "  {d}")?;
            }
        }
        write!(
            f,
            "{} bindings fused in {} of {} functions",
            self.fused_count(),
            self.changed_count(),
            self.functions.len()
        )?;
        if self.error_count() > 0 {
            write!(f, ", {} skipped", self.error_count())?;
        }
        Ok(())
    }
}
