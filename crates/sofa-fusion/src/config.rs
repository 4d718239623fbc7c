//! Fusion configuration.

use serde::{Deserialize, Serialize};

/// Optimization level, as selected by `-O`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptLevel {
    /// No optimization (`-O0`).
    None,
    /// Basic optimization (`-O1`).
    Less,
    /// Standard optimization (`-O2`).
    #[default]
    Default,
    /// Everything (`-O3`).
    Aggressive,
}

impl OptLevel {
    /// Maps a numeric `-O` argument to a level; anything above 3 is 3.
    #[must_use]
    pub fn from_number(n: u8) -> Self {
        match n {
            0 => Self::None,
            1 => Self::Less,
            2 => Self::Default,
            _ => Self::Aggressive,
        }
    }
}

/// Configuration for the fusion pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Run fusion at all.
    pub enabled: bool,
    /// Fuse filters into filters and folds.
    pub filter_fusion: bool,
    /// Treat `replicate(n, v)` as `map(\_ -> v, iota(n))` so it can fuse.
    pub replicate_fusion: bool,
    /// Normalize maps over transposed arrays so producers can fuse into
    /// them, re-transposing the result afterwards.
    pub transpose_pull: bool,
    /// Fuse independent functions on the rayon thread pool.
    pub parallel: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter_fusion: true,
            replicate_fusion: true,
            transpose_pull: true,
            parallel: true,
        }
    }
}

impl FusionConfig {
    /// Creates a configuration for the given optimization level.
    #[must_use]
    pub fn from_opt_level(level: OptLevel) -> Self {
        match level {
            OptLevel::None => Self {
                enabled: false,
                filter_fusion: false,
                replicate_fusion: false,
                transpose_pull: false,
                parallel: false,
            },
            OptLevel::Less => Self {
                filter_fusion: false,
                transpose_pull: false,
                ..Self::default()
            },
            OptLevel::Default | OptLevel::Aggressive => Self::default(),
        }
    }

    /// Same configuration, run sequentially.
    #[must_use]
    pub fn sequential(self) -> Self {
        Self {
            parallel: false,
            ..self
        }
    }
}
