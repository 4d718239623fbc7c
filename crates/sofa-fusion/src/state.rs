//! The fusion state: a dataflow summary of the code gathered so far.
//!
//! Gathering threads a [`FusionState`] by value through the traversal;
//! every step consumes the previous state and returns the next one. Scoped
//! regions (branches, loop bodies, lambdas) start from an empty state and
//! are merged back with [`FusionState::merge_region`].

use rustc_hash::{FxHashMap, FxHashSet};
use sofa_ir::VName;
use sofa_span::Span;

use crate::error::{FusionError, FusionResult};
use crate::kernel::{Kernel, KernelId};

/// Producer/consumer maps, kernel registry and unfusable names.
#[derive(Clone, Debug, Default)]
pub struct FusionState {
    /// Whether any fusion happened.
    pub(crate) succeeded: bool,
    /// Array name to the kernel that produces it.
    pub(crate) producers: FxHashMap<VName, KernelId>,
    /// Array name to the kernels that read it as a whole array.
    pub(crate) consumers: FxHashMap<VName, FxHashSet<KernelId>>,
    /// Names that must not be fused.
    pub(crate) unfusable: FxHashSet<VName>,
    /// All kernels.
    pub(crate) kernels: FxHashMap<KernelId, Kernel>,
    /// Arrays updated in place within this scope.
    pub(crate) updated: FxHashSet<VName>,
}

impl FusionState {
    /// An empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any producer was fused.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Looks up a kernel; a missing id is a bug in the pass.
    pub fn kernel(&self, id: KernelId, span: Span) -> FusionResult<&Kernel> {
        self.kernels
            .get(&id)
            .ok_or_else(|| FusionError::invariant(span, format!("kernel {id} is not registered")))
    }

    /// The kernel producing `name`, if any.
    #[must_use]
    pub fn producer_of(&self, name: VName) -> Option<KernelId> {
        self.producers.get(&name).copied()
    }

    /// Whether `name` may not be fused.
    #[must_use]
    pub fn is_unfusable(&self, name: VName) -> bool {
        self.unfusable.contains(&name)
    }

    /// Kernels that something was fused into, by id.
    pub fn fused_kernels(&self) -> impl Iterator<Item = &Kernel> {
        let mut ks: Vec<&Kernel> = self.kernels.values().filter(|k| k.is_fused()).collect();
        ks.sort_by_key(|k| k.id);
        ks.into_iter()
    }

    /// The kernels reading any of `names` as a whole array, sorted.
    #[must_use]
    pub(crate) fn candidates(&self, names: &[VName]) -> Vec<KernelId> {
        let mut ids: Vec<KernelId> = names
            .iter()
            .filter_map(|n| self.consumers.get(n))
            .flatten()
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Adds `names` to the unfusable set.
    #[must_use]
    pub(crate) fn with_unfusable(mut self, names: impl IntoIterator<Item = VName>) -> Self {
        self.unfusable.extend(names);
        self
    }

    /// Records an in-place update of `name`: every kernel gathered so far
    /// runs after it.
    #[must_use]
    pub(crate) fn with_update(mut self, name: VName) -> Self {
        for kernel in self.kernels.values_mut() {
            kernel.inplace.insert(name);
        }
        self.updated.insert(name);
        self
    }

    /// Union of two states over disjoint code.
    #[must_use]
    pub(crate) fn union(mut self, other: Self) -> Self {
        self.succeeded |= other.succeeded;
        self.producers.extend(other.producers);
        for (name, ks) in other.consumers {
            self.consumers.entry(name).or_default().extend(ks);
        }
        self.unfusable.extend(other.unfusable);
        self.kernels.extend(other.kernels);
        self.updated.extend(other.updated);
        self
    }

    /// Union of the states of the two arms of a conditional.
    ///
    /// A name known to both arms with different kernels behind it is used
    /// along both control paths and becomes unfusable.
    #[must_use]
    pub(crate) fn union_branches(then_state: Self, else_state: Self) -> Self {
        let mut conflicts: Vec<VName> = then_state
            .consumers
            .iter()
            .filter(|(name, ks)| else_state.consumers.get(*name).is_some_and(|other| other != *ks))
            .map(|(name, _)| *name)
            .collect();
        conflicts.extend(
            then_state
                .producers
                .iter()
                .filter(|(name, k)| else_state.producers.get(*name).is_some_and(|other| other != *k))
                .map(|(name, _)| *name),
        );
        then_state.union(else_state).with_unfusable(conflicts)
    }

    /// Merges the state of a scoped region into the state of the code after
    /// it. `escaping` are names the region reads that must not be fused
    /// from outside. In-place updates inside the region happen before every
    /// kernel of `self`.
    ///
    /// A name read whole by kernels on both sides of the region boundary
    /// becomes unfusable, as it would in a straight line of bindings.
    #[must_use]
    pub(crate) fn merge_region(
        mut self,
        region: Self,
        escaping: impl IntoIterator<Item = VName>,
    ) -> Self {
        for &name in &region.updated {
            self = self.with_update(name);
        }
        let shared: Vec<VName> = region
            .consumers
            .iter()
            .filter(|(name, ks)| {
                self.consumers
                    .get(*name)
                    .is_some_and(|outer| !outer.is_empty() && outer != *ks)
            })
            .map(|(name, _)| *name)
            .collect();
        self.union(region)
            .with_unfusable(escaping)
            .with_unfusable(shared)
    }

    /// Drops kernels nothing was fused into and checks the invariants.
    pub(crate) fn clean(mut self, span: Span) -> FusionResult<Self> {
        let dead: FxHashSet<KernelId> = self
            .kernels
            .values()
            .filter(|k| !k.is_fused())
            .map(|k| k.id)
            .collect();
        self.kernels.retain(|id, _| !dead.contains(id));
        self.producers.retain(|_, id| !dead.contains(id));
        for ks in self.consumers.values_mut() {
            ks.retain(|id| !dead.contains(id));
        }
        self.consumers.retain(|_, ks| !ks.is_empty());
        self.check_invariants(span)?;
        Ok(self)
    }

    /// Every referenced kernel exists, and no producer output that was
    /// fused away is unfusable.
    pub(crate) fn check_invariants(&self, span: Span) -> FusionResult<()> {
        for (name, &id) in &self.producers {
            let kernel = self.kernel(id, span)?;
            if !kernel.pattern.iter().any(|p| p.name == *name) && self.is_unfusable(*name) {
                return Err(FusionError::invariant(
                    span,
                    format!("{name} was fused into {id} but is unfusable"),
                ));
            }
        }
        for ks in self.consumers.values() {
            for &id in ks {
                self.kernel(id, span)?;
            }
        }
        Ok(())
    }
}
