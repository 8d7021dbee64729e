//! Profiling information.
//!
//! The inliner asks three questions of the profile: how often a call site
//! runs, how invocation-heavy a method is, and which receiver types a
//! virtual call site has seen. Every answer may be unknown; the walker
//! substitutes static estimates then.

use rustc_hash::FxHashMap;

use crate::ir::kind::MethodId;
use crate::ir::stamp::TypeId;

/// One observed receiver type of a virtual call site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReceiverEntry {
    pub ty: TypeId,
    /// Fraction of calls that saw this type.
    pub probability: f64,
}

/// Receiver types observed at a virtual call site.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TypeProfile {
    pub entries: Vec<ReceiverEntry>,
    /// Fraction of calls whose receiver type was not recorded.
    pub not_recorded_probability: f64,
}

impl TypeProfile {
    pub fn new(entries: &[(TypeId, f64)], not_recorded_probability: f64) -> Self {
        TypeProfile {
            entries: entries
                .iter()
                .map(|&(ty, probability)| ReceiverEntry { ty, probability })
                .collect(),
            not_recorded_probability,
        }
    }

    /// Every receiver was recorded.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.not_recorded_probability <= 0.0
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source of profile data. Methods return `None` for "unknown".
pub trait ProfileProvider: Send + Sync {
    /// Executions of the call site at `bci` per entry of `caller`.
    fn invoke_probability(&self, caller: MethodId, bci: u32) -> Option<f64>;

    /// Sum of the relative frequencies of the call sites inside `method`.
    fn invoke_density(&self, method: MethodId) -> Option<f64>;

    fn receiver_profile(&self, caller: MethodId, bci: u32) -> Option<TypeProfile>;
}

/// Provider that knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProfile;

impl ProfileProvider for NoProfile {
    fn invoke_probability(&self, _caller: MethodId, _bci: u32) -> Option<f64> {
        None
    }

    fn invoke_density(&self, _method: MethodId) -> Option<f64> {
        None
    }

    fn receiver_profile(&self, _caller: MethodId, _bci: u32) -> Option<TypeProfile> {
        None
    }
}

/// Fixed profile, filled in up front.
#[derive(Debug, Default, Clone)]
pub struct StaticProfile {
    probabilities: FxHashMap<(MethodId, u32), f64>,
    densities: FxHashMap<MethodId, f64>,
    receivers: FxHashMap<(MethodId, u32), TypeProfile>,
}

impl StaticProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probability(mut self, caller: MethodId, bci: u32, probability: f64) -> Self {
        self.probabilities.insert((caller, bci), probability);
        self
    }

    pub fn with_density(mut self, method: MethodId, density: f64) -> Self {
        self.densities.insert(method, density);
        self
    }

    pub fn with_receivers(mut self, caller: MethodId, bci: u32, profile: TypeProfile) -> Self {
        self.receivers.insert((caller, bci), profile);
        self
    }
}

impl ProfileProvider for StaticProfile {
    fn invoke_probability(&self, caller: MethodId, bci: u32) -> Option<f64> {
        self.probabilities.get(&(caller, bci)).copied()
    }

    fn invoke_density(&self, method: MethodId) -> Option<f64> {
        self.densities.get(&method).copied()
    }

    fn receiver_profile(&self, caller: MethodId, bci: u32) -> Option<TypeProfile> {
        self.receivers.get(&(caller, bci)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_profile_lookups() {
        let profile = StaticProfile::new()
            .with_probability(MethodId(1), 4, 0.25)
            .with_density(MethodId(2), 3.0)
            .with_receivers(
                MethodId(1),
                8,
                TypeProfile::new(&[(TypeId(1), 0.7), (TypeId(2), 0.3)], 0.0),
            );

        assert_eq!(profile.invoke_probability(MethodId(1), 4), Some(0.25));
        assert_eq!(profile.invoke_probability(MethodId(1), 5), None);
        assert_eq!(profile.invoke_density(MethodId(2)), Some(3.0));
        let receivers = profile.receiver_profile(MethodId(1), 8).unwrap();
        assert_eq!(receivers.entries.len(), 2);
        assert!(receivers.is_complete());
    }

    #[test]
    fn test_no_profile_is_unknown() {
        assert_eq!(NoProfile.invoke_probability(MethodId(0), 0), None);
        assert_eq!(NoProfile.invoke_density(MethodId(0)), None);
        assert!(NoProfile.receiver_profile(MethodId(0), 0).is_none());
    }
}
