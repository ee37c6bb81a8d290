//! Resource vectors keyed by resource name

use super::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mapping from resource name to quantity
///
/// The key set is open: `cpu`, `memory` and `pods` travel through the same
/// code as vendor resources such as `nvidia.com/gpu`. A key missing from one
/// operand is treated as zero, and every binary operation carries the union
/// of both key sets into its result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(BTreeMap<String, Quantity>);

/// Outcome of [`ResourceList::subtract`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subtraction {
    /// Per-key difference, clamped at zero
    pub result: ResourceList,
    /// How far below zero each clamped component would have gone
    pub shortfall: ResourceList,
}

impl Subtraction {
    pub fn is_clamped(&self) -> bool {
        !self.shortfall.is_empty()
    }
}

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, quantity: Quantity) -> Self {
        self.insert(name, quantity);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, quantity: Quantity) -> Option<Quantity> {
        self.0.insert(name.into(), quantity)
    }

    /// Quantity for `name`, zero when absent
    pub fn get(&self, name: &str) -> Quantity {
        self.0.get(name).copied().unwrap_or_default()
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.0.iter().map(|(name, quantity)| (name.as_str(), *quantity))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn union_keys<'a>(&'a self, other: &'a ResourceList) -> impl Iterator<Item = &'a String> {
        let mut keys: Vec<&String> = self.0.keys().chain(other.0.keys()).collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
    }

    /// Per-key sum of every list
    pub fn sum<'a>(lists: impl IntoIterator<Item = &'a ResourceList>) -> ResourceList {
        lists
            .into_iter()
            .fold(ResourceList::new(), |total, list| total.add(list))
    }

    /// Per-key addition over the union of keys
    pub fn add(&self, delta: &ResourceList) -> ResourceList {
        self.union_keys(delta)
            .map(|key| (key.clone(), self.get(key).saturating_add(delta.get(key))))
            .collect()
    }

    /// Per-key addition where every component of `delta` lands capped at `cap`
    ///
    /// Keys only present in `self` are left as they are. A key absent from
    /// `cap` has a cap of zero.
    pub fn add_capped(&self, delta: &ResourceList, cap: &ResourceList) -> ResourceList {
        let mut total = self.clone();
        for (key, quantity) in delta.iter() {
            let sum = self.get(key).saturating_add(quantity);
            total.insert(key, sum.min(cap.get(key)));
        }
        total
    }

    /// Per-key subtraction, clamping every component at zero
    pub fn subtract(&self, delta: &ResourceList) -> Subtraction {
        let mut outcome = Subtraction::default();
        for key in self.union_keys(delta) {
            let raw = self.get(key).saturating_sub(delta.get(key));
            if raw.is_negative() {
                outcome.result.insert(key.clone(), Quantity::ZERO);
                outcome.shortfall.insert(key.clone(), raw.negate());
            } else {
                outcome.result.insert(key.clone(), raw);
            }
        }
        outcome
    }

    /// Signed per-key difference `self - other`, keeping only non-zero keys
    pub fn difference(&self, other: &ResourceList) -> ResourceList {
        self.union_keys(other)
            .filter_map(|key| {
                let diff = self.get(key).saturating_sub(other.get(key));
                (!diff.is_zero()).then(|| (key.clone(), diff))
            })
            .collect()
    }

    /// Per-key maximum over the union of keys
    pub fn max(&self, other: &ResourceList) -> ResourceList {
        self.union_keys(other)
            .map(|key| (key.clone(), self.get(key).max(other.get(key))))
            .collect()
    }

    /// Keys where `self` is larger than `other`, with the excess
    pub fn exceeds(&self, other: &ResourceList) -> ResourceList {
        self.difference(other)
            .0
            .into_iter()
            .filter(|(_, diff)| !diff.is_negative())
            .collect()
    }

    /// Equality where an absent key equals an explicit zero
    pub fn equivalent(&self, other: &ResourceList) -> bool {
        self.difference(other).is_empty()
    }
}

impl FromIterator<(String, Quantity)> for ResourceList {
    fn from_iter<I: IntoIterator<Item = (String, Quantity)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ResourceList {
    type Item = (&'a String, &'a Quantity);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Quantity>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, quantity)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {quantity}")?;
        }
        f.write_str("}")
    }
}
