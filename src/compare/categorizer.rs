/*
 * Copyright (c) 2020-2022 Thomas Kramer.
 *
 * This file is part of LibrEDA
 * (see https://codeberg.org/libreda).
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */
//! Categorizers assign small integer categories to objects such that
//! equivalent objects of the two compared netlists share a category.
//!
//! By default equivalence is derived from the normalized name; explicit
//! `same` bindings join categories.

use std::collections::HashMap;
use std::hash::Hash;

use fnv::{FnvHashMap, FnvHashSet};

use crate::netlist::prelude::*;

/// Which of the two compared netlists an object belongs to.
/// IDs of the two netlists live in different spaces.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Side {
    /// The first netlist (typically the layout-extracted one).
    A,
    /// The second netlist (the schematic reference).
    B,
}

/// The category of ignored objects.
pub const IGNORED_CATEGORY: usize = 0;

/// A generic categorizer keyed on `(side, id)`.
///
/// `same` joins the categories of two objects; joining two already
/// categorized objects transitively re-labels every other object in either
/// bucket. Binding an object to `None` assigns the ignored category.
#[derive(Debug, Clone)]
pub struct GenericCategorizer<K> {
    cat_by_key: FnvHashMap<(Side, K), usize>,
    cat_by_name: HashMap<String, usize>,
    next_cat: usize,
    with_name: bool,
    case_sensitive: bool,
}

impl<K: Copy + Eq + Hash> GenericCategorizer<K> {
    /// Create a categorizer. With `with_name`, objects without an explicit
    /// binding are categorized by their normalized name.
    pub fn new(with_name: bool) -> Self {
        GenericCategorizer {
            cat_by_key: Default::default(),
            cat_by_name: Default::default(),
            next_cat: IGNORED_CATEGORY,
            with_name,
            case_sensitive: true,
        }
    }

    /// Set the case policy for name-based categorization.
    pub fn set_case_sensitive(&mut self, f: bool) {
        self.case_sensitive = f;
    }

    fn normalize(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_uppercase()
        }
    }

    /// Declare two objects as equivalent. `None` on one side marks the other
    /// object as ignored.
    pub fn same(&mut self, a: Option<(Side, K)>, b: Option<(Side, K)>) {
        match (a, b) {
            (None, None) => {}
            (None, Some(_)) => self.same(b, a),
            (Some(a), None) => {
                // Binding an object to nothing makes it being ignored.
                self.cat_by_key.insert(a, IGNORED_CATEGORY);
            }
            (Some(a), Some(b)) => {
                let ca = self.cat_by_key.get(&a).copied();
                let cb = self.cat_by_key.get(&b).copied();
                match (ca, cb) {
                    (Some(ca), Some(cb)) => {
                        if ca != cb {
                            // Join the categories: cat(b) becomes cat(a).
                            for cat in self.cat_by_key.values_mut() {
                                if *cat == cb {
                                    *cat = ca;
                                }
                            }
                            for cat in self.cat_by_name.values_mut() {
                                if *cat == cb {
                                    *cat = ca;
                                }
                            }
                        }
                    }
                    (Some(ca), None) => {
                        self.cat_by_key.insert(b, ca);
                    }
                    (None, Some(cb)) => {
                        self.cat_by_key.insert(a, cb);
                    }
                    (None, None) => {
                        self.next_cat += 1;
                        self.cat_by_key.insert(a, self.next_cat);
                        self.cat_by_key.insert(b, self.next_cat);
                    }
                }
            }
        }
    }

    /// Returns true if the object has a category assigned already.
    pub fn has_cat_for(&self, side: Side, key: K) -> bool {
        self.cat_by_key.contains_key(&(side, key))
    }

    /// Get the category for an object, assigning one by name when necessary.
    pub fn cat_for(&mut self, side: Side, key: K, name: &str) -> usize {
        if let Some(&cat) = self.cat_by_key.get(&(side, key)) {
            return cat;
        }

        if self.with_name {
            let name = self.normalize(name);
            if let Some(&cat) = self.cat_by_name.get(&name) {
                self.cat_by_key.insert((side, key), cat);
                return cat;
            }
            self.next_cat += 1;
            self.cat_by_name.insert(name, self.next_cat);
        } else {
            self.next_cat += 1;
        }
        self.cat_by_key.insert((side, key), self.next_cat);
        self.next_cat
    }
}

/// Categorizer for device classes. Categories may be marked *strict*
/// which disables terminal equivalence for their devices.
#[derive(Debug, Clone)]
pub struct DeviceCategorizer {
    categorizer: GenericCategorizer<DeviceClassId>,
    strict_categories: FnvHashSet<usize>,
}

impl DeviceCategorizer {
    /// Create a device categorizer.
    pub fn new() -> Self {
        DeviceCategorizer {
            categorizer: GenericCategorizer::new(true),
            strict_categories: Default::default(),
        }
    }

    /// Set the case policy for name-based categorization.
    pub fn set_case_sensitive(&mut self, f: bool) {
        self.categorizer.set_case_sensitive(f);
    }

    /// Declare two device classes as equivalent.
    pub fn same_class(&mut self, a: Option<(Side, DeviceClassId)>, b: Option<(Side, DeviceClassId)>) {
        self.categorizer.same(a, b);
    }

    /// Get the category of a device class.
    pub fn cat_for_device_class(&mut self, side: Side, class: DeviceClassId, name: &str) -> usize {
        self.categorizer.cat_for(side, class, name)
    }

    /// Mark a category as strict.
    pub fn set_strict_device_category(&mut self, cat: usize) {
        self.strict_categories.insert(cat);
    }

    /// Remove all strict category marks.
    pub fn clear_strict_device_categories(&mut self) {
        self.strict_categories.clear();
    }

    /// Returns true if the category is strict.
    pub fn is_strict_device_category(&self, cat: usize) -> bool {
        self.strict_categories.contains(&cat)
    }
}

impl Default for DeviceCategorizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Categorizer for circuits. A circuit of the first netlist may be bound to
/// at most one circuit of the second netlist.
#[derive(Debug, Clone)]
pub struct CircuitCategorizer {
    categorizer: GenericCategorizer<CircuitId>,
}

impl CircuitCategorizer {
    /// Create a circuit categorizer.
    pub fn new() -> Self {
        CircuitCategorizer {
            categorizer: GenericCategorizer::new(true),
        }
    }

    /// Set the case policy for name-based categorization.
    pub fn set_case_sensitive(&mut self, f: bool) {
        self.categorizer.set_case_sensitive(f);
    }

    /// Declare two circuits as equivalent.
    ///
    /// # Panics
    /// Panics if the first circuit is already paired with another circuit.
    /// Multiple circuits of the first netlist may map to one circuit of the
    /// second netlist to account for layout alternatives, but not vice versa.
    pub fn same_circuit(&mut self, a: Option<(Side, CircuitId)>, b: Option<(Side, CircuitId)>) {
        if let Some((side, id)) = a {
            assert!(!self.categorizer.has_cat_for(side, id),
                    "Circuit is already paired with another circuit.");
        }
        self.categorizer.same(a, b);
    }

    /// Get the category of a circuit.
    pub fn cat_for_circuit(&mut self, side: Side, circuit: CircuitId, name: &str) -> usize {
        self.categorizer.cat_for(side, circuit, name)
    }
}

impl Default for CircuitCategorizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Equivalence classes over small integers, used for swappable pins.
#[derive(Debug, Clone, Default)]
pub struct EquivalenceClusters {
    representative: FnvHashMap<usize, usize>,
}

impl EquivalenceClusters {
    /// Put two values into the same cluster.
    pub fn same(&mut self, a: usize, b: usize) {
        let ra = self.cluster_of(a);
        let rb = self.cluster_of(b);
        if ra == rb {
            return;
        }
        let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
        for r in self.representative.values_mut() {
            if *r == merge {
                *r = keep;
            }
        }
        self.representative.insert(a, keep);
        self.representative.insert(b, keep);
    }

    /// Get the cluster representative. Values without a cluster represent
    /// themselves.
    pub fn cluster_of(&self, x: usize) -> usize {
        self.representative.get(&x).copied().unwrap_or(x)
    }

    /// Returns true if the value is part of a non-trivial cluster.
    pub fn is_clustered(&self, x: usize) -> bool {
        self.representative.contains_key(&x)
    }
}

/// Swappable pin definitions, managed per circuit.
///
/// Swappable pins are represented by mapping pin IDs to a canonical ID shared
/// by all pins of one equivalence group.
#[derive(Debug, Clone, Default)]
pub struct CircuitPinCategorizer {
    pin_map: FnvHashMap<(Side, CircuitId), EquivalenceClusters>,
}

impl CircuitPinCategorizer {
    /// Create an empty pin categorizer.
    pub fn new() -> Self {
        Default::default()
    }

    /// Declare a set of pins of a circuit as swappable.
    pub fn map_pins(&mut self, side: Side, circuit: CircuitId, pin_ids: &[usize]) {
        if pin_ids.len() < 2 {
            return;
        }
        let clusters = self.pin_map.entry((side, circuit)).or_default();
        for &pin in &pin_ids[1..] {
            clusters.same(pin_ids[0], pin);
        }
    }

    /// Returns true if the pin is part of a swappable group.
    pub fn is_mapped(&self, side: Side, circuit: CircuitId, pin_id: usize) -> bool {
        self.pin_map.get(&(side, circuit))
            .map(|c| c.is_clustered(pin_id))
            .unwrap_or(false)
    }

    /// Map a pin ID to the canonical ID of its swappable group.
    pub fn normalize_pin_id(&self, side: Side, circuit: CircuitId, pin_id: usize) -> usize {
        self.pin_map.get(&(side, circuit))
            .map(|c| c.cluster_of(pin_id))
            .unwrap_or(pin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> CircuitId {
        CircuitId(n)
    }

    #[test]
    fn test_categories_by_name() {
        let mut cat = GenericCategorizer::<CircuitId>::new(true);
        cat.set_case_sensitive(false);
        let c1 = cat.cat_for(Side::A, id(1), "INV");
        let c2 = cat.cat_for(Side::B, id(1), "inv");
        let c3 = cat.cat_for(Side::B, id(2), "ND2");
        assert_eq!(c1, c2);
        assert_ne!(c1, c3);
        assert_ne!(c1, IGNORED_CATEGORY);
    }

    #[test]
    fn test_same_joins_categories_transitively() {
        let mut cat = GenericCategorizer::<CircuitId>::new(true);
        let a = cat.cat_for(Side::A, id(1), "A");
        let b = cat.cat_for(Side::B, id(2), "B");
        assert_ne!(a, b);
        cat.same(Some((Side::A, id(1))), Some((Side::B, id(2))));
        let a2 = cat.cat_for(Side::A, id(1), "A");
        let b2 = cat.cat_for(Side::B, id(2), "B");
        assert_eq!(a2, b2);
        // A third object joining either bucket lands in the merged category.
        cat.same(Some((Side::A, id(3))), Some((Side::B, id(2))));
        assert_eq!(cat.cat_for(Side::A, id(3), "C"), a2);
    }

    #[test]
    fn test_same_with_none_ignores() {
        let mut cat = GenericCategorizer::<CircuitId>::new(true);
        cat.same(Some((Side::A, id(1))), None);
        assert_eq!(cat.cat_for(Side::A, id(1), "X"), IGNORED_CATEGORY);
    }

    #[test]
    #[should_panic(expected = "already paired")]
    fn test_circuit_double_binding_is_rejected() {
        let mut cat = CircuitCategorizer::new();
        cat.same_circuit(Some((Side::A, id(1))), Some((Side::B, id(2))));
        cat.same_circuit(Some((Side::A, id(1))), Some((Side::B, id(3))));
    }

    #[test]
    fn test_pin_categorizer() {
        let mut pins = CircuitPinCategorizer::new();
        pins.map_pins(Side::B, id(1), &[0, 2, 3]);
        let n0 = pins.normalize_pin_id(Side::B, id(1), 0);
        assert_eq!(pins.normalize_pin_id(Side::B, id(1), 2), n0);
        assert_eq!(pins.normalize_pin_id(Side::B, id(1), 3), n0);
        assert_eq!(pins.normalize_pin_id(Side::B, id(1), 1), 1);
        assert!(pins.is_mapped(Side::B, id(1), 2));
        assert!(!pins.is_mapped(Side::B, id(1), 1));
        // Other circuits are not affected.
        assert_eq!(pins.normalize_pin_id(Side::B, id(2), 2), 2);
    }
}
