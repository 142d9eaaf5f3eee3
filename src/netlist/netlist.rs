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
//! The netlist is the root container of the data model. It owns the circuits and
//! the device classes and provides the bulk transformations: purge, flatten,
//! device combination and simplification.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};

use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::debug;
use thiserror::Error;

use super::circuit::{Circuit, CircuitId};
use super::device::{Device, DeviceId, TerminalRedirection};
use super::device_class::{CombinerKind, DeviceClass, DeviceClassId};
use super::net::NetId;
use super::subcircuit::{SubCircuit, SubCircuitId};

/// Errors raised by structural netlist operations.
#[derive(Debug, Error)]
pub enum NetlistError {
    /// The circuit hierarchy contains a cycle.
    #[error("recursive hierarchy detected in netlist")]
    RecursiveHierarchy,
    /// The textual netlist format could not be parsed.
    #[error("netlist format error: {0}")]
    Parse(String),
}

/// Cached topological information of the circuit hierarchy.
#[derive(Debug, Clone, Default)]
pub(crate) struct Topology {
    /// Circuits in top-down order: every circuit appears before its children.
    pub(crate) top_down: Vec<CircuitId>,
    /// Number of top-level circuits. Top circuits form the prefix of `top_down`.
    pub(crate) top_count: usize,
}

/// A hierarchical netlist.
#[derive(Debug, Clone)]
pub struct Netlist {
    circuits: BTreeMap<CircuitId, Circuit>,
    circuits_by_name: HashMap<String, CircuitId>,
    device_classes: BTreeMap<DeviceClassId, DeviceClass>,
    device_classes_by_name: HashMap<String, DeviceClassId>,
    circuit_id_counter: u32,
    device_class_id_counter: u32,
    case_sensitive: bool,
    topology: Option<Topology>,
    lock_count: usize,
}

impl Default for Netlist {
    fn default() -> Self {
        Self::new()
    }
}

impl Netlist {
    /// Create an empty netlist. Netlists are case sensitive by default.
    pub fn new() -> Self {
        Netlist {
            circuits: Default::default(),
            circuits_by_name: Default::default(),
            device_classes: Default::default(),
            device_classes_by_name: Default::default(),
            // IDs start at 1; 0 is never a valid ID.
            circuit_id_counter: 1,
            device_class_id_counter: 1,
            case_sensitive: true,
            topology: None,
            lock_count: 0,
        }
    }

    /// Get the value of a counter and increment the counter afterwards.
    fn next_id_counter(counter: &mut u32) -> u32 {
        let id = *counter;
        *counter += 1;
        id
    }

    // == Names and case policy == //

    /// Returns true if names are compared case sensitively.
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Set the case sensitivity policy. Rebuilds all name lookup tables.
    ///
    /// # Panics
    /// Panics if folding the case makes two names collide.
    pub fn set_case_sensitive(&mut self, f: bool) {
        if self.case_sensitive == f {
            return;
        }
        self.case_sensitive = f;

        let mut by_name = HashMap::new();
        for c in self.circuits.values_mut() {
            c.case_sensitive = f;
            c.rebuild_name_tables();
            let key = Self::normalize_name_impl(f, c.name().as_str());
            let old = by_name.insert(key, c.id());
            assert!(old.is_none(), "Circuit name collision after changing the case policy.");
        }
        self.circuits_by_name = by_name;

        let mut by_name = HashMap::new();
        for cls in self.device_classes.values() {
            let key = Self::normalize_name_impl(f, cls.name().as_str());
            let old = by_name.insert(key, cls.id());
            assert!(old.is_none(), "Device class name collision after changing the case policy.");
        }
        self.device_classes_by_name = by_name;
    }

    fn normalize_name_impl(case_sensitive: bool, name: &str) -> String {
        if case_sensitive {
            name.to_string()
        } else {
            name.to_uppercase()
        }
    }

    /// Normalize a name according to the case policy of this netlist.
    pub fn normalize_name(&self, name: &str) -> String {
        Self::normalize_name_impl(self.case_sensitive, name)
    }

    /// Compare two names under the given case policy.
    pub fn name_compare(case_sensitive: bool, a: &str, b: &str) -> std::cmp::Ordering {
        if case_sensitive {
            a.cmp(b)
        } else {
            a.to_uppercase().cmp(&b.to_uppercase())
        }
    }

    // == Circuits == //

    /// Create a new, empty circuit.
    ///
    /// # Panics
    /// Panics if a circuit with this name already exists.
    pub fn create_circuit(&mut self, name: impl Into<String>) -> CircuitId {
        let name = name.into();
        let key = self.normalize_name(&name);
        assert!(!self.circuits_by_name.contains_key(&key), "Circuit name already exists.");

        let id = CircuitId(Self::next_id_counter(&mut self.circuit_id_counter));
        self.circuits.insert(id, Circuit::new(id, name, self.case_sensitive));
        self.circuits_by_name.insert(key, id);
        self.invalidate_topology();
        id
    }

    /// Get a circuit by its ID.
    ///
    /// # Panics
    /// Panics if the circuit does not exist.
    pub fn circuit(&self, id: CircuitId) -> &Circuit {
        &self.circuits[&id]
    }

    /// Get a mutable reference to a circuit.
    ///
    /// # Panics
    /// Panics if the circuit does not exist.
    pub fn circuit_mut(&mut self, id: CircuitId) -> &mut Circuit {
        self.circuits.get_mut(&id).expect("Circuit not found.")
    }

    /// Returns true if the circuit exists.
    pub fn contains_circuit(&self, id: CircuitId) -> bool {
        self.circuits.contains_key(&id)
    }

    /// Find a circuit by its name. Respects the case policy.
    pub fn circuit_by_name(&self, name: &str) -> Option<CircuitId> {
        self.circuits_by_name.get(&self.normalize_name(name)).copied()
    }

    /// Iterate over all circuits in creation order.
    pub fn each_circuit(&self) -> impl Iterator<Item = &Circuit> {
        self.circuits.values()
    }

    /// Iterate over all circuit IDs in creation order.
    pub fn each_circuit_id(&self) -> impl Iterator<Item = CircuitId> + '_ {
        self.circuits.keys().copied()
    }

    /// Number of circuits in this netlist.
    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    /// Remove all contents of the circuit but keep its pins.
    /// The circuit is marked with `dont_purge` as intentionally empty.
    ///
    /// # Panics
    /// Panics if the circuit does not exist.
    pub fn blank_circuit(&mut self, id: CircuitId) {
        let subcircuits = self.circuit(id).each_subcircuit_id().collect_vec();
        for sc in subcircuits {
            self.remove_subcircuit(id, sc);
        }
        let c = self.circuit_mut(id);
        let devices = c.each_device_id().collect_vec();
        for d in devices {
            c.remove_device(d);
        }
        let nets = c.each_net_id().collect_vec();
        for n in nets {
            c.remove_net(n);
        }
        c.set_dont_purge(true);
        self.invalidate_topology();
    }

    /// Delete a circuit. Instances referencing the circuit are deleted as well.
    ///
    /// # Panics
    /// Panics if the circuit does not exist.
    pub fn remove_circuit(&mut self, id: CircuitId) {
        // Remove all instances of this circuit.
        let references = self.circuit(id).each_reference().collect_vec();
        for (parent, sc) in references {
            self.remove_subcircuit(parent, sc);
        }
        // Detach the back-references created by the content of this circuit.
        let subcircuits = self.circuit(id).each_subcircuit_id().collect_vec();
        for sc in subcircuits {
            self.remove_subcircuit(id, sc);
        }

        let circuit = self.circuits.remove(&id).expect("Circuit not found.");
        let key = self.normalize_name(circuit.name().as_str());
        self.circuits_by_name.remove(&key);
        self.invalidate_topology();
    }

    /// Delete a circuit together with all child circuits that become orphaned.
    ///
    /// Children protected by `dont_purge` are kept.
    ///
    /// # Panics
    /// Panics if the circuit does not exist.
    pub fn purge_circuit(&mut self, id: CircuitId) {
        let children = self.child_circuits(id);
        self.remove_circuit(id);
        for child in children {
            if self.contains_circuit(child)
                && !self.circuit(child).has_references()
                && !self.circuit(child).dont_purge()
            {
                self.purge_circuit(child);
            }
        }
    }

    // == Pins == //

    /// Append a pin to the circuit and extend all instances of the circuit
    /// with an unconnected pin. Returns the new pin ID.
    ///
    /// # Panics
    /// Panics if the circuit does not exist.
    pub fn add_pin(&mut self, circuit: CircuitId, name: impl Into<String>) -> usize {
        let pin_id = self.circuit_mut(circuit).add_pin_local(name);
        let references = self.circuit(circuit).each_reference().collect_vec();
        for (parent, sc) in references {
            self.circuit_mut(parent).subcircuit_mut(sc).pins.push(None);
        }
        pin_id
    }

    /// Remove a pin from the circuit and from all instances.
    /// Trailing pins are renumbered so that pin IDs stay dense.
    ///
    /// # Panics
    /// Panics if the circuit or the pin does not exist.
    pub fn remove_pin(&mut self, circuit: CircuitId, pin_id: usize) {
        self.circuit_mut(circuit).remove_pin_local(pin_id);

        let references = self.circuit(circuit).each_reference().collect_vec();
        for (parent, sc) in references {
            let parent_circuit = self.circuit_mut(parent);
            parent_circuit.connect_subcircuit_pin(sc, pin_id, None);
            parent_circuit.subcircuit_mut(sc).pins.remove(pin_id);
            // Renumber the back-references of the trailing pin positions.
            let pin_count = parent_circuit.subcircuit(sc).pin_count();
            for pos in pin_id..pin_count {
                if let Some(net) = parent_circuit.subcircuit(sc).net_for_pin(pos) {
                    let net = parent_circuit.net_mut(net);
                    net.subcircuit_pins.remove(&(sc, pos + 1));
                    net.subcircuit_pins.insert((sc, pos));
                }
            }
        }
    }

    // == Device classes == //

    /// Add a device class to the netlist and return its ID.
    ///
    /// # Panics
    /// Panics if a class with this name already exists.
    pub fn add_device_class(&mut self, mut class: DeviceClass) -> DeviceClassId {
        let key = self.normalize_name(class.name().as_str());
        assert!(!self.device_classes_by_name.contains_key(&key), "Device class name already exists.");
        let id = DeviceClassId(Self::next_id_counter(&mut self.device_class_id_counter));
        class.id = id;
        self.device_classes.insert(id, class);
        self.device_classes_by_name.insert(key, id);
        id
    }

    /// Get a device class by its ID.
    ///
    /// # Panics
    /// Panics if the class does not exist.
    pub fn device_class(&self, id: DeviceClassId) -> &DeviceClass {
        &self.device_classes[&id]
    }

    /// Get a mutable reference to a device class, e.g. for installing a
    /// parameter comparer or switching strict mode.
    ///
    /// # Panics
    /// Panics if the class does not exist.
    pub fn device_class_mut(&mut self, id: DeviceClassId) -> &mut DeviceClass {
        self.device_classes.get_mut(&id).expect("Device class not found.")
    }

    /// Find a device class by its name. Respects the case policy.
    pub fn device_class_by_name(&self, name: &str) -> Option<DeviceClassId> {
        self.device_classes_by_name.get(&self.normalize_name(name)).copied()
    }

    /// Iterate over all device classes in creation order.
    pub fn each_device_class(&self) -> impl Iterator<Item = &DeviceClass> {
        self.device_classes.values()
    }

    /// Get the device class of a device.
    ///
    /// # Panics
    /// Panics if the circuit or the device does not exist.
    pub fn class_of_device(&self, circuit: CircuitId, device: DeviceId) -> &DeviceClass {
        self.device_class(self.circuit(circuit).device(device).class_id())
    }

    // == Devices and subcircuits == //

    /// Create a device of the given class inside the circuit.
    /// Parameters are initialized with the class defaults.
    ///
    /// # Panics
    /// Panics if the circuit or the class does not exist.
    pub fn create_device(&mut self, circuit: CircuitId, class: DeviceClassId, name: impl Into<String>) -> DeviceId {
        let (num_terminals, defaults) = {
            let cls = self.device_class(class);
            (cls.terminal_count(),
             cls.parameter_definitions().iter().map(|p| p.default_value()).collect_vec())
        };
        let c = self.circuit_mut(circuit);
        let id = c.next_device_id();
        c.insert_device(Device::new(id, class, name, num_terminals, defaults))
    }

    /// Create an instance of `template` inside `parent`.
    ///
    /// Recursive hierarchies are not rejected here but during topology
    /// validation.
    ///
    /// # Panics
    /// Panics if `parent` or `template` does not exist.
    pub fn create_subcircuit(&mut self, parent: CircuitId, template: CircuitId, name: impl Into<String>) -> SubCircuitId {
        assert!(self.circuits.contains_key(&template), "Template circuit not found.");
        let num_pins = self.circuit(template).pin_count();
        let c = self.circuit_mut(parent);
        let id = c.next_subcircuit_id();
        c.subcircuits.insert(id, SubCircuit::new(id, template, name, num_pins));
        self.circuit_mut(template).references.insert((parent, id));
        self.invalidate_topology();
        id
    }

    /// Remove a subcircuit instance from its parent circuit.
    ///
    /// # Panics
    /// Panics if the parent or the subcircuit does not exist.
    pub fn remove_subcircuit(&mut self, parent: CircuitId, subcircuit: SubCircuitId) {
        let template = self.circuit(parent).subcircuit(subcircuit).circuit_ref();
        self.circuit_mut(parent).remove_subcircuit_local(subcircuit);
        if let Some(template) = self.circuits.get_mut(&template) {
            template.references.remove(&(parent, subcircuit));
        }
        self.invalidate_topology();
    }

    // == Topology == //

    pub(crate) fn invalidate_topology(&mut self) {
        if self.lock_count == 0 {
            self.topology = None;
        }
        // While locked the stale order is kept so that iteration stays stable.
    }

    /// Compute the top-down circuit order without touching the cache.
    pub(crate) fn compute_topology(&self) -> Result<Topology, NetlistError> {
        let total = self.circuits.len();
        let parents: FnvHashMap<CircuitId, Vec<CircuitId>> = self.circuits.keys()
            .map(|&id| (id, self.parent_circuits(id)))
            .collect();

        let mut emitted: FnvHashSet<CircuitId> = Default::default();
        let mut top_down = Vec::with_capacity(total);

        while top_down.len() != total {
            // Emit all circuits whose parents have all been emitted.
            // Circuits are visited in index order for reproducibility.
            let ready = self.circuits.keys()
                .filter(|id| !emitted.contains(id))
                .filter(|id| parents[id].iter().all(|p| emitted.contains(p)))
                .copied()
                .collect_vec();

            if ready.is_empty() {
                return Err(NetlistError::RecursiveHierarchy);
            }

            for id in ready {
                emitted.insert(id);
                top_down.push(id);
            }
        }

        let top_count = self.circuits.keys()
            .filter(|id| parents[id].is_empty())
            .count();

        Ok(Topology { top_down, top_count })
    }

    /// Validate the cached topology. Fails if the hierarchy is recursive.
    pub fn validate_topology(&mut self) -> Result<(), NetlistError> {
        if self.topology.is_none() {
            self.topology = Some(self.compute_topology()?);
        }
        Ok(())
    }

    /// Get the circuits in top-down order: every circuit appears before the
    /// circuits it instantiates.
    pub fn each_circuit_top_down(&mut self) -> Result<Vec<CircuitId>, NetlistError> {
        self.validate_topology()?;
        Ok(self.topology.as_ref().unwrap().top_down.clone())
    }

    /// Get the circuits in bottom-up order: every circuit appears after the
    /// circuits it instantiates.
    pub fn each_circuit_bottom_up(&mut self) -> Result<Vec<CircuitId>, NetlistError> {
        let mut order = self.each_circuit_top_down()?;
        order.reverse();
        Ok(order)
    }

    /// Number of top-level circuits.
    pub fn top_circuit_count(&mut self) -> Result<usize, NetlistError> {
        self.validate_topology()?;
        Ok(self.topology.as_ref().unwrap().top_count)
    }

    /// Get the distinct circuits instantiated inside the given circuit,
    /// sorted by circuit index.
    pub fn child_circuits(&self, circuit: CircuitId) -> Vec<CircuitId> {
        self.circuit(circuit).each_subcircuit()
            .map(|sc| sc.circuit_ref())
            .unique()
            .sorted()
            .collect_vec()
    }

    /// Get the distinct circuits which instantiate the given circuit,
    /// sorted by circuit index.
    pub fn parent_circuits(&self, circuit: CircuitId) -> Vec<CircuitId> {
        self.circuit(circuit).each_reference()
            .map(|(parent, _)| parent)
            .unique()
            .sorted()
            .collect_vec()
    }

    pub(crate) fn lock(&mut self) -> Result<(), NetlistError> {
        if self.lock_count == 0 {
            self.validate_topology()?;
        }
        self.lock_count += 1;
        Ok(())
    }

    pub(crate) fn unlock(&mut self) {
        if self.lock_count > 0 {
            self.lock_count -= 1;
        }
    }

    // == Bulk operations == //

    /// Delete all floating nets in all circuits. Returns the number of purged nets.
    pub fn purge_nets(&mut self) -> usize {
        self.circuits.values_mut()
            .map(|c| c.purge_nets())
            .sum()
    }

    /// Create pins on top-level circuits which have none: one pin per named
    /// net with any device or subcircuit connection.
    pub fn make_top_level_pins(&mut self) -> Result<(), NetlistError> {
        self.validate_topology()?;
        let topology = self.topology.as_ref().unwrap();
        let tops = topology.top_down[..topology.top_count].to_vec();

        for circuit in tops {
            if self.circuit(circuit).pin_count() > 0 {
                continue;
            }
            let candidates = self.circuit(circuit).each_net()
                .filter(|n| n.name().is_some() && n.terminal_count() + n.subcircuit_pin_count() > 0)
                .map(|n| (n.id(), n.name().unwrap().to_string()))
                .collect_vec();
            for (net, name) in candidates {
                let pin = self.add_pin(circuit, name);
                self.circuit_mut(circuit).connect_pin(pin, Some(net));
            }
        }
        Ok(())
    }

    /// Purge floating nets, then delete all circuits which only contain
    /// passive nets. Circuits marked with `dont_purge` are kept.
    pub fn purge(&mut self) -> Result<(), NetlistError> {
        let mut locker = NetlistLocker::new(self)?;
        let bottom_up = locker.each_circuit_bottom_up()?;

        for circuit in bottom_up {
            if !locker.contains_circuit(circuit) {
                continue;
            }
            locker.circuit_mut(circuit).purge_nets();

            let purge_candidate = !locker.circuit(circuit).dont_purge()
                && locker.circuit(circuit).each_net().all(|n| n.is_passive());
            if purge_candidate {
                debug!("Purging circuit {}.", locker.circuit(circuit).name());
                locker.remove_circuit(circuit);
            }
        }
        Ok(())
    }

    /// Simplify the netlist: `make_top_level_pins`, `purge`, `combine_devices`
    /// and `purge_nets`, in this order.
    pub fn simplify(&mut self) -> Result<(), NetlistError> {
        self.make_top_level_pins()?;
        self.purge()?;
        self.combine_devices();
        self.purge_nets();
        Ok(())
    }

    // == Device combination == //

    /// Combine devices in all circuits according to their device class rules.
    pub fn combine_devices(&mut self) {
        let circuits = self.circuits.keys().copied().collect_vec();
        for circuit in circuits {
            self.combine_devices_in_circuit(circuit);
        }
    }

    /// Combine devices in one circuit. The iteration terminates when no pair
    /// combines in a full pass.
    pub fn combine_devices_in_circuit(&mut self, circuit: CircuitId) {
        while let Some((a, b, serial_net)) = self.find_combination(circuit) {
            self.do_combine(circuit, a, b, serial_net);
        }
    }

    fn find_combination(&self, circuit: CircuitId) -> Option<(DeviceId, DeviceId, Option<NetId>)> {
        let c = self.circuit(circuit);
        let ids = c.each_device_id().collect_vec();

        for (i, &a) in ids.iter().enumerate() {
            let da = c.device(a);
            let cls = self.device_class(da.class_id());
            if cls.combiner() == CombinerKind::None {
                continue;
            }
            for &b in &ids[i + 1..] {
                let db = c.device(b);
                if db.class_id() != da.class_id() {
                    continue;
                }
                if cls.supports_parallel_combination() && Self::parallel_connected(da, db) {
                    return Some((a, b, None));
                }
                if cls.supports_serial_combination() {
                    if let Some(shared) = Self::serial_shared_net(c, da, db) {
                        return Some((a, b, Some(shared)));
                    }
                }
            }
        }
        None
    }

    /// Two devices are parallel if their A/B terminals connect the same two
    /// nets (in any order) and all further terminals match exactly.
    fn parallel_connected(a: &Device, b: &Device) -> bool {
        let (a0, a1) = (a.net_for_terminal(0), a.net_for_terminal(1));
        let (b0, b1) = (b.net_for_terminal(0), b.net_for_terminal(1));
        if a0.is_none() || a1.is_none() {
            return false;
        }
        let same = (a0 == b0 && a1 == b1) || (a0 == b1 && a1 == b0);
        if !same {
            return false;
        }
        (2..a.terminal_count()).all(|t| a.net_for_terminal(t) == b.net_for_terminal(t))
    }

    /// Two devices are serial if they share exactly one node through their
    /// A/B terminals and the shared node is internal (two terminals, no pins).
    fn serial_shared_net(circuit: &Circuit, a: &Device, b: &Device) -> Option<NetId> {
        for ta in 0..2 {
            for tb in 0..2 {
                let (na, nb) = match (a.net_for_terminal(ta), b.net_for_terminal(tb)) {
                    (Some(na), Some(nb)) => (na, nb),
                    _ => continue,
                };
                if na != nb || !circuit.net(na).is_internal() {
                    continue;
                }
                // The far ends must not be the same node, otherwise the pair
                // is a loop.
                if a.net_for_terminal(1 - ta) == b.net_for_terminal(1 - tb) {
                    continue;
                }
                // Bulk terminals must match.
                if !(2..a.terminal_count()).all(|t| a.net_for_terminal(t) == b.net_for_terminal(t)) {
                    continue;
                }
                return Some(na);
            }
        }
        None
    }

    fn do_combine(&mut self, circuit: CircuitId, a: DeviceId, b: DeviceId, serial_net: Option<NetId>) {
        let class = self.circuit(circuit).device(a).class_id();
        let (combiner, primary) = {
            let cls = self.device_class(class);
            (cls.combiner(), cls.primary_parameter_id().expect("Combinable class without primary parameter."))
        };

        let va = self.circuit(circuit).device(a).parameter_value(primary);
        let vb = self.circuit(circuit).device(b).parameter_value(primary);

        let reciprocal_sum = |x: f64, y: f64| if x + y == 0.0 { 0.0 } else { x * y / (x + y) };
        let value = match (combiner, serial_net.is_some()) {
            (CombinerKind::Resistor, false) => reciprocal_sum(va, vb),
            (CombinerKind::Resistor, true) => va + vb,
            (CombinerKind::Capacitor, false) => va + vb,
            (CombinerKind::Capacitor, true) => reciprocal_sum(va, vb),
            (CombinerKind::None, _) => unreachable!(),
        };

        // Area and perimeter parameters accumulate when devices are merged.
        let accumulated = ["A", "P"].iter()
            .filter_map(|n| self.device_class(class).parameter_id_for_name(n))
            .filter(|&p| p != primary)
            .map(|p| {
                let sum = self.circuit(circuit).device(a).parameter_value(p)
                    + self.circuit(circuit).device(b).parameter_value(p);
                (p, sum)
            })
            .collect_vec();

        debug!("Combining devices {} and {} ({}).",
               self.circuit(circuit).device(a).expanded_name(),
               self.circuit(circuit).device(b).expanded_name(),
               if serial_net.is_some() { "serial" } else { "parallel" });

        let mut redirection = None;
        if let Some(shared) = serial_net {
            // Reconnect the shared terminal of `a` to the far end of `b`,
            // then drop `b` and the internal node.
            let ta = (0..2)
                .find(|&t| self.circuit(circuit).device(a).net_for_terminal(t) == Some(shared))
                .unwrap();
            let tb = (0..2)
                .find(|&t| self.circuit(circuit).device(b).net_for_terminal(t) == Some(shared))
                .unwrap();
            let far = self.circuit(circuit).device(b).net_for_terminal(1 - tb);
            let c = self.circuit_mut(circuit);
            c.connect_terminal(a, ta, far);
            c.remove_device(b);
            c.remove_net(shared);
            redirection = Some((ta, 1 - tb));
        } else {
            self.circuit_mut(circuit).remove_device(b);
        }

        let device = self.circuit_mut(circuit).device_mut(a);
        device.set_parameter_value(primary, value);
        for (p, v) in accumulated {
            device.set_parameter_value(p, v);
        }
        // Keep the identity of the absorbed device so that an external layout
        // link can still resolve its geometry.
        device.combined_devices.push(b);
        let fragment_index = device.combined_devices.len();
        if let Some((outer_terminal, fragment_terminal)) = redirection {
            device.reconnections.push(TerminalRedirection {
                outer_terminal,
                fragment_index,
                fragment_terminal,
            });
        }
    }

    // == Flatten == //

    /// Replace one subcircuit instance by the contents of its template.
    ///
    /// Boundary nets are merged at the pins. Internal nets keep their names
    /// when possible; colliding names become anonymous. Devices and
    /// subcircuits are renamed by prefixing the instance name.
    ///
    /// # Panics
    /// Panics if the parent or the subcircuit does not exist.
    pub fn flatten_subcircuit(&mut self, parent: CircuitId, subcircuit: SubCircuitId) {
        let template = self.circuit(parent).subcircuit(subcircuit).circuit_ref();
        let inst_name = self.circuit(parent).subcircuit(subcircuit).expanded_name();
        debug!("Flattening instance {} of {} into {}.",
               inst_name, self.circuit(template).name(), self.circuit(parent).name());

        // Snapshot the template content.
        let template_pins: Vec<Option<NetId>> = self.circuit(template).each_pin()
            .map(|p| p.net())
            .collect_vec();
        let template_nets = self.circuit(template).each_net()
            .map(|n| (n.id(), n.name().map(|s| s.to_string())))
            .collect_vec();
        let template_devices = self.circuit(template).each_device()
            .map(|d| (d.class_id(), d.expanded_name(),
                      (0..d.terminal_count()).map(|t| d.net_for_terminal(t)).collect_vec(),
                      d.parameters.clone()))
            .collect_vec();
        let template_subcircuits = self.circuit(template).each_subcircuit()
            .map(|sc| (sc.circuit_ref(), sc.expanded_name(),
                       (0..sc.pin_count()).map(|p| sc.net_for_pin(p)).collect_vec()))
            .collect_vec();

        // Map the boundary: template-internal net behind a pin -> net attached
        // to the instance pin in the parent.
        let mut net_map: FnvHashMap<NetId, NetId> = Default::default();
        for (pos, inner) in template_pins.iter().enumerate() {
            let outer = self.circuit(parent).subcircuit(subcircuit).net_for_pin(pos);
            if let (Some(inner), Some(outer)) = (*inner, outer) {
                match net_map.get(&inner).copied() {
                    None => {
                        net_map.insert(inner, outer);
                    }
                    Some(previous) if previous != outer => {
                        // Two pins share one inner net: the outer nets collapse.
                        self.circuit_mut(parent).join_nets(previous, outer);
                        for v in net_map.values_mut() {
                            if *v == outer {
                                *v = previous;
                            }
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        // Copy the remaining nets.
        for (inner, name) in template_nets {
            if net_map.contains_key(&inner) {
                continue;
            }
            let name = name.filter(|n| self.circuit(parent).net_by_name(n).is_none());
            let new_net = self.circuit_mut(parent).create_net(name.as_deref());
            net_map.insert(inner, new_net);
        }

        // Copy devices.
        for (class, name, terminals, parameters) in template_devices {
            let new_name = format!("{}:{}", inst_name, name);
            let device = self.create_device(parent, class, new_name);
            self.circuit_mut(parent).device_mut(device).parameters = parameters;
            for (t, net) in terminals.into_iter().enumerate() {
                if let Some(net) = net {
                    self.circuit_mut(parent).connect_terminal(device, t, Some(net_map[&net]));
                }
            }
        }

        // Copy subcircuits.
        for (target, name, pins) in template_subcircuits {
            let new_name = format!("{}:{}", inst_name, name);
            let sc = self.create_subcircuit(parent, target, new_name);
            for (pos, net) in pins.into_iter().enumerate() {
                if let Some(net) = net {
                    self.circuit_mut(parent).connect_subcircuit_pin(sc, pos, Some(net_map[&net]));
                }
            }
        }

        self.remove_subcircuit(parent, subcircuit);
    }

    /// Flatten all instances of the circuit and delete the circuit afterwards.
    /// For circuits without references this is equivalent to removing them.
    ///
    /// # Panics
    /// Panics if the circuit does not exist.
    pub fn flatten_circuit(&mut self, circuit: CircuitId) {
        let references = self.circuit(circuit).each_reference().collect_vec();
        for (parent, sc) in references {
            self.flatten_subcircuit(parent, sc);
        }
        debug_assert!(!self.circuit(circuit).has_references());
        self.remove_circuit(circuit);
    }

    /// Flatten the given circuits, working top-down through the hierarchy.
    pub fn flatten_circuits(&mut self, circuits: &[CircuitId]) -> Result<(), NetlistError> {
        if circuits.is_empty() {
            return Ok(());
        }
        let set: FnvHashSet<CircuitId> = circuits.iter().copied().collect();
        let to_flatten = self.each_circuit_top_down()?
            .into_iter()
            .filter(|c| set.contains(c))
            .collect_vec();
        for c in to_flatten {
            self.flatten_circuit(c);
        }
        Ok(())
    }

    /// Flatten the whole netlist. Only top-level circuits remain.
    pub fn flatten(&mut self) -> Result<(), NetlistError> {
        let mut locker = NetlistLocker::new(self)?;
        let top_count = locker.top_circuit_count()?;
        let top_down = locker.each_circuit_top_down()?;
        let tops: FnvHashSet<CircuitId> = top_down[..top_count].iter().copied().collect();

        let bottom_up = locker.each_circuit_bottom_up()?;
        for c in bottom_up {
            if !tops.contains(&c) {
                locker.flatten_circuit(c);
            }
        }
        Ok(())
    }
}

/// RAII guard pinning the cached topological order of a netlist.
///
/// While a locker is alive, structural mutations do not clear the cached
/// top-down order, so iteration over a previously obtained order stays
/// stable. The cache is re-validated when the last locker is released.
pub struct NetlistLocker<'a> {
    netlist: &'a mut Netlist,
}

impl<'a> NetlistLocker<'a> {
    /// Lock the netlist. Validates the topology first.
    pub fn new(netlist: &'a mut Netlist) -> Result<Self, NetlistError> {
        netlist.lock()?;
        Ok(NetlistLocker { netlist })
    }
}

impl Deref for NetlistLocker<'_> {
    type Target = Netlist;

    fn deref(&self) -> &Netlist {
        self.netlist
    }
}

impl DerefMut for NetlistLocker<'_> {
    fn deref_mut(&mut self) -> &mut Netlist {
        self.netlist
    }
}

impl Drop for NetlistLocker<'_> {
    fn drop(&mut self) {
        self.netlist.unlock();
        self.netlist.invalidate_topology();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::device_classes;

    #[test]
    fn test_create_circuit_and_pins() {
        let mut nl = Netlist::new();
        let top = nl.create_circuit("TOP");
        let a = nl.add_pin(top, "A");
        let b = nl.add_pin(top, "B");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(nl.circuit(top).pin_count(), 2);
        assert_eq!(nl.circuit_by_name("TOP"), Some(top));
        assert_eq!(nl.circuit_by_name("top"), None);
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut nl = Netlist::new();
        let top = nl.create_circuit("Top");
        nl.set_case_sensitive(false);
        assert_eq!(nl.circuit_by_name("TOP"), Some(top));
        assert_eq!(nl.circuit_by_name("top"), Some(top));
    }

    #[test]
    fn test_terminal_backrefs_stay_symmetric() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let d = nl.create_device(top, res, "1");
        let c = nl.circuit_mut(top);
        let n1 = c.create_net(Some("N1"));
        let n2 = c.create_net(Some("N2"));
        c.connect_terminal(d, 0, Some(n1));
        c.connect_terminal(d, 1, Some(n2));
        assert_eq!(c.net(n1).terminal_count(), 1);
        assert!(c.net(n1).each_terminal().any(|(dev, t)| dev == d && t == 0));
        // Reconnecting moves the back-reference.
        c.connect_terminal(d, 0, Some(n2));
        assert_eq!(c.net(n1).terminal_count(), 0);
        assert_eq!(c.net(n2).terminal_count(), 2);
    }

    #[test]
    fn test_join_nets_combines_names() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let d = nl.create_device(top, res, "1");
        let c = nl.circuit_mut(top);
        let a = c.create_net(Some("A"));
        let b = c.create_net(Some("B"));
        c.connect_terminal(d, 0, Some(a));
        c.connect_terminal(d, 1, Some(b));
        c.join_nets(a, b);
        assert_eq!(c.net_count(), 1);
        assert_eq!(c.net(a).name(), Some("A,B"));
        assert_eq!(c.net(a).terminal_count(), 2);
    }

    #[test]
    fn test_purge_nets_removes_floating() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let d = nl.create_device(top, res, "1");
        let c = nl.circuit_mut(top);
        let a = c.create_net(Some("A"));
        let b = c.create_net(Some("B"));
        let _lonely = c.create_net(Some("LONELY"));
        c.connect_terminal(d, 0, Some(a));
        c.connect_terminal(d, 1, Some(b));
        let purged = nl.purge_nets();
        // All three nets have fewer than two connections.
        assert_eq!(purged, 3);
        assert!(nl.circuit(top).each_net().all(|n| !n.is_floating()));
    }

    #[test]
    fn test_recursive_hierarchy_is_rejected() {
        let mut nl = Netlist::new();
        let a = nl.create_circuit("A");
        let b = nl.create_circuit("B");
        nl.create_subcircuit(a, b, "1");
        nl.create_subcircuit(b, a, "1");
        assert!(matches!(nl.validate_topology(), Err(NetlistError::RecursiveHierarchy)));
    }

    #[test]
    fn test_topological_order() {
        let mut nl = Netlist::new();
        let top = nl.create_circuit("TOP");
        let mid = nl.create_circuit("MID");
        let leaf = nl.create_circuit("LEAF");
        nl.create_subcircuit(top, mid, "1");
        nl.create_subcircuit(mid, leaf, "1");
        let order = nl.each_circuit_top_down().unwrap();
        assert_eq!(order, vec![top, mid, leaf]);
        assert_eq!(nl.top_circuit_count().unwrap(), 1);
        assert_eq!(nl.child_circuits(top), vec![mid]);
        assert_eq!(nl.parent_circuits(leaf), vec![mid]);
    }

    #[test]
    fn test_combine_parallel_resistors() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let d1 = nl.create_device(top, res, "1");
        let d2 = nl.create_device(top, res, "2");
        {
            let c = nl.circuit_mut(top);
            let a = c.create_net(Some("A"));
            let b = c.create_net(Some("B"));
            c.connect_terminal(d1, 0, Some(a));
            c.connect_terminal(d1, 1, Some(b));
            // The second resistor is connected in reverse order.
            c.connect_terminal(d2, 0, Some(b));
            c.connect_terminal(d2, 1, Some(a));
            c.device_mut(d1).set_parameter_value(0, 100.0);
            c.device_mut(d2).set_parameter_value(0, 100.0);
        }
        nl.combine_devices();
        assert_eq!(nl.circuit(top).device_count(), 1);
        assert_eq!(nl.circuit(top).device(d1).parameter_value(0), 50.0);
    }

    #[test]
    fn test_combine_serial_resistors() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let pin_a = nl.add_pin(top, "A");
        let pin_b = nl.add_pin(top, "B");
        let d1 = nl.create_device(top, res, "1");
        let d2 = nl.create_device(top, res, "2");
        {
            let c = nl.circuit_mut(top);
            let a = c.create_net(Some("A"));
            let m = c.create_net(Some("M"));
            let b = c.create_net(Some("B"));
            c.connect_pin(pin_a, Some(a));
            c.connect_pin(pin_b, Some(b));
            c.connect_terminal(d1, 0, Some(a));
            c.connect_terminal(d1, 1, Some(m));
            c.connect_terminal(d2, 0, Some(m));
            c.connect_terminal(d2, 1, Some(b));
            c.device_mut(d1).set_parameter_value(0, 100.0);
            c.device_mut(d2).set_parameter_value(0, 150.0);
        }
        nl.combine_devices();
        let c = nl.circuit(top);
        assert_eq!(c.device_count(), 1);
        assert_eq!(c.device(d1).parameter_value(0), 250.0);
        // The internal node is gone.
        assert_eq!(c.net_by_name("M"), None);
        // The absorbed device is remembered with a terminal redirection.
        assert_eq!(c.device(d1).combined_devices(), &[d2]);
        let redirections = c.device(d1).reconnections();
        assert_eq!(redirections.len(), 1);
        assert_eq!(redirections[0].outer_terminal, 1);
        assert_eq!(redirections[0].fragment_index, 1);
        assert_eq!(redirections[0].fragment_terminal, 1);
    }

    #[test]
    fn test_combine_parallel_capacitors() {
        let mut nl = Netlist::new();
        let cap = nl.add_device_class(device_classes::capacitor("CAP"));
        let top = nl.create_circuit("TOP");
        let d1 = nl.create_device(top, cap, "1");
        let d2 = nl.create_device(top, cap, "2");
        {
            let c = nl.circuit_mut(top);
            let a = c.create_net(Some("A"));
            let b = c.create_net(Some("B"));
            for d in [d1, d2] {
                c.connect_terminal(d, 0, Some(a));
                c.connect_terminal(d, 1, Some(b));
            }
            c.device_mut(d1).set_parameter_value(0, 1e-12);
            c.device_mut(d2).set_parameter_value(0, 2e-12);
        }
        nl.combine_devices();
        assert_eq!(nl.circuit(top).device_count(), 1);
        assert!((nl.circuit(top).device(d1).parameter_value(0) - 3e-12).abs() < 1e-20);
    }

    #[test]
    fn test_flatten_subcircuit() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));

        let sub = nl.create_circuit("SUB");
        let sub_a = nl.add_pin(sub, "A");
        let sub_b = nl.add_pin(sub, "B");
        let d = nl.create_device(sub, res, "1");
        {
            let c = nl.circuit_mut(sub);
            let a = c.create_net(Some("A"));
            let m = c.create_net(Some("MID"));
            c.connect_pin(sub_a, Some(a));
            c.connect_pin(sub_b, Some(m));
            c.connect_terminal(d, 0, Some(a));
            c.connect_terminal(d, 1, Some(m));
        }

        let top = nl.create_circuit("TOP");
        let sc = nl.create_subcircuit(top, sub, "U1");
        {
            let c = nl.circuit_mut(top);
            let x = c.create_net(Some("X"));
            let y = c.create_net(Some("Y"));
            c.connect_subcircuit_pin(sc, 0, Some(x));
            c.connect_subcircuit_pin(sc, 1, Some(y));
        }

        nl.flatten_circuit(sub);

        assert!(nl.circuit_by_name("SUB").is_none());
        let c = nl.circuit(top);
        assert_eq!(c.subcircuit_count(), 0);
        assert_eq!(c.device_count(), 1);
        let device = c.each_device().next().unwrap();
        // The device terminals now connect the outer nets.
        let x = c.net_by_name("X").unwrap();
        let y = c.net_by_name("Y").unwrap();
        assert_eq!(device.net_for_terminal(0), Some(x));
        assert_eq!(device.net_for_terminal(1), Some(y));
        assert_eq!(device.name(), "U1:1");
    }

    #[test]
    fn test_make_top_level_pins_and_simplify() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let d = nl.create_device(top, res, "1");
        {
            let c = nl.circuit_mut(top);
            let a = c.create_net(Some("A"));
            let b = c.create_net(Some("B"));
            c.connect_terminal(d, 0, Some(a));
            c.connect_terminal(d, 1, Some(b));
        }
        nl.simplify().unwrap();
        let c = nl.circuit(top);
        assert_eq!(c.pin_count(), 2);
        assert_eq!(c.pin_by_name("A"), Some(0));
        assert_eq!(c.pin_by_name("B"), Some(1));
    }
}
