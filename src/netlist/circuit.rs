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
//! A `Circuit` is a named module of the netlist. It owns pins, nets, devices and
//! subcircuit instances. All connectivity mutations go through the circuit so that
//! the terminal-to-net links and the back-references stored in the nets stay
//! symmetric.

use std::collections::{BTreeMap, HashMap};

use fnv::FnvHashSet;
use itertools::Itertools;

use super::net::{Net, NetId};
use super::pin::Pin;
use super::device::{Device, DeviceId};
use super::subcircuit::{SubCircuit, SubCircuitId};

/// Identifier of a circuit. Circuit IDs are unique within the netlist.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CircuitId(pub(crate) u32);

impl CircuitId {
    /// Get the integer value of this ID.
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// A circuit.
///
/// Circuits are created with [`Netlist::create_circuit`](super::netlist::Netlist::create_circuit).
/// Devices and subcircuit instances are created through the netlist because they
/// need access to the device classes and to the referenced circuits.
#[derive(Debug, Clone)]
pub struct Circuit {
    /// ID of this circuit. Unique within the netlist.
    pub(crate) id: CircuitId,
    /// Name of the circuit. Unique within the netlist under the case policy.
    pub(crate) name: String,
    /// Optional link to a layout cell.
    pub(crate) cell_index: Option<usize>,
    /// Marks the circuit as intentionally kept during `purge`.
    pub(crate) dont_purge: bool,
    /// Pins of the circuit, ordered. The pin ID is the position in this list.
    pub(crate) pins: Vec<Pin>,
    /// Nets of this circuit.
    pub(crate) nets: BTreeMap<NetId, Net>,
    /// Net lookup by normalized name.
    nets_by_name: HashMap<String, NetId>,
    /// Devices of this circuit.
    pub(crate) devices: BTreeMap<DeviceId, Device>,
    /// Subcircuit instances of this circuit.
    pub(crate) subcircuits: BTreeMap<SubCircuitId, SubCircuit>,
    /// Subcircuit instances in other circuits referencing this circuit,
    /// stored as `(parent circuit, subcircuit)` pairs.
    pub(crate) references: FnvHashSet<(CircuitId, SubCircuitId)>,
    /// Copy of the netlist's case sensitivity policy used for name lookups.
    pub(crate) case_sensitive: bool,
    // ID counters. IDs start at 1 so that `$<id>` fallback names look like
    // the one-based names of the textual format.
    net_id_counter: usize,
    device_id_counter: usize,
    subcircuit_id_counter: usize,
}

impl Circuit {
    pub(crate) fn new(id: CircuitId, name: String, case_sensitive: bool) -> Self {
        Circuit {
            id,
            name,
            cell_index: None,
            dont_purge: false,
            pins: Vec::new(),
            nets: Default::default(),
            nets_by_name: Default::default(),
            devices: Default::default(),
            subcircuits: Default::default(),
            references: Default::default(),
            case_sensitive,
            net_id_counter: 1,
            device_id_counter: 1,
            subcircuit_id_counter: 1,
        }
    }

    /// Get the value of a counter and increment the counter afterwards.
    fn next_id_counter(counter: &mut usize) -> usize {
        let id = *counter;
        *counter += 1;
        id
    }

    fn normalize(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_uppercase()
        }
    }

    /// Rebuild the name lookup tables after the case policy changed.
    ///
    /// # Panics
    /// Panics if folding the case makes two net names collide.
    pub(crate) fn rebuild_name_tables(&mut self) {
        let mut by_name = HashMap::new();
        for n in self.nets.values() {
            if let Some(name) = &n.name {
                let key = if self.case_sensitive { name.clone() } else { name.to_uppercase() };
                let old = by_name.insert(key, n.id);
                assert!(old.is_none(), "Net name collision after changing the case policy.");
            }
        }
        self.nets_by_name = by_name;
    }

    /// Get the ID of this circuit.
    pub fn id(&self) -> CircuitId {
        self.id
    }

    /// Get the name of this circuit.
    pub fn name(&self) -> &String {
        &self.name
    }

    /// Get the layout cell index linked to this circuit.
    pub fn cell_index(&self) -> Option<usize> {
        self.cell_index
    }

    /// Link this circuit to a layout cell.
    pub fn set_cell_index(&mut self, cell_index: Option<usize>) {
        self.cell_index = cell_index;
    }

    /// Returns true if the circuit is protected from `purge`.
    pub fn dont_purge(&self) -> bool {
        self.dont_purge
    }

    /// Protect or unprotect the circuit from `purge`.
    pub fn set_dont_purge(&mut self, f: bool) {
        self.dont_purge = f;
    }

    /// Returns true if any subcircuit instance references this circuit.
    pub fn has_references(&self) -> bool {
        !self.references.is_empty()
    }

    /// Number of subcircuit instances referencing this circuit.
    pub fn num_references(&self) -> usize {
        self.references.len()
    }

    /// Iterate over the `(parent circuit, subcircuit)` pairs referencing this circuit.
    pub fn each_reference(&self) -> impl Iterator<Item = (CircuitId, SubCircuitId)> + '_ {
        self.references.iter().copied()
    }

    // == Pins == //

    /// Get a pin by its ID.
    ///
    /// # Panics
    /// Panics if the pin does not exist.
    pub fn pin(&self, pin_id: usize) -> &Pin {
        &self.pins[pin_id]
    }

    /// Iterate over the pins in ID order.
    pub fn each_pin(&self) -> impl Iterator<Item = &Pin> + ExactSizeIterator {
        self.pins.iter()
    }

    /// Number of pins.
    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    /// Find a pin by its name. Respects the case policy.
    pub fn pin_by_name(&self, name: &str) -> Option<usize> {
        let name = self.normalize(name);
        self.pins.iter()
            .find(|p| self.normalize(&p.name) == name)
            .map(|p| p.id)
    }

    /// Rename a pin.
    ///
    /// # Panics
    /// Panics if the pin does not exist.
    pub fn rename_pin(&mut self, pin_id: usize, name: impl Into<String>) {
        self.pins[pin_id].name = name.into();
    }

    /// Append a pin without updating the instances of this circuit.
    /// Use `Netlist::add_pin` instead which also extends the instances.
    pub(crate) fn add_pin_local(&mut self, name: impl Into<String>) -> usize {
        let id = self.pins.len();
        self.pins.push(Pin::new(name, id));
        id
    }

    /// Remove a pin and renumber the trailing pins.
    /// Use `Netlist::remove_pin` instead which also updates the instances.
    pub(crate) fn remove_pin_local(&mut self, pin_id: usize) {
        self.connect_pin(pin_id, None);
        self.pins.remove(pin_id);
        // Renumber trailing pins and fix the back-references in the nets.
        for i in pin_id..self.pins.len() {
            let old_id = self.pins[i].id;
            self.pins[i].id = i;
            if let Some(net) = self.pins[i].net {
                let net = self.nets.get_mut(&net).expect("Net not found.");
                net.pins.remove(&old_id);
                net.pins.insert(i);
            }
        }
    }

    /// Get the net connected to the pin with the given ID.
    ///
    /// # Panics
    /// Panics if the pin does not exist.
    pub fn net_for_pin(&self, pin_id: usize) -> Option<NetId> {
        self.pins[pin_id].net
    }

    /// Connect a pin to a net. Disconnects the pin when `net` is `None`.
    /// Returns the previously connected net.
    ///
    /// # Panics
    /// Panics if the pin or the net does not exist.
    pub fn connect_pin(&mut self, pin_id: usize, net: Option<NetId>) -> Option<NetId> {
        if let Some(net) = net {
            assert!(self.nets.contains_key(&net), "Net does not live in this circuit.");
        }

        let old_net = std::mem::replace(&mut self.pins[pin_id].net, net);

        if let Some(old_net) = old_net {
            self.nets.get_mut(&old_net).unwrap().pins.remove(&pin_id);
        }
        if let Some(net) = net {
            self.nets.get_mut(&net).unwrap().pins.insert(pin_id);
        }

        old_net
    }

    // == Nets == //

    /// Create a named or anonymous net.
    ///
    /// # Panics
    /// Panics if the name is already in use.
    pub fn create_net(&mut self, name: Option<&str>) -> NetId {
        let id = NetId(Self::next_id_counter(&mut self.net_id_counter));
        if let Some(name) = name {
            let key = self.normalize(name);
            assert!(!self.nets_by_name.contains_key(&key), "Net name already exists.");
            self.nets_by_name.insert(key, id);
        }
        self.nets.insert(id, Net::new(id, name.map(|n| n.to_string())));
        id
    }

    /// Get a net by its ID.
    ///
    /// # Panics
    /// Panics if the net does not exist.
    pub fn net(&self, id: NetId) -> &Net {
        &self.nets[&id]
    }

    pub(crate) fn net_mut(&mut self, id: NetId) -> &mut Net {
        self.nets.get_mut(&id).expect("Net not found.")
    }

    /// Iterate over the nets in ID order.
    pub fn each_net(&self) -> impl Iterator<Item = &Net> {
        self.nets.values()
    }

    /// Iterate over the net IDs in ascending order.
    pub fn each_net_id(&self) -> impl Iterator<Item = NetId> + '_ {
        self.nets.keys().copied()
    }

    /// Number of nets in this circuit.
    pub fn net_count(&self) -> usize {
        self.nets.len()
    }

    /// Find a net by its name. Respects the case policy.
    pub fn net_by_name(&self, name: &str) -> Option<NetId> {
        self.nets_by_name.get(&self.normalize(name)).copied()
    }

    /// Find a net by its cluster ID.
    pub fn net_by_cluster_id(&self, cluster_id: usize) -> Option<NetId> {
        self.nets.values()
            .find(|n| n.cluster_id == cluster_id)
            .map(|n| n.id)
    }

    /// Set the cluster ID of a net.
    ///
    /// # Panics
    /// Panics if the net does not exist.
    pub fn set_net_cluster_id(&mut self, net: NetId, cluster_id: usize) {
        self.net_mut(net).cluster_id = cluster_id;
    }

    /// Rename a net.
    ///
    /// # Panics
    /// Panics if the net does not exist or the name is already taken by another net.
    pub fn rename_net(&mut self, net: NetId, name: Option<&str>) {
        if let Some(name) = name {
            let key = self.normalize(name);
            if let Some(&other) = self.nets_by_name.get(&key) {
                if other != net {
                    panic!("Net name already exists.");
                }
                return;
            }
        }
        let old_name = {
            let n = self.net_mut(net);
            std::mem::replace(&mut n.name, name.map(|s| s.to_string()))
        };
        if let Some(old_name) = old_name {
            let key = self.normalize(&old_name);
            self.nets_by_name.remove(&key);
        }
        if let Some(name) = name {
            self.nets_by_name.insert(self.normalize(name), net);
        }
    }

    /// Disconnect everything from the net and delete it.
    ///
    /// # Panics
    /// Panics if the net does not exist.
    pub fn remove_net(&mut self, net: NetId) {
        let terminals = self.net(net).terminals.iter().copied().collect_vec();
        for (d, t) in terminals {
            self.connect_terminal(d, t, None);
        }
        let sub_pins = self.net(net).subcircuit_pins.iter().copied().collect_vec();
        for (sc, p) in sub_pins {
            self.connect_subcircuit_pin(sc, p, None);
        }
        let pins = self.net(net).pins.iter().copied().collect_vec();
        for p in pins {
            self.connect_pin(p, None);
        }

        let removed = self.nets.remove(&net).expect("Net not found.");
        if let Some(name) = &removed.name {
            let key = self.normalize(name);
            self.nets_by_name.remove(&key);
        }
    }

    /// Join two nets. All connections of `with` are reconnected to `net`,
    /// then `with` is deleted.
    ///
    /// When both nets are named, the surviving net is renamed to `"A,B"`.
    /// When only the second net is named, its name is moved to the survivor.
    ///
    /// # Panics
    /// Panics if either net does not exist.
    pub fn join_nets(&mut self, net: NetId, with: NetId) {
        assert!(self.nets.contains_key(&net), "Net does not live in this circuit.");
        assert!(self.nets.contains_key(&with), "Net does not live in this circuit.");
        if net == with {
            return;
        }

        let combined_name = match (self.net(net).name(), self.net(with).name()) {
            (Some(a), Some(b)) => Some(format!("{},{}", a, b)),
            (None, Some(b)) => Some(b.to_string()),
            _ => None,
        };

        let terminals = self.net(with).terminals.iter().copied().collect_vec();
        for (d, t) in terminals {
            self.connect_terminal(d, t, Some(net));
        }
        let sub_pins = self.net(with).subcircuit_pins.iter().copied().collect_vec();
        for (sc, p) in sub_pins {
            self.connect_subcircuit_pin(sc, p, Some(net));
        }
        let pins = self.net(with).pins.iter().copied().collect_vec();
        for p in pins {
            self.connect_pin(p, Some(net));
        }

        self.remove_net(with);

        if let Some(name) = combined_name {
            let key = self.normalize(&name);
            if !self.nets_by_name.contains_key(&key) {
                self.rename_net(net, Some(&name));
            }
        }
    }

    /// Delete all floating nets. Returns the number of purged nets.
    pub fn purge_nets(&mut self) -> usize {
        let floating = self.nets.values()
            .filter(|n| n.is_floating())
            .map(|n| n.id)
            .collect_vec();
        let num = floating.len();
        for net in floating {
            self.remove_net(net);
        }
        num
    }

    // == Devices == //

    /// Get a device by its ID.
    ///
    /// # Panics
    /// Panics if the device does not exist.
    pub fn device(&self, id: DeviceId) -> &Device {
        &self.devices[&id]
    }

    /// Get a mutable reference to a device, e.g. for setting parameter values.
    ///
    /// # Panics
    /// Panics if the device does not exist.
    pub fn device_mut(&mut self, id: DeviceId) -> &mut Device {
        self.devices.get_mut(&id).expect("Device not found.")
    }

    /// Iterate over the devices in ID order.
    pub fn each_device(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Iterate over the device IDs in ascending order.
    pub fn each_device_id(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.keys().copied()
    }

    /// Number of devices in this circuit.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub(crate) fn insert_device(&mut self, device: Device) -> DeviceId {
        let id = device.id;
        self.devices.insert(id, device);
        id
    }

    pub(crate) fn next_device_id(&mut self) -> DeviceId {
        DeviceId(Self::next_id_counter(&mut self.device_id_counter))
    }

    /// Connect a device terminal to a net. Disconnects when `net` is `None`.
    /// Returns the previously connected net.
    ///
    /// # Panics
    /// Panics if the device, the terminal or the net does not exist.
    pub fn connect_terminal(&mut self, device: DeviceId, terminal_id: usize, net: Option<NetId>) -> Option<NetId> {
        if let Some(net) = net {
            assert!(self.nets.contains_key(&net), "Net does not live in this circuit.");
        }

        let old_net = {
            let d = self.devices.get_mut(&device).expect("Device not found.");
            std::mem::replace(&mut d.terminals[terminal_id], net)
        };

        if let Some(old_net) = old_net {
            self.nets.get_mut(&old_net).unwrap().terminals.remove(&(device, terminal_id));
        }
        if let Some(net) = net {
            self.nets.get_mut(&net).unwrap().terminals.insert((device, terminal_id));
        }

        old_net
    }

    /// Disconnect all terminals of the device and delete it.
    ///
    /// # Panics
    /// Panics if the device does not exist.
    pub fn remove_device(&mut self, device: DeviceId) {
        let num_terminals = self.device(device).terminal_count();
        for t in 0..num_terminals {
            self.connect_terminal(device, t, None);
        }
        self.devices.remove(&device).expect("Device not found.");
    }

    // == Subcircuits == //

    /// Get a subcircuit by its ID.
    ///
    /// # Panics
    /// Panics if the subcircuit does not exist.
    pub fn subcircuit(&self, id: SubCircuitId) -> &SubCircuit {
        &self.subcircuits[&id]
    }

    pub(crate) fn subcircuit_mut(&mut self, id: SubCircuitId) -> &mut SubCircuit {
        self.subcircuits.get_mut(&id).expect("Subcircuit not found.")
    }

    /// Iterate over the subcircuits in ID order.
    pub fn each_subcircuit(&self) -> impl Iterator<Item = &SubCircuit> {
        self.subcircuits.values()
    }

    /// Iterate over the subcircuit IDs in ascending order.
    pub fn each_subcircuit_id(&self) -> impl Iterator<Item = SubCircuitId> + '_ {
        self.subcircuits.keys().copied()
    }

    /// Number of subcircuits in this circuit.
    pub fn subcircuit_count(&self) -> usize {
        self.subcircuits.len()
    }

    pub(crate) fn next_subcircuit_id(&mut self) -> SubCircuitId {
        SubCircuitId(Self::next_id_counter(&mut self.subcircuit_id_counter))
    }

    /// Connect a subcircuit pin to a net. Disconnects when `net` is `None`.
    /// Returns the previously connected net.
    ///
    /// # Panics
    /// Panics if the subcircuit, the pin or the net does not exist.
    pub fn connect_subcircuit_pin(&mut self, subcircuit: SubCircuitId, pin_position: usize, net: Option<NetId>) -> Option<NetId> {
        if let Some(net) = net {
            assert!(self.nets.contains_key(&net), "Net does not live in this circuit.");
        }

        let old_net = {
            let sc = self.subcircuits.get_mut(&subcircuit).expect("Subcircuit not found.");
            std::mem::replace(&mut sc.pins[pin_position], net)
        };

        if let Some(old_net) = old_net {
            self.nets.get_mut(&old_net).unwrap().subcircuit_pins.remove(&(subcircuit, pin_position));
        }
        if let Some(net) = net {
            self.nets.get_mut(&net).unwrap().subcircuit_pins.insert((subcircuit, pin_position));
        }

        old_net
    }

    /// Disconnect all pins of the subcircuit and remove it from this circuit.
    /// The back-reference stored in the referenced circuit is *not* removed here,
    /// use `Netlist::remove_subcircuit` instead.
    pub(crate) fn remove_subcircuit_local(&mut self, subcircuit: SubCircuitId) {
        let num_pins = self.subcircuit(subcircuit).pin_count();
        for p in 0..num_pins {
            self.connect_subcircuit_pin(subcircuit, p, None);
        }
        self.subcircuits.remove(&subcircuit).expect("Subcircuit not found.");
    }
}
