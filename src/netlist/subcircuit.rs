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
//! A subcircuit is an instance of another circuit placed inside a parent circuit.

use super::net::NetId;
use super::circuit::CircuitId;

/// Identifier of a subcircuit. Subcircuit IDs are unique within their circuit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubCircuitId(pub(crate) usize);

impl SubCircuitId {
    /// Get the integer value of this ID.
    pub fn value(&self) -> usize {
        self.0
    }
}

/// An instance of another circuit.
///
/// The referenced circuit must live in the same netlist. The reference creates
/// a parent-to-child dependency which is used by the topological sort of the
/// netlist.
#[derive(Debug, Clone)]
pub struct SubCircuit {
    /// ID of the subcircuit. Unique within the parent circuit.
    pub(crate) id: SubCircuitId,
    /// Name of the subcircuit. May be empty.
    pub(crate) name: String,
    /// The circuit this instance refers to.
    pub(crate) circuit: CircuitId,
    /// Net connected to each pin, indexed by pin position of the referenced circuit.
    pub(crate) pins: Vec<Option<NetId>>,
}

impl SubCircuit {
    pub(crate) fn new(
        id: SubCircuitId,
        circuit: CircuitId,
        name: impl Into<String>,
        num_pins: usize,
    ) -> Self {
        SubCircuit {
            id,
            name: name.into(),
            circuit,
            pins: vec![None; num_pins],
        }
    }

    /// Get the ID of this subcircuit.
    pub fn id(&self) -> SubCircuitId {
        self.id
    }

    /// Get the name of this subcircuit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a non-empty name for the subcircuit. Unnamed subcircuits are
    /// represented as `$<id>`.
    pub fn expanded_name(&self) -> String {
        if self.name.is_empty() {
            format!("${}", self.id.0)
        } else {
            self.name.clone()
        }
    }

    /// Get the ID of the referenced circuit.
    pub fn circuit_ref(&self) -> CircuitId {
        self.circuit
    }

    /// Get the net attached to the given pin.
    ///
    /// # Panics
    /// Panics if the pin position is out of range.
    pub fn net_for_pin(&self, pin_position: usize) -> Option<NetId> {
        self.pins[pin_position]
    }

    /// Number of pins of this instance.
    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }
}
