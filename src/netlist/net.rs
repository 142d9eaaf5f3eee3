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
//! A net represents an electric potential inside a circuit. It connects device terminals,
//! subcircuit pins and the outward pins of the circuit it lives in.

use fnv::FnvHashSet;

use super::device::DeviceId;
use super::subcircuit::SubCircuitId;

/// Identifier of a net. Net IDs are unique within their circuit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NetId(pub(crate) usize);

impl NetId {
    /// Get the integer value of this ID.
    pub fn value(&self) -> usize {
        self.0
    }
}

/// A net.
///
/// The net stores back-references to everything that is connected to it:
/// device terminals as `(device, terminal id)` pairs, subcircuit pins as
/// `(subcircuit, pin position)` pairs and outward circuit pins by their pin ID.
/// The back-references are kept symmetric with the terminal-to-net links stored
/// in the devices, subcircuits and pins. All mutations must go through the
/// owning [`Circuit`](super::circuit::Circuit).
#[derive(Debug, Clone)]
pub struct Net {
    /// ID of the net. Unique within the parent circuit.
    pub(crate) id: NetId,
    /// Name of the net. Nets may be anonymous.
    pub(crate) name: Option<String>,
    /// Opaque link to an external shape cluster of the layout extractor.
    pub(crate) cluster_id: usize,
    /// Device terminals connected to this net.
    pub(crate) terminals: FnvHashSet<(DeviceId, usize)>,
    /// Subcircuit pins connected to this net.
    pub(crate) subcircuit_pins: FnvHashSet<(SubCircuitId, usize)>,
    /// Outward pins of the parent circuit connected to this net.
    pub(crate) pins: FnvHashSet<usize>,
}

impl Net {
    pub(crate) fn new(id: NetId, name: Option<String>) -> Self {
        Net {
            id,
            name,
            cluster_id: 0,
            terminals: Default::default(),
            subcircuit_pins: Default::default(),
            pins: Default::default(),
        }
    }

    /// Get the ID of this net.
    pub fn id(&self) -> NetId {
        self.id
    }

    /// Get the name of this net.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the cluster ID which links the net to a shape cluster
    /// of the layout extractor. `0` means no cluster is attached.
    pub fn cluster_id(&self) -> usize {
        self.cluster_id
    }

    /// Get a name for the net which is non-empty also for anonymous nets.
    ///
    /// Anonymous nets are represented as `$<cluster id>` when a cluster is
    /// attached and as `$I<n>` for purely internal IDs.
    pub fn expanded_name(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if self.cluster_id > usize::MAX / 2 {
            format!("$I{}", (usize::MAX - self.cluster_id) + 1)
        } else if self.cluster_id > 0 {
            format!("${}", self.cluster_id)
        } else {
            format!("${}", self.id.0)
        }
    }

    /// Iterate over the device terminals attached to this net.
    pub fn each_terminal(&self) -> impl Iterator<Item = (DeviceId, usize)> + '_ {
        self.terminals.iter().copied()
    }

    /// Iterate over the subcircuit pins attached to this net.
    pub fn each_subcircuit_pin(&self) -> impl Iterator<Item = (SubCircuitId, usize)> + '_ {
        self.subcircuit_pins.iter().copied()
    }

    /// Iterate over the outward circuit pins attached to this net.
    pub fn each_pin(&self) -> impl Iterator<Item = usize> + '_ {
        self.pins.iter().copied()
    }

    /// Number of device terminals attached to this net.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Number of subcircuit pins attached to this net.
    pub fn subcircuit_pin_count(&self) -> usize {
        self.subcircuit_pins.len()
    }

    /// Number of outward circuit pins attached to this net.
    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    /// Total number of connections made to this net.
    pub fn num_connections(&self) -> usize {
        self.terminal_count() + self.subcircuit_pin_count() + self.pin_count()
    }

    /// A net is floating if it has fewer than two connections.
    pub fn is_floating(&self) -> bool {
        self.num_connections() < 2
    }

    /// A net is passive if neither devices nor subcircuits are attached to it.
    pub fn is_passive(&self) -> bool {
        self.terminals.is_empty() && self.subcircuit_pins.is_empty()
    }

    /// A net is an internal node if it connects exactly two device terminals
    /// and nothing else.
    pub fn is_internal(&self) -> bool {
        self.pins.is_empty() && self.subcircuit_pins.is_empty() && self.terminals.len() == 2
    }
}
