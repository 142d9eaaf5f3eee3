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
//! A device is an instance of a device class (resistor, capacitor, transistor, ...).

use super::net::NetId;
use super::device_class::DeviceClassId;

/// Identifier of a device. Device IDs are unique within their circuit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    /// Get the integer value of this ID.
    pub fn value(&self) -> usize {
        self.0
    }
}

/// A redirection of an outer device terminal onto a terminal of one of the
/// fragments folded into a combined device.
///
/// Combined devices keep the identity of the devices they absorbed so that an
/// external layout link can still resolve which geometry a terminal belongs
/// to, without duplicating that geometry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TerminalRedirection {
    /// The terminal of the combined device.
    pub outer_terminal: usize,
    /// Index into the combined fragment list: 0 is the device itself,
    /// `n + 1` is the fragment `combined_devices()[n]`.
    pub fragment_index: usize,
    /// The terminal within the fragment.
    pub fragment_terminal: usize,
}

/// An actual device inside a circuit.
///
/// The device refers to a [`DeviceClass`](super::device_class::DeviceClass)
/// which defines its terminals and parameters. The terminal-to-net links are
/// kept symmetric with the back-references stored in the nets.
#[derive(Debug, Clone)]
pub struct Device {
    /// ID of the device. Unique within the parent circuit.
    pub(crate) id: DeviceId,
    /// Name of the device. May be empty.
    pub(crate) name: String,
    /// The class of this device.
    pub(crate) class: DeviceClassId,
    /// Net connected to each terminal, indexed by terminal ID.
    pub(crate) terminals: Vec<Option<NetId>>,
    /// Parameter values, indexed by parameter ID.
    pub(crate) parameters: Vec<f64>,
    /// IDs of the devices which were folded into this one by device
    /// combination. The devices themselves are deleted.
    pub(crate) combined_devices: Vec<DeviceId>,
    /// Terminal redirections of a combined device.
    pub(crate) reconnections: Vec<TerminalRedirection>,
}

impl Device {
    pub(crate) fn new(
        id: DeviceId,
        class: DeviceClassId,
        name: impl Into<String>,
        num_terminals: usize,
        parameter_defaults: Vec<f64>,
    ) -> Self {
        Device {
            id,
            name: name.into(),
            class,
            terminals: vec![None; num_terminals],
            parameters: parameter_defaults,
            combined_devices: Vec::new(),
            reconnections: Vec::new(),
        }
    }

    /// Get the ID of this device.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Get the name of this device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the name of this device.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Get a non-empty name for the device. Unnamed devices are
    /// represented as `$<id>`.
    pub fn expanded_name(&self) -> String {
        if self.name.is_empty() {
            format!("${}", self.id.0)
        } else {
            self.name.clone()
        }
    }

    /// Get the ID of the device class.
    pub fn class_id(&self) -> DeviceClassId {
        self.class
    }

    /// Get the net attached to the given terminal.
    ///
    /// # Panics
    /// Panics if the terminal ID is out of range.
    pub fn net_for_terminal(&self, terminal_id: usize) -> Option<NetId> {
        self.terminals[terminal_id]
    }

    /// Number of terminals of this device.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Get the value of the parameter with the given ID.
    ///
    /// # Panics
    /// Panics if the parameter ID is out of range.
    pub fn parameter_value(&self, param_id: usize) -> f64 {
        self.parameters[param_id]
    }

    /// Set the value of the parameter with the given ID.
    ///
    /// # Panics
    /// Panics if the parameter ID is out of range.
    pub fn set_parameter_value(&mut self, param_id: usize, value: f64) {
        self.parameters[param_id] = value;
    }

    /// IDs of the devices folded into this one by device combination.
    pub fn combined_devices(&self) -> &[DeviceId] {
        &self.combined_devices
    }

    /// Terminal redirections recorded by device combination.
    pub fn reconnections(&self) -> &[TerminalRedirection] {
        &self.reconnections
    }
}
