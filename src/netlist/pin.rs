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
//! A pin is an externally visible port of a circuit.

use super::net::NetId;

/// An outward pin of a circuit.
///
/// The pin ID equals the position of the pin in the circuit's pin list.
/// When a pin is removed, the IDs of the trailing pins are renumbered
/// to keep the IDs dense.
#[derive(Debug, Clone)]
pub struct Pin {
    /// Name of the pin. May be empty.
    pub(crate) name: String,
    /// ID of the pin. Equal to its position in the pin list.
    pub(crate) id: usize,
    /// The net this pin is connected to on the inside of the circuit.
    pub(crate) net: Option<NetId>,
}

impl Pin {
    pub(crate) fn new(name: impl Into<String>, id: usize) -> Self {
        Pin {
            name: name.into(),
            id,
            net: None,
        }
    }

    /// Get the name of the pin.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the ID of the pin. The ID equals the position in the circuit's pin list.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the net connected to this pin from the inside of the circuit.
    pub fn net(&self) -> Option<NetId> {
        self.net
    }

    /// Get a non-empty name for the pin. Unnamed pins are represented
    /// as `$<n>` where `n` is the one-based pin position.
    pub fn expanded_name(&self) -> String {
        if self.name.is_empty() {
            format!("${}", self.id + 1)
        } else {
            self.name.clone()
        }
    }
}
