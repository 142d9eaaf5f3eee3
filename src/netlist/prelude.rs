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
//! The `prelude` re-exports the netlist data types.

pub use super::netlist::{Netlist, NetlistError, NetlistLocker};
pub use super::circuit::{Circuit, CircuitId};
pub use super::net::{Net, NetId};
pub use super::pin::Pin;
pub use super::device::{Device, DeviceId, TerminalRedirection};
pub use super::subcircuit::{SubCircuit, SubCircuitId};
pub use super::device_class::{
    DeviceClass, DeviceClassId, DeviceKind, CombinerKind,
    TerminalDefinition, ParameterDefinition, EqualDeviceParameters,
};
pub use super::device_classes::*;
