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
//! The event-shaped receiver interface for netlist compare results.

use crate::netlist::prelude::*;

/// Severity of a compare log entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Severity {
    /// Informational entry.
    Info,
    /// A deviation which does not necessarily fail the compare.
    Warning,
    /// A deviation which fails the compare.
    Error,
}

/// A receiver for netlist compare events.
///
/// In the `*_mismatch` events, one side is `None` when there is no
/// counterpart for the other side. All methods default to no-ops.
#[allow(unused_variables)]
pub trait CompareLogger {
    /// Begin logging for a pair of netlists.
    fn begin_netlist(&mut self, a: &Netlist, b: &Netlist) {}

    /// End logging for a pair of netlists.
    fn end_netlist(&mut self, a: &Netlist, b: &Netlist) {}

    /// A device class has no counterpart in the other netlist.
    fn device_class_mismatch(&mut self, a: Option<&DeviceClass>, b: Option<&DeviceClass>, msg: &str) {}

    /// Begin logging for a pair of circuits.
    fn begin_circuit(&mut self, a: &Circuit, b: &Circuit) {}

    /// End logging for a pair of circuits.
    fn end_circuit(&mut self, a: &Circuit, b: &Circuit, matching: bool, msg: &str) {}

    /// A circuit pair is skipped because a child pair could not be matched.
    fn circuit_skipped(&mut self, a: Option<&Circuit>, b: Option<&Circuit>, msg: &str) {}

    /// A circuit has no counterpart in the other netlist.
    fn circuit_mismatch(&mut self, a: Option<&Circuit>, b: Option<&Circuit>, msg: &str) {}

    /// A free-form log entry for the current circuit pair.
    fn log_entry(&mut self, severity: Severity, msg: &str) {}

    /// Two nets match exactly.
    fn match_nets(&mut self, a: &Net, b: &Net) {}

    /// Two nets are matched, but the pairing was an ambiguous choice.
    fn match_ambiguous_nets(&mut self, a: &Net, b: &Net, msg: &str) {}

    /// A net could not be matched.
    fn net_mismatch(&mut self, a: Option<&Net>, b: Option<&Net>, msg: &str) {}

    /// Two devices match exactly.
    fn match_devices(&mut self, a: &Device, b: &Device) {}

    /// Two devices are matched but their parameters deviate.
    fn match_devices_with_different_parameters(&mut self, a: &Device, b: &Device) {}

    /// Two devices are matched but their device classes differ.
    fn match_devices_with_different_device_classes(&mut self, a: &Device, b: &Device) {}

    /// A device could not be matched.
    fn device_mismatch(&mut self, a: Option<&Device>, b: Option<&Device>, msg: &str) {}

    /// Two pins of the current circuit pair are matched.
    fn match_pins(&mut self, a: &Pin, b: &Pin) {}

    /// A pin could not be matched.
    fn pin_mismatch(&mut self, a: Option<&Pin>, b: Option<&Pin>, msg: &str) {}

    /// Two subcircuits match.
    fn match_subcircuits(&mut self, a: &SubCircuit, b: &SubCircuit) {}

    /// A subcircuit could not be matched.
    fn subcircuit_mismatch(&mut self, a: Option<&SubCircuit>, b: Option<&SubCircuit>, msg: &str) {}
}

/// A logger which discards all events. This is the default logger.
#[derive(Debug, Clone, Default)]
pub struct NullCompareLogger;

impl CompareLogger for NullCompareLogger {}
