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
//! A cross-reference database built from compare events. It records the
//! net, device, pin and subcircuit pairings per circuit pair together with
//! the log entries.

use crate::netlist::prelude::*;
use super::logger::{CompareLogger, Severity};

/// How a pair of objects relates.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MatchStatus {
    /// The objects match.
    Match,
    /// The objects match topologically, but the pairing was ambiguous.
    MatchAmbiguous,
    /// The devices match topologically but their parameters deviate.
    MatchWithParameters,
    /// The devices match topologically but their classes deviate.
    MatchWithDifferentClasses,
    /// No counterpart was found.
    Mismatch,
    /// The pair was skipped (e.g. a circuit with failed children).
    Skipped,
}

/// A pairing of two objects identified by ID and display name.
/// One side is `None` for mismatches.
#[derive(Debug, Clone)]
pub struct PairRecord<T> {
    /// The object of the first netlist.
    pub a: Option<(T, String)>,
    /// The object of the second netlist.
    pub b: Option<(T, String)>,
    /// The relation of the pair.
    pub status: MatchStatus,
}

/// All pairings recorded for one circuit pair.
#[derive(Debug, Clone, Default)]
pub struct CircuitPairRecord {
    /// Name of the circuit in the first netlist.
    pub circuit_a: String,
    /// Name of the circuit in the second netlist.
    pub circuit_b: String,
    /// The verdict for this circuit pair.
    pub matching: bool,
    /// Net pairings.
    pub nets: Vec<PairRecord<NetId>>,
    /// Device pairings.
    pub devices: Vec<PairRecord<DeviceId>>,
    /// Pin pairings.
    pub pins: Vec<PairRecord<usize>>,
    /// Subcircuit pairings.
    pub subcircuits: Vec<PairRecord<SubCircuitId>>,
    /// Free-form log entries.
    pub log_entries: Vec<(Severity, String)>,
}

/// A compare logger which accumulates all pairings in memory.
#[derive(Debug, Clone, Default)]
pub struct CrossReference {
    /// Records per compared circuit pair, in compare order.
    pub circuit_pairs: Vec<CircuitPairRecord>,
    /// Circuits without counterpart, as `(name in a, name in b)`.
    pub unmatched_circuits: Vec<(Option<String>, Option<String>)>,
    /// Skipped circuit pairs, as `(name in a, name in b)`.
    pub skipped_circuits: Vec<(Option<String>, Option<String>)>,
    /// Device classes without counterpart, as `(name in a, name in b)`.
    pub unmatched_device_classes: Vec<(Option<String>, Option<String>)>,
    current: Option<CircuitPairRecord>,
}

impl CrossReference {
    /// Create an empty cross-reference.
    pub fn new() -> Self {
        Default::default()
    }

    fn current(&mut self) -> &mut CircuitPairRecord {
        self.current.get_or_insert_with(Default::default)
    }

    fn pair<T>(a: Option<(T, String)>, b: Option<(T, String)>, status: MatchStatus) -> PairRecord<T> {
        PairRecord { a, b, status }
    }

    fn net_ref(net: Option<&Net>) -> Option<(NetId, String)> {
        net.map(|n| (n.id(), n.expanded_name()))
    }

    fn device_ref(device: Option<&Device>) -> Option<(DeviceId, String)> {
        device.map(|d| (d.id(), d.expanded_name()))
    }

    fn pin_ref(pin: Option<&Pin>) -> Option<(usize, String)> {
        pin.map(|p| (p.id(), p.expanded_name()))
    }

    fn subcircuit_ref(sc: Option<&SubCircuit>) -> Option<(SubCircuitId, String)> {
        sc.map(|s| (s.id(), s.expanded_name()))
    }
}

impl CompareLogger for CrossReference {
    fn begin_circuit(&mut self, a: &Circuit, b: &Circuit) {
        self.current = Some(CircuitPairRecord {
            circuit_a: a.name().to_string(),
            circuit_b: b.name().to_string(),
            ..Default::default()
        });
    }

    fn end_circuit(&mut self, _a: &Circuit, _b: &Circuit, matching: bool, _msg: &str) {
        if let Some(mut record) = self.current.take() {
            record.matching = matching;
            self.circuit_pairs.push(record);
        }
    }

    fn circuit_skipped(&mut self, a: Option<&Circuit>, b: Option<&Circuit>, _msg: &str) {
        self.skipped_circuits.push((
            a.map(|c| c.name().to_string()),
            b.map(|c| c.name().to_string()),
        ));
    }

    fn circuit_mismatch(&mut self, a: Option<&Circuit>, b: Option<&Circuit>, _msg: &str) {
        self.unmatched_circuits.push((
            a.map(|c| c.name().to_string()),
            b.map(|c| c.name().to_string()),
        ));
    }

    fn device_class_mismatch(&mut self, a: Option<&DeviceClass>, b: Option<&DeviceClass>, _msg: &str) {
        self.unmatched_device_classes.push((
            a.map(|c| c.name().to_string()),
            b.map(|c| c.name().to_string()),
        ));
    }

    fn log_entry(&mut self, severity: Severity, msg: &str) {
        self.current().log_entries.push((severity, msg.to_string()));
    }

    fn match_nets(&mut self, a: &Net, b: &Net) {
        let record = Self::pair(Self::net_ref(Some(a)), Self::net_ref(Some(b)), MatchStatus::Match);
        self.current().nets.push(record);
    }

    fn match_ambiguous_nets(&mut self, a: &Net, b: &Net, _msg: &str) {
        let record = Self::pair(Self::net_ref(Some(a)), Self::net_ref(Some(b)), MatchStatus::MatchAmbiguous);
        self.current().nets.push(record);
    }

    fn net_mismatch(&mut self, a: Option<&Net>, b: Option<&Net>, _msg: &str) {
        let record = Self::pair(Self::net_ref(a), Self::net_ref(b), MatchStatus::Mismatch);
        self.current().nets.push(record);
    }

    fn match_devices(&mut self, a: &Device, b: &Device) {
        let record = Self::pair(Self::device_ref(Some(a)), Self::device_ref(Some(b)), MatchStatus::Match);
        self.current().devices.push(record);
    }

    fn match_devices_with_different_parameters(&mut self, a: &Device, b: &Device) {
        let record = Self::pair(Self::device_ref(Some(a)), Self::device_ref(Some(b)),
                                MatchStatus::MatchWithParameters);
        self.current().devices.push(record);
    }

    fn match_devices_with_different_device_classes(&mut self, a: &Device, b: &Device) {
        let record = Self::pair(Self::device_ref(Some(a)), Self::device_ref(Some(b)),
                                MatchStatus::MatchWithDifferentClasses);
        self.current().devices.push(record);
    }

    fn device_mismatch(&mut self, a: Option<&Device>, b: Option<&Device>, _msg: &str) {
        let record = Self::pair(Self::device_ref(a), Self::device_ref(b), MatchStatus::Mismatch);
        self.current().devices.push(record);
    }

    fn match_pins(&mut self, a: &Pin, b: &Pin) {
        let record = Self::pair(Self::pin_ref(Some(a)), Self::pin_ref(Some(b)), MatchStatus::Match);
        self.current().pins.push(record);
    }

    fn pin_mismatch(&mut self, a: Option<&Pin>, b: Option<&Pin>, _msg: &str) {
        let record = Self::pair(Self::pin_ref(a), Self::pin_ref(b), MatchStatus::Mismatch);
        self.current().pins.push(record);
    }

    fn match_subcircuits(&mut self, a: &SubCircuit, b: &SubCircuit) {
        let record = Self::pair(Self::subcircuit_ref(Some(a)), Self::subcircuit_ref(Some(b)),
                                MatchStatus::Match);
        self.current().subcircuits.push(record);
    }

    fn subcircuit_mismatch(&mut self, a: Option<&SubCircuit>, b: Option<&SubCircuit>, _msg: &str) {
        let record = Self::pair(Self::subcircuit_ref(a), Self::subcircuit_ref(b), MatchStatus::Mismatch);
        self.current().subcircuits.push(record);
    }
}
