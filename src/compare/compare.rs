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
//! The netlist comparer.
//!
//! Circuits are compared bottom-up: the pin mapping established for a child
//! circuit pair is used to translate subcircuit pin labels when the parents
//! are compared. Circuits whose children failed to match are skipped, because
//! a mismatched child poisons the parent's graph.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::debug;
use thiserror::Error;

use crate::netlist::netlist::NetlistError;
use crate::netlist::prelude::*;
use super::categorizer::{CircuitCategorizer, CircuitPinCategorizer, DeviceCategorizer, Side, IGNORED_CATEGORY};
use super::core::CompareCore;
use super::graph::{DeviceFilter, NetGraph, NodeKind, OtherNet};
use super::logger::{CompareLogger, NullCompareLogger, Severity};

/// Errors raised by a compare run. Mismatches are not errors; they are
/// streamed to the logger and reflected in the boolean verdict.
#[derive(Debug, Error)]
pub enum CompareError {
    /// A structural netlist error, e.g. a recursive hierarchy.
    #[error(transparent)]
    Netlist(#[from] NetlistError),
    /// The compare run was canceled through the cancellation flag.
    #[error("compare canceled")]
    Canceled,
}

/// The pin mapping between two matched circuits.
#[derive(Debug, Clone, Default)]
pub(crate) struct CircuitMapper {
    pub other: Option<CircuitId>,
    a_to_b: FnvHashMap<usize, usize>,
    b_to_a: FnvHashMap<usize, usize>,
}

impl CircuitMapper {
    pub fn map_pin(&mut self, a_pin: usize, b_pin: usize) {
        self.a_to_b.insert(a_pin, b_pin);
        self.b_to_a.insert(b_pin, a_pin);
    }

    pub fn b_pin_for_a_pin(&self, a_pin: usize) -> Option<usize> {
        self.a_to_b.get(&a_pin).copied()
    }
}

/// The netlist comparer.
///
/// The comparer is configured first (equivalences, tolerances, limits) and
/// then run with [`NetlistComparer::compare`]. It does not modify its inputs;
/// results are streamed to a [`CompareLogger`] such as
/// [`CrossReference`](super::xref::CrossReference).
pub struct NetlistComparer {
    max_depth: usize,
    max_n_branch: usize,
    depth_first: bool,
    dont_consider_net_names: bool,
    cap_threshold: f64,
    res_threshold: f64,
    same_nets: Vec<(CircuitId, NetId, CircuitId, NetId, bool)>,
    same_circuits: Vec<(CircuitId, CircuitId)>,
    same_device_classes: Vec<(DeviceClassId, DeviceClassId)>,
    equivalent_pins: Vec<(CircuitId, Vec<usize>)>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for NetlistComparer {
    fn default() -> Self {
        Self::new()
    }
}

impl NetlistComparer {
    /// Create a comparer with default settings.
    pub fn new() -> Self {
        NetlistComparer {
            max_depth: 64,
            max_n_branch: 500,
            depth_first: true,
            dont_consider_net_names: false,
            cap_threshold: 0.0,
            res_threshold: 0.0,
            same_nets: Vec::new(),
            same_circuits: Vec::new(),
            same_device_classes: Vec::new(),
            equivalent_pins: Vec::new(),
            cancel: None,
        }
    }

    /// Mark two nets as identical a priori. `ca`/`na` address the first
    /// netlist, `cb`/`nb` the second one.
    pub fn same_nets(&mut self, ca: CircuitId, na: NetId, cb: CircuitId, nb: NetId, must_match: bool) {
        self.same_nets.push((ca, na, cb, nb, must_match));
    }

    /// Mark two circuits as identical. By default circuits with the same
    /// name are identical.
    pub fn same_circuits(&mut self, ca: CircuitId, cb: CircuitId) {
        self.same_circuits.push((ca, cb));
    }

    /// Mark two device classes as identical. By default classes with the
    /// same name are identical.
    pub fn same_device_classes(&mut self, ca: DeviceClassId, cb: DeviceClassId) {
        self.same_device_classes.push((ca, cb));
    }

    /// Mark pins of a circuit of the *second* netlist as swappable.
    /// The equivalence is mirrored onto the matched circuit of the first
    /// netlist.
    pub fn equivalent_pins(&mut self, cb: CircuitId, pin_ids: &[usize]) {
        self.equivalent_pins.push((cb, pin_ids.to_vec()));
    }

    /// Exclude capacitors with less than the given capacitance.
    pub fn exclude_caps(&mut self, threshold: f64) {
        self.cap_threshold = threshold;
    }

    /// Exclude resistors with more than the given resistance.
    pub fn exclude_resistors(&mut self, threshold: f64) {
        self.res_threshold = threshold;
    }

    /// Limit the search depth of the backtracking algorithm.
    pub fn set_max_depth(&mut self, n: usize) {
        self.max_depth = n;
    }

    /// Get the maximum search depth.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Limit the branch complexity (the product of the open ambiguity group
    /// sizes) of the backtracking algorithm.
    pub fn set_max_branch_complexity(&mut self, n: usize) {
        self.max_n_branch = n;
    }

    /// Get the maximum branch complexity.
    pub fn max_branch_complexity(&self) -> usize {
        self.max_n_branch
    }

    /// Choose depth-first (default) or breadth-first frontier expansion.
    pub fn set_depth_first(&mut self, f: bool) {
        self.depth_first = f;
    }

    /// Ignore net names as matching hints. Mainly intended for testing.
    pub fn set_dont_consider_net_names(&mut self, f: bool) {
        self.dont_consider_net_names = f;
    }

    /// Install a cancellation flag checked between circuit pairs.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn check_cancel(&self) -> Result<(), CompareError> {
        if let Some(flag) = &self.cancel {
            if flag.load(AtomicOrdering::Relaxed) {
                return Err(CompareError::Canceled);
            }
        }
        Ok(())
    }

    /// Compare two netlists. Returns true when every circuit matched.
    pub fn compare(&self, a: &Netlist, b: &Netlist) -> Result<bool, CompareError> {
        let mut logger = NullCompareLogger;
        self.compare_with_logger(a, b, &mut logger)
    }

    /// Compare two netlists, streaming all pairings and deviations to the
    /// given logger. Returns true when every circuit matched.
    pub fn compare_with_logger(
        &self,
        a: &Netlist,
        b: &Netlist,
        logger: &mut dyn CompareLogger,
    ) -> Result<bool, CompareError> {
        let case_sensitive = a.is_case_sensitive() && b.is_case_sensitive();

        let mut device_cat = DeviceCategorizer::new();
        device_cat.set_case_sensitive(case_sensitive);
        for (ca, cb) in &self.same_device_classes {
            device_cat.same_class(Some((Side::A, *ca)), Some((Side::B, *cb)));
        }
        for cls in a.each_device_class() {
            let cat = device_cat.cat_for_device_class(Side::A, cls.id(), cls.name().as_str());
            if cls.is_strict() {
                device_cat.set_strict_device_category(cat);
            }
        }
        for cls in b.each_device_class() {
            let cat = device_cat.cat_for_device_class(Side::B, cls.id(), cls.name().as_str());
            if cls.is_strict() {
                device_cat.set_strict_device_category(cat);
            }
        }

        let mut circuit_cat = CircuitCategorizer::new();
        circuit_cat.set_case_sensitive(case_sensitive);
        for (ca, cb) in &self.same_circuits {
            circuit_cat.same_circuit(Some((Side::A, *ca)), Some((Side::B, *cb)));
        }

        let mut pin_cat = CircuitPinCategorizer::new();
        for (cb, pins) in &self.equivalent_pins {
            pin_cat.map_pins(Side::B, *cb, pins);
        }

        logger.begin_netlist(a, b);

        self.report_device_class_mismatches(a, b, &mut device_cat, logger);

        // Pair the circuits through their categories.
        let mut cat_a: FnvHashMap<usize, Vec<CircuitId>> = Default::default();
        for c in a.each_circuit() {
            let cat = circuit_cat.cat_for_circuit(Side::A, c.id(), c.name().as_str());
            cat_a.entry(cat).or_default().push(c.id());
        }
        let mut cat_b: FnvHashMap<usize, Vec<CircuitId>> = Default::default();
        for c in b.each_circuit() {
            let cat = circuit_cat.cat_for_circuit(Side::B, c.id(), c.name().as_str());
            cat_b.entry(cat).or_default().push(c.id());
        }

        let mut all_good = true;
        let mut pair_for_a: FnvHashMap<CircuitId, CircuitId> = Default::default();

        for (cat, in_a) in cat_a.iter().sorted_by_key(|(cat, _)| **cat) {
            let empty = Vec::new();
            let in_b = cat_b.get(cat).unwrap_or(&empty);
            for (ca, cb) in in_a.iter().zip(in_b) {
                pair_for_a.insert(*ca, *cb);
            }
            for ca in in_a.iter().skip(in_b.len()) {
                logger.circuit_mismatch(Some(a.circuit(*ca)), None, "");
                all_good = false;
            }
        }
        for (cat, in_b) in cat_b.iter().sorted_by_key(|(cat, _)| **cat) {
            let matched = cat_a.get(cat).map(|v| v.len()).unwrap_or(0);
            for cb in in_b.iter().skip(matched) {
                logger.circuit_mismatch(None, Some(b.circuit(*cb)), "");
                all_good = false;
            }
        }

        // Compare bottom-up so that child pin mappings are available when
        // the parents are compared.
        let mut bottom_up = a.compute_topology()?.top_down;
        bottom_up.reverse();

        let mut verified_a: FnvHashSet<CircuitId> = Default::default();
        let mut verified_b: FnvHashSet<CircuitId> = Default::default();
        let mut mappers: FnvHashMap<CircuitId, CircuitMapper> = Default::default();

        for ca in bottom_up {
            let cb = match pair_for_a.get(&ca) {
                Some(cb) => *cb,
                None => continue,
            };
            self.check_cancel()?;

            let children_ok = a.child_circuits(ca).iter().all(|c| verified_a.contains(c))
                && b.child_circuits(cb).iter().all(|c| verified_b.contains(c));
            if !children_ok {
                logger.circuit_skipped(Some(a.circuit(ca)), Some(b.circuit(cb)),
                                       "Circuit is skipped because some child circuits failed to match");
                all_good = false;
                continue;
            }

            derive_pin_equivalence(a, ca, b, cb, &mut pin_cat);

            logger.begin_circuit(a.circuit(ca), b.circuit(cb));
            let (good, mapper) = self.compare_circuits(
                a, ca, b, cb, &mut device_cat, &mut circuit_cat, &pin_cat,
                &mappers, case_sensitive, logger);
            logger.end_circuit(a.circuit(ca), b.circuit(cb), good, "");

            if good {
                verified_a.insert(ca);
                verified_b.insert(cb);
            } else {
                all_good = false;
            }
            mappers.insert(ca, mapper);
        }

        logger.end_netlist(a, b);
        Ok(all_good)
    }

    fn report_device_class_mismatches(
        &self,
        a: &Netlist,
        b: &Netlist,
        device_cat: &mut DeviceCategorizer,
        logger: &mut dyn CompareLogger,
    ) {
        let used_a: FnvHashSet<DeviceClassId> = a.each_circuit()
            .flat_map(|c| c.each_device().map(|d| d.class_id()))
            .collect();
        let used_b: FnvHashSet<DeviceClassId> = b.each_circuit()
            .flat_map(|c| c.each_device().map(|d| d.class_id()))
            .collect();

        let cats_a: FnvHashMap<usize, DeviceClassId> = a.each_device_class()
            .map(|cls| (device_cat.cat_for_device_class(Side::A, cls.id(), cls.name().as_str()), cls.id()))
            .collect();
        let cats_b: FnvHashMap<usize, DeviceClassId> = b.each_device_class()
            .map(|cls| (device_cat.cat_for_device_class(Side::B, cls.id(), cls.name().as_str()), cls.id()))
            .collect();

        for (cat, cls) in cats_a.iter().sorted() {
            if *cat != IGNORED_CATEGORY && !cats_b.contains_key(cat) && used_a.contains(cls) {
                logger.device_class_mismatch(Some(a.device_class(*cls)), None, "");
            }
        }
        for (cat, cls) in cats_b.iter().sorted() {
            if *cat != IGNORED_CATEGORY && !cats_a.contains_key(cat) && used_b.contains(cls) {
                logger.device_class_mismatch(None, Some(b.device_class(*cls)), "");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compare_circuits(
        &self,
        a: &Netlist,
        ca: CircuitId,
        b: &Netlist,
        cb: CircuitId,
        device_cat: &mut DeviceCategorizer,
        circuit_cat: &mut CircuitCategorizer,
        pin_cat: &CircuitPinCategorizer,
        mappers: &FnvHashMap<CircuitId, CircuitMapper>,
        case_sensitive: bool,
        logger: &mut dyn CompareLogger,
    ) -> (bool, CircuitMapper) {
        debug!("Comparing circuits {} and {}.", a.circuit(ca).name(), b.circuit(cb).name());

        let filter = DeviceFilter {
            cap_threshold: self.cap_threshold,
            res_threshold: self.res_threshold,
        };

        // The pin labels of side A subcircuits are translated into the
        // reference (side B) pin space through the child pin mapping.
        let translator_a = |template: CircuitId, pin: usize| -> Option<usize> {
            let mapper = mappers.get(&template)?;
            let other = mapper.other?;
            let b_pin = mapper.b_pin_for_a_pin(pin)?;
            Some(pin_cat.normalize_pin_id(Side::B, other, b_pin))
        };
        let translator_b = |template: CircuitId, pin: usize| -> Option<usize> {
            Some(pin_cat.normalize_pin_id(Side::B, template, pin))
        };

        let mut g1 = NetGraph::build(a, ca, Side::A, device_cat, circuit_cat, &filter,
                                     &translator_a, case_sensitive);
        let mut g2 = NetGraph::build(b, cb, Side::B, device_cat, circuit_cat, &filter,
                                     &translator_b, case_sensitive);

        let seeds = self.same_nets.iter()
            .filter(|(sca, _, scb, _, _)| *sca == ca && *scb == cb)
            .filter_map(|(_, na, _, nb, _)| {
                Some((*g1.net_index.get(na)?, *g2.net_index.get(nb)?))
            })
            .collect_vec();

        let with_names = !self.dont_consider_net_names;
        let mut core = CompareCore::new(&mut g1, &mut g2, self.max_depth, self.max_n_branch,
                                        self.depth_first, with_names);
        core.run(&seeds);
        if core.ambiguity_limit_hit {
            logger.log_entry(Severity::Warning,
                             "Ambiguity was not resolved within the search limits; some pairings are arbitrary");
        }

        let mut good = true;

        // Report the net pairings.
        for node in &g1.nodes {
            let net_a = match node.kind {
                NodeKind::Net(net) => net,
                NodeKind::Virtual(_) => continue,
            };
            match node.other {
                OtherNet::Matched { index, exact } => {
                    if let NodeKind::Net(net_b) = g2.nodes[index].kind {
                        if exact {
                            logger.match_nets(a.circuit(ca).net(net_a), b.circuit(cb).net(net_b));
                        } else {
                            logger.match_ambiguous_nets(a.circuit(ca).net(net_a), b.circuit(cb).net(net_b), "");
                        }
                    }
                }
                _ => {
                    logger.net_mismatch(Some(a.circuit(ca).net(net_a)), None, "");
                    good = false;
                }
            }
        }
        for node in &g2.nodes {
            if let (NodeKind::Net(net_b), false) = (node.kind, node.other.is_matched()) {
                logger.net_mismatch(None, Some(b.circuit(cb).net(net_b)), "");
                good = false;
            }
        }

        let (pins_good, mapper) = self.do_pin_assignment(a, ca, &g1, b, cb, &g2, logger);
        good &= pins_good;
        good &= self.do_device_assignment(a, ca, &g1, b, cb, &g2, device_cat, &filter, logger);
        good &= self.do_subcircuit_assignment(a, ca, &g1, b, cb, &g2, circuit_cat, pin_cat, mappers, logger);

        (good, mapper)
    }

    /// Pair the pins of the two circuits through their matched nets and
    /// record the mapping for the parent comparisons.
    #[allow(clippy::too_many_arguments)]
    fn do_pin_assignment(
        &self,
        a: &Netlist,
        ca: CircuitId,
        g1: &NetGraph,
        b: &Netlist,
        cb: CircuitId,
        g2: &NetGraph,
        logger: &mut dyn CompareLogger,
    ) -> (bool, CircuitMapper) {
        let circuit_a = a.circuit(ca);
        let circuit_b = b.circuit(cb);
        let mut mapper = CircuitMapper {
            other: Some(cb),
            ..Default::default()
        };
        let mut used_b: FnvHashSet<usize> = Default::default();
        let mut unconnected_a: Vec<usize> = Vec::new();
        let mut good = true;

        for pin in circuit_a.each_pin() {
            let net_a = match pin.net() {
                Some(net) => net,
                None => {
                    unconnected_a.push(pin.id());
                    continue;
                }
            };
            let node = g1.node_index_for_net(net_a);
            let matched = g1.nodes[node].other.matched_index()
                .and_then(|idx| match g2.nodes[idx].kind {
                    NodeKind::Net(net_b) => Some(net_b),
                    NodeKind::Virtual(_) => None,
                });
            let net_b = match matched {
                Some(net_b) => net_b,
                None => {
                    logger.pin_mismatch(Some(pin), None, "Pin is attached to an unmatched net");
                    good = false;
                    continue;
                }
            };

            // Any unused pin on the matched net is a valid counterpart.
            let candidate = circuit_b.net(net_b).each_pin()
                .sorted()
                .find(|p| !used_b.contains(p));
            match candidate {
                Some(pb) => {
                    logger.match_pins(pin, circuit_b.pin(pb));
                    used_b.insert(pb);
                    mapper.map_pin(pin.id(), pb);
                }
                None => {
                    logger.pin_mismatch(Some(pin), None, "No counterpart pin on the matched net");
                    good = false;
                }
            }
        }

        // Unconnected pins pair among themselves.
        let unconnected_b = circuit_b.each_pin()
            .filter(|p| p.net().is_none())
            .map(|p| p.id())
            .collect_vec();
        let common = unconnected_a.len().min(unconnected_b.len());
        for (pa, pb) in unconnected_a.iter().zip(&unconnected_b) {
            logger.match_pins(circuit_a.pin(*pa), circuit_b.pin(*pb));
            used_b.insert(*pb);
            mapper.map_pin(*pa, *pb);
        }
        for pa in &unconnected_a[common..] {
            logger.pin_mismatch(Some(circuit_a.pin(*pa)), None, "");
            good = false;
        }

        for pin in circuit_b.each_pin() {
            if !used_b.contains(&pin.id()) && !unconnected_b[..common].contains(&pin.id()) {
                logger.pin_mismatch(None, Some(pin), "");
                good = false;
            }
        }

        (good, mapper)
    }

    /// Pair the devices of the two circuits. Devices match when their
    /// category and their normalized terminal-to-matched-net footprint agree.
    #[allow(clippy::too_many_arguments)]
    fn do_device_assignment(
        &self,
        a: &Netlist,
        ca: CircuitId,
        g1: &NetGraph,
        b: &Netlist,
        cb: CircuitId,
        g2: &NetGraph,
        device_cat: &mut DeviceCategorizer,
        filter: &DeviceFilter,
        logger: &mut dyn CompareLogger,
    ) -> bool {
        type Key = (usize, Vec<(usize, usize)>);
        let mut groups: BTreeMap<Key, (Vec<DeviceId>, Vec<DeviceId>)> = BTreeMap::new();

        let mut collect = |netlist: &Netlist, circuit: CircuitId, graph: &NetGraph, side: Side,
                           device_cat: &mut DeviceCategorizer,
                           groups: &mut BTreeMap<Key, (Vec<DeviceId>, Vec<DeviceId>)>| {
            for device in netlist.circuit(circuit).each_device() {
                if !filter.keep(netlist, device) {
                    continue;
                }
                let class = netlist.device_class(device.class_id());
                let cat = device_cat.cat_for_device_class(side, device.class_id(), class.name().as_str());
                if cat == IGNORED_CATEGORY {
                    continue;
                }
                let strict = device_cat.is_strict_device_category(cat);
                let mut footprint = (0..device.terminal_count())
                    .map(|t| {
                        let norm = if strict { t } else { class.equivalent_terminal_id(t) };
                        let node = device.net_for_terminal(t).map(|n| {
                            let idx = graph.node_index_for_net(n);
                            match side {
                                // Side A nets are expressed by their matched node in g2.
                                Side::A => graph.nodes[idx].other.matched_index().unwrap_or(usize::MAX),
                                Side::B => idx,
                            }
                        }).unwrap_or(usize::MAX);
                        (norm, node)
                    })
                    .collect_vec();
                footprint.sort();
                let entry = groups.entry((cat, footprint)).or_default();
                match side {
                    Side::A => entry.0.push(device.id()),
                    Side::B => entry.1.push(device.id()),
                }
            }
        };

        collect(a, ca, g1, Side::A, device_cat, &mut groups);
        collect(b, cb, g2, Side::B, device_cat, &mut groups);

        let mut good = true;
        for (_, (in_a, in_b)) in groups {
            let common = in_a.len().min(in_b.len());
            for (da, db) in in_a.iter().zip(&in_b) {
                let device_a = a.circuit(ca).device(*da);
                let device_b = b.circuit(cb).device(*db);
                let class_a = a.device_class(device_a.class_id());
                let class_b = b.device_class(device_b.class_id());

                if !device_parameters_equal(class_a, device_a, class_b, device_b) {
                    logger.match_devices_with_different_parameters(device_a, device_b);
                    good = false;
                } else if Netlist::name_compare(false, class_a.name().as_str(), class_b.name().as_str())
                    != std::cmp::Ordering::Equal
                {
                    // Classes merged through explicit bindings: report the
                    // deviation but keep the pairing valid.
                    logger.match_devices_with_different_device_classes(device_a, device_b);
                } else {
                    logger.match_devices(device_a, device_b);
                }
            }
            for da in &in_a[common..] {
                logger.device_mismatch(Some(a.circuit(ca).device(*da)), None, "");
                good = false;
            }
            for db in &in_b[common..] {
                logger.device_mismatch(None, Some(b.circuit(cb).device(*db)), "");
                good = false;
            }
        }
        good
    }

    /// Pair the subcircuits of the two circuits through their category and
    /// their normalized pin-to-matched-net footprint.
    #[allow(clippy::too_many_arguments)]
    fn do_subcircuit_assignment(
        &self,
        a: &Netlist,
        ca: CircuitId,
        g1: &NetGraph,
        b: &Netlist,
        cb: CircuitId,
        g2: &NetGraph,
        circuit_cat: &mut CircuitCategorizer,
        pin_cat: &CircuitPinCategorizer,
        mappers: &FnvHashMap<CircuitId, CircuitMapper>,
        logger: &mut dyn CompareLogger,
    ) -> bool {
        type Key = (usize, Vec<(usize, usize)>);
        let mut groups: BTreeMap<Key, (Vec<SubCircuitId>, Vec<SubCircuitId>)> = BTreeMap::new();

        for sc in a.circuit(ca).each_subcircuit() {
            let template = sc.circuit_ref();
            let cat = circuit_cat.cat_for_circuit(Side::A, template, a.circuit(template).name().as_str());
            if cat == IGNORED_CATEGORY {
                continue;
            }
            let mut footprint = Vec::new();
            for pin in 0..sc.pin_count() {
                let net = match sc.net_for_pin(pin) {
                    Some(net) => net,
                    None => continue,
                };
                let translated = mappers.get(&template)
                    .and_then(|m| Some((m.other?, m.b_pin_for_a_pin(pin)?)))
                    .map(|(other, b_pin)| pin_cat.normalize_pin_id(Side::B, other, b_pin));
                let pin_label = match translated {
                    Some(label) => label,
                    None => continue,
                };
                let node = g1.node_index_for_net(net);
                let other = g1.nodes[node].other.matched_index().unwrap_or(usize::MAX);
                footprint.push((pin_label, other));
            }
            footprint.sort();
            groups.entry((cat, footprint)).or_default().0.push(sc.id());
        }

        for sc in b.circuit(cb).each_subcircuit() {
            let template = sc.circuit_ref();
            let cat = circuit_cat.cat_for_circuit(Side::B, template, b.circuit(template).name().as_str());
            if cat == IGNORED_CATEGORY {
                continue;
            }
            let mut footprint = Vec::new();
            for pin in 0..sc.pin_count() {
                let net = match sc.net_for_pin(pin) {
                    Some(net) => net,
                    None => continue,
                };
                let pin_label = pin_cat.normalize_pin_id(Side::B, template, pin);
                let node = g2.node_index_for_net(net);
                footprint.push((pin_label, node));
            }
            footprint.sort();
            groups.entry((cat, footprint)).or_default().1.push(sc.id());
        }

        let mut good = true;
        for (_, (in_a, in_b)) in groups {
            let common = in_a.len().min(in_b.len());
            for (sa, sb) in in_a.iter().zip(&in_b) {
                logger.match_subcircuits(a.circuit(ca).subcircuit(*sa), b.circuit(cb).subcircuit(*sb));
            }
            for sa in &in_a[common..] {
                logger.subcircuit_mismatch(Some(a.circuit(ca).subcircuit(*sa)), None, "");
                good = false;
            }
            for sb in &in_b[common..] {
                logger.subcircuit_mismatch(None, Some(b.circuit(cb).subcircuit(*sb)), "");
                good = false;
            }
        }
        good
    }

    /// Get the circuits without a counterpart in the other netlist, excluding
    /// top-level circuits (they cannot be flattened away before a compare).
    pub fn unmatched_circuits(&self, a: &Netlist, b: &Netlist) -> (Vec<CircuitId>, Vec<CircuitId>) {
        let case_sensitive = a.is_case_sensitive() && b.is_case_sensitive();
        let mut circuit_cat = CircuitCategorizer::new();
        circuit_cat.set_case_sensitive(case_sensitive);
        for (ca, cb) in &self.same_circuits {
            circuit_cat.same_circuit(Some((Side::A, *ca)), Some((Side::B, *cb)));
        }

        let cats_a: FnvHashMap<CircuitId, usize> = a.each_circuit()
            .map(|c| (c.id(), circuit_cat.cat_for_circuit(Side::A, c.id(), c.name().as_str())))
            .collect();
        let cats_b: FnvHashMap<CircuitId, usize> = b.each_circuit()
            .map(|c| (c.id(), circuit_cat.cat_for_circuit(Side::B, c.id(), c.name().as_str())))
            .collect();
        let set_a: FnvHashSet<usize> = cats_a.values().copied().collect();
        let set_b: FnvHashSet<usize> = cats_b.values().copied().collect();

        let in_a = a.each_circuit()
            .filter(|c| c.has_references())
            .filter(|c| !set_b.contains(&cats_a[&c.id()]))
            .map(|c| c.id())
            .collect_vec();
        let in_b = b.each_circuit()
            .filter(|c| c.has_references())
            .filter(|c| !set_a.contains(&cats_b[&c.id()]))
            .map(|c| c.id())
            .collect_vec();
        (in_a, in_b)
    }

    /// Join nets of the circuit whose exchange leaves the circuit invariant.
    ///
    /// Symmetric nets carry the same potential and can be connected. This
    /// canonicalizes layouts with intentionally symmetric structures (e.g.
    /// split gates) before device combination.
    ///
    /// Two nets are considered exchangeable when they see the same device
    /// terminals (same class, same normalized terminal, same far-side nets
    /// and same primary parameters) and the same subcircuit pins. Nets
    /// attached to outward pins are never joined; the comparer's device
    /// filter applies.
    pub fn join_symmetric_nets(&self, netlist: &mut Netlist, circuit: CircuitId) {
        // One connection of a net, in a comparable form: the connected
        // object, the normalized terminal and the far-side nets.
        type SigEntry = (String, usize, Vec<(usize, usize)>, Vec<u64>);

        let filter = DeviceFilter {
            cap_threshold: self.cap_threshold,
            res_threshold: self.res_threshold,
        };

        loop {
            let mut groups: BTreeMap<Vec<SigEntry>, Vec<NetId>> = BTreeMap::new();

            {
                let c = netlist.circuit(circuit);
                for net in c.each_net() {
                    // Pins fix the identity of their net.
                    if net.pin_count() > 0 || net.num_connections() == 0 {
                        continue;
                    }

                    let mut sig: Vec<SigEntry> = Vec::new();
                    for (d, t) in net.each_terminal() {
                        let device = c.device(d);
                        if !filter.keep(netlist, device) {
                            continue;
                        }
                        let class = netlist.device_class(device.class_id());
                        let norm = |tt: usize| if class.is_strict() { tt } else { class.equivalent_terminal_id(tt) };
                        let far = (0..device.terminal_count())
                            .filter(|&tt| tt != t)
                            .map(|tt| (norm(tt), device.net_for_terminal(tt).map(|n| n.value()).unwrap_or(usize::MAX)))
                            .sorted()
                            .collect_vec();
                        let params = class.parameter_definitions().iter()
                            .filter(|p| p.is_primary())
                            .map(|p| device.parameter_value(p.id()).to_bits())
                            .collect_vec();
                        sig.push((class.name().to_string(), norm(t), far, params));
                    }
                    for (sc, pin) in net.each_subcircuit_pin() {
                        let template = c.subcircuit(sc).circuit_ref();
                        // The instance identity is part of the signature:
                        // nets on different instances are kept apart.
                        sig.push((netlist.circuit(template).name().to_string(), pin,
                                  vec![(usize::MAX, sc.value())], Vec::new()));
                    }
                    sig.sort();
                    groups.entry(sig).or_default().push(net.id());
                }
            }

            let joinable = groups.into_values().find(|nets| nets.len() > 1);
            match joinable {
                Some(nets) => {
                    debug!("Joining {} symmetric nets in circuit {}.",
                           nets.len(), netlist.circuit(circuit).name());
                    for net in &nets[1..] {
                        netlist.circuit_mut(circuit).join_nets(nets[0], *net);
                    }
                    // Joining changes the far-side nets of the neighbors;
                    // recompute and repeat until no group joins.
                }
                None => break,
            }
        }
    }
}

/// Mirror the swappable-pin declarations of the reference circuit `cb` onto
/// the matched circuit `ca`. Pins are correlated by name, falling back to
/// their position.
fn derive_pin_equivalence(
    a: &Netlist,
    ca: CircuitId,
    b: &Netlist,
    cb: CircuitId,
    pin_cat: &mut CircuitPinCategorizer,
) {
    let circuit_a = a.circuit(ca);
    let circuit_b = b.circuit(cb);

    let mut clusters: FnvHashMap<usize, Vec<usize>> = Default::default();
    for pin_b in circuit_b.each_pin() {
        if !pin_cat.is_mapped(Side::B, cb, pin_b.id()) {
            continue;
        }
        let rep = pin_cat.normalize_pin_id(Side::B, cb, pin_b.id());
        let pin_a = circuit_a.pin_by_name(pin_b.name())
            .or_else(|| (pin_b.id() < circuit_a.pin_count()).then_some(pin_b.id()));
        if let Some(pin_a) = pin_a {
            clusters.entry(rep).or_default().push(pin_a);
        }
    }
    for (_, pins) in clusters.into_iter().sorted() {
        pin_cat.map_pins(Side::A, ca, &pins);
    }
}

/// Compare two devices' parameters, correlating the parameters of the two
/// classes by name. The parameter comparer of either class applies, the
/// first netlist's class winning.
fn device_parameters_equal(class_a: &DeviceClass, a: &Device, class_b: &DeviceClass, b: &Device) -> bool {
    let comparer = class_a.parameter_comparer().or_else(|| class_b.parameter_comparer());

    class_a.parameter_definitions().iter().all(|pd| {
        let pid_b = match class_b.parameter_id_for_name(pd.name()) {
            Some(pid_b) => pid_b,
            None => return true,
        };
        let va = a.parameter_value(pd.id());
        let vb = b.parameter_value(pid_b);
        match comparer {
            Some(c) => c.check(pd.id(), pd.is_primary(), va, vb),
            None => !pd.is_primary() || va == vb,
        }
    })
}
