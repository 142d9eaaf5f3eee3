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
//! The net graph consumed by the matcher.
//!
//! Nodes are the nets of one circuit plus one virtual node per subcircuit
//! instance. Edges carry sorted lists of labeled transitions; all transitions
//! between the same pair of nodes are aggregated into one edge. The edges of
//! a node are sorted by their transition lists so that candidate edges can be
//! found by binary search.

use std::cmp::Ordering;

use fnv::FnvHashMap;
use itertools::Itertools;

use crate::netlist::prelude::*;
use super::categorizer::{CircuitCategorizer, DeviceCategorizer, Side, IGNORED_CATEGORY};

/// A device filter used to drop small parasitic devices from the graph:
/// capacitors below the cap threshold and resistors above the res threshold.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Capacitors below this value are dropped. Zero disables the filter.
    pub cap_threshold: f64,
    /// Resistors above this value are dropped. Zero disables the filter.
    pub res_threshold: f64,
}

impl DeviceFilter {
    /// Returns true if the device shall take part in the comparison.
    pub fn keep(&self, netlist: &Netlist, device: &Device) -> bool {
        let class = netlist.device_class(device.class_id());
        match class.kind() {
            DeviceKind::Resistor | DeviceKind::ResistorWithBulk => {
                if self.res_threshold > 0.0 {
                    if let Some(r) = class.primary_parameter_id() {
                        if device.parameter_value(r) > self.res_threshold {
                            return false;
                        }
                    }
                }
            }
            DeviceKind::Capacitor | DeviceKind::CapacitorWithBulk => {
                if self.cap_threshold > 0.0 {
                    if let Some(c) = class.primary_parameter_id() {
                        if device.parameter_value(c) < self.cap_threshold {
                            return false;
                        }
                    }
                }
            }
            _ => {}
        }
        true
    }
}

/// One transition within a net graph edge: a path through a device between
/// two of its terminals, or a hop from a pin net onto the virtual node of a
/// subcircuit instance. Terminal and pin IDs are normalized so that
/// swappable terminals and pins collapse.
///
/// Device transitions are oriented: `term1` is the terminal at the node the
/// edge belongs to. This keeps polar devices (diodes, transistors with
/// strict classes) directional while swappable terminals still collapse
/// through their normalization.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum Transition {
    /// A device path labeled with the device category and the normalized
    /// terminal pair, seen from the edge-owning node.
    Device {
        /// Category of the device class.
        cat: usize,
        /// Normalized terminal ID at this end.
        term1: usize,
        /// Normalized terminal ID at the far end.
        term2: usize,
    },
    /// A hop onto a subcircuit's virtual node, labeled with the circuit
    /// category and the normalized pin ID.
    SubcircuitPin {
        /// Category of the referenced circuit.
        cat: usize,
        /// Normalized pin ID, translated into the reference pin space.
        pin: usize,
    },
}

/// An edge: all transitions between one pair of nodes, sorted.
#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub transitions: Vec<Transition>,
    pub target: usize,
}

/// The match state of a node.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum OtherNet {
    /// No counterpart known.
    Unmatched,
    /// The counterpart is known to be undecidable.
    Unknown,
    /// Matched with the node at `index` in the other graph.
    Matched {
        index: usize,
        /// False when the pairing was an ambiguous choice.
        exact: bool,
    },
}

impl OtherNet {
    pub fn matched_index(&self) -> Option<usize> {
        match self {
            OtherNet::Matched { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, OtherNet::Matched { .. })
    }
}

/// What a node stands for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum NodeKind {
    /// A net of the circuit.
    Net(NetId),
    /// The virtual node of a subcircuit instance. The virtual node collapses
    /// the all-pin-to-all-pin transition set of an instance into a star.
    Virtual(SubCircuitId),
}

/// A node of the net graph.
#[derive(Debug, Clone)]
pub(crate) struct NetGraphNode {
    pub kind: NodeKind,
    pub other: OtherNet,
    /// Sorted by `(transitions, target)`.
    pub edges: Vec<Edge>,
    /// The extended net name used for name hints: the net name, or the name
    /// of an attached outward pin as a fallback.
    pub name: Option<String>,
}

impl NetGraphNode {
    /// Compare by topology: the sorted sequence of edge transition lists.
    /// Edge targets do not participate.
    pub fn cmp_topology(&self, other: &NetGraphNode) -> Ordering {
        self.edges.iter().map(|e| &e.transitions)
            .cmp(other.edges.iter().map(|e| &e.transitions))
    }

    /// Compare by topology, then by name when `with_name` is set.
    pub fn cmp_full(&self, other: &NetGraphNode, with_name: bool) -> Ordering {
        self.cmp_topology(other).then_with(|| {
            if with_name {
                self.name.cmp(&other.name)
            } else {
                Ordering::Equal
            }
        })
    }

    /// The targets of all edges whose transition list equals `transitions`.
    pub fn targets_with(&self, transitions: &[Transition]) -> Vec<usize> {
        let lo = self.edges.partition_point(|e| e.transitions.as_slice() < transitions);
        let hi = self.edges.partition_point(|e| e.transitions.as_slice() <= transitions);
        self.edges[lo..hi].iter().map(|e| e.target).collect()
    }

    /// The distinct transition lists of this node's edges, with the targets
    /// of each list.
    pub fn transition_groups(&self) -> Vec<(Vec<Transition>, Vec<usize>)> {
        let mut groups: Vec<(Vec<Transition>, Vec<usize>)> = Vec::new();
        for edge in &self.edges {
            match groups.last_mut() {
                Some((l, targets)) if *l == edge.transitions => targets.push(edge.target),
                _ => groups.push((edge.transitions.clone(), vec![edge.target])),
            }
        }
        groups
    }
}

/// The net graph of one circuit.
#[derive(Debug, Clone)]
pub(crate) struct NetGraph {
    pub circuit: CircuitId,
    pub nodes: Vec<NetGraphNode>,
    pub net_index: FnvHashMap<NetId, usize>,
    pub virtual_index: FnvHashMap<SubCircuitId, usize>,
}

impl NetGraph {
    /// Establish an equivalence between a node of this graph and a node of
    /// the other graph.
    pub fn identify(&mut self, index: usize, other_index: usize, exact: bool) {
        self.nodes[index].other = OtherNet::Matched { index: other_index, exact };
    }

    /// Remove the equivalence of a node.
    pub fn unidentify(&mut self, index: usize) {
        self.nodes[index].other = OtherNet::Unmatched;
    }

    /// Get the node index of a net.
    pub fn node_index_for_net(&self, net: NetId) -> usize {
        self.net_index[&net]
    }

    /// Build the net graph of a circuit.
    ///
    /// `pin_translator` maps a `(child circuit, pin id)` pair into the
    /// normalized reference pin space; pins it cannot translate are left out
    /// of the graph.
    pub fn build(
        netlist: &Netlist,
        circuit_id: CircuitId,
        side: Side,
        device_categorizer: &mut DeviceCategorizer,
        circuit_categorizer: &mut CircuitCategorizer,
        filter: &DeviceFilter,
        pin_translator: &dyn Fn(CircuitId, usize) -> Option<usize>,
        case_sensitive: bool,
    ) -> NetGraph {
        let circuit = netlist.circuit(circuit_id);

        let mut nodes: Vec<NetGraphNode> = Vec::new();
        let mut net_index: FnvHashMap<NetId, usize> = Default::default();
        let mut virtual_index: FnvHashMap<SubCircuitId, usize> = Default::default();

        let normalize_name = |name: &str| {
            if case_sensitive {
                name.to_string()
            } else {
                name.to_uppercase()
            }
        };

        for net in circuit.each_net() {
            let name = match net.name() {
                Some(name) => Some(name.to_string()),
                // Unnamed nets borrow the name of an attached outward pin.
                None => net.each_pin().sorted().next()
                    .map(|p| circuit.pin(p).name().to_string())
                    .filter(|n| !n.is_empty()),
            };
            net_index.insert(net.id(), nodes.len());
            nodes.push(NetGraphNode {
                kind: NodeKind::Net(net.id()),
                other: OtherNet::Unmatched,
                edges: Vec::new(),
                name: name.map(|n| normalize_name(&n)),
            });
        }
        for sc in circuit.each_subcircuit() {
            virtual_index.insert(sc.id(), nodes.len());
            nodes.push(NetGraphNode {
                kind: NodeKind::Virtual(sc.id()),
                other: OtherNet::Unmatched,
                edges: Vec::new(),
                name: None,
            });
        }

        // Accumulate transitions per (node, target) pair.
        let mut transitions: Vec<FnvHashMap<usize, Vec<Transition>>> = vec![Default::default(); nodes.len()];

        // Device transitions: one per unordered pair of connected terminals,
        // recorded on both endpoints with their own orientation.
        for device in circuit.each_device() {
            if !filter.keep(netlist, device) {
                continue;
            }
            let class = netlist.device_class(device.class_id());
            let cat = device_categorizer.cat_for_device_class(side, device.class_id(), class.name().as_str());
            if cat == IGNORED_CATEGORY {
                continue;
            }
            let strict = device_categorizer.is_strict_device_category(cat);
            let norm = |t: usize| if strict { t } else { class.equivalent_terminal_id(t) };

            for t1 in 0..device.terminal_count() {
                for t2 in t1 + 1..device.terminal_count() {
                    let (n1, n2) = match (device.net_for_terminal(t1), device.net_for_terminal(t2)) {
                        (Some(n1), Some(n2)) => (n1, n2),
                        _ => continue,
                    };
                    let (i1, i2) = (net_index[&n1], net_index[&n2]);
                    let here = Transition::Device { cat, term1: norm(t1), term2: norm(t2) };
                    let there = Transition::Device { cat, term1: norm(t2), term2: norm(t1) };
                    transitions[i1].entry(i2).or_default().push(here);
                    transitions[i2].entry(i1).or_default().push(there);
                }
            }
        }

        // Subcircuit transitions: a star from each connected pin net onto the
        // instance's virtual node.
        for sc in circuit.each_subcircuit() {
            let template = sc.circuit_ref();
            let cat = circuit_categorizer.cat_for_circuit(
                side, template, netlist.circuit(template).name().as_str());
            if cat == IGNORED_CATEGORY {
                continue;
            }
            let vnode = virtual_index[&sc.id()];
            for pin in 0..sc.pin_count() {
                let net = match sc.net_for_pin(pin) {
                    Some(net) => net,
                    None => continue,
                };
                let pin = match pin_translator(template, pin) {
                    Some(pin) => pin,
                    None => continue,
                };
                let t = Transition::SubcircuitPin { cat, pin };
                let net_node = net_index[&net];
                transitions[net_node].entry(vnode).or_default().push(t);
                transitions[vnode].entry(net_node).or_default().push(t);
            }
        }

        // Finalize: sorted transition lists, edges sorted per node.
        for (node, edge_map) in nodes.iter_mut().zip(transitions) {
            let mut edges = edge_map.into_iter()
                .map(|(target, mut ts)| {
                    ts.sort();
                    Edge { transitions: ts, target }
                })
                .collect_vec();
            edges.sort_by(|a, b| a.transitions.cmp(&b.transitions).then(a.target.cmp(&b.target)));
            node.edges = edges;
        }

        NetGraph {
            circuit: circuit_id,
            nodes,
            net_index,
            virtual_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::device_classes;

    fn identity_translator(_c: CircuitId, pin: usize) -> Option<usize> {
        Some(pin)
    }

    fn build_graph(netlist: &Netlist, circuit: CircuitId) -> NetGraph {
        let mut device_cat = DeviceCategorizer::new();
        let mut circuit_cat = CircuitCategorizer::new();
        NetGraph::build(netlist, circuit, Side::A, &mut device_cat, &mut circuit_cat,
                        &DeviceFilter::default(), &identity_translator, true)
    }

    #[test]
    fn test_graph_of_resistor_chain() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let d1 = nl.create_device(top, res, "1");
        let d2 = nl.create_device(top, res, "2");
        {
            let c = nl.circuit_mut(top);
            let a = c.create_net(Some("A"));
            let m = c.create_net(Some("M"));
            let b = c.create_net(Some("B"));
            c.connect_terminal(d1, 0, Some(a));
            c.connect_terminal(d1, 1, Some(m));
            c.connect_terminal(d2, 0, Some(m));
            c.connect_terminal(d2, 1, Some(b));
        }

        let g = build_graph(&nl, top);
        assert_eq!(g.nodes.len(), 3);
        // The middle node has two edges, the end nodes one each.
        let m = g.node_index_for_net(nl.circuit(top).net_by_name("M").unwrap());
        assert_eq!(g.nodes[m].edges.len(), 2);
        let a = g.node_index_for_net(nl.circuit(top).net_by_name("A").unwrap());
        assert_eq!(g.nodes[a].edges.len(), 1);
        // End nodes share their topological signature.
        let b = g.node_index_for_net(nl.circuit(top).net_by_name("B").unwrap());
        assert_eq!(g.nodes[a].cmp_topology(&g.nodes[b]), Ordering::Equal);
        assert_ne!(g.nodes[a].cmp_topology(&g.nodes[m]), Ordering::Equal);
    }

    #[test]
    fn test_parallel_devices_aggregate_into_one_edge() {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let top = nl.create_circuit("TOP");
        let d1 = nl.create_device(top, res, "1");
        let d2 = nl.create_device(top, res, "2");
        {
            let c = nl.circuit_mut(top);
            let a = c.create_net(Some("A"));
            let b = c.create_net(Some("B"));
            for d in [d1, d2] {
                c.connect_terminal(d, 0, Some(a));
                c.connect_terminal(d, 1, Some(b));
            }
        }

        let g = build_graph(&nl, top);
        let a = g.node_index_for_net(nl.circuit(top).net_by_name("A").unwrap());
        // One edge holding two transitions.
        assert_eq!(g.nodes[a].edges.len(), 1);
        assert_eq!(g.nodes[a].edges[0].transitions.len(), 2);
    }

    #[test]
    fn test_swapped_mos_terminals_normalize_to_same_transition() {
        let mut nl = Netlist::new();
        let mos = nl.add_device_class(device_classes::mos4("NMOS"));
        let top = nl.create_circuit("TOP");
        let m1 = nl.create_device(top, mos, "1");
        let m2 = nl.create_device(top, mos, "2");
        {
            let c = nl.circuit_mut(top);
            let s = c.create_net(Some("S"));
            let g = c.create_net(Some("G"));
            let d = c.create_net(Some("D"));
            let b = c.create_net(Some("B"));
            // m1 with S/D straight, m2 with S/D swapped.
            c.connect_terminal(m1, 0, Some(s));
            c.connect_terminal(m1, 1, Some(g));
            c.connect_terminal(m1, 2, Some(d));
            c.connect_terminal(m1, 3, Some(b));
            c.connect_terminal(m2, 0, Some(d));
            c.connect_terminal(m2, 1, Some(g));
            c.connect_terminal(m2, 2, Some(s));
            c.connect_terminal(m2, 3, Some(b));
        }

        let g = build_graph(&nl, top);
        let s = g.node_index_for_net(nl.circuit(top).net_by_name("S").unwrap());
        let d = g.node_index_for_net(nl.circuit(top).net_by_name("D").unwrap());
        // With S/D equivalence both transistors produce the same labels, so
        // the S and D nodes have equal topological signatures.
        assert_eq!(g.nodes[s].cmp_topology(&g.nodes[d]), Ordering::Equal);
    }

    #[test]
    fn test_subcircuit_virtual_node() {
        let mut nl = Netlist::new();
        let sub = nl.create_circuit("SUB");
        nl.add_pin(sub, "P1");
        nl.add_pin(sub, "P2");
        let top = nl.create_circuit("TOP");
        let sc = nl.create_subcircuit(top, sub, "U1");
        {
            let c = nl.circuit_mut(top);
            let a = c.create_net(Some("A"));
            let b = c.create_net(Some("B"));
            c.connect_subcircuit_pin(sc, 0, Some(a));
            c.connect_subcircuit_pin(sc, 1, Some(b));
        }

        let g = build_graph(&nl, top);
        // Two net nodes plus one virtual node.
        assert_eq!(g.nodes.len(), 3);
        let vnode = g.virtual_index[&sc];
        assert_eq!(g.nodes[vnode].edges.len(), 2);
        let a = g.node_index_for_net(nl.circuit(top).net_by_name("A").unwrap());
        assert_eq!(g.nodes[a].edges.len(), 1);
        assert_eq!(g.nodes[a].edges[0].target, vnode);
    }
}
