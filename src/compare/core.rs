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
//! The backtracking engine of the netlist comparer.
//!
//! Starting from seed identities, the engine expands a frontier of matched
//! node pairs: for every matched pair it looks up edges with identical
//! transition labels in both graphs and derives the identity of the opposing
//! endpoints. Same-label candidates form ambiguity groups which are resolved
//! by signatures, net names and finally by bounded trial of the remaining
//! permutations with tentative mappings that are undone on contradiction.

use std::cmp::Ordering;
use std::collections::VecDeque;

use super::graph::NetGraph;

/// Result of a tentative probe.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Probe {
    /// No contradiction found.
    Matched,
    /// The proposed identity leads to a contradiction.
    Mismatch,
    /// The search limits were exhausted before a decision was possible.
    Undecided,
}

/// The matcher working on one pair of net graphs.
pub(crate) struct CompareCore<'a> {
    pub g1: &'a mut NetGraph,
    pub g2: &'a mut NetGraph,
    /// Maximum depth of the tentative search, in graph jumps.
    pub max_depth: usize,
    /// Maximum accumulated branch complexity of the tentative search.
    pub max_n_branch: usize,
    /// Depth first (true) or breadth first frontier expansion.
    pub depth_first: bool,
    /// Use net names as hints for pairing and for ambiguity resolution.
    pub with_names: bool,
    /// Set when an ambiguity group was paired arbitrarily because the search
    /// limits were exhausted.
    pub ambiguity_limit_hit: bool,
}

impl CompareCore<'_> {
    pub fn new<'a>(g1: &'a mut NetGraph, g2: &'a mut NetGraph,
                   max_depth: usize, max_n_branch: usize,
                   depth_first: bool, with_names: bool) -> CompareCore<'a> {
        CompareCore {
            g1,
            g2,
            max_depth,
            max_n_branch,
            depth_first,
            with_names,
            ambiguity_limit_hit: false,
        }
    }

    /// Run the matcher: identify the seeds, expand the frontier to a fixpoint
    /// and alternate with unique-signature pairing until nothing derives
    /// anymore.
    pub fn run(&mut self, seeds: &[(usize, usize)]) {
        let mut queue: VecDeque<usize> = VecDeque::new();

        for &(i1, i2) in seeds {
            self.commit(i1, i2, true, &mut queue);
        }

        loop {
            while let Some(i) = if self.depth_first { queue.pop_back() } else { queue.pop_front() } {
                self.derive_from(i, &mut queue);
            }
            if !self.pair_unique_unmatched(&mut queue) {
                break;
            }
        }
    }

    fn commit(&mut self, i1: usize, i2: usize, exact: bool, queue: &mut VecDeque<usize>) {
        self.g1.identify(i1, i2, exact);
        self.g2.identify(i2, i1, exact);
        queue.push_back(i1);
    }

    /// Derive identities across the edges of the matched node `i1`.
    fn derive_from(&mut self, i1: usize, queue: &mut VecDeque<usize>) {
        let i2 = match self.g1.nodes[i1].other.matched_index() {
            Some(i2) => i2,
            None => return,
        };

        let groups = self.g1.nodes[i1].transition_groups();
        for (label, targets1) in groups {
            let targets2 = self.g2.nodes[i2].targets_with(&label);

            let unmatched1: Vec<usize> = targets1.iter().copied()
                .filter(|&t| !self.g1.nodes[t].other.is_matched())
                .collect();
            let unmatched2: Vec<usize> = targets2.iter().copied()
                .filter(|&t| !self.g2.nodes[t].other.is_matched())
                .collect();

            if unmatched1.is_empty() || unmatched1.len() != unmatched2.len() {
                // Inconsistent or exhausted group; unmatched leftovers are
                // reported by the caller after the run.
                continue;
            }

            if unmatched1.len() == 1 {
                self.commit(unmatched1[0], unmatched2[0], true, queue);
            } else {
                self.resolve_group(&unmatched1, &unmatched2, queue);
            }
        }
    }

    /// Resolve an ambiguity group: same-label candidate endpoints on both
    /// sides. Sub-partition by the topological node signature, then try the
    /// remaining permutations with tentative probes. Names only steer the
    /// candidate order, they never prevent a pairing.
    fn resolve_group(&mut self, group1: &[usize], group2: &[usize], queue: &mut VecDeque<usize>) {
        let mut group1 = group1.to_vec();
        let mut group2 = group2.to_vec();
        {
            let g1 = &self.g1;
            group1.sort_by(|&a, &b| g1.nodes[a].cmp_topology(&g1.nodes[b])
                .then(a.cmp(&b)));
        }
        {
            let g2 = &self.g2;
            group2.sort_by(|&a, &b| g2.nodes[a].cmp_topology(&g2.nodes[b])
                .then(a.cmp(&b)));
        }

        // Walk the signature blocks of both sides in parallel.
        let (mut p1, mut p2) = (0, 0);
        while p1 < group1.len() && p2 < group2.len() {
            let n1 = group1[p1];
            let n2 = group2[p2];
            match self.cross_cmp(n1, n2) {
                Ordering::Less => p1 += 1,
                Ordering::Greater => p2 += 1,
                Ordering::Equal => {
                    let e1 = (p1..group1.len())
                        .take_while(|&i| self.cross_cmp(group1[i], n2) == Ordering::Equal)
                        .count();
                    let e2 = (p2..group2.len())
                        .take_while(|&i| self.cross_cmp(n1, group2[i]) == Ordering::Equal)
                        .count();
                    let block1 = group1[p1..p1 + e1].to_vec();
                    let block2 = group2[p2..p2 + e2].to_vec();
                    p1 += e1;
                    p2 += e2;

                    if block1.len() != block2.len() {
                        // A count mismatch within the block; leave unmatched.
                        continue;
                    }
                    if block1.len() == 1 {
                        self.commit(block1[0], block2[0], true, queue);
                        continue;
                    }
                    self.pair_block(&block1, &block2, queue);
                }
            }
        }
    }

    fn cross_cmp(&self, n1: usize, n2: usize) -> Ordering {
        self.g1.nodes[n1].cmp_topology(&self.g2.nodes[n2])
    }

    /// Pair the members of a signature-equal ambiguity block by trying the
    /// candidates with tentative probes.
    fn pair_block(&mut self, block1: &[usize], block2: &[usize], queue: &mut VecDeque<usize>) {
        if block1.len() > self.max_n_branch {
            // The group is too complex to enumerate: register the ambiguity
            // and pair in signature order.
            self.ambiguity_limit_hit = true;
            for (&a, &b) in block1.iter().zip(block2) {
                self.commit(a, b, false, queue);
            }
            return;
        }

        let mut remaining: Vec<usize> = block2.to_vec();
        for &a in block1 {
            // Prefer candidates with an equal name.
            let mut candidates = remaining.clone();
            if self.with_names {
                let name1 = self.g1.nodes[a].name.clone();
                candidates.sort_by_key(|&b| (self.g2.nodes[b].name != name1 || name1.is_none(), b));
            }

            let mut chosen = None;
            for &b in &candidates {
                let mut undo: Vec<(usize, usize)> = Vec::new();
                self.tentative_identify(a, b, &mut undo);
                let probe = self.probe(a, b, 1, block1.len(), &mut undo);
                self.rollback(&mut undo, 0);
                if probe != Probe::Mismatch {
                    if probe == Probe::Undecided {
                        self.ambiguity_limit_hit = true;
                    }
                    chosen = Some(b);
                    break;
                }
            }

            if let Some(b) = chosen {
                remaining.retain(|&x| x != b);
                self.commit(a, b, false, queue);
            }
            // Without a viable candidate the node stays unmatched and is
            // reported by the caller.
        }
    }

    fn tentative_identify(&mut self, i1: usize, i2: usize, undo: &mut Vec<(usize, usize)>) {
        self.g1.identify(i1, i2, false);
        self.g2.identify(i2, i1, false);
        undo.push((i1, i2));
    }

    fn rollback(&mut self, undo: &mut Vec<(usize, usize)>, checkpoint: usize) {
        while undo.len() > checkpoint {
            let (i1, i2) = undo.pop().unwrap();
            self.g1.unidentify(i1);
            self.g2.unidentify(i2);
        }
    }

    /// Check a proposed identity by deriving the consequences tentatively.
    /// All identifications are recorded in `undo`.
    fn probe(&mut self, i1: usize, i2: usize, depth: usize, n_branch: usize,
             undo: &mut Vec<(usize, usize)>) -> Probe {
        if depth > self.max_depth {
            return Probe::Undecided;
        }

        let mut undecided = false;
        let groups = self.g1.nodes[i1].transition_groups();

        for (label, targets1) in groups {
            let targets2 = self.g2.nodes[i2].targets_with(&label);

            // Already matched endpoints must correspond.
            for &t in &targets1 {
                if let Some(partner) = self.g1.nodes[t].other.matched_index() {
                    if !targets2.contains(&partner) {
                        return Probe::Mismatch;
                    }
                }
            }
            for &t in &targets2 {
                if let Some(partner) = self.g2.nodes[t].other.matched_index() {
                    if !targets1.contains(&partner) {
                        return Probe::Mismatch;
                    }
                }
            }

            let unmatched1: Vec<usize> = targets1.iter().copied()
                .filter(|&t| !self.g1.nodes[t].other.is_matched())
                .collect();
            let unmatched2: Vec<usize> = targets2.iter().copied()
                .filter(|&t| !self.g2.nodes[t].other.is_matched())
                .collect();

            if unmatched1.len() != unmatched2.len() {
                return Probe::Mismatch;
            }

            match unmatched1.len() {
                0 => {}
                1 => {
                    self.tentative_identify(unmatched1[0], unmatched2[0], undo);
                    match self.probe(unmatched1[0], unmatched2[0], depth + 1, n_branch, undo) {
                        Probe::Mismatch => return Probe::Mismatch,
                        Probe::Undecided => undecided = true,
                        Probe::Matched => {}
                    }
                }
                n => {
                    // The branch complexity is the product of the open
                    // ambiguity sizes.
                    if n_branch.saturating_mul(n) > self.max_n_branch {
                        undecided = true;
                        continue;
                    }
                    match self.assign_block(&unmatched1, &unmatched2, depth, n_branch * n, undo) {
                        Probe::Mismatch => return Probe::Mismatch,
                        Probe::Undecided => undecided = true,
                        Probe::Matched => {}
                    }
                }
            }
        }

        if undecided {
            Probe::Undecided
        } else {
            Probe::Matched
        }
    }

    /// Try to find a consistent assignment of two same-size candidate sets
    /// by backtracking over the permutations.
    fn assign_block(&mut self, block1: &[usize], block2: &[usize], depth: usize,
                    n_branch: usize, undo: &mut Vec<(usize, usize)>) -> Probe {
        let a = match block1.first() {
            Some(&a) => a,
            None => return Probe::Matched,
        };

        for (k, &b) in block2.iter().enumerate() {
            let checkpoint = undo.len();
            self.tentative_identify(a, b, undo);

            let head = self.probe(a, b, depth + 1, n_branch, undo);
            if head != Probe::Mismatch {
                let mut rest2 = block2.to_vec();
                rest2.remove(k);
                let tail = self.assign_block(&block1[1..], &rest2, depth, n_branch, undo);
                if tail != Probe::Mismatch {
                    if head == Probe::Undecided || tail == Probe::Undecided {
                        return Probe::Undecided;
                    }
                    return Probe::Matched;
                }
            }

            self.rollback(undo, checkpoint);
        }

        Probe::Mismatch
    }

    /// Pair nodes which are unique on both sides by their full signature.
    /// Returns true if any pair was established.
    fn pair_unique_unmatched(&mut self, queue: &mut VecDeque<usize>) -> bool {
        let mut progress = self.pair_unique_pass(queue, self.with_names);
        if !progress && self.with_names {
            // Names did not help; fall back to pure topology.
            progress = self.pair_unique_pass(queue, false);
        }
        progress
    }

    fn pair_unique_pass(&mut self, queue: &mut VecDeque<usize>, with_names: bool) -> bool {
        let mut un1: Vec<usize> = (0..self.g1.nodes.len())
            .filter(|&i| !self.g1.nodes[i].other.is_matched())
            .collect();
        let mut un2: Vec<usize> = (0..self.g2.nodes.len())
            .filter(|&i| !self.g2.nodes[i].other.is_matched())
            .collect();

        {
            let g1 = &self.g1;
            un1.sort_by(|&a, &b| g1.nodes[a].cmp_full(&g1.nodes[b], with_names).then(a.cmp(&b)));
        }
        {
            let g2 = &self.g2;
            un2.sort_by(|&a, &b| g2.nodes[a].cmp_full(&g2.nodes[b], with_names).then(a.cmp(&b)));
        }

        let mut pairs = Vec::new();
        let (mut p1, mut p2) = (0, 0);
        while p1 < un1.len() && p2 < un2.len() {
            let n1 = un1[p1];
            let n2 = un2[p2];
            match self.g1.nodes[n1].cmp_full(&self.g2.nodes[n2], with_names) {
                Ordering::Less => p1 += 1,
                Ordering::Greater => p2 += 1,
                Ordering::Equal => {
                    let e1 = (p1..un1.len())
                        .take_while(|&i| self.g1.nodes[un1[i]].cmp_full(&self.g2.nodes[n2], with_names) == Ordering::Equal)
                        .count();
                    let e2 = (p2..un2.len())
                        .take_while(|&i| self.g1.nodes[n1].cmp_full(&self.g2.nodes[un2[i]], with_names) == Ordering::Equal)
                        .count();
                    if e1 == 1 && e2 == 1 {
                        pairs.push((n1, n2));
                    }
                    p1 += e1;
                    p2 += e2;
                }
            }
        }

        for (n1, n2) in &pairs {
            self.commit(*n1, *n2, true, queue);
        }
        !pairs.is_empty()
    }
}
