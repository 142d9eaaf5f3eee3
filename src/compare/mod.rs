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
//! The hierarchical netlist comparer.
//!
//! The comparer decides whether two netlists are topologically and
//! parametrically equivalent. It works bottom-up over the circuit hierarchy;
//! per circuit pair it categorizes devices and subcircuits, builds a graph of
//! nets and labeled transitions and runs a backtracking matcher over the two
//! graphs.

pub mod logger;
pub mod xref;
pub mod categorizer;
pub(crate) mod graph;
pub(crate) mod core;
pub mod compare;
pub mod prelude;
