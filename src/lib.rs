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
//! This crate is the netlist core of a layout-versus-schematic (LVS) toolchain.
//! It provides a hierarchical netlist data structure, a SPICE reader and writer
//! and a netlist comparer which decides whether two netlists are topologically
//! and parametrically equivalent.
//!
//! The main components are:
//! * [`netlist`]: circuits, devices, subcircuits, nets and device classes,
//!   together with the bulk transformations (purge, flatten, combine, join).
//! * [`spice`]: the SPICE front-end (tokenizer, expression evaluation,
//!   `.include`/`.lib` handling, element decoding) and the SPICE writer.
//! * [`compare`]: the hierarchical netlist comparer with categorization,
//!   net graphs and the backtracking isomorphism engine.

#![deny(missing_docs)]

// Public modules.
pub mod prelude;
pub mod netlist;
pub mod spice;
pub mod compare;
