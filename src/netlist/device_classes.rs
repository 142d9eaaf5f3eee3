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
//! Factory functions for the built-in device classes.
//!
//! Geometry parameters are stored in micrometer units: lengths and perimeters
//! carry an SI scaling of `1e-6` and a linear geometry scaling exponent, areas
//! carry `1e-12` and a quadratic exponent.

use super::device_class::{CombinerKind, DeviceClass, DeviceKind, ParameterDefinition};

fn length_param(name: &str, description: &str) -> ParameterDefinition {
    ParameterDefinition::new(name, description, 0.0, false, 1e-6, 1.0)
}

fn area_param(name: &str, description: &str) -> ParameterDefinition {
    ParameterDefinition::new(name, description, 0.0, false, 1e-12, 2.0)
}

/// A two-terminal resistor. Terminals A and B, primary parameter R (Ohm).
/// The terminals are equivalent.
pub fn resistor(name: impl Into<String>) -> DeviceClass {
    let mut cls = DeviceClass::new(name, DeviceKind::Resistor);
    cls.set_description("Resistor");
    let a = cls.add_terminal("A", "Terminal A");
    let b = cls.add_terminal("B", "Terminal B");
    cls.equivalent_terminals(a, b);
    cls.add_parameter(ParameterDefinition::new("R", "Resistance (Ohm)", 0.0, true, 1.0, 0.0));
    cls.add_parameter(length_param("L", "Length (micrometer)"));
    cls.add_parameter(length_param("W", "Width (micrometer)"));
    cls.add_parameter(area_param("A", "Area (square micrometer)"));
    cls.add_parameter(length_param("P", "Perimeter (micrometer)"));
    cls.set_combiner(CombinerKind::Resistor);
    cls
}

/// A three-terminal resistor with an additional bulk terminal W.
pub fn resistor_with_bulk(name: impl Into<String>) -> DeviceClass {
    let mut cls = resistor(name);
    cls.set_description("Resistor with bulk terminal");
    cls.set_kind(DeviceKind::ResistorWithBulk);
    cls.add_terminal("W", "Well/bulk terminal");
    cls
}

/// A two-terminal capacitor. Terminals A and B, primary parameter C (Farad).
/// The terminals are equivalent.
pub fn capacitor(name: impl Into<String>) -> DeviceClass {
    let mut cls = DeviceClass::new(name, DeviceKind::Capacitor);
    cls.set_description("Capacitor");
    let a = cls.add_terminal("A", "Terminal A");
    let b = cls.add_terminal("B", "Terminal B");
    cls.equivalent_terminals(a, b);
    cls.add_parameter(ParameterDefinition::new("C", "Capacitance (Farad)", 0.0, true, 1.0, 0.0));
    cls.add_parameter(area_param("A", "Area (square micrometer)"));
    cls.add_parameter(length_param("P", "Perimeter (micrometer)"));
    cls.set_combiner(CombinerKind::Capacitor);
    cls
}

/// A three-terminal capacitor with an additional bulk terminal W.
pub fn capacitor_with_bulk(name: impl Into<String>) -> DeviceClass {
    let mut cls = capacitor(name);
    cls.set_description("Capacitor with bulk terminal");
    cls.set_kind(DeviceKind::CapacitorWithBulk);
    cls.add_terminal("W", "Well/bulk terminal");
    cls
}

/// A two-terminal inductor. Terminals A and B, primary parameter L (Henry).
/// The terminals are equivalent.
pub fn inductor(name: impl Into<String>) -> DeviceClass {
    let mut cls = DeviceClass::new(name, DeviceKind::Inductor);
    cls.set_description("Inductor");
    let a = cls.add_terminal("A", "Terminal A");
    let b = cls.add_terminal("B", "Terminal B");
    cls.equivalent_terminals(a, b);
    cls.add_parameter(ParameterDefinition::new("L", "Inductance (Henry)", 0.0, true, 1.0, 0.0));
    cls.set_combiner(CombinerKind::Resistor);
    cls
}

/// A diode. Terminals A (anode) and C (cathode).
pub fn diode(name: impl Into<String>) -> DeviceClass {
    let mut cls = DeviceClass::new(name, DeviceKind::Diode);
    cls.set_description("Diode");
    cls.add_terminal("A", "Anode");
    cls.add_terminal("C", "Cathode");
    cls.add_parameter(area_param("A", "Area (square micrometer)"));
    cls.add_parameter(length_param("P", "Perimeter (micrometer)"));
    cls
}

fn bjt_parameters(cls: &mut DeviceClass) {
    cls.add_parameter(area_param("AE", "Emitter area (square micrometer)"));
    cls.add_parameter(length_param("PE", "Emitter perimeter (micrometer)"));
    cls.add_parameter(area_param("AB", "Base area (square micrometer)"));
    cls.add_parameter(length_param("PB", "Base perimeter (micrometer)"));
    cls.add_parameter(area_param("AC", "Collector area (square micrometer)"));
    cls.add_parameter(length_param("PC", "Collector perimeter (micrometer)"));
    cls.add_parameter(ParameterDefinition::new("NE", "Emitter count", 1.0, false, 1.0, 0.0));
}

/// A bipolar transistor with terminals C, B and E.
pub fn bjt3(name: impl Into<String>) -> DeviceClass {
    let mut cls = DeviceClass::new(name, DeviceKind::Bjt3);
    cls.set_description("Bipolar transistor");
    cls.add_terminal("C", "Collector");
    cls.add_terminal("B", "Base");
    cls.add_terminal("E", "Emitter");
    bjt_parameters(&mut cls);
    cls
}

/// A bipolar transistor with terminals C, B, E and a substrate terminal S.
pub fn bjt4(name: impl Into<String>) -> DeviceClass {
    let mut cls = bjt3(name);
    cls.set_description("Bipolar transistor with substrate terminal");
    cls.set_kind(DeviceKind::Bjt4);
    cls.add_terminal("S", "Substrate");
    cls
}

fn mos_parameters(cls: &mut DeviceClass) {
    cls.add_parameter(ParameterDefinition::new("L", "Gate length (micrometer)", 0.0, true, 1e-6, 1.0));
    cls.add_parameter(ParameterDefinition::new("W", "Gate width (micrometer)", 0.0, true, 1e-6, 1.0));
    cls.add_parameter(area_param("AS", "Source area (square micrometer)"));
    cls.add_parameter(area_param("AD", "Drain area (square micrometer)"));
    cls.add_parameter(length_param("PS", "Source perimeter (micrometer)"));
    cls.add_parameter(length_param("PD", "Drain perimeter (micrometer)"));
}

/// A MOS transistor with terminals S, G and D. Source and drain are
/// marked equivalent by default.
pub fn mos3(name: impl Into<String>) -> DeviceClass {
    let mut cls = DeviceClass::new(name, DeviceKind::Mos3);
    cls.set_description("MOS transistor");
    let s = cls.add_terminal("S", "Source");
    cls.add_terminal("G", "Gate");
    let d = cls.add_terminal("D", "Drain");
    mos_parameters(&mut cls);
    cls.equivalent_terminals(s, d);
    cls
}

/// A MOS transistor with terminals S, G, D and a bulk terminal B.
pub fn mos4(name: impl Into<String>) -> DeviceClass {
    let mut cls = mos3(name);
    cls.set_description("MOS transistor with bulk terminal");
    cls.set_kind(DeviceKind::Mos4);
    cls.add_terminal("B", "Bulk");
    cls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resistor_schema() {
        let cls = resistor("RES");
        assert_eq!(cls.terminal_count(), 2);
        assert_eq!(cls.terminal_id_for_name("A"), Some(0));
        assert_eq!(cls.terminal_id_for_name("B"), Some(1));
        assert_eq!(cls.primary_parameter_id(), cls.parameter_id_for_name("R"));
        assert!(cls.supports_parallel_combination());
        assert!(cls.supports_serial_combination());
    }

    #[test]
    fn mos4_schema() {
        let cls = mos4("MOS4");
        assert_eq!(cls.terminal_count(), 4);
        let s = cls.terminal_id_for_name("S").unwrap();
        let d = cls.terminal_id_for_name("D").unwrap();
        // Source and drain are swappable.
        assert_eq!(cls.equivalent_terminal_id(d), s);
        assert_eq!(cls.equivalent_terminal_id(s), s);
        let b = cls.terminal_id_for_name("B").unwrap();
        assert_eq!(cls.equivalent_terminal_id(b), b);
        // Parameter order defines the parameter IDs.
        let names: Vec<_> = cls.parameter_definitions().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["L", "W", "AS", "AD", "PS", "PD"]);
    }

    #[test]
    fn parameter_scaling_attributes() {
        let cls = mos4("MOS4");
        let l = cls.parameter_definition(cls.parameter_id_for_name("L").unwrap()).unwrap();
        assert_eq!(l.si_scaling(), 1e-6);
        assert_eq!(l.geo_scaling_exponent(), 1.0);
        let ad = cls.parameter_definition(cls.parameter_id_for_name("AD").unwrap()).unwrap();
        assert_eq!(ad.si_scaling(), 1e-12);
        assert_eq!(ad.geo_scaling_exponent(), 2.0);
    }
}
