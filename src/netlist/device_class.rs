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
//! A device class describes a family of devices: their terminals, their parameters
//! and the rules for combining and comparing devices of this class.
//!
//! Terminal and parameter schemas are data, not code. Built-in classes are
//! constructed by the factory functions in [`device_classes`](super::device_classes).

use fnv::FnvHashMap;

use super::device::Device;

/// Identifier of a device class. Device classes live in the netlist.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DeviceClassId(pub(crate) u32);

impl DeviceClassId {
    /// Get the integer value of this ID.
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// The structural family of a device class.
///
/// The kind drives the element-code checks of the SPICE reader and the
/// device filters of the comparer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DeviceKind {
    /// Two-terminal resistor.
    Resistor,
    /// Three-terminal resistor with a bulk terminal.
    ResistorWithBulk,
    /// Two-terminal capacitor.
    Capacitor,
    /// Three-terminal capacitor with a bulk terminal.
    CapacitorWithBulk,
    /// Two-terminal inductor.
    Inductor,
    /// Diode with anode and cathode.
    Diode,
    /// Bipolar transistor with three terminals.
    Bjt3,
    /// Bipolar transistor with a substrate terminal.
    Bjt4,
    /// MOS transistor with three terminals.
    Mos3,
    /// MOS transistor with a bulk terminal.
    Mos4,
    /// A class not covered by the built-in families.
    Generic,
}

/// The device combination rule of a class.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CombinerKind {
    /// No combination supported.
    None,
    /// Parallel: `1/X = 1/X1 + 1/X2`, serial: `X = X1 + X2` (resistors, inductors).
    Resistor,
    /// Parallel: `X = X1 + X2`, serial: `1/X = 1/X1 + 1/X2` (capacitors).
    Capacitor,
}

/// The definition of a device terminal.
#[derive(Debug, Clone)]
pub struct TerminalDefinition {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) id: usize,
}

impl TerminalDefinition {
    /// Get the terminal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the terminal description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the terminal ID. The ID equals the position in the terminal list.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// The definition of a device parameter.
#[derive(Debug, Clone)]
pub struct ParameterDefinition {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) default_value: f64,
    /// Primary parameters participate in device comparison by default and are
    /// emitted as the unnamed value of R, C and L elements.
    pub(crate) is_primary: bool,
    /// Scaling factor from the stored unit to SI units (e.g. `1e-6` for µm).
    pub(crate) si_scaling: f64,
    /// Exponent with which the parameter scales under geometrical scaling
    /// (0: none, 1: linear, 2: quadratic).
    pub(crate) geo_scaling_exponent: f64,
    pub(crate) id: usize,
}

impl ParameterDefinition {
    /// Create a new parameter definition. The ID is assigned when the
    /// definition is added to a device class.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: f64,
        is_primary: bool,
        si_scaling: f64,
        geo_scaling_exponent: f64,
    ) -> Self {
        ParameterDefinition {
            name: name.into(),
            description: description.into(),
            default_value,
            is_primary,
            si_scaling,
            geo_scaling_exponent,
            id: 0,
        }
    }

    /// Get the parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the parameter description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the default value.
    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    /// Primary parameters take part in device comparison by default.
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Get the scaling factor to SI units.
    pub fn si_scaling(&self) -> f64 {
        self.si_scaling
    }

    /// Get the geometry scaling exponent.
    pub fn geo_scaling_exponent(&self) -> f64 {
        self.geo_scaling_exponent
    }

    /// Get the parameter ID. The ID equals the position in the parameter list.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// A tolerance-based device parameter comparer.
///
/// Compare criteria for single parameters can be chained with `+`.
/// By default only primary parameters participate in the comparison, with
/// exact equality. A criterion created with [`EqualDeviceParameters::new`]
/// replaces the exact comparison of one parameter by a tolerance check,
/// [`EqualDeviceParameters::ignore`] excludes one parameter entirely.
#[derive(Debug, Clone, Default)]
pub struct EqualDeviceParameters {
    terms: Vec<CompareTerm>,
}

#[derive(Debug, Clone)]
struct CompareTerm {
    param_id: usize,
    absolute: f64,
    relative: f64,
    ignore: bool,
}

impl EqualDeviceParameters {
    /// Create a criterion comparing the parameter with the given ID using
    /// an absolute and a relative tolerance.
    ///
    /// Two values match if `|a - b| <= absolute + relative * max(|a|, |b|)`.
    pub fn new(param_id: usize, absolute: f64, relative: f64) -> Self {
        EqualDeviceParameters {
            terms: vec![CompareTerm {
                param_id,
                absolute,
                relative,
                ignore: false,
            }],
        }
    }

    /// Create a criterion which excludes the parameter with the given ID
    /// from the comparison.
    pub fn ignore(param_id: usize) -> Self {
        EqualDeviceParameters {
            terms: vec![CompareTerm {
                param_id,
                absolute: 0.0,
                relative: 0.0,
                ignore: true,
            }],
        }
    }

    fn term_for(&self, param_id: usize) -> Option<&CompareTerm> {
        self.terms.iter().find(|t| t.param_id == param_id)
    }

    /// Check one pair of parameter values under this criterion.
    /// Parameters without an explicit criterion compare exactly when they
    /// are primary and are skipped otherwise.
    pub fn check(&self, param_id: usize, is_primary: bool, a: f64, b: f64) -> bool {
        match self.term_for(param_id) {
            Some(term) if term.ignore => true,
            Some(term) => (a - b).abs() <= term.absolute + term.relative * a.abs().max(b.abs()),
            None => !is_primary || a == b,
        }
    }

    /// Compare the parameters of two devices of the given class.
    pub fn equal(&self, class: &DeviceClass, a: &Device, b: &Device) -> bool {
        class.parameter_definitions().iter().all(|pd| {
            self.check(pd.id(), pd.is_primary(), a.parameter_value(pd.id()), b.parameter_value(pd.id()))
        })
    }
}

impl std::ops::Add for EqualDeviceParameters {
    type Output = EqualDeviceParameters;

    fn add(mut self, other: EqualDeviceParameters) -> EqualDeviceParameters {
        self.terms.extend(other.terms);
        self
    }
}

/// A device class.
///
/// The class describes the terminals and parameters of a family of devices
/// and carries the pluggable policies for device combination and parameter
/// comparison.
#[derive(Debug, Clone)]
pub struct DeviceClass {
    pub(crate) id: DeviceClassId,
    pub(crate) name: String,
    description: String,
    kind: DeviceKind,
    terminals: Vec<TerminalDefinition>,
    parameters: Vec<ParameterDefinition>,
    /// Maps a terminal ID to the canonical ID of its equivalence group.
    equivalent_terminal_ids: FnvHashMap<usize, usize>,
    /// Strict classes do not apply terminal equivalence during comparison.
    strict: bool,
    combiner: CombinerKind,
    parameter_comparer: Option<EqualDeviceParameters>,
}

impl DeviceClass {
    /// Create a new, empty device class with the given name.
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        DeviceClass {
            id: DeviceClassId(0),
            name: name.into(),
            description: String::new(),
            kind,
            terminals: Vec::new(),
            parameters: Vec::new(),
            equivalent_terminal_ids: Default::default(),
            strict: false,
            combiner: CombinerKind::None,
            parameter_comparer: None,
        }
    }

    /// Get the ID of this device class. Assigned when the class is added to a netlist.
    pub fn id(&self) -> DeviceClassId {
        self.id
    }

    /// Get the name of the device class.
    pub fn name(&self) -> &String {
        &self.name
    }

    /// Get the description text of the device class.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Set the description text.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Get the structural family of this class.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Adjust the structural family. Used by factory functions which derive
    /// a class from a simpler one.
    pub(crate) fn set_kind(&mut self, kind: DeviceKind) {
        self.kind = kind;
    }

    /// Add a terminal definition and return its ID.
    pub fn add_terminal(&mut self, name: impl Into<String>, description: impl Into<String>) -> usize {
        let id = self.terminals.len();
        self.terminals.push(TerminalDefinition {
            name: name.into(),
            description: description.into(),
            id,
        });
        id
    }

    /// Add a parameter definition and return its ID.
    pub fn add_parameter(&mut self, mut pd: ParameterDefinition) -> usize {
        let id = self.parameters.len();
        pd.id = id;
        self.parameters.push(pd);
        id
    }

    /// Get the terminal definitions.
    pub fn terminal_definitions(&self) -> &[TerminalDefinition] {
        &self.terminals
    }

    /// Get the parameter definitions.
    pub fn parameter_definitions(&self) -> &[ParameterDefinition] {
        &self.parameters
    }

    /// Number of terminals of this class.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Find a terminal ID by terminal name. Returns `None` if the name is unknown.
    pub fn terminal_id_for_name(&self, name: &str) -> Option<usize> {
        self.terminals.iter().find(|t| t.name == name).map(|t| t.id)
    }

    /// Find a parameter ID by parameter name. Returns `None` if the name is unknown.
    pub fn parameter_id_for_name(&self, name: &str) -> Option<usize> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.id)
    }

    /// Get the definition of the parameter with the given ID.
    pub fn parameter_definition(&self, id: usize) -> Option<&ParameterDefinition> {
        self.parameters.get(id)
    }

    /// Get the ID of the primary parameter if the class has one.
    pub fn primary_parameter_id(&self) -> Option<usize> {
        self.parameters.iter().find(|p| p.is_primary).map(|p| p.id)
    }

    /// Declare two terminals as equivalent (swappable). The first terminal
    /// becomes the canonical representative of the second.
    pub fn equivalent_terminals(&mut self, canonical_id: usize, equivalent_id: usize) {
        assert!(canonical_id < self.terminals.len() && equivalent_id < self.terminals.len(),
                "Terminal ID out of range.");
        self.equivalent_terminal_ids.insert(equivalent_id, canonical_id);
    }

    /// Remove all terminal equivalences.
    pub fn clear_equivalent_terminal_ids(&mut self) {
        self.equivalent_terminal_ids.clear();
    }

    /// Map a terminal ID to the canonical ID of its equivalence group.
    /// Strict classes return the ID unchanged.
    pub fn equivalent_terminal_id(&self, terminal_id: usize) -> usize {
        if self.strict {
            terminal_id
        } else {
            self.equivalent_terminal_ids
                .get(&terminal_id)
                .copied()
                .unwrap_or(terminal_id)
        }
    }

    /// Strict classes disable terminal equivalence.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Enable or disable strict mode.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Get the combination rule of this class.
    pub fn combiner(&self) -> CombinerKind {
        self.combiner
    }

    /// Set the combination rule of this class.
    pub fn set_combiner(&mut self, combiner: CombinerKind) {
        self.combiner = combiner;
    }

    /// Returns true if the class supports combination of parallel devices.
    pub fn supports_parallel_combination(&self) -> bool {
        self.combiner != CombinerKind::None
    }

    /// Returns true if the class supports combination of serial devices.
    pub fn supports_serial_combination(&self) -> bool {
        self.combiner != CombinerKind::None
    }

    /// Get the parameter comparer of this class, if one is installed.
    pub fn parameter_comparer(&self) -> Option<&EqualDeviceParameters> {
        self.parameter_comparer.as_ref()
    }

    /// Install a parameter comparer.
    pub fn set_parameter_comparer(&mut self, comparer: EqualDeviceParameters) {
        self.parameter_comparer = Some(comparer);
    }

    /// Compare the parameters of two devices of this class.
    ///
    /// Uses the installed parameter comparer, falling back to exact
    /// comparison of the primary parameters.
    pub fn devices_parameter_equal(&self, a: &Device, b: &Device) -> bool {
        match &self.parameter_comparer {
            Some(cmp) => cmp.equal(self, a, b),
            None => EqualDeviceParameters::default().equal(self, a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::device::{Device, DeviceId};

    fn two_param_class() -> DeviceClass {
        let mut cls = DeviceClass::new("X", DeviceKind::Generic);
        cls.add_terminal("A", "");
        cls.add_terminal("B", "");
        cls.add_parameter(ParameterDefinition::new("P", "", 0.0, true, 1.0, 0.0));
        cls.add_parameter(ParameterDefinition::new("Q", "", 0.0, false, 1.0, 0.0));
        cls
    }

    fn device_with(cls: &DeviceClass, p: f64, q: f64) -> Device {
        let mut d = Device::new(DeviceId(1), cls.id(), "", cls.terminal_count(),
                                vec![0.0; cls.parameter_definitions().len()]);
        d.set_parameter_value(0, p);
        d.set_parameter_value(1, q);
        d
    }

    #[test]
    fn default_compare_uses_primary_parameters_only() {
        let cls = two_param_class();
        let a = device_with(&cls, 1.0, 5.0);
        let b = device_with(&cls, 1.0, 7.0);
        let c = device_with(&cls, 2.0, 5.0);
        assert!(cls.devices_parameter_equal(&a, &b));
        assert!(!cls.devices_parameter_equal(&a, &c));
    }

    #[test]
    fn tolerance_compare() {
        let mut cls = two_param_class();
        cls.set_parameter_comparer(EqualDeviceParameters::new(0, 0.1, 0.0));
        let a = device_with(&cls, 1.0, 0.0);
        let b = device_with(&cls, 1.05, 0.0);
        let c = device_with(&cls, 1.2, 0.0);
        assert!(cls.devices_parameter_equal(&a, &b));
        assert!(!cls.devices_parameter_equal(&a, &c));
    }

    #[test]
    fn chained_ignore_compare() {
        let mut cls = two_param_class();
        cls.set_parameter_comparer(
            EqualDeviceParameters::new(0, 0.0, 0.01) + EqualDeviceParameters::ignore(1));
        let a = device_with(&cls, 100.0, 1.0);
        let b = device_with(&cls, 100.5, 2.0);
        assert!(cls.devices_parameter_equal(&a, &b));
    }

    #[test]
    fn terminal_equivalence_respects_strict() {
        let mut cls = DeviceClass::new("M", DeviceKind::Mos4);
        let s = cls.add_terminal("S", "");
        cls.add_terminal("G", "");
        let d = cls.add_terminal("D", "");
        cls.equivalent_terminals(s, d);
        assert_eq!(cls.equivalent_terminal_id(d), s);
        cls.set_strict(true);
        assert_eq!(cls.equivalent_terminal_id(d), d);
    }
}
