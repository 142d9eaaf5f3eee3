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
//! The reader delegate decodes SPICE elements into devices and subcircuits.
//!
//! The default behavior lives in free functions (`standard_parse_element`,
//! `standard_element`, ...) so that overriding delegates can fall back to it.

use crate::netlist::prelude::*;
use super::expr::{SpiceExpr, Value, Variables};
use super::extractor::Extractor;
use super::reader::SpiceReaderError;

/// Options of the SPICE reader, settable through `.OPTIONS`.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Global geometry scale factor (`.OPTIONS SCALE=...`).
    pub scale: f64,
    /// Default MOS drain area.
    pub defad: f64,
    /// Default MOS source area.
    pub defas: f64,
    /// Default MOS channel width.
    pub defw: f64,
    /// Default MOS channel length.
    pub defl: f64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            scale: 1.0,
            defad: 0.0,
            defas: 0.0,
            // ngspice defaults:
            defw: 100e-6,
            defl: 100e-6,
        }
    }
}

/// The decoded right-hand side of an element card.
#[derive(Debug, Clone, Default)]
pub struct ParsedElement {
    /// The model name. Empty if no model was given.
    pub model: String,
    /// The unnamed value of R, C and L elements.
    pub value: f64,
    /// The net names in element order.
    pub nets: Vec<String>,
    /// Named parameters. Keys are upper case.
    pub params: Variables,
}

/// A delegate customizing how the SPICE reader translates elements.
///
/// All methods have default implementations with the standard behavior.
/// Overriding implementations can call back into the standard behavior
/// through the free functions of this module.
pub trait SpiceReaderDelegate {
    /// Called when reading starts.
    fn start(&mut self, _netlist: &mut Netlist) {}

    /// Called when reading finished.
    fn finish(&mut self, _netlist: &mut Netlist) {}

    /// Called for unknown dot statements. Return true to claim the statement.
    fn control_statement(&mut self, _netlist: &mut Netlist, _line: &str) -> Result<bool, SpiceReaderError> {
        Ok(false)
    }

    /// Return true if `.SUBCKT` calls with this (upper case) name shall be
    /// delivered to [`SpiceReaderDelegate::element`] instead of creating a
    /// subcircuit instance.
    fn wants_subcircuit(&mut self, _circuit_name: &str) -> bool {
        false
    }

    /// Translate a raw net token into the stored net name.
    /// The default unescapes backslash sequences.
    fn translate_net_name(&mut self, raw: &str) -> String {
        unescape_name(raw)
    }

    /// Decode the right-hand side of an element card (everything after the
    /// element name).
    fn parse_element(
        &mut self,
        netlist: &Netlist,
        tail: &str,
        element: char,
        options: &ReaderOptions,
        variables: &Variables,
    ) -> Result<ParsedElement, SpiceReaderError> {
        standard_parse_element(netlist, tail, element, options, variables)
    }

    /// Build a device from a decoded element. Return false to reject the
    /// element.
    #[allow(clippy::too_many_arguments)]
    fn element(
        &mut self,
        netlist: &mut Netlist,
        circuit: CircuitId,
        element: char,
        name: &str,
        model: &str,
        value: f64,
        nets: &[NetId],
        params: &Variables,
        options: &ReaderOptions,
    ) -> Result<bool, SpiceReaderError> {
        standard_element(netlist, circuit, element, name, model, value, nets, params, options)
    }
}

/// The stock delegate which uses the standard behavior for everything.
#[derive(Debug, Clone, Default)]
pub struct StandardSpiceDelegate;

impl SpiceReaderDelegate for StandardSpiceDelegate {}

fn error(message: impl Into<String>) -> SpiceReaderError {
    SpiceReaderError::Plain(message.into())
}

fn hex_num(c: char) -> Option<u32> {
    c.to_digit(16)
}

/// Unescape a SPICE name: `\c` becomes `c`, `\xHH` becomes the character with
/// the given hex code.
pub fn unescape_name(n: &str) -> String {
    let mut out = String::with_capacity(n.len());
    let mut chars = n.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('x') | Some('X') => {
                chars.next();
                let mut code = 0u32;
                for _ in 0..2 {
                    match chars.peek().copied().and_then(hex_num) {
                        Some(d) => {
                            chars.next();
                            code = code * 16 + d;
                        }
                        None => break,
                    }
                }
                if let Some(c) = char::from_u32(code) {
                    out.push(c);
                }
            }
            Some(&c) => {
                chars.next();
                out.push(c);
            }
            None => {}
        }
    }
    out
}

/// Scan one component of an element card: a net name, a model name or a value.
/// The scan is quote- and parenthesis-aware, so `A(1+2)` stays one component.
pub fn parse_component(ex: &mut Extractor) -> String {
    ex.skip_whitespace();
    let rest = ex.rest();

    let mut quote: Option<char> = None;
    let mut brackets = 0usize;
    let mut end = rest.len();
    let mut chars = rest.char_indices();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else if c == '\\' {
                chars.next();
            }
        } else if (c.is_whitespace() || c == '=') && brackets == 0 {
            end = i;
            break;
        } else if c == '"' || c == '\'' {
            quote = Some(c);
        } else if c == '(' {
            brackets += 1;
        } else if c == ')' && brackets > 0 {
            brackets -= 1;
        }
    }

    let component = rest[..end].to_string();
    for _ in 0..component.chars().count() {
        ex.advance();
    }
    component
}

/// Evaluate a value expression with two variable scopes, searched in order.
pub fn read_value(ex: &mut Extractor, variables: &Variables, variables2: &Variables) -> Value {
    SpiceExpr::with_scopes(variables, variables2)
        .try_read_from(ex)
        .unwrap_or(Value::Nil)
}

/// Try to interpret a string as a numeric value expression.
pub fn try_read_value(s: &str, variables: &Variables) -> Option<f64> {
    let mut ex = Extractor::new(s);
    let value = SpiceExpr::new(variables).try_read_from(&mut ex)?;
    if !ex.at_end() || !value.can_convert_to_number() {
        return None;
    }
    Some(value.to_number())
}

/// Split an element card into net/model components and named parameters.
///
/// Components that are the name of a string variable are replaced by the
/// variable's value; components naming a numeric variable become a parameter
/// (this allows writing `x` instead of `x=x`).
pub fn parse_element_components(
    netlist: &Netlist,
    s: &str,
    variables: &Variables,
    params: &mut Variables,
) -> Result<Vec<String>, SpiceReaderError> {
    let mut ex = Extractor::new(s);
    let mut strings = Vec::new();
    let mut in_params = false;

    while !ex.at_end() {
        if ex.test_without_case("params:") {
            in_params = true;
            continue;
        }

        let saved = ex.save();
        let word = ex.try_read_word("$.");
        if let Some(word) = word {
            if ex.test("=") {
                // A parameter assignment. Previously parsed parameters are
                // visible to the value expression.
                let pn = netlist.normalize_name(&word);
                let value = read_value(&mut ex, variables, params);
                params.insert(pn, value);
                continue;
            }
        }
        ex.restore(saved);

        if in_params {
            return Err(error(
                "Invalid syntax for parameter assignment - needs keyword followed by '='",
            ));
        }

        let component = parse_component(&mut ex);
        if component.is_empty() {
            return Err(error(format!("Cannot parse element component: '{}'", ex.rest())));
        }
        let component = netlist.normalize_name(&component);

        match variables.get(&component) {
            Some(Value::Text(s)) => strings.push(s.clone()),
            Some(v) if v.can_convert_to_number() => {
                params.insert(component, v.clone());
            }
            _ => strings.push(component),
        }
    }

    Ok(strings)
}

fn def_values_per_element(element: char, options: &ReaderOptions, params: &mut Variables) {
    if element == 'M' {
        params.insert("W".to_string(), Value::Number(options.defw));
        params.insert("L".to_string(), Value::Number(options.defl));
        params.insert("AD".to_string(), Value::Number(options.defad));
        params.insert("AS".to_string(), Value::Number(options.defas));
    }
}

/// The standard element decoder.
///
/// R, C and L elements accept several positional variants which are
/// disambiguated by trying to parse candidate tokens as numeric values;
/// an explicit `R=`/`C=`/`L=` parameter wins over a value-like model name.
pub fn standard_parse_element(
    netlist: &Netlist,
    tail: &str,
    element: char,
    options: &ReaderOptions,
    variables: &Variables,
) -> Result<ParsedElement, SpiceReaderError> {
    let mut params = Variables::new();
    def_values_per_element(element, options, &mut params);
    let mut nn = parse_element_components(netlist, tail, variables, &mut params)?;

    let mut model = String::new();
    let mut value = 0.0;

    match element {
        'X' => {
            // Subcircuit call: Xname n1 n2 ... nn circuit [params]
            model = nn.pop().ok_or_else(|| error("No circuit name given for subcircuit call"))?;
        }

        'R' | 'C' | 'L' => {
            // Two-terminal devices with a value:
            //   (1) n1 n2 X=value [params]
            //   (2) n1 n2 value [params]
            //   (3) n1 n2 model X=value [params]
            //   (4) n1 n2 model value [params]
            //   (5) n1 n2 n3 model X=value [params]
            //   (6) n1 n2 value model [params]
            //   (7) n1 n2 n3 model value [params]
            //   (8) n1 n2 n3 value model [params]
            if nn.len() < 2 {
                return Err(error("Not enough specs (nodes, value, model) for a R, C or L device"));
            }
            if nn.len() > 5 {
                return Err(error("Too many specs (nodes, value, model) for a R, C or L device"));
            }

            let key = element.to_string();
            let rv = params.get(&key).cloned();
            let mut has_value = false;

            match nn.len() {
                2 => {
                    if let Some(rv) = rv {
                        value = rv.to_number(); // (1)
                        has_value = true;
                    }
                }
                3 => {
                    if let Some(v) = try_read_value(&nn[2], variables) {
                        value = v; // (2)
                        has_value = true;
                        nn.pop();
                    } else {
                        model = nn.pop().unwrap(); // (3)
                        if let Some(rv) = rv {
                            value = rv.to_number();
                            has_value = true;
                        }
                    }
                }
                4 => {
                    if let Some(v) = try_read_value(&nn[3], variables) {
                        value = v; // (4)
                        has_value = true;
                        nn.pop();
                    } else if let Some(rv) = rv {
                        value = rv.to_number(); // (5)
                        has_value = true;
                        model = nn.pop().unwrap();
                    } else if let Some(v) = try_read_value(&nn[2], variables) {
                        value = v; // (6)
                        has_value = true;
                        model = nn.pop().unwrap();
                        nn.pop();
                    } else {
                        model = nn.pop().unwrap(); // fall back to (5)
                    }
                }
                _ => {
                    if let Some(v) = try_read_value(&nn[4], variables) {
                        value = v; // (7)
                        has_value = true;
                        nn.pop();
                        model = nn.pop().unwrap();
                    } else if let Some(v) = try_read_value(&nn[3], variables) {
                        value = v; // (8)
                        has_value = true;
                        model = nn.pop().unwrap();
                        nn.pop();
                    }
                }
            }

            params.remove(&key);
            if !has_value {
                return Err(error("Can't find a value for a R, C or L device"));
            }
            // The value is stored under the element name always.
            params.insert(key, Value::Number(value));
        }

        _ => {
            // n-terminal devices with a model as the last node.
            model = nn.pop()
                .ok_or_else(|| error(format!("No model name given for element '{}'", element)))?;

            match element {
                'M' => {
                    if nn.len() != 4 {
                        return Err(error("'M' element must have four nodes"));
                    }
                }
                'Q' => {
                    if nn.len() != 3 && nn.len() != 4 {
                        return Err(error("'Q' element must have three or four nodes"));
                    }
                }
                'D' => {
                    if nn.len() != 2 {
                        return Err(error("'D' element must have two nodes"));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(ParsedElement {
        model,
        value,
        nets: nn,
        params,
    })
}

/// Look up a device class by name or create it through the factory.
/// The kind of an existing class must match the element's expectation.
fn make_device_class(
    netlist: &mut Netlist,
    name: &str,
    kind: DeviceKind,
    factory: fn(String) -> DeviceClass,
    element: char,
) -> Result<DeviceClassId, SpiceReaderError> {
    if let Some(cls) = netlist.device_class_by_name(name) {
        if netlist.device_class(cls).kind() != kind {
            return Err(error(format!(
                "Class {} is not a {:?} device class as required by '{}' element",
                name, kind, element
            )));
        }
        Ok(cls)
    } else {
        Ok(netlist.add_device_class(factory(name.into())))
    }
}

fn scale_params(params: &mut Variables, names: &[&str], mult: f64) {
    for name in names {
        if let Some(v) = params.get_mut(*name) {
            if v.can_convert_to_number() {
                *v = Value::Number(v.to_number() * mult);
            }
        }
    }
}

/// The standard element builder. Creates a built-in device for the known
/// element codes, applying the `M` multiplier and parameter scaling.
#[allow(clippy::too_many_arguments)]
pub fn standard_element(
    netlist: &mut Netlist,
    circuit: CircuitId,
    element: char,
    name: &str,
    model: &str,
    value: f64,
    nets: &[NetId],
    params: &Variables,
    options: &ReaderOptions,
) -> Result<bool, SpiceReaderError> {
    let mut params = params.clone();
    let mut value = value;
    let mut terminal_order: Vec<usize> = Vec::new();

    let mult = params.get("M").map(|v| v.to_number()).unwrap_or(1.0);
    if mult < 1e-10 {
        return Err(error(format!(
            "Invalid multiplier value (M={:.12}) - must not be zero or negative", mult
        )));
    }

    let cls = match element {
        'R' => {
            let cls = match nets.len() {
                2 => make_device_class(netlist, if model.is_empty() { "RES" } else { model },
                                       DeviceKind::Resistor, resistor, 'R')?,
                3 => make_device_class(netlist, if model.is_empty() { "RES3" } else { model },
                                       DeviceKind::ResistorWithBulk, resistor_with_bulk, 'R')?,
                _ => return Err(error("A 'R' element requires two or three nets")),
            };
            // The multiplier acts as a divider, following the ngspice manual.
            value /= mult;
            params.insert("R".to_string(), Value::Number(value));
            scale_params(&mut params, &["A", "P", "W"], mult);
            cls
        }

        'L' => {
            if nets.len() != 2 {
                return Err(error("A 'L' element requires two nets"));
            }
            let cls = make_device_class(netlist, if model.is_empty() { "IND" } else { model },
                                        DeviceKind::Inductor, inductor, 'L')?;
            // The multiplier acts as a divider, following the ngspice manual.
            value /= mult;
            params.insert("L".to_string(), Value::Number(value));
            cls
        }

        'C' => {
            let cls = match nets.len() {
                2 => make_device_class(netlist, if model.is_empty() { "CAP" } else { model },
                                       DeviceKind::Capacitor, capacitor, 'C')?,
                3 => make_device_class(netlist, if model.is_empty() { "CAP3" } else { model },
                                       DeviceKind::CapacitorWithBulk, capacitor_with_bulk, 'C')?,
                _ => return Err(error("A 'C' element requires two or three nets")),
            };
            value *= mult;
            params.insert("C".to_string(), Value::Number(value));
            scale_params(&mut params, &["A", "P"], mult);
            cls
        }

        'D' => {
            let cls = make_device_class(netlist, if model.is_empty() { "DIODE" } else { model },
                                        DeviceKind::Diode, diode, 'D')?;
            scale_params(&mut params, &["A", "P"], mult);
            cls
        }

        'Q' => {
            let cls = match nets.len() {
                3 => make_device_class(netlist, if model.is_empty() { "BJT3" } else { model },
                                       DeviceKind::Bjt3, bjt3, 'Q')?,
                4 => make_device_class(netlist, if model.is_empty() { "BJT4" } else { model },
                                       DeviceKind::Bjt4, bjt4, 'Q')?,
                _ => return Err(error("'Q' element needs to have 3 or 4 terminals")),
            };
            scale_params(&mut params, &["AE", "PE", "AB", "PB", "AC", "PC"], mult);
            cls
        }

        'M' => {
            if nets.len() != 4 {
                return Err(error("'M' element needs to have 4 terminals"));
            }
            let cls = make_device_class(netlist, if model.is_empty() { "MOS4" } else { model },
                                        DeviceKind::Mos4, mos4, 'M')?;
            scale_params(&mut params, &["W", "AD", "AS", "PD", "PS"], mult);
            // SPICE lists MOS nodes as (D, G, S, B); the class order is (S, G, D, B).
            let class = netlist.device_class(cls);
            terminal_order = ["D", "G", "S", "B"].iter()
                .map(|t| class.terminal_id_for_name(t).unwrap())
                .collect();
            cls
        }

        _ => return Err(error(format!("Not a known element type: '{}'", element))),
    };

    let num_terminals = netlist.device_class(cls).terminal_count();
    if num_terminals != nets.len() {
        return Err(error(format!(
            "Wrong number of terminals: class '{}' expects {}, but {} are given",
            netlist.device_class(cls).name(), num_terminals, nets.len()
        )));
    }

    let device = netlist.create_device(circuit, cls, name);

    if terminal_order.is_empty() {
        for (t, net) in nets.iter().enumerate() {
            netlist.circuit_mut(circuit).connect_terminal(device, t, Some(*net));
        }
    } else {
        for (t, net) in terminal_order.into_iter().zip(nets.iter()) {
            netlist.circuit_mut(circuit).connect_terminal(device, t, Some(*net));
        }
    }

    let values = netlist.device_class(cls).parameter_definitions().iter()
        .filter_map(|pd| params.get(pd.name()).map(|v| (pd.id(), v.to_number())))
        .collect::<Vec<_>>();
    for (pid, v) in values {
        netlist.circuit_mut(circuit).device_mut(device).set_parameter_value(pid, v);
    }

    apply_parameter_scaling(netlist, circuit, device, options.scale);
    Ok(true)
}

/// Apply SI and geometry scaling to all parameters of a device:
/// `stored = parsed / si_scaling * scale^geo_scaling_exponent`.
pub fn apply_parameter_scaling(netlist: &mut Netlist, circuit: CircuitId, device: DeviceId, scale: f64) {
    let class = netlist.circuit(circuit).device(device).class_id();
    let factors = netlist.device_class(class).parameter_definitions().iter()
        .map(|pd| (pd.id(), pd.si_scaling(), pd.geo_scaling_exponent()))
        .collect::<Vec<_>>();
    let d = netlist.circuit_mut(circuit).device_mut(device);
    for (pid, si, exp) in factors {
        let v = d.parameter_value(pid);
        d.set_parameter_value(pid, v / si * scale.powf(exp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_name() {
        assert_eq!(unescape_name(r"\$1"), "$1");
        assert_eq!(unescape_name(r"A\[5\]"), "A[5]");
        assert_eq!(unescape_name(r"\x41B"), "AB");
        assert_eq!(unescape_name("plain"), "plain");
    }

    #[test]
    fn test_parse_component_brackets_and_quotes() {
        let mut ex = Extractor::new("A(1+2) rest");
        assert_eq!(parse_component(&mut ex), "A(1+2)");
        let mut ex = Extractor::new("'a b' c");
        assert_eq!(parse_component(&mut ex), "'a b'");
        let mut ex = Extractor::new("W=1.5");
        assert_eq!(parse_component(&mut ex), "W");
    }

    #[test]
    fn test_parse_element_components() {
        let nl = Netlist::new();
        let vars = Variables::new();
        let mut params = Variables::new();
        let nets = parse_element_components(&nl, "6 1 7.65K W=2u L=1u", &vars, &mut params).unwrap();
        assert_eq!(nets, vec!["6", "1", "7.65K"]);
        assert!((params["W"].to_number() - 2e-6).abs() < 1e-18);
        assert!((params["L"].to_number() - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_parameter_references_previous_parameters() {
        let nl = Netlist::new();
        let vars = Variables::new();
        let mut params = Variables::new();
        parse_element_components(&nl, "A B X W=2 L='W*2'", &vars, &mut params).unwrap();
        assert_eq!(params["L"].to_number(), 4.0);
    }

    #[test]
    fn test_standard_parse_element_variants() {
        let nl = Netlist::new();
        let vars = Variables::new();
        let options = ReaderOptions::default();

        // (2) value only
        let e = standard_parse_element(&nl, "1 2 7.65K", 'R', &options, &vars).unwrap();
        assert_eq!(e.nets, vec!["1", "2"]);
        assert_eq!(e.model, "");
        assert!((e.value - 7650.0).abs() < 1e-9);

        // (1) explicit R=
        let e = standard_parse_element(&nl, "1 2 R=1K", 'R', &options, &vars).unwrap();
        assert_eq!(e.value, 1000.0);

        // (4) a value-like last token keeps the third token as a net;
        // "n1 n2 model value" cannot be told apart from "n1 n2 n3 value".
        let e = standard_parse_element(&nl, "1 2 RMODEL 1K", 'R', &options, &vars).unwrap();
        assert_eq!(e.model, "");
        assert_eq!(e.nets, vec!["1", "2", "RMODEL"]);
        assert_eq!(e.value, 1000.0);

        // (3) model + explicit R=
        let e = standard_parse_element(&nl, "1 2 RMODEL R=1K", 'R', &options, &vars).unwrap();
        assert_eq!(e.model, "RMODEL");
        assert_eq!(e.value, 1000.0);

        // (6) value + model
        let e = standard_parse_element(&nl, "1 2 1K RMODEL", 'R', &options, &vars).unwrap();
        assert_eq!(e.model, "RMODEL");
        assert_eq!(e.value, 1000.0);
        assert_eq!(e.nets, vec!["1", "2"]);

        // (5) three nets + model + explicit R=
        let e = standard_parse_element(&nl, "1 2 3 RMODEL R=1K", 'R', &options, &vars).unwrap();
        assert_eq!(e.model, "RMODEL");
        assert_eq!(e.nets, vec!["1", "2", "3"]);

        // (7) three nets + model + value
        let e = standard_parse_element(&nl, "1 2 3 RMODEL 1K", 'R', &options, &vars).unwrap();
        assert_eq!(e.model, "RMODEL");
        assert_eq!(e.value, 1000.0);
        assert_eq!(e.nets, vec!["1", "2", "3"]);

        // (8) three nets + value + model
        let e = standard_parse_element(&nl, "1 2 3 1K RMODEL", 'R', &options, &vars).unwrap();
        assert_eq!(e.model, "RMODEL");
        assert_eq!(e.value, 1000.0);
        assert_eq!(e.nets, vec!["1", "2", "3"]);

        // X pops the circuit name.
        let e = standard_parse_element(&nl, "A B C SUB1 L=0.15 W=1.5", 'X', &options, &vars).unwrap();
        assert_eq!(e.model, "SUB1");
        assert_eq!(e.nets, vec!["A", "B", "C"]);
        assert_eq!(e.params["L"].to_number(), 0.15);
    }

    #[test]
    fn test_mos_defaults() {
        let nl = Netlist::new();
        let vars = Variables::new();
        let options = ReaderOptions::default();
        let e = standard_parse_element(&nl, "1 2 3 4 NMOS W=1.5U", 'M', &options, &vars).unwrap();
        assert_eq!(e.model, "NMOS");
        assert!((e.params["W"].to_number() - 1.5e-6).abs() < 1e-18);
        // L falls back to DEFL.
        assert!((e.params["L"].to_number() - options.defl).abs() < 1e-18);
    }

    #[test]
    fn test_standard_element_applies_multiplier() {
        let mut nl = Netlist::new();
        nl.set_case_sensitive(false);
        let circuit = nl.create_circuit("TOP");
        let n1 = nl.circuit_mut(circuit).create_net(Some("1"));
        let n2 = nl.circuit_mut(circuit).create_net(Some("2"));
        let options = ReaderOptions::default();

        let mut params = Variables::new();
        params.insert("M".to_string(), Value::Number(2.0));
        standard_element(&mut nl, circuit, 'R', "1", "", 1700.0, &[n1, n2], &params, &options).unwrap();
        standard_element(&mut nl, circuit, 'C', "1", "", 1e-9, &[n1, n2], &params, &options).unwrap();
        standard_element(&mut nl, circuit, 'L', "1", "", 1e-9, &[n1, n2], &params, &options).unwrap();

        let c = nl.circuit(circuit);
        let devices: Vec<_> = c.each_device().collect();
        assert_eq!(devices.len(), 3);
        // R is divided, C is multiplied, L is divided.
        assert_eq!(devices[0].parameter_value(0), 850.0);
        assert_eq!(devices[1].parameter_value(0), 2e-9);
        assert_eq!(devices[2].parameter_value(0), 5e-10);
    }

    #[test]
    fn test_standard_element_mos_terminal_order() {
        let mut nl = Netlist::new();
        nl.set_case_sensitive(false);
        let circuit = nl.create_circuit("TOP");
        let nets: Vec<_> = ["D", "G", "S", "B"].iter()
            .map(|n| nl.circuit_mut(circuit).create_net(Some(*n)))
            .collect();
        let options = ReaderOptions::default();
        let mut params = Variables::new();
        params.insert("L".to_string(), Value::Number(0.25e-6));
        params.insert("W".to_string(), Value::Number(1.5e-6));

        standard_element(&mut nl, circuit, 'M', "1", "NMOS", 0.0, &nets, &params, &options).unwrap();

        let c = nl.circuit(circuit);
        let d = c.each_device().next().unwrap();
        let cls = nl.device_class(d.class_id());
        let s = cls.terminal_id_for_name("S").unwrap();
        let drain = cls.terminal_id_for_name("D").unwrap();
        // SPICE order (D,G,S,B) maps onto the class terminals.
        assert_eq!(d.net_for_terminal(drain), Some(nets[0]));
        assert_eq!(d.net_for_terminal(s), Some(nets[2]));
        // Parameters are stored in micrometers.
        assert!((d.parameter_value(cls.parameter_id_for_name("L").unwrap()) - 0.25).abs() < 1e-12);
        assert!((d.parameter_value(cls.parameter_id_for_name("W").unwrap()) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_multiplier() {
        let mut nl = Netlist::new();
        let circuit = nl.create_circuit("TOP");
        let n1 = nl.circuit_mut(circuit).create_net(Some("1"));
        let n2 = nl.circuit_mut(circuit).create_net(Some("2"));
        let mut params = Variables::new();
        params.insert("M".to_string(), Value::Number(0.0));
        let r = standard_element(&mut nl, circuit, 'R', "1", "", 100.0, &[n1, n2], &params,
                                 &ReaderOptions::default());
        assert!(r.is_err());
    }
}
