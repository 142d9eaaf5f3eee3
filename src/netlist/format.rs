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
//! Textual netlist format.
//!
//! The format is a stable, one-statement-per-line description of the netlist:
//!
//! ```text
//! circuit NAME (PIN=NET,...);
//!   device CLASS NAME (TERMINAL=NET,...) (PARAM=VALUE,...);
//!   subcircuit CIRCUIT NAME (PIN=NET,...);
//! end;
//! ```
//!
//! `to_string` (via `Display`) and [`Netlist::from_string`] are inverse to
//! each other on netlists expressible in this format.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use crate::spice::extractor::{to_word_or_quoted_string, Extractor};
use super::circuit::CircuitId;
use super::net::NetId;
use super::netlist::{Netlist, NetlistError};

/// Format a floating point number like C's `%.12g`: up to twelve significant
/// digits, trailing zeros removed, scientific notation for very small and very
/// large magnitudes.
pub(crate) fn format_g(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return format!("{}", v);
    }
    let exp = v.abs().log10().floor() as i32;
    if !(-4..12).contains(&exp) {
        let s = format!("{:.*e}", 11, v);
        match s.find('e') {
            Some(epos) => {
                let (mantissa, exponent) = s.split_at(epos);
                let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
                format!("{}{}", mantissa, exponent)
            }
            None => s,
        }
    } else {
        let decimals = (11 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, v);
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

fn net2string(netlist: &Netlist, circuit: CircuitId, net: Option<NetId>) -> String {
    match net {
        Some(net) => to_word_or_quoted_string(&netlist.circuit(circuit).net(net).expanded_name()),
        None => "(null)".to_string(),
    }
}

impl fmt::Display for Netlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.each_circuit() {
            let pins = c.each_pin()
                .map(|p| format!("{}={}",
                                 to_word_or_quoted_string(&p.expanded_name()),
                                 net2string(self, c.id(), p.net())))
                .join(",");
            writeln!(f, "circuit {} ({});", to_word_or_quoted_string(c.name().as_str()), pins)?;

            for d in c.each_device() {
                let cls = self.device_class(d.class_id());
                let terminals = cls.terminal_definitions().iter()
                    .map(|t| format!("{}={}", t.name(), net2string(self, c.id(), d.net_for_terminal(t.id()))))
                    .join(",");
                let parameters = cls.parameter_definitions().iter()
                    .map(|p| format!("{}={}", p.name(), format_g(d.parameter_value(p.id()))))
                    .join(",");
                let name = if d.name().is_empty() {
                    format!("${}", d.id().value())
                } else {
                    to_word_or_quoted_string(d.name())
                };
                writeln!(f, "  device {} {} ({}) ({});",
                         to_word_or_quoted_string(cls.name().as_str()), name, terminals, parameters)?;
            }

            for sc in c.each_subcircuit() {
                let template = self.circuit(sc.circuit_ref());
                let pins = template.each_pin()
                    .map(|p| format!("{}={}",
                                     to_word_or_quoted_string(&p.expanded_name()),
                                     net2string(self, c.id(), sc.net_for_pin(p.id()))))
                    .join(",");
                let name = if sc.name().is_empty() {
                    format!("${}", sc.id().value())
                } else {
                    to_word_or_quoted_string(sc.name())
                };
                writeln!(f, "  subcircuit {} {} ({});",
                         to_word_or_quoted_string(template.name().as_str()), name, pins)?;
            }

            writeln!(f, "end;")?;
        }
        Ok(())
    }
}

const NAME_CHARS: &str = "$.[]<>";

fn parse_error(ex: &Extractor, message: impl Into<String>) -> NetlistError {
    NetlistError::Parse(ex.error(message.into()).to_string())
}

/// Read a net reference: a name, an anonymous `$<n>`/`$I<n>` reference or `(null)`.
fn read_net(
    netlist: &mut Netlist,
    circuit: CircuitId,
    ex: &mut Extractor,
    n2n: &mut HashMap<String, NetId>,
) -> Result<Option<NetId>, NetlistError> {
    let (key, name, cluster_id) = if ex.test("(") {
        ex.expect("null").map_err(|e| NetlistError::Parse(e.to_string()))?;
        ex.expect(")").map_err(|e| NetlistError::Parse(e.to_string()))?;
        return Ok(None);
    } else if ex.test("$") {
        let has_i = ex.test("I");
        let n = ex.try_read_usize()
            .ok_or_else(|| parse_error(ex, "Expected a net ID"))?;
        let cluster = if has_i { (usize::MAX - n) + 1 } else { n };
        (format!("{}{}", if has_i { "$I" } else { "$" }, n), None, cluster)
    } else {
        let name = ex.read_word_or_quoted(NAME_CHARS)
            .map_err(|e| NetlistError::Parse(e.to_string()))?;
        (name.clone(), Some(name), 0)
    };

    if let Some(&net) = n2n.get(&key) {
        return Ok(Some(net));
    }

    let c = netlist.circuit_mut(circuit);
    let net = c.create_net(name.as_deref());
    if cluster_id > 0 {
        c.set_net_cluster_id(net, cluster_id);
    }
    n2n.insert(key, net);
    Ok(Some(net))
}

/// Read an object name: a word, a quoted string or an anonymous `$<n>` reference
/// which reads as an empty name.
fn read_object_name(ex: &mut Extractor) -> Result<String, NetlistError> {
    if ex.test("$") {
        ex.try_read_usize()
            .ok_or_else(|| parse_error(ex, "Expected an object ID"))?;
        Ok(String::new())
    } else {
        ex.read_word_or_quoted(NAME_CHARS)
            .map_err(|e| NetlistError::Parse(e.to_string()))
    }
}

fn read_pins(
    netlist: &mut Netlist,
    circuit: CircuitId,
    ex: &mut Extractor,
    n2n: &mut HashMap<String, NetId>,
) -> Result<(), NetlistError> {
    let org_pin_count = netlist.circuit(circuit).pin_count();
    let mut position = 0;

    ex.expect("(").map_err(|e| NetlistError::Parse(e.to_string()))?;
    while !ex.test(")") {
        ex.expect_more().map_err(|e| NetlistError::Parse(e.to_string()))?;

        let pin_name = read_object_name(ex)?;
        ex.expect("=").map_err(|e| NetlistError::Parse(e.to_string()))?;
        let net = read_net(netlist, circuit, ex, n2n)?;

        if position < org_pin_count {
            // The circuit was created from a forward reference; keep the
            // pin and give it its declared name.
            netlist.circuit_mut(circuit).rename_pin(position, pin_name);
        } else if org_pin_count > 0 {
            return Err(parse_error(ex, "Circuit defines more pins than its uses"));
        } else {
            netlist.add_pin(circuit, pin_name);
        }
        if let Some(net) = net {
            netlist.circuit_mut(circuit).connect_pin(position, Some(net));
        }
        position += 1;

        ex.test(",");
    }

    if position < org_pin_count {
        return Err(parse_error(ex, "Circuit defines fewer pins than its uses"));
    }
    Ok(())
}

fn read_device(
    netlist: &mut Netlist,
    circuit: CircuitId,
    ex: &mut Extractor,
    n2n: &mut HashMap<String, NetId>,
) -> Result<(), NetlistError> {
    let class_name = ex.read_word_or_quoted(NAME_CHARS)
        .map_err(|e| NetlistError::Parse(e.to_string()))?;
    let class = netlist.device_class_by_name(&class_name)
        .ok_or_else(|| parse_error(ex, format!("Not a valid device class name: {}", class_name)))?;

    let device_name = read_object_name(ex)?;
    let device = netlist.create_device(circuit, class, device_name);

    // Terminals.
    ex.expect("(").map_err(|e| NetlistError::Parse(e.to_string()))?;
    while !ex.test(")") {
        ex.expect_more().map_err(|e| NetlistError::Parse(e.to_string()))?;
        let terminal_name = ex.read_word_or_quoted(NAME_CHARS)
            .map_err(|e| NetlistError::Parse(e.to_string()))?;
        let terminal = netlist.device_class(class).terminal_id_for_name(&terminal_name)
            .ok_or_else(|| parse_error(ex, format!("Not a valid terminal name: {}", terminal_name)))?;
        ex.expect("=").map_err(|e| NetlistError::Parse(e.to_string()))?;
        let net = read_net(netlist, circuit, ex, n2n)?;
        if let Some(net) = net {
            netlist.circuit_mut(circuit).connect_terminal(device, terminal, Some(net));
        }
        ex.test(",");
    }

    // Parameters (optional).
    if ex.test("(") {
        while !ex.test(")") {
            ex.expect_more().map_err(|e| NetlistError::Parse(e.to_string()))?;
            let param_name = ex.read_word_or_quoted(NAME_CHARS)
                .map_err(|e| NetlistError::Parse(e.to_string()))?;
            let param = netlist.device_class(class).parameter_id_for_name(&param_name)
                .ok_or_else(|| parse_error(ex, format!("Not a valid parameter name: {}", param_name)))?;
            ex.expect("=").map_err(|e| NetlistError::Parse(e.to_string()))?;
            let value = ex.try_read_double()
                .ok_or_else(|| parse_error(ex, "Expected a parameter value"))?;
            netlist.circuit_mut(circuit).device_mut(device).set_parameter_value(param, value);
            ex.test(",");
        }
    }
    Ok(())
}

fn read_subcircuit(
    netlist: &mut Netlist,
    circuit: CircuitId,
    ex: &mut Extractor,
    n2n: &mut HashMap<String, NetId>,
) -> Result<(), NetlistError> {
    let template_name = ex.read_word_or_quoted(NAME_CHARS)
        .map_err(|e| NetlistError::Parse(e.to_string()))?;
    let template = match netlist.circuit_by_name(&template_name) {
        Some(c) => c,
        None => netlist.create_circuit(template_name.as_str()),
    };

    let sc_name = read_object_name(ex)?;
    let sc = netlist.create_subcircuit(circuit, template, sc_name);

    ex.expect("(").map_err(|e| NetlistError::Parse(e.to_string()))?;
    let mut position = 0;
    while !ex.test(")") {
        ex.expect_more().map_err(|e| NetlistError::Parse(e.to_string()))?;
        let pin_name = read_object_name(ex)?;
        ex.expect("=").map_err(|e| NetlistError::Parse(e.to_string()))?;

        if position >= netlist.circuit(template).pin_count() {
            // Forward reference: create a pin on the yet-undefined template.
            netlist.add_pin(template, pin_name);
        }

        let net = read_net(netlist, circuit, ex, n2n)?;
        if let Some(net) = net {
            netlist.circuit_mut(circuit).connect_subcircuit_pin(sc, position, Some(net));
        }
        position += 1;
        ex.test(",");
    }

    if position < netlist.circuit(template).pin_count() {
        return Err(parse_error(ex, "Too few pins in subcircuit call"));
    }
    Ok(())
}

impl Netlist {
    /// Parse the textual netlist format and add its contents to this netlist.
    ///
    /// The device classes referenced by `device` statements must already be
    /// registered in the netlist.
    pub fn from_string(&mut self, text: &str) -> Result<(), NetlistError> {
        let mut ex = Extractor::new(text);

        while ex.test("circuit") {
            let name = ex.read_word_or_quoted(NAME_CHARS)
                .map_err(|e| NetlistError::Parse(e.to_string()))?;
            let circuit = match self.circuit_by_name(&name) {
                Some(c) => c,
                None => self.create_circuit(name.as_str()),
            };

            let mut n2n: HashMap<String, NetId> = HashMap::new();
            read_pins(self, circuit, &mut ex, &mut n2n)?;
            ex.expect(";").map_err(|e| NetlistError::Parse(e.to_string()))?;

            while !ex.test("end") {
                ex.expect_more().map_err(|e| NetlistError::Parse(e.to_string()))?;
                if ex.test("device") {
                    read_device(self, circuit, &mut ex, &mut n2n)?;
                    ex.expect(";").map_err(|e| NetlistError::Parse(e.to_string()))?;
                } else if ex.test("subcircuit") {
                    read_subcircuit(self, circuit, &mut ex, &mut n2n)?;
                    ex.expect(";").map_err(|e| NetlistError::Parse(e.to_string()))?;
                } else {
                    return Err(parse_error(&ex, "Expected 'device' or 'subcircuit'"));
                }
            }
            ex.expect(";").map_err(|e| NetlistError::Parse(e.to_string()))?;
        }

        ex.expect_end().map_err(|e| NetlistError::Parse(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::device_classes;

    #[test]
    fn test_format_g() {
        assert_eq!(format_g(0.0), "0");
        assert_eq!(format_g(-0.0), "0");
        assert_eq!(format_g(7650.0), "7650");
        assert_eq!(format_g(0.25), "0.25");
        assert_eq!(format_g(2e-9), "2e-9");
        assert_eq!(format_g(-1.75e-6), "-1.75e-6");
        assert_eq!(format_g(0.00175), "0.00175");
        assert_eq!(format_g(3.84), "3.84");
        assert_eq!(format_g(1e12), "1e12");
        assert_eq!(format_g(6e9), "6000000000");
    }

    fn sample_netlist() -> Netlist {
        let mut nl = Netlist::new();
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let mos = nl.add_device_class(device_classes::mos4("NMOS"));

        let sub = nl.create_circuit("SUB");
        let a = nl.add_pin(sub, "A");
        let z = nl.add_pin(sub, "Z");
        let m = nl.create_device(sub, mos, "1");
        {
            let c = nl.circuit_mut(sub);
            let na = c.create_net(Some("A"));
            let nz = c.create_net(Some("Z"));
            c.connect_pin(a, Some(na));
            c.connect_pin(z, Some(nz));
            c.connect_terminal(m, 0, Some(na));
            c.connect_terminal(m, 1, Some(na));
            c.connect_terminal(m, 2, Some(nz));
            c.connect_terminal(m, 3, Some(nz));
            c.device_mut(m).set_parameter_value(0, 0.25);
            c.device_mut(m).set_parameter_value(1, 1.5);
        }

        let top = nl.create_circuit("TOP");
        let d = nl.create_device(top, res, "");
        let sc = nl.create_subcircuit(top, sub, "U1");
        {
            let c = nl.circuit_mut(top);
            let n1 = c.create_net(Some("N1"));
            let n2 = c.create_net(Some("N2"));
            c.connect_terminal(d, 0, Some(n1));
            c.connect_terminal(d, 1, Some(n2));
            c.device_mut(d).set_parameter_value(0, 7650.0);
            c.connect_subcircuit_pin(sc, 0, Some(n1));
            c.connect_subcircuit_pin(sc, 1, Some(n2));
        }
        nl
    }

    #[test]
    fn test_to_string() {
        let nl = sample_netlist();
        assert_eq!(nl.to_string(),
            "circuit SUB (A=A,Z=Z);\n\
             \x20 device NMOS '1' (S=A,G=A,D=Z,B=Z) (L=0.25,W=1.5,AS=0,AD=0,PS=0,PD=0);\n\
             end;\n\
             circuit TOP ();\n\
             \x20 device RES $1 (A=N1,B=N2) (R=7650,L=0,W=0,A=0,P=0);\n\
             \x20 subcircuit SUB U1 (A=N1,Z=N2);\n\
             end;\n");
    }

    #[test]
    fn test_round_trip() {
        let nl = sample_netlist();
        let text = nl.to_string();

        let mut nl2 = Netlist::new();
        nl2.add_device_class(device_classes::resistor("RES"));
        nl2.add_device_class(device_classes::mos4("NMOS"));
        nl2.from_string(&text).unwrap();

        assert_eq!(nl2.to_string(), text);
    }

    #[test]
    fn test_from_string_with_forward_reference() {
        let text =
            "circuit TOP ();\n\
             \x20 subcircuit SUB U1 (A=N1,Z=N2);\n\
             end;\n\
             circuit SUB (A=A,Z=Z);\n\
             end;\n";
        let mut nl = Netlist::new();
        nl.from_string(text).unwrap();
        let sub = nl.circuit_by_name("SUB").unwrap();
        assert_eq!(nl.circuit(sub).pin_count(), 2);
        assert_eq!(nl.circuit(sub).pin(0).name(), "A");
        let top = nl.circuit_by_name("TOP").unwrap();
        assert_eq!(nl.circuit(top).subcircuit_count(), 1);
    }

    #[test]
    fn test_from_string_rejects_garbage() {
        let mut nl = Netlist::new();
        assert!(nl.from_string("circuit TOP (); garbage; end;").is_err());
    }
}
