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
//! The SPICE writer. Mirrors the input grammar of the reader: one element per
//! line, net names escaped where necessary, parameter names in upper case and
//! long lines folded with `+` continuations.

use std::io;

use itertools::Itertools;

use crate::netlist::format::format_g;
use crate::netlist::netlist::NetlistError;
use crate::netlist::prelude::*;

/// Maximum line length before the writer folds into a continuation line.
const MAX_LINE_LENGTH: usize = 80;

/// Escape a name for SPICE output. Characters which would break the token
/// apart are escaped with a backslash; a leading `$` is escaped because it
/// would start an end-of-line comment.
pub fn format_spice_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let plain = c.is_alphanumeric()
            || matches!(c, '_' | '.' | ':' | '#' | '[' | ']' | '<' | '>' | '|' | '-' | '+' | '!')
            || (c == '$' && i > 0);
        if !plain {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A delegate customizing the SPICE output.
pub trait SpiceWriterDelegate {
    /// Comment lines emitted at the top of the output.
    fn write_header(&mut self, _netlist: &Netlist) -> Vec<String> {
        vec!["SPICE netlist".to_string()]
    }

    /// Comment lines introducing a device class. Emitted once before the
    /// first device of the class.
    fn write_device_intro(&mut self, _class: &DeviceClass) -> Vec<String> {
        Vec::new()
    }

    /// Produce the element line for a device. Return `None` to use the
    /// standard form.
    fn write_device(&mut self, _netlist: &Netlist, _circuit: &Circuit, _device: &Device) -> Option<String> {
        None
    }

    /// Convert a net to its output token.
    fn net_to_string(&mut self, circuit: &Circuit, net: Option<NetId>) -> String {
        match net {
            Some(net) => self.format_name(&circuit.net(net).expanded_name()),
            // An unconnected terminal gets a dangling placeholder node.
            None => "0".to_string(),
        }
    }

    /// Format a name for output.
    fn format_name(&mut self, name: &str) -> String {
        format_spice_name(name)
    }
}

/// The stock writer delegate.
#[derive(Debug, Clone, Default)]
pub struct StandardSpiceWriterDelegate;

impl SpiceWriterDelegate for StandardSpiceWriterDelegate {}

/// The SPICE writer.
pub struct SpiceWriter<D: SpiceWriterDelegate = StandardSpiceWriterDelegate> {
    delegate: D,
}

impl SpiceWriter<StandardSpiceWriterDelegate> {
    /// Create a writer with the standard delegate.
    pub fn new() -> Self {
        Self::with_delegate(StandardSpiceWriterDelegate)
    }
}

impl Default for SpiceWriter<StandardSpiceWriterDelegate> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SpiceWriterDelegate> SpiceWriter<D> {
    /// Create a writer with a custom delegate.
    pub fn with_delegate(delegate: D) -> Self {
        SpiceWriter { delegate }
    }

    /// Write the netlist in SPICE format.
    ///
    /// Circuits are emitted bottom-up so that every `.SUBCKT` definition
    /// precedes its uses. The contents of the anonymous top circuit `.TOP`
    /// are emitted without a `.SUBCKT` wrapper.
    pub fn write(&mut self, netlist: &Netlist, out: &mut impl io::Write) -> Result<(), NetlistError> {
        let text = self.write_string(netlist)?;
        out.write_all(text.as_bytes())
            .map_err(|e| NetlistError::Parse(format!("write failed: {}", e)))?;
        Ok(())
    }

    /// Write the netlist in SPICE format into a string.
    pub fn write_string(&mut self, netlist: &Netlist) -> Result<String, NetlistError> {
        let mut out = String::new();

        for line in self.delegate.write_header(netlist) {
            emit_comment(&mut out, &line);
        }

        let mut order = netlist.compute_topology()?.top_down;
        order.reverse();

        // Emit the anonymous top circuit last.
        let top = netlist.circuit_by_name(".TOP");
        for circuit in order.iter().filter(|&&c| Some(c) != top) {
            self.write_circuit(&mut out, netlist, netlist.circuit(*circuit), true);
        }
        if let Some(top) = top {
            self.write_circuit(&mut out, netlist, netlist.circuit(top), false);
        }

        Ok(out)
    }

    fn write_circuit(&mut self, out: &mut String, netlist: &Netlist, circuit: &Circuit, wrap: bool) {
        if wrap {
            let pins = circuit.each_pin()
                .map(|p| self.delegate.format_name(&p.expanded_name()))
                .join(" ");
            let name = self.delegate.format_name(circuit.name().as_str());
            if pins.is_empty() {
                emit_line(out, &format!(".SUBCKT {}", name));
            } else {
                emit_line(out, &format!(".SUBCKT {} {}", name, pins));
            }
        }

        let mut introduced: Vec<DeviceClassId> = Vec::new();
        for device in circuit.each_device() {
            let class = netlist.device_class(device.class_id());
            if !introduced.contains(&device.class_id()) {
                introduced.push(device.class_id());
                for line in self.delegate.write_device_intro(class) {
                    emit_comment(out, &line);
                }
            }
            let line = self.delegate.write_device(netlist, circuit, device)
                .unwrap_or_else(|| self.standard_device_line(netlist, circuit, device));
            emit_line(out, &line);
        }

        for sc in circuit.each_subcircuit() {
            let template = netlist.circuit(sc.circuit_ref());
            let nets = (0..sc.pin_count())
                .map(|p| self.delegate.net_to_string(circuit, sc.net_for_pin(p)))
                .join(" ");
            let line = format!("X{} {} {}",
                               self.delegate.format_name(&sc.expanded_name()),
                               nets,
                               self.delegate.format_name(template.name().as_str()));
            emit_line(out, &line);
        }

        if wrap {
            emit_line(out, &format!(".ENDS {}", self.delegate.format_name(circuit.name().as_str())));
        }
    }

    /// The standard element line of a device.
    fn standard_device_line(&mut self, netlist: &Netlist, circuit: &Circuit, device: &Device) -> String {
        let class = netlist.device_class(device.class_id());
        let name = self.delegate.format_name(&device.expanded_name());

        // Net tokens in class terminal order; MOS terminals are reordered to
        // the (D, G, S, B) convention of the `M` element.
        let mut net = |t: usize| self.net_token(circuit, device, t);
        let canonical: &str;
        let element;
        let mut nets: Vec<String>;
        match class.kind() {
            DeviceKind::Resistor => {
                element = 'R';
                canonical = "RES";
                nets = vec![net(0), net(1)];
            }
            DeviceKind::ResistorWithBulk => {
                element = 'R';
                canonical = "RES3";
                nets = vec![net(0), net(1), net(2)];
            }
            DeviceKind::Capacitor => {
                element = 'C';
                canonical = "CAP";
                nets = vec![net(0), net(1)];
            }
            DeviceKind::CapacitorWithBulk => {
                element = 'C';
                canonical = "CAP3";
                nets = vec![net(0), net(1), net(2)];
            }
            DeviceKind::Inductor => {
                element = 'L';
                canonical = "IND";
                nets = vec![net(0), net(1)];
            }
            DeviceKind::Diode => {
                element = 'D';
                canonical = "DIODE";
                nets = vec![net(0), net(1)];
            }
            DeviceKind::Bjt3 => {
                element = 'Q';
                canonical = "BJT3";
                nets = vec![net(0), net(1), net(2)];
            }
            DeviceKind::Bjt4 => {
                element = 'Q';
                canonical = "BJT4";
                nets = vec![net(0), net(1), net(2), net(3)];
            }
            DeviceKind::Mos3 | DeviceKind::Mos4 => {
                element = 'M';
                canonical = "";
                nets = ["D", "G", "S"].iter()
                    .filter_map(|t| class.terminal_id_for_name(t))
                    .map(|t| net(t))
                    .collect();
                if class.kind() == DeviceKind::Mos4 {
                    nets.push(net(class.terminal_id_for_name("B").unwrap()));
                }
            }
            DeviceKind::Generic => {
                // Classes outside the built-in families are written as
                // subcircuit-like calls; a custom delegate may override this.
                element = 'X';
                canonical = "";
                nets = (0..device.terminal_count()).map(|t| net(t)).collect();
            }
        }

        let mut line = format!("{}{} {}", element, name, nets.join(" "));

        // The primary parameter of R, C and L is written as the unnamed value.
        let primary = match element {
            'R' | 'C' | 'L' => class.primary_parameter_id(),
            _ => None,
        };
        if let Some(primary) = primary {
            line.push(' ');
            line.push_str(&format_g(device.parameter_value(primary)));
        }

        // The model name: the class name unless it is the canonical name of
        // the element.
        if class.name().as_str() != canonical {
            line.push(' ');
            line.push_str(&self.delegate.format_name(class.name().as_str()));
        }

        // Remaining parameters in SI units, names upper case.
        for pd in class.parameter_definitions() {
            if Some(pd.id()) == primary {
                continue;
            }
            let value = device.parameter_value(pd.id());
            if value == pd.default_value() {
                continue;
            }
            line.push_str(&format!(" {}={}", pd.name().to_uppercase(),
                                   format_g(value * pd.si_scaling())));
        }

        line
    }

    fn net_token(&mut self, circuit: &Circuit, device: &Device, terminal: usize) -> String {
        self.delegate.net_to_string(circuit, device.net_for_terminal(terminal))
    }
}

/// Append a line, folding it with `+` continuations when it is too long.
fn emit_line(out: &mut String, line: &str) {
    let mut remaining = line;
    let mut first = true;
    loop {
        let budget = if first { MAX_LINE_LENGTH } else { MAX_LINE_LENGTH - 2 };
        if remaining.len() <= budget {
            if !first {
                out.push_str("+ ");
            }
            out.push_str(remaining);
            out.push('\n');
            return;
        }
        // Break at the last blank inside the budget.
        let cut = remaining[..budget].rfind(' ').unwrap_or(budget);
        if !first {
            out.push_str("+ ");
        }
        out.push_str(&remaining[..cut]);
        out.push('\n');
        remaining = remaining[cut..].trim_start();
        first = false;
    }
}

/// Append a comment line.
fn emit_comment(out: &mut String, line: &str) {
    out.push_str("* ");
    out.push_str(line);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::device_classes;
    use crate::spice::reader::SpiceReader;
    use std::path::Path;

    #[test]
    fn test_format_spice_name() {
        assert_eq!(format_spice_name("VDD"), "VDD");
        assert_eq!(format_spice_name("A[5]<1>"), "A[5]<1>");
        assert_eq!(format_spice_name("a b"), "a\\ b");
        assert_eq!(format_spice_name("$1"), "\\$1");
        assert_eq!(format_spice_name("GND$1"), "GND$1");
    }

    #[test]
    fn test_write_simple_netlist() {
        let mut nl = Netlist::new();
        nl.set_case_sensitive(false);
        let res = nl.add_device_class(device_classes::resistor("RES"));
        let mos = nl.add_device_class(device_classes::mos4("NMOS"));

        let sub = nl.create_circuit("INV");
        for pin in ["IN", "OUT", "VDD", "VSS"] {
            nl.add_pin(sub, pin);
        }
        let m = nl.create_device(sub, mos, "1");
        let r = nl.create_device(sub, res, "1");
        {
            let c = nl.circuit_mut(sub);
            let nets: Vec<_> = ["IN", "OUT", "VDD", "VSS"].iter()
                .map(|n| c.create_net(Some(*n)))
                .collect();
            for (pin, net) in nets.iter().enumerate() {
                c.connect_pin(pin, Some(*net));
            }
            // S G D B
            c.connect_terminal(m, 0, Some(nets[3]));
            c.connect_terminal(m, 1, Some(nets[0]));
            c.connect_terminal(m, 2, Some(nets[1]));
            c.connect_terminal(m, 3, Some(nets[3]));
            c.device_mut(m).set_parameter_value(0, 0.25);
            c.device_mut(m).set_parameter_value(1, 1.5);
            c.connect_terminal(r, 0, Some(nets[1]));
            c.connect_terminal(r, 1, Some(nets[2]));
            c.device_mut(r).set_parameter_value(0, 1000.0);
        }

        let text = SpiceWriter::new().write_string(&nl).unwrap();
        assert!(text.contains(".SUBCKT INV IN OUT VDD VSS"));
        // MOS nets in (D, G, S, B) order.
        assert!(text.contains("M1 OUT IN VSS VSS NMOS L=2.5e-7 W=1.5e-6"));
        assert!(text.contains("R1 OUT VDD 1000"));
        assert!(text.contains(".ENDS INV"));
    }

    #[test]
    fn test_write_read_round_trip() {
        let source =
            ".SUBCKT INV IN OUT VDD VSS\n\
             M1 OUT IN VSS VSS NMOS L=0.25U W=1.5U\n\
             R1 OUT VDD 1K\n\
             .ENDS\n\
             X1 A Z VDD VSS INV\n";
        let mut nl = Netlist::new();
        SpiceReader::new().read_source(source, Path::new("test.cir"), &mut nl).unwrap();

        let text = SpiceWriter::new().write_string(&nl).unwrap();

        let mut nl2 = Netlist::new();
        SpiceReader::new().read_source(&text, Path::new("copy.cir"), &mut nl2).unwrap();

        // The model of the rewritten netlist is identical.
        assert_eq!(nl.to_string(), nl2.to_string());
    }

    #[test]
    fn test_long_lines_are_folded() {
        let mut out = String::new();
        let long: String = (0..30).map(|i| format!("NET{} ", i)).collect();
        emit_line(&mut out, long.trim_end());
        assert!(out.lines().count() > 1);
        assert!(out.lines().all(|l| l.len() <= MAX_LINE_LENGTH));
        assert!(out.lines().skip(1).all(|l| l.starts_with("+ ")));
    }
}
