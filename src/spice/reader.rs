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
//! The SPICE reader.
//!
//! The reader folds continuation lines, resolves `.INCLUDE` and `.LIB`,
//! tracks `.PARAM` scopes and `.MODEL` cards, builds circuits from `.SUBCKT`
//! definitions and dispatches element cards to a [`SpiceReaderDelegate`].
//!
//! Subcircuits with parameters are not built directly: their cards are cached
//! and expanded on demand, once per distinct parameter binding, into a clone
//! named `NAME(K=V,...)`.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use itertools::Itertools;
use log::warn;
use thiserror::Error;

use crate::netlist::netlist::NetlistError;
use crate::netlist::prelude::*;
use super::delegate::{self, ParsedElement, ReaderOptions, SpiceReaderDelegate, StandardSpiceDelegate};
use super::expr::Variables;
use super::extractor::Extractor;

/// Errors raised while reading SPICE input.
#[derive(Debug, Error)]
pub enum SpiceReaderError {
    /// A parse or semantic error with its source location.
    #[error("{message} in {file}, line {line}")]
    Syntax {
        /// Description of the failure.
        message: String,
        /// The file the failure occurred in.
        file: String,
        /// The one-based line number.
        line: usize,
    },
    /// An error without a location yet. The reader attaches the location.
    #[error("{0}")]
    Plain(String),
    /// A file could not be opened or read.
    #[error("error reading {path}: {source}")]
    Io {
        /// The path of the file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A structural netlist error, e.g. a recursive hierarchy.
    #[error(transparent)]
    Netlist(#[from] NetlistError),
    /// Reading was canceled through the cancellation flag.
    #[error("reading canceled")]
    Canceled,
}

fn locate(error: SpiceReaderError, file: &str, line: usize) -> SpiceReaderError {
    match error {
        SpiceReaderError::Plain(message) => SpiceReaderError::Syntax {
            message,
            file: file.to_string(),
            line,
        },
        other => other,
    }
}

/// One input file on the include stack.
struct SourceFrame {
    lines: Vec<String>,
    next: usize,
    path: PathBuf,
    display_name: String,
    /// Set when the frame was opened by `.LIB file section`: only the named
    /// section is read, the rest of the file is skipped.
    only_section: Option<String>,
    /// True while lines are skipped (outside the wanted `.LIB` section).
    skipping: bool,
    /// True while inside the wanted section of a filtered frame.
    in_section: bool,
}

/// A cached `.SUBCKT` definition.
#[derive(Clone, Default)]
struct SubcktCard {
    /// Declared pin names.
    pins: Vec<String>,
    /// Default parameters, evaluated at the definition site.
    params: Variables,
    /// Body cards with their source location.
    body: Vec<(String, String, usize)>,
}

impl SubcktCard {
    fn is_parameterized(&self) -> bool {
        !self.params.is_empty()
    }
}

/// A model registered by a `.MODEL` card.
#[derive(Clone)]
struct ModelCard {
    kind: String,
    params: Variables,
}

/// The SPICE reader.
pub struct SpiceReader<D: SpiceReaderDelegate = StandardSpiceDelegate> {
    delegate: D,
    strict: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl SpiceReader<StandardSpiceDelegate> {
    /// Create a reader with the standard delegate.
    pub fn new() -> Self {
        Self::with_delegate(StandardSpiceDelegate)
    }
}

impl Default for SpiceReader<StandardSpiceDelegate> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SpiceReaderDelegate> SpiceReader<D> {
    /// Create a reader with a custom delegate.
    pub fn with_delegate(delegate: D) -> Self {
        SpiceReader {
            delegate,
            strict: false,
            cancel: None,
        }
    }

    /// In strict mode, all instantiated subcircuits must have a definition.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Install a cancellation flag. When the flag becomes true, reading stops
    /// with [`SpiceReaderError::Canceled`]. The partially built netlist must
    /// be discarded by the caller.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Read a SPICE file into the netlist.
    pub fn read_file(&mut self, path: impl AsRef<Path>, netlist: &mut Netlist) -> Result<(), SpiceReaderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SpiceReaderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.read_source(&text, path, netlist)
    }

    /// Read SPICE text from a stream into the netlist. Includes are resolved
    /// relative to the working directory.
    pub fn read(&mut self, stream: &mut impl Read, netlist: &mut Netlist) -> Result<(), SpiceReaderError> {
        let mut text = String::new();
        stream.read_to_string(&mut text).map_err(|source| SpiceReaderError::Io {
            path: "<stream>".to_string(),
            source,
        })?;
        self.read_source(&text, Path::new("<stream>"), netlist)
    }

    /// Read SPICE text into the netlist. `path` is used for error locations
    /// and to resolve relative includes.
    pub fn read_source(&mut self, text: &str, path: &Path, netlist: &mut Netlist) -> Result<(), SpiceReaderError> {
        // SPICE names are case insensitive.
        netlist.set_case_sensitive(false);
        self.delegate.start(netlist);

        let strict = self.strict;
        let mut run = ReaderRun {
            reader: &mut *self,
            netlist: &mut *netlist,
            options: ReaderOptions::default(),
            globals: Vec::new(),
            models: HashMap::new(),
            cards: HashMap::new(),
            collect_stack: Vec::new(),
            scope_stack: vec![Variables::new()],
            frames: Vec::new(),
            anonymous_top: None,
            expanded: HashSet::new(),
            stubs: HashMap::new(),
        };

        run.push_file(text.to_string(), path.to_path_buf());
        run.run()?;
        run.wire_global_nets()?;
        let undefined = run.stubs.values().cloned().sorted().next();
        drop(run);

        if strict {
            if let Some(name) = undefined {
                return Err(SpiceReaderError::Plain(format!(
                    "Subcircuit '{}' is called but not defined (strict mode)", name
                )));
            }
        }

        self.delegate.finish(netlist);
        Ok(())
    }
}

/// The state of one `read` invocation.
struct ReaderRun<'a, D: SpiceReaderDelegate> {
    reader: &'a mut SpiceReader<D>,
    netlist: &'a mut Netlist,
    options: ReaderOptions,
    /// Global net names in declaration order.
    globals: Vec<String>,
    models: HashMap<String, ModelCard>,
    /// Cached subcircuit definitions by normalized name.
    cards: HashMap<String, SubcktCard>,
    /// Definitions currently being collected (`.SUBCKT` nesting).
    collect_stack: Vec<(String, SubcktCard)>,
    /// Parameter scopes; the last entry is the active scope.
    scope_stack: Vec<Variables>,
    frames: Vec<SourceFrame>,
    anonymous_top: Option<CircuitId>,
    /// Names of circuits whose content has been built.
    expanded: HashSet<String>,
    /// Stub circuits created by calls without a definition.
    stubs: HashMap<CircuitId, String>,
}

/// Remove an end-of-line comment: everything from a `$` which stands at the
/// start of a token. A `$` inside a name (like `GND$1`) is kept.
fn strip_eol_comment(line: &str) -> &str {
    let mut prev_is_space = true;
    for (i, c) in line.char_indices() {
        if c == '$' && prev_is_space {
            return &line[..i];
        }
        prev_is_space = c.is_whitespace();
    }
    line
}

/// Assemble one logical card from a source frame: the next content line with
/// all its continuation lines folded in. Returns `None` when the frame is
/// exhausted.
fn assemble_card(frame: &mut SourceFrame) -> Option<(String, usize)> {
    // Find the next content line.
    let mut base: Option<(String, usize)> = None;
    while frame.next < frame.lines.len() {
        let line = strip_eol_comment(frame.lines[frame.next].trim()).trim_end();
        frame.next += 1;
        if line.is_empty() || line.starts_with('*') {
            continue;
        }
        base = Some((line.to_string(), frame.next));
        break;
    }
    let (mut card, line_no) = base?;

    // Fold continuation lines. Blank and comment lines in between do not
    // interrupt a continuation sequence.
    loop {
        let mut probe = frame.next;
        let mut continuation = None;
        while probe < frame.lines.len() {
            let line = frame.lines[probe].trim_start();
            if line.is_empty() || line.starts_with('*') {
                probe += 1;
                continue;
            }
            if let Some(stripped) = line.strip_prefix('+') {
                continuation = Some((probe, strip_eol_comment(stripped).trim_end().to_string()));
            }
            break;
        }
        match continuation {
            Some((probe, cont)) => {
                card.push(' ');
                card.push_str(&cont);
                frame.next = probe + 1;
            }
            None => break,
        }
    }

    Some((card, line_no))
}

impl<D: SpiceReaderDelegate> ReaderRun<'_, D> {
    fn scope(&self) -> &Variables {
        self.scope_stack.last().unwrap()
    }

    fn check_cancel(&self) -> Result<(), SpiceReaderError> {
        if let Some(flag) = &self.reader.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(SpiceReaderError::Canceled);
            }
        }
        Ok(())
    }

    fn push_file(&mut self, text: String, path: PathBuf) {
        self.push_file_with_section(text, path, None)
    }

    fn push_file_with_section(&mut self, text: String, path: PathBuf, only_section: Option<String>) {
        let skipping = only_section.is_some();
        self.frames.push(SourceFrame {
            lines: text.lines().map(|l| l.to_string()).collect(),
            next: 0,
            display_name: path.display().to_string(),
            path,
            only_section,
            skipping,
            in_section: false,
        });
    }

    /// Assemble the next logical card of the top frame. Comment lines are
    /// dropped, continuation lines are folded even across blank and comment
    /// lines. Returns the card with its source location.
    fn next_card(&mut self) -> Option<(String, String, usize)> {
        loop {
            let assembled = self.frames.last_mut().map(assemble_card)?;
            match assembled {
                None => {
                    self.frames.pop();
                }
                Some((card, line_no)) => {
                    let display_name = self.frames.last().unwrap().display_name.clone();
                    return Some((card, display_name, line_no));
                }
            }
        }
    }

    fn run(&mut self) -> Result<(), SpiceReaderError> {
        while let Some((card, file, line)) = self.next_card() {
            self.check_cancel()?;
            self.handle_toplevel_card(&card, &file, line)
                .map_err(|e| locate(e, &file, line))?;
        }

        if let Some((name, _)) = self.collect_stack.last() {
            return Err(SpiceReaderError::Plain(format!(
                "Missing .ENDS for circuit {}", name
            )));
        }
        Ok(())
    }

    /// Handle a card read from the input files, taking the `.LIB` section
    /// skip state and `.SUBCKT` body collection into account.
    fn handle_toplevel_card(&mut self, card: &str, file: &str, line: usize) -> Result<(), SpiceReaderError> {
        let skipping = self.frames.last().map(|f| f.skipping).unwrap_or(false);
        let dot_word = dot_keyword(card);

        // Section markers work in both skip and normal mode.
        match dot_word.as_deref() {
            Some("LIB") => return self.handle_lib(card),
            Some("ENDL") => return self.handle_endl(),
            _ => {}
        }

        if skipping {
            return Ok(());
        }

        // Include statements are file level and are processed even inside a
        // `.SUBCKT` body which is being collected.
        match dot_word.as_deref() {
            Some("INCLUDE") | Some("INC") => return self.handle_include(card),
            Some("SUBCKT") => return self.begin_subckt(card),
            Some("ENDS") => return self.end_subckt(),
            _ => {}
        }

        if let Some((_, collected)) = self.collect_stack.last_mut() {
            collected.body.push((card.to_string(), file.to_string(), line));
            return Ok(());
        }

        self.handle_card(card, None)
    }

    /// Handle a card in its circuit context. `circuit` is `None` at the top
    /// level and `Some` while a subcircuit body is expanded.
    fn handle_card(&mut self, card: &str, circuit: Option<CircuitId>) -> Result<(), SpiceReaderError> {
        match dot_keyword(card).as_deref() {
            Some("GLOBAL") => self.handle_global(card),
            Some("PARAM") => self.handle_param(card),
            Some("OPTIONS") | Some("OPTION") => self.handle_options(card),
            Some("MODEL") => self.handle_model(card),
            Some("END") => Ok(()),
            Some(_) => {
                if !self.reader.delegate.control_statement(self.netlist, card)? {
                    warn!("Ignoring control statement: {}", card);
                }
                Ok(())
            }
            None => self.handle_element_card(card, circuit),
        }
    }

    // == Control cards == //

    fn handle_include(&mut self, card: &str) -> Result<(), SpiceReaderError> {
        let tail = card_tail(card);
        let mut ex = Extractor::new(&tail);
        let path = read_path_token(&mut ex)?;
        let resolved = self.resolve_path(&path);
        let text = std::fs::read_to_string(&resolved).map_err(|source| SpiceReaderError::Io {
            path: resolved.display().to_string(),
            source,
        })?;
        self.push_file(text, resolved);
        Ok(())
    }

    fn handle_lib(&mut self, card: &str) -> Result<(), SpiceReaderError> {
        let tail = card_tail(card);
        let mut ex = Extractor::new(&tail);
        let first = read_path_token(&mut ex)?;
        let second = if ex.at_end() {
            None
        } else {
            Some(read_path_token(&mut ex)?)
        };

        match second {
            Some(section) => {
                // .LIB path section: read only the named section of the file.
                let resolved = self.resolve_path(&first);
                let text = std::fs::read_to_string(&resolved).map_err(|source| SpiceReaderError::Io {
                    path: resolved.display().to_string(),
                    source,
                })?;
                self.push_file_with_section(text, resolved, Some(section.to_uppercase()));
            }
            None => {
                // .LIB section: a section marker inside a library file.
                let section = first.to_uppercase();
                if let Some(frame) = self.frames.last_mut() {
                    match &frame.only_section {
                        Some(wanted) if frame.skipping && *wanted == section => {
                            frame.skipping = false;
                            frame.in_section = true;
                        }
                        Some(_) => {}
                        None => {
                            // Reading the file directly: unselected sections are skipped.
                            frame.skipping = true;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_endl(&mut self) -> Result<(), SpiceReaderError> {
        // ".ENDL" tolerates a trailing section name.
        let (in_section, skipping, filtered) = match self.frames.last() {
            Some(f) => (f.in_section, f.skipping, f.only_section.is_some()),
            None => return Ok(()),
        };
        if in_section {
            // The wanted section is done; the rest of the file is irrelevant.
            self.frames.pop();
        } else if skipping && !filtered {
            self.frames.last_mut().unwrap().skipping = false;
        }
        Ok(())
    }

    fn handle_global(&mut self, card: &str) -> Result<(), SpiceReaderError> {
        let tail = card_tail(card);
        let mut ex = Extractor::new(&tail);
        while !ex.at_end() {
            let raw = delegate::parse_component(&mut ex);
            if raw.is_empty() {
                break;
            }
            let translated = self.reader.delegate.translate_net_name(&raw);
            let name = self.netlist.normalize_name(&translated);
            // Duplicate declarations are tolerated.
            if !self.globals.contains(&name) {
                self.globals.push(name);
            }
        }
        Ok(())
    }

    fn handle_param(&mut self, card: &str) -> Result<(), SpiceReaderError> {
        let tail = card_tail(card);
        let mut params = Variables::new();
        let strings = delegate::parse_element_components(self.netlist, &tail, self.scope(), &mut params)?;
        if !strings.is_empty() {
            warn!("Ignoring non-assignment tokens in .PARAM statement: {}", strings.join(" "));
        }
        self.scope_stack.last_mut().unwrap().extend(params);
        Ok(())
    }

    fn handle_options(&mut self, card: &str) -> Result<(), SpiceReaderError> {
        let tail = card_tail(card);
        let mut params = Variables::new();
        delegate::parse_element_components(self.netlist, &tail, self.scope(), &mut params)?;

        let mut unknown = false;
        for (key, value) in &params {
            match key.as_str() {
                "SCALE" => self.options.scale = value.to_number(),
                "DEFAD" => self.options.defad = value.to_number(),
                "DEFAS" => self.options.defas = value.to_number(),
                "DEFW" => self.options.defw = value.to_number(),
                "DEFL" => self.options.defl = value.to_number(),
                _ => unknown = true,
            }
        }
        if unknown && !self.reader.delegate.control_statement(self.netlist, card)? {
            warn!("Ignoring unknown options in: {}", card);
        }
        Ok(())
    }

    fn handle_model(&mut self, card: &str) -> Result<(), SpiceReaderError> {
        let tail = card_tail(card);
        let mut ex = Extractor::new(&tail);

        let name = delegate::parse_component(&mut ex);
        if name.is_empty() {
            return Err(SpiceReaderError::Plain("Model name expected in .MODEL statement".to_string()));
        }
        let name = self.netlist.normalize_name(&name);
        let kind = delegate::parse_component(&mut ex);
        let kind = self.netlist.normalize_name(&kind);

        // The remaining parameters may be enclosed in parentheses.
        let mut params_text = ex.rest().trim().to_string();
        if params_text.starts_with('(') && params_text.ends_with(')') {
            params_text = params_text[1..params_text.len() - 1].to_string();
        }
        let mut params = Variables::new();
        delegate::parse_element_components(self.netlist, &params_text, self.scope(), &mut params)?;

        self.models.insert(name, ModelCard { kind, params });
        Ok(())
    }

    // == Subcircuit definitions == //

    fn begin_subckt(&mut self, card: &str) -> Result<(), SpiceReaderError> {
        let tail = card_tail(card);
        let mut ex = Extractor::new(&tail);

        let raw_name = delegate::parse_component(&mut ex);
        if raw_name.is_empty() {
            return Err(SpiceReaderError::Plain("Circuit name expected after .SUBCKT".to_string()));
        }
        let name = self.netlist.normalize_name(&raw_name);

        if self.cards.contains_key(&name) {
            return Err(SpiceReaderError::Plain(format!("Redefinition of circuit {}", name)));
        }

        let mut params = Variables::new();
        let raw_pins = delegate::parse_element_components(self.netlist, ex.rest(), self.scope(), &mut params)?;
        let pins = raw_pins.iter()
            .map(|p| self.reader.delegate.translate_net_name(p))
            .collect_vec();

        self.collect_stack.push((
            name,
            SubcktCard {
                pins,
                params,
                body: Vec::new(),
            },
        ));
        Ok(())
    }

    fn end_subckt(&mut self) -> Result<(), SpiceReaderError> {
        // ".ENDS" tolerates a trailing circuit name.
        let (name, card) = self.collect_stack.pop()
            .ok_or_else(|| SpiceReaderError::Plain(".ENDS without .SUBCKT".to_string()))?;

        let parameterized = card.is_parameterized();
        self.cards.insert(name.clone(), card);

        if !parameterized {
            // Build the circuit right away so that the netlist keeps the
            // definition order of the input.
            let binding = Variables::new();
            self.expand_circuit(&name, &binding, name.clone())?;
        }
        Ok(())
    }

    /// Build a circuit from a cached definition. `specialized_name` equals the
    /// base name for non-parameterized circuits. Reuses a stub circuit created
    /// by forward references.
    fn expand_circuit(
        &mut self,
        base_name: &str,
        binding: &Variables,
        specialized_name: String,
    ) -> Result<CircuitId, SpiceReaderError> {
        if let Some(existing) = self.netlist.circuit_by_name(&specialized_name) {
            if self.expanded.contains(&specialized_name) {
                return Ok(existing);
            }
        }

        let card = self.cards.get(base_name).cloned()
            .ok_or_else(|| SpiceReaderError::Plain(format!("No definition for circuit {}", base_name)))?;

        let circuit = match self.netlist.circuit_by_name(&specialized_name) {
            Some(stub) => {
                // A stub created by a forward reference: adopt its pins.
                if self.netlist.circuit(stub).pin_count() > card.pins.len() {
                    return Err(SpiceReaderError::Plain(format!(
                        "Pin count mismatch between definition and calls of circuit {}", specialized_name
                    )));
                }
                self.stubs.remove(&stub);
                stub
            }
            None => self.netlist.create_circuit(specialized_name.as_str()),
        };
        self.expanded.insert(specialized_name);

        // Create the declared pins with one net each. Pins of a stub are
        // renamed; their auto-created nets are renamed along.
        for (position, pin_name) in card.pins.iter().enumerate() {
            if position < self.netlist.circuit(circuit).pin_count() {
                let c = self.netlist.circuit_mut(circuit);
                c.rename_pin(position, pin_name.clone());
                if let Some(net) = c.net_for_pin(position) {
                    if c.net_by_name(pin_name).is_none() {
                        c.rename_net(net, Some(pin_name));
                    }
                }
            } else {
                let pin = self.netlist.add_pin(circuit, pin_name.clone());
                let c = self.netlist.circuit_mut(circuit);
                let net = match c.net_by_name(pin_name) {
                    Some(net) => net,
                    None => c.create_net(Some(pin_name)),
                };
                c.connect_pin(pin, Some(net));
            }
        }

        // The parameter binding becomes the inner scope of the body.
        let mut scope = self.scope_stack.first().unwrap().clone();
        scope.extend(card.params.clone());
        scope.extend(binding.clone());
        self.scope_stack.push(scope);

        let mut result = Ok(());
        for (body_card, file, line) in &card.body {
            result = self.check_cancel()
                .and_then(|_| self.handle_card(body_card, Some(circuit)))
                .map_err(|e| locate(e, file, *line));
            if result.is_err() {
                break;
            }
        }

        self.scope_stack.pop();
        result?;

        Ok(circuit)
    }

    // == Elements == //

    fn top_circuit(&mut self) -> CircuitId {
        match self.anonymous_top {
            Some(c) => c,
            None => {
                let c = self.netlist.create_circuit(".TOP");
                self.anonymous_top = Some(c);
                c
            }
        }
    }

    fn get_or_create_net(&mut self, circuit: CircuitId, raw: &str) -> NetId {
        let translated = self.reader.delegate.translate_net_name(raw);
        let name = self.netlist.normalize_name(&translated);
        let c = self.netlist.circuit_mut(circuit);
        match c.net_by_name(&name) {
            Some(net) => net,
            None => c.create_net(Some(&name)),
        }
    }

    fn handle_element_card(&mut self, card: &str, circuit: Option<CircuitId>) -> Result<(), SpiceReaderError> {
        let mut ex = Extractor::new(card);
        let token = delegate::parse_component(&mut ex);
        let element = match token.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
            _ => {
                return Err(SpiceReaderError::Plain(format!(
                    "Expected an element or control statement: '{}'", card
                )));
            }
        };
        let name = self.netlist.normalize_name(&delegate::unescape_name(&token[1..]));
        let tail = ex.rest().to_string();

        let scope = self.scope().clone();
        let parsed = self.reader.delegate.parse_element(
            self.netlist, &tail, element, &self.options, &scope)?;

        let circuit = match circuit {
            Some(c) => c,
            None => self.top_circuit(),
        };

        if element == 'X' && !self.reader.delegate.wants_subcircuit(&parsed.model) {
            return self.handle_subcircuit_call(circuit, &name, parsed);
        }

        // Check the element code against a registered model and merge the
        // model parameters as defaults.
        let mut params = parsed.params;
        if let Some(model) = self.models.get(&parsed.model) {
            if !model_kind_matches(&model.kind, element) {
                return Err(SpiceReaderError::Plain(format!(
                    "Model type '{}' of model '{}' does not match the '{}' element",
                    model.kind, parsed.model, element
                )));
            }
            let mut merged = model.params.clone();
            merged.extend(params);
            params = merged;
        }

        let nets = parsed.nets.iter()
            .map(|n| self.get_or_create_net(circuit, n))
            .collect_vec();

        let ok = self.reader.delegate.element(
            self.netlist, circuit, element, &name, &parsed.model,
            parsed.value, &nets, &params, &self.options)?;
        if !ok {
            warn!("Element not read: {}", card);
        }
        Ok(())
    }

    fn handle_subcircuit_call(
        &mut self,
        circuit: CircuitId,
        name: &str,
        parsed: ParsedElement,
    ) -> Result<(), SpiceReaderError> {
        let base_name = parsed.model;
        let defaults = self.cards.get(&base_name).map(|c| c.params.clone());
        let parameterized = defaults.as_ref().map(|p| !p.is_empty()).unwrap_or(false);

        let target = if parameterized || !parsed.params.is_empty() {
            // The effective binding: declared defaults, overridden by the
            // call-site parameters.
            let mut binding = defaults.unwrap_or_default();
            binding.extend(parsed.params.clone());
            let specialized_name = specialized_circuit_name(&base_name, &binding);

            if self.cards.contains_key(&base_name) {
                self.expand_circuit(&base_name, &binding, specialized_name)?
            } else {
                // No definition (yet): create a stub per parameter binding.
                self.get_or_create_stub(&specialized_name, parsed.nets.len())
            }
        } else {
            match self.netlist.circuit_by_name(&base_name) {
                Some(c) => c,
                None => self.get_or_create_stub(&base_name, parsed.nets.len()),
            }
        };

        let pin_count = self.netlist.circuit(target).pin_count();
        if pin_count != parsed.nets.len() {
            if self.stubs.contains_key(&target) {
                // Stubs grow with their widest call.
                for position in pin_count..parsed.nets.len() {
                    self.add_stub_pin(target, position);
                }
            } else {
                return Err(SpiceReaderError::Plain(format!(
                    "Pin count mismatch in subcircuit call: '{}' has {} pins, {} nets given",
                    self.netlist.circuit(target).name(), pin_count, parsed.nets.len()
                )));
            }
        }

        let sc = self.netlist.create_subcircuit(circuit, target, name);
        for (position, net_name) in parsed.nets.iter().enumerate() {
            let net = self.get_or_create_net(circuit, net_name);
            self.netlist.circuit_mut(circuit).connect_subcircuit_pin(sc, position, Some(net));
        }
        Ok(())
    }

    fn add_stub_pin(&mut self, circuit: CircuitId, position: usize) {
        let pin_name = format!("{}", position + 1);
        let pin = self.netlist.add_pin(circuit, pin_name.clone());
        let c = self.netlist.circuit_mut(circuit);
        let net = match c.net_by_name(&pin_name) {
            Some(net) => net,
            None => c.create_net(Some(&pin_name)),
        };
        c.connect_pin(pin, Some(net));
    }

    fn get_or_create_stub(&mut self, name: &str, num_pins: usize) -> CircuitId {
        if let Some(existing) = self.netlist.circuit_by_name(name) {
            return existing;
        }
        let circuit = self.netlist.create_circuit(name);
        for position in 0..num_pins {
            self.add_stub_pin(circuit, position);
        }
        self.stubs.insert(circuit, name.to_string());
        circuit
    }

    // == Global nets == //

    /// Connect global nets across the hierarchy: every circuit using a global
    /// net (directly or through a child) gets a pin for it, and instances are
    /// wired to the parent's net of the same name. The anonymous top circuit
    /// gets the nets but no pins.
    fn wire_global_nets(&mut self) -> Result<(), SpiceReaderError> {
        if self.globals.is_empty() {
            return Ok(());
        }

        let bottom_up = self.netlist.each_circuit_bottom_up()?;
        // Global pins appended per circuit, in declaration order.
        let mut global_pins: HashMap<CircuitId, Vec<(usize, String)>> = HashMap::new();
        let mut uses: HashMap<CircuitId, HashSet<String>> = HashMap::new();

        for circuit in bottom_up {
            let mut used: HashSet<String> = self.globals.iter()
                .filter(|g| self.netlist.circuit(circuit).net_by_name(g).is_some())
                .cloned()
                .collect();
            for sc in self.netlist.circuit(circuit).each_subcircuit() {
                if let Some(child_uses) = uses.get(&sc.circuit_ref()) {
                    used.extend(child_uses.iter().cloned());
                }
            }

            let is_top = Some(circuit) == self.anonymous_top;
            for g in self.globals.clone() {
                if !used.contains(&g) {
                    continue;
                }
                let net = match self.netlist.circuit(circuit).net_by_name(&g) {
                    Some(net) => net,
                    None => self.netlist.circuit_mut(circuit).create_net(Some(&g)),
                };
                if !is_top && self.netlist.circuit(circuit).pin_by_name(&g).is_none() {
                    let pin = self.netlist.add_pin(circuit, g.clone());
                    self.netlist.circuit_mut(circuit).connect_pin(pin, Some(net));
                    global_pins.entry(circuit).or_default().push((pin, g.clone()));
                }
            }

            // Wire the global pins of the child instances to this circuit's nets.
            let instances = self.netlist.circuit(circuit).each_subcircuit_id().collect_vec();
            for sc in instances {
                let template = self.netlist.circuit(circuit).subcircuit(sc).circuit_ref();
                let pins = global_pins.get(&template).cloned().unwrap_or_default();
                for (pin, g) in pins {
                    if self.netlist.circuit(circuit).subcircuit(sc).net_for_pin(pin).is_none() {
                        let net = self.netlist.circuit(circuit).net_by_name(&g)
                            .expect("Global net must exist in the parent here.");
                        self.netlist.circuit_mut(circuit).connect_subcircuit_pin(sc, pin, Some(net));
                    }
                }
            }

            uses.insert(circuit, used);
        }
        Ok(())
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            return p.to_path_buf();
        }
        match self.frames.last().and_then(|f| f.path.parent()) {
            Some(parent) => parent.join(p),
            None => p.to_path_buf(),
        }
    }
}

/// Get the upper-cased keyword of a dot statement, e.g. `Some("SUBCKT")`.
fn dot_keyword(card: &str) -> Option<String> {
    let card = card.trim_start();
    if !card.starts_with('.') {
        return None;
    }
    let word: String = card[1..].chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    Some(word.to_uppercase())
}

/// The card with its leading keyword removed.
fn card_tail(card: &str) -> String {
    let card = card.trim_start();
    match card.find(char::is_whitespace) {
        Some(pos) => card[pos..].to_string(),
        None => String::new(),
    }
}

/// Read a path which may be quoted with single or double quotes.
fn read_path_token(ex: &mut Extractor) -> Result<String, SpiceReaderError> {
    ex.skip_whitespace();
    match ex.peek_raw() {
        Some(quote @ ('"' | '\'')) => {
            ex.advance();
            let mut s = String::new();
            loop {
                match ex.peek_raw() {
                    None => return Err(SpiceReaderError::Plain("Unterminated path".to_string())),
                    Some(c) if c == quote => {
                        ex.advance();
                        return Ok(s);
                    }
                    Some(c) => {
                        s.push(c);
                        ex.advance();
                    }
                }
            }
        }
        Some(_) => Ok(delegate::parse_component(ex)),
        None => Err(SpiceReaderError::Plain("Path expected".to_string())),
    }
}

/// Build the name of a specialized subcircuit clone, e.g. `SUB1(L=0.15,W=1.5)`.
/// The binding keys are sorted; values are formatted compactly.
fn specialized_circuit_name(base: &str, binding: &Variables) -> String {
    let params = binding.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .join(",");
    format!("{}({})", base, params)
}

/// Check a `.MODEL` type against an element code.
fn model_kind_matches(kind: &str, element: char) -> bool {
    match element {
        'R' => matches!(kind, "R" | "RES"),
        'C' => matches!(kind, "C" | "CAP"),
        'L' => matches!(kind, "L" | "IND"),
        'D' => kind == "D",
        'M' => matches!(kind, "NMOS" | "PMOS"),
        'Q' => matches!(kind, "NPN" | "PNP"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(text: &str) -> Netlist {
        let mut nl = Netlist::new();
        let mut reader = SpiceReader::new();
        reader.read_source(text, Path::new("test.cir"), &mut nl).unwrap();
        nl
    }

    #[test]
    fn test_continuation_and_comments() {
        let nl = read(
            "* a comment\n\
             .SUBCKT TOP 1 2\n\
             R1 1\n\
             * interleaved comment\n\
             \n\
             + 2 7.65K $ an end-of-line comment\n\
             .ENDS\n",
        );
        let top = nl.circuit_by_name("TOP").unwrap();
        assert_eq!(nl.circuit(top).device_count(), 1);
        let d = nl.circuit(top).each_device().next().unwrap();
        assert!((d.parameter_value(0) - 7650.0).abs() < 1e-9);
    }

    #[test]
    fn test_dollar_inside_name_is_no_comment() {
        let nl = read(".SUBCKT S A GND$1\nR1 A GND$1 1K\n.ENDS\n");
        let s = nl.circuit_by_name("S").unwrap();
        assert!(nl.circuit(s).net_by_name("GND$1").is_some());
    }

    #[test]
    fn test_model_type_mismatch() {
        let mut nl = Netlist::new();
        let mut reader = SpiceReader::new();
        let r = reader.read_source(
            ".MODEL RMOD R\nC1 1 2 RMOD 1p\n",
            Path::new("test.cir"), &mut nl);
        assert!(r.is_err());
    }

    #[test]
    fn test_redefinition_is_an_error() {
        let mut nl = Netlist::new();
        let mut reader = SpiceReader::new();
        let r = reader.read_source(
            ".SUBCKT A 1 2\n.ENDS\n.SUBCKT A 1 2\n.ENDS\n",
            Path::new("test.cir"), &mut nl);
        match r {
            Err(SpiceReaderError::Syntax { message, line, .. }) => {
                assert!(message.contains("Redefinition of circuit A"));
                assert_eq!(line, 3);
            }
            other => panic!("Expected a syntax error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_strict_mode_rejects_undefined_subcircuits() {
        let mut nl = Netlist::new();
        let mut reader = SpiceReader::new();
        reader.set_strict(true);
        let r = reader.read_source("X1 A B UNDEFINED\n", Path::new("test.cir"), &mut nl);
        assert!(r.is_err());

        let mut nl = Netlist::new();
        let mut reader = SpiceReader::new();
        reader.read_source("X1 A B UNDEFINED\n", Path::new("test.cir"), &mut nl).unwrap();
        assert!(nl.circuit_by_name("UNDEFINED").is_some());
    }
}
