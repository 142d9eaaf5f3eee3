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
//! A small text cursor used by the SPICE reader, the expression evaluator and
//! the textual netlist format. Whitespace is skipped before every token test.

use std::fmt;

/// Error raised when an expected token is missing.
#[derive(Debug, Clone)]
pub struct ExtractorError {
    /// Description of what was expected.
    pub message: String,
    /// The remaining, unparsed input.
    pub rest: String,
}

impl fmt::Display for ExtractorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} here: '...{}'", self.message, self.rest)
    }
}

impl std::error::Error for ExtractorError {}

/// A cursor over a text with token-level read helpers.
#[derive(Debug, Clone)]
pub struct Extractor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Extractor<'a> {
    /// Create a cursor at the start of the input.
    pub fn new(input: &'a str) -> Self {
        Extractor { input, pos: 0 }
    }

    /// Get the unparsed remainder of the input.
    pub fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Save the current position.
    pub fn save(&self) -> usize {
        self.pos
    }

    /// Restore a previously saved position.
    pub fn restore(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Skip over whitespace.
    pub fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    /// Returns true if only whitespace is left.
    pub fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos == self.input.len()
    }

    /// Peek at the next character after skipping whitespace.
    pub fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    /// Peek at the next character without skipping whitespace.
    pub fn peek_raw(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Advance over one character.
    pub fn advance(&mut self) {
        if let Some(c) = self.rest().chars().next() {
            self.pos += c.len_utf8();
        }
    }

    /// Test for a literal. Consumes the literal when it matches.
    pub fn test(&mut self, literal: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    /// Test for a literal ignoring ASCII case. Consumes the literal when it matches.
    pub fn test_without_case(&mut self, literal: &str) -> bool {
        self.skip_whitespace();
        self.test_without_case_raw(literal)
    }

    /// Like `test_without_case` but without skipping whitespace first.
    pub fn test_without_case_raw(&mut self, literal: &str) -> bool {
        let rest = self.rest();
        if rest.len() >= literal.len() && rest[..literal.len()].eq_ignore_ascii_case(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    /// Expect a literal. Fails when it does not match.
    pub fn expect(&mut self, literal: &str) -> Result<(), ExtractorError> {
        if self.test(literal) {
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}'", literal)))
        }
    }

    /// Expect that the input is not yet exhausted.
    pub fn expect_more(&mut self) -> Result<(), ExtractorError> {
        if self.at_end() {
            Err(self.error("Unexpected end of text".to_string()))
        } else {
            Ok(())
        }
    }

    /// Expect that only whitespace is left.
    pub fn expect_end(&mut self) -> Result<(), ExtractorError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("Expected end of text".to_string()))
        }
    }

    /// Create an error pointing at the current position.
    pub fn error(&self, message: String) -> ExtractorError {
        ExtractorError {
            message,
            rest: self.rest().chars().take(32).collect(),
        }
    }

    /// Try to read an unsigned decimal integer.
    pub fn try_read_usize(&mut self) -> Option<usize> {
        self.skip_whitespace();
        let rest = self.rest();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        self.pos += digits.len();
        digits.parse().ok()
    }

    /// Try to read a floating point number. Consumes nothing on failure.
    ///
    /// Accepts an optional sign, decimal digits with an optional fraction and
    /// an optional exponent. The exponent is only consumed when it is followed
    /// by digits, so a SPICE unit suffix like in `1.5e` stays intact.
    pub fn try_read_double(&mut self) -> Option<f64> {
        self.skip_whitespace();
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut i = 0;

        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let int_digits = Self::count_digits(&bytes[i..]);
        i += int_digits;
        let mut frac_digits = 0;
        if i < bytes.len() && bytes[i] == b'.' {
            frac_digits = Self::count_digits(&bytes[i + 1..]);
            if int_digits > 0 || frac_digits > 0 {
                i += 1 + frac_digits;
            }
        }
        if int_digits == 0 && frac_digits == 0 {
            return None;
        }
        if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
            let mut j = i + 1;
            if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                j += 1;
            }
            let exp_digits = Self::count_digits(&bytes[j..]);
            if exp_digits > 0 {
                i = j + exp_digits;
            }
        }

        let value: f64 = rest[..i].parse().ok()?;
        self.pos += i;
        Some(value)
    }

    fn count_digits(bytes: &[u8]) -> usize {
        bytes.iter().take_while(|b| b.is_ascii_digit()).count()
    }

    /// Try to read a word. Words are made of alphanumeric characters,
    /// underscores and the characters in `extra`. Returns `None` when no
    /// word character follows.
    pub fn try_read_word(&mut self, extra: &str) -> Option<String> {
        self.skip_whitespace();
        let word: String = self.rest().chars()
            .take_while(|&c| c.is_alphanumeric() || c == '_' || extra.contains(c))
            .collect();
        if word.is_empty() {
            None
        } else {
            self.pos += word.len();
            Some(word)
        }
    }

    /// Read a word or a single-quoted string. Quoted strings may contain
    /// backslash escapes.
    pub fn read_word_or_quoted(&mut self, extra: &str) -> Result<String, ExtractorError> {
        self.skip_whitespace();
        if self.peek_raw() == Some('\'') {
            self.advance();
            let mut s = String::new();
            loop {
                match self.peek_raw() {
                    None => return Err(self.error("Unterminated quoted string".to_string())),
                    Some('\'') => {
                        self.advance();
                        return Ok(s);
                    }
                    Some('\\') => {
                        self.advance();
                        if let Some(c) = self.peek_raw() {
                            s.push(c);
                            self.advance();
                        }
                    }
                    Some(c) => {
                        s.push(c);
                        self.advance();
                    }
                }
            }
        } else {
            self.try_read_word(extra)
                .ok_or_else(|| self.error("Expected a word or a quoted string".to_string()))
        }
    }
}

/// Quote a name unless it consists of word characters only.
///
/// Word characters are alphanumerics, `_`, `$` and `.`. Names starting with a
/// digit and empty names are quoted as well. Quotes use single quotes with
/// backslash escapes.
pub fn to_word_or_quoted_string(s: &str) -> String {
    let is_word = !s.is_empty()
        && !s.chars().next().unwrap().is_ascii_digit()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if is_word {
        s.to_string()
    } else {
        let mut quoted = String::with_capacity(s.len() + 2);
        quoted.push('\'');
        for c in s.chars() {
            if c == '\'' || c == '\\' {
                quoted.push('\\');
            }
            quoted.push(c);
        }
        quoted.push('\'');
        quoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_and_words() {
        let mut ex = Extractor::new("  circuit TOP (A=B);");
        assert!(ex.test("circuit"));
        assert_eq!(ex.try_read_word("$."), Some("TOP".to_string()));
        assert!(ex.test("("));
        assert_eq!(ex.try_read_word(""), Some("A".to_string()));
        assert!(ex.test("="));
        assert_eq!(ex.try_read_word(""), Some("B".to_string()));
        assert!(ex.test(")"));
        assert!(ex.test(";"));
        assert!(ex.at_end());
    }

    #[test]
    fn test_try_read_double() {
        let mut ex = Extractor::new("1.75u");
        assert_eq!(ex.try_read_double(), Some(1.75));
        assert_eq!(ex.rest(), "u");

        let mut ex = Extractor::new("2e-9 x");
        assert_eq!(ex.try_read_double(), Some(2e-9));

        // The exponent is not consumed without digits.
        let mut ex = Extractor::new("1.5e");
        assert_eq!(ex.try_read_double(), Some(1.5));
        assert_eq!(ex.rest(), "e");

        let mut ex = Extractor::new("abc");
        assert_eq!(ex.try_read_double(), None);
        assert_eq!(ex.rest(), "abc");

        let mut ex = Extractor::new("-.5");
        assert_eq!(ex.try_read_double(), Some(-0.5));
    }

    #[test]
    fn test_quoted_strings() {
        let mut ex = Extractor::new("'A[5]<1>' rest");
        assert_eq!(ex.read_word_or_quoted("").unwrap(), "A[5]<1>");
        assert_eq!(ex.try_read_word(""), Some("rest".to_string()));

        let mut ex = Extractor::new(r"'don\'t'");
        assert_eq!(ex.read_word_or_quoted("").unwrap(), "don't");
    }

    #[test]
    fn test_to_word_or_quoted_string() {
        assert_eq!(to_word_or_quoted_string("VDD"), "VDD");
        assert_eq!(to_word_or_quoted_string(".TOP"), ".TOP");
        assert_eq!(to_word_or_quoted_string("GND$1"), "GND$1");
        assert_eq!(to_word_or_quoted_string("1"), "'1'");
        assert_eq!(to_word_or_quoted_string("A[5]<1>"), "'A[5]<1>'");
        assert_eq!(to_word_or_quoted_string(""), "''");
    }
}
