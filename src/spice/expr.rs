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
//! Evaluator for SPICE parameter expressions.
//!
//! The expression syntax follows the ngspice parameter syntax: a ternary
//! operator, logical and comparison operators, arithmetic with `**`/`^` power,
//! numbers with SI suffixes, variables and a set of built-in functions.
//! Expressions may be bracketed by `'...'`, `"..."` or `{...}`.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::netlist::format::format_g;
use super::extractor::Extractor;

/// Variable scope for expression evaluation. Keys are upper case.
pub type Variables = BTreeMap<String, Value>;

/// The result of evaluating an expression.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value. Produced by failed conversions and unknown functions.
    #[default]
    Nil,
    /// A boolean, produced by comparisons and logic operators.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string, produced by words which are not bound to a variable.
    Text(String),
}

impl Value {
    /// Returns true if the value can be interpreted as a number.
    pub fn can_convert_to_number(&self) -> bool {
        match self {
            Value::Number(_) | Value::Bool(_) => true,
            Value::Text(s) => s.parse::<f64>().is_ok(),
            Value::Nil => false,
        }
    }

    /// Interpret the value as a number. Returns 0.0 when not convertible.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(v) => *v,
            Value::Bool(b) => {
                if *b { 1.0 } else { 0.0 }
            }
            Value::Text(s) => s.parse().unwrap_or(0.0),
            Value::Nil => 0.0,
        }
    }

    /// Interpret the value as a boolean. Numbers are true when non-zero,
    /// strings are always true, nil is false.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Nil => false,
            Value::Number(v) => *v != 0.0,
            Value::Text(_) => true,
        }
    }

    pub(crate) fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            _ => false,
        }
    }

    pub(crate) fn value_lt(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a < b,
            (Value::Text(a), Value::Text(b)) => a < b,
            (Value::Bool(a), Value::Bool(b)) => !a & b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(v) => write!(f, "{}", format_g(*v)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Error raised on malformed expressions.
#[derive(Debug, Clone, Error)]
#[error("{message} here: '...{rest}'")]
pub struct ExprError {
    /// Description of the failure.
    pub message: String,
    /// The remaining, unparsed input.
    pub rest: String,
}

/// Evaluator for SPICE parameter expressions.
///
/// The evaluator resolves variables against two read-only scopes which are
/// searched inner-first. A default scale can be given which applies to
/// numbers without a recognized SI suffix.
pub struct SpiceExpr<'v> {
    variables1: Option<&'v Variables>,
    variables2: Option<&'v Variables>,
    def_scale: f64,
}

impl<'v> SpiceExpr<'v> {
    /// Create an evaluator with a single variable scope.
    pub fn new(variables: &'v Variables) -> Self {
        SpiceExpr {
            variables1: Some(variables),
            variables2: None,
            def_scale: 1.0,
        }
    }

    /// Create an evaluator with an inner and an outer variable scope.
    pub fn with_scopes(inner: &'v Variables, outer: &'v Variables) -> Self {
        SpiceExpr {
            variables1: Some(inner),
            variables2: Some(outer),
            def_scale: 1.0,
        }
    }

    /// Create an evaluator without variables.
    pub fn without_variables() -> Self {
        SpiceExpr {
            variables1: None,
            variables2: None,
            def_scale: 1.0,
        }
    }

    /// Set the scale applied to numbers without a recognized SI suffix.
    pub fn with_def_scale(mut self, def_scale: f64) -> Self {
        self.def_scale = def_scale;
        self
    }

    /// Evaluate an expression. Fails with a pointer into the remaining input.
    pub fn read(&self, text: &str) -> Result<Value, ExprError> {
        let mut ex = Extractor::new(text);
        self.read_from(&mut ex)
    }

    /// Evaluate an expression from a cursor.
    pub fn read_from(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        let end_quote = Self::start_quote(ex);
        let value = self.read_expr(ex)?;
        if let Some(end_quote) = end_quote {
            // A missing closing quote is tolerated here.
            ex.test(end_quote);
        }
        Ok(value)
    }

    /// Try to evaluate an expression. The cursor is restored on failure and
    /// `None` is returned; this method never fails hard.
    pub fn try_read(&self, text: &str) -> Option<Value> {
        let mut ex = Extractor::new(text);
        self.try_read_from(&mut ex)
    }

    /// Try to evaluate an expression from a cursor. The cursor is restored
    /// on failure.
    pub fn try_read_from(&self, ex: &mut Extractor) -> Option<Value> {
        let saved = ex.save();
        let end_quote = Self::start_quote(ex);
        match self.read_expr(ex) {
            Ok(value) => {
                if let Some(end_quote) = end_quote {
                    if !ex.test(end_quote) {
                        ex.restore(saved);
                        return None;
                    }
                }
                Some(value)
            }
            Err(_) => {
                ex.restore(saved);
                None
            }
        }
    }

    fn start_quote(ex: &mut Extractor) -> Option<&'static str> {
        if ex.test("'") {
            Some("'")
        } else if ex.test("\"") {
            Some("\"")
        } else if ex.test("{") {
            Some("}")
        } else {
            None
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables1
            .and_then(|v| v.get(name))
            .or_else(|| self.variables2.and_then(|v| v.get(name)))
    }

    fn read_expr(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        self.read_ternary_op(ex)
    }

    fn read_ternary_op(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        let v = self.read_logical_op(ex)?;
        if ex.test("?") {
            let v1 = self.read_logical_op(ex)?;
            if !ex.test(":") {
                return Err(ExprError {
                    message: "Expected ':' of ternary operator".to_string(),
                    rest: ex.rest().chars().take(32).collect(),
                });
            }
            let v2 = self.read_logical_op(ex)?;
            return Ok(if v.to_bool() { v1 } else { v2 });
        }
        Ok(v)
    }

    fn read_logical_op(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        let mut v = self.read_compare_expr(ex)?;
        loop {
            if ex.test("&&") {
                let vv = self.read_compare_expr(ex)?;
                v = Value::Bool(v.to_bool() && vv.to_bool());
            } else if ex.test("||") {
                let vv = self.read_compare_expr(ex)?;
                v = Value::Bool(v.to_bool() || vv.to_bool());
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn read_compare_expr(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        let mut v = self.read_add_expr(ex)?;
        loop {
            if ex.test("==") {
                let vv = self.read_add_expr(ex)?;
                v = Value::Bool(v.value_eq(&vv));
            } else if ex.test("!=") {
                let vv = self.read_add_expr(ex)?;
                v = Value::Bool(!v.value_eq(&vv));
            } else if ex.test("<=") {
                let vv = self.read_add_expr(ex)?;
                v = Value::Bool(v.value_lt(&vv) || v.value_eq(&vv));
            } else if ex.test("<") {
                let vv = self.read_add_expr(ex)?;
                v = Value::Bool(v.value_lt(&vv));
            } else if ex.test(">=") {
                let vv = self.read_add_expr(ex)?;
                v = Value::Bool(vv.value_lt(&v) || v.value_eq(&vv));
            } else if ex.test(">") {
                let vv = self.read_add_expr(ex)?;
                v = Value::Bool(vv.value_lt(&v));
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn read_add_expr(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        let mut v = self.read_mul_expr(ex)?;
        loop {
            if ex.test("+") {
                let vv = self.read_mul_expr(ex)?;
                v = Self::numeric_op(&v, &vv, |a, b| a + b);
            } else if ex.test("-") {
                let vv = self.read_mul_expr(ex)?;
                v = Self::numeric_op(&v, &vv, |a, b| a - b);
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn read_mul_expr(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        let mut v = self.read_pwr_expr(ex)?;
        loop {
            if ex.test("*") {
                let vv = self.read_pwr_expr(ex)?;
                v = Self::numeric_op(&v, &vv, |a, b| a * b);
            } else if ex.test("/") {
                let vv = self.read_pwr_expr(ex)?;
                v = Self::numeric_op(&v, &vv, |a, b| a / b);
            } else if ex.test("%") {
                let vv = self.read_pwr_expr(ex)?;
                v = Self::numeric_op(&v, &vv, |a, b| ((a as i64) % (b as i64)) as f64);
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn read_pwr_expr(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        let mut v = self.read_atomic_value(ex)?;
        loop {
            if ex.test("**") || ex.test("^") {
                let vv = self.read_atomic_value(ex)?;
                v = Self::numeric_op(&v, &vv, |a, b| a.powf(b));
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn numeric_op(a: &Value, b: &Value, op: impl Fn(f64, f64) -> f64) -> Value {
        if a.can_convert_to_number() && b.can_convert_to_number() {
            Value::Number(op(a.to_number(), b.to_number()))
        } else {
            Value::Nil
        }
    }

    fn read_atomic_value(&self, ex: &mut Extractor) -> Result<Value, ExprError> {
        if ex.test("-") {
            let v = self.read_atomic_value(ex)?;
            return Ok(if v.can_convert_to_number() {
                Value::Number(-v.to_number())
            } else {
                Value::Nil
            });
        }

        if ex.test("!") {
            let v = self.read_atomic_value(ex)?;
            return Ok(Value::Bool(!v.to_bool()));
        }

        if ex.test("(") {
            let v = self.read_expr(ex)?;
            if !ex.test(")") {
                return Err(ExprError {
                    message: "Expected ')'".to_string(),
                    rest: ex.rest().chars().take(32).collect(),
                });
            }
            return Ok(v);
        }

        if let Some(number) = ex.try_read_double() {
            return Ok(Value::Number(number * self.read_suffix(ex)));
        }

        if let Some(word) = ex.try_read_word("") {
            let word = word.to_uppercase();

            if ex.test("(") {
                // A function call.
                let mut params = Vec::new();
                if !ex.test(")") {
                    loop {
                        params.push(self.read_expr(ex)?);
                        if !ex.test(",") {
                            break;
                        }
                    }
                    if !ex.test(")") {
                        return Err(ExprError {
                            message: "Expected ')' of function call".to_string(),
                            rest: ex.rest().chars().take(32).collect(),
                        });
                    }
                }
                return Ok(Self::eval_func(&word, &params));
            }

            return Ok(match self.lookup(&word) {
                Some(value) => value.clone(),
                // Keep unbound words as string values.
                None => Value::Text(word),
            });
        }

        Err(ExprError {
            message: "Expected a number or a variable name".to_string(),
            rest: ex.rest().chars().take(32).collect(),
        })
    }

    /// Read the SI suffix after a number and return the multiplier.
    /// `M` means milli, `MEG` means mega. Trailing letters after a recognized
    /// suffix are consumed as a unit tag and ignored.
    fn read_suffix(&self, ex: &mut Extractor) -> f64 {
        let mut f = self.def_scale;
        match ex.peek_raw() {
            Some('t') | Some('T') => f = 1e12,
            Some('g') | Some('G') => f = 1e9,
            Some('k') | Some('K') => f = 1e3,
            Some('m') | Some('M') => {
                f = 1e-3;
                if ex.test_without_case_raw("meg") {
                    f = 1e6;
                }
            }
            Some('u') | Some('U') => f = 1e-6,
            Some('n') | Some('N') => f = 1e-9,
            Some('p') | Some('P') => f = 1e-12,
            Some('f') | Some('F') => f = 1e-15,
            Some('a') | Some('A') => f = 1e-18,
            _ => {}
        }
        while ex.peek_raw().map_or(false, |c| c.is_ascii_alphabetic()) {
            ex.advance();
        }
        f
    }

    fn eval_func(name: &str, params: &[Value]) -> Value {
        let unary: Option<fn(f64) -> f64> = match name {
            "SQRT" => Some(f64::sqrt),
            "SIN" => Some(f64::sin),
            "COS" => Some(f64::cos),
            "TAN" => Some(f64::tan),
            "SINH" => Some(f64::sinh),
            "COSH" => Some(f64::cosh),
            "TANH" => Some(f64::tanh),
            "ASIN" => Some(f64::asin),
            "ACOS" => Some(f64::acos),
            "ATAN" | "ARCTAN" => Some(f64::atan),
            "ASINH" => Some(f64::asinh),
            "ACOSH" => Some(f64::acosh),
            "ATANH" => Some(f64::atanh),
            "EXP" => Some(f64::exp),
            "LN" => Some(f64::ln),
            "LOG" => Some(f64::log10),
            "ABS" => Some(f64::abs),
            // Round half to even so that results do not depend on the
            // process rounding mode.
            "NINT" => Some(f64::round_ties_even),
            "FLOOR" => Some(f64::floor),
            "CEIL" => Some(f64::ceil),
            "SGN" => Some(|v: f64| if v == 0.0 { 0.0 } else { v.signum() }),
            "INT" => Some(f64::trunc),
            _ => None,
        };

        if let Some(f) = unary {
            return match params.first() {
                Some(v) if v.can_convert_to_number() => Value::Number(f(v.to_number())),
                _ => Value::Nil,
            };
        }

        match name {
            "PWR" | "POW" => match params {
                [x, y, ..] if x.can_convert_to_number() && y.can_convert_to_number() => {
                    Value::Number(x.to_number().powf(y.to_number()))
                }
                _ => Value::Nil,
            },
            "TERNERY_FCN" => match params {
                [cond, a, b, ..] => {
                    if cond.to_bool() { a.clone() } else { b.clone() }
                }
                _ => Value::Nil,
            },
            "MIN" => params.iter().fold(None, |acc: Option<&Value>, v| match acc {
                Some(best) if !v.value_lt(best) => Some(best),
                _ => Some(v),
            }).cloned().unwrap_or(Value::Nil),
            "MAX" => params.iter().fold(None, |acc: Option<&Value>, v| match acc {
                Some(best) if !best.value_lt(v) => Some(best),
                _ => Some(v),
            }).cloned().unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Variables {
        let mut vars = Variables::new();
        vars.insert("A".to_string(), Value::Number(17.5));
        vars.insert("B".to_string(), Value::Number(42.0));
        vars.insert("S".to_string(), Value::Text("string".to_string()));
        vars
    }

    fn eval(expr: &str) -> String {
        let vars = vars();
        SpiceExpr::new(&vars).read(expr).unwrap().to_string()
    }

    #[test]
    fn test_numbers_and_variables() {
        assert_eq!(eval("1.75"), "1.75");
        assert_eq!(eval("-1.75"), "-1.75");
        assert_eq!(eval("-a*0.1"), "-1.75");
        assert_eq!(eval("-A*0.1"), "-1.75");
        assert_eq!(eval("b/6"), "7");
        assert_eq!(eval("s"), "string");
        assert_eq!(eval("!0"), "true");
        assert_eq!(eval("!1"), "false");
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("4*2+1"), "9");
        assert_eq!(eval("4*2-1"), "7");
        assert_eq!(eval("4/2-1"), "1");
        assert_eq!(eval("4%2-1"), "-1");
        assert_eq!(eval("5%2-1"), "0");
        assert_eq!(eval("2**2*2+1"), "9");
        assert_eq!(eval("2**2*(2+1)"), "12");
        assert_eq!(eval("pow(2,2)*(2+1)"), "12");
        assert_eq!(eval("PWR(2,2)*(2+1)"), "12");
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("3==2+1"), "true");
        assert_eq!(eval("4==2+1"), "false");
        assert_eq!(eval("3!=2+1"), "false");
        assert_eq!(eval("2<2+1"), "true");
        assert_eq!(eval("3<2+1"), "false");
        assert_eq!(eval("2<=2+1"), "true");
        assert_eq!(eval("3<=2+1"), "true");
        assert_eq!(eval("4<=2+1"), "false");
        assert_eq!(eval("2>2+1"), "false");
        assert_eq!(eval("4>2+1"), "true");
        assert_eq!(eval("3>=2+1"), "true");
        assert_eq!(eval("1==2||2==2"), "true");
        assert_eq!(eval("1==2&&2==2"), "false");
        assert_eq!(eval("1==1&&2==2"), "true");
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval("1==2?2:3"), "3");
        assert_eq!(eval("1==1?2:3"), "2");
        assert_eq!(eval("ternery_fcn(1==2,2,3)"), "3");
        assert_eq!(eval("ternery_fcn(1==1,2,3)"), "2");
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("sin(0)"), "0");
        assert_eq!(eval("cos(0)"), "1");
        assert_eq!(eval("tan(atan(1.0))"), "1");
        assert_eq!(eval("sin(asin(0.5))"), "0.5");
        assert_eq!(eval("ln(exp(0.5))"), "0.5");
        assert_eq!(eval("exp(0.0)"), "1");
        assert_eq!(eval("log(10**0.5)"), "0.5");
        assert_eq!(eval("int(-0.5)"), "0");
        assert_eq!(eval("int(-1.5)"), "-1");
        assert_eq!(eval("int(1.5)"), "1");
        assert_eq!(eval("floor(-0.5)"), "-1");
        assert_eq!(eval("floor(1.5)"), "1");
        assert_eq!(eval("ceil(-1.5)"), "-1");
        assert_eq!(eval("ceil(0.5)"), "1");
        assert_eq!(eval("sgn(-3)"), "-1");
        assert_eq!(eval("abs(-3)"), "3");
        assert_eq!(eval("min(4,1,3)"), "1");
        assert_eq!(eval("max(1,4,3)"), "4");
        assert_eq!(eval("max(4)"), "4");
        assert_eq!(eval("max(a,b)"), "42");
    }

    #[test]
    fn test_nint_rounds_half_to_even() {
        assert_eq!(eval("nint(-0.5)"), "-0");
        assert_eq!(eval("nint(-1.5)"), "-2");
        assert_eq!(eval("nint(0.5)"), "0");
        assert_eq!(eval("nint(1.5)"), "2");
    }

    #[test]
    fn test_si_suffixes() {
        assert_eq!(eval("1.75k"), "1750");
        assert_eq!(eval("2meg"), "2000000");
        assert_eq!(eval("1m"), "0.001");
        // Trailing letters after a suffix are a unit tag and are ignored.
        assert_eq!(eval("1.5um"), "1.5e-6");
        assert_eq!(eval("2pF"), "2e-12");
        assert_eq!(eval("3f"), "3e-15");
        assert_eq!(eval("4a"), "4e-18");
        assert_eq!(eval("5t"), "5000000000000");
        assert_eq!(eval("6g"), "6000000000");
    }

    #[test]
    fn test_def_scale() {
        let vars = vars();
        let parser = SpiceExpr::new(&vars).with_def_scale(1e-3);
        assert_eq!(parser.read("1.75").unwrap().to_string(), "0.00175");
        assert_eq!(parser.read("-1.75u").unwrap().to_string(), "-1.75e-6");
        assert_eq!(parser.read("1.75k").unwrap().to_string(), "1750");
        assert_eq!(parser.read("2*A").unwrap().to_string(), "0.035");
    }

    #[test]
    fn test_quoted_forms() {
        let vars = vars();
        let parser = SpiceExpr::new(&vars);
        assert_eq!(parser.try_read("1+2*(2+1)-1").unwrap().to_string(), "6");
        assert_eq!(parser.try_read("{1+2*(2+1)-1}").unwrap().to_string(), "6");
        assert_eq!(parser.try_read("'1+2*(2+1)-1'").unwrap().to_string(), "6");
        assert_eq!(parser.try_read("\"1+2*(2+1)-1\"").unwrap().to_string(), "6");
        // Mismatched brackets must not read as a value.
        assert!(parser.try_read("{1+2*(2+1)-1)").is_none());
        assert!(parser.try_read("'1+2*(2+1)-1)").is_none());
        assert!(parser.try_read("\"1+2*(2+1)-1)").is_none());
        assert!(parser.try_read("\"1+2*(2+1)-1'").is_none());
        assert!(parser.try_read("a syntax error +*").is_none());
    }

    #[test]
    fn test_read_error_points_into_input() {
        let parser = SpiceExpr::without_variables();
        let err = parser.read("1+*2").unwrap_err();
        assert!(err.to_string().contains("*2"));
    }
}
