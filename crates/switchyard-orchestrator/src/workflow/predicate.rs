//! Boolean predicates over the workflow context, used by `runIf`/`skipIf`.
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := primary ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" ) primary )?
//! primary    := "true" | "false" | "null" | number | string | path | "(" expr ")"
//! ```
//!
//! Paths are dotted context lookups; a missing path is `null`. Values are
//! tested for truthiness the way JSON-minded callers expect: `null`, `false`,
//! `0` and `""` are false, everything else is true.

use super::template::resolve_path;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use switchyard_core::{SwitchyardError, SwitchyardResult};

/// Evaluate `source` against `context`.
pub fn evaluate(source: &str, context: &Map<String, Value>) -> SwitchyardResult<bool> {
    run(source, context, false)
}

/// Check that `source` is well formed without a context. Type mismatches
/// that only a real context could reveal are not reported.
pub fn check(source: &str) -> SwitchyardResult<()> {
    run(source, &Map::new(), true).map(|_| ())
}

/// Deepest `(` / `!` nesting the parser accepts.
pub const MAX_NESTING: usize = 64;

fn run(source: &str, context: &Map<String, Value>, syntax_only: bool) -> SwitchyardResult<bool> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(invalid(source, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        context,
        source,
        syntax_only,
        depth: 0,
    };
    let value = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return Err(invalid(source, "unexpected trailing input"));
    }
    Ok(truthy(&value))
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn invalid(source: &str, reason: &str) -> SwitchyardError {
    const SHOWN: usize = 64;
    let shown = match source.char_indices().nth(SHOWN) {
        Some((cut, _)) => format!("{}...", &source[..cut]),
        None => source.to_string(),
    };
    SwitchyardError::ValidationFailure(format!("predicate '{shown}': {reason}"))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 9] = ["==", "!=", "<=", ">=", "&&", "||", "<", ">", "!"];

fn tokenize(source: &str) -> SwitchyardResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(invalid(source, "unterminated string")),
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            text.push(*next);
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == c => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(text));
            continue;
        }
        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| invalid(source, &format!("bad number '{text}'")))?;
            tokens.push(Token::Number(n));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(Token::Op(*op));
                i += op.len();
            }
            None => return Err(invalid(source, &format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    context: &'a Map<String, Value>,
    source: &'a str,
    syntax_only: bool,
    depth: usize,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn descend(&mut self) -> SwitchyardResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(invalid(self.source, "expression nested too deeply"));
        }
        Ok(())
    }

    fn or(&mut self) -> SwitchyardResult<Value> {
        let mut left = self.and()?;
        while self.peek_op() == Some("||") {
            self.pos += 1;
            let right = self.and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn and(&mut self) -> SwitchyardResult<Value> {
        let mut left = self.unary()?;
        while self.peek_op() == Some("&&") {
            self.pos += 1;
            let right = self.unary()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> SwitchyardResult<Value> {
        if self.peek_op() == Some("!") {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Value::Bool(!truthy(&inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> SwitchyardResult<Value> {
        let left = self.primary()?;
        let Some(op) = self.peek_op() else {
            return Ok(left);
        };
        if !matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">=") {
            return Ok(left);
        }
        self.pos += 1;
        let right = self.primary()?;

        let result = match op {
            "==" => loose_eq(&left, &right),
            "!=" => !loose_eq(&left, &right),
            _ => {
                let Some(ord) = order(&left, &right) else {
                    if self.syntax_only {
                        return Ok(Value::Bool(false));
                    }
                    return Err(invalid(
                        self.source,
                        &format!("cannot compare {left} {op} {right}"),
                    ));
                };
                match op {
                    "<" => ord == Ordering::Less,
                    "<=" => ord != Ordering::Greater,
                    ">" => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }
            }
        };
        Ok(Value::Bool(result))
    }

    fn primary(&mut self) -> SwitchyardResult<Value> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| invalid(self.source, "unexpected end of expression"))?;
        self.pos += 1;

        match token {
            Token::Number(n) => Ok(serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                path => resolve_path(self.context, path)
                    .cloned()
                    .unwrap_or(Value::Null),
            }),
            Token::LParen => {
                self.descend()?;
                let inner = self.or()?;
                self.depth -= 1;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(invalid(self.source, "missing ')'")),
                }
            }
            Token::RParen => Err(invalid(self.source, "unexpected ')'")),
            Token::Op(op) => Err(invalid(self.source, &format!("unexpected '{op}'"))),
        }
    }
}

/// Equality with numbers compared by value (`1 == 1.0`).
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Map<String, Value> {
        json!({
            "mode": "fast",
            "count": 3,
            "flags": {"dry_run": false, "tags": ["a"]},
            "empty": ""
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_literals() {
        assert!(evaluate("true", &ctx()).unwrap());
        assert!(!evaluate("false", &ctx()).unwrap());
        assert!(!evaluate("null", &ctx()).unwrap());
        assert!(evaluate("1", &ctx()).unwrap());
        assert!(!evaluate("0", &ctx()).unwrap());
    }

    #[test]
    fn test_paths_and_truthiness() {
        assert!(evaluate("mode", &ctx()).unwrap());
        assert!(!evaluate("empty", &ctx()).unwrap());
        assert!(!evaluate("missing.path", &ctx()).unwrap());
        assert!(!evaluate("flags.dry_run", &ctx()).unwrap());
        assert!(evaluate("flags.tags", &ctx()).unwrap());
    }

    #[test]
    fn test_comparisons() {
        assert!(evaluate("mode == 'fast'", &ctx()).unwrap());
        assert!(evaluate("mode != \"slow\"", &ctx()).unwrap());
        assert!(evaluate("count >= 3", &ctx()).unwrap());
        assert!(evaluate("count > 2.5", &ctx()).unwrap());
        assert!(!evaluate("count < 3", &ctx()).unwrap());
        assert!(evaluate("count == 3.0", &ctx()).unwrap());
        assert!(evaluate("missing == null", &ctx()).unwrap());
        assert!(evaluate("'abc' < 'abd'", &ctx()).unwrap());
    }

    #[test]
    fn test_boolean_operators_and_precedence() {
        assert!(evaluate("!flags.dry_run && count > 1", &ctx()).unwrap());
        assert!(evaluate("false || mode == 'fast'", &ctx()).unwrap());
        assert!(evaluate("true || false && false", &ctx()).unwrap());
        assert!(!evaluate("(true || false) && false", &ctx()).unwrap());
        assert!(evaluate("!!mode", &ctx()).unwrap());
    }

    #[test]
    fn test_malformed_expressions_fail() {
        for bad in [
            "", "   ", "(true", "true)", "count >", "&& true", "mode = 'x'", "'open", "a b",
        ] {
            let err = evaluate(bad, &ctx()).unwrap_err();
            assert!(
                matches!(err, SwitchyardError::ValidationFailure(_)),
                "expected validation failure for {bad:?}"
            );
        }
    }

    #[test]
    fn test_type_mismatch_in_ordering_fails() {
        assert!(evaluate("mode > 3", &ctx()).is_err());
        assert!(evaluate("missing < 1", &ctx()).is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected_not_overflowed() {
        for source in [
            "(".repeat(200_000),
            format!("{}true{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1)),
            format!("{}true", "!".repeat(200_000)),
        ] {
            let err = check(&source).unwrap_err();
            assert!(matches!(err, SwitchyardError::ValidationFailure(_)));
            assert!(err.to_string().contains("nested too deeply"));
            assert!(err.to_string().len() < 200);
        }
    }

    #[test]
    fn test_nesting_at_the_limit_is_accepted() {
        let parens = format!("{}true{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(evaluate(&parens, &ctx()).unwrap());
        let nots = format!("{}true", "!".repeat(MAX_NESTING));
        assert!(evaluate(&nots, &ctx()).unwrap());
    }

    #[test]
    fn test_check_accepts_paths_without_context() {
        assert!(check("result.ok == true").is_ok());
        assert!(check("a_result.count > 2").is_ok());
        assert!(check("result.ok ==").is_err());
    }
}
