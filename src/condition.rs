//! Restricted boolean grammar for conditional gates.
//!
//! Condition expressions are parsed by a hand-written recursive-descent
//! parser limited to identifiers, `!`, `&&`, `||`, and parentheses. Anything
//! else (comparisons, calls, member access) is rejected, which marks the
//! conditional "not statically evaluable": the simulator skips it and the
//! element falls back to reactive reconciliation at runtime. Widening this
//! grammar is a deliberate future decision, not an accident.

use std::collections::HashMap;

use crate::error::{MinimactError, Result};

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    Var(String),
    Not(Box<ConditionExpr>),
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Not,
    And,
    Or,
    LParen,
    RParen,
}

fn unsupported(expression: &str, reason: impl Into<String>) -> MinimactError {
    MinimactError::UnsupportedExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' => {
                // Reject `!=` explicitly; it reads like the grammar but isn't.
                if bytes.get(i + 1) == Some(&b'=') {
                    return Err(unsupported(input, "comparison operator '!='"));
                }
                tokens.push(Token::Not);
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(unsupported(input, "single '&'"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(unsupported(input, "single '|'"));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(input[start..i].to_string()));
            }
            other => {
                return Err(unsupported(input, format!("unexpected '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // or_expr := and_expr ('||' and_expr)*
    fn parse_or(&mut self) -> Result<ConditionExpr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = ConditionExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // and_expr := unary ('&&' unary)*
    fn parse_and(&mut self) -> Result<ConditionExpr> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = ConditionExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // unary := '!' unary | primary
    fn parse_unary(&mut self) -> Result<ConditionExpr> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(ConditionExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    // primary := ident | '(' or_expr ')'
    fn parse_primary(&mut self) -> Result<ConditionExpr> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(ConditionExpr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(unsupported(self.source, "unclosed parenthesis")),
                }
            }
            other => Err(unsupported(
                self.source,
                format!("expected identifier, found {:?}", other),
            )),
        }
    }
}

impl ConditionExpr {
    /// Parse an expression; fails on anything outside the grammar.
    pub fn parse(input: &str) -> Result<ConditionExpr> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(unsupported(input, "empty expression"));
        }
        let mut parser = Parser {
            source: input,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(unsupported(input, "trailing tokens"));
        }
        Ok(expr)
    }

    /// Evaluate against a flat variable map. Missing variables are errors;
    /// the caller decides whether that means "decline" or "dynamic only".
    pub fn eval(&self, vars: &HashMap<String, bool>) -> Result<bool> {
        match self {
            ConditionExpr::Var(name) => {
                vars.get(name)
                    .copied()
                    .ok_or_else(|| MinimactError::UnresolvedBinding {
                        binding: name.clone(),
                    })
            }
            ConditionExpr::Not(inner) => Ok(!inner.eval(vars)?),
            ConditionExpr::And(a, b) => Ok(a.eval(vars)? && b.eval(vars)?),
            ConditionExpr::Or(a, b) => Ok(a.eval(vars)? || b.eval(vars)?),
        }
    }

    /// Deduplicated identifiers in source order.
    pub fn identifiers(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut Vec<String>) {
        match self {
            ConditionExpr::Var(name) => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            ConditionExpr::Not(inner) => inner.collect_identifiers(out),
            ConditionExpr::And(a, b) | ConditionExpr::Or(a, b) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_single_identifier() {
        let expr = ConditionExpr::parse("isOpen").unwrap();
        assert!(expr.eval(&vars(&[("isOpen", true)])).unwrap());
        assert!(!expr.eval(&vars(&[("isOpen", false)])).unwrap());
    }

    #[test]
    fn test_precedence_and_over_or() {
        // a || b && c  ==  a || (b && c)
        let expr = ConditionExpr::parse("a || b && c").unwrap();
        assert!(expr.eval(&vars(&[("a", false), ("b", true), ("c", true)])).unwrap());
        assert!(!expr.eval(&vars(&[("a", false), ("b", true), ("c", false)])).unwrap());
        assert!(expr.eval(&vars(&[("a", true), ("b", false), ("c", false)])).unwrap());
    }

    #[test]
    fn test_negation_and_parens() {
        let expr = ConditionExpr::parse("!(a || b)").unwrap();
        assert!(expr.eval(&vars(&[("a", false), ("b", false)])).unwrap());
        assert!(!expr.eval(&vars(&[("a", true), ("b", false)])).unwrap());

        let expr = ConditionExpr::parse("!!a").unwrap();
        assert!(expr.eval(&vars(&[("a", true)])).unwrap());
    }

    #[test]
    fn test_identifiers_deduplicated() {
        let expr = ConditionExpr::parse("menuOpen && (submenuOpen || menuOpen)").unwrap();
        assert_eq!(expr.identifiers(), vec!["menuOpen", "submenuOpen"]);
    }

    #[test]
    fn test_rejects_foreign_syntax() {
        for bad in [
            "count > 0",
            "a == b",
            "a != b",
            "user.isAdmin",
            "items.length",
            "f(x)",
            "a & b",
            "a || ",
            "(a",
            "",
        ] {
            assert!(
                matches!(
                    ConditionExpr::parse(bad),
                    Err(MinimactError::UnsupportedExpression { .. })
                ),
                "expected rejection of {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_missing_variable_is_error() {
        let expr = ConditionExpr::parse("a && b").unwrap();
        assert!(matches!(
            expr.eval(&vars(&[("a", true)])),
            Err(MinimactError::UnresolvedBinding { .. })
        ));
    }
}
