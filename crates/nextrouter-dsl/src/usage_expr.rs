//! Restricted arithmetic over JSON paths, used by `metrics` custom-mode
//! token expressions: `term (('+'|'-') term)*` where a term is a JSON path
//! or a numeric literal. No parentheses, no multiplicative operators.

use serde_json::Value;

use crate::path::JsonPath;

#[derive(Debug, Clone, PartialEq)]
pub struct UsageExpr {
    first: Term,
    rest: Vec<(Sign, Term)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Path(JsonPath),
    Number(f64),
}

impl UsageExpr {
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut tokens = tokenize(input)?;
        tokens.reverse();
        let first = parse_term(tokens.pop().ok_or("empty usage expression")?)?;
        let mut rest = Vec::new();
        while let Some(tok) = tokens.pop() {
            let sign = match tok.as_str() {
                "+" => Sign::Add,
                "-" => Sign::Sub,
                other => return Err(format!("expected `+` or `-`, found `{other}`")),
            };
            let term = parse_term(tokens.pop().ok_or("dangling operator")?)?;
            rest.push((sign, term));
        }
        Ok(Self { first, rest })
    }

    /// Evaluate over an event payload; absent paths count as zero.
    pub fn eval(&self, doc: &Value) -> f64 {
        let mut acc = self.first.eval(doc);
        for (sign, term) in &self.rest {
            match sign {
                Sign::Add => acc += term.eval(doc),
                Sign::Sub => acc -= term.eval(doc),
            }
        }
        acc
    }

    pub fn eval_u64(&self, doc: &Value) -> u64 {
        self.eval(doc).max(0.0) as u64
    }
}

impl Term {
    fn eval(&self, doc: &Value) -> f64 {
        match self {
            Term::Number(n) => *n,
            Term::Path(path) => match path.get_one(doc) {
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(Value::String(s)) => s.parse().unwrap_or(0.0),
                _ => 0.0,
            },
        }
    }
}

fn parse_term(token: String) -> Result<Term, String> {
    if token
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_digit() || ch == '.')
    {
        return token
            .parse::<f64>()
            .map(Term::Number)
            .map_err(|_| format!("invalid number `{token}`"));
    }
    JsonPath::parse(&token).map(Term::Path)
}

fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in input.chars() {
        match ch {
            '+' | '-' => {
                if current.trim().is_empty() {
                    return Err(format!("operator `{ch}` without left operand"));
                }
                tokens.push(current.trim().to_string());
                current.clear();
                tokens.push(ch.to_string());
            }
            '*' | '/' | '(' | ')' => {
                if ch == '*' && current.ends_with('[') {
                    // `[*]` star index, not multiplication.
                    current.push(ch);
                } else {
                    return Err(format!("operator `{ch}` is not supported"));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        tokens.push(current.trim().to_string());
    }
    if tokens.is_empty() {
        return Err("empty usage expression".to_string());
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sums_paths_and_numbers() {
        let expr = UsageExpr::parse(
            "$.usageMetadata.candidatesTokenCount + $.usageMetadata.thoughtsTokenCount",
        )
        .unwrap();
        let doc = json!({"usageMetadata": {"candidatesTokenCount": 5, "thoughtsTokenCount": 2}});
        assert_eq!(expr.eval_u64(&doc), 7);
    }

    #[test]
    fn missing_paths_are_zero() {
        let expr = UsageExpr::parse("$.a + $.b - 1").unwrap();
        assert_eq!(expr.eval(&json!({"a": 3})), 2.0);
    }

    #[test]
    fn rejects_multiplicative_and_parens() {
        assert!(UsageExpr::parse("$.a * 2").is_err());
        assert!(UsageExpr::parse("($.a + 1)").is_err());
        assert!(UsageExpr::parse("+ $.a").is_err());
        assert!(UsageExpr::parse("$.a +").is_err());
    }

    #[test]
    fn float_literals() {
        let expr = UsageExpr::parse("1.5 + 2.5").unwrap();
        assert_eq!(expr.eval(&json!({})), 4.0);
    }
}
