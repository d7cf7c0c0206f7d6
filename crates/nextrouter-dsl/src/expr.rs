//! Value expressions used in header values, paths, query values, JSON set
//! operations and OAuth form rows.
//!
//! Grammar:
//!   expr    := literal | variable | call
//!   literal := '"' (escaped chars) '"'
//!   call    := 'concat' '(' expr (',' expr)* ')'
//!   variable := '$' ident ('.' ident)*
//!
//! Evaluation is pure over the per-request scope; unknown variables
//! resolve to the empty string.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(String),
    Var(Variable),
    Concat(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    ChannelKey,
    ChannelBaseUrl,
    RequestModel,
    RequestModelMapped,
    OAuthAccessToken,
    Unknown,
}

/// Per-request variable bindings. Built by the engine from `Meta`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprScope<'a> {
    pub channel_key: &'a str,
    pub channel_base_url: &'a str,
    pub request_model: &'a str,
    pub request_model_mapped: &'a str,
    pub oauth_access_token: &'a str,
}

impl Expr {
    pub fn literal(value: impl Into<String>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn eval(&self, scope: &ExprScope<'_>) -> String {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Var(var) => var.resolve(scope).to_string(),
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&part.eval(scope));
                }
                out
            }
        }
    }

    /// Whether evaluation depends on per-request state.
    pub fn has_vars(&self) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Var(_) => true,
            Expr::Concat(parts) => parts.iter().any(Expr::has_vars),
        }
    }
}

impl Variable {
    fn parse(name: &str) -> Self {
        match name {
            "channel.key" => Variable::ChannelKey,
            "channel.base_url" => Variable::ChannelBaseUrl,
            "request.model" => Variable::RequestModel,
            "request.model_mapped" => Variable::RequestModelMapped,
            "oauth.access_token" => Variable::OAuthAccessToken,
            _ => Variable::Unknown,
        }
    }

    fn resolve<'a>(&self, scope: &ExprScope<'a>) -> &'a str {
        match self {
            Variable::ChannelKey => scope.channel_key,
            Variable::ChannelBaseUrl => scope.channel_base_url,
            Variable::RequestModel => scope.request_model,
            Variable::RequestModelMapped => scope.request_model_mapped,
            Variable::OAuthAccessToken => scope.oauth_access_token,
            Variable::Unknown => "",
        }
    }
}

pub fn parse(input: &str) -> Result<Expr, String> {
    let mut parser = ExprParser {
        chars: input.char_indices().peekable(),
        input,
    };
    parser.skip_ws();
    let expr = parser.parse_expr()?;
    parser.skip_ws();
    if let Some((pos, ch)) = parser.chars.peek() {
        return Err(format!("unexpected `{ch}` at byte {pos}"));
    }
    Ok(expr)
}

struct ExprParser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
}

impl<'a> ExprParser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, ch)) if ch.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        match self.chars.peek() {
            Some((_, '"')) => self.parse_string(),
            Some((_, '$')) => self.parse_variable(),
            Some((_, ch)) if ch.is_ascii_alphabetic() => self.parse_call(),
            Some((pos, ch)) => Err(format!("unexpected `{ch}` at byte {pos}")),
            None => Err("empty expression".to_string()),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, String> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(Expr::Literal(out)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((pos, other)) => {
                        return Err(format!("invalid escape `\\{other}` at byte {pos}"));
                    }
                    None => return Err("unterminated escape".to_string()),
                },
                Some((_, ch)) => out.push(ch),
                None => return Err("unterminated string literal".to_string()),
            }
        }
    }

    fn parse_variable(&mut self) -> Result<Expr, String> {
        self.chars.next();
        let mut name = String::new();
        while let Some((_, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '.' {
                name.push(*ch);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err("`$` without a variable name".to_string());
        }
        Ok(Expr::Var(Variable::parse(&name)))
    }

    fn parse_call(&mut self) -> Result<Expr, String> {
        let start = match self.chars.peek() {
            Some((pos, _)) => *pos,
            None => 0,
        };
        let mut name = String::new();
        while let Some((_, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || *ch == '_' {
                name.push(*ch);
                self.chars.next();
            } else {
                break;
            }
        }
        if name != "concat" {
            return Err(format!(
                "unknown function `{name}` at byte {start} in `{}`",
                self.input
            ));
        }
        self.skip_ws();
        match self.chars.next() {
            Some((_, '(')) => {}
            _ => return Err("expected `(` after concat".to_string()),
        }
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            if matches!(self.chars.peek(), Some((_, ')'))) {
                self.chars.next();
                break;
            }
            args.push(self.parse_expr()?);
            self.skip_ws();
            match self.chars.peek() {
                Some((_, ',')) => {
                    self.chars.next();
                }
                Some((_, ')')) => {}
                Some((pos, ch)) => return Err(format!("unexpected `{ch}` at byte {pos}")),
                None => return Err("unterminated concat call".to_string()),
            }
        }
        if args.is_empty() {
            return Err("concat requires at least one argument".to_string());
        }
        Ok(Expr::Concat(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>() -> ExprScope<'a> {
        ExprScope {
            channel_key: "sk-key",
            channel_base_url: "https://api.example.com",
            request_model: "gpt-test",
            request_model_mapped: "mapped-model",
            oauth_access_token: "tok-1",
        }
    }

    #[test]
    fn literal_with_escapes() {
        let expr = parse(r#""a\nb\t\"c\\""#).unwrap();
        assert_eq!(expr.eval(&scope()), "a\nb\t\"c\\");
        assert!(!expr.has_vars());
    }

    #[test]
    fn variables_resolve() {
        assert_eq!(parse("$channel.key").unwrap().eval(&scope()), "sk-key");
        assert_eq!(
            parse("$request.model_mapped").unwrap().eval(&scope()),
            "mapped-model"
        );
        assert_eq!(
            parse("$oauth.access_token").unwrap().eval(&scope()),
            "tok-1"
        );
    }

    #[test]
    fn unknown_variable_is_empty() {
        let expr = parse("$nope.nothing").unwrap();
        assert_eq!(expr.eval(&scope()), "");
        assert!(expr.has_vars());
    }

    #[test]
    fn concat_mixes_parts() {
        let expr = parse(r#"concat("Bearer ", $channel.key)"#).unwrap();
        assert_eq!(expr.eval(&scope()), "Bearer sk-key");
    }

    #[test]
    fn nested_concat() {
        let expr = parse(r#"concat("/v1beta/models/", $request.model_mapped, ":generateContent")"#)
            .unwrap();
        assert_eq!(
            expr.eval(&scope()),
            "/v1beta/models/mapped-model:generateContent"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("concat(").is_err());
        assert!(parse("upper($channel.key)").is_err());
        assert!(parse(r#""unterminated"#).is_err());
        assert!(parse("$").is_err());
    }
}
