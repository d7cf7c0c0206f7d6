//! nginx-style provider configuration parser.
//!
//! Every statement ends with `;`; blocks are `keyword "name" { … }`.
//! `include "path"` statements are expanded at the token level before
//! parsing (depth capped, cycles rejected). The parser doubles as the
//! validator: it is the only component permitted to reject configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use nextrouter_protocol::api::Api;
use serde_json::Value;

use crate::error::ConfigError;
use crate::expr::{self, Expr};
use crate::model::*;
use crate::path::{JsonOp, JsonPath, coerce_value};
use crate::usage_expr::UsageExpr;

pub const SYNTAX_VERSION: &str = "next-router/0.1";
const MAX_INCLUDE_DEPTH: usize = 20;

// ---------------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Word,
    Str,
    Sym,
}

#[derive(Debug, Clone)]
struct Tok {
    text: String,
    line: usize,
    kind: TokKind,
}

impl Tok {
    fn is_sym(&self, sym: &str) -> bool {
        self.kind == TokKind::Sym && self.text == sym
    }

    /// Quoted tokens unescape; bare words pass through.
    fn unquote(&self) -> String {
        if self.kind != TokKind::Str {
            return self.text.clone();
        }
        let inner = &self.text[1..self.text.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => out.push(other),
                    None => {}
                }
            } else {
                out.push(ch);
            }
        }
        out
    }
}

fn lex(source: &str, file: &str) -> Result<Vec<Tok>, ConfigError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut line = 1usize;

    while let Some((start, ch)) = chars.next() {
        match ch {
            '\n' => line += 1,
            _ if ch.is_whitespace() => {}
            '#' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '{' | '}' | ';' => tokens.push(Tok {
                text: ch.to_string(),
                line,
                kind: TokKind::Sym,
            }),
            '=' => {
                let text = if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    "==".to_string()
                } else {
                    "=".to_string()
                };
                tokens.push(Tok {
                    text,
                    line,
                    kind: TokKind::Sym,
                });
            }
            '"' => {
                let tok_line = line;
                let mut end = None;
                while let Some((pos, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => {
                            end = Some(pos);
                            break;
                        }
                        '\n' => line += 1,
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| ConfigError::Syntax {
                    file: file.to_string(),
                    line: tok_line,
                    message: "unterminated string literal".to_string(),
                })?;
                tokens.push(Tok {
                    text: source[start..=end].to_string(),
                    line: tok_line,
                    kind: TokKind::Str,
                });
            }
            _ => {
                let mut end = start + ch.len_utf8();
                while let Some((pos, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | ';' | '"' | '#' | '=') {
                        break;
                    }
                    end = pos + c.len_utf8();
                    chars.next();
                }
                tokens.push(Tok {
                    text: source[start..end].to_string(),
                    line,
                    kind: TokKind::Word,
                });
            }
        }
    }
    Ok(tokens)
}

fn lex_file(
    path: &Path,
    depth: usize,
    visiting: &mut Vec<PathBuf>,
) -> Result<Vec<Tok>, ConfigError> {
    let display = path.display().to_string();
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConfigError::IncludeDepth {
            file: display,
            max: MAX_INCLUDE_DEPTH,
        });
    }
    let canonical = path.canonicalize().map_err(|source| ConfigError::Io {
        file: display.clone(),
        source,
    })?;
    if visiting.contains(&canonical) {
        return Err(ConfigError::IncludeCycle { file: display });
    }
    visiting.push(canonical);

    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        file: display.clone(),
        source,
    })?;
    let raw = lex(&source, &display)?;
    let expanded = expand_includes(raw, path, depth, visiting)?;
    visiting.pop();
    Ok(expanded)
}

fn expand_includes(
    tokens: Vec<Tok>,
    path: &Path,
    depth: usize,
    visiting: &mut Vec<PathBuf>,
) -> Result<Vec<Tok>, ConfigError> {
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut out = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(tok) = iter.next() {
        if tok.kind == TokKind::Word && tok.text == "include" {
            let target = iter.next().ok_or_else(|| ConfigError::Syntax {
                file: path.display().to_string(),
                line: tok.line,
                message: "include requires a path argument".to_string(),
            })?;
            let semi = iter.next();
            if !semi.as_ref().is_some_and(|t| t.is_sym(";")) {
                return Err(ConfigError::Syntax {
                    file: path.display().to_string(),
                    line: tok.line,
                    message: "include statement must end with `;`".to_string(),
                });
            }
            let rel = target.unquote();
            let included = if Path::new(&rel).is_absolute() {
                PathBuf::from(&rel)
            } else {
                base.join(&rel)
            };
            out.extend(lex_file(&included, depth + 1, visiting)?);
        } else {
            out.push(tok);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parser

pub fn parse_file(path: &Path) -> Result<Vec<ProviderPlan>, ConfigError> {
    let mut visiting = Vec::new();
    let tokens = lex_file(path, 0, &mut visiting)?;
    parse_tokens(tokens, &path.display().to_string())
}

/// Parse without include expansion; used by tests and embedded configs.
pub fn parse_str(source: &str, file: &str) -> Result<Vec<ProviderPlan>, ConfigError> {
    let tokens = lex(source, file)?;
    parse_tokens(tokens, file)
}

struct Cursor<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    file: &'a str,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn err(&self, line: usize, message: impl Into<String>) -> ConfigError {
        ConfigError::Syntax {
            file: self.file.to_string(),
            line,
            message: message.into(),
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<Tok, ConfigError> {
        let line = self.line();
        match self.next() {
            Some(tok) if tok.is_sym(sym) => Ok(tok),
            Some(tok) => Err(self.err(tok.line, format!("expected `{sym}`, found `{}`", tok.text))),
            None => Err(self.err(line, format!("expected `{sym}`, found end of file"))),
        }
    }

    /// Collect the remaining tokens of a statement (up to `;`).
    fn take_statement_rest(&mut self) -> Result<Vec<Tok>, ConfigError> {
        let start = self.line();
        let mut out = Vec::new();
        loop {
            match self.next() {
                Some(tok) if tok.is_sym(";") => return Ok(out),
                Some(tok) if tok.is_sym("{") || tok.is_sym("}") => {
                    return Err(self.err(tok.line, "statement must end with `;`"));
                }
                Some(tok) => out.push(tok),
                None => return Err(self.err(start, "unterminated statement (missing `;`)")),
            }
        }
    }
}

fn parse_tokens(tokens: Vec<Tok>, file: &str) -> Result<Vec<ProviderPlan>, ConfigError> {
    let mut cursor = Cursor {
        tokens,
        pos: 0,
        file,
    };

    parse_syntax_header(&mut cursor)?;

    let mut plans = Vec::new();
    let mut seen = HashSet::new();
    while let Some(tok) = cursor.next() {
        if tok.kind != TokKind::Word || tok.text != "provider" {
            return Err(cursor.err(
                tok.line,
                format!("expected `provider` block, found `{}`", tok.text),
            ));
        }
        let name_tok = cursor
            .next()
            .ok_or_else(|| cursor.err(tok.line, "provider requires a name"))?;
        let name = name_tok.unquote();
        if name.is_empty() {
            return Err(cursor.err(name_tok.line, "provider name cannot be empty"));
        }
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateProvider {
                name,
                first: file.to_string(),
                second: file.to_string(),
            });
        }
        cursor.expect_sym("{")?;
        let plan = parse_provider_body(&mut cursor, name)?;
        plans.push(plan);
    }
    Ok(plans)
}

fn parse_syntax_header(cursor: &mut Cursor<'_>) -> Result<(), ConfigError> {
    let line = cursor.line();
    let tok = cursor
        .next()
        .ok_or_else(|| cursor.err(line, "empty configuration (expected `syntax` statement)"))?;
    if tok.kind != TokKind::Word || tok.text != "syntax" {
        return Err(cursor.err(tok.line, "configuration must start with `syntax`"));
    }
    let version = cursor
        .next()
        .ok_or_else(|| cursor.err(tok.line, "syntax requires a version string"))?;
    let value = version.unquote();
    if value != SYNTAX_VERSION {
        return Err(cursor.err(
            version.line,
            format!("unsupported syntax version `{value}` (expected `{SYNTAX_VERSION}`)"),
        ));
    }
    cursor.expect_sym(";")?;
    Ok(())
}

/// Everything one `defaults` or `match` body can contribute, prior to being
/// distributed into the per-facet sub-plans.
#[derive(Debug, Clone, Default)]
struct SectionBody {
    routing: RoutingPlan,
    request: RequestPlan,
    headers: HeadersPlan,
    response: ResponsePlan,
    usage: UsagePlan,
    finish: FinishPlan,
    balance: BalancePlan,
}

fn parse_provider_body(cursor: &mut Cursor<'_>, name: String) -> Result<ProviderPlan, ConfigError> {
    let mut plan = ProviderPlan {
        name,
        ..ProviderPlan::default()
    };

    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated provider block")),
        };
        if tok.is_sym("}") {
            break;
        }
        match (tok.kind, tok.text.as_str()) {
            (TokKind::Word, "defaults") => {
                cursor.expect_sym("{")?;
                let body = parse_section_body(cursor)?;
                distribute_defaults(&mut plan, body);
            }
            (TokKind::Word, "match") => {
                let filter = parse_match_filter(cursor)?;
                let body = parse_section_body(cursor)?;
                distribute_match(&mut plan, filter, body);
            }
            _ => {
                return Err(cursor.err(
                    tok.line,
                    format!("expected `defaults` or `match`, found `{}`", tok.text),
                ));
            }
        }
    }

    validate_oauth(cursor, &plan)?;
    Ok(plan)
}

fn parse_match_filter(cursor: &mut Cursor<'_>) -> Result<MatchFilter, ConfigError> {
    let mut filter = MatchFilter::default();
    loop {
        let tok = cursor
            .next()
            .ok_or_else(|| cursor.err(cursor.line(), "unterminated match clause"))?;
        if tok.is_sym("{") {
            return Ok(filter);
        }
        let key = tok.text.clone();
        let value = cursor
            .next()
            .ok_or_else(|| cursor.err(tok.line, format!("match `{key}` requires a value")))?;
        match key.as_str() {
            "api" => {
                let raw = value.unquote();
                let api = Api::parse(&raw).ok_or_else(|| ConfigError::UnknownEnum {
                    file: cursor.file.to_string(),
                    line: value.line,
                    what: "api".to_string(),
                    value: raw,
                    allowed: "chat.completions | responses | embeddings | claude.messages | \
                              gemini.generateContent | gemini.streamGenerateContent"
                        .to_string(),
                })?;
                filter.api = Some(api);
            }
            "stream" => {
                filter.stream = Some(match value.unquote().as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(cursor.err(
                            value.line,
                            format!("match stream expects true|false, found `{other}`"),
                        ));
                    }
                });
            }
            other => {
                return Err(cursor.err(tok.line, format!("unknown match key `{other}`")));
            }
        }
    }
}

fn parse_section_body(cursor: &mut Cursor<'_>) -> Result<SectionBody, ConfigError> {
    let mut body = SectionBody::default();
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated block")),
        };
        if tok.is_sym("}") {
            return Ok(body);
        }
        match (tok.kind, tok.text.as_str()) {
            (TokKind::Word, "upstream_config") => {
                cursor.expect_sym("{")?;
                parse_upstream_config(cursor, &mut body.routing)?;
            }
            (TokKind::Word, "auth") => {
                cursor.expect_sym("{")?;
                parse_auth(cursor, &mut body.headers)?;
            }
            (TokKind::Word, "request") => {
                cursor.expect_sym("{")?;
                parse_request(cursor, &mut body.request, &mut body.headers)?;
            }
            (TokKind::Word, "upstream") => {
                cursor.expect_sym("{")?;
                parse_upstream(cursor, &mut body.routing)?;
            }
            (TokKind::Word, "response") => {
                cursor.expect_sym("{")?;
                parse_response(cursor, &mut body.response)?;
            }
            (TokKind::Word, "metrics") => {
                cursor.expect_sym("{")?;
                parse_metrics(cursor, &mut body.usage, &mut body.finish)?;
            }
            (TokKind::Word, "balance") => {
                cursor.expect_sym("{")?;
                parse_balance(cursor, &mut body.balance)?;
            }
            _ => {
                return Err(cursor.err(tok.line, format!("unknown block `{}`", tok.text)));
            }
        }
    }
}

fn distribute_defaults(plan: &mut ProviderPlan, body: SectionBody) {
    plan.routing.defaults.merge_from(&body.routing);
    plan.request.defaults.merge_from(&body.request);
    plan.headers.defaults.merge_from(&body.headers);
    plan.response.defaults.merge_from(&body.response);
    plan.usage.defaults.merge_from(&body.usage);
    plan.finish.defaults.merge_from(&body.finish);
    plan.balance.defaults.merge_from(&body.balance);
}

fn distribute_match(plan: &mut ProviderPlan, filter: MatchFilter, body: SectionBody) {
    plan.routing.matches.push(MatchArm {
        filter,
        body: body.routing,
    });
    plan.request.matches.push(MatchArm {
        filter,
        body: body.request,
    });
    plan.headers.matches.push(MatchArm {
        filter,
        body: body.headers,
    });
    plan.response.matches.push(MatchArm {
        filter,
        body: body.response,
    });
    plan.usage.matches.push(MatchArm {
        filter,
        body: body.usage,
    });
    plan.finish.matches.push(MatchArm {
        filter,
        body: body.finish,
    });
    plan.balance.matches.push(MatchArm {
        filter,
        body: body.balance,
    });
}

// ---------------------------------------------------------------------------
// Directive parsing helpers

fn join_expr_tokens(tokens: &[Tok]) -> String {
    tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_expr_arg(cursor: &Cursor<'_>, line: usize, tokens: &[Tok]) -> Result<Expr, ConfigError> {
    let raw = join_expr_tokens(tokens);
    if raw.is_empty() {
        return Err(cursor.err(line, "expected an expression argument"));
    }
    expr::parse(&raw).map_err(|message| ConfigError::InvalidExpr {
        file: cursor.file.to_string(),
        line,
        expr: raw,
        message,
    })
}

fn parse_path_arg(cursor: &Cursor<'_>, tok: &Tok) -> Result<JsonPath, ConfigError> {
    let raw = tok.unquote();
    JsonPath::parse(&raw).map_err(|message| ConfigError::InvalidPath {
        file: cursor.file.to_string(),
        line: tok.line,
        path: raw,
        message,
    })
}

fn parse_usage_expr_arg(
    cursor: &Cursor<'_>,
    line: usize,
    tokens: &[Tok],
) -> Result<UsageExpr, ConfigError> {
    let raw = join_expr_tokens(tokens);
    UsageExpr::parse(&raw).map_err(|message| ConfigError::InvalidExpr {
        file: cursor.file.to_string(),
        line,
        expr: raw,
        message,
    })
}

fn expect_args<'t>(
    cursor: &Cursor<'_>,
    line: usize,
    name: &str,
    args: &'t [Tok],
    count: usize,
) -> Result<&'t [Tok], ConfigError> {
    if args.len() != count {
        return Err(cursor.err(
            line,
            format!("`{name}` expects {count} argument(s), found {}", args.len()),
        ));
    }
    Ok(args)
}

fn removed_directive(cursor: &Cursor<'_>, tok: &Tok) -> ConfigError {
    ConfigError::RemovedDirective {
        file: cursor.file.to_string(),
        line: tok.line,
        name: tok.text.clone(),
        help: "use `set_header` / `del_header` in the `request` block".to_string(),
    }
}

fn unknown_enum(cursor: &Cursor<'_>, tok: &Tok, what: &str, allowed: String) -> ConfigError {
    ConfigError::UnknownEnum {
        file: cursor.file.to_string(),
        line: tok.line,
        what: what.to_string(),
        value: tok.unquote(),
        allowed,
    }
}

// ---------------------------------------------------------------------------
// Block bodies

fn parse_upstream_config(
    cursor: &mut Cursor<'_>,
    routing: &mut RoutingPlan,
) -> Result<(), ConfigError> {
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated upstream_config block")),
        };
        if tok.is_sym("}") {
            return Ok(());
        }
        match tok.text.as_str() {
            "base_url" => {
                cursor.expect_sym("=")?;
                let rest = cursor.take_statement_rest()?;
                routing.base_url = Some(parse_expr_arg(cursor, tok.line, &rest)?);
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    file: cursor.file.to_string(),
                    line: tok.line,
                    name: tok.text,
                });
            }
        }
    }
}

fn parse_auth(cursor: &mut Cursor<'_>, headers: &mut HeadersPlan) -> Result<(), ConfigError> {
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated auth block")),
        };
        if tok.is_sym("}") {
            return Ok(());
        }
        let args = cursor.take_statement_rest()?;
        match tok.text.as_str() {
            "auth_bearer" => {
                expect_args(cursor, tok.line, "auth_bearer", &args, 0)?;
                headers.auth_ops.push(HeaderOp::Set {
                    name: "Authorization".to_string(),
                    value: Expr::Concat(vec![
                        Expr::literal("Bearer "),
                        Expr::Var(crate::expr::Variable::ChannelKey),
                    ]),
                });
            }
            "auth_header_key" => {
                let args = expect_args(cursor, tok.line, "auth_header_key", &args, 1)?;
                headers.auth_ops.push(HeaderOp::Set {
                    name: args[0].unquote(),
                    value: Expr::Var(crate::expr::Variable::ChannelKey),
                });
            }
            "auth_oauth_bearer" => {
                expect_args(cursor, tok.line, "auth_oauth_bearer", &args, 0)?;
                headers.auth_ops.push(HeaderOp::Set {
                    name: "Authorization".to_string(),
                    value: Expr::Concat(vec![
                        Expr::literal("Bearer "),
                        Expr::Var(crate::expr::Variable::OAuthAccessToken),
                    ]),
                });
            }
            "oauth_mode" => {
                let args = expect_args(cursor, tok.line, "oauth_mode", &args, 1)?;
                let mode = OAuthMode::parse(&args[0].unquote())
                    .ok_or_else(|| unknown_enum(cursor, &args[0], "oauth_mode", OAuthMode::allowed()))?;
                headers.oauth.get_or_insert_default().mode = Some(mode);
            }
            "oauth_token_url" => {
                headers.oauth.get_or_insert_default().token_url =
                    Some(parse_expr_arg(cursor, tok.line, &args)?);
            }
            "oauth_form" => {
                if args.len() < 2 {
                    return Err(cursor.err(tok.line, "`oauth_form` expects a key and a value"));
                }
                let key = args[0].unquote();
                let value = parse_expr_arg(cursor, tok.line, &args[1..])?;
                headers.oauth.get_or_insert_default().form.push((key, value));
            }
            "oauth_token_path" => {
                let args = expect_args(cursor, tok.line, "oauth_token_path", &args, 1)?;
                headers.oauth.get_or_insert_default().token_path =
                    Some(parse_path_arg(cursor, &args[0])?);
            }
            "oauth_expires_in_path" => {
                let args = expect_args(cursor, tok.line, "oauth_expires_in_path", &args, 1)?;
                headers.oauth.get_or_insert_default().expires_in_path =
                    Some(parse_path_arg(cursor, &args[0])?);
            }
            "oauth_token_type_path" => {
                let args = expect_args(cursor, tok.line, "oauth_token_type_path", &args, 1)?;
                headers.oauth.get_or_insert_default().token_type_path =
                    Some(parse_path_arg(cursor, &args[0])?);
            }
            "oauth_identity" => {
                let args = expect_args(cursor, tok.line, "oauth_identity", &args, 1)?;
                headers.oauth.get_or_insert_default().identity = Some(args[0].unquote());
            }
            "oauth_basic_auth" => {
                if args.len() != 2 {
                    return Err(
                        cursor.err(tok.line, "`oauth_basic_auth` expects a user and a password")
                    );
                }
                let user = parse_expr_arg(cursor, tok.line, &args[..1])?;
                let pass = parse_expr_arg(cursor, tok.line, &args[1..])?;
                headers.oauth.get_or_insert_default().basic_auth = Some((user, pass));
            }
            "header_set" | "header_del" | "proxy_set_header" => {
                return Err(removed_directive(cursor, &tok));
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    file: cursor.file.to_string(),
                    line: tok.line,
                    name: tok.text,
                });
            }
        }
    }
}

fn parse_json_op(
    cursor: &Cursor<'_>,
    tok: &Tok,
    args: &[Tok],
) -> Result<Option<JsonOp>, ConfigError> {
    let op = match tok.text.as_str() {
        "json_set" | "json_set_if_absent" => {
            if args.len() < 2 {
                return Err(cursor.err(
                    tok.line,
                    format!("`{}` expects a path and a value", tok.text),
                ));
            }
            let path = parse_path_arg(cursor, &args[0])?;
            let value = parse_expr_arg(cursor, tok.line, &args[1..])?;
            if tok.text == "json_set" {
                JsonOp::Set { path, value }
            } else {
                JsonOp::SetIfAbsent { path, value }
            }
        }
        "json_del" => {
            let args = expect_args(cursor, tok.line, "json_del", args, 1)?;
            JsonOp::Del {
                path: parse_path_arg(cursor, &args[0])?,
            }
        }
        "json_rename" => {
            let args = expect_args(cursor, tok.line, "json_rename", args, 2)?;
            JsonOp::Rename {
                from: parse_path_arg(cursor, &args[0])?,
                to: parse_path_arg(cursor, &args[1])?,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(op))
}

fn parse_request(
    cursor: &mut Cursor<'_>,
    request: &mut RequestPlan,
    headers: &mut HeadersPlan,
) -> Result<(), ConfigError> {
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated request block")),
        };
        if tok.is_sym("}") {
            return Ok(());
        }
        let args = cursor.take_statement_rest()?;
        if let Some(op) = parse_json_op(cursor, &tok, &args)? {
            request.json_ops.push(op);
            continue;
        }
        match tok.text.as_str() {
            "set_header" => {
                if args.len() < 2 {
                    return Err(cursor.err(tok.line, "`set_header` expects a name and a value"));
                }
                headers.request_ops.push(HeaderOp::Set {
                    name: args[0].unquote(),
                    value: parse_expr_arg(cursor, tok.line, &args[1..])?,
                });
            }
            "del_header" => {
                let args = expect_args(cursor, tok.line, "del_header", &args, 1)?;
                headers.request_ops.push(HeaderOp::Del {
                    name: args[0].unquote(),
                });
            }
            "model_map" => {
                if args.len() < 2 {
                    return Err(cursor.err(tok.line, "`model_map` expects a model and a value"));
                }
                let from = args[0].unquote();
                let to = parse_expr_arg(cursor, tok.line, &args[1..])?;
                request.model_map.push((from, to));
            }
            "model_map_default" => {
                request.model_map_default = Some(parse_expr_arg(cursor, tok.line, &args)?);
            }
            "req_map" => {
                let args = expect_args(cursor, tok.line, "req_map", &args, 1)?;
                let mode = ReqMapMode::parse(&args[0].unquote())
                    .ok_or_else(|| unknown_enum(cursor, &args[0], "req_map", ReqMapMode::allowed()))?;
                request.req_map = Some(mode);
            }
            "header_set" | "header_del" | "proxy_set_header" => {
                return Err(removed_directive(cursor, &tok));
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    file: cursor.file.to_string(),
                    line: tok.line,
                    name: tok.text,
                });
            }
        }
    }
}

fn parse_upstream(cursor: &mut Cursor<'_>, routing: &mut RoutingPlan) -> Result<(), ConfigError> {
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated upstream block")),
        };
        if tok.is_sym("}") {
            return Ok(());
        }
        let args = cursor.take_statement_rest()?;
        match tok.text.as_str() {
            "set_path" => {
                routing.set_path = Some(parse_expr_arg(cursor, tok.line, &args)?);
            }
            "set_query" => {
                if args.len() < 2 {
                    return Err(cursor.err(tok.line, "`set_query` expects a key and a value"));
                }
                let key = args[0].unquote();
                let value = parse_expr_arg(cursor, tok.line, &args[1..])?;
                routing.set_query.push((key, value));
            }
            "del_query" => {
                let args = expect_args(cursor, tok.line, "del_query", &args, 1)?;
                routing.del_query.push(args[0].unquote());
            }
            "header_set" | "header_del" | "proxy_set_header" => {
                return Err(removed_directive(cursor, &tok));
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    file: cursor.file.to_string(),
                    line: tok.line,
                    name: tok.text,
                });
            }
        }
    }
}

fn parse_response(cursor: &mut Cursor<'_>, response: &mut ResponsePlan) -> Result<(), ConfigError> {
    let mut directive_set = false;
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated response block")),
        };
        if tok.is_sym("}") {
            return Ok(());
        }
        let args = cursor.take_statement_rest()?;
        if let Some(op) = parse_json_op(cursor, &tok, &args)? {
            response.json_ops.push(op);
            continue;
        }
        let mut set_directive = |cursor: &Cursor<'_>, value| -> Result<(), ConfigError> {
            if directive_set {
                return Err(cursor.err(
                    tok.line,
                    "resp_passthrough / resp_map / sse_parse are mutually exclusive",
                ));
            }
            directive_set = true;
            response.directive = Some(value);
            Ok(())
        };
        match tok.text.as_str() {
            "resp_passthrough" => {
                expect_args(cursor, tok.line, "resp_passthrough", &args, 0)?;
                set_directive(cursor, RespDirective::Passthrough)?;
            }
            "resp_map" => {
                let args = expect_args(cursor, tok.line, "resp_map", &args, 1)?;
                let mode = RespMapMode::parse(&args[0].unquote()).ok_or_else(|| {
                    unknown_enum(cursor, &args[0], "resp_map", RespMapMode::allowed())
                })?;
                set_directive(cursor, RespDirective::Map(mode))?;
            }
            "sse_parse" => {
                let args = expect_args(cursor, tok.line, "sse_parse", &args, 1)?;
                let mode = SseParseMode::parse(&args[0].unquote()).ok_or_else(|| {
                    unknown_enum(cursor, &args[0], "sse_parse", SseParseMode::allowed())
                })?;
                set_directive(cursor, RespDirective::SseParse(mode))?;
            }
            "sse_json_del_if" => {
                if args.len() != 4 || !args[1].is_sym("==") {
                    return Err(cursor.err(
                        tok.line,
                        "`sse_json_del_if` expects `<cond-path> == <literal> <del-path>`",
                    ));
                }
                let cond_path = parse_path_arg(cursor, &args[0])?;
                let equals = literal_value(&args[2]);
                let del_path = parse_path_arg(cursor, &args[3])?;
                response.sse_del_if.push(SseDelIf {
                    cond_path,
                    equals,
                    del_path,
                });
            }
            "header_set" | "header_del" | "proxy_set_header" => {
                return Err(removed_directive(cursor, &tok));
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    file: cursor.file.to_string(),
                    line: tok.line,
                    name: tok.text,
                });
            }
        }
    }
}

fn literal_value(tok: &Tok) -> Value {
    if tok.kind == TokKind::Str {
        Value::String(tok.unquote())
    } else {
        coerce_value(&tok.text)
    }
}

fn parse_metrics(
    cursor: &mut Cursor<'_>,
    usage: &mut UsagePlan,
    finish: &mut FinishPlan,
) -> Result<(), ConfigError> {
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated metrics block")),
        };
        if tok.is_sym("}") {
            return Ok(());
        }
        match tok.text.as_str() {
            "usage_extract" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "usage_extract", &args, 1)?;
                usage.mode = Some(UsageMode::parse(&args[0].unquote()).ok_or_else(|| {
                    unknown_enum(cursor, &args[0], "usage_extract", UsageMode::allowed())
                })?);
            }
            "finish_reason_extract" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "finish_reason_extract", &args, 1)?;
                finish.mode = Some(FinishMode::parse(&args[0].unquote()).ok_or_else(|| {
                    unknown_enum(
                        cursor,
                        &args[0],
                        "finish_reason_extract",
                        FinishMode::allowed(),
                    )
                })?);
            }
            "input_tokens" | "output_tokens" | "total_tokens" => {
                cursor.expect_sym("=")?;
                let args = cursor.take_statement_rest()?;
                let expr = parse_usage_expr_arg(cursor, tok.line, &args)?;
                match tok.text.as_str() {
                    "input_tokens" => usage.input_expr = Some(expr),
                    "output_tokens" => usage.output_expr = Some(expr),
                    _ => usage.total_expr = Some(expr),
                }
            }
            "input_tokens_path" | "output_tokens_path" | "total_tokens_path"
            | "cached_tokens_path" | "cache_write_tokens_path" | "finish_reason_path" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, &tok.text, &args, 1)?;
                let path = parse_path_arg(cursor, &args[0])?;
                match tok.text.as_str() {
                    "input_tokens_path" => usage.input_path = Some(path),
                    "output_tokens_path" => usage.output_path = Some(path),
                    "total_tokens_path" => usage.total_path = Some(path),
                    "cached_tokens_path" => usage.cached_path = Some(path),
                    "cache_write_tokens_path" => usage.cache_write_path = Some(path),
                    _ => finish.path = Some(path),
                }
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    file: cursor.file.to_string(),
                    line: tok.line,
                    name: tok.text,
                });
            }
        }
    }
}

fn parse_balance(cursor: &mut Cursor<'_>, balance: &mut BalancePlan) -> Result<(), ConfigError> {
    loop {
        let tok = match cursor.next() {
            Some(tok) => tok,
            None => return Err(cursor.err(cursor.line(), "unterminated balance block")),
        };
        if tok.is_sym("}") {
            return Ok(());
        }
        match tok.text.as_str() {
            "balance_mode" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "balance_mode", &args, 1)?;
                balance.mode = Some(BalanceMode::parse(&args[0].unquote()).ok_or_else(|| {
                    unknown_enum(cursor, &args[0], "balance_mode", BalanceMode::allowed())
                })?);
            }
            "method" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "method", &args, 1)?;
                balance.method = Some(args[0].unquote());
            }
            "path" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "path", &args, 1)?;
                balance.path = Some(args[0].unquote());
            }
            "balance" => {
                cursor.expect_sym("=")?;
                let args = cursor.take_statement_rest()?;
                balance.balance_expr = Some(parse_usage_expr_arg(cursor, tok.line, &args)?);
            }
            "used_path" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "used_path", &args, 1)?;
                balance.used_path = Some(parse_path_arg(cursor, &args[0])?);
            }
            "balance_unit" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "balance_unit", &args, 1)?;
                balance.unit = Some(BalanceUnit::parse(&args[0].unquote()).ok_or_else(|| {
                    unknown_enum(cursor, &args[0], "balance_unit", BalanceUnit::allowed())
                })?);
            }
            "set_header" => {
                let args = cursor.take_statement_rest()?;
                if args.len() < 2 {
                    return Err(cursor.err(tok.line, "`set_header` expects a name and a value"));
                }
                balance.header_ops.push(HeaderOp::Set {
                    name: args[0].unquote(),
                    value: parse_expr_arg(cursor, tok.line, &args[1..])?,
                });
            }
            "del_header" => {
                let args = cursor.take_statement_rest()?;
                let args = expect_args(cursor, tok.line, "del_header", &args, 1)?;
                balance.header_ops.push(HeaderOp::Del {
                    name: args[0].unquote(),
                });
            }
            "header_set" | "header_del" | "proxy_set_header" => {
                return Err(removed_directive(cursor, &tok));
            }
            _ => {
                return Err(ConfigError::UnknownDirective {
                    file: cursor.file.to_string(),
                    line: tok.line,
                    name: tok.text,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Post-parse validation

fn validate_oauth(cursor: &Cursor<'_>, plan: &ProviderPlan) -> Result<(), ConfigError> {
    let mut check = |oauth: &OAuthPlan| -> Result<(), ConfigError> {
        if oauth.is_empty() {
            return Ok(());
        }
        let Some(mode) = oauth.mode else {
            return Err(ConfigError::MissingField {
                file: cursor.file.to_string(),
                line: 0,
                message: format!(
                    "provider `{}`: oauth directives require `oauth_mode`",
                    plan.name
                ),
            });
        };
        if mode == OAuthMode::Custom {
            if oauth.token_url.is_none() {
                return Err(ConfigError::MissingField {
                    file: cursor.file.to_string(),
                    line: 0,
                    message: format!(
                        "provider `{}`: oauth_mode custom requires `oauth_token_url`",
                        plan.name
                    ),
                });
            }
            if oauth.form.is_empty() {
                return Err(ConfigError::MissingField {
                    file: cursor.file.to_string(),
                    line: 0,
                    message: format!(
                        "provider `{}`: oauth_mode custom requires at least one `oauth_form` row",
                        plan.name
                    ),
                });
            }
        }
        Ok(())
    };

    if let Some(oauth) = &plan.headers.defaults.oauth {
        check(oauth)?;
    }
    for arm in &plan.headers.matches {
        let mut merged = plan.headers.defaults.clone();
        merged.merge_from(&arm.body);
        if let Some(oauth) = &merged.oauth {
            check(oauth)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        syntax "next-router/0.1";

        provider "acme" {
          defaults {
            upstream_config { base_url = "https://api.acme.dev"; }
            auth { auth_bearer; }
            metrics { usage_extract openai; finish_reason_extract openai; }
          }
          match api chat.completions {
            upstream { set_path "/v1/chat/completions"; }
            response { resp_passthrough; }
          }
          match api claude.messages stream true {
            request {
              req_map openai_chat_to_anthropic_messages;
              json_set_if_absent $.max_tokens "1024";
            }
            upstream { set_path "/v1/messages"; set_query beta "true"; }
            response { sse_parse openai_to_anthropic_chunks; }
          }
        }
    "#;

    #[test]
    fn parses_full_provider() {
        let plans = parse_str(BASE, "test.conf").unwrap();
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.name, "acme");
        assert_eq!(plan.routing.matches.len(), 2);

        let routing = plan.routing.select(Api::ChatCompletions, false).unwrap();
        assert!(routing.arm_matched);
        assert!(routing.body.base_url.is_some());
        assert!(routing.body.set_path.is_some());

        let request = plan.request.select(Api::ClaudeMessages, true).unwrap();
        assert_eq!(
            request.body.req_map,
            Some(ReqMapMode::OpenAIChatToAnthropicMessages)
        );
        assert_eq!(request.body.json_ops.len(), 1);

        let response = plan.response.select(Api::ClaudeMessages, true).unwrap();
        assert_eq!(
            response.body.sse_parse(),
            Some(SseParseMode::OpenAIToAnthropicChunks)
        );
    }

    #[test]
    fn match_arm_is_required_for_routing_selection() {
        let plans = parse_str(BASE, "test.conf").unwrap();
        let routing = plans[0].routing.select(Api::Responses, false).unwrap();
        assert!(!routing.arm_matched, "no match arm covers responses");
    }

    #[test]
    fn auth_bearer_synthesizes_authorization() {
        let plans = parse_str(BASE, "test.conf").unwrap();
        let headers = plans[0].headers.select(Api::ChatCompletions, false).unwrap();
        match &headers.body.auth_ops[0] {
            HeaderOp::Set { name, value } => {
                assert_eq!(name, "Authorization");
                let scope = crate::expr::ExprScope {
                    channel_key: "sk-x",
                    ..Default::default()
                };
                assert_eq!(value.eval(&scope), "Bearer sk-x");
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_syntax_version() {
        let err = parse_str("syntax \"other/9\";", "t.conf").unwrap_err();
        assert!(err.to_string().contains("unsupported syntax version"));
    }

    #[test]
    fn rejects_unknown_directive() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" { defaults { upstream { set_port 99; } } }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDirective { name, .. } if name == "set_port"));
    }

    #[test]
    fn removed_directives_error_with_guidance() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" { defaults { request { header_set X-Test "v"; } } }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("header_set"));
        assert!(message.contains("set_header"));
    }

    #[test]
    fn rejects_unknown_enum_value() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" { defaults { response { resp_map no_such_mode; } } }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnum { .. }));
    }

    #[test]
    fn rejects_conflicting_response_directives() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" {
              defaults { response { resp_passthrough; sse_parse anthropic_to_openai_chunks; } }
            }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn rejects_invalid_json_path() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" { defaults { request { json_del "$.a[x]"; } } }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn oauth_custom_requires_url_and_form() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" {
              defaults { auth { oauth_mode custom; } }
            }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        assert!(err.to_string().contains("oauth_token_url"));

        let source = r#"
            syntax "next-router/0.1";
            provider "p" {
              defaults {
                auth {
                  oauth_mode custom;
                  oauth_token_url "https://login.example/token";
                  oauth_form grant_type "client_credentials";
                  oauth_form client_secret $channel.key;
                }
              }
            }
        "#;
        let plans = parse_str(source, "t.conf").unwrap();
        let oauth = plans[0].headers.defaults.oauth.as_ref().unwrap();
        assert_eq!(oauth.mode, Some(OAuthMode::Custom));
        assert_eq!(oauth.form.len(), 2);
    }

    #[test]
    fn oauth_without_mode_is_rejected() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" { defaults { auth { oauth_form a "b"; } } }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        assert!(err.to_string().contains("oauth_mode"));
    }

    #[test]
    fn duplicate_provider_in_file_rejected() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" { defaults { upstream_config { base_url = "https://a"; } } }
            provider "p" { defaults { upstream_config { base_url = "https://b"; } } }
        "#;
        let err = parse_str(source, "t.conf").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProvider { .. }));
    }

    #[test]
    fn sse_del_if_parses_literal_forms() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" {
              defaults {
                response {
                  sse_json_del_if "$.type" == "ping" "$.ping";
                  sse_json_del_if "$.count" == 0 "$.empty";
                }
              }
            }
        "#;
        let plans = parse_str(source, "t.conf").unwrap();
        let response = &plans[0].response.defaults;
        assert_eq!(response.sse_del_if[0].equals, Value::String("ping".into()));
        assert_eq!(response.sse_del_if[1].equals, serde_json::json!(0));
    }

    #[test]
    fn metrics_custom_expressions() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" {
              defaults {
                metrics {
                  usage_extract custom;
                  input_tokens = $.u.in;
                  output_tokens = $.u.out_a + $.u.out_b;
                  finish_reason_path "$.done_reason";
                }
              }
            }
        "#;
        let plans = parse_str(source, "t.conf").unwrap();
        let usage = &plans[0].usage.defaults;
        assert_eq!(usage.mode, Some(UsageMode::Custom));
        let doc = serde_json::json!({"u": {"in": 3, "out_a": 1, "out_b": 2}});
        assert_eq!(usage.input_expr.as_ref().unwrap().eval_u64(&doc), 3);
        assert_eq!(usage.output_expr.as_ref().unwrap().eval_u64(&doc), 3);
        assert!(plans[0].finish.defaults.path.is_some());
    }

    #[test]
    fn balance_block_is_represented() {
        let source = r#"
            syntax "next-router/0.1";
            provider "p" {
              defaults {
                balance {
                  balance_mode custom;
                  method GET;
                  path "/v1/balance";
                  balance = $.data.total - $.data.used;
                  balance_unit USD;
                  set_header X-Query "1";
                }
              }
            }
        "#;
        let plans = parse_str(source, "t.conf").unwrap();
        let balance = &plans[0].balance.defaults;
        assert_eq!(balance.mode, Some(BalanceMode::Custom));
        assert_eq!(balance.unit, Some(BalanceUnit::Usd));
        assert_eq!(balance.method.as_deref(), Some("GET"));
        assert_eq!(balance.header_ops.len(), 1);
    }
}
