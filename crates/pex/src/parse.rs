//! Front end: lexer, pipeline normalizer, and parser.
//!
//! The parser performs the token-level normalizations the rest of the
//! pipeline relies on, so the tree it returns never contains a bare `$`:
//!
//! - `a | b | c` becomes nested calls `(c (b (a)))`, substituting `$` where a
//!   stage uses it and otherwise threading the previous stage in as the
//!   first argument;
//! - a top-level juxtaposition `f x y` is wrapped as the call `(f x y)`;
//! - shell mode injects `$$` into the last top-level expression when no
//!   source reference appears in it.

use std::{error::Error, fmt};

use crate::ast::{Expr, Node, Span};

/// Marker identifier the lexer produces for a bare `$`. The lexer never
/// produces it for user identifiers, so substitution cannot collide.
const STAGE_MARKER: &str = "$";

/// Letters accepted in a regex literal's flag suffix.
const REGEX_FLAGS: &str = "gimsuvy";

/// Front-end error with a 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}:{}: {}", self.line, self.column, self.message)
    }
}

impl Error for ParseError {}

/// Options controlling parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Inject `$$` into the last top-level expression when it contains no
    /// source reference.
    pub shell_mode: bool,
}

/// Parses a complete program into a statement sequence.
pub fn parse(source: &str, options: &ParseOptions) -> Result<Node, ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut statements = parser.parse_program()?;
    if options.shell_mode
        && let Some(last) = statements.last_mut()
        && !contains_source_ref(last)
    {
        inject_input(last);
    }
    let span = statements.first().map_or(Span::new(1, 1), |node| node.span);
    Ok(match statements.len() {
        1 => statements.pop().expect("len checked"),
        _ => Node::new(Expr::Seq(statements), span),
    })
}

// ===========================================================================
// Lexer
// ===========================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Regex(String, String),
    Ident(String),
    /// An identifier immediately followed by `:`: `let:`, `fn:`, `print:`,
    /// or any user effect keyword.
    Keyword(String),
    Input,
    InputIndex(u32),
    Dollar,
    LParen,
    RParen,
    Pipe,
    /// `;`, or a newline outside parentheses.
    Terminator,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    span: Span,
}

struct Lexer<'src> {
    chars: std::iter::Peekable<std::str::Chars<'src>>,
    line: u32,
    column: u32,
    paren_depth: u32,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
            paren_depth: 0,
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.span(), message)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_symbol(c: char) -> bool {
    matches!(c, '+' | '-' | '*' | '/' | '%' | '<' | '>' | '=' | '!' | '?')
}

fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let Some(c) = lexer.peek() else { break };
        let span = lexer.span();
        match c {
            ' ' | '\t' | '\r' => {
                lexer.bump();
            }
            '\n' => {
                lexer.bump();
                if lexer.paren_depth == 0 {
                    tokens.push(Token {
                        tok: Tok::Terminator,
                        span,
                    });
                }
            }
            '#' => {
                while let Some(c) = lexer.peek() {
                    if c == '\n' {
                        break;
                    }
                    lexer.bump();
                }
            }
            ';' => {
                lexer.bump();
                if lexer.paren_depth > 0 {
                    return Err(ParseError::new(span, "';' is not allowed inside parentheses"));
                }
                tokens.push(Token {
                    tok: Tok::Terminator,
                    span,
                });
            }
            '(' => {
                lexer.bump();
                lexer.paren_depth += 1;
                tokens.push(Token { tok: Tok::LParen, span });
            }
            ')' => {
                lexer.bump();
                if lexer.paren_depth == 0 {
                    return Err(ParseError::new(span, "unmatched ')'"));
                }
                lexer.paren_depth -= 1;
                tokens.push(Token { tok: Tok::RParen, span });
            }
            '|' => {
                lexer.bump();
                tokens.push(Token { tok: Tok::Pipe, span });
            }
            '"' => {
                let tok = lex_string(&mut lexer)?;
                tokens.push(Token { tok, span });
            }
            '$' => {
                lexer.bump();
                let tok = match lexer.peek() {
                    Some('$') => {
                        lexer.bump();
                        Tok::Input
                    }
                    Some(d) if d.is_ascii_digit() => {
                        let mut n: u32 = 0;
                        while let Some(d) = lexer.peek() {
                            let Some(digit) = d.to_digit(10) else { break };
                            n = n
                                .checked_mul(10)
                                .and_then(|n| n.checked_add(digit))
                                .ok_or_else(|| ParseError::new(span, "source reference index is too large"))?;
                            lexer.bump();
                        }
                        Tok::InputIndex(n)
                    }
                    _ => Tok::Dollar,
                };
                tokens.push(Token { tok, span });
            }
            _ if c.is_ascii_digit() => {
                let tok = lex_number(&mut lexer, false)?;
                tokens.push(Token { tok, span });
            }
            '-' if follows_digit(&mut lexer) => {
                lexer.bump();
                let tok = lex_number(&mut lexer, true)?;
                tokens.push(Token { tok, span });
            }
            '/' if starts_regex(&mut lexer) => {
                let tok = lex_regex(&mut lexer)?;
                tokens.push(Token { tok, span });
            }
            _ if is_ident_start(c) => {
                let mut name = String::new();
                while let Some(c) = lexer.peek() {
                    if !is_ident_continue(c) {
                        break;
                    }
                    name.push(c);
                    lexer.bump();
                }
                let tok = if lexer.peek() == Some(':') {
                    lexer.bump();
                    Tok::Keyword(name)
                } else {
                    Tok::Ident(name)
                };
                tokens.push(Token { tok, span });
            }
            _ if is_symbol(c) => {
                let mut name = String::new();
                while let Some(c) = lexer.peek() {
                    if !is_symbol(c) {
                        break;
                    }
                    name.push(c);
                    lexer.bump();
                }
                tokens.push(Token {
                    tok: Tok::Ident(name),
                    span,
                });
            }
            _ => return Err(lexer.error(format!("unexpected character '{c}'"))),
        }
    }
    tokens.push(Token {
        tok: Tok::Eof,
        span: lexer.span(),
    });
    Ok(tokens)
}

/// A `-` directly followed by a digit starts a negative number literal;
/// with anything else it is the `-` operator identifier.
fn follows_digit(lexer: &mut Lexer<'_>) -> bool {
    let mut clone = lexer.chars.clone();
    clone.next();
    clone.next().is_some_and(|c| c.is_ascii_digit())
}

/// A `/` directly followed by a non-space character starts a regex literal;
/// `/` followed by whitespace is the division operator identifier.
fn starts_regex(lexer: &mut Lexer<'_>) -> bool {
    let mut clone = lexer.chars.clone();
    clone.next();
    clone.next().is_some_and(|c| !c.is_whitespace() && c != ')')
}

fn lex_string(lexer: &mut Lexer<'_>) -> Result<Tok, ParseError> {
    lexer.bump(); // opening quote
    let mut out = String::new();
    loop {
        match lexer.bump() {
            None => return Err(lexer.error("unterminated string literal")),
            Some('"') => return Ok(Tok::Str(out)),
            Some('\\') => match lexer.bump() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some(other) => return Err(lexer.error(format!("unknown escape '\\{other}'"))),
                None => return Err(lexer.error("unterminated string literal")),
            },
            Some(c) => out.push(c),
        }
    }
}

fn lex_number(lexer: &mut Lexer<'_>, negative: bool) -> Result<Tok, ParseError> {
    let mut text = String::new();
    if negative {
        text.push('-');
    }
    while let Some(c) = lexer.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            lexer.bump();
        } else {
            break;
        }
    }
    if lexer.peek() == Some('.') {
        let mut clone = lexer.chars.clone();
        clone.next();
        if clone.next().is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            lexer.bump();
            while let Some(c) = lexer.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    lexer.bump();
                } else {
                    break;
                }
            }
        }
    }
    if matches!(lexer.peek(), Some('e' | 'E')) {
        text.push('e');
        lexer.bump();
        if matches!(lexer.peek(), Some('+' | '-')) {
            text.push(lexer.bump().expect("peeked"));
        }
        let mut saw_digit = false;
        while let Some(c) = lexer.peek() {
            if c.is_ascii_digit() {
                saw_digit = true;
                text.push(c);
                lexer.bump();
            } else {
                break;
            }
        }
        if !saw_digit {
            return Err(lexer.error("exponent is missing digits"));
        }
    }
    text.parse::<f64>()
        .map(Tok::Number)
        .map_err(|_| lexer.error(format!("invalid number literal '{text}'")))
}

fn lex_regex(lexer: &mut Lexer<'_>) -> Result<Tok, ParseError> {
    lexer.bump(); // opening slash
    let mut pattern = String::new();
    loop {
        match lexer.bump() {
            None | Some('\n') => return Err(lexer.error("unterminated regex literal")),
            Some('/') => break,
            Some('\\') => match lexer.bump() {
                // keep the escape for the regex engine, except an escaped slash
                Some('/') => pattern.push('/'),
                Some(other) => {
                    pattern.push('\\');
                    pattern.push(other);
                }
                None => return Err(lexer.error("unterminated regex literal")),
            },
            Some(c) => pattern.push(c),
        }
    }
    let mut flags = String::new();
    while let Some(c) = lexer.peek() {
        if !c.is_ascii_alphabetic() {
            break;
        }
        if !REGEX_FLAGS.contains(c) {
            return Err(lexer.error(format!("unknown regex flag '{c}'")));
        }
        if flags.contains(c) {
            return Err(lexer.error(format!("duplicate regex flag '{c}'")));
        }
        flags.push(c);
        lexer.bump();
    }
    Ok(Tok::Regex(pattern, flags))
}

// ===========================================================================
// Parser
// ===========================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), Tok::Terminator) {
            self.bump();
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Terminator | Tok::Eof)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.peek_span(), message)
    }

    fn expect_rparen(&mut self, context: &str) -> Result<(), ParseError> {
        match self.peek() {
            Tok::RParen => {
                self.bump();
                Ok(())
            }
            _ => Err(self.error_here(format!("expected ')' to close {context}"))),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_terminators();
            if matches!(self.peek(), Tok::Eof) {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        if statements.is_empty() {
            return Err(self.error_here("program is empty"));
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let span = self.peek_span();
        if let Tok::Keyword(name) = self.peek().clone() {
            self.bump();
            return match name.as_str() {
                "let" => self.parse_let_statement(span),
                "fn" => self.parse_fn_statement(span),
                _ => self.parse_effect_statement(name, span),
            };
        }
        self.parse_expression_statement(span)
    }

    /// `let: name value`: the value may itself be a pipeline or an
    /// implicit call.
    fn parse_let_statement(&mut self, span: Span) -> Result<Node, ParseError> {
        let name = self.parse_binding_name("let:")?;
        let value = self.parse_expression_statement(self.peek_span())?;
        Ok(Node::new(
            Expr::Let {
                name,
                value: Box::new(value),
            },
            span,
        ))
    }

    /// `fn: name (params) body…`: trailing units become an implicit
    /// sequence.
    fn parse_fn_statement(&mut self, span: Span) -> Result<Node, ParseError> {
        let name = self.parse_binding_name("fn:")?;
        let params = self.parse_param_list()?;
        let body = self.parse_fn_body()?;
        Ok(Node::new(
            Expr::FnDef {
                name,
                params,
                body: Box::new(body),
            },
            span,
        ))
    }

    /// `print: a b`, `assert: cond`, or any user effect keyword: the
    /// remaining units on the line become the effect arguments.
    fn parse_effect_statement(&mut self, name: String, span: Span) -> Result<Node, ParseError> {
        let mut args = Vec::new();
        while !self.at_statement_end() {
            args.push(self.parse_pipeline()?);
        }
        Ok(Node::new(Expr::Effect { name, args }, span))
    }

    fn parse_binding_name(&mut self, context: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.error_here(format!("{context} expects a name"))),
        }
    }

    fn parse_param_list(&mut self) -> Result<Vec<String>, ParseError> {
        match self.peek() {
            Tok::LParen => {
                self.bump();
            }
            _ => return Err(self.error_here("expected '(' to open the parameter list")),
        }
        let mut params = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::Ident(name) => {
                    self.bump();
                    params.push(name);
                }
                Tok::RParen => {
                    self.bump();
                    return Ok(params);
                }
                _ => return Err(self.error_here("expected a parameter name or ')'")),
            }
        }
    }

    fn parse_fn_body(&mut self) -> Result<Node, ParseError> {
        let span = self.peek_span();
        let mut units = Vec::new();
        while !self.at_statement_end() {
            units.push(self.parse_pipeline()?);
        }
        match units.len() {
            0 => Err(self.error_here("function body is empty")),
            1 => Ok(units.pop().expect("len checked")),
            _ => Ok(Node::new(Expr::Seq(units), span)),
        }
    }

    /// An expression statement: one or more pipeline units. A
    /// juxtaposition whose head is an identifier wraps into a call.
    fn parse_expression_statement(&mut self, span: Span) -> Result<Node, ParseError> {
        let first = self.parse_pipeline()?;
        if self.at_statement_end() {
            return Ok(first);
        }
        let mut args = Vec::new();
        while !self.at_statement_end() {
            args.push(self.parse_pipeline()?);
        }
        match first.expr {
            Expr::Ident(_) => Ok(Node::new(
                Expr::Call {
                    callee: Box::new(first),
                    args,
                },
                span,
            )),
            _ => Err(ParseError::new(
                span,
                "juxtaposed expressions only form a call when the head is a name",
            )),
        }
    }

    /// `unit (| stage)*` folded into nested calls.
    fn parse_pipeline(&mut self) -> Result<Node, ParseError> {
        let first_span = self.peek_span();
        let mut acc = self.parse_unit()?;
        if contains_stage_marker(&acc) {
            return Err(ParseError::new(
                first_span,
                "'$' refers to the previous pipeline stage and cannot appear in the first stage",
            ));
        }
        while matches!(self.peek(), Tok::Pipe) {
            self.bump();
            let stage_span = self.peek_span();
            let stage = self.parse_unit()?;
            acc = apply_stage(stage, acc).map_err(|message| ParseError::new(stage_span, message))?;
        }
        Ok(acc)
    }

    fn parse_unit(&mut self) -> Result<Node, ParseError> {
        let span = self.peek_span();
        match self.bump().tok {
            Tok::Number(n) => Ok(Node::new(Expr::Number(n), span)),
            Tok::Str(s) => Ok(Node::new(Expr::Str(s), span)),
            Tok::Regex(pattern, flags) => Ok(Node::new(Expr::Regex { pattern, flags }, span)),
            Tok::Input => Ok(Node::new(Expr::Input, span)),
            Tok::InputIndex(n) => Ok(Node::new(Expr::InputIndex(n), span)),
            Tok::Dollar => Ok(Node::new(Expr::Ident(STAGE_MARKER.to_owned()), span)),
            Tok::Ident(name) => Ok(Node::new(keyword_or_ident(name), span)),
            Tok::LParen => self.parse_form(span),
            other => Err(ParseError::new(span, format!("unexpected token {}", describe(&other)))),
        }
    }

    /// The parenthesized forms: `if`, `and`, `or`, `fn`, `effect`, or an
    /// ordinary call.
    fn parse_form(&mut self, span: Span) -> Result<Node, ParseError> {
        if let Tok::Ident(head) = self.peek().clone() {
            match head.as_str() {
                "if" => {
                    self.bump();
                    let cond = self.parse_unit()?;
                    let then = self.parse_unit()?;
                    let els = if matches!(self.peek(), Tok::RParen) {
                        Node::new(Expr::Null, span)
                    } else {
                        self.parse_unit()?
                    };
                    self.expect_rparen("the if form")?;
                    return Ok(Node::new(
                        Expr::If {
                            cond: Box::new(cond),
                            then: Box::new(then),
                            els: Box::new(els),
                        },
                        span,
                    ));
                }
                "and" | "or" => {
                    self.bump();
                    let left = self.parse_unit()?;
                    let right = self.parse_unit()?;
                    self.expect_rparen(&format!("the {head} form"))?;
                    let expr = if head == "and" {
                        Expr::And(Box::new(left), Box::new(right))
                    } else {
                        Expr::Or(Box::new(left), Box::new(right))
                    };
                    return Ok(Node::new(expr, span));
                }
                "fn" => {
                    self.bump();
                    let params = self.parse_param_list()?;
                    let mut units = Vec::new();
                    while !matches!(self.peek(), Tok::RParen | Tok::Eof) {
                        units.push(self.parse_unit()?);
                    }
                    self.expect_rparen("the fn form")?;
                    let body = match units.len() {
                        0 => return Err(ParseError::new(span, "function body is empty")),
                        1 => units.pop().expect("len checked"),
                        _ => Node::new(Expr::Seq(units), span),
                    };
                    return Ok(Node::new(
                        Expr::Lambda {
                            params,
                            body: Box::new(body),
                        },
                        span,
                    ));
                }
                "effect" => {
                    self.bump();
                    let name = match self.bump().tok {
                        Tok::Ident(name) => name,
                        _ => return Err(ParseError::new(span, "effect expects a name")),
                    };
                    let mut args = Vec::new();
                    while !matches!(self.peek(), Tok::RParen | Tok::Eof) {
                        args.push(self.parse_unit()?);
                    }
                    self.expect_rparen("the effect form")?;
                    return Ok(Node::new(Expr::Effect { name, args }, span));
                }
                _ => {}
            }
        }
        let callee = self.parse_unit()?;
        let mut args = Vec::new();
        while !matches!(self.peek(), Tok::RParen | Tok::Eof) {
            args.push(self.parse_unit()?);
        }
        self.expect_rparen("the call")?;
        Ok(Node::new(
            Expr::Call {
                callee: Box::new(callee),
                args,
            },
            span,
        ))
    }
}

fn keyword_or_ident(name: String) -> Expr {
    match name.as_str() {
        "true" => Expr::Bool(true),
        "false" => Expr::Bool(false),
        "null" => Expr::Null,
        _ => Expr::Ident(name),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Number(n) => format!("number {n}"),
        Tok::Str(_) => "string literal".to_owned(),
        Tok::Regex(..) => "regex literal".to_owned(),
        Tok::Ident(name) => format!("'{name}'"),
        Tok::Keyword(name) => format!("'{name}:'"),
        Tok::Input => "'$$'".to_owned(),
        Tok::InputIndex(n) => format!("'${n}'"),
        Tok::Dollar => "'$'".to_owned(),
        Tok::LParen => "'('".to_owned(),
        Tok::RParen => "')'".to_owned(),
        Tok::Pipe => "'|'".to_owned(),
        Tok::Terminator => "end of statement".to_owned(),
        Tok::Eof => "end of input".to_owned(),
    }
}

// ===========================================================================
// Pipeline normalization
// ===========================================================================

/// Threads the previous stage's expression into a pipeline stage.
///
/// A stage that mentions `$` has the previous expression substituted at
/// every occurrence; a bare name becomes a unary call; a call form receives
/// the previous expression as its first argument.
fn apply_stage(stage: Node, prev: Node) -> Result<Node, String> {
    if contains_stage_marker(&stage) {
        return Ok(substitute_marker(stage, &prev));
    }
    let span = stage.span;
    match stage.expr {
        Expr::Ident(_) => Ok(Node::new(
            Expr::Call {
                callee: Box::new(stage),
                args: vec![prev],
            },
            span,
        )),
        Expr::Call { callee, mut args } => {
            args.insert(0, prev);
            Ok(Node::new(Expr::Call { callee, args }, span))
        }
        _ => Err("pipeline stage must be a name, a call, or reference '$'".to_owned()),
    }
}

fn contains_stage_marker(node: &Node) -> bool {
    let mut found = false;
    walk(node, &mut |n| {
        if matches!(&n.expr, Expr::Ident(name) if name == STAGE_MARKER) {
            found = true;
        }
    });
    found
}

fn contains_source_ref(node: &Node) -> bool {
    let mut found = false;
    walk(node, &mut |n| {
        if matches!(n.expr, Expr::Input | Expr::InputIndex(_)) {
            found = true;
        }
    });
    found
}

fn substitute_marker(node: Node, replacement: &Node) -> Node {
    let Node { expr, span } = node;
    let expr = match expr {
        Expr::Ident(name) if name == STAGE_MARKER => return replacement.clone(),
        Expr::Call { callee, args } => Expr::Call {
            callee: Box::new(substitute_marker(*callee, replacement)),
            args: args.into_iter().map(|a| substitute_marker(a, replacement)).collect(),
        },
        Expr::If { cond, then, els } => Expr::If {
            cond: Box::new(substitute_marker(*cond, replacement)),
            then: Box::new(substitute_marker(*then, replacement)),
            els: Box::new(substitute_marker(*els, replacement)),
        },
        Expr::And(a, b) => Expr::And(
            Box::new(substitute_marker(*a, replacement)),
            Box::new(substitute_marker(*b, replacement)),
        ),
        Expr::Or(a, b) => Expr::Or(
            Box::new(substitute_marker(*a, replacement)),
            Box::new(substitute_marker(*b, replacement)),
        ),
        Expr::Effect { name, args } => Expr::Effect {
            name,
            args: args.into_iter().map(|a| substitute_marker(a, replacement)).collect(),
        },
        Expr::Seq(items) => Expr::Seq(items.into_iter().map(|n| substitute_marker(n, replacement)).collect()),
        Expr::Let { name, value } => Expr::Let {
            name,
            value: Box::new(substitute_marker(*value, replacement)),
        },
        Expr::FnDef { name, params, body } => Expr::FnDef {
            name,
            params,
            body: Box::new(substitute_marker(*body, replacement)),
        },
        Expr::Lambda { params, body } => Expr::Lambda {
            params,
            body: Box::new(substitute_marker(*body, replacement)),
        },
        other => other,
    };
    Node::new(expr, span)
}

/// Shell mode: feed `$$` to the last top-level expression as if it were the
/// first pipeline stage.
fn inject_input(node: &mut Node) {
    let input = Node::new(Expr::Input, node.span);
    // not every shape can receive input (e.g. a bare literal); those stay as-is
    if let Ok(injected) = apply_stage(node.clone(), input) {
        *node = injected;
    }
}

fn walk(node: &Node, visit: &mut impl FnMut(&Node)) {
    visit(node);
    match &node.expr {
        Expr::Call { callee, args } => {
            walk(callee, visit);
            for arg in args {
                walk(arg, visit);
            }
        }
        Expr::If { cond, then, els } => {
            walk(cond, visit);
            walk(then, visit);
            walk(els, visit);
        }
        Expr::And(a, b) | Expr::Or(a, b) => {
            walk(a, visit);
            walk(b, visit);
        }
        Expr::Let { value, .. } => walk(value, visit),
        Expr::FnDef { body, .. } | Expr::Lambda { body, .. } => walk(body, visit),
        Expr::Effect { args, .. } => {
            for arg in args {
                walk(arg, visit);
            }
        }
        Expr::Seq(items) => {
            for item in items {
                walk(item, visit);
            }
        }
        _ => {}
    }
}
