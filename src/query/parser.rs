//! InfluxQL tokenizer and recursive-descent parser
//!
//! Covers SELECT, SHOW DATABASES, SHOW MEASUREMENTS, SHOW FIELD KEYS and SHOW TAG KEYS.

use super::ast::{BinaryOp, Dimension, Expr, Field, Fill, Query, SelectStatement, Statement};
use crate::model::DataType;
use crate::{Error, Result};
use std::iter::Peekable;
use std::str::CharIndices;

/// Parse query text into one or more statements
pub fn parse_query(text: &str) -> Result<Query> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut statements = Vec::new();

    loop {
        while parser.eat(&TokenKind::Semicolon) {}
        if parser.at_eof() {
            break;
        }
        statements.push(parser.statement()?);
        if !parser.at_eof() && !parser.eat(&TokenKind::Semicolon) {
            return Err(parser.unexpected("';' or end of query"));
        }
    }

    if statements.is_empty() {
        return Err(Error::Parse("empty query".to_string()));
    }
    Ok(Query { statements })
}

/// Parse exactly one statement
pub fn parse_statement(text: &str) -> Result<Statement> {
    let mut query = parse_query(text)?;
    if query.statements.len() != 1 {
        return Err(Error::Parse(format!(
            "expected one statement, found {}",
            query.statements.len()
        )));
    }
    Ok(query.statements.remove(0))
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident { value: String, quoted: bool },
    Str(String),
    Number(f64),
    Integer(i64),
    Duration(i64),
    Star,
    Comma,
    Semicolon,
    LParen,
    RParen,
    DoubleColon,
    Plus,
    Minus,
    Slash,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if eof {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }

        let Some((offset, ch)) = self.chars.next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset: self.source.len(),
            });
        };

        let kind = match ch {
            'a'..='z' | 'A'..='Z' | '_' => {
                let value = self.take_while(offset, |c| c.is_ascii_alphanumeric() || c == '_');
                TokenKind::Ident {
                    value: value.to_string(),
                    quoted: false,
                }
            }
            '0'..='9' | '.' => self.number(offset)?,
            '"' => TokenKind::Ident {
                value: self.quoted(offset, '"')?,
                quoted: true,
            },
            '\'' => TokenKind::Str(self.quoted(offset, '\'')?),
            '*' => TokenKind::Star,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '/' => TokenKind::Slash,
            '=' => TokenKind::Eq,
            ':' if self.bump_if(':') => TokenKind::DoubleColon,
            '!' if self.bump_if('=') => TokenKind::Neq,
            '<' if self.bump_if('=') => TokenKind::Lte,
            '<' if self.bump_if('>') => TokenKind::Neq,
            '<' => TokenKind::Lt,
            '>' if self.bump_if('=') => TokenKind::Gte,
            '>' => TokenKind::Gt,
            other => {
                return Err(Error::Parse(format!(
                    "unexpected character '{}' at position {}",
                    other, offset
                )))
            }
        };

        Ok(Token { kind, offset })
    }

    fn bump_if(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some((_, c)) if *c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        let mut end = self.source.len();
        while let Some(&(idx, c)) = self.chars.peek() {
            if !pred(c) {
                end = idx;
                break;
            }
            self.chars.next();
        }
        &self.source[start..end]
    }

    fn quoted(&mut self, offset: usize, quote: char) -> Result<String> {
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => match self.chars.next() {
                    Some((_, next)) => out.push(next),
                    None => break,
                },
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(Error::Parse(format!(
            "unterminated {} at position {}",
            if quote == '"' { "identifier" } else { "string" },
            offset
        )))
    }

    fn number(&mut self, offset: usize) -> Result<TokenKind> {
        let digits = self.take_while(offset, |c| c.is_ascii_digit() || c == '.');
        // exponent, e.g. 1e9 or 2.5E-3
        let mut text = digits.to_string();
        if let Some(&(_, e @ ('e' | 'E'))) = self.chars.peek() {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            let signed = matches!(lookahead.peek(), Some((_, '+' | '-')));
            if signed {
                lookahead.next();
            }
            if matches!(lookahead.peek(), Some((_, c)) if c.is_ascii_digit()) {
                self.chars.next();
                text.push(e);
                if signed {
                    if let Some((_, sign)) = self.chars.next() {
                        text.push(sign);
                    }
                }
                while let Some(&(_, c)) = self.chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    text.push(c);
                    self.chars.next();
                }
            }
        }

        let unit_start = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.source.len());
        let unit = self.take_while(unit_start, |c| c.is_alphabetic());
        if !unit.is_empty() {
            let value: i64 = text
                .parse()
                .map_err(|_| Error::Parse(format!("invalid duration '{}{}'", text, unit)))?;
            let scale = duration_unit(unit)
                .ok_or_else(|| Error::Parse(format!("invalid duration unit '{}'", unit)))?;
            return value
                .checked_mul(scale)
                .map(TokenKind::Duration)
                .ok_or_else(|| Error::Parse(format!("overflowed duration '{}{}'", text, unit)));
        }

        if text.contains(['.', 'e', 'E']) {
            match text.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(TokenKind::Number(n)),
                Ok(_) => Err(Error::Parse(format!("number '{}' out of range", text))),
                Err(_) => Err(Error::Parse(format!("invalid number '{}'", text))),
            }
        } else {
            text.parse::<i64>()
                .map(TokenKind::Integer)
                .map_err(|_| Error::Parse(format!("invalid integer '{}'", text)))
        }
    }
}

fn duration_unit(unit: &str) -> Option<i64> {
    Some(match unit {
        "ns" => 1,
        "u" | "µ" | "us" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60_000_000_000,
        "h" => 3_600_000_000_000,
        "d" => 86_400_000_000_000,
        "w" => 604_800_000_000_000,
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        let idx = self.pos.min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident { value, quoted: false } if value.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword))
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        let found = match &token.kind {
            TokenKind::Eof => "end of query".to_string(),
            TokenKind::Ident { value, .. } => format!("'{}'", value),
            other => format!("{:?}", other),
        };
        Error::Parse(format!(
            "found {}, expected {} at position {}",
            found, expected, token.offset
        ))
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        match self.peek().clone() {
            TokenKind::Ident { value, .. } => {
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn unsigned(&mut self, what: &str) -> Result<usize> {
        match self.peek().clone() {
            TokenKind::Integer(n) if n >= 0 => {
                self.advance();
                Ok(n as usize)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn statement(&mut self) -> Result<Statement> {
        if self.eat_keyword("select") {
            return self.select().map(Statement::Select);
        }
        if self.eat_keyword("show") {
            if self.eat_keyword("databases") {
                return Ok(Statement::ShowDatabases);
            }
            if self.eat_keyword("measurements") {
                return Ok(Statement::ShowMeasurements);
            }
            if self.eat_keyword("field") {
                self.expect_keyword("keys")?;
                let sources = self.optional_from()?;
                return Ok(Statement::ShowFieldKeys { sources });
            }
            if self.eat_keyword("tag") {
                self.expect_keyword("keys")?;
                let sources = self.optional_from()?;
                return Ok(Statement::ShowTagKeys { sources });
            }
            return Err(self.unexpected("DATABASES, MEASUREMENTS, FIELD KEYS or TAG KEYS"));
        }
        Err(self.unexpected("SELECT or SHOW"))
    }

    fn optional_from(&mut self) -> Result<Vec<String>> {
        if self.eat_keyword("from") {
            self.sources()
        } else {
            Ok(Vec::new())
        }
    }

    fn sources(&mut self) -> Result<Vec<String>> {
        let mut sources = vec![self.ident("measurement")?];
        while self.eat(&TokenKind::Comma) {
            sources.push(self.ident("measurement")?);
        }
        Ok(sources)
    }

    fn select(&mut self) -> Result<SelectStatement> {
        let mut stmt = SelectStatement {
            fields: self.fields()?,
            ..Default::default()
        };

        self.expect_keyword("from")?;
        stmt.sources = self.sources()?;

        if self.eat_keyword("where") {
            stmt.condition = Some(self.expr()?);
        }
        if self.eat_keyword("group") {
            self.expect_keyword("by")?;
            stmt.dimensions = self.dimensions()?;
        }
        if self.eat_keyword("fill") {
            stmt.fill = self.fill()?;
        }
        if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            let column = self.ident("time")?;
            if !column.eq_ignore_ascii_case("time") {
                return Err(Error::Parse(format!(
                    "only ORDER BY time supported, found '{}'",
                    column
                )));
            }
            if self.eat_keyword("desc") {
                stmt.ascending = false;
            } else {
                self.eat_keyword("asc");
            }
        }
        if self.eat_keyword("limit") {
            stmt.limit = self.unsigned("LIMIT value")?;
        }
        if self.eat_keyword("offset") {
            stmt.offset = self.unsigned("OFFSET value")?;
        }
        if self.eat_keyword("slimit") {
            stmt.slimit = self.unsigned("SLIMIT value")?;
        }
        if self.eat_keyword("soffset") {
            stmt.soffset = self.unsigned("SOFFSET value")?;
        }
        Ok(stmt)
    }

    fn fields(&mut self) -> Result<Vec<Field>> {
        let mut fields = vec![self.field()?];
        while self.eat(&TokenKind::Comma) {
            fields.push(self.field()?);
        }
        Ok(fields)
    }

    fn field(&mut self) -> Result<Field> {
        let expr = if self.eat(&TokenKind::Star) {
            Expr::Wildcard
        } else {
            self.expr()?
        };
        let alias = if self.eat_keyword("as") {
            Some(self.ident("alias")?)
        } else {
            None
        };
        Ok(Field { expr, alias })
    }

    fn dimensions(&mut self) -> Result<Vec<Dimension>> {
        let mut dims = vec![self.dimension()?];
        while self.eat(&TokenKind::Comma) {
            dims.push(self.dimension()?);
        }
        Ok(dims)
    }

    fn dimension(&mut self) -> Result<Dimension> {
        if self.eat(&TokenKind::Star) {
            return Ok(Dimension::Wildcard);
        }
        if self.is_keyword("time") && *self.peek_at(1) == TokenKind::LParen {
            self.advance();
            self.advance();
            let interval = match self.advance() {
                TokenKind::Duration(d) if d > 0 => d,
                _ => return Err(Error::Parse("time() requires a positive duration".to_string())),
            };
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(Dimension::Time { interval });
        }
        self.ident("dimension").map(Dimension::Tag)
    }

    fn fill(&mut self) -> Result<Fill> {
        self.expect(TokenKind::LParen, "'('")?;
        let negative = self.eat(&TokenKind::Minus);
        let sign = if negative { -1.0 } else { 1.0 };
        let fill = match self.advance() {
            TokenKind::Ident { value, quoted: false } if !negative => {
                match value.to_ascii_lowercase().as_str() {
                    "null" => Fill::Null,
                    "none" => Fill::None,
                    "previous" => Fill::Previous,
                    other => return Err(Error::Parse(format!("unknown fill option '{}'", other))),
                }
            }
            TokenKind::Integer(n) => Fill::Number(sign * n as f64),
            TokenKind::Number(n) => Fill::Number(sign * n),
            _ => return Err(Error::Parse("invalid fill option".to_string())),
        };
        self.expect(TokenKind::RParen, "')'")?;
        Ok(fill)
    }

    fn expr(&mut self) -> Result<Expr> {
        self.binary(0)
    }

    /// Precedence climbing: OR < AND < comparison < additive < multiplicative
    fn binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        Some(match self.peek() {
            TokenKind::Ident { value, quoted: false } if value.eq_ignore_ascii_case("or") => {
                (BinaryOp::Or, 1)
            }
            TokenKind::Ident { value, quoted: false } if value.eq_ignore_ascii_case("and") => {
                (BinaryOp::And, 2)
            }
            TokenKind::Eq => (BinaryOp::Eq, 3),
            TokenKind::Neq => (BinaryOp::Neq, 3),
            TokenKind::Lt => (BinaryOp::Lt, 3),
            TokenKind::Lte => (BinaryOp::Lte, 3),
            TokenKind::Gt => (BinaryOp::Gt, 3),
            TokenKind::Gte => (BinaryOp::Gte, 3),
            TokenKind::Plus => (BinaryOp::Add, 4),
            TokenKind::Minus => (BinaryOp::Sub, 4),
            TokenKind::Star => (BinaryOp::Mul, 5),
            TokenKind::Slash => (BinaryOp::Div, 5),
            _ => return None,
        })
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            return match self.advance() {
                TokenKind::Integer(n) => Ok(Expr::Integer(-n)),
                TokenKind::Number(n) => Ok(Expr::Number(-n)),
                TokenKind::Duration(d) => Ok(Expr::Duration(-d)),
                _ => Err(Error::Parse("'-' must precede a numeric literal".to_string())),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expr::Integer(n))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Duration(d) => {
                self.advance();
                Ok(Expr::Duration(d))
            }
            TokenKind::Ident { value, quoted } => {
                self.advance();
                if !quoted && *self.peek() == TokenKind::LParen {
                    return self.call(value.to_ascii_lowercase());
                }
                if !quoted && value.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Boolean(true));
                }
                if !quoted && value.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Boolean(false));
                }
                let data_type = if self.eat(&TokenKind::DoubleColon) {
                    self.data_type()?
                } else {
                    None
                };
                Ok(Expr::VarRef {
                    name: value,
                    data_type,
                })
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                if self.eat(&TokenKind::Star) {
                    args.push(Expr::Wildcard);
                } else {
                    args.push(self.expr()?);
                }
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(TokenKind::Comma, "',' or ')'")?;
            }
        }
        Ok(Expr::Call { name, args })
    }

    fn data_type(&mut self) -> Result<Option<DataType>> {
        let name = self.ident("data type")?;
        match name.to_ascii_lowercase().as_str() {
            "float" => Ok(Some(DataType::Float)),
            "integer" => Ok(Some(DataType::Integer)),
            "string" => Ok(Some(DataType::String)),
            "boolean" => Ok(Some(DataType::Boolean)),
            "tag" => Ok(Some(DataType::Tag)),
            "field" => Ok(None),
            other => Err(Error::Parse(format!("unknown data type '{}'", other))),
        }
    }
}
