//! Statement AST for the InfluxQL subset the proxy understands
//!
//! `Display` renders canonical InfluxQL; that rendering is also the text sent to shards
//! as a sub-query.

use crate::model::DataType;
use std::fmt;

/// A parsed query: one or more statements separated by `;`
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub statements: Vec<Statement>,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    ShowDatabases,
    ShowMeasurements,
    ShowFieldKeys { sources: Vec<String> },
    ShowTagKeys { sources: Vec<String> },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(stmt) => write!(f, "{}", stmt),
            Statement::ShowDatabases => f.write_str("SHOW DATABASES"),
            Statement::ShowMeasurements => f.write_str("SHOW MEASUREMENTS"),
            Statement::ShowFieldKeys { sources } => {
                f.write_str("SHOW FIELD KEYS")?;
                write_sources(f, sources)
            }
            Statement::ShowTagKeys { sources } => {
                f.write_str("SHOW TAG KEYS")?;
                write_sources(f, sources)
            }
        }
    }
}

fn write_sources(f: &mut fmt::Formatter<'_>, sources: &[String]) -> fmt::Result {
    if sources.is_empty() {
        return Ok(());
    }
    f.write_str(" FROM ")?;
    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&quote_ident(source))?;
    }
    Ok(())
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub fields: Vec<Field>,
    pub sources: Vec<String>,
    pub condition: Option<Expr>,
    pub dimensions: Vec<Dimension>,
    pub fill: Fill,
    pub ascending: bool,
    pub limit: usize,
    pub offset: usize,
    pub slimit: usize,
    pub soffset: usize,
}

impl Default for SelectStatement {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            sources: Vec::new(),
            condition: None,
            dimensions: Vec::new(),
            fill: Fill::Null,
            ascending: true,
            limit: 0,
            offset: 0,
            slimit: 0,
            soffset: 0,
        }
    }
}

impl SelectStatement {
    /// Output column names: `time` followed by one column per field
    pub fn column_names(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.fields.len() + 1);
        columns.push("time".to_string());
        columns.extend(self.fields.iter().map(Field::name));
        columns
    }

    /// True when at least one field is an aggregate call
    pub fn has_calls(&self) -> bool {
        self.fields.iter().any(|f| matches!(f.expr, Expr::Call { .. }))
    }

    /// GROUP BY time() interval in nanoseconds, if any
    pub fn interval(&self) -> Option<i64> {
        self.dimensions.iter().find_map(|d| match d {
            Dimension::Time { interval } => Some(*interval),
            _ => None,
        })
    }

    /// Bounds on `time` implied by the WHERE clause
    pub fn time_range(&self) -> TimeRange {
        let mut range = TimeRange::default();
        if let Some(condition) = &self.condition {
            collect_time_bounds(condition, &mut range);
        }
        range
    }

    /// Tag names in GROUP BY, in statement order
    pub fn tag_dimensions(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .filter_map(|d| match d {
                Dimension::Tag(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Inclusive nanosecond bounds on `time`; `None` leaves that side open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl TimeRange {
    fn raise_min(&mut self, t: i64) {
        self.min = Some(self.min.map_or(t, |min| min.max(t)));
    }

    fn lower_max(&mut self, t: i64) {
        self.max = Some(self.max.map_or(t, |max| max.min(t)));
    }
}

/// Only comparisons joined by AND narrow the range. Anything under an OR, or compared
/// against an expression such as `now() - 1h`, is ignored.
fn collect_time_bounds(expr: &Expr, range: &mut TimeRange) {
    match expr {
        Expr::Paren(inner) => collect_time_bounds(inner, range),
        Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => {
            collect_time_bounds(lhs, range);
            collect_time_bounds(rhs, range);
        }
        Expr::Binary { op, lhs, rhs } => {
            let (op, t) = if is_time_ref(lhs) {
                match time_literal(rhs) {
                    Some(t) => (*op, t),
                    None => return,
                }
            } else if is_time_ref(rhs) {
                match (time_literal(lhs), op.flipped()) {
                    (Some(t), Some(op)) => (op, t),
                    _ => return,
                }
            } else {
                return;
            };
            match op {
                BinaryOp::Gt => range.raise_min(t.saturating_add(1)),
                BinaryOp::Gte => range.raise_min(t),
                BinaryOp::Lt => range.lower_max(t.saturating_sub(1)),
                BinaryOp::Lte => range.lower_max(t),
                BinaryOp::Eq => {
                    range.raise_min(t);
                    range.lower_max(t);
                }
                _ => {}
            }
        }
        _ => {}
    }
}

fn is_time_ref(expr: &Expr) -> bool {
    matches!(expr, Expr::VarRef { name, .. } if name.eq_ignore_ascii_case("time"))
}

/// Integers and durations are nanoseconds; strings are RFC3339 timestamps
fn time_literal(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Integer(t) | Expr::Duration(t) => Some(*t),
        Expr::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(|dt| dt.timestamp_nanos_opt()),
        Expr::Paren(inner) => time_literal(inner),
        _ => None,
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", field)?;
        }
        write_sources(f, &self.sources)?;
        if let Some(cond) = &self.condition {
            write!(f, " WHERE {}", cond)?;
        }
        if !self.dimensions.is_empty() {
            f.write_str(" GROUP BY ")?;
            for (i, dim) in self.dimensions.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", dim)?;
            }
        }
        if self.fill != Fill::Null {
            write!(f, " fill({})", self.fill)?;
        }
        if !self.ascending {
            f.write_str(" ORDER BY time DESC")?;
        }
        if self.limit > 0 {
            write!(f, " LIMIT {}", self.limit)?;
        }
        if self.offset > 0 {
            write!(f, " OFFSET {}", self.offset)?;
        }
        if self.slimit > 0 {
            write!(f, " SLIMIT {}", self.slimit)?;
        }
        if self.soffset > 0 {
            write!(f, " SOFFSET {}", self.soffset)?;
        }
        Ok(())
    }
}

/// One projected field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Field {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    /// Output column name: the alias, else the var ref or function name
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            Expr::VarRef { name, .. } => name.clone(),
            Expr::Call { name, .. } => name.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", quote_ident(alias))?;
        }
        Ok(())
    }
}

/// GROUP BY dimension
#[derive(Debug, Clone, PartialEq)]
pub enum Dimension {
    Tag(String),
    Wildcard,
    /// `time(<interval>)`, interval in nanoseconds
    Time { interval: i64 },
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Tag(name) => f.write_str(&quote_ident(name)),
            Dimension::Wildcard => f.write_str("*"),
            Dimension::Time { interval } => write!(f, "time({})", format_duration(*interval)),
        }
    }
}

/// Fill policy for empty GROUP BY time() windows
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    Null,
    None,
    Previous,
    Number(f64),
}

impl fmt::Display for Fill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fill::Null => f.write_str("null"),
            Fill::None => f.write_str("none"),
            Fill::Previous => f.write_str("previous"),
            Fill::Number(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    /// Operator with its operands swapped, for comparisons
    pub fn flipped(&self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Eq,
            BinaryOp::Neq => BinaryOp::Neq,
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Lte => BinaryOp::Gte,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Gte => BinaryOp::Lte,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    VarRef { name: String, data_type: Option<DataType> },
    Call { name: String, args: Vec<Expr> },
    Wildcard,
    Number(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
    /// Duration literal in nanoseconds
    Duration(i64),
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Paren(Box<Expr>),
}

impl Expr {
    pub fn var_ref(name: impl Into<String>) -> Self {
        Expr::VarRef {
            name: name.into(),
            data_type: None,
        }
    }

    /// Name of the var ref this expression is or wraps, for calls the first argument
    pub fn var_ref_name(&self) -> Option<&str> {
        match self {
            Expr::VarRef { name, .. } => Some(name),
            Expr::Call { args, .. } => args.first().and_then(Expr::var_ref_name),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::VarRef { name, data_type } => {
                f.write_str(&quote_ident(name))?;
                if let Some(dt) = data_type {
                    write!(f, "::{}", dt)?;
                }
                Ok(())
            }
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Wildcard => f.write_str("*"),
            Expr::Number(v) => write!(f, "{:?}", v),
            Expr::Integer(v) => write!(f, "{}", v),
            Expr::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Expr::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
            Expr::Duration(d) => f.write_str(&format_duration(*d)),
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op.as_str(), rhs),
            Expr::Paren(inner) => write!(f, "({})", inner),
        }
    }
}

/// InfluxQL reserved words; identifiers spelled like one are quoted on the wire
const KEYWORDS: &[&str] = &[
    "all", "alter", "analyze", "and", "any", "as", "asc", "begin", "by", "cardinality",
    "continuous", "create", "database", "databases", "default", "delete", "desc",
    "destinations", "diagnostics", "distinct", "drop", "duration", "end", "every", "exact",
    "explain", "false", "field", "fill", "for", "from", "grant", "grants", "group", "groups",
    "in", "inf", "insert", "into", "key", "keys", "kill", "limit", "measurement",
    "measurements", "name", "offset", "on", "or", "order", "password", "policies", "policy",
    "privileges", "queries", "query", "read", "replication", "resample", "retention",
    "revoke", "select", "series", "set", "shard", "shards", "show", "slimit", "soffset",
    "stats", "subscription", "subscriptions", "tag", "to", "true", "user", "users", "values",
    "where", "with", "write",
];

/// Quote an identifier unless it is a plain, non-keyword name
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&name.to_ascii_lowercase().as_str());
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Render nanoseconds with the largest unit that divides evenly
pub fn format_duration(nanos: i64) -> String {
    const UNITS: &[(i64, &str)] = &[
        (7 * 24 * 3_600_000_000_000, "w"),
        (24 * 3_600_000_000_000, "d"),
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "u"),
    ];
    if nanos == 0 {
        return "0s".to_string();
    }
    for (size, unit) in UNITS {
        if nanos % size == 0 {
            return format!("{}{}", nanos / size, unit);
        }
    }
    format!("{}ns", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_select_with_all_clauses() {
        let stmt = SelectStatement {
            fields: vec![Field::new(Expr::var_ref("value"))],
            sources: vec!["cpu".to_string()],
            condition: Some(Expr::Binary {
                op: BinaryOp::Eq,
                lhs: Box::new(Expr::var_ref("host")),
                rhs: Box::new(Expr::String("a'b".to_string())),
            }),
            dimensions: vec![Dimension::Tag("region".to_string())],
            ascending: false,
            limit: 10,
            ..Default::default()
        };

        assert_eq!(
            stmt.to_string(),
            "SELECT value FROM cpu WHERE host = 'a\\'b' GROUP BY region ORDER BY time DESC LIMIT 10"
        );
    }

    #[test]
    fn quotes_keywords_and_odd_names() {
        assert_eq!(quote_ident("cpu"), "cpu");
        assert_eq!(quote_ident("select"), "\"select\"");
        assert_eq!(quote_ident("disk io"), "\"disk io\"");
        for reserved in ["key", "name", "in", "into", "on", "Series"] {
            assert_eq!(quote_ident(reserved), format!("\"{}\"", reserved));
        }
    }

    #[test]
    fn durations_use_largest_unit() {
        assert_eq!(format_duration(60_000_000_000), "1m");
        assert_eq!(format_duration(90_000_000_000), "90s");
        assert_eq!(format_duration(1_500), "1500ns");
    }

    #[test]
    fn column_names_use_alias_or_name() {
        let stmt = SelectStatement {
            fields: vec![
                Field::new(Expr::Call {
                    name: "mean".to_string(),
                    args: vec![Expr::var_ref("value")],
                }),
                Field {
                    expr: Expr::var_ref("idle"),
                    alias: Some("free".to_string()),
                },
            ],
            ..Default::default()
        };
        assert_eq!(stmt.column_names(), vec!["time", "mean", "free"]);
    }
}
