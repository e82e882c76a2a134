//! Filter and pagination translation.
//!
//! Callers describe a query as `(column, operator, value)` triples plus a
//! page. Nothing reaches a storage backend until every column name (filters
//! and sort keys alike) has been checked against the entity's whitelist;
//! the result is a [`Filter`] / [`Page`] pair that backends turn into SQL or
//! evaluate in memory.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Value};

/// Page size used when a caller passes 0.
pub const DEFAULT_LIMIT: u32 = 10;

/// Sort applied when a caller passes none: newest id first.
pub const DEFAULT_SORT: &str = "-id";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("column name is empty")]
    EmptyColumn,

    #[error("column '{0}' is not allowed")]
    UnknownColumn(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("unknown logic '{0}'")]
    UnknownLogic(String),

    #[error("invalid value for column '{column}': {message}")]
    InvalidValue { column: String, message: String },
}

/// Comparison operator of a filter column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Operator {
    #[default]
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring match; the value is wrapped in `%…%` unless it already has a wildcard.
    Like,
    /// Membership in a comma-separated list.
    In,
}

impl Operator {
    fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
        }
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "=" | "eq" => Ok(Operator::Eq),
            "!=" | "<>" | "neq" => Ok(Operator::Neq),
            ">" | "gt" => Ok(Operator::Gt),
            ">=" | "gte" => Ok(Operator::Gte),
            "<" | "lt" => Ok(Operator::Lt),
            "<=" | "lte" => Ok(Operator::Lte),
            "like" => Ok(Operator::Like),
            "in" => Ok(Operator::In),
            other => Err(QueryError::UnknownOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = QueryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// How a column joins the one after it. AND binds tighter than OR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl FromStr for Logic {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "and" | "&" | "&&" => Ok(Logic::And),
            "or" | "|" | "||" => Ok(Logic::Or),
            other => Err(QueryError::UnknownLogic(other.to_string())),
        }
    }
}

impl TryFrom<String> for Logic {
    type Error = QueryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One filter triple as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default, rename = "exp")]
    pub op: Operator,
    pub value: Value,
    #[serde(default)]
    pub logic: Logic,
}

impl Column {
    /// An equality filter joined to the next column with AND.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Column {
            name: name.into(),
            op: Operator::Eq,
            value: value.into(),
            logic: Logic::And,
        }
    }

    pub fn op(mut self, op: Operator) -> Self {
        self.op = op;
        self
    }

    /// Join this column to the next one with OR.
    pub fn or(mut self) -> Self {
        self.logic = Logic::Or;
        self
    }
}

/// A condition list for single-record lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub columns: Vec<Column>,
}

impl Conditions {
    pub fn new(columns: Vec<Column>) -> Self {
        Conditions { columns }
    }

    /// Validate against `T`'s whitelist.
    pub fn to_filter<T: Entity>(&self) -> Result<Filter, QueryError> {
        Filter::build(&self.columns, T::COLUMNS)
    }
}

/// Paginated list query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// 0-based page number.
    pub page: u32,
    pub limit: u32,
    /// Comma-separated column names, `-` prefix for descending.
    pub sort: String,
    pub columns: Vec<Column>,
    /// Skip the count query; the returned total is then 0.
    pub skip_count: bool,
}

impl Params {
    pub fn new(page: u32, limit: u32) -> Self {
        Params {
            page,
            limit,
            ..Default::default()
        }
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = sort.into();
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn skip_count(mut self) -> Self {
        self.skip_count = true;
        self
    }

    /// Validate filters and sort keys against `T`'s whitelist.
    pub fn to_query<T: Entity>(&self) -> Result<(Filter, Page), QueryError> {
        let filter = Filter::build(&self.columns, T::COLUMNS)?;
        let page = Page::build(self.page, self.limit, &self.sort, T::COLUMNS)?;
        Ok((filter, page))
    }
}

/// A validated predicate.
///
/// Terms are grouped into OR-separated groups of AND-ed terms, matching SQL
/// precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    groups: Vec<Vec<Term>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    column: String,
    op: Operator,
    values: Vec<Value>,
}

impl Filter {
    /// Match every live row.
    pub fn all() -> Self {
        Filter::default()
    }

    /// A single trusted term; `column` must be a literal known column.
    pub(crate) fn term(column: &str, op: Operator, value: impl Into<Value>) -> Self {
        Filter {
            groups: vec![vec![Term {
                column: column.to_string(),
                op,
                values: vec![value.into()],
            }]],
        }
    }

    fn build(columns: &[Column], whitelist: &[&str]) -> Result<Self, QueryError> {
        let mut groups = Vec::new();
        let mut group = Vec::new();

        for column in columns {
            let name = column.name.trim();
            if name.is_empty() {
                return Err(QueryError::EmptyColumn);
            }
            if !whitelist.contains(&name) {
                return Err(QueryError::UnknownColumn(name.to_string()));
            }

            group.push(Term {
                column: name.to_string(),
                op: column.op,
                values: term_values(name, column.op, &column.value)?,
            });

            if column.logic == Logic::Or {
                groups.push(std::mem::take(&mut group));
            }
        }
        if !group.is_empty() {
            groups.push(group);
        }

        Ok(Filter { groups })
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Render as a SQL boolean expression with `?` placeholders, plus the
    /// values to bind in order. An empty filter renders as `1=1`.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        if self.groups.is_empty() {
            return ("1=1".to_string(), Vec::new());
        }

        let mut args = Vec::new();
        let groups: Vec<String> = self
            .groups
            .iter()
            .map(|group| {
                let terms: Vec<String> = group
                    .iter()
                    .map(|term| {
                        args.extend(term.values.iter().cloned());
                        match term.op {
                            Operator::In => {
                                let marks = vec!["?"; term.values.len()].join(", ");
                                format!("{} IN ({})", term.column, marks)
                            }
                            op => format!("{} {} ?", term.column, op.sql()),
                        }
                    })
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect();

        (groups.join(" OR "), args)
    }

    /// Evaluate against a record, with the same semantics as the SQL form.
    pub fn matches<T: Entity>(&self, record: &T) -> bool {
        self.groups.is_empty()
            || self.groups.iter().any(|group| {
                group.iter().all(|term| {
                    let Some(actual) = record.column(&term.column) else {
                        return false;
                    };
                    term.matches(&actual)
                })
            })
    }
}

impl Term {
    fn matches(&self, actual: &Value) -> bool {
        let Some(expected) = self.values.first() else {
            return false;
        };
        match self.op {
            Operator::Eq => compare(actual, expected) == Some(Ordering::Equal),
            Operator::Neq => matches!(compare(actual, expected), Some(o) if o != Ordering::Equal),
            Operator::Gt => compare(actual, expected) == Some(Ordering::Greater),
            Operator::Gte => matches!(compare(actual, expected), Some(o) if o != Ordering::Less),
            Operator::Lt => compare(actual, expected) == Some(Ordering::Less),
            Operator::Lte => {
                matches!(compare(actual, expected), Some(o) if o != Ordering::Greater)
            }
            Operator::Like => like(&actual.to_string(), &expected.to_string()),
            Operator::In => self
                .values
                .iter()
                .any(|v| compare(actual, v) == Some(Ordering::Equal)),
        }
    }
}

fn term_values(column: &str, op: Operator, value: &Value) -> Result<Vec<Value>, QueryError> {
    let invalid = |message: &str| QueryError::InvalidValue {
        column: column.to_string(),
        message: message.to_string(),
    };

    match op {
        Operator::Like => {
            let pattern = value
                .as_str()
                .ok_or_else(|| invalid("like expects a string"))?;
            let pattern = if pattern.contains('%') {
                pattern.to_string()
            } else {
                format!("%{}%", pattern)
            };
            Ok(vec![Value::Text(pattern)])
        }
        Operator::In => {
            let items: Vec<Value> = match value {
                Value::Text(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| {
                        item.parse::<i64>()
                            .map(Value::Int)
                            .unwrap_or_else(|_| Value::from(item))
                    })
                    .collect(),
                Value::Null => Vec::new(),
                single => vec![single.clone()],
            };
            if items.is_empty() {
                return Err(invalid("in expects a non-empty list"));
            }
            Ok(items)
        }
        _ if *value == Value::Null => Err(invalid("null is only comparable with is/is not")),
        _ => Ok(vec![value.clone()]),
    }
}

/// Loose comparison: numbers against numeric strings compare numerically,
/// timestamps against RFC 3339 strings compare as times.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Time(x), Value::Time(y)) => Some(x.cmp(y)),
        (Value::Time(x), Value::Text(y)) => chrono::DateTime::parse_from_rfc3339(y)
            .ok()
            .map(|y| x.cmp(&y.with_timezone(&chrono::Utc))),
        (Value::Text(_), Value::Time(_)) => compare(b, a).map(Ordering::reverse),
        (Value::Text(x), y) => match (x.parse::<i64>(), y.as_i64()) {
            (Ok(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.as_str().cmp(y.to_string().as_str())),
        },
        (x, Value::Text(_)) => compare(b, x).map(Ordering::reverse),
        (x, y) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    }
}

/// SQL LIKE: `%` any run, `_` any single char, ASCII case-insensitive.
fn like(text: &str, pattern: &str) -> bool {
    fn go(t: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some(('%', rest)) => (0..=t.len()).any(|i| go(&t[i..], rest)),
            Some((&pc, rest)) => match t.split_first() {
                Some((&tc, t_rest)) => {
                    (pc == '_' || pc.eq_ignore_ascii_case(&tc)) && go(t_rest, rest)
                }
                None => false,
            },
        }
    }
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    go(&t, &p)
}

/// Validated pagination: offset/limit and a whitelisted sort order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    page: u32,
    limit: u32,
    order: Vec<(String, Direction)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Page {
    /// Validate a page against `T`'s whitelist.
    pub fn new<T: Entity>(page: u32, limit: u32, sort: &str) -> Result<Self, QueryError> {
        Self::build(page, limit, sort, T::COLUMNS)
    }

    fn build(page: u32, limit: u32, sort: &str, whitelist: &[&str]) -> Result<Self, QueryError> {
        let sort = if sort.trim().is_empty() {
            DEFAULT_SORT
        } else {
            sort
        };

        let mut order = Vec::new();
        for key in sort.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            let (name, direction) = match key.strip_prefix('-') {
                Some(name) => (name.trim(), Direction::Desc),
                None => (key.trim_start_matches('+').trim(), Direction::Asc),
            };
            if !whitelist.contains(&name) {
                return Err(QueryError::UnknownColumn(name.to_string()));
            }
            order.push((name.to_string(), direction));
        }
        if order.is_empty() {
            order.push(("id".to_string(), Direction::Desc));
        }

        Ok(Page {
            page,
            limit: if limit == 0 { DEFAULT_LIMIT } else { limit },
            order,
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }

    pub fn order(&self) -> &[(String, Direction)] {
        &self.order
    }

    /// `ORDER BY` body, e.g. `id DESC, name ASC`.
    pub fn order_by(&self) -> String {
        self.order
            .iter()
            .map(|(column, direction)| format!("{} {}", column, direction))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Sort records in place the way `ORDER BY` would.
    pub fn sort_records<T: Entity>(&self, records: &mut [T]) {
        records.sort_by(|a, b| {
            for (column, direction) in &self.order {
                let ordering = match (a.column(column), b.column(column)) {
                    (Some(x), Some(y)) => compare(&x, &y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => f.write_str("ASC"),
            Direction::Desc => f.write_str("DESC"),
        }
    }
}
