//! # Query Descriptors
//!
//! A [`QueryDescriptor`] names the table or view, the column the chunk's identifiers
//! filter on, what to select, and an optional extra predicate. It renders to a single
//! parameterized statement that is executed once per chunk:
//!
//! ```sql
//! SELECT <projection> FROM <table> WHERE <filter_column> = ANY($1) [AND <column> <op> $2]
//! ```
//!
//! Table and column names are validated and quoted; values are always bound.

use crate::batch::accumulator::AccumulationMode;
use crate::error::QueryError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("identifier pattern is a valid regex")
    })
}

/// Validate and double-quote a (optionally schema-qualified) SQL identifier
pub fn quote_identifier(name: &str) -> Result<String, QueryError> {
    if !identifier_pattern().is_match(name) {
        return Err(QueryError::invalid_descriptor(format!(
            "Invalid SQL identifier: {name:?}"
        )));
    }

    Ok(name
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join("."))
}

/// What each chunk query selects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum Projection {
    /// Number of matching rows
    Count,
    /// Number of distinct values of the filter column among matching rows.
    ///
    /// Counts are summed across chunks, so the column must be the filter column. Other
    /// columns go through [`Projection::Distinct`] and a union.
    CountDistinct(String),
    /// The distinct values of a column among matching rows
    Distinct(String),
}

impl Projection {
    /// Whether the query returns identifier rows rather than a scalar count
    pub fn returns_rows(&self) -> bool {
        matches!(self, Self::Distinct(_))
    }

    fn to_sql(&self) -> Result<String, QueryError> {
        match self {
            Self::Count => Ok("COUNT(*) AS value".to_string()),
            Self::CountDistinct(column) => {
                Ok(format!("COUNT(DISTINCT {}) AS value", quote_identifier(column)?))
            }
            Self::Distinct(column) => Ok(format!("DISTINCT {} AS value", quote_identifier(column)?)),
        }
    }
}

/// Comparison operator of an extra predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Whether the operator compares against a bound value
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A value bound as `$2` for the extra predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PredicateValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for PredicateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PredicateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PredicateValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PredicateValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PredicateValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for PredicateValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Additional `column operator value` restriction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Option<PredicateValue>,
}

impl Predicate {
    pub fn new<S, V>(column: S, operator: Operator, value: V) -> Self
    where
        S: Into<String>,
        V: Into<PredicateValue>,
    {
        Self {
            column: column.into(),
            operator,
            value: Some(value.into()),
        }
    }

    pub fn eq<S: Into<String>, V: Into<PredicateValue>>(column: S, value: V) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    pub fn gte<S: Into<String>, V: Into<PredicateValue>>(column: S, value: V) -> Self {
        Self::new(column, Operator::Gte, value)
    }

    pub fn is_null<S: Into<String>>(column: S) -> Self {
        Self {
            column: column.into(),
            operator: Operator::IsNull,
            value: None,
        }
    }

    pub fn is_not_null<S: Into<String>>(column: S) -> Self {
        Self {
            column: column.into(),
            operator: Operator::IsNotNull,
            value: None,
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        quote_identifier(&self.column)?;
        match (self.operator.takes_value(), &self.value) {
            (true, None) => Err(QueryError::invalid_descriptor(format!(
                "Operator {} on {} requires a value",
                self.operator, self.column
            ))),
            (false, Some(_)) => Err(QueryError::invalid_descriptor(format!(
                "Operator {} on {} does not take a value",
                self.operator, self.column
            ))),
            _ => Ok(()),
        }
    }

    fn to_sql(&self) -> Result<String, QueryError> {
        let column = quote_identifier(&self.column)?;
        if self.operator.takes_value() {
            Ok(format!("{} {} $2", column, self.operator.as_sql()))
        } else {
            Ok(format!("{} {}", column, self.operator.as_sql()))
        }
    }
}

/// Per-chunk query request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub table_or_view: String,
    pub filter_column: String,
    pub projection: Projection,
    #[serde(default)]
    pub extra_predicate: Option<Predicate>,
    /// Overrides the configured chunk size for this table
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl QueryDescriptor {
    /// Count rows of `table_or_view` whose `filter_column` is in the chunk
    pub fn count<T: Into<String>, C: Into<String>>(table_or_view: T, filter_column: C) -> Self {
        Self {
            table_or_view: table_or_view.into(),
            filter_column: filter_column.into(),
            projection: Projection::Count,
            extra_predicate: None,
            chunk_size: None,
        }
    }

    /// Count distinct values of `column` among rows matching the chunk
    pub fn count_distinct<T, C, D>(table_or_view: T, filter_column: C, column: D) -> Self
    where
        T: Into<String>,
        C: Into<String>,
        D: Into<String>,
    {
        Self {
            projection: Projection::CountDistinct(column.into()),
            ..Self::count(table_or_view, filter_column)
        }
    }

    /// Select distinct values of `column` among rows matching the chunk
    pub fn distinct<T, C, D>(table_or_view: T, filter_column: C, column: D) -> Self
    where
        T: Into<String>,
        C: Into<String>,
        D: Into<String>,
    {
        Self {
            projection: Projection::Distinct(column.into()),
            ..Self::count(table_or_view, filter_column)
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.extra_predicate = Some(predicate);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Accumulation mode that matches the projection
    pub fn accumulation_mode(&self) -> AccumulationMode {
        if self.projection.returns_rows() {
            AccumulationMode::Union
        } else {
            AccumulationMode::Sum
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        quote_identifier(&self.table_or_view)?;
        quote_identifier(&self.filter_column)?;
        self.projection.to_sql()?;
        if let Projection::CountDistinct(column) = &self.projection {
            if column != &self.filter_column {
                return Err(QueryError::invalid_descriptor(format!(
                    "count_distinct on {column} would double count across chunks of {}; \
                     use a distinct projection on {column} instead",
                    self.table_or_view
                )));
            }
        }
        if let Some(predicate) = &self.extra_predicate {
            predicate.validate()?;
        }
        if self.chunk_size == Some(0) {
            return Err(QueryError::invalid_descriptor(format!(
                "chunk_size override for {} must be at least 1",
                self.table_or_view
            )));
        }
        Ok(())
    }

    /// Render the parameterized statement; `$1` is the chunk's identifier array
    pub fn to_sql(&self) -> Result<String, QueryError> {
        self.validate()?;

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ANY($1)",
            self.projection.to_sql()?,
            quote_identifier(&self.table_or_view)?,
            quote_identifier(&self.filter_column)?
        );

        if let Some(predicate) = &self.extra_predicate {
            sql.push_str(" AND ");
            sql.push_str(&predicate.to_sql()?);
        }

        Ok(sql)
    }
}
