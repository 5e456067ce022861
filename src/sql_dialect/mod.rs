//! SQL syntax primitives for each target database.
//!
//! A [`Dialect`] only knows how to *say* things: how to pull a value out of
//! a JSON document, how to enumerate an array, how to cast safely. Which
//! value to extract and when is decided by the translator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod duckdb;
mod postgres;

pub use duckdb::DuckDbDialect;
pub use postgres::PostgresDialect;

/// Native SQL value categories the translator works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlScalar {
    Boolean,
    Integer,
    Decimal,
    String,
    Date,
    DateTime,
    Time,
}

/// Value shapes reported by the document format's own type introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

/// Target database selection. Resolved once into a [`Dialect`] object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    DuckDb,
    #[serde(alias = "postgresql")]
    Postgres,
}

impl DialectKind {
    pub fn create(&self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::DuckDb => Arc::new(DuckDbDialect::new()),
            DialectKind::Postgres => Arc::new(PostgresDialect::new()),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::DuckDb => write!(f, "duckdb"),
            DialectKind::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown SQL dialect '{0}' (expected 'duckdb' or 'postgres')")]
pub struct UnknownDialect(pub String);

impl FromStr for DialectKind {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" => Ok(DialectKind::DuckDb),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}

/// Render a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Evaluate `expr` once and render `body` over the bound value, so the
/// result contains the text of `expr` exactly once.
pub(crate) fn bind_once(expr: &str, body: impl FnOnce(&str) -> String) -> String {
    format!("(SELECT {} FROM (SELECT {} AS v) AS _bound)", body("_bound.v"), expr)
}

pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    // ---- JSON extraction -------------------------------------------------

    /// JSON value at `path` below `expr`; an empty path returns `expr`.
    fn extract_json(&self, expr: &str, path: &[String]) -> String;

    /// Text of the JSON value at `path` (unquoted for JSON strings).
    fn extract_string(&self, expr: &str, path: &[String]) -> String;

    fn extract_integer(&self, expr: &str, path: &[String]) -> String {
        self.try_cast(&self.extract_string(expr, path), SqlScalar::Integer)
    }

    fn extract_decimal(&self, expr: &str, path: &[String]) -> String {
        self.try_cast(&self.extract_string(expr, path), SqlScalar::Decimal)
    }

    fn extract_boolean(&self, expr: &str, path: &[String]) -> String {
        self.try_cast(&self.extract_string(expr, path), SqlScalar::Boolean)
    }

    fn extract_scalar(&self, expr: &str, path: &[String], scalar: SqlScalar) -> String {
        match scalar {
            SqlScalar::String => self.extract_string(expr, path),
            SqlScalar::Integer => self.extract_integer(expr, path),
            SqlScalar::Decimal => self.extract_decimal(expr, path),
            SqlScalar::Boolean => self.extract_boolean(expr, path),
            SqlScalar::Date | SqlScalar::DateTime | SqlScalar::Time => {
                self.try_cast(&self.extract_string(expr, path), scalar)
            }
        }
    }

    /// A primitive stored either bare or as an object with `value`/`extension`.
    fn extract_primitive_value(&self, expr: &str, path: &[String], scalar: SqlScalar) -> String {
        let mut wrapped = path.to_vec();
        wrapped.push("value".to_string());
        format!(
            "COALESCE({}, {})",
            self.extract_scalar(expr, &wrapped, scalar),
            self.extract_scalar(expr, path, scalar)
        )
    }

    // ---- collections -----------------------------------------------------

    /// FROM-clause item yielding one row per element of the JSON array
    /// `array_expr`, with columns `value` and 1-based `ordinality`.
    fn enumerate_array(&self, array_expr: &str, alias: &str) -> String;

    /// Aggregate non-null `value` rows into a JSON array ordered by `order_by`.
    fn aggregate_to_array(&self, value: &str, order_by: &str) -> String;

    fn json_array_length(&self, expr: &str) -> String;

    /// Zero-based element access.
    fn json_array_element(&self, expr: &str, index: &str) -> String;

    /// Wrap a non-array JSON value into a one-element array; NULL stays NULL.
    fn ensure_array(&self, expr: &str) -> String;

    fn to_json(&self, expr: &str) -> String;

    /// NULL typed as the dialect's JSON type.
    fn empty_json(&self) -> String;

    fn json_object(&self, pairs: &[(&str, String)]) -> String;

    fn lateral_join(&self, from_item: &str) -> String {
        format!("CROSS JOIN LATERAL {}", from_item)
    }

    // ---- date/time -------------------------------------------------------

    fn current_date(&self) -> String;
    fn current_time(&self) -> String;
    fn current_timestamp(&self) -> String;

    fn date_literal(&self, text: &str) -> String {
        format!("DATE {}", quote_literal(text))
    }

    fn datetime_literal(&self, text: &str) -> String;

    fn time_literal(&self, text: &str) -> String {
        format!("TIME {}", quote_literal(text))
    }

    fn add_interval(&self, expr: &str, amount: &str, unit: &str) -> String {
        format!("({} + INTERVAL {})", expr, quote_literal(&format!("{} {}", amount, unit)))
    }

    // ---- types and casts -------------------------------------------------

    fn sql_type(&self, scalar: SqlScalar) -> &'static str;

    fn cast(&self, expr: &str, scalar: SqlScalar) -> String {
        format!("CAST({} AS {})", expr, self.sql_type(scalar))
    }

    /// Cast that yields NULL instead of raising on bad input.
    fn try_cast(&self, expr: &str, scalar: SqlScalar) -> String;

    /// Upper-case base type name of a native SQL value.
    fn type_of(&self, expr: &str) -> String;

    /// Names `type_of` reports for values of `scalar`.
    fn native_type_names(&self, scalar: SqlScalar) -> &'static [&'static str];

    fn json_type_of(&self, expr: &str) -> String;

    fn json_type_names(&self, kind: JsonKind) -> &'static [&'static str];

    fn json_type_check(&self, expr: &str, kind: JsonKind) -> String {
        let names: Vec<String> = self
            .json_type_names(kind)
            .iter()
            .map(|n| quote_literal(n))
            .collect();
        format!("({} IN ({}))", self.json_type_of(expr), names.join(", "))
    }

    // ---- arithmetic ------------------------------------------------------

    /// Truncating division of two integers; NULL on a zero divisor.
    fn integer_divide(&self, left: &str, right: &str) -> String;

    fn modulo(&self, left: &str, right: &str) -> String {
        format!("({} % NULLIF({}, 0))", left, right)
    }

    // ---- strings ---------------------------------------------------------

    fn string_literal(&self, value: &str) -> String {
        quote_literal(value)
    }

    fn to_text(&self, expr: &str) -> String {
        self.cast(expr, SqlScalar::String)
    }

    fn string_length(&self, expr: &str) -> String {
        format!("length({})", expr)
    }

    fn starts_with(&self, expr: &str, prefix: &str) -> String {
        format!("starts_with({}, {})", expr, prefix)
    }

    fn ends_with(&self, expr: &str, suffix: &str) -> String;

    fn string_contains(&self, expr: &str, needle: &str) -> String;

    /// 1-based position of `needle`, 0 when absent.
    fn string_position(&self, expr: &str, needle: &str) -> String {
        format!("strpos({}, {})", expr, needle)
    }

    /// `start` is 1-based.
    fn substring(&self, expr: &str, start: &str, length: Option<&str>) -> String {
        match length {
            Some(length) => format!("substr({}, {}, {})", expr, start, length),
            None => format!("substr({}, {})", expr, start),
        }
    }

    fn regex_match(&self, expr: &str, pattern: &str) -> String;

    fn regex_replace(&self, expr: &str, pattern: &str, replacement: &str) -> String {
        format!("regexp_replace({}, {}, {}, 'g')", expr, pattern, replacement)
    }

    /// First capture group of `pattern` in `expr`.
    fn regex_extract(&self, expr: &str, pattern: &str) -> String;

    fn string_agg(&self, value: &str, separator: &str, order_by: &str) -> String {
        format!("string_agg({}, {} ORDER BY {})", value, separator, order_by)
    }

    /// Split text into a JSON array of strings.
    fn split_to_array(&self, expr: &str, separator: &str) -> String;
}
