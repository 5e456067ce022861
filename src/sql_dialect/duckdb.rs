use regex::Regex;
use std::sync::LazyLock;

use super::{bind_once, quote_literal, Dialect, JsonKind, SqlScalar};

/// Object keys that can appear unquoted in a JSONPath step.
static PLAIN_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// DuckDB with the bundled `json` extension. Paths are JSONPath strings.
#[derive(Debug, Clone, Default)]
pub struct DuckDbDialect;

impl DuckDbDialect {
    pub fn new() -> Self {
        DuckDbDialect
    }

    fn json_path(path: &[String]) -> String {
        let mut rendered = String::from("$");
        for key in path {
            if PLAIN_KEY.is_match(key) {
                rendered.push('.');
                rendered.push_str(key);
            } else {
                rendered.push_str(&format!(".\"{}\"", key.replace('"', "\\\"")));
            }
        }
        quote_literal(&rendered)
    }
}

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn extract_json(&self, expr: &str, path: &[String]) -> String {
        if path.is_empty() {
            return expr.to_string();
        }
        format!("json_extract({}, {})", expr, Self::json_path(path))
    }

    fn extract_string(&self, expr: &str, path: &[String]) -> String {
        format!("json_extract_string({}, {})", expr, Self::json_path(path))
    }

    fn enumerate_array(&self, array_expr: &str, alias: &str) -> String {
        format!(
            "(SELECT unnest(s.items) AS value, unnest(range(1, len(s.items) + 1)) AS ordinality \
             FROM (SELECT CAST(json_extract({}, '$[*]') AS JSON[]) AS items) AS s) AS {}",
            array_expr, alias
        )
    }

    fn aggregate_to_array(&self, value: &str, order_by: &str) -> String {
        format!(
            "json_group_array({} ORDER BY {}) FILTER (WHERE {} IS NOT NULL)",
            value, order_by, value
        )
    }

    fn json_array_length(&self, expr: &str) -> String {
        format!("json_array_length({})", expr)
    }

    fn json_array_element(&self, expr: &str, index: &str) -> String {
        match index.parse::<i64>() {
            Ok(n) => format!("json_extract({}, '$[{}]')", expr, n),
            Err(_) => format!("json_extract({}, '$[' || CAST({} AS VARCHAR) || ']')", expr, index),
        }
    }

    fn ensure_array(&self, expr: &str) -> String {
        bind_once(expr, |e| {
            format!(
                "CASE WHEN {e} IS NULL THEN NULL WHEN json_type({e}) = 'ARRAY' THEN {e} ELSE json_array({e}) END",
                e = e
            )
        })
    }

    fn empty_json(&self) -> String {
        "CAST(NULL AS JSON)".to_string()
    }

    fn to_json(&self, expr: &str) -> String {
        format!("to_json({})", expr)
    }

    fn json_object(&self, pairs: &[(&str, String)]) -> String {
        let args: Vec<String> = pairs
            .iter()
            .map(|(key, value)| format!("{}, {}", quote_literal(key), value))
            .collect();
        format!("json_object({})", args.join(", "))
    }

    fn current_date(&self) -> String {
        "current_date".to_string()
    }

    fn current_time(&self) -> String {
        "current_time".to_string()
    }

    fn current_timestamp(&self) -> String {
        "current_timestamp".to_string()
    }

    fn datetime_literal(&self, text: &str) -> String {
        format!("CAST({} AS TIMESTAMPTZ)", quote_literal(text))
    }

    fn sql_type(&self, scalar: SqlScalar) -> &'static str {
        match scalar {
            SqlScalar::Boolean => "BOOLEAN",
            SqlScalar::Integer => "BIGINT",
            SqlScalar::Decimal => "DECIMAL(38, 10)",
            SqlScalar::String => "VARCHAR",
            SqlScalar::Date => "DATE",
            SqlScalar::DateTime => "TIMESTAMPTZ",
            SqlScalar::Time => "TIME",
        }
    }

    fn try_cast(&self, expr: &str, scalar: SqlScalar) -> String {
        format!("TRY_CAST({} AS {})", expr, self.sql_type(scalar))
    }

    fn type_of(&self, expr: &str) -> String {
        format!("upper(regexp_replace(typeof({}), '\\(.*\\)', ''))", expr)
    }

    fn native_type_names(&self, scalar: SqlScalar) -> &'static [&'static str] {
        match scalar {
            SqlScalar::Boolean => &["BOOLEAN"],
            SqlScalar::Integer => &[
                "TINYINT", "SMALLINT", "INTEGER", "BIGINT", "HUGEINT", "UINTEGER", "UBIGINT",
            ],
            SqlScalar::Decimal => &["DECIMAL", "DOUBLE", "FLOAT"],
            SqlScalar::String => &["VARCHAR"],
            SqlScalar::Date => &["DATE"],
            SqlScalar::DateTime => &["TIMESTAMP", "TIMESTAMP WITH TIME ZONE"],
            SqlScalar::Time => &["TIME"],
        }
    }

    fn json_type_of(&self, expr: &str) -> String {
        format!("json_type({})", expr)
    }

    fn json_type_names(&self, kind: JsonKind) -> &'static [&'static str] {
        match kind {
            JsonKind::String => &["VARCHAR"],
            JsonKind::Number => &["BIGINT", "UBIGINT", "DOUBLE"],
            JsonKind::Integer => &["BIGINT", "UBIGINT"],
            JsonKind::Boolean => &["BOOLEAN"],
            JsonKind::Object => &["OBJECT"],
            JsonKind::Array => &["ARRAY"],
        }
    }

    fn integer_divide(&self, left: &str, right: &str) -> String {
        format!("({} // NULLIF({}, 0))", left, right)
    }

    fn ends_with(&self, expr: &str, suffix: &str) -> String {
        format!("ends_with({}, {})", expr, suffix)
    }

    fn string_contains(&self, expr: &str, needle: &str) -> String {
        format!("contains({}, {})", expr, needle)
    }

    fn regex_match(&self, expr: &str, pattern: &str) -> String {
        format!("regexp_matches({}, {})", expr, pattern)
    }

    fn regex_extract(&self, expr: &str, pattern: &str) -> String {
        format!("regexp_extract({}, {}, 1)", expr, pattern)
    }

    fn split_to_array(&self, expr: &str, separator: &str) -> String {
        format!("to_json(string_split({}, {}))", expr, separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_extract_paths() {
        let d = DuckDbDialect::new();
        assert_eq!(
            d.extract_json("base.resource", &path(&["name", "given"])),
            "json_extract(base.resource, '$.name.given')"
        );
        assert_eq!(d.extract_json("x", &[]), "x");
        assert_eq!(
            d.extract_string("x", &path(&["birthDate"])),
            "json_extract_string(x, '$.birthDate')"
        );
    }

    #[test]
    fn test_odd_keys_are_quoted() {
        let d = DuckDbDialect::new();
        assert_eq!(d.extract_json("x", &path(&["a-b"])), "json_extract(x, '$.\"a-b\"')");
        assert_eq!(d.extract_json("x", &path(&["it's"])), "json_extract(x, '$.\"it''s\"')");
    }

    #[test]
    fn test_enumerate_names_value_and_ordinality() {
        let d = DuckDbDialect::new();
        let sql = d.enumerate_array("t.value", "e1");
        assert!(sql.contains("AS value"));
        assert!(sql.contains("AS ordinality"));
        assert!(sql.ends_with(") AS e1"));
    }

    #[test]
    fn test_typed_extraction_is_safe() {
        let d = DuckDbDialect::new();
        assert_eq!(
            d.extract_integer("x", &path(&["n"])),
            "TRY_CAST(json_extract_string(x, '$.n') AS BIGINT)"
        );
    }

    #[test]
    fn test_json_type_check() {
        let d = DuckDbDialect::new();
        assert_eq!(d.json_type_check("v", JsonKind::Object), "(json_type(v) IN ('OBJECT'))");
    }

    #[test]
    fn test_element_access() {
        let d = DuckDbDialect::new();
        assert_eq!(d.json_array_element("v", "2"), "json_extract(v, '$[2]')");
    }

    #[test]
    fn test_ensure_array_binds_input_once() {
        let d = DuckDbDialect::new();
        let sql = d.ensure_array("json_extract(t.value, '$.given')");
        assert_eq!(sql.matches("json_extract(t.value, '$.given')").count(), 1);
        assert!(sql.starts_with("(SELECT CASE WHEN _bound.v IS NULL THEN NULL"));
    }
}
