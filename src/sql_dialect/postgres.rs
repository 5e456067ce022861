use super::{bind_once, quote_literal, Dialect, JsonKind, SqlScalar};

const INTEGER_PATTERN: &str = "^[+-]?[0-9]+$";
const DECIMAL_PATTERN: &str = "^[+-]?([0-9]+([.][0-9]*)?|[.][0-9]+)([eE][+-]?[0-9]+)?$";
const BOOLEAN_CASES: &str = "'true' THEN TRUE WHEN 't' THEN TRUE WHEN 'yes' THEN TRUE WHEN 'y' THEN TRUE \
     WHEN '1' THEN TRUE WHEN 'false' THEN FALSE WHEN 'f' THEN FALSE WHEN 'no' THEN FALSE \
     WHEN 'n' THEN FALSE WHEN '0' THEN FALSE";
const DATE_PATTERN: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}$";
const DATETIME_PATTERN: &str =
    "^[0-9]{4}-[0-9]{2}-[0-9]{2}([T ][0-9]{2}:[0-9]{2}(:[0-9]{2}([.][0-9]+)?)?(Z|[+-][0-9]{2}:[0-9]{2})?)?$";
const TIME_PATTERN: &str = "^[0-9]{2}:[0-9]{2}(:[0-9]{2}([.][0-9]+)?)?$";

/// PostgreSQL over `jsonb` documents.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        PostgresDialect
    }

    // Guarded cast: PostgreSQL has no TRY_CAST. `substring` yields the whole
    // text when it matches `pattern` and NULL otherwise.
    fn guarded(expr: &str, pattern: &str, target: &str) -> String {
        let whole = format!(
            "^({})$",
            pattern.trim_start_matches('^').trim_end_matches('$')
        );
        format!(
            "CAST(substring(CAST({} AS TEXT) FROM {}) AS {})",
            expr,
            quote_literal(&whole),
            target
        )
    }

    /// Elements of a JSON array as a new array; empty for any other value.
    fn elements(expr: &str) -> String {
        format!(
            "jsonb_path_query_array({}, 'strict $[*]', silent => true)",
            expr
        )
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn extract_json(&self, expr: &str, path: &[String]) -> String {
        if path.is_empty() {
            return expr.to_string();
        }
        let steps: Vec<String> = path.iter().map(|k| format!(" -> {}", quote_literal(k))).collect();
        format!("({}{})", expr, steps.concat())
    }

    fn extract_string(&self, expr: &str, path: &[String]) -> String {
        match path.split_last() {
            None => format!("({} #>> '{{}}')", expr),
            Some((last, init)) => {
                let steps: Vec<String> = init.iter().map(|k| format!(" -> {}", quote_literal(k))).collect();
                format!("({}{} ->> {})", expr, steps.concat(), quote_literal(last))
            }
        }
    }

    fn enumerate_array(&self, array_expr: &str, alias: &str) -> String {
        format!(
            "jsonb_array_elements(COALESCE({}, '[]'::jsonb)) WITH ORDINALITY AS {}(value, ordinality)",
            Self::elements(array_expr),
            alias
        )
    }

    fn aggregate_to_array(&self, value: &str, order_by: &str) -> String {
        format!(
            "jsonb_agg({} ORDER BY {}) FILTER (WHERE {} IS NOT NULL)",
            value, order_by, value
        )
    }

    fn json_array_length(&self, expr: &str) -> String {
        format!("jsonb_array_length({})", Self::elements(expr))
    }

    fn json_array_element(&self, expr: &str, index: &str) -> String {
        match index.parse::<i64>() {
            Ok(n) => format!("({} -> {})", expr, n),
            Err(_) => format!("({} -> CAST({} AS INTEGER))", expr, index),
        }
    }

    // lax mode wraps a non-array value into a one-element sequence
    fn ensure_array(&self, expr: &str) -> String {
        format!("jsonb_path_query_array({}, 'lax $[*]')", expr)
    }

    fn empty_json(&self) -> String {
        "NULL::jsonb".to_string()
    }

    fn to_json(&self, expr: &str) -> String {
        format!("to_jsonb({})", expr)
    }

    fn json_object(&self, pairs: &[(&str, String)]) -> String {
        let args: Vec<String> = pairs
            .iter()
            .map(|(key, value)| format!("{}, {}", quote_literal(key), value))
            .collect();
        format!("jsonb_build_object({})", args.join(", "))
    }

    fn current_date(&self) -> String {
        "CURRENT_DATE".to_string()
    }

    fn current_time(&self) -> String {
        "LOCALTIME".to_string()
    }

    fn current_timestamp(&self) -> String {
        "CURRENT_TIMESTAMP".to_string()
    }

    fn datetime_literal(&self, text: &str) -> String {
        format!("TIMESTAMPTZ {}", quote_literal(text))
    }

    fn sql_type(&self, scalar: SqlScalar) -> &'static str {
        match scalar {
            SqlScalar::Boolean => "BOOLEAN",
            SqlScalar::Integer => "BIGINT",
            SqlScalar::Decimal => "NUMERIC",
            SqlScalar::String => "TEXT",
            SqlScalar::Date => "DATE",
            SqlScalar::DateTime => "TIMESTAMPTZ",
            SqlScalar::Time => "TIME",
        }
    }

    fn try_cast(&self, expr: &str, scalar: SqlScalar) -> String {
        match scalar {
            SqlScalar::String => format!("CAST({} AS TEXT)", expr),
            SqlScalar::Integer => Self::guarded(expr, INTEGER_PATTERN, "BIGINT"),
            SqlScalar::Decimal => Self::guarded(expr, DECIMAL_PATTERN, "NUMERIC"),
            SqlScalar::Boolean => format!(
                "(CASE lower(CAST({} AS TEXT)) WHEN {} END)",
                expr, BOOLEAN_CASES
            ),
            SqlScalar::Date => Self::guarded(expr, DATE_PATTERN, "DATE"),
            SqlScalar::DateTime => Self::guarded(expr, DATETIME_PATTERN, "TIMESTAMPTZ"),
            SqlScalar::Time => Self::guarded(expr, TIME_PATTERN, "TIME"),
        }
    }

    fn type_of(&self, expr: &str) -> String {
        format!("upper(pg_typeof({})::text)", expr)
    }

    fn native_type_names(&self, scalar: SqlScalar) -> &'static [&'static str] {
        match scalar {
            SqlScalar::Boolean => &["BOOLEAN"],
            SqlScalar::Integer => &["SMALLINT", "INTEGER", "BIGINT"],
            SqlScalar::Decimal => &["NUMERIC", "DOUBLE PRECISION", "REAL"],
            // untyped string literals report as "unknown"
            SqlScalar::String => &["TEXT", "CHARACTER VARYING", "UNKNOWN"],
            SqlScalar::Date => &["DATE"],
            SqlScalar::DateTime => &["TIMESTAMP WITH TIME ZONE", "TIMESTAMP WITHOUT TIME ZONE"],
            SqlScalar::Time => &["TIME WITHOUT TIME ZONE"],
        }
    }

    fn json_type_of(&self, expr: &str) -> String {
        format!("jsonb_typeof({})", expr)
    }

    fn json_type_names(&self, kind: JsonKind) -> &'static [&'static str] {
        match kind {
            JsonKind::String => &["string"],
            JsonKind::Number | JsonKind::Integer => &["number"],
            JsonKind::Boolean => &["boolean"],
            JsonKind::Object => &["object"],
            JsonKind::Array => &["array"],
        }
    }

    fn json_type_check(&self, expr: &str, kind: JsonKind) -> String {
        let base = format!(
            "({} = {})",
            self.json_type_of(expr),
            quote_literal(self.json_type_names(kind)[0])
        );
        match kind {
            JsonKind::Integer => bind_once(expr, |v| {
                format!(
                    "(jsonb_typeof({v}) = 'number' AND ({v} #>> '{{}}') ~ {p})",
                    v = v,
                    p = quote_literal(INTEGER_PATTERN)
                )
            }),
            _ => base,
        }
    }

    fn integer_divide(&self, left: &str, right: &str) -> String {
        format!("CAST(div({}, NULLIF({}, 0)) AS BIGINT)", left, right)
    }

    // Typed so polymorphic functions such as to_jsonb accept it.
    fn string_literal(&self, value: &str) -> String {
        format!("{}::text", quote_literal(value))
    }

    fn ends_with(&self, expr: &str, suffix: &str) -> String {
        format!("(right({}, length({s})) = {s})", expr, s = suffix)
    }

    fn string_contains(&self, expr: &str, needle: &str) -> String {
        format!("(strpos({}, {}) > 0)", expr, needle)
    }

    fn regex_match(&self, expr: &str, pattern: &str) -> String {
        format!("({} ~ {})", expr, pattern)
    }

    fn regex_extract(&self, expr: &str, pattern: &str) -> String {
        format!("substring({} FROM {})", expr, pattern)
    }

    fn split_to_array(&self, expr: &str, separator: &str) -> String {
        format!("to_jsonb(string_to_array({}, {}))", expr, separator)
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
        let d = PostgresDialect::new();
        assert_eq!(
            d.extract_json("base.resource", &path(&["name", "given"])),
            "(base.resource -> 'name' -> 'given')"
        );
        assert_eq!(
            d.extract_string("base.resource", &path(&["name", "family"])),
            "(base.resource -> 'name' ->> 'family')"
        );
        assert_eq!(d.extract_string("v", &[]), "(v #>> '{}')");
    }

    #[test]
    fn test_enumerate_uses_ordinality() {
        let d = PostgresDialect::new();
        let sql = d.enumerate_array("x", "e1");
        assert!(sql.starts_with("jsonb_array_elements("));
        assert!(sql.ends_with("WITH ORDINALITY AS e1(value, ordinality)"));
    }

    #[test]
    fn test_guarded_integer_cast() {
        let d = PostgresDialect::new();
        let sql = d.try_cast("v", SqlScalar::Integer);
        assert_eq!(
            sql,
            "CAST(substring(CAST(v AS TEXT) FROM '^([+-]?[0-9]+)$') AS BIGINT)"
        );
        assert_eq!(sql.matches('v').count(), 1);
    }

    #[test]
    fn test_boolean_cast_reads_text_once() {
        let d = PostgresDialect::new();
        let sql = d.try_cast("v", SqlScalar::Boolean);
        assert!(sql.starts_with("(CASE lower(CAST(v AS TEXT)) WHEN 'true' THEN TRUE"));
        assert!(sql.ends_with("WHEN '0' THEN FALSE END)"));
    }

    #[test]
    fn test_collection_primitives_embed_input_once() {
        let d = PostgresDialect::new();
        let input = "(base.resource -> 'name')";
        for sql in [
            d.enumerate_array(input, "e1"),
            d.json_array_length(input),
            d.ensure_array(input),
            d.json_type_check(input, JsonKind::Integer),
        ] {
            assert_eq!(sql.matches(input).count(), 1, "{}", sql);
        }
        assert!(d
            .enumerate_array(input, "e1")
            .contains("jsonb_path_query_array((base.resource -> 'name'), 'strict $[*]', silent => true)"));
    }

    #[test]
    fn test_string_literals_are_typed() {
        let d = PostgresDialect::new();
        assert_eq!(d.string_literal("O'Brien"), "'O''Brien'::text");
    }

    #[test]
    fn test_string_names_include_unknown() {
        let d = PostgresDialect::new();
        assert!(d.native_type_names(SqlScalar::String).contains(&"UNKNOWN"));
    }

    #[test]
    fn test_integer_json_check_inspects_text() {
        let d = PostgresDialect::new();
        let sql = d.json_type_check("v", JsonKind::Integer);
        assert!(sql.contains("jsonb_typeof(_bound.v) = 'number'"));
        assert!(sql.contains("(_bound.v #>> '{}') ~"));
        assert!(sql.ends_with("FROM (SELECT v AS v) AS _bound)"));
    }
}
