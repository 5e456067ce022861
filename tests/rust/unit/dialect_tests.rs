//! Unit tests for dialect selection and the primitives both dialects share

#[cfg(test)]
mod dialect_tests {
    use fhirpath_sql::sql_dialect::{quote_literal, DialectKind};
    use test_case::test_case;

    #[test_case("duckdb", DialectKind::DuckDb ; "duckdb")]
    #[test_case("DuckDB", DialectKind::DuckDb ; "mixed case")]
    #[test_case("postgres", DialectKind::Postgres ; "postgres")]
    #[test_case("postgresql", DialectKind::Postgres ; "postgresql")]
    #[test_case("pg", DialectKind::Postgres ; "pg")]
    fn test_dialect_names(text: &str, expected: DialectKind) {
        assert_eq!(text.parse::<DialectKind>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_dialect_is_rejected() {
        let err = "oracle".parse::<DialectKind>().unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test_case(DialectKind::DuckDb, "duckdb", "json_group_array(" ; "duckdb")]
    #[test_case(DialectKind::Postgres, "postgres", "jsonb_agg(" ; "postgres")]
    fn test_created_dialect_matches_kind(kind: DialectKind, name: &str, aggregate: &str) {
        let dialect = kind.create();
        assert_eq!(dialect.name(), name);
        assert_eq!(kind.to_string(), name);
        assert!(dialect.aggregate_to_array("v", "o").starts_with(aggregate));
    }

    #[test]
    fn test_literals_are_escaped() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }
}
