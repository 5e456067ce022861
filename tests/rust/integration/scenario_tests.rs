//! End-to-end scenarios with exact SQL expectations (DuckDB).

#[cfg(test)]
mod scenario_tests {
    use fhirpath_sql::sql_dialect::DialectKind;
    use fhirpath_sql::FhirPathCompiler;

    fn compile(text: &str) -> String {
        FhirPathCompiler::new(DialectKind::DuckDb)
            .unwrap()
            .compile(text)
            .unwrap()
    }

    #[test]
    fn test_where_on_given_names() {
        let sql = compile("Patient.name.given.where($this = 'Peter')");
        assert!(sql.starts_with("WITH name_cte_2 AS ("));
        assert!(sql.contains("(json_extract_string(given_cte_4.value, '$') = 'Peter')"));
    }

    #[test]
    fn test_nested_this_is_isolated() {
        let sql = compile(
            "Patient.name.where(given.where($this = 'Peter').exists() and $this.family = 'Smith')",
        );
        // the outer $this is the name element
        assert!(sql.contains("json_extract_string(name_cte_2.value, '$.family')"));
        // the inner $this is a given element, never the name
        assert!(!sql.contains("json_extract_string(name_cte_2.value, '$') = 'Peter'"));
        assert!(sql.contains("= 'Peter'"));
    }

    #[test]
    fn test_integer_is_not_decimal() {
        let sql = compile("1.is(Decimal).not()");
        assert!(sql.contains("(NOT (upper(regexp_replace(typeof(1)"));
        assert!(sql.contains("IN ('DECIMAL', 'DOUBLE', 'FLOAT'))"));
    }

    #[test]
    fn test_postgres_type_check_uses_pg_typeof() {
        let sql = FhirPathCompiler::new(DialectKind::Postgres)
            .unwrap()
            .compile("1.is(Decimal).not()")
            .unwrap();
        assert!(sql.contains("upper(pg_typeof(1)::text)"));
        assert!(sql.contains("'NUMERIC'"));
    }

    #[test]
    fn test_union_function_removes_duplicates() {
        let sql = compile("(1 | 2).union(2 | 3)");
        assert!(sql.contains("_dup = 1"));
    }
}
