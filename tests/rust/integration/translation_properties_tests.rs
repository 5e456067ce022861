//! Properties every compiled statement must keep, checked for both dialects.

#[cfg(test)]
mod translation_properties_tests {
    use fhirpath_sql::sql_dialect::DialectKind;
    use fhirpath_sql::FhirPathCompiler;
    use test_case::test_case;

    fn compile(text: &str, dialect: DialectKind) -> String {
        FhirPathCompiler::new(dialect)
            .unwrap()
            .compile(text)
            .unwrap()
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_compilation_is_deterministic(dialect: DialectKind) {
        let text = "Patient.name.where(use = 'official').given.first() | Patient.telecom.value";
        let first = compile(text, dialect);
        let second = compile(text, dialect);
        let other_compiler = FhirPathCompiler::new(dialect).unwrap().compile(text).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, other_compiler);
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_union_chains_grow_linearly(dialect: DialectKind) {
        let five = compile("(1 | 2 | 3 | 4 | 5)", dialect);
        assert!(five.len() < 2048, "5-way union is {} bytes", five.len());

        let nine = compile("(1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9)", dialect);
        assert!(nine.len() < 4096, "9-way union is {} bytes", nine.len());
        assert_eq!(nine.matches("UNION ALL").count(), 8);
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_filter_chains_grow_linearly(dialect: DialectKind) {
        let chain = |n: usize| {
            let filters = ".where($this.exists())".repeat(n);
            compile(&format!("1 + Patient.name{}.count()", filters), dialect).len()
        };
        let (one, two, four) = (chain(1), chain(2), chain(4));
        let step = two - one;
        assert!(four - two <= 2 * step + 64, "sizes {} {} {}", one, two, four);
        assert!(four < 4 * one, "sizes {} {} {}", one, two, four);
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_element_results_keep_document_order(dialect: DialectKind) {
        let sql = compile("Patient.name.given", dialect);
        assert!(sql.ends_with("ORDER BY given_cte_4.id, given_cte_4.ord_1, given_cte_4.ord_2"));
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_polymorphic_variants_in_declared_order(dialect: DialectKind) {
        let sql = compile("Observation.value", dialect);
        let quantity = sql.find("valueQuantity").unwrap();
        let string = sql.find("valueString").unwrap();
        assert!(quantity < string);
        assert!(sql.contains("COALESCE("));
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_union_operator_keeps_duplicates(dialect: DialectKind) {
        let sql = compile("(1 | 2 | 2 | 3)", dialect);
        assert_eq!(sql.matches("AS branch").count(), 4);
        assert!(!sql.contains("_dup"));
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_reducing_function_collapses_to_documents(dialect: DialectKind) {
        let sql = compile("Patient.name.given.count()", dialect);
        assert!(sql.contains("LEFT JOIN given_cte_4 ON given_cte_4.id = base.id"));
        assert!(sql.ends_with("GROUP BY base.id ORDER BY base.id"));
    }

    #[test_case(DialectKind::DuckDb ; "duckdb")]
    #[test_case(DialectKind::Postgres ; "postgres")]
    fn test_resource_type_filter_applied(dialect: DialectKind) {
        let sql = compile("Patient.birthDate", dialect);
        assert!(sql.contains("'Patient'"));
        assert!(sql.contains("resourceType"));
    }
}
