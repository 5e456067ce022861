//! Tests for the public compiler entry points and their error reporting.

#[cfg(test)]
mod compiler_api_tests {
    use std::io::Write;
    use std::sync::Arc;

    use fhirpath_sql::config::CompilerConfig;
    use fhirpath_sql::sql_dialect::DialectKind;
    use fhirpath_sql::translator::TranslationError;
    use fhirpath_sql::type_catalog::{TypeKind, TypeRegistry};
    use fhirpath_sql::{CompileError, FhirPathCompiler};

    const DEVICE_SCHEMA: &str = r#"
name: devices
version: "1"
primitive_types: [string, boolean]
types:
  Device:
    kind: resource
    fields:
      label: { type: string, array: true }
      active: { type: boolean }
"#;

    #[test]
    fn test_from_config_uses_table_and_schema() {
        let mut schema = tempfile::NamedTempFile::new().unwrap();
        write!(schema, "{}", DEVICE_SCHEMA).unwrap();

        let config = CompilerConfig {
            dialect: DialectKind::DuckDb,
            table_name: "docs".to_string(),
            resource_column: "body".to_string(),
            schema_path: Some(schema.path().to_path_buf()),
            ..Default::default()
        };
        let compiler = FhirPathCompiler::from_config(&config).unwrap();
        assert_eq!(compiler.registry().name(), "devices");

        let sql = compiler.compile("Device.label").unwrap();
        assert!(sql.contains("FROM docs AS base"));
        assert!(sql.contains("json_extract(base.body, '$.label')"));
        assert!(sql.contains("json_extract_string(base.body, '$.resourceType') = 'Device'"));
    }

    #[test]
    fn test_shared_registry() {
        let registry = Arc::new(TypeRegistry::from_yaml_str(DEVICE_SCHEMA).unwrap());
        let compiler = FhirPathCompiler::new(DialectKind::Postgres)
            .unwrap()
            .with_registry(registry.clone());

        let device = compiler.registry().get_type("Device").unwrap();
        assert_eq!(device.kind, TypeKind::Resource);
        assert!(device.base.is_none());

        let sql = compiler.compile("Device.active").unwrap();
        assert!(sql.contains("'Device'"));
        assert_eq!(Arc::strong_count(&registry), 2);
    }

    #[test]
    fn test_from_config_reports_missing_schema() {
        let config = CompilerConfig {
            schema_path: Some("/nonexistent/schema.yaml".into()),
            ..Default::default()
        };
        assert!(matches!(
            FhirPathCompiler::from_config(&config),
            Err(CompileError::TypeCatalog(_))
        ));
    }

    #[test]
    fn test_parse_errors_are_reported() {
        let compiler = FhirPathCompiler::new(DialectKind::DuckDb).unwrap();
        assert!(matches!(compiler.compile("Patient.name.("), Err(CompileError::Parse(_))));
    }

    #[test]
    fn test_translation_errors_are_reported() {
        let compiler = FhirPathCompiler::new(DialectKind::Postgres).unwrap();
        match compiler.compile("Patient.name.frobnicate()") {
            Err(CompileError::Translation(TranslationError::UnknownFunction { name, .. })) => {
                assert_eq!(name, "frobnicate")
            }
            other => panic!("expected an unknown function error, got {:?}", other),
        }
    }

    #[test]
    fn test_context_type_applies_to_relative_paths() {
        let compiler = FhirPathCompiler::new(DialectKind::DuckDb)
            .unwrap()
            .with_context_type("Patient");
        let sql = compiler.compile("name.given").unwrap();
        assert!(sql.contains("= 'Patient'"));
        assert!(sql.contains("given_cte_"));
    }

    #[test]
    fn test_fragments_end_with_the_result() {
        let compiler = FhirPathCompiler::new(DialectKind::DuckDb).unwrap();
        let fragments = compiler.translate_fragments("Patient.name.given").unwrap();
        let last = fragments.last().unwrap();
        assert!(last.requires_unnest);
        assert_eq!(last.source_table, "given_cte_4");
    }

    #[test]
    fn test_error_chain_reports_message_once() {
        let compiler = FhirPathCompiler::new(DialectKind::DuckDb).unwrap();
        let err = compiler.compile("Patient.name.where($nope)").unwrap_err();
        assert!(matches!(err, CompileError::Translation(_)));

        let chain = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chain.matches("Unbound variable '$nope'").count(), 1, "{}", chain);
    }
}
