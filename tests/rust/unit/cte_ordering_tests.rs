//! Unit tests for CTE dependency ordering and statement assembly

#[cfg(test)]
mod cte_ordering_tests {
    use fhirpath_sql::cte_manager::{BaseTable, Cte, CteError, CteManager, Granularity};

    fn stage(name: &str, from: &str, dependency: &str) -> Cte {
        Cte::new(name, from, Granularity::Element)
            .with_column("s.id AS id".to_string())
            .with_column("s.value AS value".to_string())
            .with_dependency(dependency)
    }

    #[test]
    fn test_base_table_plus_two_chained_stages() {
        let mut manager = CteManager::new(BaseTable::default());
        manager
            .register(stage("second_cte_2", "first_cte_1 AS s", "first_cte_1"))
            .unwrap();
        manager
            .register(stage("first_cte_1", "fhir_resources AS s", "fhir_resources"))
            .unwrap();

        let order: Vec<String> = manager
            .ordered()
            .expect("base table is not a missing dependency")
            .into_iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(order, vec!["first_cte_1", "second_cte_2"]);
    }

    #[test]
    fn test_unknown_dependency_is_reported() {
        let mut manager = CteManager::new(BaseTable::default());
        manager
            .register(stage("lonely_cte_1", "nowhere AS s", "nowhere"))
            .unwrap();
        assert!(matches!(
            manager.ordered(),
            Err(CteError::MissingDependency { ref dependency, .. }) if dependency == "nowhere"
        ));
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut manager = CteManager::new(BaseTable::default());
        manager.register(stage("a_cte_1", "b_cte_2 AS s", "b_cte_2")).unwrap();
        manager.register(stage("b_cte_2", "a_cte_1 AS s", "a_cte_1")).unwrap();
        match manager.ordered() {
            Err(CteError::CyclicDependency { members }) => {
                assert!(members.contains(&"a_cte_1".to_string()));
                assert!(members.contains(&"b_cte_2".to_string()));
            }
            other => panic!("expected a cycle, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_duplicate_stage_is_rejected() {
        let mut manager = CteManager::new(BaseTable::default());
        manager
            .register(stage("x_cte_1", "fhir_resources AS s", "fhir_resources"))
            .unwrap();
        assert_eq!(
            manager.register(stage("x_cte_1", "fhir_resources AS s", "fhir_resources")),
            Err(CteError::DuplicateStage("x_cte_1".to_string()))
        );
    }

    #[test]
    fn test_external_tables_are_exempt() {
        let mut manager = CteManager::new(BaseTable::new("docs", "d", "id", "body"));
        manager.add_external_table("code_lookup");
        manager
            .register(stage("lookup_cte_1", "code_lookup AS s", "code_lookup"))
            .unwrap();
        assert!(manager.ordered().is_ok());
        assert!(manager.is_external("docs"));
        assert!(manager.is_external("d"));
    }
}
