//! Unit tests for lexical scoping of iteration variables

#[cfg(test)]
mod variable_scope_tests {
    use fhirpath_sql::sql_dialect::SqlScalar;
    use fhirpath_sql::translator::variable_scope::{INDEX, THIS};
    use fhirpath_sql::translator::{ResultType, ScopeFrame, SqlFragment, VariableScope};

    fn fragment(expr: &str) -> SqlFragment {
        SqlFragment::new(
            expr,
            "base",
            ResultType::native(SqlScalar::Integer, Some("integer")),
        )
    }

    #[test]
    fn test_inner_frame_shadows_and_restores() {
        let mut scope = VariableScope::new();
        scope.push(ScopeFrame::new().bind(THIS, fragment("b.value")));
        scope.push(ScopeFrame::iteration(
            fragment("a.value"),
            Some(fragment("(a.ordinality - 1)")),
            None,
        ));

        assert_eq!(scope.resolve(THIS).unwrap().fragment.expression, "a.value");
        assert_eq!(
            scope.resolve(INDEX).unwrap().fragment.expression,
            "(a.ordinality - 1)"
        );

        scope.pop();
        assert_eq!(scope.resolve(THIS).unwrap().fragment.expression, "b.value");
        assert!(scope.resolve(INDEX).is_none());
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn test_unbound_name_does_not_resolve() {
        let scope = VariableScope::new();
        assert!(scope.resolve(THIS).is_none());
        assert_eq!(scope.depth(), 0);
    }
}
