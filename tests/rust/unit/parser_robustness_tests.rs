//! Unit tests for expression parsing edge cases and error handling
//!
//! Malformed expressions must come back as errors, never as panics.

#[cfg(test)]
mod parser_robustness_tests {
    use fhirpath_sql::fhirpath_parser::ast::{Expression, Literal, LiteralNode};
    use fhirpath_sql::fhirpath_parser::{parse_expression, ParseError};

    /// Test that malformed expressions don't cause panics
    #[test]
    fn test_malformed_expressions_no_panic() {
        let malformed = vec![
            "",
            "(",
            ")",
            "Patient.",
            "Patient..name",
            "name.where(",
            "name.where($this = )",
            "1 +",
            "'unterminated",
            "@2020-13-01",
            "%",
            "name[",
            "a | | b",
        ];

        for text in malformed {
            assert!(parse_expression(text).is_err(), "'{}' should not parse", text);
        }
    }

    #[test]
    fn test_empty_input_is_its_own_error() {
        assert!(matches!(parse_expression("   "), Err(ParseError::Empty)));
    }

    #[test]
    fn test_trailing_input_is_reported() {
        assert!(matches!(
            parse_expression("name given"),
            Err(ParseError::TrailingInput { .. })
        ));
    }

    #[test]
    fn test_deep_union_chain_parses() {
        let text = (1..=50).map(|n| n.to_string()).collect::<Vec<_>>().join(" | ");
        assert!(matches!(parse_expression(&text), Ok(Expression::Union(_))));
    }

    #[test]
    fn test_integer_receiver_is_not_a_decimal() {
        let ast = parse_expression("1.is(Decimal)").unwrap();
        let Expression::Invocation(call) = ast else {
            panic!("expected an invocation");
        };
        assert_eq!(call.name, "is");
        assert!(matches!(
            call.base.as_deref(),
            Some(Expression::Literal(LiteralNode { value: Literal::Integer(1), .. }))
        ));
    }
}
