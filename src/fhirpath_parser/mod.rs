//! FHIRPath front end: source text to [`ast::Expression`].

use nom::Parser;

pub mod ast;
mod common;
pub mod errors;
mod expression;

use common::ws;
pub use errors::ParseError;

/// Parse a complete FHIRPath expression. Trailing input is an error.
pub fn parse_expression(source: &str) -> Result<ast::Expression, ParseError> {
    if source.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    match ws(expression::parse_expression).parse(source) {
        Ok((rest, mut expression)) => {
            if !rest.is_empty() {
                return Err(ParseError::TrailingInput {
                    offset: source.len() - rest.len(),
                    remaining: rest.to_string(),
                });
            }
            expression.rebase_spans(source.len());
            log::trace!("parsed FHIRPath '{}': {:?}", source, expression);
            Ok(expression)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ParseError::from_nom(source, e)),
        Err(nom::Err::Incomplete(_)) => Err(ParseError::Syntax {
            offset: source.len(),
            message: "incomplete input".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_input_is_rejected() {
        let err = parse_expression("name.given )").unwrap_err();
        assert!(matches!(err, ParseError::TrailingInput { offset: 11, .. }));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_expression("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_missing_member_after_dot() {
        let err = parse_expression("name.").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_spans_are_source_offsets() {
        let expr = parse_expression("  Patient.name").unwrap();
        assert_eq!(expr.span(), ast::Span::new(2, 14));
    }
}
