use nom::error::{ContextError, ErrorKind, ParseError as NomParseError};
use std::fmt;
use thiserror::Error;

/// Error accumulated while nom backtracks through the grammar.
#[derive(Debug, PartialEq)]
pub struct FhirPathParsingError<'a> {
    pub errors: Vec<(&'a str, &'static str)>,
}

impl<'a> NomParseError<&'a str> for FhirPathParsingError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        FhirPathParsingError {
            errors: vec![(input, "unexpected input")],
        }
    }

    fn append(input: &'a str, _kind: ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, "unexpected input"));
        other
    }
}

impl<'a> ContextError<&'a str> for FhirPathParsingError<'a> {
    fn add_context(input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ctx));
        other
    }
}

impl fmt::Display for FhirPathParsingError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (input, ctx) in &self.errors {
            writeln!(f, "{}: {}", ctx, input)?;
        }
        Ok(())
    }
}

impl<'a> FhirPathParsingError<'a> {
    /// The innermost failure: the one furthest into the input.
    pub fn deepest(&self) -> Option<(&'a str, &'static str)> {
        self.errors
            .iter()
            .min_by_key(|(input, _)| input.len())
            .copied()
    }
}

/// Public parse failure with a byte offset into the source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unexpected trailing input at offset {offset}: '{remaining}'")]
    TrailingInput { offset: usize, remaining: String },

    #[error("empty expression")]
    Empty,
}

impl ParseError {
    pub(crate) fn from_nom(source: &str, err: FhirPathParsingError<'_>) -> Self {
        match err.deepest() {
            Some((remaining, ctx)) => ParseError::Syntax {
                offset: source.len() - remaining.len(),
                message: ctx.to_string(),
            },
            None => ParseError::Syntax {
                offset: 0,
                message: "unable to parse".to_string(),
            },
        }
    }
}
