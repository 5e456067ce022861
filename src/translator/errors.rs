use thiserror::Error;

use crate::cte_manager::CteError;
use crate::fhirpath_parser::ast::Span;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranslationError {
    #[error("Unbound variable '{name}' at {span}")]
    UnboundVariable { name: String, span: Span },

    #[error("Unknown function '{name}' at {span}")]
    UnknownFunction { name: String, span: Span },

    #[error("Function '{function}' expects {expected} argument(s) but got {actual} at {span}")]
    InvalidArgumentCount {
        function: String,
        expected: String,
        actual: usize,
        span: Span,
    },

    #[error("Unknown type '{name}' at {span}")]
    UnknownType { name: String, span: Span },

    #[error("Invalid argument to '{function}' at {span}: {message}")]
    InvalidArgument {
        function: String,
        message: String,
        span: Span,
    },

    #[error("Unsupported operation at {span}: {message}")]
    UnsupportedOperation { message: String, span: Span },

    #[error("No operand available at {span}: fragment stack is empty")]
    EmptyFragmentStack { span: Span },

    #[error(transparent)]
    Cte(#[from] CteError),
}

pub type TranslationResult<T> = Result<T, TranslationError>;
