/// FHIRPath function catalog
///
/// Maps each supported function name to its accepted argument counts and
/// category. Lookups are case-sensitive, as FHIRPath names are.
use std::collections::HashMap;

use super::errors::TranslationError;
use crate::fhirpath_parser::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCategory {
    Existence,
    Aggregate,
    Filtering,
    Subsetting,
    Combining,
    Boolean,
    Conversion,
    String,
    Math,
    Type,
    DateTime,
    Key,
    Utility,
}

/// Function signature entry
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub category: FunctionCategory,
    /// Arguments are evaluated once per input element with `$this` bound.
    pub iterates: bool,
}

impl FunctionSignature {
    pub fn expected_arity(&self) -> String {
        if self.min_args == self.max_args {
            self.min_args.to_string()
        } else {
            format!("{}..{}", self.min_args, self.max_args)
        }
    }
}

/// Look up a function by name.
pub fn get_function_signature(name: &str) -> Option<&'static FunctionSignature> {
    FUNCTION_SIGNATURES.get(name)
}

/// Look up a function and check the number of arguments it was called with.
pub fn resolve_function(
    name: &str,
    arg_count: usize,
    span: Span,
) -> Result<&'static FunctionSignature, TranslationError> {
    let signature = get_function_signature(name).ok_or_else(|| TranslationError::UnknownFunction {
        name: name.to_string(),
        span,
    })?;
    if arg_count < signature.min_args || arg_count > signature.max_args {
        return Err(TranslationError::InvalidArgumentCount {
            function: name.to_string(),
            expected: signature.expected_arity(),
            actual: arg_count,
            span,
        });
    }
    Ok(signature)
}

fn entry(
    m: &mut HashMap<&'static str, FunctionSignature>,
    name: &'static str,
    min_args: usize,
    max_args: usize,
    category: FunctionCategory,
) {
    m.insert(
        name,
        FunctionSignature {
            name,
            min_args,
            max_args,
            category,
            iterates: false,
        },
    );
}

fn iterating(
    m: &mut HashMap<&'static str, FunctionSignature>,
    name: &'static str,
    min_args: usize,
    max_args: usize,
    category: FunctionCategory,
) {
    m.insert(
        name,
        FunctionSignature {
            name,
            min_args,
            max_args,
            category,
            iterates: true,
        },
    );
}

// Static function signature table
lazy_static::lazy_static! {
    static ref FUNCTION_SIGNATURES: HashMap<&'static str, FunctionSignature> = {
        use FunctionCategory::*;
        let mut m = HashMap::new();

        // ===== EXISTENCE =====
        entry(&mut m, "empty", 0, 0, Existence);
        iterating(&mut m, "exists", 0, 1, Existence);
        iterating(&mut m, "all", 1, 1, Existence);
        entry(&mut m, "allTrue", 0, 0, Existence);
        entry(&mut m, "anyTrue", 0, 0, Existence);
        entry(&mut m, "allFalse", 0, 0, Existence);
        entry(&mut m, "anyFalse", 0, 0, Existence);
        entry(&mut m, "distinct", 0, 0, Existence);
        entry(&mut m, "isDistinct", 0, 0, Existence);
        entry(&mut m, "hasValue", 0, 0, Existence);

        // ===== AGGREGATES =====
        entry(&mut m, "count", 0, 0, Aggregate);
        entry(&mut m, "sum", 0, 0, Aggregate);
        entry(&mut m, "avg", 0, 0, Aggregate);
        entry(&mut m, "min", 0, 0, Aggregate);
        entry(&mut m, "max", 0, 0, Aggregate);

        // ===== FILTERING AND PROJECTION =====
        iterating(&mut m, "where", 1, 1, Filtering);
        iterating(&mut m, "select", 1, 1, Filtering);
        entry(&mut m, "ofType", 1, 1, Filtering);
        entry(&mut m, "extension", 1, 1, Filtering);

        // ===== SUBSETTING =====
        entry(&mut m, "first", 0, 0, Subsetting);
        entry(&mut m, "last", 0, 0, Subsetting);
        entry(&mut m, "tail", 0, 0, Subsetting);
        entry(&mut m, "skip", 1, 1, Subsetting);
        entry(&mut m, "take", 1, 1, Subsetting);
        entry(&mut m, "single", 0, 0, Subsetting);
        entry(&mut m, "intersect", 1, 1, Subsetting);
        entry(&mut m, "exclude", 1, 1, Subsetting);
        entry(&mut m, "subsetOf", 1, 1, Subsetting);
        entry(&mut m, "supersetOf", 1, 1, Subsetting);

        // ===== COMBINING =====
        entry(&mut m, "union", 1, 1, Combining);
        entry(&mut m, "combine", 1, 1, Combining);

        // ===== BOOLEAN AND CONTROL =====
        entry(&mut m, "not", 0, 0, Boolean);
        entry(&mut m, "iif", 2, 3, Boolean);

        // ===== CONVERSION =====
        entry(&mut m, "toString", 0, 0, Conversion);
        entry(&mut m, "toInteger", 0, 0, Conversion);
        entry(&mut m, "toDecimal", 0, 0, Conversion);
        entry(&mut m, "toBoolean", 0, 0, Conversion);
        entry(&mut m, "toDate", 0, 0, Conversion);
        entry(&mut m, "toDateTime", 0, 0, Conversion);
        entry(&mut m, "toTime", 0, 0, Conversion);
        entry(&mut m, "convertsToString", 0, 0, Conversion);
        entry(&mut m, "convertsToInteger", 0, 0, Conversion);
        entry(&mut m, "convertsToDecimal", 0, 0, Conversion);
        entry(&mut m, "convertsToBoolean", 0, 0, Conversion);

        // ===== STRING =====
        entry(&mut m, "length", 0, 0, String);
        entry(&mut m, "upper", 0, 0, String);
        entry(&mut m, "lower", 0, 0, String);
        entry(&mut m, "startsWith", 1, 1, String);
        entry(&mut m, "endsWith", 1, 1, String);
        entry(&mut m, "contains", 1, 1, String);
        entry(&mut m, "substring", 1, 2, String);
        entry(&mut m, "indexOf", 1, 1, String);
        entry(&mut m, "replace", 2, 2, String);
        entry(&mut m, "matches", 1, 1, String);
        entry(&mut m, "replaceMatches", 2, 2, String);
        entry(&mut m, "trim", 0, 0, String);
        entry(&mut m, "split", 1, 1, String);
        entry(&mut m, "join", 0, 1, String);

        // ===== MATH =====
        entry(&mut m, "abs", 0, 0, Math);
        entry(&mut m, "ceiling", 0, 0, Math);
        entry(&mut m, "floor", 0, 0, Math);
        entry(&mut m, "round", 0, 1, Math);
        entry(&mut m, "sqrt", 0, 0, Math);
        entry(&mut m, "ln", 0, 0, Math);
        entry(&mut m, "exp", 0, 0, Math);
        entry(&mut m, "log", 1, 1, Math);
        entry(&mut m, "power", 1, 1, Math);
        entry(&mut m, "truncate", 0, 0, Math);

        // ===== TYPES =====
        entry(&mut m, "is", 1, 1, Type);
        entry(&mut m, "as", 1, 1, Type);

        // ===== DATE/TIME =====
        entry(&mut m, "today", 0, 0, DateTime);
        entry(&mut m, "now", 0, 0, DateTime);
        entry(&mut m, "timeOfDay", 0, 0, DateTime);

        // ===== RESOURCE KEYS =====
        entry(&mut m, "getResourceKey", 0, 0, Key);
        entry(&mut m, "getReferenceKey", 0, 1, Key);

        // ===== UTILITY =====
        entry(&mut m, "trace", 1, 2, Utility);

        m
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert!(get_function_signature("startsWith").is_some());
        assert!(get_function_signature("startswith").is_none());
    }

    #[test]
    fn test_arity_ranges() {
        assert_eq!(get_function_signature("substring").unwrap().expected_arity(), "1..2");
        assert_eq!(get_function_signature("where").unwrap().expected_arity(), "1");
        assert!(get_function_signature("where").unwrap().iterates);
        assert!(!get_function_signature("first").unwrap().iterates);
    }

    #[test]
    fn test_resolve_rejects_bad_arity() {
        let err = resolve_function("where", 0, Span::new(0, 7)).unwrap_err();
        assert_eq!(
            err,
            TranslationError::InvalidArgumentCount {
                function: "where".to_string(),
                expected: "1".to_string(),
                actual: 0,
                span: Span::new(0, 7),
            }
        );
    }

    #[test]
    fn test_unsupported_functions_are_unknown() {
        for name in ["repeat", "aggregate", "descendants", "children", "frobnicate"] {
            assert!(matches!(
                resolve_function(name, 0, Span::default()),
                Err(TranslationError::UnknownFunction { .. })
            ));
        }
    }
}
