//! Naming for generated CTEs, their ordering columns, and subquery aliases.
//!
//! Every CTE and alias in a compiled query is named here so that a stage
//! created in one place is referenced with the same name elsewhere.
//!
//! ## Naming Convention
//! - CTE: `{label}_cte_{counter}` where `label` is the path step or stage
//!   kind that produced it, sanitized to `[a-z0-9_]`
//! - Ordering column: `ord_{n}`, one per enumeration level
//! - Subquery alias: `{prefix}{counter}`
//!
//! Examples:
//! - `("name", 1)` → `"name_cte_1"`
//! - `("Patient.name", 2)` → `"patient_name_cte_2"`
//! - `("", 3)` → `"cte_3"`

/// Generate a CTE name with a sequence counter.
///
/// # Examples
/// ```
/// use fhirpath_sql::utils::cte_naming::generate_cte_name;
///
/// assert_eq!(generate_cte_name("name", 1), "name_cte_1");
/// assert_eq!(generate_cte_name("valueQuantity", 2), "valuequantity_cte_2");
/// assert_eq!(generate_cte_name("", 3), "cte_3");
/// ```
pub fn generate_cte_name(label: &str, counter: usize) -> String {
    format!("{}_{}", generate_cte_base_name(label), counter)
}

/// CTE name without the counter.
///
/// # Examples
/// ```
/// use fhirpath_sql::utils::cte_naming::generate_cte_base_name;
///
/// assert_eq!(generate_cte_base_name("given"), "given_cte");
/// assert_eq!(generate_cte_base_name("a-b c"), "a_b_c_cte");
/// ```
pub fn generate_cte_base_name(label: &str) -> String {
    let sanitized = sanitize(label);
    if sanitized.is_empty() {
        "cte".to_string()
    } else {
        format!("{}_cte", sanitized)
    }
}

/// Ordering column carried for the `level`-th enumeration (1-based).
pub fn ordinal_column(level: usize) -> String {
    format!("ord_{}", level)
}

/// Alias for a correlated subquery or FROM item.
pub fn subquery_alias(prefix: &str, counter: usize) -> String {
    format!("{}{}", prefix, counter)
}

fn sanitize(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_underscore = true;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_cte_name() {
        assert_eq!(generate_cte_name("name", 1), "name_cte_1");
        assert_eq!(generate_cte_name("name", 2), "name_cte_2");
        assert_eq!(generate_cte_name("Patient.name", 1), "patient_name_cte_1");
    }

    #[test]
    fn test_generate_cte_name_empty_label() {
        assert_eq!(generate_cte_name("", 1), "cte_1");
        assert_eq!(generate_cte_name("$$", 4), "cte_4");
    }

    #[test]
    fn test_ordinal_and_alias() {
        assert_eq!(ordinal_column(2), "ord_2");
        assert_eq!(subquery_alias("it", 5), "it5");
    }
}
