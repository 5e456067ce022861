use super::{
    Cardinality, FragmentOrigin, ResultType, SqlFragment, TranslationResult, Translator,
};
use crate::fhirpath_parser::ast::{Literal, LiteralNode};
use crate::sql_dialect::SqlScalar;

impl Translator {
    pub(super) fn literal(&self, node: &LiteralNode) -> TranslationResult<SqlFragment> {
        let this = self.this_fragment(node.span)?;
        let native = |expr: String, scalar: SqlScalar, fhir: &str| {
            this.derive(expr, ResultType::native(scalar, Some(fhir)))
                .with_origin(FragmentOrigin::Literal)
        };

        let fragment = match &node.value {
            Literal::Empty => this
                .derive(self.dialect.empty_json(), ResultType::json(None, Cardinality::Single))
                .with_origin(FragmentOrigin::Literal),
            Literal::Boolean(b) => native(
                if *b { "TRUE" } else { "FALSE" }.to_string(),
                SqlScalar::Boolean,
                "boolean",
            ),
            Literal::String(s) => native(self.dialect.string_literal(s), SqlScalar::String, "string"),
            Literal::Integer(n) => native(n.to_string(), SqlScalar::Integer, "integer"),
            Literal::Decimal(text) => native(text.clone(), SqlScalar::Decimal, "decimal"),
            Literal::Date(text) => self.date_fragment(text, &native),
            Literal::DateTime(text) => match text.strip_suffix('T') {
                Some(date) => self.date_fragment(date, &native),
                None => {
                    let (date, time) = text.split_once('T').unwrap_or((text.as_str(), ""));
                    if date.len() < 10 {
                        native(self.dialect.string_literal(text), SqlScalar::String, "dateTime")
                    } else {
                        native(
                            self.dialect
                                .datetime_literal(&format!("{}T{}", date, complete_time(time))),
                            SqlScalar::DateTime,
                            "dateTime",
                        )
                    }
                }
            },
            Literal::Time(text) => native(
                self.dialect.time_literal(&complete_time(text)),
                SqlScalar::Time,
                "time",
            ),
            Literal::Quantity { value, unit } => this
                .derive(
                    self.dialect.json_object(&[
                        ("value", value.clone()),
                        ("unit", self.dialect.string_literal(unit)),
                    ]),
                    ResultType::json(Some("Quantity".to_string()), Cardinality::Single),
                )
                .with_origin(FragmentOrigin::QuantityLiteral {
                    value: value.clone(),
                    unit: unit.clone(),
                }),
        };
        Ok(fragment)
    }

    // Partial dates (`@2014`, `@2014-02`) have no SQL DATE form; they compare as text.
    fn date_fragment(
        &self,
        text: &str,
        native: &impl Fn(String, SqlScalar, &str) -> SqlFragment,
    ) -> SqlFragment {
        if text.len() == 10 {
            native(self.dialect.date_literal(text), SqlScalar::Date, "date")
        } else {
            native(self.dialect.string_literal(text), SqlScalar::String, "date")
        }
    }
}

/// The `{}` literal.
pub(super) fn is_empty_literal(fragment: &SqlFragment) -> bool {
    matches!(fragment.origin(), FragmentOrigin::Literal) && fragment.result_type().is_json()
}

/// `10` -> `10:00`; hour-only times are not valid SQL time literals.
fn complete_time(time: &str) -> String {
    let (clock, zone) = split_zone(time);
    if clock.len() == 2 {
        format!("{}:00{}", clock, zone)
    } else {
        time.to_string()
    }
}

fn split_zone(time: &str) -> (&str, &str) {
    if let Some(clock) = time.strip_suffix('Z') {
        return (clock, "Z");
    }
    match time.rfind(['+', '-']) {
        Some(pos) => time.split_at(pos),
        None => (time, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_scalar_literals() {
        assert_eq!(result("42").expression, "42");
        assert_eq!(result("4.50").expression, "4.50");
        assert_eq!(result(r"'it\'s'").expression, "'it''s'");
        assert_eq!(result("true").native_scalar(), Some(SqlScalar::Boolean));
    }

    #[test]
    fn test_temporal_literals() {
        assert_eq!(result("@2020-01-15").expression, "DATE '2020-01-15'");
        assert_eq!(
            result("@2020-01-15T10:30:00Z").expression,
            "CAST('2020-01-15T10:30:00Z' AS TIMESTAMPTZ)"
        );
        assert_eq!(result("@2020-01-15T").expression, "DATE '2020-01-15'");
        assert_eq!(result("@T14").expression, "TIME '14:00'");
    }

    #[test]
    fn test_partial_date_is_text() {
        let fragment = result("@2014-02");
        assert_eq!(fragment.expression, "'2014-02'");
        assert_eq!(fragment.fhir_type(), Some("date"));
    }

    #[test]
    fn test_quantity_literal() {
        let fragment = result("5 'mg'");
        assert_eq!(fragment.expression, "json_object('value', 5, 'unit', 'mg')");
        assert!(matches!(fragment.origin(), FragmentOrigin::QuantityLiteral { .. }));
    }

    #[test]
    fn test_complete_time() {
        assert_eq!(complete_time("09"), "09:00");
        assert_eq!(complete_time("09Z"), "09:00Z");
        assert_eq!(complete_time("09:15:00"), "09:15:00");
    }
}
