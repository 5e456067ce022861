//! Groupings of FHIR types under the FHIRPath system types used by
//! `is`, `as` and `ofType`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Boolean,
    Integer,
    Decimal,
    String,
    Date,
    DateTime,
    Time,
    Quantity,
}

impl TypeFamily {
    pub const ALL: [TypeFamily; 8] = [
        TypeFamily::Boolean,
        TypeFamily::Integer,
        TypeFamily::Decimal,
        TypeFamily::String,
        TypeFamily::Date,
        TypeFamily::DateTime,
        TypeFamily::Time,
        TypeFamily::Quantity,
    ];

    /// FHIR type names that belong to this family.
    pub fn members(&self) -> &'static [&'static str] {
        match self {
            TypeFamily::Boolean => &["boolean"],
            TypeFamily::Integer => &["integer", "positiveInt", "unsignedInt"],
            TypeFamily::Decimal => &["decimal"],
            TypeFamily::String => &[
                "string",
                "code",
                "id",
                "uri",
                "url",
                "canonical",
                "markdown",
                "oid",
                "uuid",
                "base64Binary",
                "xhtml",
            ],
            TypeFamily::Date => &["date"],
            TypeFamily::DateTime => &["dateTime", "instant"],
            TypeFamily::Time => &["time"],
            TypeFamily::Quantity => &[
                "Quantity",
                "SimpleQuantity",
                "MoneyQuantity",
                "Age",
                "Count",
                "Distance",
                "Duration",
            ],
        }
    }

    pub fn system_name(&self) -> &'static str {
        match self {
            TypeFamily::Boolean => "Boolean",
            TypeFamily::Integer => "Integer",
            TypeFamily::Decimal => "Decimal",
            TypeFamily::String => "String",
            TypeFamily::Date => "Date",
            TypeFamily::DateTime => "DateTime",
            TypeFamily::Time => "Time",
            TypeFamily::Quantity => "Quantity",
        }
    }

    /// Family of a concrete FHIR type name (`positiveInt` -> Integer).
    pub fn of_member(type_name: &str) -> Option<TypeFamily> {
        TypeFamily::ALL
            .into_iter()
            .find(|family| family.members().contains(&type_name))
    }

    /// Family named by a System type (`Integer`, `System.Integer`).
    pub fn from_system_name(name: &str) -> Option<TypeFamily> {
        let name = name.strip_prefix("System.").unwrap_or(name);
        TypeFamily::ALL
            .into_iter()
            .find(|family| family.system_name() == name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.members().contains(&type_name)
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, TypeFamily::Quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_lookup() {
        assert_eq!(TypeFamily::of_member("positiveInt"), Some(TypeFamily::Integer));
        assert_eq!(TypeFamily::of_member("instant"), Some(TypeFamily::DateTime));
        assert_eq!(TypeFamily::of_member("Age"), Some(TypeFamily::Quantity));
        assert_eq!(TypeFamily::of_member("HumanName"), None);
    }

    #[test]
    fn test_system_names() {
        assert_eq!(TypeFamily::from_system_name("System.Decimal"), Some(TypeFamily::Decimal));
        assert_eq!(TypeFamily::from_system_name("String"), Some(TypeFamily::String));
        assert_eq!(TypeFamily::from_system_name("string"), None);
    }
}
