use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1, take_while_m_n},
    character::complete::{anychar, char, multispace0, none_of},
    combinator::{map, map_opt, not, peek, recognize},
    error::ParseError,
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use super::errors::FhirPathParsingError;

pub type PResult<'a, O> = IResult<&'a str, O, FhirPathParsingError<'a>>;

pub fn ws<'a, O, E: ParseError<&'a str>, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
{
    delimited(multispace0, inner, multispace0)
}

pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn plain_identifier(input: &str) -> PResult<'_, String> {
    map(
        recognize(pair(
            take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_identifier_char),
        )),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

// `given name` style identifiers written between back-ticks
fn delimited_identifier(input: &str) -> PResult<'_, String> {
    map(
        delimited(char('`'), take_while1(|c: char| c != '`'), char('`')),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

pub fn identifier(input: &str) -> PResult<'_, String> {
    alt((plain_identifier, delimited_identifier)).parse(input)
}

/// Matches `word` only when it is not the prefix of a longer identifier
/// (`or` must not match the start of `order`).
pub fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = FhirPathParsingError<'a>> {
    terminated(tag(word), not(peek(take_while_m_n(1, 1, is_identifier_char))))
}

fn unicode_escape(input: &str) -> PResult<'_, char> {
    map_opt(
        preceded(
            char('u'),
            take_while_m_n(4, 4, |c: char| c.is_ascii_hexdigit()),
        ),
        |hex: &str| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32),
    )
    .parse(input)
}

fn escaped_char(input: &str) -> PResult<'_, char> {
    preceded(
        char('\\'),
        alt((
            unicode_escape,
            map(char('n'), |_| '\n'),
            map(char('r'), |_| '\r'),
            map(char('t'), |_| '\t'),
            map(char('f'), |_| '\u{0c}'),
            anychar,
        )),
    )
    .parse(input)
}

/// Single-quoted string with FHIRPath escapes, returned unescaped.
pub fn string_literal(input: &str) -> PResult<'_, String> {
    map(
        delimited(
            char('\''),
            many0(alt((escaped_char, none_of("'\\")))),
            char('\''),
        ),
        |chars: Vec<char>| chars.into_iter().collect(),
    )
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_plain_and_delimited() {
        assert_eq!(identifier("name.given"), Ok((".given", "name".to_string())));
        assert_eq!(
            identifier("`given name` rest"),
            Ok((" rest", "given name".to_string()))
        );
        assert!(identifier("1abc").is_err());
    }

    #[test]
    fn test_keyword_rejects_identifier_prefix() {
        assert!(keyword("or").parse("order").is_err());
        assert!(keyword("or").parse("or x").is_ok());
    }

    #[test]
    fn test_string_literal_escapes() {
        assert_eq!(
            string_literal(r"'it\'s\nA'"),
            Ok(("", "it's\nA".to_string()))
        );
        assert_eq!(string_literal("''"), Ok(("", String::new())));
    }
}
