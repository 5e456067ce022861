use chrono::{NaiveDate, NaiveTime};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{cut, map, opt, recognize, value},
    error::context,
    multi::separated_list0,
    sequence::{delimited, pair, preceded},
    Parser,
};

use super::ast::{
    BinaryOperation, BinaryOperator, Expression, FunctionCall, IdentifierNode, IndexAccess,
    Literal, LiteralNode, MemberAccess, Span, TypeOperation, TypeOperator, UnaryOperation,
    UnaryOperator, UnionOperation, VariableNode,
};
use super::common::{identifier, keyword, string_literal, ws, PResult};
use super::errors::FhirPathParsingError;

// Spans are recorded as "bytes remaining" while parsing and rebased once
// the whole input has been consumed.
fn span(start: &str, end: &str) -> Span {
    Span::new(start.len(), end.len())
}

fn skip_ws(input: &str) -> PResult<'_, &str> {
    multispace0(input)
}

fn failure<'a>(input: &'a str, ctx: &'static str) -> nom::Err<FhirPathParsingError<'a>> {
    nom::Err::Failure(FhirPathParsingError {
        errors: vec![(input, ctx)],
    })
}

pub fn parse_expression(input: &str) -> PResult<'_, Expression> {
    parse_implies(input)
}

/// Left-associative fold over one precedence level.
fn fold_binary<'a>(
    input: &'a str,
    operand: fn(&'a str) -> PResult<'a, Expression>,
    operator: fn(&'a str) -> PResult<'a, BinaryOperator>,
) -> PResult<'a, Expression> {
    let (mut remaining, mut expression) = operand(input)?;

    loop {
        let (after_ws, _) = skip_ws(remaining)?;
        match operator(after_ws) {
            Ok((after_op, op)) => {
                let (rest, rhs) = context("expected right operand", cut(operand)).parse(after_op)?;
                let span = Span::new(expression.span().start, rest.len());
                expression = Expression::Binary(BinaryOperation {
                    operator: op,
                    left: Box::new(expression),
                    right: Box::new(rhs),
                    span,
                });
                remaining = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining, expression))
}

fn implies_operator(input: &str) -> PResult<'_, BinaryOperator> {
    value(BinaryOperator::Implies, keyword("implies")).parse(input)
}

fn parse_implies(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_or, implies_operator)
}

fn or_operator(input: &str) -> PResult<'_, BinaryOperator> {
    alt((
        value(BinaryOperator::Or, keyword("or")),
        value(BinaryOperator::Xor, keyword("xor")),
    ))
    .parse(input)
}

fn parse_or(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_and, or_operator)
}

fn and_operator(input: &str) -> PResult<'_, BinaryOperator> {
    value(BinaryOperator::And, keyword("and")).parse(input)
}

fn parse_and(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_membership, and_operator)
}

fn membership_operator(input: &str) -> PResult<'_, BinaryOperator> {
    alt((
        value(BinaryOperator::In, keyword("in")),
        value(BinaryOperator::Contains, keyword("contains")),
    ))
    .parse(input)
}

fn parse_membership(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_equality, membership_operator)
}

fn equality_operator(input: &str) -> PResult<'_, BinaryOperator> {
    alt((
        value(BinaryOperator::NotEqual, tag("!=")),
        value(BinaryOperator::NotEquivalent, tag("!~")),
        value(BinaryOperator::Equal, tag("=")),
        value(BinaryOperator::Equivalent, tag("~")),
    ))
    .parse(input)
}

fn parse_equality(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_inequality, equality_operator)
}

fn inequality_operator(input: &str) -> PResult<'_, BinaryOperator> {
    alt((
        value(BinaryOperator::LessOrEqual, tag("<=")),
        value(BinaryOperator::GreaterOrEqual, tag(">=")),
        value(BinaryOperator::LessThan, tag("<")),
        value(BinaryOperator::GreaterThan, tag(">")),
    ))
    .parse(input)
}

fn parse_inequality(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_union, inequality_operator)
}

fn parse_union(input: &str) -> PResult<'_, Expression> {
    let (mut remaining, mut expression) = parse_type_expression(input)?;

    loop {
        let (after_ws, _) = skip_ws(remaining)?;
        match char::<&str, FhirPathParsingError>('|').parse(after_ws) {
            Ok((after_op, _)) => {
                let (rest, rhs) =
                    context("expected union operand", cut(parse_type_expression)).parse(after_op)?;
                let span = Span::new(expression.span().start, rest.len());
                expression = Expression::Union(UnionOperation {
                    left: Box::new(expression),
                    right: Box::new(rhs),
                    span,
                });
                remaining = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining, expression))
}

fn type_specifier(input: &str) -> PResult<'_, String> {
    map(
        pair(identifier, opt(preceded(char('.'), identifier))),
        |(first, second)| match second {
            Some(second) => format!("{}.{}", first, second),
            None => first,
        },
    )
    .parse(input)
}

fn parse_type_expression(input: &str) -> PResult<'_, Expression> {
    let (mut remaining, mut expression) = parse_additive(input)?;

    loop {
        let (after_ws, _) = skip_ws(remaining)?;
        let op = alt((
            value(TypeOperator::Is, keyword("is")),
            value(TypeOperator::As, keyword("as")),
        ))
        .parse(after_ws);
        match op {
            Ok((after_op, operator)) => {
                let (rest, type_name) =
                    context("expected type name", cut(ws(type_specifier))).parse(after_op)?;
                let span = Span::new(expression.span().start, rest.len());
                expression = Expression::TypeOperation(TypeOperation {
                    operator,
                    operand: Box::new(expression),
                    type_name,
                    span,
                });
                remaining = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining, expression))
}

fn additive_operator(input: &str) -> PResult<'_, BinaryOperator> {
    alt((
        value(BinaryOperator::Add, char('+')),
        value(BinaryOperator::Subtract, char('-')),
        value(BinaryOperator::Concatenate, char('&')),
    ))
    .parse(input)
}

fn parse_additive(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_multiplicative, additive_operator)
}

fn multiplicative_operator(input: &str) -> PResult<'_, BinaryOperator> {
    alt((
        value(BinaryOperator::Multiply, char('*')),
        value(BinaryOperator::Divide, char('/')),
        value(BinaryOperator::IntegerDivide, keyword("div")),
        value(BinaryOperator::Modulo, keyword("mod")),
    ))
    .parse(input)
}

fn parse_multiplicative(input: &str) -> PResult<'_, Expression> {
    fold_binary(input, parse_unary, multiplicative_operator)
}

fn parse_unary(input: &str) -> PResult<'_, Expression> {
    let (input, _) = skip_ws(input)?;
    let op = alt((
        value(UnaryOperator::Plus, char('+')),
        value(UnaryOperator::Minus, char('-')),
    ))
    .parse(input);

    match op {
        Ok((after_op, operator)) => {
            let (rest, operand) = context("expected operand", cut(parse_unary)).parse(after_op)?;
            Ok((
                rest,
                Expression::Unary(UnaryOperation {
                    operator,
                    operand: Box::new(operand),
                    span: span(input, rest),
                }),
            ))
        }
        Err(nom::Err::Error(_)) => parse_postfix(input),
        Err(e) => Err(e),
    }
}

fn call_arguments(input: &str) -> PResult<'_, Vec<Expression>> {
    preceded(
        ws(char('(')),
        cut(context(
            "expected ')' after arguments",
            (
                separated_list0(ws(char(',')), parse_expression),
                ws(char(')')),
            ),
        )),
    )
    .parse(input)
    .map(|(rest, (args, _))| (rest, args))
}

/// Term followed by any number of `.member`, `.call(args)` and `[index]` suffixes.
fn parse_postfix(input: &str) -> PResult<'_, Expression> {
    let (mut remaining, mut expression) = parse_term(input)?;

    loop {
        let (after_ws, _) = skip_ws(remaining)?;

        if let Ok((after_dot, _)) = char::<&str, FhirPathParsingError>('.').parse(after_ws) {
            let (rest, name) =
                context("expected member name after '.'", cut(ws(identifier))).parse(after_dot)?;
            let (rest, args) = opt(call_arguments).parse(rest)?;
            let span = Span::new(expression.span().start, rest.len());
            expression = match args {
                Some(args) => Expression::Invocation(FunctionCall {
                    base: Some(Box::new(expression)),
                    name,
                    args,
                    span,
                }),
                None => Expression::Member(MemberAccess {
                    base: Box::new(expression),
                    name,
                    span,
                }),
            };
            remaining = rest;
            continue;
        }

        if let Ok((after_bracket, _)) = char::<&str, FhirPathParsingError>('[').parse(after_ws) {
            let (rest, index) = cut(parse_expression).parse(after_bracket)?;
            let (rest, _) = context("expected ']'", cut(ws(char(']')))).parse(rest)?;
            let span = Span::new(expression.span().start, rest.len());
            expression = Expression::Index(IndexAccess {
                base: Box::new(expression),
                index: Box::new(index),
                span,
            });
            remaining = rest;
            continue;
        }

        break;
    }
    Ok((remaining, expression))
}

fn parse_term(input: &str) -> PResult<'_, Expression> {
    let (input, _) = skip_ws(input)?;
    let (rest, expression) = context(
        "expected expression",
        alt((
            parse_literal,
            parse_parenthesized,
            parse_variable,
            parse_environment_variable,
            parse_invocation_term,
        )),
    )
    .parse(input)?;
    let (rest, _) = skip_ws(rest)?;
    Ok((rest, expression))
}

fn parse_parenthesized(input: &str) -> PResult<'_, Expression> {
    delimited(
        char('('),
        ws(parse_expression),
        context("expected ')'", cut(char(')'))),
    )
    .parse(input)
}

fn parse_variable(input: &str) -> PResult<'_, Expression> {
    let (rest, name) = preceded(char('$'), identifier).parse(input)?;
    Ok((
        rest,
        Expression::Variable(VariableNode {
            name: format!("${}", name),
            span: span(input, rest),
        }),
    ))
}

fn parse_environment_variable(input: &str) -> PResult<'_, Expression> {
    let (rest, name) = preceded(char('%'), alt((identifier, string_literal))).parse(input)?;
    Ok((
        rest,
        Expression::EnvironmentVariable(VariableNode {
            name,
            span: span(input, rest),
        }),
    ))
}

// A bare identifier, or a function call without an explicit receiver.
fn parse_invocation_term(input: &str) -> PResult<'_, Expression> {
    let (rest, name) = identifier(input)?;
    let (rest, args) = opt(call_arguments).parse(rest)?;
    let span = span(input, rest);
    let expression = match args {
        Some(args) => Expression::Invocation(FunctionCall {
            base: None,
            name,
            args,
            span,
        }),
        None => Expression::Identifier(IdentifierNode { name, span }),
    };
    Ok((rest, expression))
}

fn parse_literal(input: &str) -> PResult<'_, Expression> {
    let (rest, value) = alt((
        value(Literal::Empty, pair(char('{'), ws(char('}')))),
        value(Literal::Boolean(true), keyword("true")),
        value(Literal::Boolean(false), keyword("false")),
        map(string_literal, Literal::String),
        parse_temporal_literal,
        parse_number_or_quantity,
    ))
    .parse(input)?;
    Ok((
        rest,
        Expression::Literal(LiteralNode {
            value,
            span: span(input, rest),
        }),
    ))
}

const CALENDAR_UNITS: [&str; 16] = [
    "years",
    "year",
    "months",
    "month",
    "weeks",
    "week",
    "days",
    "day",
    "hours",
    "hour",
    "minutes",
    "minute",
    "seconds",
    "second",
    "milliseconds",
    "millisecond",
];

fn calendar_unit(input: &str) -> PResult<'_, String> {
    for unit in CALENDAR_UNITS {
        if let Ok((rest, matched)) = keyword(unit).parse(input) {
            return Ok((rest, matched.to_string()));
        }
    }
    Err(nom::Err::Error(FhirPathParsingError {
        errors: vec![(input, "expected calendar unit")],
    }))
}

fn parse_number_or_quantity(input: &str) -> PResult<'_, Literal> {
    let (rest, digits) = recognize(pair(digit1, opt(pair(char('.'), digit1)))).parse(input)?;
    let (rest, unit) =
        opt(preceded(multispace0, alt((string_literal, calendar_unit)))).parse(rest)?;

    if let Some(unit) = unit {
        return Ok((
            rest,
            Literal::Quantity {
                value: digits.to_string(),
                unit,
            },
        ));
    }

    if digits.contains('.') {
        return Ok((rest, Literal::Decimal(digits.to_string())));
    }
    match digits.parse::<i64>() {
        Ok(n) => Ok((rest, Literal::Integer(n))),
        Err(_) => Err(failure(input, "integer literal out of range")),
    }
}

fn parse_temporal_literal(input: &str) -> PResult<'_, Literal> {
    let (rest, text) = preceded(
        char('@'),
        take_while1(|c: char| c.is_ascii_digit() || "-:T.+Z".contains(c)),
    )
    .parse(input)?;

    match classify_temporal(text) {
        Some(literal) => Ok((rest, literal)),
        None => Err(failure(input, "invalid date/time literal")),
    }
}

fn classify_temporal(text: &str) -> Option<Literal> {
    if let Some(time) = text.strip_prefix('T') {
        return valid_time(time).then(|| Literal::Time(time.to_string()));
    }
    match text.split_once('T') {
        Some((date, time)) => {
            let time_ok = time.is_empty() || valid_time(strip_timezone(time));
            (valid_date(date) && time_ok).then(|| Literal::DateTime(text.to_string()))
        }
        None => valid_date(text).then(|| Literal::Date(text.to_string())),
    }
}

fn valid_date(text: &str) -> bool {
    match text.len() {
        4 => text.chars().all(|c| c.is_ascii_digit()),
        7 => NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d").is_ok(),
        10 => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        _ => false,
    }
}

fn valid_time(text: &str) -> bool {
    if text.len() == 2 {
        return text.parse::<u32>().is_ok_and(|h| h < 24);
    }
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .any(|format| NaiveTime::parse_from_str(text, format).is_ok())
}

fn strip_timezone(time: &str) -> &str {
    if let Some(stripped) = time.strip_suffix('Z') {
        return stripped;
    }
    let bytes = time.as_bytes();
    if bytes.len() > 6 && matches!(bytes[bytes.len() - 6], b'+' | b'-') {
        return &time[..time.len() - 6];
    }
    time
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expression {
        let (rest, mut expr) = parse_expression(input).expect("parse failed");
        assert!(rest.is_empty(), "unparsed input: {}", rest);
        expr.rebase_spans(input.len());
        expr
    }

    #[test]
    fn test_member_chain_with_call() {
        let expr = parse("Patient.name.given.where($this = 'Peter')");
        let Expression::Invocation(call) = expr else {
            panic!("expected invocation");
        };
        assert_eq!(call.name, "where");
        assert_eq!(call.args.len(), 1);
        assert!(matches!(call.base.as_deref(), Some(Expression::Member(m)) if m.name == "given"));
        assert_eq!(call.span, Span::new(0, 41));
    }

    #[test]
    fn test_integer_receiver_is_not_decimal() {
        let expr = parse("1.is(Decimal).not()");
        let Expression::Invocation(not_call) = expr else {
            panic!("expected not()");
        };
        let Some(Expression::Invocation(is_call)) = not_call.base.as_deref() else {
            panic!("expected is()");
        };
        assert!(matches!(
            is_call.base.as_deref(),
            Some(Expression::Literal(LiteralNode {
                value: Literal::Integer(1),
                ..
            }))
        ));
    }

    #[test]
    fn test_precedence_multiplication_over_addition() {
        let expr = parse("1 + 2 * 3");
        let Expression::Binary(add) = expr else {
            panic!("expected binary");
        };
        assert_eq!(add.operator, BinaryOperator::Add);
        assert!(matches!(*add.right, Expression::Binary(ref m) if m.operator == BinaryOperator::Multiply));
    }

    #[test]
    fn test_union_is_left_recursive() {
        let expr = parse("(1|2|3)");
        let Expression::Union(outer) = expr else {
            panic!("expected union");
        };
        assert!(matches!(*outer.left, Expression::Union(_)));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("a or b and c");
        let Expression::Binary(or) = expr else {
            panic!("expected binary");
        };
        assert_eq!(or.operator, BinaryOperator::Or);
    }

    #[test]
    fn test_quantity_and_temporal_literals() {
        assert!(matches!(
            parse("5 'mg'"),
            Expression::Literal(LiteralNode { value: Literal::Quantity { ref unit, .. }, .. }) if unit == "mg"
        ));
        assert!(matches!(
            parse("@2020-01-01T10:00:00Z"),
            Expression::Literal(LiteralNode { value: Literal::DateTime(_), .. })
        ));
        assert!(matches!(
            parse("@T12:30"),
            Expression::Literal(LiteralNode { value: Literal::Time(ref t), .. }) if t == "12:30"
        ));
        assert!(parse_expression("@2020-13-01").is_err());
    }

    #[test]
    fn test_type_operator_and_negation() {
        let expr = parse("-value as Quantity");
        let Expression::TypeOperation(op) = expr else {
            panic!("expected type operation");
        };
        assert_eq!(op.type_name, "Quantity");
        assert!(matches!(*op.operand, Expression::Unary(_)));
    }

    #[test]
    fn test_indexer_and_environment_variable() {
        assert!(matches!(parse("name[0]"), Expression::Index(_)));
        assert!(matches!(
            parse("%resource"),
            Expression::EnvironmentVariable(VariableNode { ref name, .. }) if name == "resource"
        ));
    }
}
