//! Closed AST for FHIRPath expressions.
//!
//! Every node kind is its own variant, so the translator dispatches with one
//! exhaustive `match` and a node can never be handled as a different kind.

use std::fmt;

/// Byte offsets into the source text, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    /// `{}`
    Empty,
    Boolean(bool),
    String(String),
    Integer(i64),
    /// Kept as source text so the generated SQL carries the exact digits.
    Decimal(String),
    Date(String),
    DateTime(String),
    Time(String),
    Quantity { value: String, unit: String },
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOperator {
    Multiply,
    Divide,
    IntegerDivide,
    Modulo,
    Add,
    Subtract,
    Concatenate,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Equal,
    NotEqual,
    Equivalent,
    NotEquivalent,
    In,
    Contains,
    And,
    Or,
    Xor,
    Implies,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::IntegerDivide => "div",
            BinaryOperator::Modulo => "mod",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Concatenate => "&",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterOrEqual => ">=",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Equivalent => "~",
            BinaryOperator::NotEquivalent => "!~",
            BinaryOperator::In => "in",
            BinaryOperator::Contains => "contains",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Xor => "xor",
            BinaryOperator::Implies => "implies",
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOperator {
    Plus,
    Minus,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum TypeOperator {
    Is,
    As,
}

#[derive(Debug, PartialEq, Clone)]
pub struct LiteralNode {
    pub value: Literal,
    pub span: Span,
}

/// A bare name: a member of the implicit context or a resource type.
#[derive(Debug, PartialEq, Clone)]
pub struct IdentifierNode {
    pub name: String,
    pub span: Span,
}

/// `$this`, `$index`, `$total` (name stored with the sigil) or `%name` (without it).
#[derive(Debug, PartialEq, Clone)]
pub struct VariableNode {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct MemberAccess {
    pub base: Box<Expression>,
    pub name: String,
    pub span: Span,
}

/// `name(args)`; `base` is `None` when the call has no explicit receiver.
#[derive(Debug, PartialEq, Clone)]
pub struct FunctionCall {
    pub base: Option<Box<Expression>>,
    pub name: String,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct IndexAccess {
    pub base: Box<Expression>,
    pub index: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct UnaryOperation {
    pub operator: UnaryOperator,
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct BinaryOperation {
    pub operator: BinaryOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct UnionOperation {
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct TypeOperation {
    pub operator: TypeOperator,
    pub operand: Box<Expression>,
    /// Possibly qualified, e.g. `FHIR.Quantity` or `System.Integer`.
    pub type_name: String,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Literal(LiteralNode),
    Identifier(IdentifierNode),
    Variable(VariableNode),
    EnvironmentVariable(VariableNode),
    Member(MemberAccess),
    Invocation(FunctionCall),
    Index(IndexAccess),
    Unary(UnaryOperation),
    Binary(BinaryOperation),
    Union(UnionOperation),
    TypeOperation(TypeOperation),
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Literal(n) => n.span,
            Expression::Identifier(n) => n.span,
            Expression::Variable(n) | Expression::EnvironmentVariable(n) => n.span,
            Expression::Member(n) => n.span,
            Expression::Invocation(n) => n.span,
            Expression::Index(n) => n.span,
            Expression::Unary(n) => n.span,
            Expression::Binary(n) => n.span,
            Expression::Union(n) => n.span,
            Expression::TypeOperation(n) => n.span,
        }
    }

    /// True if any `$`-variable in `names` appears anywhere below this node.
    ///
    /// Nested iteration scopes are not excluded, so the answer may be a
    /// conservative `true`.
    pub fn mentions_variable(&self, names: &[&str]) -> bool {
        match self {
            Expression::Variable(v) => names.contains(&v.name.as_str()),
            Expression::Literal(_) | Expression::Identifier(_) => false,
            Expression::EnvironmentVariable(_) => false,
            Expression::Member(m) => m.base.mentions_variable(names),
            Expression::Invocation(call) => {
                call.base
                    .as_ref()
                    .is_some_and(|b| b.mentions_variable(names))
                    || call.args.iter().any(|a| a.mentions_variable(names))
            }
            Expression::Index(ix) => {
                ix.base.mentions_variable(names) || ix.index.mentions_variable(names)
            }
            Expression::Unary(u) => u.operand.mentions_variable(names),
            Expression::Binary(b) => {
                b.left.mentions_variable(names) || b.right.mentions_variable(names)
            }
            Expression::Union(u) => {
                u.left.mentions_variable(names) || u.right.mentions_variable(names)
            }
            Expression::TypeOperation(t) => t.operand.mentions_variable(names),
        }
    }

    /// Reads a type specifier written as an argument, e.g. `ofType(FHIR.Quantity)`.
    pub fn as_type_specifier(&self) -> Option<String> {
        match self {
            Expression::Identifier(id) => Some(id.name.clone()),
            Expression::Member(m) => m
                .base
                .as_type_specifier()
                .map(|qualifier| format!("{}.{}", qualifier, m.name)),
            _ => None,
        }
    }

    /// Converts spans recorded as "bytes remaining" into offsets from the start.
    pub(crate) fn rebase_spans(&mut self, total: usize) {
        fn rebase(span: &mut Span, total: usize) {
            *span = Span::new(total - span.start, total - span.end);
        }
        match self {
            Expression::Literal(n) => rebase(&mut n.span, total),
            Expression::Identifier(n) => rebase(&mut n.span, total),
            Expression::Variable(n) | Expression::EnvironmentVariable(n) => {
                rebase(&mut n.span, total)
            }
            Expression::Member(n) => {
                rebase(&mut n.span, total);
                n.base.rebase_spans(total);
            }
            Expression::Invocation(n) => {
                rebase(&mut n.span, total);
                if let Some(base) = n.base.as_mut() {
                    base.rebase_spans(total);
                }
                for arg in n.args.iter_mut() {
                    arg.rebase_spans(total);
                }
            }
            Expression::Index(n) => {
                rebase(&mut n.span, total);
                n.base.rebase_spans(total);
                n.index.rebase_spans(total);
            }
            Expression::Unary(n) => {
                rebase(&mut n.span, total);
                n.operand.rebase_spans(total);
            }
            Expression::Binary(n) => {
                rebase(&mut n.span, total);
                n.left.rebase_spans(total);
                n.right.rebase_spans(total);
            }
            Expression::Union(n) => {
                rebase(&mut n.span, total);
                n.left.rebase_spans(total);
                n.right.rebase_spans(total);
            }
            Expression::TypeOperation(n) => {
                rebase(&mut n.span, total);
                n.operand.rebase_spans(total);
            }
        }
    }
}

/// Convenience constructors, mostly used by tests and programmatic callers.
pub mod build {
    use super::*;

    pub fn integer(value: i64) -> Expression {
        Expression::Literal(LiteralNode {
            value: Literal::Integer(value),
            span: Span::default(),
        })
    }

    pub fn string(value: &str) -> Expression {
        Expression::Literal(LiteralNode {
            value: Literal::String(value.to_string()),
            span: Span::default(),
        })
    }

    pub fn identifier(name: &str) -> Expression {
        Expression::Identifier(IdentifierNode {
            name: name.to_string(),
            span: Span::default(),
        })
    }

    pub fn variable(name: &str) -> Expression {
        Expression::Variable(VariableNode {
            name: name.to_string(),
            span: Span::default(),
        })
    }

    pub fn member(base: Expression, name: &str) -> Expression {
        Expression::Member(MemberAccess {
            base: Box::new(base),
            name: name.to_string(),
            span: Span::default(),
        })
    }

    pub fn call(base: Option<Expression>, name: &str, args: Vec<Expression>) -> Expression {
        Expression::Invocation(FunctionCall {
            base: base.map(Box::new),
            name: name.to_string(),
            args,
            span: Span::default(),
        })
    }

    pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Expression {
        Expression::Binary(BinaryOperation {
            operator,
            left: Box::new(left),
            right: Box::new(right),
            span: Span::default(),
        })
    }

    pub fn union(left: Expression, right: Expression) -> Expression {
        Expression::Union(UnionOperation {
            left: Box::new(left),
            right: Box::new(right),
            span: Span::default(),
        })
    }

    /// Builds `a.b.c` from a dotted path.
    pub fn path(dotted: &str) -> Expression {
        let mut parts = dotted.split('.');
        let first = parts.next().unwrap_or_default();
        parts.fold(identifier(first), member)
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    #[test]
    fn test_mentions_variable_through_arguments() {
        let expr = call(
            Some(path("name.given")),
            "where",
            vec![binary(BinaryOperator::Equal, variable("$index"), integer(0))],
        );
        assert!(expr.mentions_variable(&["$index", "$total"]));
        assert!(!expr.mentions_variable(&["$total"]));
    }

    #[test]
    fn test_type_specifier_qualified() {
        let spec = member(identifier("FHIR"), "Quantity");
        assert_eq!(spec.as_type_specifier().as_deref(), Some("FHIR.Quantity"));
        assert_eq!(integer(1).as_type_specifier(), None);
    }
}
