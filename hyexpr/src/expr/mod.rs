//! Closed expression tree shared by guards, invariants, flows, resets and initial sets.
//!
//! Role
//! - One tagged union ([`Expression`]) for every textual context of a hybrid automaton.
//! - Concerns (printing, evaluation, substitution, differentiation) are plain functions
//!   matching on the tree; there is no visitor interface per concern.
//!
//! Conventions
//! - Boolean literals are [`Expression::Bool`]; numerically they evaluate to `1` and `0`.
//! - A reset `x := e` is stored as `Equal(x, e)`, a flow `x' == e` as `Equal(x, e)`
//!   (the prime is dropped by the parser).
//! - [`Expression::Interval`] is a transient term produced while substituting
//!   nondeterministic values; the parser never produces it.

mod matrix;
pub mod pretty;
pub mod printer;
pub mod symbolic;

use std::collections::BTreeSet;
use std::fmt;

use enum_map::Enum;
use strum::{EnumIs, EnumIter, IntoStaticStr};

pub use matrix::{CellIndex, Lut, Matrix};
pub use printer::{DefaultPrinter, ExpressionPrinter};

use crate::interval::Interval;

/// Operators of [`Expression::Operation`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumIs, IntoStaticStr, Enum,
)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Pow,
    And,
    Or,
    Equal,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    NotEqual,
    Negative,
    LogicalNot,
    Sin,
    Cos,
    Tan,
    Exp,
    Sqrt,
    Ln,
    /// `loc(automaton)`, only valid inside initial/forbidden location expressions.
    Loc,
}

impl Operator {
    /// Binding strength for infix printing, lowest first. Prefix operators have none.
    pub fn priority(self) -> Option<u8> {
        use Operator::*;
        match self {
            Or => Some(0),
            And => Some(1),
            Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual => Some(2),
            Add | Subtract => Some(3),
            Multiply | Divide => Some(4),
            Pow => Some(5),
            Sin | Cos | Tan | Exp | Sqrt | Ln | Loc => Some(6),
            Negative | LogicalNot => None,
        }
    }

    pub fn is_commutative(self) -> bool {
        use Operator::*;
        matches!(self, Add | Multiply | And | Or | Equal | NotEqual)
    }

    pub fn is_comparison(self) -> bool {
        use Operator::*;
        matches!(
            self,
            Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual
        )
    }

    pub fn is_boolean(self) -> bool {
        self.is_comparison() || matches!(self, Operator::And | Operator::Or | Operator::LogicalNot)
    }

    /// Named one-argument functions (`sin(x)`, `loc(a)`, ...).
    pub fn is_function(self) -> bool {
        use Operator::*;
        matches!(self, Sin | Cos | Tan | Exp | Sqrt | Ln | Loc)
    }

    pub fn arity(self) -> usize {
        if self.is_function() || matches!(self, Operator::Negative | Operator::LogicalNot) {
            1
        } else {
            2
        }
    }

    pub fn from_function_name(name: &str) -> Option<Self> {
        use Operator::*;
        Some(match name {
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "exp" => Exp,
            "sqrt" => Sqrt,
            "ln" => Ln,
            "loc" => Loc,
            _ => return None,
        })
    }

    /// The comparison obtained by swapping both operands (`a < b` is `b > a`).
    pub fn mirrored(self) -> Option<Self> {
        use Operator::*;
        Some(match self {
            Less => Greater,
            Greater => Less,
            LessEqual => GreaterEqual,
            GreaterEqual => LessEqual,
            Equal => Equal,
            NotEqual => NotEqual,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, EnumIs)]
pub enum Expression {
    Number(f64),
    Bool(bool),
    Variable(String),
    Operation(Operator, Vec<Expression>),
    Matrix(Matrix),
    Lut(Box<Lut>),
    Interval(Interval),
}

impl Expression {
    pub const TRUE: Expression = Expression::Bool(true);
    pub const FALSE: Expression = Expression::Bool(false);

    pub fn num(value: f64) -> Self {
        Expression::Number(value)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expression::Variable(name.into())
    }

    pub fn unary(op: Operator, child: Expression) -> Self {
        Expression::Operation(op, vec![child])
    }

    pub fn binary(op: Operator, left: Expression, right: Expression) -> Self {
        Expression::Operation(op, vec![left, right])
    }

    /// Conjunction that drops literal `true` operands.
    pub fn and(left: Expression, right: Expression) -> Self {
        if left.is_true() {
            right
        } else if right.is_true() {
            left
        } else {
            Expression::binary(Operator::And, left, right)
        }
    }

    /// Left-folded conjunction of every item; `true` when empty.
    pub fn and_all(items: impl IntoIterator<Item = Expression>) -> Self {
        items.into_iter().fold(Expression::TRUE, Expression::and)
    }

    /// Disjunction that drops literal `false` operands.
    pub fn or(left: Expression, right: Expression) -> Self {
        if left.is_false() {
            right
        } else if right.is_false() {
            left
        } else {
            Expression::binary(Operator::Or, left, right)
        }
    }

    pub fn equal(left: Expression, right: Expression) -> Self {
        Expression::binary(Operator::Equal, left, right)
    }

    pub fn less_equal(left: Expression, right: Expression) -> Self {
        Expression::binary(Operator::LessEqual, left, right)
    }

    pub fn greater_equal(left: Expression, right: Expression) -> Self {
        Expression::binary(Operator::GreaterEqual, left, right)
    }

    pub fn pow(base: Expression, exponent: Expression) -> Self {
        Expression::binary(Operator::Pow, base, exponent)
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expression::Bool(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expression::Bool(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expression::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Expression::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_operation(&self) -> Option<(Operator, &[Expression])> {
        match self {
            Expression::Operation(op, children) => Some((*op, children)),
            _ => None,
        }
    }

    /// Operator and both operands of a binary operation.
    pub fn as_binary(&self) -> Option<(Operator, &Expression, &Expression)> {
        match self {
            Expression::Operation(op, children) if children.len() == 2 => {
                Some((*op, &children[0], &children[1]))
            }
            _ => None,
        }
    }

    pub fn children(&self) -> &[Expression] {
        match self {
            Expression::Operation(_, children) => children,
            _ => &[],
        }
    }

    /// Top-level conjuncts, flattening nested `&`.
    pub fn conjuncts(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        fn walk<'a>(e: &'a Expression, out: &mut Vec<&'a Expression>) {
            match e {
                Expression::Operation(Operator::And, children) => {
                    children.iter().for_each(|c| walk(c, out))
                }
                other => out.push(other),
            }
        }
        walk(self, &mut out);
        out
    }

    /// Top-level disjuncts, flattening nested `|`.
    pub fn disjuncts(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        fn walk<'a>(e: &'a Expression, out: &mut Vec<&'a Expression>) {
            match e {
                Expression::Operation(Operator::Or, children) => {
                    children.iter().for_each(|c| walk(c, out))
                }
                other => out.push(other),
            }
        }
        walk(self, &mut out);
        out
    }

    /// Every variable name referenced by this expression, including LUT inputs.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    pub fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Variable(name) => {
                out.insert(name.clone());
            }
            Expression::Operation(_, children) => {
                children.iter().for_each(|c| c.collect_variables(out))
            }
            Expression::Lut(lut) => lut.inputs.iter().for_each(|c| c.collect_variables(out)),
            Expression::Number(_)
            | Expression::Bool(_)
            | Expression::Matrix(_)
            | Expression::Interval(_) => {}
        }
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        match self {
            Expression::Variable(v) => v == name,
            Expression::Operation(_, children) => children.iter().any(|c| c.contains_variable(name)),
            Expression::Lut(lut) => lut.inputs.iter().any(|c| c.contains_variable(name)),
            Expression::Number(_)
            | Expression::Bool(_)
            | Expression::Matrix(_)
            | Expression::Interval(_) => false,
        }
    }

    pub fn contains_operator(&self, op: Operator) -> bool {
        match self {
            Expression::Operation(o, children) => {
                *o == op || children.iter().any(|c| c.contains_operator(op))
            }
            Expression::Lut(lut) => lut.inputs.iter().any(|c| c.contains_operator(op)),
            _ => false,
        }
    }

    /// First LUT sub-term in pre-order, if any.
    pub fn find_lut(&self) -> Option<&Lut> {
        match self {
            Expression::Lut(lut) => Some(lut),
            Expression::Operation(_, children) => children.iter().find_map(|c| c.find_lut()),
            _ => None,
        }
    }

    /// Rebuild the tree bottom-up, letting `f` replace any node after its children were mapped.
    pub fn transform(&self, f: &mut impl FnMut(Expression) -> Expression) -> Expression {
        let rebuilt = match self {
            Expression::Operation(op, children) => {
                Expression::Operation(*op, children.iter().map(|c| c.transform(f)).collect())
            }
            Expression::Lut(lut) => Expression::Lut(Box::new(Lut {
                inputs: lut.inputs.iter().map(|c| c.transform(f)).collect(),
                table: lut.table.clone(),
                breakpoints: lut.breakpoints.clone(),
            })),
            other => other.clone(),
        };
        f(rebuilt)
    }

    /// Rename every variable through `rename`.
    pub fn rename_variables(&self, rename: &impl Fn(&str) -> String) -> Expression {
        self.transform(&mut |e| match e {
            Expression::Variable(name) => Expression::Variable(rename(&name)),
            other => other,
        })
    }

    /// Replace every occurrence of `from` by a copy of `to`.
    pub fn replace(&self, from: &Expression, to: &Expression) -> Expression {
        self.transform(&mut |e| if &e == from { to.clone() } else { e })
    }

    /// Print with the default printer.
    pub fn to_default_string(&self) -> String {
        DefaultPrinter::default().print(self)
    }

    /// Print with an explicit printer context.
    pub fn print_with(&self, printer: &dyn ExpressionPrinter) -> String {
        printer.print(self)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_default_string())
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Number(value)
    }
}

impl From<&str> for Expression {
    fn from(name: &str) -> Self {
        Expression::Variable(name.to_string())
    }
}

impl From<bool> for Expression {
    fn from(value: bool) -> Self {
        Expression::Bool(value)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Expression {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::binary($op, self, rhs)
            }
        }

        impl std::ops::$trait<f64> for Expression {
            type Output = Expression;

            fn $method(self, rhs: f64) -> Expression {
                Expression::binary($op, self, Expression::Number(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, Operator::Add);
impl_binary_op!(Sub, sub, Operator::Subtract);
impl_binary_op!(Mul, mul, Operator::Multiply);
impl_binary_op!(Div, div, Operator::Divide);

impl std::ops::Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        match self {
            Expression::Number(v) => Expression::Number(-v),
            Expression::Operation(Operator::Negative, mut children) if children.len() == 1 => {
                children.remove(0)
            }
            other => Expression::unary(Operator::Negative, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_drops_true_operands() {
        let x = Expression::less_equal(Expression::var("x"), Expression::num(1.0));
        assert_eq!(Expression::and(Expression::TRUE, x.clone()), x);
        assert_eq!(Expression::and(x.clone(), Expression::TRUE), x);
        assert_eq!(Expression::and_all([]), Expression::TRUE);
    }

    #[test]
    fn conjuncts_flatten_nested_and() {
        let e = Expression::and(
            Expression::and(Expression::var("a"), Expression::var("b")),
            Expression::var("c"),
        );
        let names: Vec<_> = e
            .conjuncts()
            .iter()
            .map(|c| c.as_variable().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn negation_cancels() {
        let x = Expression::var("x");
        assert_eq!(-(-x.clone()), x);
        assert_eq!(-Expression::num(2.0), Expression::num(-2.0));
    }

    #[test]
    fn mirrored_comparisons() {
        assert_eq!(Operator::Less.mirrored(), Some(Operator::Greater));
        assert_eq!(Operator::GreaterEqual.mirrored(), Some(Operator::LessEqual));
        assert_eq!(Operator::Add.mirrored(), None);
    }
}
