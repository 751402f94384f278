//! Plain-text printing with an explicit printer context.
//!
//! Target-tool printers implement [`ExpressionPrinter`] and override only the pieces
//! that differ (operator spelling, constant formatting, variable renaming); every
//! other node falls back to the default behavior, which re-parses to an equivalent
//! expression.

use enum_map::EnumMap;

use super::{Expression, Lut, Matrix, Operator};
use crate::interval::Interval;

/// Does `child`, printed as the left operand of `parent`, need parentheses?
pub fn left_needs_parens(parent: Operator, child: &Expression) -> bool {
    let Some((child_op, children)) = child.as_operation() else {
        return false;
    };
    if children.len() < 2 {
        return false;
    }
    if parent.is_comparison() && child_op.is_comparison() {
        return true;
    }
    match (parent.priority(), child_op.priority()) {
        (Some(p), Some(c)) => c < p || (c == p && parent == Operator::Pow),
        _ => false,
    }
}

/// Does `child`, printed as the right operand of `parent`, need parentheses?
pub fn right_needs_parens(parent: Operator, child: &Expression) -> bool {
    let Some((child_op, children)) = child.as_operation() else {
        return false;
    };
    if children.len() < 2 {
        return false;
    }
    if parent.is_comparison() && child_op.is_comparison() {
        return true;
    }
    match (parent.priority(), child_op.priority()) {
        (Some(p), Some(c)) => p > c || (p == c && !parent.is_commutative()),
        _ => false,
    }
}

/// Does the operand of a prefix operator (`-`, `!`) need parentheses?
pub fn prefix_needs_parens(child: &Expression) -> bool {
    child.children().len() > 1
}

/// Shortest representation that parses back to the same value, always with a fraction.
/// Non-finite values print as a parenthesized division by zero.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "(0.0 / 0.0)".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" }.to_string();
    }
    let mut s = format!("{value}");
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

/// Spelling of each operator in the default textual syntax.
pub fn default_operator_name(op: Operator) -> &'static str {
    use Operator::*;
    match op {
        Add => "+",
        Subtract => "-",
        Multiply => "*",
        Divide => "/",
        Pow => "^",
        And => "&",
        Or => "|",
        Equal => "=",
        Less => "<",
        Greater => ">",
        LessEqual => "<=",
        GreaterEqual => ">=",
        NotEqual => "!=",
        Negative => "-",
        LogicalNot => "!",
        Sin => "sin",
        Cos => "cos",
        Tan => "tan",
        Exp => "exp",
        Sqrt => "sqrt",
        Ln => "ln",
        Loc => "loc",
    }
}

pub trait ExpressionPrinter {
    fn operator_name(&self, op: Operator) -> &str;

    fn print(&self, e: &Expression) -> String {
        match e {
            Expression::Number(v) => self.print_number(*v),
            Expression::Bool(b) => self.print_bool(*b),
            Expression::Variable(name) => self.print_variable(name),
            Expression::Operation(op, children) => self.print_operation(*op, children),
            Expression::Matrix(m) => self.print_matrix(m),
            Expression::Lut(lut) => self.print_lut(lut),
            Expression::Interval(i) => self.print_interval(i),
        }
    }

    fn print_number(&self, value: f64) -> String {
        format_number(value)
    }

    fn print_bool(&self, value: bool) -> String {
        if value { "true" } else { "false" }.to_string()
    }

    fn print_variable(&self, name: &str) -> String {
        name.to_string()
    }

    fn print_operation(&self, op: Operator, children: &[Expression]) -> String {
        let name = self.operator_name(op);
        match children {
            [child] if op.is_function() => format!("{name}({})", self.print(child)),
            [child] => {
                if prefix_needs_parens(child) {
                    format!("{name}({})", self.print(child))
                } else {
                    format!("{name}{}", self.print(child))
                }
            }
            [left, right] => {
                let l = self.print(left);
                let r = self.print(right);
                let l = if left_needs_parens(op, left) { format!("({l})") } else { l };
                let r = if right_needs_parens(op, right) { format!("({r})") } else { r };
                format!("{l} {name} {r}")
            }
            _ => {
                let args: Vec<String> = children.iter().map(|c| self.print(c)).collect();
                format!("{name}({})", args.join(", "))
            }
        }
    }

    fn print_matrix(&self, m: &Matrix) -> String {
        let numbers = |values: &[f64]| -> String {
            values
                .iter()
                .map(|v| self.print_number(*v))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match m.dims() {
            [_] => format!("[{}]", numbers(m.data())),
            [rows, _] if *rows > 1 => {
                let rows = m.rows().unwrap_or_default();
                let rows: Vec<String> = rows.iter().map(|r| numbers(r)).collect();
                format!("[{}]", rows.join(" ; "))
            }
            dims => {
                let widths: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                format!("reshape([{}], {})", numbers(m.data()), widths.join(", "))
            }
        }
    }

    fn print_lut(&self, lut: &Lut) -> String {
        let inputs: Vec<String> = lut.inputs.iter().map(|i| self.print(i)).collect();
        let mut out = format!("lut([{}], {}", inputs.join(", "), self.print_matrix(&lut.table));
        for bp in &lut.breakpoints {
            out.push_str(", ");
            out.push_str(&self.print_matrix(bp));
        }
        out.push(')');
        out
    }

    fn print_interval(&self, i: &Interval) -> String {
        format!("[{}, {}]", self.print_number(i.min), self.print_number(i.max))
    }
}

/// The default syntax, re-parseable by [`crate::parser`].
#[derive(Debug, Clone)]
pub struct DefaultPrinter {
    names: EnumMap<Operator, String>,
}

impl Default for DefaultPrinter {
    fn default() -> Self {
        Self {
            names: EnumMap::from_fn(|op| default_operator_name(op).to_string()),
        }
    }
}

impl DefaultPrinter {
    pub fn with_operator_name(mut self, op: Operator, name: impl Into<String>) -> Self {
        self.names[op] = name.into();
        self
    }
}

impl ExpressionPrinter for DefaultPrinter {
    fn operator_name(&self, op: Operator) -> &str {
        &self.names[op]
    }
}
