//! RcDoc-based pretty-printer with termcolor annotations for [`Expression`].
//!
//! Role
//! - Convert an expression into an annotated document suitable for width-aware rendering.
//! - Provide colored output for terminals (TTY-aware) and plain strings for logs/tests.
//!
//! Parenthesization follows [`super::printer`], so the plain rendering re-parses to an
//! equivalent expression.

use std::io::{self, Write};

use pretty::{RcDoc, RenderAnnotated};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use super::printer::{
    default_operator_name, format_number, left_needs_parens, prefix_needs_parens,
    right_needs_parens,
};
use super::{Expression, Matrix, Operator};

/// Styles used to annotate parts of the pretty-printed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Punct, // commas, semicolons, brackets
    /// Parentheses are colored by nesting depth so matching pairs share a color.
    Paren(u8),
    Keyword,  // true, false, lut, reshape
    Operator, // + - * / ^ & | comparisons
    Function, // sin, cos, loc, ...
    Ident,    // variables
    Number,
}

impl Style {
    fn to_color_spec(self) -> ColorSpec {
        let mut s = ColorSpec::new();
        match self {
            Style::Punct => {
                s.set_dimmed(true);
            }
            Style::Paren(depth) => {
                let fg = match depth % 6 {
                    0 => Color::Blue,
                    1 => Color::Green,
                    2 => Color::White,
                    3 => Color::Yellow,
                    4 => Color::Red,
                    _ => Color::Magenta,
                };
                s.set_fg(Some(fg)).set_dimmed(true);
            }
            Style::Keyword => {
                s.set_fg(Some(Color::Cyan)).set_bold(true);
            }
            Style::Operator => {
                s.set_fg(Some(Color::Yellow)).set_bold(true);
            }
            Style::Function => {
                s.set_fg(Some(Color::Magenta));
            }
            Style::Ident => {
                s.set_fg(Some(Color::Green)).set_bold(true);
            }
            Style::Number => {
                s.set_fg(Some(Color::Blue));
            }
        }
        s
    }
}

fn styled(style: Style, s: impl Into<String>) -> RcDoc<'static, Style> {
    RcDoc::text(s.into()).annotate(style)
}

fn punct(s: &'static str) -> RcDoc<'static, Style> {
    styled(Style::Punct, s)
}

#[inline]
fn lparen(depth: u8) -> RcDoc<'static, Style> {
    RcDoc::as_string("(").annotate(Style::Paren(depth))
}

#[inline]
fn rparen(depth: u8) -> RcDoc<'static, Style> {
    RcDoc::as_string(")").annotate(Style::Paren(depth))
}

fn number(v: f64) -> RcDoc<'static, Style> {
    styled(Style::Number, format_number(v))
}

fn parenthesized(e: &Expression, need: bool, depth: u8) -> RcDoc<'static, Style> {
    if need {
        lparen(depth)
            .append(to_doc_with_depth(e, depth + 1))
            .append(rparen(depth))
            .group()
    } else {
        to_doc_with_depth(e, depth)
    }
}

fn comma_list(items: Vec<RcDoc<'static, Style>>) -> RcDoc<'static, Style> {
    RcDoc::intersperse(items, punct(",").append(RcDoc::line())).group()
}

fn matrix_doc(m: &Matrix) -> RcDoc<'static, Style> {
    let numbers = |values: &[f64]| comma_list(values.iter().map(|v| number(*v)).collect());
    match m.dims() {
        [_] => punct("[").append(numbers(m.data())).append(punct("]")),
        [rows, _] if *rows > 1 => {
            let rows = m.rows().unwrap_or_default();
            let rows: Vec<_> = rows.iter().map(|r| numbers(r)).collect();
            punct("[")
                .append(RcDoc::intersperse(rows, punct(" ;").append(RcDoc::line())).nest(1))
                .append(punct("]"))
                .group()
        }
        dims => styled(Style::Keyword, "reshape")
            .append(lparen(0))
            .append(punct("["))
            .append(numbers(m.data()))
            .append(punct("]"))
            .append(punct(", "))
            .append(comma_list(
                dims.iter().map(|d| styled(Style::Number, d.to_string())).collect(),
            ))
            .append(rparen(0))
            .group(),
    }
}

/// Depth-aware variant that colors parentheses by nesting level.
fn to_doc_with_depth(e: &Expression, depth: u8) -> RcDoc<'static, Style> {
    match e {
        Expression::Number(v) => number(*v),
        Expression::Bool(b) => styled(Style::Keyword, if *b { "true" } else { "false" }),
        Expression::Variable(name) => styled(Style::Ident, name.clone()),
        Expression::Interval(i) => punct("[")
            .append(number(i.min))
            .append(punct(", "))
            .append(number(i.max))
            .append(punct("]")),
        Expression::Matrix(m) => matrix_doc(m),
        Expression::Lut(lut) => {
            let inputs = comma_list(
                lut.inputs
                    .iter()
                    .map(|i| to_doc_with_depth(i, depth + 1))
                    .collect(),
            );
            let mut args = vec![punct("[").append(inputs).append(punct("]"))];
            args.push(matrix_doc(&lut.table));
            args.extend(lut.breakpoints.iter().map(matrix_doc));
            styled(Style::Keyword, "lut")
                .append(lparen(depth))
                .append(comma_list(args).nest(2))
                .append(rparen(depth))
                .group()
        }
        Expression::Operation(op, children) => operation_doc(*op, children, depth),
    }
}

fn operation_doc(op: Operator, children: &[Expression], depth: u8) -> RcDoc<'static, Style> {
    let name = default_operator_name(op);
    match children {
        [child] if op.is_function() => styled(Style::Function, name)
            .append(lparen(depth))
            .append(to_doc_with_depth(child, depth + 1))
            .append(rparen(depth))
            .group(),
        [child] => styled(Style::Operator, name)
            .append(parenthesized(child, prefix_needs_parens(child), depth)),
        [left, right] => parenthesized(left, left_needs_parens(op, left), depth)
            .append(RcDoc::line())
            .append(styled(Style::Operator, name))
            .append(RcDoc::space())
            .append(parenthesized(right, right_needs_parens(op, right), depth))
            .group()
            .nest(2),
        _ => styled(Style::Function, name)
            .append(lparen(depth))
            .append(comma_list(
                children
                    .iter()
                    .map(|c| to_doc_with_depth(c, depth + 1))
                    .collect(),
            ))
            .append(rparen(depth))
            .group(),
    }
}

// A writer that maps Style annotations to termcolor ColorSpec on a WriteColor sink.
struct ColorWriter<'w, W: WriteColor + Write> {
    out: &'w mut W,
}

impl<'a, 'w, W: WriteColor + Write> RenderAnnotated<'a, Style> for ColorWriter<'w, W> {
    fn push_annotation(&mut self, ann: &'a Style) -> io::Result<()> {
        self.out.set_color(&ann.to_color_spec())
    }
    fn pop_annotation(&mut self) -> io::Result<()> {
        self.out.reset()
    }
}

impl<'w, W: WriteColor + Write> pretty::Render for ColorWriter<'w, W> {
    type Error = io::Error;
    fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.out.write_all(s.as_bytes())?;
        Ok(s.len())
    }
    fn write_str_all(&mut self, s: &str) -> io::Result<()> {
        self.out.write_all(s.as_bytes())
    }
    fn fail_doc(&self) -> Self::Error {
        io::Error::other("render failed")
    }
}

fn terminal_width() -> usize {
    term_size::dimensions().map(|(w, _)| w).unwrap_or(80)
}

pub trait PrettyExpr {
    /// Build an RcDoc representation of this expression with style annotations.
    fn pretty_doc(&self) -> RcDoc<'static, Style>;

    /// Render this expression with colors to any termcolor writer at the given width.
    fn pretty_render_to<W: WriteColor + Write>(&self, width: usize, out: &mut W) -> io::Result<()>;

    /// Print to stdout with colors (TTY-aware), at the terminal width or 80.
    fn pretty_print(&self) -> io::Result<()>;

    /// Plain string at the given width, without colors.
    fn pretty_string(&self, width: usize) -> String;
}

impl PrettyExpr for Expression {
    #[inline]
    fn pretty_doc(&self) -> RcDoc<'static, Style> {
        to_doc_with_depth(self, 0)
    }

    fn pretty_render_to<W: WriteColor + Write>(&self, width: usize, out: &mut W) -> io::Result<()> {
        let mut cw = ColorWriter { out };
        self.pretty_doc().render_raw(width, &mut cw)
    }

    fn pretty_print(&self) -> io::Result<()> {
        let stdout = StandardStream::stdout(ColorChoice::Auto);
        let mut stdout = stdout.lock();
        self.pretty_render_to(terminal_width(), &mut stdout)?;
        writeln!(stdout)
    }

    fn pretty_string(&self, width: usize) -> String {
        let mut buf = String::new();
        let _ = self.pretty_doc().render_fmt(width, &mut buf);
        buf
    }
}
