//! Character-level chumsky grammar for the automaton expression language.
//!
//! Role
//! - Parse the textual forms of values, guards, invariants, flows, resets and location
//!   constraints into [`Expression`] trees.
//!
//! Precedence (loosest first)
//! - `|` / `||`, then `&` / `&&`, then prefix `!`.
//! - Comparisons `= == != < <= > >=`. Chains such as `0 <= x <= 1` become conjunctions.
//! - `+ -` and `* /`, both left-associative.
//! - `^`, right-associative.
//! - Prefix `-`, binding tighter than `^` (`-x^2` is `(-x)^2`).
//! - Atoms: numbers, `true`/`false`, dotted identifiers with an optional trailing `'`,
//!   parenthesized expressions, `sin cos tan exp sqrt ln` with exactly one argument,
//!   `loc(...)`, matrices `[a, b ; c, d]`, `reshape([...], d1, d2, ...)` and
//!   `lut([inputs], table, breakpoints...)`.
//!
//! Errors
//! - Parsing is all-or-nothing: any diagnostic turns into a [`ParseError`] carrying the
//!   joined messages and the offending text.

use std::collections::BTreeMap;

use chumsky::prelude::*;
use log::debug;

use crate::expr::{Expression, Lut, Matrix, Operator};
use crate::interval::{ExpressionInterval, Interval};
use crate::utils::ParseError;

type Extra<'src> = extra::Err<Rich<'src, char>>;

fn keyword<'src>(word: &'static str) -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    text::ascii::ident().try_map(move |s: &str, span| {
        if s == word {
            Ok(())
        } else {
            Err(Rich::custom(span, format!("expected `{word}`")))
        }
    })
}

pub fn number_parser<'src>() -> impl Parser<'src, &'src str, f64, Extra<'src>> + Clone {
    let fraction = just('.').then(text::digits(10).or_not());
    let mantissa = text::digits(10)
        .then(fraction.or_not())
        .ignored()
        .or(just('.').then(text::digits(10)).ignored());
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(text::digits(10));
    mantissa
        .then(exponent.or_not())
        .to_slice()
        .try_map(|s: &str, span| {
            s.parse::<f64>()
                .map_err(|e| Rich::custom(span, format!("invalid number `{s}`: {e}")))
        })
        .labelled("number")
}

/// Dotted identifier with an optional trailing prime: `a`, `a.b.c`, `x'`.
pub fn name_parser<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    text::ascii::ident()
        .then(just('.').then(text::ascii::ident()).repeated())
        .then(just('\'').or_not())
        .to_slice()
        .map(|s: &str| s.to_string())
        .labelled("identifier")
}

/// Matrix and interval entries: `-1.5`, or `(1.0 / 0.0)` for non-finite values.
fn signed_number<'src>() -> impl Parser<'src, &'src str, f64, Extra<'src>> + Clone {
    let finite = just('-')
        .padded()
        .or_not()
        .then(number_parser())
        .map(|(neg, v)| if neg.is_some() { -v } else { v });
    let ratio = finite
        .clone()
        .then_ignore(just('/').padded())
        .then(finite.clone())
        .delimited_by(just('(').padded(), just(')').padded())
        .map(|(a, b)| a / b);
    choice((ratio, finite))
}

fn usize_parser<'src>() -> impl Parser<'src, &'src str, usize, Extra<'src>> + Clone {
    text::digits(10).to_slice().try_map(|digits: &str, span| {
        digits
            .parse::<usize>()
            .map_err(|_| Rich::custom(span, format!("invalid dimension width: {digits}")))
    })
}

/// `[a, b ; c, d]` with `,` or whitespace between entries, or `reshape([...], d1, ...)`.
pub fn matrix_parser<'src>() -> impl Parser<'src, &'src str, Matrix, Extra<'src>> + Clone {
    let separator = just(',')
        .padded()
        .ignored()
        .or(any()
            .filter(|c: &char| c.is_whitespace())
            .repeated()
            .at_least(1)
            .ignored());
    let row = signed_number()
        .separated_by(separator)
        .allow_trailing()
        .collect::<Vec<f64>>()
        .padded();
    let literal = row
        .separated_by(just(';').padded())
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just('[').padded(), just(']').padded())
        .try_map(|rows, span| Matrix::from_rows(rows).map_err(|e| Rich::custom(span, e.to_string())))
        .labelled("matrix");

    let reshape = keyword("reshape")
        .padded()
        .ignore_then(
            literal
                .clone()
                .then(
                    just(',')
                        .padded()
                        .ignore_then(usize_parser().padded())
                        .repeated()
                        .at_least(1)
                        .collect::<Vec<_>>(),
                )
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .try_map(|(flat, dims), span| {
            Matrix::new(flat.data().to_vec(), dims).map_err(|e| Rich::custom(span, e.to_string()))
        })
        .labelled("reshape");

    choice((reshape, literal)).boxed()
}

/// Full expression grammar. `allow_assignment` additionally accepts `:=` as an equality,
/// which only makes sense in resets.
pub fn expression_parser<'src>(
    allow_assignment: bool,
) -> impl Parser<'src, &'src str, Expression, Extra<'src>> + Clone {
    recursive(move |expr| {
        let boolean = text::ascii::ident()
            .try_map(|s: &str, span| match s {
                "true" => Ok(Expression::TRUE),
                "false" => Ok(Expression::FALSE),
                _ => Err(Rich::custom(span, "expected a boolean literal")),
            })
            .labelled("boolean");

        let function = text::ascii::ident()
            .try_map(|s: &str, span| {
                Operator::from_function_name(s)
                    .ok_or_else(|| Rich::custom(span, format!("unknown function `{s}`")))
            })
            .then(
                expr.clone()
                    .or_not()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .try_map(|(op, arg), span| match (op, arg) {
                (op, Some(arg)) => Ok(Expression::unary(op, arg)),
                (Operator::Loc, None) => Ok(Expression::Operation(Operator::Loc, Vec::new())),
                (op, None) => Err(Rich::custom(
                    span,
                    format!("function `{op:?}` requires exactly one argument"),
                )),
            })
            .labelled("function call")
            .boxed();

        let lut = keyword("lut")
            .ignore_then(
                expr.clone()
                    .separated_by(just(',').padded())
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just('[').padded(), just(']').padded())
                    .then(
                        just(',')
                            .padded()
                            .ignore_then(matrix_parser())
                            .repeated()
                            .at_least(1)
                            .collect::<Vec<_>>(),
                    )
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .try_map(|(inputs, mut matrices), span| {
                let table = matrices.remove(0);
                Lut::new(inputs, table, matrices)
                    .map(|lut| Expression::Lut(Box::new(lut)))
                    .map_err(|e| Rich::custom(span, e.to_string()))
            })
            .labelled("lut")
            .boxed();

        let paren = expr
            .clone()
            .delimited_by(just('(').padded(), just(')').padded())
            .labelled("parentheses")
            .boxed();

        let atom = choice((
            number_parser().map(Expression::Number),
            lut,
            matrix_parser().map(Expression::Matrix),
            function,
            boolean,
            name_parser().map(Expression::Variable),
            paren,
        ))
        .padded()
        .labelled("atom")
        .boxed();

        let unary = just('-').padded().repeated().foldr(atom, |_, e| -e).boxed();

        let pow = unary
            .clone()
            .then_ignore(just('^').padded())
            .repeated()
            .foldr(unary, Expression::pow)
            .labelled("power")
            .boxed();

        let product = pow
            .clone()
            .foldl(
                choice((
                    just('*').to(Operator::Multiply),
                    just('/').to(Operator::Divide),
                ))
                .padded()
                .then(pow)
                .repeated(),
                |a, (op, b)| Expression::binary(op, a, b),
            )
            .labelled("product")
            .boxed();

        let sum = product
            .clone()
            .foldl(
                choice((
                    just('+').to(Operator::Add),
                    just('-').to(Operator::Subtract),
                ))
                .padded()
                .then(product)
                .repeated(),
                |a, (op, b)| Expression::binary(op, a, b),
            )
            .labelled("sum")
            .boxed();

        let assignment = just(":=").try_map(move |_, span| {
            if allow_assignment {
                Ok(Operator::Equal)
            } else {
                Err(Rich::custom(span, "assignment `:=` is only valid in resets"))
            }
        });
        let cmp_op = choice((
            assignment,
            just("<=").to(Operator::LessEqual),
            just(">=").to(Operator::GreaterEqual),
            just("==").to(Operator::Equal),
            just("!=").to(Operator::NotEqual),
            just("=").to(Operator::Equal),
            just("<").to(Operator::Less),
            just(">").to(Operator::Greater),
        ))
        .padded();

        let comparison = sum
            .clone()
            .then(cmp_op.then(sum).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| comparison_chain(first, rest))
            .labelled("comparison")
            .boxed();

        let not = just('!')
            .padded()
            .repeated()
            .foldr(comparison, |_, e| Expression::unary(Operator::LogicalNot, e))
            .boxed();

        let and = not
            .clone()
            .foldl(
                choice((just("&&"), just("&")))
                    .padded()
                    .ignore_then(not)
                    .repeated(),
                |a, b| Expression::binary(Operator::And, a, b),
            )
            .labelled("conjunction")
            .boxed();

        and.clone()
            .foldl(
                choice((just("||"), just("|")))
                    .padded()
                    .ignore_then(and)
                    .repeated(),
                |a, b| Expression::binary(Operator::Or, a, b),
            )
            .labelled("expression")
            .boxed()
    })
}

/// `a < b <= c` is `a < b & b <= c`.
fn comparison_chain(first: Expression, rest: Vec<(Operator, Expression)>) -> Expression {
    let mut left = first;
    let mut terms = Vec::with_capacity(rest.len());
    for (op, right) in rest {
        terms.push(Expression::binary(op, left, right.clone()));
        left = right;
    }
    if terms.is_empty() {
        left
    } else {
        terms
            .into_iter()
            .reduce(|a, b| Expression::binary(Operator::And, a, b))
            .unwrap_or(Expression::TRUE)
    }
}

fn run<'src, T>(
    parser: impl Parser<'src, &'src str, T, Extra<'src>>,
    text: &'src str,
) -> Result<T, ParseError> {
    let (output, errors) = parser.then_ignore(end()).parse(text).into_output_errors();
    match output {
        Some(output) if errors.is_empty() => Ok(output),
        _ => {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            debug!("rejected '{text}': {message}");
            Err(ParseError::new(message, text))
        }
    }
}

/// Parse any expression.
pub fn parse_value(text: &str) -> Result<Expression, ParseError> {
    run(expression_parser(false).padded(), text)
}

/// Parse a boolean condition; empty text is `true`.
pub fn parse_invariant(text: &str) -> Result<Expression, ParseError> {
    if text.trim().is_empty() {
        return Ok(Expression::TRUE);
    }
    parse_value(text)
}

/// Guards share the invariant syntax.
pub fn parse_guard(text: &str) -> Result<Expression, ParseError> {
    parse_invariant(text)
}

/// `expr`, `expr + [lo, hi]` or `[lo, hi]`.
pub fn parse_expression_interval(text: &str) -> Result<ExpressionInterval, ParseError> {
    let e = parse_value(text)?;
    split_interval(e).map_err(|message| ParseError::new(message, text))
}

/// Separate a trailing `+ [lo, hi]` range from a deterministic expression.
pub fn split_interval(e: Expression) -> Result<ExpressionInterval, String> {
    fn as_interval(e: &Expression) -> Option<Result<Interval, String>> {
        match e {
            Expression::Interval(i) => Some(Ok(*i)),
            Expression::Matrix(m) if m.dims() == [2] => {
                Some(Interval::try_new(m.data()[0], m.data()[1]).map_err(|e| e.to_string()))
            }
            _ => None,
        }
    }

    if let Some(interval) = as_interval(&e) {
        return Ok(ExpressionInterval::with_interval(
            Expression::num(0.0),
            interval?,
        ));
    }
    if let Expression::Operation(Operator::Add, children) = &e {
        if let [base, range] = children.as_slice() {
            if let Some(interval) = as_interval(range) {
                return Ok(ExpressionInterval::with_interval(base.clone(), interval?));
            }
            if let Some(interval) = as_interval(base) {
                return Ok(ExpressionInterval::with_interval(range.clone(), interval?));
            }
        }
    }
    Ok(ExpressionInterval::new(e))
}

fn unprime(name: &str) -> &str {
    name.strip_suffix('\'').unwrap_or(name)
}

/// Parse flow dynamics `x' == e & y' == f`. The literal `false` marks an urgent mode
/// and yields `None`.
pub fn parse_flow(text: &str) -> Result<Option<BTreeMap<String, ExpressionInterval>>, ParseError> {
    let trimmed = text.trim();
    if trimmed == "false" {
        return Ok(None);
    }
    let mut flows = BTreeMap::new();
    if trimmed.is_empty() {
        return Ok(Some(flows));
    }
    let e = parse_value(text)?;
    for conjunct in e.conjuncts() {
        if conjunct.is_true() {
            continue;
        }
        let Some((Operator::Equal, Expression::Variable(name), rhs)) = conjunct.as_binary() else {
            return Err(ParseError::new(
                format!("expected `var' == expression`, got `{conjunct}`"),
                text,
            ));
        };
        let value = split_interval(rhs.clone()).map_err(|m| ParseError::new(m, text))?;
        let var = unprime(name).to_string();
        if flows.insert(var.clone(), value).is_some() {
            return Err(ParseError::new(
                format!("flow for `{var}` is defined twice"),
                text,
            ));
        }
    }
    Ok(Some(flows))
}

/// Parse a reset: `x := e` assignments and constant bounds such as `0 <= y' <= 1`,
/// which become nondeterministic resets `y := 0 + [0, 1]`.
pub fn parse_reset(text: &str) -> Result<BTreeMap<String, ExpressionInterval>, ParseError> {
    let mut resets = BTreeMap::new();
    if text.trim().is_empty() {
        return Ok(resets);
    }
    let e = run(expression_parser(true).padded(), text)?;
    let fail = |message: String| ParseError::new(message, text);

    let mut bounds: BTreeMap<String, Interval> = BTreeMap::new();
    for conjunct in e.conjuncts() {
        if conjunct.is_true() {
            continue;
        }
        let Some((op, lhs, rhs)) = conjunct.as_binary() else {
            return Err(fail(format!("unsupported reset `{conjunct}`")));
        };
        if op == Operator::Equal {
            if let Expression::Variable(name) = lhs {
                let var = unprime(name).to_string();
                let value = split_interval(rhs.clone()).map_err(fail)?;
                if resets.insert(var.clone(), value).is_some() {
                    return Err(fail(format!("reset of `{var}` is defined twice")));
                }
                continue;
            }
        }
        let (op, name, bound) = match (lhs, rhs) {
            (Expression::Variable(name), other) => (op, name, other),
            (other, Expression::Variable(name)) => match op.mirrored() {
                Some(op) => (op, name, other),
                None => return Err(fail(format!("unsupported reset `{conjunct}`"))),
            },
            _ => return Err(fail(format!("unsupported reset `{conjunct}`"))),
        };
        let Some(value) = bound.simplify().as_number() else {
            return Err(fail(format!(
                "reset bound `{bound}` for `{name}` is not a constant"
            )));
        };
        let var = unprime(name).to_string();
        let entry = bounds.entry(var).or_insert_with(Interval::unbounded);
        match op {
            Operator::Less | Operator::LessEqual => entry.max = entry.max.min(value),
            Operator::Greater | Operator::GreaterEqual => entry.min = entry.min.max(value),
            Operator::Equal => {
                entry.min = value;
                entry.max = value;
            }
            _ => return Err(fail(format!("unsupported reset `{conjunct}`"))),
        }
    }

    for (var, interval) in bounds {
        if interval.min > interval.max {
            return Err(fail(format!("reset range for `{var}` is empty")));
        }
        if resets.contains_key(&var) {
            return Err(fail(format!("reset of `{var}` is defined twice")));
        }
        let value = if interval.is_point() {
            ExpressionInterval::new(Expression::num(interval.min))
        } else {
            ExpressionInterval::with_interval(Expression::num(0.0), interval)
        };
        resets.insert(var, value);
    }
    Ok(resets)
}

/// A parsed location expression: the `loc(automaton) = mode` conjuncts plus the
/// remaining continuous constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct LocExpression {
    /// Automaton name (empty for `loc()`) to mode name.
    pub locations: BTreeMap<String, String>,
    pub constraint: Expression,
}

pub fn parse_loc(text: &str) -> Result<LocExpression, ParseError> {
    let e = parse_invariant(text)?;
    let mut locations = BTreeMap::new();
    let mut rest = Vec::new();
    for conjunct in e.conjuncts() {
        let location = match conjunct.as_binary() {
            Some((Operator::Equal, Expression::Operation(Operator::Loc, arg), mode)) => {
                match (arg.as_slice(), mode) {
                    ([], Expression::Variable(mode)) => Some((String::new(), mode.clone())),
                    ([Expression::Variable(automaton)], Expression::Variable(mode)) => {
                        Some((automaton.clone(), mode.clone()))
                    }
                    _ => {
                        return Err(ParseError::new(
                            format!("malformed location constraint `{conjunct}`"),
                            text,
                        ));
                    }
                }
            }
            _ => None,
        };
        match location {
            Some((automaton, mode)) => {
                if locations.insert(automaton.clone(), mode).is_some() {
                    return Err(ParseError::new(
                        format!("automaton `{automaton}` is constrained to two locations"),
                        text,
                    ));
                }
            }
            None => rest.push(conjunct.clone()),
        }
    }
    Ok(LocExpression {
        locations,
        constraint: Expression::and_all(rest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str) -> Expression {
        Expression::var(name)
    }

    #[test]
    fn precedence_and_associativity() {
        let e = parse_value("1 - 2 - 3").unwrap();
        assert_eq!(e, (Expression::num(1.0) - 2.0) - 3.0);
        let e = parse_value("2 ^ 3 ^ 2").unwrap();
        assert_eq!(
            e,
            Expression::pow(
                Expression::num(2.0),
                Expression::pow(Expression::num(3.0), Expression::num(2.0))
            )
        );
        let e = parse_value("-x ^ 2").unwrap();
        assert_eq!(e, Expression::pow(-v("x"), Expression::num(2.0)));
        let e = parse_value("a + b * c").unwrap();
        assert_eq!(e, v("a") + v("b") * v("c"));
    }

    #[test]
    fn boolean_levels() {
        let e = parse_value("a < 1 | b > 2 & !c = 3").unwrap();
        let expected = Expression::binary(
            Operator::Or,
            Expression::binary(Operator::Less, v("a"), Expression::num(1.0)),
            Expression::binary(
                Operator::And,
                Expression::binary(Operator::Greater, v("b"), Expression::num(2.0)),
                Expression::unary(
                    Operator::LogicalNot,
                    Expression::equal(v("c"), Expression::num(3.0)),
                ),
            ),
        );
        assert_eq!(e, expected);
        assert_eq!(parse_value("x == 1 && y == 2").unwrap(), parse_value("x = 1 & y = 2").unwrap());
    }

    #[test]
    fn chained_comparison() {
        let e = parse_value("0 <= x <= 1").unwrap();
        assert_eq!(
            e,
            Expression::binary(
                Operator::And,
                Expression::less_equal(Expression::num(0.0), v("x")),
                Expression::less_equal(v("x"), Expression::num(1.0)),
            )
        );
    }

    #[test]
    fn functions_need_one_argument() {
        assert!(parse_value("sin(x)").is_ok());
        assert!(parse_value("sin()").is_err());
        assert!(parse_value("sin(x, y)").is_err());
        assert_eq!(parse_value("sinx").unwrap(), v("sinx"));
    }

    #[test]
    fn numbers_and_identifiers() {
        assert_eq!(parse_value("1.5e3").unwrap(), Expression::num(1500.0));
        assert_eq!(parse_value(".5").unwrap(), Expression::num(0.5));
        assert_eq!(parse_value("a.b.c").unwrap(), v("a.b.c"));
        assert_eq!(parse_value("x'").unwrap(), v("x'"));
    }

    #[test]
    fn errors_carry_the_text() {
        let err = parse_value("x + ").unwrap_err();
        assert_eq!(err.text, "x + ");
        assert!(!err.message.is_empty());
        assert!(parse_guard("x := 1").is_err());
    }

    #[test]
    fn empty_invariant_is_true() {
        assert_eq!(parse_invariant("  ").unwrap(), Expression::TRUE);
    }

    #[test]
    fn matrices_and_luts() {
        let m = parse_value("[1, 2 ; 10, 20 ; 100, 200]").unwrap();
        let r = parse_value("reshape([1, 10, 100, 2, 20, 200], 3, 2)").unwrap();
        assert_eq!(m, r);
        assert_eq!(parse_value("[1 2 3]").unwrap(), parse_value("[1, 2, 3]").unwrap());

        let lut = parse_value("lut([t], [1, 2, 1, 2], [0, 10, 30, 40])").unwrap();
        let Expression::Lut(lut) = lut else {
            panic!("expected a lut");
        };
        assert_eq!(lut.inputs, vec![v("t")]);
        assert_eq!(lut.table.dims(), &[4]);
        assert!(parse_value("lut([t], [1, 2, 1, 2], [0, 10, 30])").is_err());
    }

    #[test]
    fn flows() {
        let flows = parse_flow("x' == 2 * x & y' = 1 + [-0.5, 0.5]").unwrap().unwrap();
        assert_eq!(flows["x"].expression, Expression::num(2.0) * v("x"));
        assert_eq!(flows["y"].interval, Some(Interval::new(-0.5, 0.5)));
        assert_eq!(parse_flow("false").unwrap(), None);
        assert!(parse_flow("x' == 1 & x' == 2").is_err());
        assert!(parse_flow("x <= 2").is_err());
    }

    #[test]
    fn resets() {
        let resets = parse_reset("x := x + 1 & 0 <= y' <= 2 & z' == 3").unwrap();
        assert_eq!(resets["x"].expression, v("x") + 1.0);
        assert_eq!(
            resets["y"],
            ExpressionInterval::with_interval(Expression::num(0.0), Interval::new(0.0, 2.0))
        );
        assert_eq!(resets["z"].expression, Expression::num(3.0));
        assert!(parse_reset("x := 1 & x := 2").is_err());
        assert!(parse_reset("x + y <= 2").is_err());
    }

    #[test]
    fn location_constraints() {
        let loc = parse_loc("loc(heater) = on & x <= 1 & loc() = idle").unwrap();
        assert_eq!(loc.locations["heater"], "on");
        assert_eq!(loc.locations[""], "idle");
        assert_eq!(
            loc.constraint,
            Expression::less_equal(v("x"), Expression::num(1.0))
        );
    }

    #[test]
    fn non_finite_constants_round_trip() {
        for value in [f64::INFINITY, f64::NEG_INFINITY] {
            let e = v("x") * Expression::num(value);
            let back = parse_value(&e.to_string()).unwrap();
            assert_eq!(back.evaluate(&|_| Some(2.0)).unwrap(), value);
        }
        let nan = parse_value(&Expression::num(f64::NAN).to_string()).unwrap();
        assert!(nan.evaluate(&|_| None).unwrap().is_nan());

        let open = ExpressionInterval::with_interval(v("x"), Interval::new(0.0, f64::INFINITY));
        assert_eq!(parse_expression_interval(&open.to_string()).unwrap(), open);
    }

    #[test]
    fn parses_on_a_default_sized_thread() {
        let handle = std::thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(|| {
                let chain = parse_invariant("-1.5 <= x <= -0.5").unwrap();
                let nested = parse_value("sin((x + 1) * -(y ^ 2 / 3)) >= 0 & !(z < 1 | z > 2)").unwrap();
                (chain, nested)
            })
            .unwrap();
        let (chain, nested) = handle.join().unwrap();
        assert_eq!(chain.conjuncts().len(), 2);
        assert_eq!(nested.conjuncts().len(), 2);
    }
}
