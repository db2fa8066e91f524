//! Renders expression trees back to source text.
//!
//! Output re-parses to an equivalent tree. Compact output is a single line;
//! pretty output breaks `let` chains and conditionals across indented lines.

use std::fmt::Write;

use crate::ast::{BinOp, Expr, UseLimit};

const INDENT: &str = "    ";

/// Single-line rendering.
///
/// # Examples
///
/// ```
/// use expr_engine::{format, parser};
///
/// let expr = parser::parse("1+2 *  (3-x)").unwrap();
/// assert_eq!(format::compact(&expr), "1 + 2 * (3 - x)");
/// ```
pub fn compact(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(expr, &mut out, false, 0);
    out
}

/// Multi-line rendering with four-space indentation.
pub fn pretty(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(expr, &mut out, true, 0);
    out
}

/// Statement-like forms extend as far right as possible and need
/// parentheses anywhere an operand is expected.
fn is_open_ended(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Let { .. } | Expr::Conditional { .. } | Expr::Ternary { .. }
    )
}

fn binary_op(expr: &Expr) -> Option<BinOp> {
    match expr {
        Expr::BinaryOp { op, .. } => Some(*op),
        _ => None,
    }
}

fn needs_parens(child: &Expr, parent: BinOp, is_right: bool) -> bool {
    if is_open_ended(child) {
        return true;
    }
    match binary_op(child) {
        Some(op) if op.precedence() < parent.precedence() => true,
        Some(op) if op.precedence() == parent.precedence() => {
            // Equal precedence is fine only on the side the operator associates to.
            is_right != parent.is_right_associative()
        }
        _ => false,
    }
}

fn write_wrapped(expr: &Expr, out: &mut String, pretty: bool, level: usize, wrap: bool) {
    if wrap {
        out.push('(');
        write_expr(expr, out, pretty, level);
        out.push(')');
    } else {
        write_expr(expr, out, pretty, level);
    }
}

fn newline(out: &mut String, level: usize) {
    out.push('\n');
    for _ in 0..level {
        out.push_str(INDENT);
    }
}

fn write_string_literal(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_float(n: f64, out: &mut String) {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        let _ = write!(out, "{:.1}", n);
    } else {
        let _ = write!(out, "{}", n);
    }
}

fn write_expr(expr: &Expr, out: &mut String, pretty: bool, level: usize) {
    match expr {
        Expr::Integer(n) => {
            let _ = write!(out, "{}", n);
        }
        Expr::Float(n) => write_float(*n, out),
        Expr::String(s) => write_string_literal(s, out),
        Expr::Boolean(b) => {
            let _ = write!(out, "{}", b);
        }
        Expr::Null => out.push_str("null"),
        Expr::Variable(name) => out.push_str(name),

        Expr::BinaryOp { op, left, right } => {
            write_wrapped(left, out, pretty, level, needs_parens(left, *op, false));
            let _ = write!(out, " {} ", op.symbol());
            write_wrapped(right, out, pretty, level, needs_parens(right, *op, true));
        }

        Expr::UnaryOp { op, operand } => {
            out.push_str(op.symbol());
            let wrap = is_open_ended(operand) || binary_op(operand).is_some();
            write_wrapped(operand, out, pretty, level, wrap);
        }

        Expr::Ternary {
            condition,
            then_branch,
            else_branch,
        } => {
            write_wrapped(condition, out, pretty, level, is_open_ended(condition));
            out.push_str(" ? ");
            write_expr(then_branch, out, pretty, level);
            out.push_str(" : ");
            write_expr(else_branch, out, pretty, level);
        }

        Expr::Let {
            name,
            value,
            uses,
            body,
        } => {
            let _ = write!(out, "let {} = ", name);
            write_wrapped(value, out, pretty, level, is_open_ended(value));
            if let UseLimit::Limited(n) = uses {
                let _ = write!(out, " as {}", n);
            }
            out.push(';');
            if pretty {
                newline(out, level);
            } else {
                out.push(' ');
            }
            write_expr(body, out, pretty, level);
        }

        Expr::Conditional {
            branches,
            otherwise,
        } => {
            for (i, branch) in branches.iter().enumerate() {
                if i > 0 {
                    if pretty {
                        newline(out, level);
                    } else {
                        out.push(' ');
                    }
                    out.push_str("elif ");
                } else {
                    out.push_str("if ");
                }
                write_wrapped(
                    &branch.condition,
                    out,
                    pretty,
                    level,
                    is_open_ended(&branch.condition),
                );
                out.push(':');
                write_arm(&branch.result, out, pretty, level);
            }
            if let Some(otherwise) = otherwise {
                if pretty {
                    newline(out, level);
                } else {
                    out.push(' ');
                }
                out.push_str("else:");
                write_arm(otherwise, out, pretty, level);
            }
        }

        Expr::Call {
            name,
            type_hint,
            args,
        } => {
            out.push_str(name);
            if let Some(hint) = type_hint {
                let _ = write!(out, "<{}>", hint);
            }
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(arg, out, pretty, level);
            }
            out.push(')');
        }

        Expr::Cast { type_name, inner } => {
            let _ = write!(out, "Out<{}>(", type_name);
            write_expr(inner, out, pretty, level);
            out.push(')');
        }

        Expr::Grouping(inner) => {
            out.push('(');
            write_expr(inner, out, pretty, level);
            out.push(')');
        }
    }
}

fn write_arm(result: &Expr, out: &mut String, pretty: bool, level: usize) {
    if pretty {
        newline(out, level + 1);
        write_expr(result, out, pretty, level + 1);
    } else {
        out.push(' ');
        write_expr(result, out, pretty, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn pretty_breaks_conditionals() {
        let expr = parse("if x > 10: \"big\" elif x > 5: \"medium\" else: \"small\"").unwrap();
        assert_eq!(
            pretty(&expr),
            "if x > 10:\n    \"big\"\nelif x > 5:\n    \"medium\"\nelse:\n    \"small\""
        );
    }

    #[test]
    fn built_trees_get_needed_parentheses() {
        let expr = Expr::binary(
            BinOp::Multiply,
            Expr::binary(BinOp::Add, Expr::Integer(1), Expr::Integer(2)),
            Expr::Integer(3),
        );
        assert_eq!(compact(&expr), "(1 + 2) * 3");

        let expr = Expr::binary(
            BinOp::Subtract,
            Expr::Integer(1),
            Expr::binary(BinOp::Subtract, Expr::Integer(2), Expr::Integer(3)),
        );
        assert_eq!(compact(&expr), "1 - (2 - 3)");
    }

    #[test]
    fn compact_output_reparses_to_same_tree() {
        for source in [
            "let a = 2 as 3; a * a",
            "Out<int>(price * 1.5)",
            "lookup<Material>('stone', 1)",
            "not done and -x ^ 2 >= 4",
            "flag ? \"yes\\n\" : null",
            "2 ^ 3 ^ 2",
        ] {
            let expr = parse(source).unwrap();
            assert_eq!(parse(&compact(&expr)).unwrap(), expr, "source: {}", source);
        }
    }
}
