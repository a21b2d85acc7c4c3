//! Template expression substitution.
//!
//! Workflow text fields may embed `${{ expression }}` tokens which are
//! replaced against a layered context before the text is used. The
//! supported expression surface is deliberately small:
//!
//! - `matrix.<key>`, `inputs.<name>`, `env.<NAME>`
//! - `steps.<id>.outputs.<name>`
//! - `needs.<id>.result` and `needs.<id>.outputs.<name>`
//! - `github.*` and `runner.*` context properties
//! - `hashFiles(<patterns>)`
//!
//! Substitution is a single pass; the output is never re-scanned for new
//! tokens. Plain `${NAME}` shell references are left untouched for the
//! shell to expand.

mod context;

pub use context::ExprContext;

/// A segment of a scanned template string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text.
    Literal(String),
    /// A `${{ … }}` token, holding the trimmed inner expression.
    Expr(String),
}

/// Scan a string into literal and expression segments.
///
/// Token syntax is `${{` whitespace* expression whitespace* `}}`. An
/// unterminated `${{` is treated as literal text.
pub fn scan(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("${{") {
        match rest[start + 3..].find("}}") {
            Some(end) => {
                if start > 0 {
                    segments.push(Segment::Literal(rest[..start].to_string()));
                }
                let inner = rest[start + 3..start + 3 + end].trim().to_string();
                segments.push(Segment::Expr(inner));
                rest = &rest[start + 3 + end + 2..];
            }
            None => break,
        }
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }

    segments
}

/// Substitute tokens using a resolver closure.
///
/// The closure returns `Some(replacement)` to substitute a token, or
/// `None` to leave it in place verbatim. Leaving tokens in place is how
/// matrix expansion substitutes `matrix.*` while preserving runtime
/// expressions for the step executor.
pub fn substitute_with(input: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());

    for segment in scan(input) {
        match segment {
            Segment::Literal(text) => result.push_str(&text),
            Segment::Expr(expr) => match resolve(&expr) {
                Some(value) => result.push_str(&value),
                None => {
                    result.push_str("${{ ");
                    result.push_str(&expr);
                    result.push_str(" }}");
                }
            },
        }
    }

    result
}

/// Substitute every token against the full context.
///
/// Unknown expressions become the empty string, so the output contains no
/// `${{ … }}` tokens at all.
pub fn substitute(input: &str, context: &ExprContext) -> String {
    substitute_with(input, |expr| Some(context.evaluate(expr)))
}

/// Check whether a string contains any template token.
pub fn has_expressions(input: &str) -> bool {
    scan(input).iter().any(|s| matches!(s, Segment::Expr(_)))
}
