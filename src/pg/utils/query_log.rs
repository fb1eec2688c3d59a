//! Display rendering for the `*_print` query variants.
//!
//! The rendered text is for humans reading the diagnostic log. It is never
//! sent to the server: statements always run through the driver's
//! parameterized path.

use std::time::Duration;

use tokio_postgres::types::ToSql;

/// Render a statement with its arguments substituted, tidied for reading,
/// and followed by the elapsed time.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use pgaccess::pg::utils::query_log::render_query;
///
/// let text = render_query("SELECT * FROM users WHERE id = $1", &[&"42"], Duration::from_millis(3));
/// assert_eq!(
///     text,
///     "[Query]\nSELECT * FROM users WHERE id = '42'\n\nElapsed time 3 ms estimated.\n\n[Query]"
/// );
/// ```
pub fn render_query(query: &str, args: &[&(dyn ToSql + Sync)], elapsed: Duration) -> String {
    let literals: Vec<String> = args.iter().map(|arg| literal(*arg)).collect();
    let substituted = substitute_placeholders(query, &literals);
    format!(
        "[Query]\n{}\n\nElapsed time {} ms estimated.\n\n[Query]",
        tidy_lines(&substituted),
        elapsed.as_millis()
    )
}

/// Quote an argument for display.
///
/// Strings lose their debug quoting and escapes, and `Some(..)` wrappers are
/// dropped, so `"abc"` and `Some("abc")` both render as `'abc'` and a string
/// holding `a"b` renders as `'a"b'`.
pub fn literal(arg: &(dyn ToSql + Sync)) -> String {
    let mut text = format!("{:?}", arg);
    if let Some(inner) = text.strip_prefix("Some(").and_then(|s| s.strip_suffix(')')) {
        text = inner.to_string();
    }
    match text.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => format!("'{}'", unescape_debug(quoted)),
        None => format!("'{}'", text),
    }
}

/// Undo the escaping `Debug` applies to a string.
fn unescape_debug(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let rest = chars.as_str();
                let decoded = rest
                    .strip_prefix('{')
                    .and_then(|r| r.split_once('}'))
                    .and_then(|(hex, tail)| {
                        let c = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)?;
                        Some((c, tail))
                    });
                match decoded {
                    Some((c, tail)) => {
                        out.push(c);
                        chars = tail.chars();
                    }
                    None => out.push_str("\\u"),
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Replace each `$N` with the N-th literal (1-based).
///
/// Placeholders are matched as whole numbers, so `$1` never matches the
/// start of `$10`. Placeholders without a matching argument are left as is.
pub fn substitute_placeholders(query: &str, literals: &[String]) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let mut end = start + 1;
        while let Some(&(idx, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = idx + 1;
            chars.next();
        }

        let replacement = query[start + 1..end]
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .and_then(|n| literals.get(n - 1));
        match replacement {
            Some(value) => out.push_str(value),
            None => out.push_str(&query[start..end]),
        }
    }
    out
}

/// Normalize line endings, trim the common indentation and expand tabs.
///
/// The indentation is taken from the first of the first two non-blank lines
/// that is indented at all. Two columns of it are kept, so the statement
/// still reads as a block.
pub fn tidy_lines(query: &str) -> String {
    let normalized = query.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();

    let lead = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .take(2)
        .map(|line| leading_space(line))
        .find(|lead| *lead > 0)
        .unwrap_or(0);

    lines
        .iter()
        .map(|line| {
            let trimmed = if lead > 1 && line.len() > lead {
                strip_indent(line, lead - 2)
            } else {
                line
            };
            trimmed.replace('\t', "  ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn leading_space(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn strip_indent(line: &str, width: usize) -> &str {
    let strip = leading_space(line).min(width);
    // Space and tab are one byte each.
    &line[strip..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_in_order() {
        let literals = vec!["'a'".to_string(), "'b'".to_string()];
        assert_eq!(
            substitute_placeholders("SELECT $1, $2, $1", &literals),
            "SELECT 'a', 'b', 'a'"
        );
    }

    #[test]
    fn test_placeholder_matches_whole_number() {
        let literals: Vec<String> = (1..=10).map(|i| format!("'v{}'", i)).collect();
        assert_eq!(
            substitute_placeholders("VALUES ($1, $10)", &literals),
            "VALUES ('v1', 'v10')"
        );
    }

    #[test]
    fn test_unmatched_placeholders_are_kept() {
        let literals = vec!["'x'".to_string()];
        assert_eq!(
            substitute_placeholders("SELECT $2, $, $0, $1", &literals),
            "SELECT $2, $, $0, 'x'"
        );
    }

    #[test]
    fn test_literal_unwraps_strings_and_options() {
        assert_eq!(literal(&"hello"), "'hello'");
        assert_eq!(literal(&String::from("world")), "'world'");
        assert_eq!(literal(&Some("x")), "'x'");
        assert_eq!(literal(&42i64), "'42'");
        assert_eq!(literal(&true), "'true'");
        assert_eq!(literal(&None::<i32>), "'None'");
    }

    #[test]
    fn test_literal_keeps_string_verbatim() {
        assert_eq!(literal(&r#"a"b"#), r#"'a"b'"#);
        assert_eq!(literal(&r"C:\temp"), r"'C:\temp'");
        assert_eq!(literal(&"two\nlines\tand tab"), "'two\nlines\tand tab'");
        assert_eq!(literal(&Some("it's")), "'it's'");
        assert_eq!(literal(&"bell\u{7}"), "'bell\u{7}'");
    }

    #[test]
    fn test_trims_common_indentation() {
        let query = "\n        SELECT id\n        FROM users\n          WHERE id = 1\n";
        assert_eq!(
            tidy_lines(query),
            "\n  SELECT id\n  FROM users\n    WHERE id = 1\n"
        );
    }

    #[test]
    fn test_expands_tabs_and_line_endings() {
        let query = "SELECT 1\r\n\tFROM t\rWHERE x";
        assert_eq!(tidy_lines(query), "SELECT 1\n  FROM t\nWHERE x");
    }

    #[test]
    fn test_lead_from_second_line_when_first_is_flush() {
        let query = "SELECT a,\n      b\n      FROM t";
        assert_eq!(tidy_lines(query), "SELECT a,\n  b\n  FROM t");
    }

    #[test]
    fn test_short_lines_are_left_alone() {
        let query = "    SELECT 1\n  )\n    FROM t";
        assert_eq!(tidy_lines(query), "  SELECT 1\n  )\n  FROM t");
    }

    #[test]
    fn test_render_query_block() {
        let text = render_query(
            "\n    UPDATE t\n    SET name = $1\n    WHERE id = $2",
            &[&"bob", &7i32],
            Duration::from_millis(12),
        );
        assert_eq!(
            text,
            "[Query]\n\n  UPDATE t\n  SET name = 'bob'\n  WHERE id = '7'\n\nElapsed time 12 ms estimated.\n\n[Query]"
        );
    }
}
