//! Python literal to JSON translation.
//!
//! Auction summaries exported from pandas are often the `repr` of a list of
//! dicts (`[{'BID': 12.5, 'BROKER_ID': 359}]`) rather than JSON. This module
//! rewrites that literal subset into JSON text: quoted strings in either
//! quote style, `True`/`False`/`None`, tuples, and trailing commas.

use std::iter::Peekable;
use std::str::Chars;

/// Reason a literal could not be translated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LiteralError(pub String);

/// Translate a Python literal into equivalent JSON text.
pub fn python_literal_to_json(text: &str) -> Result<String, LiteralError> {
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars().peekable();
    let mut depth: Vec<char> = Vec::new();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let s = read_string(&mut chars, c)?;
                out.push_str(&serde_json::to_string(&s).map_err(|e| LiteralError(e.to_string()))?);
            }
            '[' | '{' | '(' => {
                depth.push(c);
                out.push(if c == '(' { '[' } else { c });
            }
            ']' | '}' | ')' => {
                let open = depth
                    .pop()
                    .ok_or_else(|| LiteralError(format!("unbalanced '{c}'")))?;
                let expected = match open {
                    '[' => ']',
                    '{' => '}',
                    _ => ')',
                };
                if c != expected {
                    return Err(LiteralError(format!("expected '{expected}', found '{c}'")));
                }
                strip_trailing_comma(&mut out);
                out.push(if c == ')' { ']' } else { c });
            }
            ',' | ':' => out.push(c),
            c if c.is_whitespace() => out.push(c),
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let token = read_while(&mut chars, c, |ch| {
                    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '+' | '-' | '_')
                });
                out.push_str(&number_to_json(&token)?);
            }
            c if c.is_alphabetic() || c == '_' => {
                let word = read_while(&mut chars, c, |ch| ch.is_alphanumeric() || ch == '_');
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    // String prefixes such as u'...'
                    "u" | "U" if matches!(chars.peek(), Some('\'') | Some('"')) => {}
                    other => return Err(LiteralError(format!("unsupported name '{other}'"))),
                }
            }
            other => return Err(LiteralError(format!("unexpected character '{other}'"))),
        }
    }

    if let Some(open) = depth.last() {
        return Err(LiteralError(format!("unclosed '{open}'")));
    }
    Ok(out)
}

fn read_string(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String, LiteralError> {
    let mut s = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => s.push('\n'),
                Some('t') => s.push('\t'),
                Some('r') => s.push('\r'),
                Some('\\') => s.push('\\'),
                Some('\'') => s.push('\''),
                Some('"') => s.push('"'),
                Some(other) => {
                    s.push('\\');
                    s.push(other);
                }
                None => break,
            },
            c if c == quote => return Ok(s),
            c => s.push(c),
        }
    }
    Err(LiteralError("unterminated string".to_string()))
}

fn read_while(
    chars: &mut Peekable<Chars<'_>>,
    first: char,
    keep: impl Fn(char) -> bool,
) -> String {
    let mut token = String::new();
    token.push(first);
    while let Some(&c) = chars.peek() {
        if !keep(c) {
            break;
        }
        token.push(c);
        chars.next();
    }
    token
}

fn number_to_json(token: &str) -> Result<String, LiteralError> {
    let cleaned = token.replace('_', "");
    if let Ok(i) = cleaned.parse::<i64>() {
        return Ok(i.to_string());
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => serde_json::Number::from_f64(v)
            .map(|n| n.to_string())
            .ok_or_else(|| LiteralError(format!("invalid number '{token}'"))),
        _ => Err(LiteralError(format!("invalid number '{token}'"))),
    }
}

fn strip_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.truncate(trimmed - 1);
    }
}
