//! Line codec for rows and schema headers
//!
//! A row is one line of TAB-separated fields. Inside a field, backslash,
//! TAB, newline and carriage return are escaped (`\\`, `\t`, `\n`, `\r`)
//! and SQL NULL is written as `\N`.
//!
//! A header is the column-definition list of a table, exactly as it would
//! appear between the parentheses of `CREATE TABLE name (...)`, squeezed
//! onto one line.

use crate::{Column, EngineError};

/// Marker for SQL NULL inside a row line
pub const NULL_MARKER: &str = "\\N";

const FIELD_SEPARATOR: char = '\t';

/// Keywords that end the declared type of a column definition
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "PRIMARY",
    "NOT",
    "NULL",
    "DEFAULT",
    "UNIQUE",
    "CHECK",
    "REFERENCES",
    "COLLATE",
    "CONSTRAINT",
    "GENERATED",
    "AS",
];

/// Keywords that start a table constraint rather than a column
const TABLE_CONSTRAINTS: &[&str] = &["PRIMARY", "UNIQUE", "CHECK", "FOREIGN", "CONSTRAINT"];

/// Escape a single field value
pub fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_field(raw: &str) -> Result<Option<String>, EngineError> {
    if raw == NULL_MARKER {
        return Ok(None);
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                return Err(EngineError::MalformedRow(format!(
                    "unknown escape \\{other} in {raw:?}"
                )))
            }
            None => {
                return Err(EngineError::MalformedRow(format!(
                    "dangling backslash in {raw:?}"
                )))
            }
        }
    }
    Ok(Some(out))
}

/// Split a row line into field values (`None` is SQL NULL)
pub fn split_fields(line: &str) -> Result<Vec<Option<String>>, EngineError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    line.split(FIELD_SEPARATOR).map(unescape_field).collect()
}

/// Render field values as one row line
pub fn join_fields<S: AsRef<str>>(fields: &[Option<S>]) -> String {
    fields
        .iter()
        .map(|f| match f {
            Some(v) => escape_field(v.as_ref()),
            None => NULL_MARKER.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

/// Squeeze a multi-line column-definition list onto one line
pub fn single_line(header: &str) -> String {
    header.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on commas that are not nested in parentheses or quotes
fn split_top_level(header: &str) -> Result<Vec<String>, EngineError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in header.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '[' => {
                quote = Some(']');
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    EngineError::MalformedHeader(format!("unbalanced parenthesis in {header:?}"))
                })?;
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }

    if quote.is_some() || depth != 0 {
        return Err(EngineError::MalformedHeader(format!(
            "unterminated quote or parenthesis in {header:?}"
        )));
    }
    parts.push(current);
    Ok(parts)
}

/// Take a possibly quoted identifier off the front of `def`
fn take_identifier(def: &str) -> Option<(String, &str)> {
    let mut chars = def.char_indices();
    let (_, first) = chars.next()?;
    let close = match first {
        '"' => '"',
        '`' => '`',
        '[' => ']',
        _ => {
            let end = def.find(char::is_whitespace).unwrap_or(def.len());
            return Some((def[..end].to_string(), &def[end..]));
        }
    };

    let mut name = String::new();
    let mut iter = def[1..].char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if c == close {
            // doubled closing quote is an escaped quote
            if close != ']' && iter.peek().map(|(_, n)| *n) == Some(close) {
                name.push(close);
                iter.next();
                continue;
            }
            return Some((name, &def[1 + i + c.len_utf8()..]));
        }
        name.push(c);
    }
    None
}

fn first_word_upper(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '(')
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Parse the column list out of a header line
pub fn parse_header(header: &str) -> Result<Vec<Column>, EngineError> {
    let mut columns = Vec::new();
    let mut table_pk: Vec<String> = Vec::new();

    for part in split_top_level(header)? {
        let def = part.trim();
        if def.is_empty() {
            return Err(EngineError::MalformedHeader(format!(
                "empty column definition in {header:?}"
            )));
        }

        let lead = first_word_upper(def);
        if TABLE_CONSTRAINTS.contains(&lead.as_str()) {
            let upper = def.to_ascii_uppercase();
            if upper.contains("PRIMARY KEY") {
                if let (Some(open), Some(close)) = (def.find('('), def.rfind(')')) {
                    table_pk.extend(
                        def[open + 1..close]
                            .split(',')
                            .map(|n| n.trim().trim_matches(|c| c == '"' || c == '`').to_string()),
                    );
                }
            }
            continue;
        }

        let (name, rest) = take_identifier(def).ok_or_else(|| {
            EngineError::MalformedHeader(format!("bad column name in {def:?}"))
        })?;
        if name.is_empty() {
            return Err(EngineError::MalformedHeader(format!(
                "empty column name in {def:?}"
            )));
        }

        let mut type_words = Vec::new();
        for word in rest.split_whitespace() {
            let keyword = word.to_ascii_uppercase();
            let keyword = keyword.split('(').next().unwrap_or("");
            if CONSTRAINT_KEYWORDS.contains(&keyword) {
                break;
            }
            type_words.push(word.to_ascii_uppercase());
        }

        columns.push(Column {
            name,
            decl_type: type_words.join(" "),
            primary_key: rest.to_ascii_uppercase().contains("PRIMARY KEY"),
        });
    }

    for column in columns.iter_mut() {
        if table_pk.iter().any(|n| n == &column.name) {
            column.primary_key = true;
        }
    }

    if columns.is_empty() {
        return Err(EngineError::MalformedHeader(format!(
            "no columns in {header:?}"
        )));
    }
    Ok(columns)
}
