//! Projection analysis for generated SQL models.
//!
//! Extracts the names a model exposes from its final `SELECT` list without a
//! full SQL parser: comments and template noise are scrubbed, the projection
//! is cut out between the final `SELECT` and its depth-0 `FROM`, split on
//! top-level commas, and each expression is reduced to the names it exposes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

const IDENT: &str = r#"(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][A-Za-z0-9_$]*)"#;

static TEMPLATE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{#.*?#\}|\{%-?.*?-?%\}").unwrap());

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*```[A-Za-z0-9_-]*\s*$").unwrap());

static SELECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bselect\b").unwrap());

static MODIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(?:distinct\s+on\s*\([^)]*\)|distinct|all|top\s+\(?\d+\)?(?:\s+percent)?)\s+")
        .unwrap()
});

static ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)^(.*\S)\s+as\s+({IDENT})$")).unwrap());

static QUALIFIED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^(?:{IDENT}\s*\.\s*)+({IDENT})$")).unwrap());

static BARE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"^({IDENT})$")).unwrap());

static PAREN_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\)\s*({IDENT})$")).unwrap());

static IMPLICIT_ALIAS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^((?:{IDENT}\s*\.\s*)*{IDENT})\s+({IDENT})$")).unwrap()
});

static STAR_MACRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\{\{.*\bstar\s*\(.*\}\}$").unwrap());

/// Remove comments and template/markup noise. String literals are kept, or
/// replaced by `''` when `blank_strings` is set.
pub fn scrub(sql: &str, blank_strings: bool) -> String {
    let without_tags = TEMPLATE_TAG_RE.replace_all(sql, " ");
    let text = FENCE_RE.replace_all(&without_tags, " ");

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            '\'' => {
                let mut literal = String::from('\'');
                while let Some(next) = chars.next() {
                    literal.push(next);
                    if next == '\'' {
                        // '' is an escaped quote inside the literal
                        if chars.peek() == Some(&'\'') {
                            literal.push('\'');
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                if blank_strings {
                    out.push_str("''");
                } else {
                    out.push_str(&literal);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn keyword_at(bytes: &[u8], idx: usize, keyword: &str) -> bool {
    let kw = keyword.as_bytes();
    if idx + kw.len() > bytes.len() {
        return false;
    }
    if !bytes[idx..idx + kw.len()].eq_ignore_ascii_case(kw) {
        return false;
    }
    let before_ok = idx == 0 || !is_ident_byte(bytes[idx - 1]);
    let after_ok = idx + kw.len() == bytes.len() || !is_ident_byte(bytes[idx + kw.len()]);
    before_ok && after_ok
}

/// The projection clause of the final `SELECT`: the text up to its
/// terminating depth-0 `FROM`, or to the end of the statement.
pub fn final_projection(cleaned: &str) -> Option<String> {
    let start = SELECT_RE.find_iter(cleaned).last()?.end();
    let bytes = cleaned.as_bytes();

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut end = bytes.len();
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\'' {
                in_string = false;
            }
        } else {
            match b {
                b'\'' => in_string = true,
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    // closing the subquery the final SELECT lives in
                    if depth < 0 {
                        end = i;
                        break;
                    }
                }
                b';' if depth == 0 => {
                    end = i;
                    break;
                }
                _ if depth == 0 && keyword_at(bytes, i, "from") => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        i += 1;
    }

    let projection = &cleaned[start..end];
    Some(MODIFIER_RE.replace(projection, "").trim().to_string())
}

/// Split on commas at parenthesis depth 0 (quotes respected).
pub fn split_top_level(projection: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;

    for c in projection.chars() {
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
            '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    parts
}

/// Names exposed by one projected expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exposed {
    /// `*` or `qualifier.*`: every source column.
    Wildcard,
    /// Candidate names, lower-cased and unquoted. May be empty for
    /// unaliased computed expressions.
    Names(Vec<String>),
}

fn unquote(ident: &str) -> String {
    ident
        .trim()
        .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_lowercase()
}

fn column_ref_name(expr: &str) -> Option<String> {
    if let Some(caps) = QUALIFIED_RE.captures(expr) {
        return Some(unquote(&caps[1]));
    }
    BARE_RE.captures(expr).map(|caps| unquote(&caps[1]))
}

/// Extract the exposed names of one expression, trying in order: an explicit
/// `AS alias`, `qualifier.column`, a bare identifier, a trailing alias after
/// `)`, and an implicit alias after a column reference.
pub fn exposed_names(expression: &str) -> Exposed {
    let expr = expression.trim().trim_end_matches(';').trim();

    if expr == "*" || expr.ends_with(".*") || STAR_MACRO_RE.is_match(expr) {
        return Exposed::Wildcard;
    }

    if let Some(caps) = ALIAS_RE.captures(expr) {
        let mut names = vec![unquote(&caps[2])];
        if let Some(source) = column_ref_name(caps[1].trim()) {
            if !names.contains(&source) {
                names.push(source);
            }
        }
        return Exposed::Names(names);
    }

    if let Some(name) = column_ref_name(expr) {
        return Exposed::Names(vec![name]);
    }

    if let Some(caps) = PAREN_ALIAS_RE.captures(expr) {
        return Exposed::Names(vec![unquote(&caps[1])]);
    }

    if let Some(caps) = IMPLICIT_ALIAS_RE.captures(expr) {
        let mut names = vec![unquote(&caps[2])];
        if let Some(source) = column_ref_name(&caps[1]) {
            if !names.contains(&source) {
                names.push(source);
            }
        }
        return Exposed::Names(names);
    }

    Exposed::Names(Vec::new())
}

/// Result of analysing a model's final projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub expressions: Vec<String>,
    pub wildcard: bool,
    pub names: BTreeSet<String>,
}

impl Projection {
    /// Analyse `sql`. A model without a `SELECT` yields an empty projection.
    pub fn analyze(sql: &str) -> Self {
        let cleaned = scrub(sql, false);
        let Some(clause) = final_projection(&cleaned) else {
            return Self::default();
        };

        let mut projection = Self::default();
        for expression in split_top_level(&clause) {
            match exposed_names(&expression) {
                Exposed::Wildcard => projection.wildcard = true,
                Exposed::Names(names) => projection.names.extend(names),
            }
            projection.expressions.push(expression);
        }
        projection
    }

    /// Source columns not exposed by the projection, in source order.
    pub fn missing<'a, I>(&self, columns: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.wildcard {
            return Vec::new();
        }
        columns
            .into_iter()
            .filter(|c| !self.names.contains(&c.to_lowercase()))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_parentheses() {
        assert_eq!(split_top_level("a, f(b, c), d"), vec!["a", "f(b, c)", "d"]);
        assert_eq!(
            split_top_level("coalesce(a, nullif(b, 0)) as x, 'p,q' as y"),
            vec!["coalesce(a, nullif(b, 0)) as x", "'p,q' as y"]
        );
        assert!(split_top_level("  ").is_empty());
    }

    #[test]
    fn test_exposed_names_alias_forms() {
        assert_eq!(
            exposed_names("c.customer_id AS id"),
            Exposed::Names(vec!["id".into(), "customer_id".into()])
        );
        assert_eq!(
            exposed_names("cast(amount as decimal(18,2)) as amount_usd"),
            Exposed::Names(vec!["amount_usd".into()])
        );
        assert_eq!(
            exposed_names(r#""Order"."Status""#),
            Exposed::Names(vec!["status".into()])
        );
        assert_eq!(exposed_names("email"), Exposed::Names(vec!["email".into()]));
        assert_eq!(
            exposed_names("upper(name) display_name"),
            Exposed::Names(vec!["display_name".into()])
        );
        assert_eq!(
            exposed_names("o.created_at created"),
            Exposed::Names(vec!["created".into(), "created_at".into()])
        );
        assert_eq!(exposed_names("count(*)"), Exposed::Names(Vec::new()));
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(exposed_names("*"), Exposed::Wildcard);
        assert_eq!(exposed_names("src.*"), Exposed::Wildcard);
        assert_eq!(
            exposed_names("{{ dbt_utils.star(ref('stg_orders')) }}"),
            Exposed::Wildcard
        );
    }

    #[test]
    fn test_final_projection_stops_at_depth_zero_from() {
        let sql = "with src as (select * from raw.orders)\n\
                   select id, extract(year from created_at) as order_year, status\n\
                   from src";
        let projection = Projection::analyze(sql);
        assert_eq!(projection.expressions.len(), 3);
        assert!(projection.names.contains("order_year"));
        assert!(!projection.wildcard);
    }

    #[test]
    fn test_comments_and_template_noise_ignored() {
        let sql = r#"
```sql
{{ config(materialized='view') }}
{# generated #}
select
    id, -- primary key
    /* legacy, column */ email,
    name
from {{ source('dbo', 'customers') }}
```
"#;
        let projection = Projection::analyze(sql);
        assert_eq!(projection.expressions, vec!["id", "email", "name"]);
    }

    #[test]
    fn test_distinct_modifier_stripped() {
        let projection = Projection::analyze("select distinct id, name from t");
        assert!(projection.names.contains("id"));
        assert!(projection.names.contains("name"));
    }

    #[test]
    fn test_missing_is_idempotent_and_case_insensitive() {
        let projection = Projection::analyze("select ID, Name from t");
        let columns = ["id", "name", "email", "phone"];
        let first = projection.missing(columns.iter().copied());
        let second = Projection::analyze("select ID, Name from t").missing(columns.iter().copied());
        assert_eq!(first, vec!["email", "phone"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_select_exposes_nothing() {
        let projection = Projection::analyze("-- nothing here");
        assert!(projection.expressions.is_empty());
        assert_eq!(projection.missing(["a"].iter().copied()), vec!["a"]);
    }

    #[test]
    fn test_scrub_blanks_strings() {
        let cleaned = scrub("select 'drop table x' as note -- delete", true);
        assert!(!cleaned.contains("drop"));
        assert!(!cleaned.contains("delete"));
        assert!(cleaned.contains("note"));
    }
}
