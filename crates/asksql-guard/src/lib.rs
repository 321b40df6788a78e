//! Safety filter for model-generated SQL
//!
//! Candidate SQL coming back from the text-generation service is untrusted.
//! [`SqlGuard::validate`] only lets through a single read-only `SELECT`:
//! 1. reject empty input
//! 2. strip markdown code fences and surrounding whitespace
//! 3. require a leading `SELECT` (any case)
//! 4. reject forbidden keywords and the statement/comment separators `;` and `--`
//! 5. require the text to parse as exactly one query statement

use regex::Regex;
use serde::Serialize;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{DuckDbDialect, GenericDialect};
use sqlparser::parser::Parser;
use std::fmt;
use thiserror::Error;

/// Tokens whose presence rejects a candidate, checked in this order.
pub const FORBIDDEN_TOKENS: [&str; 9] = [
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "TRUNCATE", "EXEC", "--", ";",
];

/// Why a candidate statement was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Empty SQL generated.")]
    Empty,

    #[error("Only SELECT queries are allowed.")]
    NotSelect,

    #[error("Forbidden keyword detected: {0}")]
    ForbiddenToken(&'static str),

    #[error("SQL could not be parsed: {0}")]
    Unparseable(String),

    #[error("Only a single read-only SELECT statement is allowed.")]
    NotSingleQuery,
}

/// SQL that passed every check of [`SqlGuard::validate`].
///
/// Only the guard can construct one, so holding a `ValidatedSql` means the
/// text starts with `SELECT` and contains none of [`FORBIDDEN_TOKENS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedSql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

enum TokenMatcher {
    /// Keyword matched on word boundaries
    Word(Regex),
    /// Punctuation has no word boundaries, so any occurrence counts
    Anywhere,
}

/// Keyword/punctuation filter plus a single-statement parse check
pub struct SqlGuard {
    tagged_fence: Regex,
    forbidden: Vec<(&'static str, TokenMatcher)>,
}

impl SqlGuard {
    pub fn new() -> Result<Self, regex::Error> {
        let tagged_fence = Regex::new(r"(?i)```sql")?;

        let mut forbidden = Vec::with_capacity(FORBIDDEN_TOKENS.len());
        for token in FORBIDDEN_TOKENS {
            let matcher = if token.chars().all(|c| c.is_ascii_alphanumeric()) {
                TokenMatcher::Word(Regex::new(&format!(r"\b{}\b", regex::escape(token)))?)
            } else {
                TokenMatcher::Anywhere
            };
            forbidden.push((token, matcher));
        }

        Ok(Self {
            tagged_fence,
            forbidden,
        })
    }

    /// Validate a candidate and return the cleaned statement.
    ///
    /// Validating an already accepted statement returns it unchanged.
    pub fn validate(&self, raw: &str) -> Result<ValidatedSql, Rejection> {
        if raw.is_empty() {
            return Err(Rejection::Empty);
        }

        let sql = self.strip_fences(raw);

        if !starts_with_select(&sql) {
            return Err(Rejection::NotSelect);
        }

        if let Some(token) = self.forbidden_token(&sql) {
            return Err(Rejection::ForbiddenToken(token));
        }

        parse_single_query(&sql)?;

        Ok(ValidatedSql(sql))
    }

    fn strip_fences(&self, raw: &str) -> String {
        let untagged = self.tagged_fence.replace_all(raw, "");
        untagged.replace("```", "").trim().to_string()
    }

    fn forbidden_token(&self, sql: &str) -> Option<&'static str> {
        let upper = sql.to_uppercase();
        self.forbidden
            .iter()
            .find(|(token, matcher)| match matcher {
                TokenMatcher::Word(pattern) => pattern.is_match(&upper),
                TokenMatcher::Anywhere => upper.contains(token),
            })
            .map(|(token, _)| *token)
    }
}

fn starts_with_select(sql: &str) -> bool {
    sql.get(..6)
        .map(|head| head.eq_ignore_ascii_case("SELECT"))
        .unwrap_or(false)
}

fn parse_single_query(sql: &str) -> Result<(), Rejection> {
    let statements = Parser::parse_sql(&DuckDbDialect {}, sql)
        .or_else(|_| Parser::parse_sql(&GenericDialect {}, sql))
        .map_err(|e| Rejection::Unparseable(e.to_string()))?;

    match statements.as_slice() {
        [Statement::Query(query)] if !selects_into(query) => Ok(()),
        _ => Err(Rejection::NotSingleQuery),
    }
}

/// `SELECT ... INTO new_table` creates a table
fn selects_into(query: &Query) -> bool {
    matches!(query.body.as_ref(), SetExpr::Select(select) if select.into.is_some())
}
