//! SQL text validation for AI-generated read queries.

use once_cell::sync::Lazy;
use regex::Regex;

use super::service::QueryError;

/// Mutating and administrative keywords that must never appear, matched as
/// case-insensitive substrings anywhere in the statement.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "EXEC", "EXECUTE",
    "GRANT", "REVOKE", "ATTACH", "DETACH", "PRAGMA",
];

/// Patterns indicating statement chaining or comment-based truncation.
static SUSPICIOUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i);\s*select", r"--", r"/\*", r"(?i)\bxp_", r"(?i)\bsp_"]
        .iter()
        .map(|p| Regex::new(p).expect("suspicious pattern compiles"))
        .collect()
});

/// Validate that a generated statement is a single, read-only, user-scoped
/// SELECT. Returns [`QueryError::Rejected`] with the reason otherwise.
pub fn validate(sql: &str) -> Result<(), QueryError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(QueryError::Rejected("empty statement".into()));
    }

    let upper = trimmed.to_uppercase();

    if !upper.starts_with("SELECT") {
        return Err(QueryError::Rejected(
            "only SELECT statements are allowed".into(),
        ));
    }

    for keyword in FORBIDDEN_KEYWORDS {
        if upper.contains(keyword) {
            return Err(QueryError::Rejected(format!(
                "forbidden keyword detected: {}",
                keyword
            )));
        }
    }

    // A semicolon anywhere but the very end means chained statements.
    if let Some(pos) = trimmed.find(';') {
        if pos != trimmed.len() - 1 {
            return Err(QueryError::Rejected("multiple statements detected".into()));
        }
    }

    for pattern in SUSPICIOUS_PATTERNS.iter() {
        if pattern.is_match(trimmed) {
            return Err(QueryError::Rejected(format!(
                "suspicious pattern detected: {}",
                pattern.as_str()
            )));
        }
    }

    // Every generated query must be scoped to the calling user; a statement
    // without the predicate could leak other users' records.
    if !trimmed.to_lowercase().contains("user_id") {
        return Err(QueryError::Rejected(
            "statement must filter by user_id".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_scoped_select() {
        assert!(validate("SELECT amount FROM finance_records WHERE user_id = {user_id}").is_ok());
    }

    #[test]
    fn test_accepts_trailing_semicolon() {
        assert!(validate("SELECT * FROM work_records WHERE user_id = 1;").is_ok());
    }

    #[test]
    fn test_rejects_non_select() {
        let err = validate("VACUUM").unwrap_err();
        assert!(matches!(err, QueryError::Rejected(_)));
    }

    #[test]
    fn test_rejects_forbidden_keywords_case_insensitive() {
        for stmt in [
            "SELECT * FROM t WHERE user_id = 1; DROP TABLE t",
            "select * from t where user_id = 1 and delete = 1",
            "SELECT Update FROM t WHERE user_id = 1",
            "select insert from t where user_id = 1",
            "SELECT * FROM t WHERE user_id = 1 UNION ALTER",
        ] {
            assert!(validate(stmt).is_err(), "should reject: {}", stmt);
        }
    }

    #[test]
    fn test_rejects_statement_chaining() {
        let err = validate("SELECT 1 WHERE user_id = 1; SELECT 2").unwrap_err();
        assert!(matches!(err, QueryError::Rejected(_)));
    }

    #[test]
    fn test_rejects_comments() {
        assert!(validate("SELECT * FROM t WHERE user_id = 1 -- hidden").is_err());
        assert!(validate("SELECT /* x */ * FROM t WHERE user_id = 1").is_err());
    }

    #[test]
    fn test_rejects_missing_user_scope() {
        let err = validate("SELECT amount FROM finance_records").unwrap_err();
        match err {
            QueryError::Rejected(reason) => assert!(reason.contains("user_id")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
