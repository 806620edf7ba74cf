use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// The statement types we are willing to hand to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Truncate,
}

impl StatementKind {
    pub const ALL: [StatementKind; 8] = [
        StatementKind::Select,
        StatementKind::Insert,
        StatementKind::Update,
        StatementKind::Delete,
        StatementKind::Create,
        StatementKind::Alter,
        StatementKind::Drop,
        StatementKind::Truncate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Create => "CREATE",
            StatementKind::Alter => "ALTER",
            StatementKind::Drop => "DROP",
            StatementKind::Truncate => "TRUNCATE",
        }
    }

    fn from_keyword(keyword: Keyword) -> Option<StatementKind> {
        match keyword {
            Keyword::SELECT => Some(StatementKind::Select),
            // A statement opening with a CTE is still a SELECT for our purposes
            Keyword::WITH => Some(StatementKind::Select),
            Keyword::INSERT => Some(StatementKind::Insert),
            Keyword::UPDATE => Some(StatementKind::Update),
            Keyword::DELETE => Some(StatementKind::Delete),
            Keyword::CREATE => Some(StatementKind::Create),
            Keyword::ALTER => Some(StatementKind::Alter),
            Keyword::DROP => Some(StatementKind::Drop),
            Keyword::TRUNCATE => Some(StatementKind::Truncate),
            _ => None,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```sql\s*(.*?)\s*```").expect("sql fence regex"));

static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("fence regex"));

/// Pull the most plausible SQL candidate out of raw model output.
///
/// Tried in order: a ```sql fenced block, any fenced block, a line scan that
/// starts at the first line containing a statement keyword and stops at the
/// first line ending with `;`. Falls back to the trimmed input so the caller
/// always gets something to surface.
pub fn extract(text: &str) -> String {
    let text = text.trim();

    if let Some(captures) = SQL_FENCE.captures(text) {
        if let Some(inner) = captures.get(1) {
            return inner.as_str().trim().to_string();
        }
    }

    if let Some(captures) = ANY_FENCE.captures(text) {
        if let Some(inner) = captures.get(1) {
            return inner.as_str().trim().to_string();
        }
    }

    let upper = text.to_uppercase();
    if StatementKind::ALL.iter().any(|kind| upper.contains(kind.as_str())) {
        let mut sql_lines = Vec::new();
        let mut in_sql = false;

        for line in text.lines() {
            let line_upper = line.to_uppercase();
            if StatementKind::ALL.iter().any(|kind| line_upper.contains(kind.as_str())) {
                in_sql = true;
            }

            if in_sql {
                sql_lines.push(line);

                if line.trim().ends_with(';') {
                    break;
                }
            }
        }

        return sql_lines.join("\n").trim().to_string();
    }

    text.to_string()
}

/// Classify a candidate statement. `None` means it failed to parse, parsed to
/// nothing, or opens with something we do not execute.
pub fn statement_kind(sql: &str) -> Option<StatementKind> {
    let dialect = GenericDialect {};

    let statements = Parser::parse_sql(&dialect, sql).ok()?;
    if statements.is_empty() {
        return None;
    }

    let tokens = Tokenizer::new(&dialect, sql).tokenize().ok()?;
    tokens.iter().find_map(|token| match token {
        Token::Word(word) => Some(StatementKind::from_keyword(word.keyword)),
        _ => None,
    })?
}

pub fn validate(sql: &str) -> bool {
    statement_kind(sql).is_some()
}

// Clause keywords that start a new line at nesting depth zero.
fn begins_clause(keyword: Keyword) -> bool {
    matches!(
        keyword,
        Keyword::FROM
            | Keyword::WHERE
            | Keyword::GROUP
            | Keyword::HAVING
            | Keyword::ORDER
            | Keyword::LIMIT
            | Keyword::OFFSET
            | Keyword::UNION
            | Keyword::EXCEPT
            | Keyword::INTERSECT
            | Keyword::VALUES
            | Keyword::SET
            | Keyword::JOIN
            | Keyword::LEFT
            | Keyword::RIGHT
            | Keyword::INNER
            | Keyword::FULL
            | Keyword::CROSS
    )
}

fn joins_previous(keyword: Keyword, previous: Option<Keyword>) -> bool {
    keyword == Keyword::JOIN
        && matches!(
            previous,
            Some(
                Keyword::LEFT
                    | Keyword::RIGHT
                    | Keyword::INNER
                    | Keyword::OUTER
                    | Keyword::FULL
                    | Keyword::CROSS
                    | Keyword::NATURAL
            )
        )
}

/// Reindent a statement and force keywords to upper case. Purely cosmetic;
/// the statement text is otherwise reproduced token for token.
pub fn format(sql: &str) -> String {
    let dialect = GenericDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return sql.trim().to_string(),
    };

    let mut out = String::new();
    let mut pending_space = false;
    let mut depth: usize = 0;
    let mut previous_word: Option<Keyword> = None;

    for token in &tokens {
        match token {
            Token::Whitespace(_) => {
                pending_space = !out.is_empty();
                continue;
            }
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ => {}
        }

        let mut separator = if pending_space { " " } else { "" };
        let text = match token {
            Token::Word(word) if word.quote_style.is_none() && word.keyword != Keyword::NoKeyword => {
                if depth == 0
                    && !out.is_empty()
                    && begins_clause(word.keyword)
                    && !joins_previous(word.keyword, previous_word)
                {
                    separator = "\n";
                }
                word.value.to_uppercase()
            }
            other => other.to_string(),
        };

        out.push_str(separator);
        out.push_str(&text);
        pending_space = false;
        previous_word = match token {
            Token::Word(word) => Some(word.keyword),
            _ => None,
        };
    }

    out
}

/// Extract, then format when the candidate validates. Invalid candidates come
/// back untouched so the caller can still surface them for diagnosis; this
/// never fails, even on garbage input.
pub fn clean(text: &str) -> String {
    let candidate = extract(text);
    if validate(&candidate) {
        format(&candidate)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_from_tagged_fence() {
        let text = "Here you go:\n```sql\nSELECT * FROM users;\n```\nHope that helps.";
        assert_eq!(extract(text), "SELECT * FROM users;");
    }

    #[test]
    fn extract_from_untagged_fence() {
        let text = "```\nSELECT id FROM orders;\n```";
        assert_eq!(extract(text), "SELECT id FROM orders;");
    }

    #[test]
    fn extract_from_prose_by_line_scan() {
        let text = "The query is:\nSELECT id, name FROM users\nWHERE age > 18;\nLet me know.";
        assert_eq!(extract(text), "SELECT id, name FROM users\nWHERE age > 18;");
    }

    #[test]
    fn extract_stops_at_semicolon() {
        let text = "SELECT id, name FROM users;\nSome other text";
        assert_eq!(extract(text), "SELECT id, name FROM users;");
    }

    #[test]
    fn extract_falls_back_to_input() {
        let text = "  nothing resembling a query here  ";
        assert_eq!(extract(text), "nothing resembling a query here");
    }

    #[test]
    fn validate_accepts_each_statement_kind() {
        let statements = [
            "SELECT * FROM users;",
            "INSERT INTO users (name) VALUES ('test');",
            "UPDATE users SET name = 'x' WHERE id = 1;",
            "DELETE FROM users WHERE id = 1;",
            "CREATE TABLE t (id INT);",
            "ALTER TABLE t ADD COLUMN name VARCHAR(10);",
            "DROP TABLE t;",
            "TRUNCATE TABLE t;",
        ];
        for sql in statements {
            assert!(validate(sql), "expected valid: {sql}");
        }
    }

    #[test]
    fn validate_rejects_non_sql() {
        assert!(!validate("This is not SQL"));
        assert!(!validate(""));
        assert!(!validate("   "));
    }

    #[test]
    fn statement_kind_classifies_cte_as_select() {
        let sql = "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent;";
        assert_eq!(statement_kind(sql), Some(StatementKind::Select));
    }

    #[test]
    fn format_uppercases_and_reindents() {
        let formatted = format("select * from users where age > 18;");
        assert_eq!(formatted, "SELECT *\nFROM users\nWHERE age > 18;");
    }

    #[test]
    fn format_keeps_join_clauses_together() {
        let formatted = format("select a.id from a left join b on a.id = b.id;");
        assert_eq!(formatted, "SELECT a.id\nFROM a\nLEFT JOIN b ON a.id = b.id;");
    }

    #[test]
    fn format_ignores_clause_keywords_inside_subqueries() {
        let formatted = format("select * from t where id in (select id from u);");
        assert_eq!(
            formatted,
            "SELECT *\nFROM t\nWHERE id IN (SELECT id FROM u);"
        );
    }

    #[test]
    fn clean_formats_valid_candidates() {
        let cleaned = clean("```sql\nselect * from users;\n```");
        assert!(cleaned.contains("SELECT"));
        assert!(cleaned.contains("FROM"));
        assert_eq!(cleaned, "SELECT *\nFROM users;");
    }

    #[test]
    fn clean_is_idempotent_on_valid_sql() {
        let once = clean("```sql\nselect id, name from users where id = 1;\n```");
        assert_eq!(clean(&once), once);
    }

    #[test]
    fn clean_passes_garbage_through() {
        let cleaned = clean("I could not produce a query, sorry.");
        assert_eq!(cleaned, "I could not produce a query, sorry.");
    }
}
