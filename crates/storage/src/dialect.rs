//! SQL dialect differences: placeholder style and label predicate push-down.
//!
//! Label matchers are pushed into SQL only as a pre-filter. Whatever a
//! builder cannot express exactly is left to the in-memory filter engine,
//! so a predicate may over-select but must never drop a matching row.
//! Regex matchers are never pushed down: matcher regexes use Rust syntax,
//! which neither PostgreSQL nor MySQL regex engines accept in full.

use std::fmt;
use std::str::FromStr;

use alertstore_rules::LabelMatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
    Sqlite,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(format!("unsupported SQL dialect '{other}'")),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        })
    }
}

impl Dialect {
    /// Rewrite `?` placeholders into the dialect's native form (`$1`, `$2`, ... on Postgres).
    pub fn rebind(&self, sql: &str) -> String {
        if *self != Self::Postgres {
            return sql.to_string();
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        let mut in_literal = false;
        for ch in sql.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(ch);
                }
                '?' if !in_literal => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(ch),
            }
        }
        out
    }

    /// The label predicate strategy for this dialect.
    pub fn label_predicates(&self) -> Box<dyn LabelPredicateBuilder> {
        match self {
            Self::Postgres | Self::MySql => Box::new(JsonLabelPredicates { dialect: *self }),
            Self::Sqlite => Box::new(GlobLabelPredicates),
        }
    }
}

/// A bound SQL argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlArg {
    Int(i64),
    Text(String),
}

/// A SQL fragment with `?` placeholders and its arguments, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlPredicate {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

impl SqlPredicate {
    pub fn new(sql: impl Into<String>, args: Vec<SqlArg>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Translates label matchers into SQL over the JSON text `labels` column.
pub trait LabelPredicateBuilder: Send + Sync {
    /// `None` when the matcher cannot be pushed down exactly enough.
    fn build(&self, matcher: &LabelMatcher) -> Option<SqlPredicate>;
}

// ── JSON extraction (Postgres, MySQL) ─────────────────────────

pub struct JsonLabelPredicates {
    dialect: Dialect,
}

impl JsonLabelPredicates {
    fn extract(&self) -> &'static str {
        match self.dialect {
            Dialect::MySql => "JSON_UNQUOTE(JSON_EXTRACT(labels, ?))",
            _ => "(CAST(NULLIF(labels, '') AS jsonb) ->> ?)",
        }
    }

    fn key_arg(&self, key: &str) -> SqlArg {
        match self.dialect {
            Dialect::MySql => SqlArg::Text(format!("$.{}", json_string(key))),
            _ => SqlArg::Text(key.to_string()),
        }
    }
}

impl LabelPredicateBuilder for JsonLabelPredicates {
    fn build(&self, m: &LabelMatcher) -> Option<SqlPredicate> {
        let expr = self.extract();
        let key = self.key_arg(&m.key);

        if m.is_existence() {
            return Some(SqlPredicate::new(format!("{expr} IS NOT NULL"), vec![key]));
        }
        if m.is_regex {
            return None;
        }

        let value = SqlArg::Text(m.value.clone());
        let p = if !m.is_equal {
            SqlPredicate::new(
                format!("({expr} IS NULL OR {expr} <> ?)"),
                vec![key.clone(), key, value],
            )
        } else if m.value.is_empty() {
            SqlPredicate::new(format!("COALESCE({expr}, '') = ''"), vec![key])
        } else {
            SqlPredicate::new(format!("{expr} = ?"), vec![key, value])
        };
        Some(p)
    }
}

// ── GLOB (SQLite family) ──────────────────────────────────────

/// Pattern matching over the compact JSON text, e.g. `*"severity":"critical"*`.
pub struct GlobLabelPredicates;

impl LabelPredicateBuilder for GlobLabelPredicates {
    fn build(&self, m: &LabelMatcher) -> Option<SqlPredicate> {
        if m.is_existence() {
            let pattern = format!("*{}:*", glob_escape(&json_string(&m.key)));
            return Some(SqlPredicate::new("labels GLOB ?", vec![SqlArg::Text(pattern)]));
        }
        // regexes and "absent or empty" cannot be expressed as a glob
        if m.is_regex || (m.is_equal && m.value.is_empty()) {
            return None;
        }
        let pair = format!("{}:{}", json_string(&m.key), json_string(&m.value));
        let pattern = format!("*{}*", glob_escape(&pair));
        let sql = if m.is_equal {
            "labels GLOB ?"
        } else {
            "labels NOT GLOB ?"
        };
        Some(SqlPredicate::new(sql, vec![SqlArg::Text(pattern)]))
    }
}

/// Compact JSON encoding of a string, quotes included.
pub(crate) fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn glob_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(ch);
                out.push(']');
            }
            _ => out.push(ch),
        }
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn m(text: &str) -> LabelMatcher {
        LabelMatcher::parse(text).unwrap()
    }

    fn text(arg: &SqlArg) -> &str {
        match arg {
            SqlArg::Text(s) => s,
            SqlArg::Int(_) => panic!("expected text"),
        }
    }

    #[test]
    fn rebind_numbers_placeholders_outside_literals() {
        let sql = "a = ? AND b = '?' AND c IN (?, ?)";
        assert_eq!(
            Dialect::Postgres.rebind(sql),
            "a = $1 AND b = '?' AND c IN ($2, $3)"
        );
        assert_eq!(Dialect::Sqlite.rebind(sql), sql);
    }

    #[test]
    fn dialect_parses_config_values() {
        assert_eq!("POSTGRES".parse::<Dialect>(), Ok(Dialect::Postgres));
        assert_eq!("sqlite3".parse::<Dialect>(), Ok(Dialect::Sqlite));
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn json_equality_and_negation() {
        let b = JsonLabelPredicates {
            dialect: Dialect::Postgres,
        };
        let p = b.build(&m("severity=critical")).unwrap();
        assert!(p.sql.ends_with("->> ?) = ?"));
        assert_eq!(p.args, vec![SqlArg::Text("severity".into()), SqlArg::Text("critical".into())]);

        let p = b.build(&m("severity!=info")).unwrap();
        assert!(p.sql.contains("IS NULL OR"));
        assert_eq!(p.args.len(), 3);
        assert_eq!(p.sql.matches('?').count(), 3);

        let p = b.build(&m("team=")).unwrap();
        assert!(p.sql.starts_with("COALESCE("));
    }

    #[test]
    fn json_existence() {
        let b = JsonLabelPredicates {
            dialect: Dialect::Postgres,
        };
        let p = b.build(&m("team")).unwrap();
        assert!(p.sql.ends_with("IS NOT NULL"));

        let mysql = JsonLabelPredicates {
            dialect: Dialect::MySql,
        };
        let p = mysql.build(&m("env!=dev")).unwrap();
        assert!(p.sql.starts_with("(JSON_UNQUOTE(JSON_EXTRACT(labels, ?)) IS NULL OR"));
        assert_eq!(text(&p.args[0]), "$.\"env\"");
    }

    #[test]
    fn json_leaves_regex_to_memory_filter() {
        for dialect in [Dialect::Postgres, Dialect::MySql] {
            let b = JsonLabelPredicates { dialect };
            for matcher in ["env=~prod.*", "env!~dev|test", "team=~(?i)ops", r"name=~\p{Greek}+"] {
                assert!(b.build(&m(matcher)).is_none(), "{dialect}: {matcher}");
            }
        }
    }

    #[test]
    fn glob_patterns_are_escaped() {
        let p = GlobLabelPredicates.build(&m("name=a*b")).unwrap();
        assert_eq!(p.sql, "labels GLOB ?");
        assert_eq!(text(&p.args[0]), r#"*"name":"a[*]b"*"#);

        let p = GlobLabelPredicates.build(&m("name!=x")).unwrap();
        assert_eq!(p.sql, "labels NOT GLOB ?");

        let p = GlobLabelPredicates.build(&m("team")).unwrap();
        assert_eq!(text(&p.args[0]), r#"*"team":*"#);
    }

    #[test]
    fn glob_leaves_regex_to_memory_filter() {
        assert!(GlobLabelPredicates.build(&m("env=~prod.*")).is_none());
        assert!(GlobLabelPredicates.build(&m("team=")).is_none());
    }
}
