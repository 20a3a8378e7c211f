//! Query Guard for Generated SQL
//!
//! This module is the security boundary between generated text and a live
//! database connection. Every candidate is parsed into a syntax tree and
//! checked against an allow-list: exactly one statement, and that statement
//! must be a plain `SELECT` query.
//!
//! # Validation Strategy
//! - Full SQL grammar (`sqlparser`), never string or regex matching
//! - Statement counting happens on the parsed tree, so separators inside
//!   comments or string literals cannot split a statement
//! - Classification looks at statement shape only; table and column names
//!   are irrelevant
//! - Pure and stateless: safe to call from any number of tasks at once
//! - Unquoted aliases spelled like a statement keyword are treated as a
//!   second statement: `SELECT 1 DELETE FROM Orders` is one `SELECT` to the
//!   parser but two statements to a server that batches without `;`
//!
//! # Known Gap
//! Writable constructs nested inside an otherwise read-only query (for
//! example a data-modifying CTE in `PostgreSQL`) are not inspected.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Ident, Query, Select, SelectItem, SetExpr, Statement, TableAlias, TableFactor,
};
use sqlparser::dialect::{
    Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

/// Reason given when the candidate does not parse (the parser message follows)
pub const SYNTAX_ERROR_PREFIX: &str = "Syntax Error: ";

/// Reason given when the candidate is not exactly one statement
pub const MULTIPLE_STATEMENTS_REASON: &str = "Multiple statements or empty batches are not allowed.";

/// Reason given when the single statement is not a `SELECT`
pub const ONLY_SELECT_REASON: &str = "Only SELECT statements are allowed.";

/// Kind name reported for the permitted statement shape
pub const SELECT_KIND: &str = "Select";

/// Keywords that open a statement in at least one supported server
const STATEMENT_KEYWORDS: &[&str] = &[
    "ALTER", "BACKUP", "BEGIN", "BULK", "COMMIT", "CREATE", "DBCC", "DECLARE", "DELETE", "DENY",
    "DROP", "EXEC", "EXECUTE", "GRANT", "INSERT", "MERGE", "REVOKE", "ROLLBACK", "SAVE", "SELECT",
    "SET", "SHUTDOWN", "TRUNCATE", "UPDATE", "USE", "WAITFOR", "WITH",
];

/// SQL dialect the guard parses with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
    Mssql,
    Generic,
}

impl SqlDialect {
    /// All dialects, in the order offered by `configure`
    pub const ALL: [Self; 5] = [Self::Sqlite, Self::Postgres, Self::Mysql, Self::Mssql, Self::Generic];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Mssql => "mssql",
            Self::Generic => "generic",
        }
    }

    fn parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            Self::Sqlite => Box::new(SQLiteDialect {}),
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::Mysql => Box::new(MySqlDialect {}),
            Self::Mssql => Box::new(MsSqlDialect {}),
            Self::Generic => Box::new(GenericDialect {}),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown SQL dialect '{s}'"))
    }
}

/// Outcome of validating one candidate query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_safe: bool,

    /// Why the candidate was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Kind of the offending statement, when the rejection is a policy violation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_statement_kind: Option<String>,
}

impl Verdict {
    #[must_use]
    pub const fn safe() -> Self {
        Self { is_safe: true, reason: None, detected_statement_kind: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { is_safe: false, reason: Some(reason.into()), detected_statement_kind: None }
    }

    pub fn policy_violation(kind: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reason: Some(ONLY_SELECT_REASON.to_string()),
            detected_statement_kind: Some(kind.into()),
        }
    }
}

/// Allow-list guard over parsed SQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlGuard {
    dialect: SqlDialect,
}

impl SqlGuard {
    #[must_use]
    pub const fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    #[must_use]
    pub const fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Validate a candidate query
    ///
    /// Deterministic: the same text always yields the same [`Verdict`].
    #[must_use]
    pub fn validate(&self, candidate: &str) -> Verdict {
        let dialect = self.dialect.parser_dialect();

        let statements = match Parser::parse_sql(&*dialect, candidate) {
            Ok(statements) => statements,
            Err(e) => return Verdict::rejected(format!("{SYNTAX_ERROR_PREFIX}{e}")),
        };

        let [statement] = statements.as_slice() else {
            return Verdict::rejected(MULTIPLE_STATEMENTS_REASON);
        };

        let kind = statement_kind(statement);
        if kind != SELECT_KIND {
            return Verdict::policy_violation(kind);
        }

        match statement {
            Statement::Query(query) if hides_statement(query) => {
                Verdict::rejected(MULTIPLE_STATEMENTS_REASON)
            }
            _ => Verdict::safe(),
        }
    }
}

/// Classify a top-level statement by its root node
fn statement_kind(statement: &Statement) -> String {
    let kind = match statement {
        Statement::Query(query) => query_kind(query),
        Statement::Insert { .. } => "Insert",
        Statement::Update { .. } => "Update",
        Statement::Delete { .. } => "Delete",
        Statement::Merge { .. } => "Merge",
        Statement::Truncate { .. } => "Truncate",
        Statement::Drop { .. } | Statement::DropFunction { .. } => "Drop",
        Statement::AlterTable { .. } | Statement::AlterView { .. } | Statement::AlterIndex { .. } => {
            "Alter"
        }
        Statement::CreateTable { .. } | Statement::CreateView { .. } | Statement::CreateIndex { .. } => {
            "Create"
        }
        other => return variant_name(other),
    };
    kind.to_string()
}

/// A query root is only a read if its body is a read.
///
/// `WITH ... INSERT` and `SELECT ... INTO` parse as queries but write.
fn query_kind(query: &Query) -> &'static str {
    match query.body.as_ref() {
        SetExpr::Insert(_) => "Insert",
        SetExpr::Update(_) => "Update",
        SetExpr::Select(select) if select.into.is_some() => "SelectInto",
        _ => SELECT_KIND,
    }
}

/// Whether a keyword-named alias could start an unseparated second statement
fn hides_statement(query: &Query) -> bool {
    set_expr_hides(query.body.as_ref())
}

fn set_expr_hides(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select_hides(select),
        SetExpr::Query(query) => hides_statement(query),
        SetExpr::SetOperation { left, right, .. } => set_expr_hides(left) || set_expr_hides(right),
        _ => false,
    }
}

fn select_hides(select: &Select) -> bool {
    let aliased_column = select.projection.iter().any(|item| match item {
        SelectItem::ExprWithAlias { alias, .. } => is_statement_keyword(alias),
        _ => false,
    });

    aliased_column
        || select.from.iter().any(|table| {
            table_hides(&table.relation) || table.joins.iter().any(|join| table_hides(&join.relation))
        })
}

fn table_hides(relation: &TableFactor) -> bool {
    match relation {
        TableFactor::Table { alias, .. } => alias_hides(alias.as_ref()),
        TableFactor::Derived { alias, subquery, .. } => {
            alias_hides(alias.as_ref()) || hides_statement(subquery)
        }
        TableFactor::NestedJoin { table_with_joins, alias, .. } => {
            alias_hides(alias.as_ref())
                || table_hides(&table_with_joins.relation)
                || table_with_joins.joins.iter().any(|join| table_hides(&join.relation))
        }
        _ => false,
    }
}

fn alias_hides(alias: Option<&TableAlias>) -> bool {
    alias.is_some_and(|alias| is_statement_keyword(&alias.name))
}

/// Quoted identifiers never start a statement
fn is_statement_keyword(ident: &Ident) -> bool {
    ident.quote_style.is_none()
        && STATEMENT_KEYWORDS.iter().any(|keyword| keyword.eq_ignore_ascii_case(&ident.value))
}

/// Name of the statement variant, e.g. `Explain` or `Grant`
fn variant_name(statement: &Statement) -> String {
    format!("{statement:?}").chars().take_while(char::is_ascii_alphanumeric).collect()
}
