//! Statement text builders. Identifiers arrive already escaped by the driver;
//! values are bound through `:name` placeholders unless they are raw fragments.

use crate::core::SqlExpr;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    /// Accepts exactly `ASC` or `DESC`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            other => Err(format!("Invalid sort direction '{}', expected ASC or DESC", other)),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unbounded,
    Rows(u64),
    Window { offset: u64, rows: u64 },
}

impl Limit {
    /// Offset-only becomes a window of `unbounded_rows` rows; rows-only starts at 0.
    pub fn new(offset: Option<u64>, rows: Option<u64>, unbounded_rows: u64) -> Self {
        match (offset, rows) {
            (None, None) => Self::Unbounded,
            (None, Some(rows)) => Self::Rows(rows),
            (Some(offset), Some(rows)) => Self::Window { offset, rows },
            (Some(offset), None) => Self::Window {
                offset,
                rows: unbounded_rows,
            },
        }
    }

    pub fn clause(&self) -> String {
        match self {
            Self::Unbounded => String::new(),
            Self::Rows(rows) => format!(" LIMIT {}", rows),
            Self::Window { offset, rows } => format!(" LIMIT {},{}", offset, rows),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

impl Projection {
    fn sql(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::Columns(cols) => cols.join(","),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignValue {
    Param(String),
    Raw(SqlExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub column: String,
    pub value: AssignValue,
}

impl Assignment {
    pub fn param(column: String, name: &str) -> Self {
        Self {
            column,
            value: AssignValue::Param(name.to_string()),
        }
    }

    pub fn raw(column: String, expr: SqlExpr) -> Self {
        Self {
            column,
            value: AssignValue::Raw(expr),
        }
    }

    fn sql(&self) -> String {
        match &self.value {
            AssignValue::Param(name) => format!("{}=:{}", self.column, name),
            AssignValue::Raw(expr) => format!("{}={}", self.column, expr),
        }
    }
}

fn assignment_list(assignments: &[Assignment]) -> String {
    assignments
        .iter()
        .map(Assignment::sql)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn select_where(table: &str, projection: &Projection, field: &str, param: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}=:{}",
        projection.sql(),
        table,
        field,
        param
    )
}

pub fn select_ordered(
    table: &str,
    projection: &Projection,
    sort_field: &str,
    direction: SortDirection,
    limit: Limit,
) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {} {}{}",
        projection.sql(),
        table,
        sort_field,
        direction,
        limit.clause()
    )
}

pub fn insert(table: &str, assignments: &[Assignment]) -> String {
    format!("INSERT INTO {} SET {}", table, assignment_list(assignments))
}

pub fn update(table: &str, assignments: &[Assignment], id_column: &str, id_param: &str) -> String {
    format!(
        "UPDATE {} SET {} WHERE {}=:{}",
        table,
        assignment_list(assignments),
        id_column,
        id_param
    )
}
