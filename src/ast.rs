//! Parse tree produced by the parser and consumed by the planner.
//!
//! Shapes follow the original node definitions closely: a handful of small
//! leaf nodes (identifier, literal, star, function call) combined into
//! expression trees, and one top-level node per statement kind.

use crate::catalog::ColumnType;

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column reference, qualified (`table.field`) or bare (`field`).
    Id(String),
    /// A literal constant, still in raw source-text form.
    Imm(String),
    /// `*` or `table.*`.
    Star(Option<String>),
    Func { name: String, args: Vec<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    pub fn id(name: impl Into<String>) -> Self {
        Expr::Id(name.into())
    }

    pub fn imm(text: impl Into<String>) -> Self {
        Expr::Imm(text.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }
}

/// A `SELECT` output item, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

/// Only inner joins are implemented (see `Parser::parse_join`, which
/// rejects `LEFT JOIN` at parse time rather than silently executing it
/// as an inner join).
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: Option<String>,
    pub on: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub dir: OrderDir,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub count: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectNode {
    pub columns: Vec<ColumnItem>,
    pub table: String,
    pub table_alias: Option<String>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    /// Field names to group by; kept as plain strings (rather than
    /// re-parsed identifier nodes) since grouping only ever needs the name.
    pub groups: Vec<String>,
    pub having: Option<Expr>,
    pub orders: Vec<OrderItem>,
    pub limit: Option<Limit>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateNode {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteNode {
    pub table: String,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertNode {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub len: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableNode {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexNode {
    pub index: String,
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectNode),
    Update(UpdateNode),
    Delete(DeleteNode),
    Insert(InsertNode),
    CreateTable(CreateTableNode),
    CreateIndex(CreateIndexNode),
    Begin,
    Commit,
    Rollback,
}
