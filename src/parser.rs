//! Recursive-descent parser over the token stream produced by [`crate::lexer`].
//!
//! Expression precedence, low to high: `OR` < `AND` < comparison. There is
//! no unary minus or arithmetic in the grammar — the source language only
//! ever compares and combines predicates, it doesn't compute with them.

use crate::ast::*;
use crate::catalog::ColumnType;
use crate::error::{EngineError, Result};
use crate::lexer::{Lexer, Token};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn parse(src: &str) -> Result<Statement> {
        let tokens = Lexer::tokenize(src)?;
        let mut p = Parser { tokens, pos: 0 };
        let stmt = p.parse_statement()?;
        p.expect(Token::Semicolon).or_else(|_| p.expect(Token::Eof))?;
        Ok(stmt)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        if *self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(EngineError::Syntax(format!("expected {:?}, found {:?}", want, self.peek())))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.advance() {
            Token::Identifier(s) => Ok(s),
            other => Err(EngineError::Syntax(format!("expected identifier, found {:?}", other))),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek().clone() {
            Token::Select => self.parse_select().map(Statement::Select),
            Token::Insert => self.parse_insert().map(Statement::Insert),
            Token::Update => self.parse_update().map(Statement::Update),
            Token::Delete => self.parse_delete().map(Statement::Delete),
            Token::Create => self.parse_create(),
            Token::Begin => {
                self.advance();
                Ok(Statement::Begin)
            }
            Token::Commit => {
                self.advance();
                Ok(Statement::Commit)
            }
            Token::Rollback => {
                self.advance();
                Ok(Statement::Rollback)
            }
            other => Err(EngineError::Syntax(format!("unexpected statement start: {:?}", other))),
        }
    }

    // ---- SELECT ----

    fn parse_select(&mut self) -> Result<SelectNode> {
        self.expect(Token::Select)?;
        let mut node = SelectNode::default();
        if *self.peek() == Token::Distinct {
            self.advance();
            node.distinct = true;
        }
        node.columns.push(self.parse_column_item()?);
        while *self.peek() == Token::Comma {
            self.advance();
            node.columns.push(self.parse_column_item()?);
        }

        self.expect(Token::From)?;
        node.table = self.expect_identifier()?;
        if *self.peek() == Token::As {
            self.advance();
            node.table_alias = Some(self.expect_identifier()?);
        } else if let Token::Identifier(_) = self.peek() {
            node.table_alias = Some(self.expect_identifier()?);
        }

        while matches!(self.peek(), Token::Join | Token::Left | Token::Inner) {
            node.joins.push(self.parse_join()?);
        }

        if *self.peek() == Token::Where {
            self.advance();
            node.where_clause = Some(self.parse_expr()?);
        }

        if *self.peek() == Token::Group {
            self.advance();
            self.expect(Token::By)?;
            node.groups.push(self.expect_identifier()?);
            while *self.peek() == Token::Comma {
                self.advance();
                node.groups.push(self.expect_identifier()?);
            }
        }

        if *self.peek() == Token::Having {
            self.advance();
            node.having = Some(self.parse_expr()?);
        }

        if *self.peek() == Token::Order {
            self.advance();
            self.expect(Token::By)?;
            node.orders.push(self.parse_order_item()?);
            while *self.peek() == Token::Comma {
                self.advance();
                node.orders.push(self.parse_order_item()?);
            }
        }

        if *self.peek() == Token::Limit {
            self.advance();
            let count = self.parse_unsigned()?;
            let mut offset = 0;
            if *self.peek() == Token::Offset {
                self.advance();
                offset = self.parse_unsigned()?;
            }
            node.limit = Some(Limit { count, offset });
        }

        Ok(node)
    }

    fn parse_column_item(&mut self) -> Result<ColumnItem> {
        let expr = self.parse_column_expr()?;
        let alias = if *self.peek() == Token::As {
            self.advance();
            Some(self.expect_identifier()?)
        } else if let Token::Identifier(_) = self.peek() {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        Ok(ColumnItem { expr, alias })
    }

    fn parse_column_expr(&mut self) -> Result<Expr> {
        if *self.peek() == Token::Star {
            self.advance();
            return Ok(Expr::Star(None));
        }
        if let Token::Identifier(name) = self.peek().clone() {
            let save = self.pos;
            self.advance();
            if *self.peek() == Token::Dot {
                self.advance();
                if *self.peek() == Token::Star {
                    self.advance();
                    return Ok(Expr::Star(Some(name)));
                }
                let field = self.expect_identifier()?;
                return Ok(Expr::Id(format!("{}.{}", name, field)));
            }
            if *self.peek() == Token::LParen {
                self.advance();
                let mut args = Vec::new();
                if *self.peek() != Token::RParen {
                    args.push(self.parse_primary_expr()?);
                    while *self.peek() == Token::Comma {
                        self.advance();
                        args.push(self.parse_primary_expr()?);
                    }
                }
                self.expect(Token::RParen)?;
                return Ok(Expr::Func { name, args });
            }
            self.pos = save;
        }
        self.parse_primary_expr()
    }

    fn parse_order_item(&mut self) -> Result<OrderItem> {
        let expr = self.parse_column_expr()?;
        let dir = match self.peek() {
            Token::Asc => {
                self.advance();
                OrderDir::Asc
            }
            Token::Desc => {
                self.advance();
                OrderDir::Desc
            }
            _ => OrderDir::Asc,
        };
        Ok(OrderItem { expr, dir })
    }

    fn parse_join(&mut self) -> Result<Join> {
        if *self.peek() == Token::Left {
            return Err(EngineError::Syntax("LEFT JOIN is not supported; only (INNER) JOIN is implemented".into()));
        }
        if *self.peek() == Token::Inner {
            self.advance();
        }
        self.expect(Token::Join)?;
        let table = self.expect_identifier()?;
        let alias = if let Token::Identifier(_) = self.peek() {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.expect(Token::On)?;
        let on = self.parse_expr()?;
        Ok(Join { table, alias, on })
    }

    fn parse_unsigned(&mut self) -> Result<u64> {
        match self.advance() {
            Token::Number(n) => n
                .parse::<u64>()
                .map_err(|_| EngineError::Syntax(format!("expected integer, found '{}'", n))),
            other => Err(EngineError::Syntax(format!("expected a number, found {:?}", other))),
        }
    }

    // ---- INSERT / UPDATE / DELETE ----

    fn parse_insert(&mut self) -> Result<InsertNode> {
        self.expect(Token::Insert)?;
        self.expect(Token::Into)?;
        let table = self.expect_identifier()?;
        let mut columns = Vec::new();
        if *self.peek() == Token::LParen {
            self.advance();
            columns.push(self.expect_identifier()?);
            while *self.peek() == Token::Comma {
                self.advance();
                columns.push(self.expect_identifier()?);
            }
            self.expect(Token::RParen)?;
        }
        self.expect(Token::Values)?;
        let mut values = vec![self.parse_value_tuple()?];
        while *self.peek() == Token::Comma {
            self.advance();
            values.push(self.parse_value_tuple()?);
        }
        Ok(InsertNode { table, columns, values })
    }

    fn parse_value_tuple(&mut self) -> Result<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let mut vals = vec![self.parse_primary_expr()?];
        while *self.peek() == Token::Comma {
            self.advance();
            vals.push(self.parse_primary_expr()?);
        }
        self.expect(Token::RParen)?;
        Ok(vals)
    }

    fn parse_update(&mut self) -> Result<UpdateNode> {
        self.expect(Token::Update)?;
        let table = self.expect_identifier()?;
        self.expect(Token::Set)?;
        let mut assignments = vec![self.parse_assignment()?];
        while *self.peek() == Token::Comma {
            self.advance();
            assignments.push(self.parse_assignment()?);
        }
        let where_clause = if *self.peek() == Token::Where {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(UpdateNode { table, assignments, where_clause })
    }

    fn parse_assignment(&mut self) -> Result<Assignment> {
        let column = self.expect_identifier()?;
        self.expect(Token::Eq)?;
        let value = self.parse_primary_expr()?;
        Ok(Assignment { column, value })
    }

    fn parse_delete(&mut self) -> Result<DeleteNode> {
        self.expect(Token::Delete)?;
        self.expect(Token::From)?;
        let table = self.expect_identifier()?;
        let where_clause = if *self.peek() == Token::Where {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(DeleteNode { table, where_clause })
    }

    // ---- CREATE ----

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(Token::Create)?;
        match self.peek().clone() {
            Token::Table => {
                self.advance();
                self.parse_create_table().map(Statement::CreateTable)
            }
            Token::Index => {
                self.advance();
                self.parse_create_index().map(Statement::CreateIndex)
            }
            other => Err(EngineError::Syntax(format!("expected TABLE or INDEX, found {:?}", other))),
        }
    }

    fn parse_create_table(&mut self) -> Result<CreateTableNode> {
        let table = self.expect_identifier()?;
        self.expect(Token::LParen)?;
        let mut columns = vec![self.parse_column_spec()?];
        while *self.peek() == Token::Comma {
            self.advance();
            columns.push(self.parse_column_spec()?);
        }
        self.expect(Token::RParen)?;
        Ok(CreateTableNode { table, columns })
    }

    fn parse_column_spec(&mut self) -> Result<ColumnSpec> {
        let name = self.expect_identifier()?;
        let (ty, default_len) = match self.advance() {
            Token::Int => (ColumnType::Int, 8),
            Token::Float => (ColumnType::Float, 8),
            Token::Bool => (ColumnType::Bool, 1),
            Token::Text => (ColumnType::Text, 8),
            Token::Varchar => (ColumnType::FixedStr, 255),
            other => return Err(EngineError::Syntax(format!("expected a type, found {:?}", other))),
        };
        let len = if *self.peek() == Token::LParen {
            self.advance();
            let n = self.parse_unsigned()? as i64;
            self.expect(Token::RParen)?;
            n
        } else {
            default_len
        };
        Ok(ColumnSpec { name, ty, len })
    }

    fn parse_create_index(&mut self) -> Result<CreateIndexNode> {
        let index = self.expect_identifier()?;
        self.expect(Token::On)?;
        let table = self.expect_identifier()?;
        self.expect(Token::LParen)?;
        let mut columns = vec![self.expect_identifier()?];
        while *self.peek() == Token::Comma {
            self.advance();
            columns.push(self.expect_identifier()?);
        }
        self.expect(Token::RParen)?;
        Ok(CreateIndexNode { index, table, columns })
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        while *self.peek() == Token::And {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        if *self.peek() == Token::LParen {
            self.advance();
            let inner = self.parse_expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        let lhs = self.parse_column_expr()?;
        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_column_expr()?;
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::imm(n)),
            Token::StringLit(s) => Ok(Expr::imm(s)),
            Token::Identifier(name) => {
                if *self.peek() == Token::Dot {
                    self.advance();
                    let field = self.expect_identifier()?;
                    Ok(Expr::id(format!("{}.{}", name, field)))
                } else {
                    Ok(Expr::id(name))
                }
            }
            other => Err(EngineError::Syntax(format!("expected a value, found {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_select() {
        let stmt = Parser::parse("SELECT id, name FROM users WHERE id = 1;").unwrap();
        match stmt {
            Statement::Select(s) => {
                assert_eq!(s.table, "users");
                assert_eq!(s.columns.len(), 2);
                assert!(s.where_clause.is_some());
            }
            other => panic!("expected Select, got {:?}", other),
        }
    }

    #[test]
    fn parses_select_with_join_group_order_limit() {
        let stmt = Parser::parse(
            "SELECT a.id, MAX(b.score) FROM a JOIN b ON a.id = b.aid GROUP BY a.id ORDER BY a.id DESC LIMIT 10 OFFSET 5;",
        )
        .unwrap();
        match stmt {
            Statement::Select(s) => {
                assert_eq!(s.joins.len(), 1);
                assert_eq!(s.groups, vec!["a.id".to_string()]);
                assert_eq!(s.orders[0].dir, OrderDir::Desc);
                assert_eq!(s.limit, Some(Limit { count: 10, offset: 5 }));
            }
            other => panic!("expected Select, got {:?}", other),
        }
    }

    #[test]
    fn rejects_left_join() {
        let err = Parser::parse("SELECT * FROM a LEFT JOIN b ON a.id = b.id;").unwrap_err();
        assert!(matches!(err, EngineError::Syntax(_)));
    }

    #[test]
    fn accepts_explicit_inner_join() {
        let stmt = Parser::parse("SELECT * FROM a INNER JOIN b ON a.id = b.id;").unwrap();
        match stmt {
            Statement::Select(s) => assert_eq!(s.joins.len(), 1),
            other => panic!("expected Select, got {:?}", other),
        }
    }

    #[test]
    fn parses_insert() {
        let stmt = Parser::parse("INSERT INTO t (a, b) VALUES (1, 'x');").unwrap();
        match stmt {
            Statement::Insert(node) => {
                assert_eq!(node.columns, vec!["a", "b"]);
                assert_eq!(node.values.len(), 1);
            }
            other => panic!("expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn parses_create_table() {
        let stmt = Parser::parse("CREATE TABLE t (id INT, name VARCHAR(32));").unwrap();
        match stmt {
            Statement::CreateTable(node) => {
                assert_eq!(node.columns.len(), 2);
                assert_eq!(node.columns[1].len, 32);
            }
            other => panic!("expected CreateTable, got {:?}", other),
        }
    }

    #[test]
    fn parses_update_and_delete() {
        assert!(matches!(
            Parser::parse("UPDATE t SET a = 1 WHERE id = 2;").unwrap(),
            Statement::Update(_)
        ));
        assert!(matches!(Parser::parse("DELETE FROM t WHERE id = 2;").unwrap(), Statement::Delete(_)));
    }

    #[test]
    fn parses_transaction_keywords() {
        assert_eq!(Parser::parse("BEGIN;").unwrap(), Statement::Begin);
        assert_eq!(Parser::parse("COMMIT;").unwrap(), Statement::Commit);
        assert_eq!(Parser::parse("ROLLBACK;").unwrap(), Statement::Rollback);
    }
}
