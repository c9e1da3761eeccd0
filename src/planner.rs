//! Rewrites a parsed statement into a physical operator tree.
//!
//! For `SELECT`, the rewrite passes are: detect an implicit whole-relation
//! GROUP when an aggregate appears with no explicit `GROUP BY`, pull
//! literal constants out of the output list for a final re-insertion step,
//! expand `*`/`t.*`, qualify bare column names (single-table queries only —
//! a join query must already qualify every reference in source text),
//! dedup repeated identifier outputs, and finally choose a table scan or a
//! covering index scan per table before stacking the operator tree in the
//! fixed order: source (→ join) → filter → group → distinct → sort → limit
//! → non-aggregate function application → projection → constant
//! re-insertion.

use std::collections::HashSet;

use crate::ast::{
    self, CreateIndexNode, CreateTableNode, DeleteNode, Expr, InsertNode, SelectNode, Statement, UpdateNode,
};
use crate::catalog::{get_function, Column, ColumnType, IndexDef, TableDef};
use crate::engine::SharedEngine;
use crate::error::{EngineError, Result};
use crate::operators::{
    AggregateCall, CreateIndexOp, CreateTableOp, DeleteOp, Distinct, ExpandImm, Filter, Group, IndexScan, InsertOp,
    Join as JoinOp, Limit as LimitOp, Operator, OutputItem, ProjectField, Projection, SetClause, Sort, SortKey,
    TableScan, UpdateOp,
};
use crate::value::Value;

pub struct Planner;

impl Planner {
    pub fn plan(stmt: Statement, engine: &SharedEngine) -> Result<Box<dyn Operator>> {
        match stmt {
            Statement::Select(node) => plan_select(node, engine),
            Statement::Insert(node) => plan_insert(node, engine),
            Statement::Update(node) => plan_update(node, engine),
            Statement::Delete(node) => plan_delete(node, engine),
            Statement::CreateTable(node) => plan_create_table(node, engine),
            Statement::CreateIndex(node) => plan_create_index(node, engine),
            Statement::Begin | Statement::Commit | Statement::Rollback => {
                Err(EngineError::InvariantViolation("control commands aren't planned as operators".into()))
            }
        }
    }
}

fn qualify_name(name: &str, default_table: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.{}", default_table, name)
    }
}

fn qualify_expr(expr: &Expr, default_table: &str) -> Expr {
    match expr {
        Expr::Id(name) => Expr::Id(qualify_name(name, default_table)),
        Expr::Imm(v) => Expr::Imm(v.clone()),
        Expr::Star(q) => Expr::Star(q.clone()),
        Expr::Func { name, args } => {
            Expr::Func { name: name.clone(), args: args.iter().map(|a| qualify_expr(a, default_table)).collect() }
        }
        Expr::Binary { op, lhs, rhs } => Expr::binary(
            op.clone(),
            qualify_expr(lhs, default_table),
            qualify_expr(rhs, default_table),
        ),
    }
}

fn collect_ids(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Id(name) => out.push(name.clone()),
        Expr::Func { args, .. } => args.iter().for_each(|a| collect_ids(a, out)),
        Expr::Binary { lhs, rhs, .. } => {
            collect_ids(lhs, out);
            collect_ids(rhs, out);
        }
        Expr::Imm(_) | Expr::Star(_) => {}
    }
}

fn is_aggregate_func(name: &str) -> bool {
    get_function(name).map(|f| f.is_aggregate).unwrap_or(false)
}

// ---------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------

enum PlanItem {
    Const(String),
    /// Index into `fields` (the expanded, qualified output expressions).
    Field(usize),
}

fn plan_select(mut node: SelectNode, engine: &SharedEngine) -> Result<Box<dyn Operator>> {
    let (from_table, join_tables) = {
        let eng = engine.borrow();
        let from_table = eng.catalog.table(&node.table)?.clone();
        let mut joins = Vec::new();
        for j in &node.joins {
            joins.push(eng.catalog.table(&j.table)?.clone());
        }
        (from_table, joins)
    };
    let single_table = node.joins.is_empty();
    let default_table = from_table.name.clone();

    let has_aggregate = node
        .columns
        .iter()
        .any(|c| matches!(&c.expr, Expr::Func { name, .. } if is_aggregate_func(name)));
    let need_group = has_aggregate || !node.groups.is_empty();

    if single_table {
        node.where_clause = node.where_clause.as_ref().map(|e| qualify_expr(e, &default_table));
        node.having = node.having.as_ref().map(|e| qualify_expr(e, &default_table));
        node.groups = node.groups.iter().map(|g| qualify_name(g, &default_table)).collect();
        for order in &mut node.orders {
            order.expr = qualify_expr(&order.expr, &default_table);
        }
    }

    // Extract constants + expand `*`, preserving the original output order
    // in `plan_items` so the final ExpandImm stage can re-interleave them.
    let mut fields: Vec<(Expr, Option<String>)> = Vec::new();
    let mut plan_items: Vec<PlanItem> = Vec::new();
    for item in node.columns {
        match item.expr {
            Expr::Imm(lit) => plan_items.push(PlanItem::Const(lit)),
            Expr::Star(qualifier) => {
                let tables = star_tables(&qualifier, &from_table, &join_tables, &node.table_alias, &node.joins);
                for t in tables {
                    for col in &t.columns {
                        fields.push((Expr::Id(col.name.clone()), None));
                        plan_items.push(PlanItem::Field(fields.len() - 1));
                    }
                }
            }
            other => {
                let qualified = if single_table { qualify_expr(&other, &default_table) } else { other };
                fields.push((qualified, item.alias));
                plan_items.push(PlanItem::Field(fields.len() - 1));
            }
        }
    }

    // Dedup identifier fields, keeping the first occurrence (stable order).
    let mut seen_ids: HashSet<String> = HashSet::new();
    plan_items.retain(|item| match item {
        PlanItem::Field(idx) => match &fields[*idx].0 {
            Expr::Id(name) => seen_ids.insert(name.clone()),
            _ => true,
        },
        PlanItem::Const(_) => true,
    });

    // Source selection: gather every field referenced anywhere in the
    // query, per table, and pick a covering index or fall back to a scan.
    let mut referenced: Vec<String> = Vec::new();
    for (e, _) in &fields {
        collect_ids(e, &mut referenced);
    }
    if let Some(w) = &node.where_clause {
        collect_ids(w, &mut referenced);
    }
    if let Some(h) = &node.having {
        collect_ids(h, &mut referenced);
    }
    referenced.extend(node.groups.iter().cloned());
    for order in &node.orders {
        collect_ids(&order.expr, &mut referenced);
    }
    for j in &node.joins {
        collect_ids(&j.on, &mut referenced);
    }

    let from_referenced: Vec<String> =
        referenced.iter().filter(|f| f.starts_with(&format!("{}.", from_table.name))).cloned().collect();
    let mut plan: Box<dyn Operator> = pick_source(engine, &from_table, &from_referenced)?;

    for (join, table) in node.joins.iter().zip(join_tables.iter()) {
        let join_referenced: Vec<String> =
            referenced.iter().filter(|f| f.starts_with(&format!("{}.", table.name))).cloned().collect();
        let right = pick_source(engine, table, &join_referenced)?;
        plan = Box::new(JoinOp::new(plan, right, join.on.clone()));
    }

    if let Some(where_clause) = node.where_clause {
        plan = Box::new(Filter::new(plan, where_clause));
    }

    // Aggregate function outputs are named deterministically so Projection
    // can resolve them by the same name after Group / FuncApply runs.
    let agg_name = |func: &str, arg: &str| format!("{}({})", func.to_uppercase(), arg);

    if need_group {
        let mut aggregates = Vec::new();
        for (e, _) in &fields {
            if let Expr::Func { name, args } = e {
                if is_aggregate_func(name) {
                    let arg_name = match args.first() {
                        Some(Expr::Id(n)) => n.clone(),
                        _ => return Err(EngineError::Syntax(format!("{} expects a column argument", name))),
                    };
                    aggregates.push(AggregateCall {
                        func_name: name.clone(),
                        input_col: arg_name.clone(),
                        output_col: agg_name(name, &arg_name),
                    });
                }
            }
        }
        plan = Box::new(Group::new(plan, node.groups.clone(), aggregates));
        if let Some(having) = node.having {
            plan = Box::new(Filter::new(plan, having));
        }
    }

    if node.distinct {
        let names: Vec<String> = fields
            .iter()
            .filter_map(|(e, _)| if let Expr::Id(n) = e { Some(n.clone()) } else { None })
            .collect();
        plan = Box::new(Distinct::new(plan, names));
    }

    if !node.orders.is_empty() {
        let orders = node.orders.into_iter().map(|o| SortKey { expr: o.expr, dir: o.dir }).collect();
        plan = Box::new(Sort::new(plan, orders));
    }

    if let Some(limit) = node.limit {
        plan = Box::new(LimitOp::new(plan, limit.count, limit.offset));
    }

    // Non-aggregate function application: evaluate any remaining `Func`
    // output (e.g. `ABS(x)`) into a named column Projection can pick up.
    if !need_group {
        let funcs: Vec<(String, Expr)> = fields
            .iter()
            .filter_map(|(e, _)| match e {
                Expr::Func { name, args } if !is_aggregate_func(name) => {
                    let label = match args.first() {
                        Some(Expr::Id(n)) => format!("{}({})", name.to_uppercase(), n),
                        _ => format!("{}(...)", name.to_uppercase()),
                    };
                    Some((label, e.clone()))
                }
                _ => None,
            })
            .collect();
        if !funcs.is_empty() {
            plan = Box::new(crate::operators::FuncApply::new(plan, funcs));
        }
    }

    // Projection: resolve each non-constant output field to a column name.
    let mut project_fields = Vec::new();
    for (idx, (e, alias)) in fields.iter().enumerate() {
        let _ = idx;
        let (source, default_output) = match e {
            Expr::Id(n) => (n.clone(), n.clone()),
            Expr::Func { name, args } => {
                let arg_label = match args.first() {
                    Some(Expr::Id(n)) => n.clone(),
                    _ => "...".to_string(),
                };
                let label = agg_name(name, &arg_label);
                (label.clone(), label)
            }
            _ => continue,
        };
        let output = alias.clone().unwrap_or(default_output);
        project_fields.push(ProjectField { source, output });
    }
    let projected_names: Vec<String> = project_fields.iter().map(|f| f.output.clone()).collect();
    plan = Box::new(Projection::new(plan, project_fields));

    // ExpandImm: re-interleave constants back into their original position.
    let needs_expand_imm = plan_items.iter().any(|i| matches!(i, PlanItem::Const(_)));
    if needs_expand_imm {
        let mut items = Vec::with_capacity(plan_items.len());
        let mut names = Vec::with_capacity(plan_items.len());
        let mut field_cursor = 0;
        for item in &plan_items {
            match item {
                PlanItem::Const(lit) => {
                    items.push(OutputItem::Const(Value::untyped(lit.clone())));
                    names.push("const".to_string());
                }
                PlanItem::Field(_) => {
                    items.push(OutputItem::Field);
                    names.push(projected_names.get(field_cursor).cloned().unwrap_or_default());
                    field_cursor += 1;
                }
            }
        }
        plan = Box::new(ExpandImm::new(plan, items, names));
    }

    Ok(plan)
}

fn star_tables(
    qualifier: &Option<String>,
    from_table: &TableDef,
    join_tables: &[TableDef],
    table_alias: &Option<String>,
    joins: &[ast::Join],
) -> Vec<TableDef> {
    match qualifier {
        None => {
            let mut v = vec![from_table.clone()];
            v.extend(join_tables.iter().cloned());
            v
        }
        Some(q) => {
            if q == &from_table.name || table_alias.as_deref() == Some(q.as_str()) {
                vec![from_table.clone()]
            } else {
                joins
                    .iter()
                    .zip(join_tables.iter())
                    .filter(|(j, _)| &j.table == q || j.alias.as_deref() == Some(q.as_str()))
                    .map(|(_, t)| t.clone())
                    .collect()
            }
        }
    }
}

fn pick_source(engine: &SharedEngine, table: &TableDef, referenced: &[String]) -> Result<Box<dyn Operator>> {
    if referenced.is_empty() {
        return Ok(Box::new(TableScan::new(engine.clone(), table.clone())));
    }
    let best = {
        let eng = engine.borrow();
        let candidates = eng.catalog.indexes_for_table(&table.name);
        let mut best: Option<IndexDef> = None;
        for idx in candidates {
            let cols: HashSet<&str> = idx.columns.iter().map(|s| s.as_str()).collect();
            if referenced.iter().all(|f| cols.contains(f.as_str())) {
                let better = best.as_ref().map(|b| idx.columns.len() < b.columns.len()).unwrap_or(true);
                if better {
                    best = Some(idx.clone());
                }
            }
        }
        best
    };
    match best {
        Some(index) => Ok(Box::new(IndexScan::new(engine.clone(), index, table)?)),
        None => Ok(Box::new(TableScan::new(engine.clone(), table.clone()))),
    }
}

// ---------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------

fn literal_value(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Imm(text) => Ok(Value::untyped(text.clone())),
        other => Err(EngineError::Syntax(format!("INSERT values must be literals, found {:?}", other))),
    }
}

fn plan_insert(node: InsertNode, engine: &SharedEngine) -> Result<Box<dyn Operator>> {
    let table = engine.borrow().catalog.table(&node.table)?.clone();
    let mut rows = Vec::with_capacity(node.values.len());

    for tuple in &node.values {
        let row = if node.columns.is_empty() {
            if tuple.len() != table.columns.len() {
                return Err(EngineError::Syntax(format!(
                    "expected {} values for table '{}', found {}",
                    table.columns.len(),
                    table.name,
                    tuple.len()
                )));
            }
            tuple
                .iter()
                .zip(&table.columns)
                .map(|(e, col)| literal_value(e)?.coerce(col.ty))
                .collect::<Result<Vec<_>>>()?
        } else {
            if node.columns.len() != tuple.len() {
                return Err(EngineError::Syntax("column list and VALUES tuple length mismatch".into()));
            }
            let mut row: Vec<Option<Value>> = vec![None; table.columns.len()];
            for (col_name, e) in node.columns.iter().zip(tuple.iter()) {
                let idx = table
                    .columns
                    .iter()
                    .position(|c| c.unqualified_name() == col_name || &c.name == col_name)
                    .ok_or_else(|| EngineError::ColumnNotFound(col_name.clone()))?;
                row[idx] = Some(literal_value(e)?.coerce(table.columns[idx].ty)?);
            }
            row.into_iter()
                .enumerate()
                .map(|(i, v)| v.ok_or_else(|| EngineError::Syntax(format!("missing value for column '{}'", table.columns[i].name))))
                .collect::<Result<Vec<_>>>()?
        };
        rows.push(row);
    }

    Ok(Box::new(InsertOp::new(engine.clone(), table.name, rows)))
}

// ---------------------------------------------------------------------
// UPDATE / DELETE
// ---------------------------------------------------------------------

fn plan_update(mut node: UpdateNode, engine: &SharedEngine) -> Result<Box<dyn Operator>> {
    let table = engine.borrow().catalog.table(&node.table)?.clone();
    node.where_clause = node.where_clause.map(|e| qualify_expr(&e, &table.name));

    let mut source: Box<dyn Operator> = Box::new(TableScan::new(engine.clone(), table.clone()));
    if let Some(w) = node.where_clause {
        source = Box::new(Filter::new(source, w));
    }

    let sets = node
        .assignments
        .into_iter()
        .map(|a| SetClause { column: qualify_name(&a.column, &table.name), value: qualify_expr(&a.value, &table.name) })
        .collect();

    Ok(Box::new(UpdateOp::new(engine.clone(), table, source, sets)))
}

fn plan_delete(mut node: DeleteNode, engine: &SharedEngine) -> Result<Box<dyn Operator>> {
    let table = engine.borrow().catalog.table(&node.table)?.clone();
    node.where_clause = node.where_clause.map(|e| qualify_expr(&e, &table.name));

    let mut referenced = Vec::new();
    if let Some(w) = &node.where_clause {
        collect_ids(w, &mut referenced);
    }

    let mut source = pick_source(engine, &table, &referenced)?;
    if let Some(w) = node.where_clause {
        source = Box::new(Filter::new(source, w));
    }

    Ok(Box::new(DeleteOp::new(engine.clone(), table.name, source)))
}

// ---------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------

fn plan_create_table(node: CreateTableNode, engine: &SharedEngine) -> Result<Box<dyn Operator>> {
    let columns = node
        .columns
        .into_iter()
        .map(|c| Column::new(format!("{}.{}", node.table, c.name), c.ty, c.len))
        .collect();
    let table = TableDef { name: node.table, columns };
    Ok(Box::new(CreateTableOp::new(engine.clone(), table)))
}

fn plan_create_index(node: CreateIndexNode, engine: &SharedEngine) -> Result<Box<dyn Operator>> {
    let table = engine.borrow().catalog.table(&node.table)?.clone();
    let columns: Vec<String> = node.columns.iter().map(|c| qualify_name(c, &table.name)).collect();
    for col_name in &columns {
        let col = table.column(col_name).ok_or_else(|| EngineError::ColumnNotFound(col_name.clone()))?;
        if col.ty == ColumnType::Text {
            return Err(EngineError::InvariantViolation(format!(
                "cannot index Text column '{}': indexes require fixed-width columns",
                col_name
            )));
        }
    }
    let index = IndexDef { name: node.index, table_name: node.table, columns };
    Ok(Box::new(CreateIndexOp::new(engine.clone(), index)))
}
