//! Pull-based (volcano) physical operator tree.
//!
//! Every operator implements the same small capability set —
//! `open`/`next`/`reset`/`close`/`columns` — so the planner can stack them
//! without knowing which concrete kind it's holding. The operator set is
//! closed and fixed, so a plain trait object (`Box<dyn Operator>`) is used
//! rather than a tagged enum; the dispatch cost is dwarfed by the file I/O
//! underneath every scan.
//!
//! `next` must return `None` forever once it has returned `None` once. DML
//! and DDL operators ("once" operators) instead emit exactly one
//! `[affected_rows]` row on their first `next`, then `None`, and do not
//! support `reset`.

use std::cmp::Ordering;

use ahash::AHashMap;

use crate::ast::{Expr, OrderDir};
use crate::btree::Entry as BTreeEntry;
use crate::catalog::{Column, ColumnType, IndexDef, TableDef};
use crate::codec;
use crate::engine::SharedEngine;
use crate::error::{EngineError, Result};
use crate::expr::{self, Tuple};
use crate::value::Value;

pub trait Operator {
    fn open(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<Tuple>>;
    fn reset(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn columns(&self) -> Vec<Column>;
}

fn offset_column(table: &str) -> Column {
    Column::new(format!("{}.offset", table), ColumnType::Int, 8)
}

// ---------------------------------------------------------------------
// TableScan
// ---------------------------------------------------------------------

pub struct TableScan {
    engine: SharedEngine,
    table: TableDef,
    rows: Vec<(u64, Vec<Value>)>,
    pos: usize,
}

impl TableScan {
    pub fn new(engine: SharedEngine, table: TableDef) -> Self {
        TableScan { engine, table, rows: Vec::new(), pos: 0 }
    }
}

impl Operator for TableScan {
    fn open(&mut self) -> Result<()> {
        let mut eng = self.engine.borrow_mut();
        self.rows = eng.storage.scan_table(&self.table)?;
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some((offset, values)) = self.rows.get(self.pos) else { return Ok(None) };
        self.pos += 1;
        let mut cols: Vec<String> = self.table.columns.iter().map(|c| c.name.clone()).collect();
        let mut vals = values.clone();
        cols.push(format!("{}.offset", self.table.name));
        vals.push(Value::int(*offset as i64));
        Ok(Some(Tuple::new(cols, vals)))
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn columns(&self) -> Vec<Column> {
        let mut cols = self.table.columns.clone();
        cols.push(offset_column(&self.table.name));
        cols
    }
}

// ---------------------------------------------------------------------
// IndexScan
// ---------------------------------------------------------------------

pub struct IndexScan {
    engine: SharedEngine,
    index: IndexDef,
    key_columns: Vec<Column>,
    entries: Vec<BTreeEntry>,
    pos: usize,
}

impl IndexScan {
    pub fn new(engine: SharedEngine, index: IndexDef, table: &TableDef) -> Result<Self> {
        let key_columns = index
            .columns
            .iter()
            .map(|name| table.column(name).cloned().ok_or_else(|| EngineError::ColumnNotFound(name.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(IndexScan { engine, index, key_columns, entries: Vec::new(), pos: 0 })
    }
}

impl Operator for IndexScan {
    fn open(&mut self) -> Result<()> {
        let mut eng = self.engine.borrow_mut();
        let tree = eng.storage.index_mut(&self.index.name)?;
        self.entries = tree.range(None)?;
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(entry) = self.entries.get(self.pos) else { return Ok(None) };
        self.pos += 1;
        let mut cols: Vec<String> = self.index.columns.clone();
        let mut vals = Vec::with_capacity(self.key_columns.len());
        let mut pos = 0;
        for col in &self.key_columns {
            let len = col.len as usize;
            let field = &entry.key[pos..pos + len];
            let value = match col.ty {
                ColumnType::Int => Value::int(codec::bytes_to_int64(field)),
                ColumnType::Float => Value::float(codec::bytes_to_float64(field)),
                ColumnType::Bool => Value::bool(field[0] != 0),
                ColumnType::FixedStr => Value::str(codec::bytes_to_str(field)),
                ColumnType::Text => {
                    return Err(EngineError::InvariantViolation("Text columns cannot be indexed".into()))
                }
            };
            vals.push(value);
            pos += len;
        }
        cols.push(format!("{}.offset", self.index.table_name));
        vals.push(Value::int(entry.value as i64));
        Ok(Some(Tuple::new(cols, vals)))
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn columns(&self) -> Vec<Column> {
        let mut cols = self.key_columns.clone();
        cols.push(offset_column(&self.index.table_name));
        cols
    }
}

// ---------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------

pub struct Filter {
    input: Box<dyn Operator>,
    predicate: Expr,
}

impl Filter {
    pub fn new(input: Box<dyn Operator>, predicate: Expr) -> Self {
        Filter { input, predicate }
    }
}

impl Operator for Filter {
    fn open(&mut self) -> Result<()> {
        self.input.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.input.next()? {
            if expr::eval(&self.predicate, &tuple)?.as_bool()? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.input.columns()
    }
}

// ---------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------

pub struct ProjectField {
    pub source: String,
    pub output: String,
}

pub struct Projection {
    input: Box<dyn Operator>,
    fields: Vec<ProjectField>,
    resolved: Vec<usize>,
    out_columns: Vec<Column>,
}

impl Projection {
    pub fn new(input: Box<dyn Operator>, fields: Vec<ProjectField>) -> Self {
        Projection { input, fields, resolved: Vec::new(), out_columns: Vec::new() }
    }
}

impl Operator for Projection {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        let cols = self.input.columns();
        self.resolved.clear();
        self.out_columns.clear();
        for field in &self.fields {
            let idx = cols
                .iter()
                .position(|c| c.name == field.source || c.unqualified_name() == field.source)
                .ok_or_else(|| EngineError::ColumnNotFound(field.source.clone()))?;
            self.resolved.push(idx);
            let mut col = cols[idx].clone();
            col.name = field.output.clone();
            self.out_columns.push(col);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(tuple) = self.input.next()? else { return Ok(None) };
        let cols: Vec<String> = self.fields.iter().map(|f| f.output.clone()).collect();
        let vals: Vec<Value> = self.resolved.iter().map(|&i| tuple.values[i].clone()).collect();
        Ok(Some(Tuple::new(cols, vals)))
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.out_columns.clone()
    }
}

// ---------------------------------------------------------------------
// Distinct
// ---------------------------------------------------------------------

fn composite_key(values: &[Value]) -> String {
    values.iter().map(Value::to_display_string).collect::<Vec<_>>().join("\u{1}")
}

pub struct Distinct {
    input: Box<dyn Operator>,
    field_names: Vec<String>,
    field_idx: Vec<usize>,
    seen: ahash::AHashSet<String>,
}

impl Distinct {
    pub fn new(input: Box<dyn Operator>, field_names: Vec<String>) -> Self {
        Distinct { input, field_names, field_idx: Vec::new(), seen: ahash::AHashSet::new() }
    }
}

impl Operator for Distinct {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        self.seen.clear();
        let cols = self.input.columns();
        self.field_idx = if self.field_names.is_empty() {
            (0..cols.len()).collect()
        } else {
            self.field_names
                .iter()
                .map(|name| {
                    cols.iter()
                        .position(|c| &c.name == name)
                        .ok_or_else(|| EngineError::ColumnNotFound(name.clone()))
                })
                .collect::<Result<Vec<_>>>()?
        };
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.input.next()? {
            let key_vals: Vec<Value> = self.field_idx.iter().map(|&i| tuple.values[i].clone()).collect();
            let key = composite_key(&key_vals);
            if self.seen.insert(key) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.seen.clear();
        self.input.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.input.columns()
    }
}

// ---------------------------------------------------------------------
// Group / aggregate
// ---------------------------------------------------------------------

pub struct AggregateCall {
    pub func_name: String,
    pub input_col: String,
    pub output_col: String,
}

pub struct Group {
    input: Box<dyn Operator>,
    group_cols: Vec<String>,
    aggregates: Vec<AggregateCall>,
    out_rows: Vec<Tuple>,
    out_columns: Vec<Column>,
    pos: usize,
}

impl Group {
    pub fn new(input: Box<dyn Operator>, group_cols: Vec<String>, aggregates: Vec<AggregateCall>) -> Self {
        Group { input, group_cols, aggregates, out_rows: Vec::new(), out_columns: Vec::new(), pos: 0 }
    }
}

impl Operator for Group {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        let in_cols = self.input.columns();
        let group_idx: Vec<usize> = self
            .group_cols
            .iter()
            .map(|name| {
                in_cols
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| EngineError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<_>>()?;
        let agg_idx: Vec<usize> = self
            .aggregates
            .iter()
            .map(|a| {
                in_cols
                    .iter()
                    .position(|c| &c.name == a.input_col)
                    .ok_or_else(|| EngineError::ColumnNotFound(a.input_col.clone()))
            })
            .collect::<Result<_>>()?;

        let mut out_columns: Vec<Column> = group_idx.iter().map(|&i| in_cols[i].clone()).collect();
        for (agg, &idx) in self.aggregates.iter().zip(agg_idx.iter()) {
            let func = crate::catalog::get_function(&agg.func_name)?;
            let mut col = (func.ret_type)(std::slice::from_ref(&in_cols[idx]));
            col.name = agg.output_col.clone();
            out_columns.push(col);
        }
        self.out_columns = out_columns;

        let mut order: Vec<String> = Vec::new();
        let mut buckets: AHashMap<String, Vec<Tuple>> = AHashMap::new();
        while let Some(tuple) = self.input.next()? {
            let key_vals: Vec<Value> = group_idx.iter().map(|&i| tuple.values[i].clone()).collect();
            let key = composite_key(&key_vals);
            if !buckets.contains_key(&key) {
                order.push(key.clone());
            }
            buckets.entry(key).or_default().push(tuple);
        }

        self.out_rows.clear();
        for key in &order {
            let bucket = &buckets[key];
            let first = &bucket[0];
            let mut cols: Vec<String> = self.group_cols.clone();
            let mut vals: Vec<Value> = group_idx.iter().map(|&i| first.values[i].clone()).collect();
            for (agg, &idx) in self.aggregates.iter().zip(agg_idx.iter()) {
                let func = crate::catalog::get_function(&agg.func_name)?;
                let params: Vec<Value> = bucket.iter().map(|t| t.values[idx].clone()).collect();
                let result = (func.call)(&params)?;
                cols.push(agg.output_col.clone());
                vals.push(result);
            }
            self.out_rows.push(Tuple::new(cols, vals));
        }
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(row) = self.out_rows.get(self.pos) else { return Ok(None) };
        self.pos += 1;
        Ok(Some(row.clone()))
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.out_columns.clone()
    }
}

// ---------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------

pub struct SortKey {
    pub expr: Expr,
    pub dir: OrderDir,
}

pub struct Sort {
    input: Box<dyn Operator>,
    orders: Vec<SortKey>,
    out_rows: Vec<Tuple>,
    pos: usize,
}

impl Sort {
    pub fn new(input: Box<dyn Operator>, orders: Vec<SortKey>) -> Self {
        Sort { input, orders, out_rows: Vec::new(), pos: 0 }
    }
}

impl Operator for Sort {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        let mut rows = Vec::new();
        while let Some(t) = self.input.next()? {
            rows.push(t);
        }
        let mut err = None;
        rows.sort_by(|a, b| {
            for key in &self.orders {
                let (va, vb) = match (expr::eval(&key.expr, a), expr::eval(&key.expr, b)) {
                    (Ok(va), Ok(vb)) => (va, vb),
                    (Err(e), _) | (_, Err(e)) => {
                        err.get_or_insert(e);
                        return Ordering::Equal;
                    }
                };
                let ord = match va.compare(&vb) {
                    Ok(o) => o,
                    Err(e) => {
                        err.get_or_insert(e);
                        Ordering::Equal
                    }
                };
                let ord = if key.dir == OrderDir::Desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        if let Some(e) = err {
            return Err(e);
        }
        self.out_rows = rows;
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(row) = self.out_rows.get(self.pos) else { return Ok(None) };
        self.pos += 1;
        Ok(Some(row.clone()))
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.input.columns()
    }
}

// ---------------------------------------------------------------------
// Limit
// ---------------------------------------------------------------------

pub struct Limit {
    input: Box<dyn Operator>,
    limit: u64,
    offset: u64,
    emitted: u64,
}

impl Limit {
    pub fn new(input: Box<dyn Operator>, limit: u64, offset: u64) -> Self {
        Limit { input, limit, offset, emitted: 0 }
    }

    fn skip_offset(&mut self) -> Result<()> {
        for _ in 0..self.offset {
            if self.input.next()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

impl Operator for Limit {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        self.emitted = 0;
        self.skip_offset()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        let next = self.input.next()?;
        if next.is_some() {
            self.emitted += 1;
        }
        Ok(next)
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.emitted = 0;
        self.skip_offset()
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.input.columns()
    }
}

// ---------------------------------------------------------------------
// Join (nested loop)
// ---------------------------------------------------------------------

pub struct Join {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    predicate: Expr,
    current_left: Option<Tuple>,
    columns: Vec<Column>,
}

impl Join {
    pub fn new(left: Box<dyn Operator>, right: Box<dyn Operator>, predicate: Expr) -> Self {
        let mut columns = left.columns();
        columns.extend(right.columns());
        Join { left, right, predicate, current_left: None, columns }
    }
}

impl Operator for Join {
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.right.open()?;
        self.current_left = self.left.next()?;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            let Some(left_row) = &self.current_left else { return Ok(None) };
            match self.right.next()? {
                Some(right_row) => {
                    let combined = left_row.extend(right_row.columns.clone(), right_row.values.clone());
                    if expr::eval(&self.predicate, &combined)?.as_bool()? {
                        return Ok(Some(combined));
                    }
                }
                None => {
                    self.right.reset()?;
                    self.current_left = self.left.next()?;
                    if self.current_left.is_none() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.current_left = self.left.next()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.left.close()?;
        self.right.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.columns.clone()
    }
}

// ---------------------------------------------------------------------
// ExpandImm — re-inserts SELECT-list literals at their original position
// ---------------------------------------------------------------------

pub enum OutputItem {
    Field,
    Const(Value),
}

pub struct ExpandImm {
    input: Box<dyn Operator>,
    items: Vec<OutputItem>,
    names: Vec<String>,
}

impl ExpandImm {
    pub fn new(input: Box<dyn Operator>, items: Vec<OutputItem>, names: Vec<String>) -> Self {
        ExpandImm { input, items, names }
    }
}

impl Operator for ExpandImm {
    fn open(&mut self) -> Result<()> {
        self.input.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(tuple) = self.input.next()? else { return Ok(None) };
        let mut field_iter = tuple.values.into_iter();
        let mut values = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match item {
                OutputItem::Field => values.push(field_iter.next().ok_or_else(|| {
                    EngineError::InvariantViolation("ExpandImm ran out of projected fields".into())
                })?),
                OutputItem::Const(v) => values.push(v.clone()),
            }
        }
        Ok(Some(Tuple::new(self.names.clone(), values)))
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.names.iter().map(|n| Column::new(n.clone(), ColumnType::FixedStr, 255)).collect()
    }
}

// ---------------------------------------------------------------------
// FuncApply — evaluates non-aggregate function calls into named columns,
// ahead of Projection since Projection only ever selects existing columns
// by name.
// ---------------------------------------------------------------------

pub struct FuncApply {
    input: Box<dyn Operator>,
    funcs: Vec<(String, Expr)>,
    out_columns: Vec<Column>,
}

impl FuncApply {
    pub fn new(input: Box<dyn Operator>, funcs: Vec<(String, Expr)>) -> Self {
        FuncApply { input, funcs, out_columns: Vec::new() }
    }
}

impl Operator for FuncApply {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        let in_cols = self.input.columns();
        let mut out_columns = in_cols.clone();
        for (name, expr) in &self.funcs {
            let ret = match expr {
                Expr::Func { name: func_name, args } => {
                    let func = crate::catalog::get_function(func_name)?;
                    let arg_cols: Vec<Column> = args
                        .iter()
                        .map(|a| match a {
                            Expr::Id(n) => in_cols
                                .iter()
                                .find(|c| &c.name == n)
                                .cloned()
                                .ok_or_else(|| EngineError::ColumnNotFound(n.clone())),
                            _ => Err(EngineError::Syntax("function arguments must be columns".into())),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    (func.ret_type)(&arg_cols)
                }
                _ => Column::new(name.clone(), ColumnType::Int, 8),
            };
            let mut col = ret;
            col.name = name.clone();
            out_columns.push(col);
        }
        self.out_columns = out_columns;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(tuple) = self.input.next()? else { return Ok(None) };
        let mut cols = tuple.columns.clone();
        let mut vals = tuple.values.clone();
        for (name, expr) in &self.funcs {
            vals.push(expr::eval(expr, &tuple)?);
            cols.push(name.clone());
        }
        Ok(Some(Tuple::new(cols, vals)))
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        self.out_columns.clone()
    }
}

// ---------------------------------------------------------------------
// DML / DDL "once" operators
// ---------------------------------------------------------------------

fn affected_row(n: i64) -> Tuple {
    Tuple::new(vec!["affected".to_string()], vec![Value::int(n)])
}

pub struct InsertOp {
    engine: SharedEngine,
    table: String,
    rows: Vec<Vec<Value>>,
    done: bool,
}

impl InsertOp {
    pub fn new(engine: SharedEngine, table: String, rows: Vec<Vec<Value>>) -> Self {
        InsertOp { engine, table, rows, done: false }
    }
}

impl Operator for InsertOp {
    fn open(&mut self) -> Result<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut eng = self.engine.borrow_mut();
        for row in &self.rows {
            eng.do_insert(&self.table, row.clone())?;
        }
        Ok(Some(affected_row(self.rows.len() as i64)))
    }

    fn reset(&mut self) -> Result<()> {
        Err(EngineError::InvariantViolation("once operators cannot be reset".into()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn columns(&self) -> Vec<Column> {
        vec![Column::new("affected", ColumnType::Int, 8)]
    }
}

pub struct SetClause {
    pub column: String,
    pub value: Expr,
}

pub struct UpdateOp {
    engine: SharedEngine,
    table: TableDef,
    input: Box<dyn Operator>,
    sets: Vec<SetClause>,
    done: bool,
}

impl UpdateOp {
    pub fn new(engine: SharedEngine, table: TableDef, input: Box<dyn Operator>, sets: Vec<SetClause>) -> Self {
        UpdateOp { engine, table, input, sets, done: false }
    }
}

impl Operator for UpdateOp {
    fn open(&mut self) -> Result<()> {
        self.done = false;
        self.input.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut affected = 0i64;
        while let Some(tuple) = self.input.next()? {
            let offset_idx = tuple.values.len() - 1;
            let offset = tuple.values[offset_idx].as_int()? as u64;
            // Every SET's right-hand side is evaluated against the
            // pre-update row snapshot (`tuple`), never against values an
            // earlier assignment in this same list just computed.
            let mut new_values: Vec<Value> = tuple.values[..offset_idx].to_vec();
            for set in &self.sets {
                let col_idx = self
                    .table
                    .columns
                    .iter()
                    .position(|c| c.name == set.column || c.unqualified_name() == set.column)
                    .ok_or_else(|| EngineError::ColumnNotFound(set.column.clone()))?;
                new_values[col_idx] = expr::eval(&set.value, &tuple)?;
            }
            let mut eng = self.engine.borrow_mut();
            eng.do_delete(&self.table.name, offset)?;
            eng.do_insert(&self.table.name, new_values)?;
            affected += 1;
        }
        Ok(Some(affected_row(affected)))
    }

    fn reset(&mut self) -> Result<()> {
        Err(EngineError::InvariantViolation("once operators cannot be reset".into()))
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        vec![Column::new("affected", ColumnType::Int, 8)]
    }
}

pub struct DeleteOp {
    engine: SharedEngine,
    table: String,
    input: Box<dyn Operator>,
    done: bool,
}

impl DeleteOp {
    pub fn new(engine: SharedEngine, table: String, input: Box<dyn Operator>) -> Self {
        DeleteOp { engine, table, input, done: false }
    }
}

impl Operator for DeleteOp {
    fn open(&mut self) -> Result<()> {
        self.done = false;
        self.input.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut affected = 0i64;
        while let Some(tuple) = self.input.next()? {
            let offset = tuple.values.last().ok_or_else(|| {
                EngineError::InvariantViolation("delete input row carries no offset trailer".into())
            })?;
            let offset = offset.as_int()? as u64;
            self.engine.borrow_mut().do_delete(&self.table, offset)?;
            affected += 1;
        }
        Ok(Some(affected_row(affected)))
    }

    fn reset(&mut self) -> Result<()> {
        Err(EngineError::InvariantViolation("once operators cannot be reset".into()))
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }

    fn columns(&self) -> Vec<Column> {
        vec![Column::new("affected", ColumnType::Int, 8)]
    }
}

pub struct CreateTableOp {
    engine: SharedEngine,
    table: TableDef,
    done: bool,
}

impl CreateTableOp {
    pub fn new(engine: SharedEngine, table: TableDef) -> Self {
        CreateTableOp { engine, table, done: false }
    }
}

impl Operator for CreateTableOp {
    fn open(&mut self) -> Result<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        self.engine.borrow_mut().create_table(self.table.clone())?;
        Ok(Some(affected_row(0)))
    }

    fn reset(&mut self) -> Result<()> {
        Err(EngineError::InvariantViolation("once operators cannot be reset".into()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn columns(&self) -> Vec<Column> {
        vec![Column::new("affected", ColumnType::Int, 8)]
    }
}

pub struct CreateIndexOp {
    engine: SharedEngine,
    index: IndexDef,
    done: bool,
}

impl CreateIndexOp {
    pub fn new(engine: SharedEngine, index: IndexDef) -> Self {
        CreateIndexOp { engine, index, done: false }
    }
}

impl Operator for CreateIndexOp {
    fn open(&mut self) -> Result<()> {
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let count = self.engine.borrow_mut().create_index(self.index.clone())?;
        Ok(Some(affected_row(count as i64)))
    }

    fn reset(&mut self) -> Result<()> {
        Err(EngineError::InvariantViolation("once operators cannot be reset".into()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn columns(&self) -> Vec<Column> {
        vec![Column::new("affected", ColumnType::Int, 8)]
    }
}
