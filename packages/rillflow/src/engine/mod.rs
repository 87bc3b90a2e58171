//! Engine facade: catalog, circuit and views behind a push/read API.
//!
//! `execute` registers tables and compiles views; `apply`/`push` run
//! exactly one circuit step per call and hand every affected view its
//! delta; `materialize` reads the running sum. One engine is one
//! single-threaded circuit; callers who want parallelism run several
//! engines.

pub mod circuit;
pub mod eval;
pub mod operators;
pub mod source;
pub mod types;
pub mod update;

use crate::error::{Error, Result};
use crate::sql::{self, ast};
use circuit::Circuit;
use eval::{eval as eval_expr, ScalarExpr};
use indexmap::IndexMap;
use smol_str::SmolStr;
use source::{SourceBatch, TableCommit, TableDef, TableState};
use std::sync::Arc;
use tracing::debug;
use types::{ColumnDef, FastMap, Row, Schema, Value, Weight, ZSet};
use update::{result_digest, sorted_delta, ViewUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Full retraction support with a materialized result store.
    Full,
    /// Accepted for compatibility; behaves as `Full` (the external
    /// result-store variant is out of scope).
    FullIndexed,
    /// No retractions ever; joins skip the result store entirely.
    AppendOnly,
}

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub join_mode: JoinMode,
    pub max_results: usize,
    pub max_rows: Option<usize>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        ViewOptions {
            join_mode: JoinMode::Full,
            max_results: operators::join::DEFAULT_MAX_RESULTS,
            max_rows: None,
        }
    }
}

type Subscriber = Box<dyn FnMut(&ViewUpdate)>;

struct ViewState {
    schema: Arc<Schema>,
    order_by: Vec<(ScalarExpr, bool)>,
    tables: Vec<SmolStr>,
    options: ViewOptions,
    materialized: ZSet,
    overflow: bool,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
pub struct Engine {
    tables: IndexMap<SmolStr, TableState>,
    views: IndexMap<SmolStr, ViewState>,
    circuit: Circuit,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    /// Run a script of CREATE TABLE / CREATE VIEW statements.
    pub fn execute(&mut self, script: &str) -> Result<()> {
        for statement in sql::parse_script(script)? {
            match statement {
                ast::Statement::CreateTable(t) => self.create_table(t)?,
                ast::Statement::CreateView(v) => self.create_view(v)?,
            }
        }
        Ok(())
    }

    fn create_table(&mut self, stmt: ast::CreateTable) -> Result<()> {
        if self.tables.contains_key(&stmt.name) {
            return Err(Error::unsupported(format!(
                "table {:?} already defined",
                stmt.name
            )));
        }
        let columns: Vec<ColumnDef> = stmt
            .columns
            .iter()
            .map(|c| ColumnDef::new(c.name.clone(), c.ty))
            .collect();
        let schema = Schema::new(columns);

        let mut key: Vec<usize> = stmt
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        for name in &stmt.primary_key {
            let idx = schema.resolve(None, name).map_err(|_| {
                Error::unsupported(format!(
                    "PRIMARY KEY references unknown column {:?}",
                    name
                ))
            })?;
            if !key.contains(&idx) {
                key.push(idx);
            }
        }
        if key.is_empty() {
            return Err(Error::unsupported(format!(
                "table {:?} requires a primary key",
                stmt.name
            )));
        }

        let mut max_rows = None;
        for (opt, value) in &stmt.options {
            match (opt.as_str(), value) {
                ("max_rows", ast::OptionValue::Number(n)) if *n > 0 => {
                    max_rows = Some(*n as usize);
                }
                other => {
                    return Err(Error::unsupported(format!(
                        "unknown table option {:?}",
                        other.0
                    )))
                }
            }
        }

        debug!(table = %stmt.name, columns = schema.len(), "registering table");
        self.circuit.declare_source(stmt.name.clone());
        self.tables.insert(
            stmt.name.clone(),
            TableState::new(TableDef {
                name: stmt.name,
                schema: Arc::new(schema),
                key,
                max_rows,
            }),
        );
        Ok(())
    }

    fn view_options(options: &[(SmolStr, ast::OptionValue)]) -> Result<ViewOptions> {
        let mut out = ViewOptions::default();
        for (opt, value) in options {
            match (opt.as_str(), value) {
                ("join_mode", mode) => {
                    let text = match mode {
                        ast::OptionValue::Ident(i) => i.as_str().to_string(),
                        ast::OptionValue::Text(t) => t.clone(),
                        ast::OptionValue::Number(_) => {
                            return Err(Error::unsupported("join_mode must be a name"))
                        }
                    };
                    out.join_mode = match text.as_str() {
                        "full" => JoinMode::Full,
                        "full-indexed" => JoinMode::FullIndexed,
                        "append-only" => JoinMode::AppendOnly,
                        other => {
                            return Err(Error::unsupported(format!(
                                "unknown join_mode {:?}",
                                other
                            )))
                        }
                    };
                }
                ("max_results", ast::OptionValue::Number(n)) if *n > 0 => {
                    out.max_results = *n as usize;
                }
                ("max_rows", ast::OptionValue::Number(n)) if *n > 0 => {
                    out.max_rows = Some(*n as usize);
                }
                other => {
                    return Err(Error::unsupported(format!(
                        "unknown view option {:?}",
                        other.0
                    )))
                }
            }
        }
        Ok(out)
    }

    fn create_view(&mut self, stmt: ast::CreateView) -> Result<()> {
        if self.views.contains_key(&stmt.name) {
            return Err(Error::unsupported(format!(
                "view {:?} already defined",
                stmt.name
            )));
        }
        let options = Self::view_options(&stmt.options)?;

        let tables = &self.tables;
        let catalog = |name: &str| tables.get(name).map(|t| t.def.schema.clone());
        let plan = sql::plan_view(&stmt.query, &catalog)?;

        sql::emitter::emit_view(&mut self.circuit, &stmt.name, &plan, &options)?;
        self.circuit.build()?;

        // Backfill: replay the current table snapshots through the new
        // view's subgraph only.
        let mut materialized = ZSet::new();
        let has_data = plan
            .tables
            .iter()
            .any(|t| self.tables.get(t).map(|s| s.row_count() > 0).unwrap_or(false));
        if has_data {
            let mut inputs: FastMap<SmolStr, ZSet> = FastMap::default();
            for table in &plan.tables {
                if let Some(state) = self.tables.get(table) {
                    inputs.insert(table.clone(), state.snapshot());
                }
            }
            let mut outputs = self.circuit.step(&inputs, Some(stmt.name.as_str()))?;
            if let Some(delta) = outputs.remove(stmt.name.as_str()) {
                materialized = delta;
            }
        }

        debug!(view = %stmt.name, tables = ?plan.tables, "view registered");
        self.views.insert(
            stmt.name,
            ViewState {
                schema: plan.schema,
                order_by: plan.order_by,
                tables: plan.tables,
                options,
                materialized,
                overflow: false,
                subscribers: Vec::new(),
            },
        );
        Ok(())
    }

    /// Apply one or more source batches as a single atomic circuit step.
    /// Either every state change commits, or none do.
    pub fn apply(&mut self, batches: Vec<(&str, SourceBatch)>) -> Result<Vec<ViewUpdate>> {
        let mut merged: IndexMap<SmolStr, SourceBatch> = IndexMap::new();
        for (table, batch) in batches {
            merged
                .entry(SmolStr::new(table))
                .or_default()
                .merge(batch);
        }

        let mut inputs: FastMap<SmolStr, ZSet> = FastMap::default();
        let mut commits: Vec<(SmolStr, TableCommit)> = Vec::new();
        for (table, batch) in &merged {
            let state = self
                .tables
                .get(table)
                .ok_or_else(|| Error::schema(format!("unknown table {:?}", table)))?;
            let (delta, commit) = state.batch_to_delta(batch)?;
            inputs.insert(table.clone(), delta);
            commits.push((table.clone(), commit));
        }

        let outputs = self.circuit.step(&inputs, None)?;

        for (table, commit) in commits {
            if let Some(state) = self.tables.get_mut(&table) {
                state.commit(commit);
            }
        }

        let mut table_overflow: FastMap<SmolStr, bool> = FastMap::default();
        for (name, state) in &self.tables {
            table_overflow.insert(name.clone(), state.overflow());
        }

        let mut updates = Vec::new();
        for (name, view) in self.views.iter_mut() {
            let delta = match outputs.get(name) {
                Some(d) if !d.is_empty() => d,
                _ => continue,
            };
            view.materialized.add_assign(delta);
            if let Some(cap) = view.options.max_rows {
                if view.materialized.len() > cap {
                    view.overflow = true;
                }
            }
            let overflow = view.overflow
                || self.circuit.view_overflowed(name)
                || view
                    .tables
                    .iter()
                    .any(|t| table_overflow.get(t).copied().unwrap_or(false));
            view.overflow = overflow;

            let update = ViewUpdate {
                view: name.clone(),
                schema: view.schema.clone(),
                delta: sorted_delta(delta),
                result_hash: result_digest(&view.materialized),
                overflow,
            };
            for subscriber in view.subscribers.iter_mut() {
                subscriber(&update);
            }
            updates.push(update);
        }
        Ok(updates)
    }

    /// Convenience wrapper: one batch for one table.
    pub fn push(&mut self, table: &str, batch: SourceBatch) -> Result<Vec<ViewUpdate>> {
        self.apply(vec![(table, batch)])
    }

    /// Register a synchronous per-step callback for a view.
    pub fn subscribe(
        &mut self,
        view: &str,
        callback: impl FnMut(&ViewUpdate) + 'static,
    ) -> Result<()> {
        let state = self
            .views
            .get_mut(view)
            .ok_or_else(|| Error::unsupported(format!("unknown view {:?}", view)))?;
        state.subscribers.push(Box::new(callback));
        Ok(())
    }

    /// The running materialization, sorted per the view's ORDER BY
    /// (rows without an explicit order sort by value).
    pub fn materialize(&self, view: &str) -> Result<Vec<(Row, Weight)>> {
        let state = self
            .views
            .get(view)
            .ok_or_else(|| Error::unsupported(format!("unknown view {:?}", view)))?;
        let mut rows: Vec<(Vec<Value>, Row, Weight)> = state
            .materialized
            .entries()
            .map(|(row, w)| {
                let keys = state
                    .order_by
                    .iter()
                    .map(|(e, _)| eval_expr(e, row))
                    .collect();
                (keys, row.clone(), w)
            })
            .collect();
        operators::topk::sort_rows(&mut rows, &state.order_by);
        Ok(rows.into_iter().map(|(_, row, w)| (row, w)).collect())
    }

    pub fn materialize_json(&self, view: &str) -> Result<Vec<(serde_json::Value, Weight)>> {
        let schema = self.view_schema(view)?;
        Ok(self
            .materialize(view)?
            .into_iter()
            .map(|(row, w)| (row.to_json(&schema), w))
            .collect())
    }

    pub fn view_schema(&self, view: &str) -> Result<Arc<Schema>> {
        self.views
            .get(view)
            .map(|v| v.schema.clone())
            .ok_or_else(|| Error::unsupported(format!("unknown view {:?}", view)))
    }

    pub fn view_overflowed(&self, view: &str) -> Result<bool> {
        self.views
            .get(view)
            .map(|v| v.overflow)
            .ok_or_else(|| Error::unsupported(format!("unknown view {:?}", view)))
    }

    pub fn table_row_count(&self, table: &str) -> Result<usize> {
        self.tables
            .get(table)
            .map(|t| t.row_count())
            .ok_or_else(|| Error::schema(format!("unknown table {:?}", table)))
    }

    /// Drop the engine and every operator state it owns. Subscribers
    /// are detached silently.
    pub fn dispose(self) {}
}
