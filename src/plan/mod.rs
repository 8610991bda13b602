//! # Relational Query Plan
//!
//! Immutable plan nodes describing one relational step each. A node reads
//! from a [`Relation`] (a table, another node, a named CTE or a UNION ALL of
//! nodes), joins further relations, projects columns, filters, groups and
//! orders. Nodes are shared through `Arc`, so one node can feed several
//! downstream nodes; the renderer decides whether a shared node becomes a
//! `WITH` entry or is inlined as a nested subquery.
//!
//! ## Building a node
//!
//! ```rust,ignore
//! use cfsql::plan::{qcol, Relation, SelectQuery, TableRef};
//!
//! let events = Relation::table(TableRef::new("events"), vec!["user_id".into(), "item_id".into()]);
//! let node = SelectQuery::from(events, "_events")
//!     .select(qcol("_events", "user_id"))
//!     .finish()?;
//! ```
//!
//! `finish()` is the only fallible step: it resolves every column reference
//! against the sources of the node and rejects unknown columns, unresolved
//! source aliases and unqualified references once more than one source is
//! combined.

pub mod expr;
pub mod render;

pub use expr::{
    col, lit_float, lit_int, qcol, AggregateFunction, BinaryOp, ColumnRef, Expr, Function,
    Literal, OrderItem, SortDirection, SqlType, Window, WindowFunction,
};
pub use render::{CteStrategy, SqlRenderer};

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Structural plan errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Unknown column '{column}' in source '{source_alias}' (available: {available:?})")]
    UnknownColumn {
        column: String,
        source_alias: String,
        available: Vec<String>,
    },
    #[error("Column '{0}' must be qualified by a source alias when several sources are combined")]
    AmbiguousColumn(String),
    #[error("Unresolved source alias '{0}'")]
    UnresolvedAlias(String),
    #[error("Duplicate alias '{0}'")]
    DuplicateAlias(String),
    #[error("Expression selected without an alias in node reading '{0}'")]
    UnnamedExpression(String),
    #[error("Node reading '{0}' selects no columns")]
    EmptySelect(String),
    #[error("CTE '{0}' is defined twice with different bodies")]
    ConflictingCte(String),
    #[error("UNION ALL inputs disagree on columns: {0:?} vs {1:?}")]
    UnionMismatch(Vec<String>, Vec<String>),
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

pub type PlanResult<T> = Result<T, PlanError>;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|e| panic!("identifier regex: {e}"))
    })
}

/// Aliases and CTE names are generated by the pipelines and must stay plain
/// identifiers; user-supplied column names are quoted instead.
pub fn check_identifier(name: &str) -> PlanResult<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(PlanError::InvalidIdentifier(name.to_string()))
    }
}

/// Physical table reference (`[schema.]name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        TableRef {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableRef {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parse `schema.table` or `table`
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once('.') {
            Some((schema, name)) => TableRef::qualified(schema, name),
            None => TableRef::new(raw),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Named common table expression
#[derive(Debug, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: Arc<SelectQuery>,
}

/// Anything a node can read from
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    Table {
        table: TableRef,
        columns: Vec<String>,
    },
    Query(Arc<SelectQuery>),
    Cte(Arc<Cte>),
    UnionAll(Vec<Arc<SelectQuery>>),
}

impl Relation {
    pub fn table(table: TableRef, columns: Vec<String>) -> Self {
        Relation::Table { table, columns }
    }

    /// Name `query` as a common table expression. Rendered as a `WITH`
    /// entry when the dialect supports it, otherwise inlined at every use.
    pub fn with_cte(query: Arc<SelectQuery>, alias: &str) -> PlanResult<Relation> {
        check_identifier(alias)?;
        Ok(Relation::Cte(Arc::new(Cte {
            name: alias.to_string(),
            query,
        })))
    }

    pub fn union_all(inputs: Vec<Arc<SelectQuery>>) -> PlanResult<Relation> {
        if let Some((first, rest)) = inputs.split_first() {
            let expected = first.output_columns();
            for other in rest {
                let columns = other.output_columns();
                if columns != expected {
                    return Err(PlanError::UnionMismatch(expected, columns));
                }
            }
        }
        Ok(Relation::UnionAll(inputs))
    }

    /// Columns exposed by this relation, in order
    pub fn output_columns(&self) -> Vec<String> {
        match self {
            Relation::Table { columns, .. } => columns.clone(),
            Relation::Query(query) => query.output_columns(),
            Relation::Cte(cte) => cte.query.output_columns(),
            Relation::UnionAll(inputs) => inputs
                .first()
                .map(|q| q.output_columns())
                .unwrap_or_default(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Relation::Table { table, .. } => table.to_string(),
            Relation::Query(_) => "subquery".to_string(),
            Relation::Cte(cte) => cte.name.clone(),
            Relation::UnionAll(_) => "union".to_string(),
        }
    }
}

impl From<Arc<SelectQuery>> for Relation {
    fn from(query: Arc<SelectQuery>) -> Self {
        Relation::Query(query)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Full,
}

impl JoinKind {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
        }
    }
}

/// Source of a node together with its alias
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub relation: Relation,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    /// Conjunction of conditions
    pub on: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: String,
}

/// One SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub from: Source,
    pub joins: Vec<Join>,
    pub columns: Vec<SelectItem>,
    pub filters: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
}

impl SelectQuery {
    /// Start a node reading `relation` under `alias`
    pub fn from(relation: impl Into<Relation>, alias: &str) -> Self {
        SelectQuery {
            from: Source {
                relation: relation.into(),
                alias: alias.to_string(),
            },
            joins: Vec::new(),
            columns: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    /// Select an expression under its implied name (column or cast column)
    pub fn select(mut self, expr: Expr) -> Self {
        let alias = expr.implied_name().unwrap_or_default().to_string();
        self.columns.push(SelectItem { expr, alias });
        self
    }

    pub fn select_as(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.columns.push(SelectItem {
            expr,
            alias: alias.into(),
        });
        self
    }

    /// Select each named column of `table_alias`
    pub fn select_all<S: AsRef<str>>(mut self, table_alias: &str, names: &[S]) -> Self {
        for name in names {
            self = self.select(qcol(table_alias, name.as_ref()));
        }
        self
    }

    pub fn join(
        mut self,
        relation: impl Into<Relation>,
        kind: JoinKind,
        on: Vec<Expr>,
        alias: &str,
    ) -> Self {
        self.joins.push(Join {
            kind,
            source: Source {
                relation: relation.into(),
                alias: alias.to_string(),
            },
            on,
        });
        self
    }

    /// Add a predicate; several predicates are combined with AND
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }

    /// Validate the node and freeze it
    pub fn finish(self) -> PlanResult<Arc<SelectQuery>> {
        self.validate()?;
        Ok(Arc::new(self))
    }

    /// Output column names in select order
    pub fn output_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.alias.clone()).collect()
    }

    fn sources(&self) -> impl Iterator<Item = &Source> {
        std::iter::once(&self.from).chain(self.joins.iter().map(|j| &j.source))
    }

    /// Structural validation of this node (sources are validated when built)
    pub fn validate(&self) -> PlanResult<()> {
        let origin = self.from.relation.describe();

        let mut aliases = HashSet::new();
        for source in self.sources() {
            check_identifier(&source.alias)?;
            if !aliases.insert(source.alias.as_str()) {
                return Err(PlanError::DuplicateAlias(source.alias.clone()));
            }
        }

        if self.columns.is_empty() {
            return Err(PlanError::EmptySelect(origin));
        }
        let mut outputs = HashSet::new();
        for item in &self.columns {
            if item.alias.is_empty() {
                return Err(PlanError::UnnamedExpression(origin));
            }
            if !outputs.insert(item.alias.as_str()) {
                return Err(PlanError::DuplicateAlias(item.alias.clone()));
            }
        }

        let resolver = Resolver::new(self);

        // Join conditions may only see the sources declared up to their join
        for (idx, join) in self.joins.iter().enumerate() {
            for cond in &join.on {
                resolver.check(cond, idx + 2, false)?;
            }
        }
        let all = self.joins.len() + 1;
        for item in &self.columns {
            resolver.check(&item.expr, all, false)?;
        }
        for expr in self.filters.iter().chain(&self.group_by) {
            resolver.check(expr, all, false)?;
        }
        for item in &self.order_by {
            resolver.check(&item.expr, all, true)?;
        }
        Ok(())
    }
}

/// Resolves column references against the sources of one node
struct Resolver<'a> {
    sources: Vec<(&'a str, Vec<String>)>,
    outputs: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(query: &'a SelectQuery) -> Self {
        Resolver {
            sources: query
                .sources()
                .map(|s| (s.alias.as_str(), s.relation.output_columns()))
                .collect(),
            outputs: query.output_columns(),
        }
    }

    fn check(&self, expr: &Expr, visible: usize, allow_output_alias: bool) -> PlanResult<()> {
        let mut refs = Vec::new();
        expr.column_refs(&mut refs);
        let visible = &self.sources[..visible.min(self.sources.len())];

        for column in refs {
            match &column.table {
                Some(table) => {
                    let (alias, columns) = visible
                        .iter()
                        .find(|(alias, _)| alias == table)
                        .ok_or_else(|| PlanError::UnresolvedAlias(table.clone()))?;
                    if !columns.contains(&column.name) {
                        return Err(PlanError::UnknownColumn {
                            column: column.name.clone(),
                            source_alias: (*alias).to_string(),
                            available: columns.clone(),
                        });
                    }
                }
                None => {
                    if allow_output_alias && self.outputs.contains(&column.name) {
                        continue;
                    }
                    if self.sources.len() > 1 {
                        return Err(PlanError::AmbiguousColumn(column.name.clone()));
                    }
                    let (alias, columns) = &visible[0];
                    if !columns.contains(&column.name) {
                        return Err(PlanError::UnknownColumn {
                            column: column.name.clone(),
                            source_alias: (*alias).to_string(),
                            available: columns.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Project `source` through `mapping` of `(input column, output column, cast)`.
/// Used to bring user datasets onto canonical column names and types.
pub fn rename_and_cast(
    source: impl Into<Relation>,
    alias: &str,
    mapping: &[(&str, &str, Option<SqlType>)],
) -> PlanResult<Arc<SelectQuery>> {
    let mut query = SelectQuery::from(source, alias);
    for (input, output, cast) in mapping {
        let column = qcol(alias, *input);
        let expr = match cast {
            Some(ty) => column.cast(*ty),
            None => column,
        };
        query = query.select_as(expr, *output);
    }
    query.finish()
}
