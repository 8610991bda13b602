//! # SQL Renderer
//!
//! Turns a validated plan node into one SQL statement for a dialect.
//!
//! ## CTE strategy
//!
//! The strategy is picked once from the dialect capabilities:
//!
//! - [`CteStrategy::Hoist`]: every [`Relation::Cte`] reachable from the
//!   statement is emitted once in a top-level `WITH` clause, dependencies
//!   first, and referenced by name.
//! - [`CteStrategy::Inline`]: every reference is replaced by the CTE body as
//!   a nested subquery. A CTE used three times is rendered three times; the
//!   result set is the same.

use super::expr::{Expr, Function, Literal, OrderItem, SortDirection, Window, WindowFunction};
use super::{BinaryOp, Cte, PlanError, PlanResult, Relation, SelectQuery, Source};
use crate::dialect::Dialect;
use std::sync::Arc;

const INDENT: &str = "  ";

/// How named subexpressions are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CteStrategy {
    Hoist,
    Inline,
}

/// Dialect-specialised SQL renderer
#[derive(Debug, Clone, Copy)]
pub struct SqlRenderer {
    dialect: Dialect,
    strategy: CteStrategy,
}

impl SqlRenderer {
    pub fn new(dialect: Dialect) -> Self {
        let strategy = if dialect.capabilities.supports_with_clause {
            CteStrategy::Hoist
        } else {
            CteStrategy::Inline
        };
        SqlRenderer { dialect, strategy }
    }

    pub fn strategy(&self) -> CteStrategy {
        self.strategy
    }

    /// Render a complete statement
    pub fn render(&self, query: &SelectQuery) -> PlanResult<String> {
        query.validate()?;
        let body = self.render_select(query);
        match self.strategy {
            CteStrategy::Inline => Ok(body),
            CteStrategy::Hoist => {
                let mut ctes: Vec<Arc<Cte>> = Vec::new();
                collect_ctes(query, &mut ctes)?;
                if ctes.is_empty() {
                    return Ok(body);
                }
                let entries: Vec<String> = ctes
                    .iter()
                    .map(|cte| {
                        format!(
                            "{} AS (\n{}\n)",
                            self.dialect.quote_ident(&cte.name),
                            indent(&self.render_select(&cte.query))
                        )
                    })
                    .collect();
                Ok(format!("WITH {}\n{}", entries.join(",\n"), body))
            }
        }
    }

    fn render_select(&self, query: &SelectQuery) -> String {
        let mut sql = String::from("SELECT\n");
        let items: Vec<String> = query
            .columns
            .iter()
            .map(|item| {
                let expr = self.render_expr(&item.expr);
                match &item.expr {
                    Expr::Column(column) if column.name == item.alias => format!("{INDENT}{expr}"),
                    _ => format!("{INDENT}{expr} AS {}", self.dialect.quote_ident(&item.alias)),
                }
            })
            .collect();
        sql.push_str(&items.join(",\n"));
        sql.push_str("\nFROM ");
        sql.push_str(&self.render_source(&query.from));

        for join in &query.joins {
            sql.push('\n');
            sql.push_str(join.kind.keyword());
            sql.push(' ');
            sql.push_str(&self.render_source(&join.source));
            if !join.on.is_empty() {
                sql.push_str("\n  ON ");
                sql.push_str(&self.render_conjunction(&join.on, "\n  AND "));
            }
        }

        if !query.filters.is_empty() {
            sql.push_str("\nWHERE ");
            sql.push_str(&self.render_conjunction(&query.filters, "\n  AND "));
        }

        if !query.group_by.is_empty() {
            let keys: Vec<String> = query.group_by.iter().map(|e| self.render_expr(e)).collect();
            sql.push_str("\nGROUP BY ");
            sql.push_str(&keys.join(", "));
        }

        if !query.order_by.is_empty() {
            sql.push_str("\nORDER BY ");
            sql.push_str(&self.render_order(&query.order_by));
        }
        sql
    }

    fn render_source(&self, source: &Source) -> String {
        let alias = self.dialect.quote_ident(&source.alias);
        match &source.relation {
            Relation::Table { table, .. } => {
                let name = match &table.schema {
                    Some(schema) => format!(
                        "{}.{}",
                        self.dialect.quote_ident(schema),
                        self.dialect.quote_ident(&table.name)
                    ),
                    None => self.dialect.quote_ident(&table.name),
                };
                format!("{name} AS {alias}")
            }
            Relation::Query(query) => {
                format!("(\n{}\n) AS {alias}", indent(&self.render_select(query)))
            }
            Relation::Cte(cte) => match self.strategy {
                CteStrategy::Hoist => format!("{} AS {alias}", self.dialect.quote_ident(&cte.name)),
                CteStrategy::Inline => {
                    format!("(\n{}\n) AS {alias}", indent(&self.render_select(&cte.query)))
                }
            },
            Relation::UnionAll(inputs) => {
                let parts: Vec<String> = inputs.iter().map(|q| self.render_select(q)).collect();
                format!("(\n{}\n) AS {alias}", indent(&parts.join("\nUNION ALL\n")))
            }
        }
    }

    fn render_conjunction(&self, predicates: &[Expr], separator: &str) -> String {
        predicates
            .iter()
            .map(|p| self.render_expr(p))
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn render_order(&self, items: &[OrderItem]) -> String {
        items
            .iter()
            .map(|item| {
                let direction = match item.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {direction}", self.render_expr(&item.expr))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_window(&self, window: &Window) -> String {
        let mut parts = Vec::new();
        if !window.partition_by.is_empty() {
            let keys: Vec<String> = window.partition_by.iter().map(|e| self.render_expr(e)).collect();
            parts.push(format!("PARTITION BY {}", keys.join(", ")));
        }
        if !window.order_by.is_empty() {
            parts.push(format!("ORDER BY {}", self.render_order(&window.order_by)));
        }
        format!("OVER ({})", parts.join(" "))
    }

    /// Render one expression
    pub fn render_expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Column(column) => match &column.table {
                Some(table) => format!(
                    "{}.{}",
                    self.dialect.quote_ident(table),
                    self.dialect.quote_ident(&column.name)
                ),
                None => self.dialect.quote_ident(&column.name),
            },
            Expr::Literal(literal) => render_literal(literal),
            Expr::Binary { op, left, right } => {
                let l = self.render_expr(left);
                let r = self.render_expr(right);
                match op {
                    BinaryOp::NullSafeEq => self.dialect.null_safe_eq(&l, &r),
                    _ => format!("({l} {} {r})", op.token()),
                }
            }
            Expr::Function { func, args } => {
                let args: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                match func {
                    Function::Round => self.dialect.round(&args.join(", ")),
                    Function::Sqrt => format!("SQRT({})", args.join(", ")),
                    Function::Abs => format!("ABS({})", args.join(", ")),
                    Function::Ceil => format!("{}({})", self.dialect.ceil_function(), args.join(", ")),
                    Function::Coalesce => format!("COALESCE({})", args.join(", ")),
                    Function::NullIf => format!("NULLIF({})", args.join(", ")),
                }
            }
            Expr::IsNull { expr, negated } => {
                let inner = self.render_expr(expr);
                if *negated {
                    format!("({inner} IS NOT NULL)")
                } else {
                    format!("({inner} IS NULL)")
                }
            }
            Expr::Aggregate { func, arg } => match arg {
                Some(arg) => format!("{}({})", func.name(), self.render_expr(arg)),
                None => format!("{}(*)", func.name()),
            },
            Expr::Window { func, window } => {
                let call = match func {
                    WindowFunction::RowNumber => "ROW_NUMBER()".to_string(),
                    WindowFunction::Aggregate(agg, Some(arg)) => {
                        format!("{}({})", agg.name(), self.render_expr(arg))
                    }
                    WindowFunction::Aggregate(agg, None) => format!("{}(*)", agg.name()),
                };
                format!("{call} {}", self.render_window(window))
            }
            Expr::Cast { expr, to } => format!(
                "CAST({} AS {})",
                self.render_expr(expr),
                self.dialect.type_name(*to)
            ),
        }
    }
}

fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::Int(v) => v.to_string(),
        // Debug formatting always keeps a decimal point or exponent, so engines
        // never read a float literal as an integer
        Literal::Float(v) => format!("{v:?}"),
        Literal::Str(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Null => "NULL".to_string(),
    }
}

fn indent(sql: &str) -> String {
    sql.lines()
        .map(|line| format!("{INDENT}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collect CTEs reachable from `query`, dependencies first
fn collect_ctes(query: &SelectQuery, out: &mut Vec<Arc<Cte>>) -> PlanResult<()> {
    collect_from_relation(&query.from.relation, out)?;
    for join in &query.joins {
        collect_from_relation(&join.source.relation, out)?;
    }
    Ok(())
}

fn collect_from_relation(relation: &Relation, out: &mut Vec<Arc<Cte>>) -> PlanResult<()> {
    match relation {
        Relation::Table { .. } => Ok(()),
        Relation::Query(query) => collect_ctes(query, out),
        Relation::UnionAll(inputs) => {
            for input in inputs {
                collect_ctes(input, out)?;
            }
            Ok(())
        }
        Relation::Cte(cte) => {
            if let Some(existing) = out.iter().find(|c| c.name == cte.name) {
                if Arc::ptr_eq(existing, cte) || existing.query == cte.query {
                    return Ok(());
                }
                return Err(PlanError::ConflictingCte(cte.name.clone()));
            }
            collect_ctes(&cte.query, out)?;
            out.push(Arc::clone(cte));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DialectCapabilities, Engine};
    use crate::plan::{qcol, JoinKind, TableRef};

    fn events() -> Relation {
        Relation::table(
            TableRef::qualified("public", "events"),
            vec!["user_id".to_string(), "item_id".to_string()],
        )
    }

    fn shared_plan() -> Arc<SelectQuery> {
        let base = SelectQuery::from(events(), "_raw")
            .select(qcol("_raw", "user_id"))
            .select(qcol("_raw", "item_id"))
            .finish()
            .unwrap();
        let cte = Relation::with_cte(base, "_base").unwrap();
        SelectQuery::from(cte.clone(), "_l")
            .join(
                cte,
                JoinKind::Inner,
                vec![qcol("_l", "item_id").null_safe_eq(qcol("_r", "item_id"))],
                "_r",
            )
            .select_as(qcol("_l", "user_id"), "user_1")
            .select_as(qcol("_r", "user_id"), "user_2")
            .finish()
            .unwrap()
    }

    #[test]
    fn test_hoisted_cte_rendered_once() {
        let renderer = SqlRenderer::new(Dialect::new(Engine::Postgres));
        assert_eq!(renderer.strategy(), CteStrategy::Hoist);
        let sql = renderer.render(&shared_plan()).unwrap();
        assert!(sql.starts_with("WITH \"_base\" AS ("));
        assert_eq!(sql.matches("\"public\".\"events\"").count(), 1);
        assert!(sql.contains("FROM \"_base\" AS \"_l\""));
        assert!(sql.contains("IS NOT DISTINCT FROM"));
    }

    #[test]
    fn test_inlined_cte_repeated() {
        let renderer = SqlRenderer::new(Dialect::new(Engine::SqlServer));
        assert_eq!(renderer.strategy(), CteStrategy::Inline);
        let sql = renderer.render(&shared_plan()).unwrap();
        assert!(!sql.contains("WITH"));
        assert_eq!(sql.matches("[public].[events]").count(), 2);
        assert!(sql.contains("[_l].[item_id] IS NULL AND [_r].[item_id] IS NULL"));
    }

    #[test]
    fn test_capability_override_switches_strategy() {
        let dialect = Dialect::new(Engine::Sqlite).with_capabilities(DialectCapabilities {
            supports_full_outer_join: true,
            supports_with_clause: false,
        });
        assert_eq!(SqlRenderer::new(dialect).strategy(), CteStrategy::Inline);
    }

    #[test]
    fn test_conflicting_cte_names_rejected() {
        let a = SelectQuery::from(events(), "_raw")
            .select(qcol("_raw", "user_id"))
            .finish()
            .unwrap();
        let b = SelectQuery::from(events(), "_raw")
            .select(qcol("_raw", "item_id"))
            .finish()
            .unwrap();
        let query = SelectQuery::from(Relation::with_cte(a, "_same").unwrap(), "_a")
            .join(
                Relation::with_cte(b, "_same").unwrap(),
                JoinKind::Inner,
                vec![],
                "_b",
            )
            .select_as(qcol("_a", "user_id"), "u")
            .finish()
            .unwrap();
        let renderer = SqlRenderer::new(Dialect::new(Engine::Postgres));
        assert_eq!(
            renderer.render(&query).unwrap_err(),
            PlanError::ConflictingCte("_same".to_string())
        );
    }

    #[test]
    fn test_float_literals_keep_decimal_point() {
        assert_eq!(render_literal(&Literal::Float(1.0)), "1.0");
        assert_eq!(render_literal(&Literal::Float(1e15)), "1000000000000000.0");
        assert_eq!(render_literal(&Literal::Float(0.5)), "0.5");
        assert_eq!(render_literal(&Literal::Str("it's".into())), "'it''s'");
    }

    #[test]
    fn test_round_and_ceil_spelling() {
        let sqlserver = SqlRenderer::new(Dialect::new(Engine::SqlServer));
        let postgres = SqlRenderer::new(Dialect::new(Engine::Postgres));
        let expr = qcol("t", "x").ceil().round();
        assert_eq!(sqlserver.render_expr(&expr), "ROUND(CEILING([t].[x]), 0)");
        assert_eq!(postgres.render_expr(&expr), "ROUND(CEIL(\"t\".\"x\"))");
    }
}
