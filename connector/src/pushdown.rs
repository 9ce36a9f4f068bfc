use crate::domain::{Bound, Constraint, Domain, Literal, Range};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use std::time::Duration;
use tracing::warn;

/// `NaiveDate::num_days_from_ce()` for 1970-01-01.
const EPOCH_CE_DAYS: i32 = 719_163;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortItem {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// `None` renders as `COUNT(*)`.
    pub column: Option<String>,
    pub alias: String,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

/// An immutable planned table handle. Every applied pushdown produces a new
/// handle; the engine keeps whichever one it commits to.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTable {
    pub schema_name: String,
    pub table_name: String,
    pub projected_columns: Option<Vec<String>>,
    pub predicate_sql: Option<String>,
    pub limit: Option<u64>,
    pub sort_items: Vec<SortItem>,
    pub aggregation: Option<Aggregation>,
}

impl PlannedTable {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            projected_columns: None,
            predicate_sql: None,
            limit: None,
            sort_items: vec![],
            aggregation: None,
        }
    }

    /// Renders the producer-side SELECT for this handle:
    /// `SELECT [TOP n] <projection> FROM <schema>.<table>
    ///  [WHERE ...] [GROUP BY ...] [ORDER BY ...] [SAMPLE n]`.
    pub fn render_select(&self) -> String {
        let projection = match &self.aggregation {
            Some(aggregation) => {
                let mut parts = aggregation.group_by.clone();
                for aggregate in &aggregation.aggregates {
                    let argument = aggregate.column.as_deref().unwrap_or("*");
                    parts.push(format!(
                        "{}({argument}) AS {}",
                        aggregate.function.as_sql(),
                        aggregate.alias
                    ));
                }
                parts.join(", ")
            }
            None => match &self.projected_columns {
                Some(columns) => columns.join(", "),
                None => "*".to_string(),
            },
        };
        // a limit with an ordering becomes TOP n; a bare limit samples
        let top_n = self.limit.filter(|_| !self.sort_items.is_empty());
        let sample = self.limit.filter(|_| self.sort_items.is_empty());
        let mut sql = String::from("SELECT ");
        if let Some(n) = top_n {
            sql.push_str(&format!("TOP {n} "));
        }
        sql.push_str(&projection);
        sql.push_str(&format!(" FROM {}.{}", self.schema_name, self.table_name));
        if let Some(predicate) = &self.predicate_sql {
            sql.push_str(&format!(" WHERE {predicate}"));
        }
        if let Some(aggregation) = &self.aggregation {
            if !aggregation.group_by.is_empty() {
                sql.push_str(&format!(" GROUP BY {}", aggregation.group_by.join(", ")));
            }
        }
        if !self.sort_items.is_empty() {
            let items: Vec<String> = self
                .sort_items
                .iter()
                .map(|item| {
                    if item.descending {
                        format!("{} DESC", item.column)
                    } else {
                        item.column.clone()
                    }
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", items.join(", ")));
        }
        if let Some(n) = sample {
            sql.push_str(&format!(" SAMPLE {n}"));
        }
        sql
    }
}

/// Translates engine-level optimizations into producer SQL fragments.
///
/// The planner never pushes a predicate it cannot render exactly; anything
/// it declines stays with the engine as a residue.
#[derive(Debug, Default)]
pub struct PushdownPlanner;

impl PushdownPlanner {
    pub fn apply_projection(&self, table: &PlannedTable, columns: &[String]) -> PlannedTable {
        let mut planned = table.clone();
        planned.projected_columns = Some(columns.to_vec());
        planned
    }

    /// Pushes the renderable part of the constraint; the rest is returned
    /// as the residue the engine must keep evaluating.
    pub fn apply_filter(
        &self,
        table: &PlannedTable,
        constraint: &Constraint,
    ) -> (PlannedTable, Constraint) {
        let mut clauses = vec![];
        let mut residue = vec![];
        for (column, domain) in &constraint.domains {
            match render_domain(column, domain) {
                Some(clause) => clauses.push(clause),
                None => residue.push((column.clone(), domain.clone())),
            }
        }
        let mut planned = table.clone();
        if !clauses.is_empty() {
            let pushed = clauses.join(" AND ");
            planned.predicate_sql = Some(match &table.predicate_sql {
                Some(existing) => format!("{existing} AND {pushed}"),
                None => pushed,
            });
        }
        (planned, Constraint::new(residue))
    }

    pub fn apply_limit(&self, table: &PlannedTable, limit: u64) -> Option<PlannedTable> {
        if limit == 0 {
            return None;
        }
        let mut planned = table.clone();
        planned.limit = Some(match planned.limit {
            Some(existing) => existing.min(limit),
            None => limit,
        });
        Some(planned)
    }

    pub fn apply_top_n(
        &self,
        table: &PlannedTable,
        sort_items: &[SortItem],
        limit: u64,
    ) -> Option<PlannedTable> {
        if limit == 0 || sort_items.is_empty() {
            return None;
        }
        let mut planned = table.clone();
        planned.sort_items = sort_items.to_vec();
        planned.limit = Some(limit);
        Some(planned)
    }

    /// Pushes non-DISTINCT COUNT/SUM/MIN/MAX/AVG with an optional GROUP BY.
    pub fn apply_aggregation(
        &self,
        table: &PlannedTable,
        aggregation: &Aggregation,
    ) -> Option<PlannedTable> {
        if table.aggregation.is_some() || table.limit.is_some() {
            return None;
        }
        if aggregation.aggregates.iter().any(|a| a.distinct) {
            return None;
        }
        let mut planned = table.clone();
        planned.aggregation = Some(aggregation.clone());
        planned.projected_columns = None;
        Some(planned)
    }

    /// Waits for a dynamic filter, planning without it once the configured
    /// timeout elapses. The timeout is non-fatal.
    pub async fn collect_dynamic_filter(
        &self,
        source: &dyn DynamicFilterSource,
        wait: Duration,
    ) -> Constraint {
        match tokio::time::timeout(wait, source.completed()).await {
            Ok(constraint) => constraint,
            Err(_) => {
                warn!("dynamic filter incomplete after {wait:?}, planning without it");
                Constraint::default()
            }
        }
    }
}

/// A dynamic filter produced by the engine during execution (e.g. from the
/// build side of a join).
#[async_trait]
pub trait DynamicFilterSource: Send + Sync {
    /// Resolves once the filter is complete.
    async fn completed(&self) -> Constraint;
}

fn render_literal(literal: &Literal) -> Option<String> {
    match literal {
        Literal::Boolean(value) => Some(if *value { "1" } else { "0" }.to_string()),
        Literal::Integer(value) => Some(value.to_string()),
        Literal::Double(value) => {
            if value.is_finite() {
                Some(value.to_string())
            } else {
                None
            }
        }
        Literal::Varchar(value) => Some(format!("'{}'", value.replace('\'', "''"))),
        Literal::Date(epoch_days) => {
            let date = NaiveDate::from_num_days_from_ce_opt(EPOCH_CE_DAYS + epoch_days)?;
            Some(format!("DATE '{}'", date.format("%Y-%m-%d")))
        }
        Literal::Timestamp(epoch_micros) => {
            let instant = DateTime::from_timestamp_micros(*epoch_micros)?;
            Some(format!(
                "TIMESTAMP '{}'",
                instant.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f")
            ))
        }
    }
}

fn render_range(column: &str, range: &Range) -> Option<String> {
    if let Some(value) = range.single_value() {
        return Some(format!("{column} = {}", render_literal(value)?));
    }
    let mut parts = vec![];
    match &range.low {
        Bound::Unbounded => {}
        Bound::Inclusive(value) => parts.push(format!("{column} >= {}", render_literal(value)?)),
        Bound::Exclusive(value) => parts.push(format!("{column} > {}", render_literal(value)?)),
    }
    match &range.high {
        Bound::Unbounded => {}
        Bound::Inclusive(value) => parts.push(format!("{column} <= {}", render_literal(value)?)),
        Bound::Exclusive(value) => parts.push(format!("{column} < {}", render_literal(value)?)),
    }
    if parts.is_empty() {
        // an unconstrained range carries no renderable predicate
        return None;
    }
    Some(parts.join(" AND "))
}

fn render_domain(column: &str, domain: &Domain) -> Option<String> {
    if domain.ranges.is_empty() {
        return if domain.null_allowed {
            Some(format!("{column} IS NULL"))
        } else {
            None
        };
    }
    let single_values: Option<Vec<&Literal>> = domain
        .ranges
        .iter()
        .map(|range| range.single_value())
        .collect();
    let body = if let Some(values) = single_values {
        if values.len() == 1 {
            format!("{column} = {}", render_literal(values[0])?)
        } else {
            let rendered: Option<Vec<String>> = values.into_iter().map(render_literal).collect();
            format!("{column} IN ({})", rendered?.join(","))
        }
    } else {
        let mut clauses = vec![];
        for range in &domain.ranges {
            let clause = render_range(column, range)?;
            if domain.ranges.len() > 1 && clause.contains(" AND ") {
                clauses.push(format!("({clause})"));
            } else {
                clauses.push(clause);
            }
        }
        if clauses.len() > 1 {
            format!("({})", clauses.join(" OR "))
        } else {
            clauses.remove(0)
        }
    };
    if domain.null_allowed {
        Some(format!("({body} OR {column} IS NULL)"))
    } else {
        Some(body)
    }
}
