//! SQL → aggregation-pipeline compiler
//!
//! Takes a SQL SELECT or CREATE statement plus bound parameter values and
//! produces the target collection, an execution method, and the ordered
//! pipeline stages that reproduce the statement's semantics against a
//! document store. Parsing is delegated to `sqlparser`; execution is left
//! to whatever layer consumes the [`CompiledQuery`].

use bson::Bson;
use sqlparser::ast::{Query, Select, SetExpr, Statement, TableFactor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use tracing::debug;

use mongopipe_plan::{CompiledQuery, ExecMethod, Stage};

mod columns;
mod group;
mod order;
mod params;
mod predicate;

pub use mongopipe_plan as plan;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to parse query: {0}")]
    Parse(#[from] sqlparser::parser::ParserError),

    #[error("statement kind `{0}` is not supported")]
    UnsupportedStatement(String),

    #[error("unsupported query shape: {0}")]
    UnsupportedShape(String),

    #[error("ordinal {position} is out of range for a select list of {columns} columns")]
    UnresolvedOrdinal { position: u64, columns: usize },

    #[error("no select-list aggregate matches `{0}`")]
    UnresolvedAlias(String),
}

/// Reusable compiler handle.
///
/// Holds only the parser dialect; every [`compile`](SqlCompiler::compile)
/// call is a pure function of its inputs and allocates a fresh alias table
/// and descriptor, so one handle can be shared across threads.
pub struct SqlCompiler {
    dialect: GenericDialect,
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Compile one SQL statement with positional parameters bound into it.
    ///
    /// Only SELECT and CREATE are in contract; anything else fails fast
    /// with [`CompileError::UnsupportedStatement`].
    pub fn compile(&self, sql: &str, params: &[Bson]) -> Result<CompiledQuery, CompileError> {
        let sql = params::interpolate(sql.trim(), params)?;
        let mut statements = Parser::parse_sql(&self.dialect, &sql)?;
        if statements.is_empty() {
            return Err(CompileError::UnsupportedShape("empty query".to_string()));
        }

        match statements.remove(0) {
            Statement::Query(query) => self.compile_select(*query),
            Statement::CreateTable { name, .. } => {
                // Document stores create collections implicitly, so CREATE
                // needs no pipeline at all.
                let collection = columns::object_name_tail(&name);
                debug!(%collection, "CREATE compiles to a no-op plan");
                Ok(CompiledQuery {
                    collection,
                    method: None,
                    stages: Vec::new(),
                })
            }
            other => Err(CompileError::UnsupportedStatement(
                statement_kind(&other).to_string(),
            )),
        }
    }

    fn compile_select(&self, query: Query) -> Result<CompiledQuery, CompileError> {
        let select = match *query.body {
            SetExpr::Select(select) => *select,
            other => {
                return Err(CompileError::UnsupportedShape(format!(
                    "unsupported query body: {other}"
                )))
            }
        };

        let collection = source_collection(&select)?;
        let aliases = columns::AliasTable::from_projection(&select.projection)?;

        // Fixed stage order: where-match, group, project, sort,
        // having-match, skip, limit.
        let mut stages = Vec::new();

        if let Some(filter) = &select.selection {
            stages.push(Stage::Match {
                predicate: predicate::translate(filter, predicate::FieldScope::RawColumns, &aliases)?,
            });
        }

        let (group, project) = group::build_group_stages(&select.group_by, &aliases)?;
        stages.push(group);
        stages.push(project);

        if !query.order_by.is_empty() {
            stages.push(order::build_sort_stage(&query.order_by, &aliases)?);
        }

        if let Some(having) = &select.having {
            stages.push(Stage::Match {
                predicate: predicate::translate(having, predicate::FieldScope::GroupOutputs, &aliases)?,
            });
        }

        stages.extend(order::build_pagination(query.limit.as_ref(), query.offset.as_ref())?);

        debug!(%collection, stages = stages.len(), "compiled SELECT into aggregation pipeline");

        Ok(CompiledQuery {
            collection,
            method: Some(ExecMethod::Aggregate),
            stages,
        })
    }
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn source_collection(select: &Select) -> Result<String, CompileError> {
    let first = select.from.first().ok_or_else(|| {
        CompileError::UnsupportedShape("query without a source collection".to_string())
    })?;

    match &first.relation {
        TableFactor::Table { name, .. } => Ok(columns::object_name_tail(name)),
        other => Err(CompileError::UnsupportedShape(format!(
            "unsupported source: {other}"
        ))),
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::AlterTable { .. } => "ALTER TABLE",
        _ => "other",
    }
}
