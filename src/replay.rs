//! Scripted access to an overlay.
//!
//! A script is a JSON array of steps, each tagged by `op`:
//!
//! ```json
//! [
//!   { "op": "write", "query": "GetFeed", "variables": { "page": 1 }, "result": { "items": [] } },
//!   { "op": "read", "query": "GetFeed", "variables": { "page": 1 } },
//!   { "op": "extract" }
//! ]
//! ```
//!
//! `query` is either an operation name or a full document
//! (`{ "definitions": [...] }`). Missing or `null` variables mean none.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{
    ArgumentSet, CacheSnapshot, Diff, NormalizedStore, OverlayCache, QueryDocument, QueryIdentity,
};
use crate::error::AppError;

/// A query as written in a script.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptQuery {
    Named(String),
    Document(QueryDocument),
}

impl ScriptQuery {
    pub fn into_document(self) -> QueryDocument {
        match self {
            Self::Named(name) => QueryDocument::query(&name),
            Self::Document(document) => document,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Step {
    Write {
        query: ScriptQuery,
        #[serde(default)]
        variables: Option<ArgumentSet>,
        result: Value,
    },
    Read {
        query: ScriptQuery,
        #[serde(default)]
        variables: Option<ArgumentSet>,
    },
    Diff {
        query: ScriptQuery,
        #[serde(default)]
        variables: Option<ArgumentSet>,
    },
    Extract {
        #[serde(default)]
        optimistic: bool,
    },
    Reset,
}

/// Outcome of one step, printed as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<QueryIdentity>,
    /// Whether the step was answered by, or stored as, a bypass entry.
    pub bypass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    fn new(step: usize, op: &'static str, identity: Option<QueryIdentity>) -> Self {
        Self {
            step,
            op,
            identity,
            bypass: false,
            result: None,
            diff: None,
            error: None,
        }
    }
}

pub fn parse_script(json: &str) -> Result<Vec<Step>, AppError> {
    serde_json::from_str(json).map_err(|err| AppError::script(err.to_string()))
}

pub fn load_script(path: &Path) -> Result<Vec<Step>, AppError> {
    let json = fs::read_to_string(path)
        .map_err(|err| AppError::script(format!("failed to read {}: {err}", path.display())))?;
    parse_script(&json)
}

/// Run `steps` in order.
///
/// Store failures (a read miss, for instance) are reported on the step and do
/// not stop the script.
pub fn run<S>(cache: &OverlayCache<S>, steps: Vec<Step>) -> Result<Vec<StepReport>, AppError>
where
    S: NormalizedStore,
{
    let total = steps.len();
    let mut reports = Vec::with_capacity(total);

    for (index, step) in steps.into_iter().enumerate() {
        let report = match step {
            Step::Write {
                query,
                variables,
                result,
            } => {
                let query = query.into_document();
                let variables = variables.unwrap_or_default();
                let mut report = StepReport::new(index, "write", query.identity().cloned());
                match cache.write(&query, &variables, result) {
                    Ok(()) => {
                        report.bypass = cache.registry().matches(query.identity(), &variables);
                    }
                    Err(err) => report.error = Some(err.to_string()),
                }
                report
            }
            Step::Read { query, variables } => {
                let query = query.into_document();
                let variables = variables.unwrap_or_default();
                let mut report = StepReport::new(index, "read", query.identity().cloned());
                report.bypass = cache.registry().matches(query.identity(), &variables);
                match cache.read(&query, &variables) {
                    Ok(result) => report.result = Some(result),
                    Err(err) => report.error = Some(err.to_string()),
                }
                report
            }
            Step::Diff { query, variables } => {
                let query = query.into_document();
                let variables = variables.unwrap_or_default();
                let mut report = StepReport::new(index, "diff", query.identity().cloned());
                report.bypass = cache.registry().matches(query.identity(), &variables);
                match cache.diff(&query, &variables) {
                    Ok(diff) => report.diff = Some(diff),
                    Err(err) => report.error = Some(err.to_string()),
                }
                report
            }
            Step::Extract { optimistic } => {
                let mut report = StepReport::new(index, "extract", None);
                report.result = Some(cache.extract(optimistic).to_value()?);
                report
            }
            Step::Reset => {
                let mut report = StepReport::new(index, "reset", None);
                if let Err(err) = cache.reset() {
                    report.error = Some(err.to_string());
                }
                report
            }
        };

        debug!(
            step = report.step,
            op = report.op,
            bypass = report.bypass,
            failed = report.error.is_some(),
            "Replayed step"
        );
        reports.push(report);
    }

    info!(steps = total, "Replay finished");
    Ok(reports)
}

/// Summary of a snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub bypass_entries: Vec<EntrySummary>,
    pub store_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub identity: QueryIdentity,
    pub arguments: ArgumentSet,
}

pub fn summarize(snapshot: &CacheSnapshot) -> SnapshotSummary {
    SnapshotSummary {
        bypass_entries: snapshot
            .bypass_entries
            .iter()
            .map(|(identity, entry)| EntrySummary {
                identity: identity.clone(),
                arguments: entry.arguments.clone(),
            })
            .collect(),
        store_records: snapshot.store.len(),
    }
}
