//! Question -> rows: extract, guard, execute with recovery, record.

use crate::config::RecoveryConfig;
use crate::domain_rules::DomainRules;
use crate::error::{MendError, Result};
use crate::execution_loop::{RecoveredQuery, RecoveryOrchestrator};
use crate::executor::QueryExecutor;
use crate::schema::SchemaInfo;
use crate::security::QueryGuards;
use crate::session::{HistoryEntry, QuerySession};
use crate::sql_extractor::SqlExtractor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub generated_sql: String,
    pub recovered: RecoveredQuery,
    pub guard_warnings: Vec<String>,
}

pub struct Pipeline {
    extractor: SqlExtractor,
    guards: QueryGuards,
    orchestrator: RecoveryOrchestrator,
    schema: Option<SchemaInfo>,
}

impl Pipeline {
    pub fn new(config: RecoveryConfig, rules: DomainRules, schema: Option<SchemaInfo>) -> Self {
        Self {
            extractor: SqlExtractor::new(),
            guards: QueryGuards::from_config(&config),
            orchestrator: RecoveryOrchestrator::new(config, rules),
            schema,
        }
    }

    pub fn schema(&self) -> Option<&SchemaInfo> {
        self.schema.as_ref()
    }

    pub fn orchestrator(&self) -> &RecoveryOrchestrator {
        &self.orchestrator
    }

    /// Extract SQL from the model's reply and run it.
    pub fn answer(
        &self,
        session: &mut QuerySession,
        executor: &mut dyn QueryExecutor,
        question: &str,
        raw_llm_text: &str,
    ) -> Result<PipelineOutcome> {
        let sql = self
            .extractor
            .extract(raw_llm_text)
            .ok_or_else(|| MendError::Extraction("no valid SQL found in the model response".to_string()))?;
        self.execute(session, executor, question, &sql)
    }

    /// Guard, execute with recovery and record `sql` as the answer to `question`.
    pub fn execute(
        &self,
        session: &mut QuerySession,
        executor: &mut dyn QueryExecutor,
        question: &str,
        sql: &str,
    ) -> Result<PipelineOutcome> {
        let report = self.guards.check(sql)?;
        for warning in &report.warnings {
            warn!("{}", warning);
        }

        let started = Instant::now();
        let recovered = self
            .orchestrator
            .execute_with_recovery(executor, sql, self.schema.as_ref())?;
        let elapsed_ms = started.elapsed().as_millis();

        if recovered.provenance.is_modified() {
            info!("Answered with a modified query: {}", recovered.effective_query);
        }

        session.record(HistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            question: question.to_string(),
            generated_sql: sql.to_string(),
            effective_sql: recovered.effective_query.clone(),
            provenance: recovered.provenance.clone(),
            row_count: recovered.result.row_count(),
            elapsed_ms,
        });

        Ok(PipelineOutcome {
            generated_sql: sql.to_string(),
            recovered,
            guard_warnings: report.warnings,
        })
    }
}
