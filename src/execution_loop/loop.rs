//! Execution Loop
//!
//! Bounded execute -> classify -> repair -> re-execute loop.

use crate::config::RecoveryConfig;
use crate::domain_rules::DomainRules;
use crate::error::{MendError, Result};
use crate::execution_loop::error_classifier::ErrorClassifier;
use crate::execution_loop::error_recovery::{default_strategies, Repair, RepairContext, RepairStrategy, StrategyKind};
use crate::executor::{QueryExecutor, ResultSet};
use crate::schema::SchemaInfo;
use crate::sql_validator::{Severity, SqlStaticValidator};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    /// Executed and failed; a rewrite was produced for the next attempt.
    StillFails,
    /// Executed and failed; no strategy changed the query.
    NoFixFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempt_number: usize,
    pub query_before: String,
    pub query_after: Option<String>,
    pub strategy_applied: Option<StrategyKind>,
    pub error_message: Option<String>,
    /// Near matches below the auto-apply threshold, left for the user.
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub outcome: AttemptOutcome,
}

/// Whether the returned rows answer the query as generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryProvenance {
    AsGenerated,
    Repaired { strategies: Vec<StrategyKind> },
    /// Intent could not be preserved; rows are a table preview.
    Fallback,
}

impl QueryProvenance {
    fn from_strategies(strategies: Vec<StrategyKind>) -> Self {
        if strategies.is_empty() {
            QueryProvenance::AsGenerated
        } else if strategies.contains(&StrategyKind::Fallback) {
            QueryProvenance::Fallback
        } else {
            QueryProvenance::Repaired { strategies }
        }
    }

    pub fn is_modified(&self) -> bool {
        !matches!(self, QueryProvenance::AsGenerated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveredQuery {
    pub result: ResultSet,
    /// The exact string that produced `result`.
    pub effective_query: String,
    pub original_query: String,
    pub attempts: Vec<RecoveryAttempt>,
    pub provenance: QueryProvenance,
}

pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    rules: DomainRules,
    classifier: ErrorClassifier,
    validator: SqlStaticValidator,
    strategies: Vec<Box<dyn RepairStrategy>>,
}

impl RecoveryOrchestrator {
    pub fn new(config: RecoveryConfig, rules: DomainRules) -> Self {
        Self {
            config,
            rules,
            classifier: ErrorClassifier::new(),
            validator: SqlStaticValidator::new(),
            strategies: default_strategies(),
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn rules(&self) -> &DomainRules {
        &self.rules
    }

    /// Run `candidate`, repairing classified failures up to `max_retries`
    /// times. Unclassified driver errors propagate without repair.
    pub fn execute_with_recovery(
        &self,
        executor: &mut dyn QueryExecutor,
        candidate: &str,
        schema: Option<&SchemaInfo>,
    ) -> Result<RecoveredQuery> {
        if self.config.enable_sql_validation {
            let report = self.validator.validate(candidate, schema);
            for issue in &report.issues {
                match issue.severity() {
                    Severity::Error => warn!("Static validation: {}", issue),
                    Severity::Warning => debug!("Static validation: {}", issue),
                }
            }
        }

        let ctx = RepairContext {
            rules: &self.rules,
            schema,
            config: &self.config,
        };
        let mut current = candidate.to_string();
        let mut executed: HashSet<String> = HashSet::new();
        let mut attempts: Vec<RecoveryAttempt> = Vec::new();
        let mut applied: Vec<StrategyKind> = Vec::new();
        let mut attempt_number = 0;

        loop {
            attempt_number += 1;
            executed.insert(current.clone());
            debug!("Execution attempt {}: {}", attempt_number, current);

            let error = match executor.run(&current) {
                Ok(result) => {
                    if attempt_number > 1 {
                        info!("Query succeeded after {} attempt(s)", attempt_number);
                    }
                    attempts.push(RecoveryAttempt {
                        attempt_number,
                        query_before: current.clone(),
                        query_after: None,
                        strategy_applied: None,
                        error_message: None,
                        suggestions: Vec::new(),
                        outcome: AttemptOutcome::Success,
                    });
                    return Ok(RecoveredQuery {
                        result,
                        effective_query: current,
                        original_query: candidate.to_string(),
                        attempts,
                        provenance: QueryProvenance::from_strategies(applied),
                    });
                }
                Err(e) => e,
            };

            let record = self.classifier.classify(&error.message);
            warn!("Attempt {} failed ({}): {}", attempt_number, record.kind(), error.message);

            if !record.is_recoverable() {
                if attempts.is_empty() {
                    return Err(MendError::Execution(error));
                }
                attempts.push(self.dead_end(attempt_number, current, &error.message, Vec::new()));
                return Err(MendError::RecoveryExhausted { last_error: error, attempts });
            }

            let suggestions: Vec<String> = self
                .strategies
                .iter()
                .flat_map(|strategy| strategy.suggestions(&ctx, &current, &record))
                .unique()
                .collect();
            if !suggestions.is_empty() {
                info!(
                    "Possible replacements for {}: {}",
                    record.extracted_entity().unwrap_or_default(),
                    suggestions.iter().join(", ")
                );
            }

            if attempt_number > self.config.max_retries {
                warn!("Retry budget of {} exhausted", self.config.max_retries);
                attempts.push(RecoveryAttempt {
                    outcome: AttemptOutcome::StillFails,
                    ..self.dead_end(attempt_number, current, &error.message, suggestions)
                });
                return Err(MendError::RecoveryExhausted { last_error: error, attempts });
            }

            let repair = self.strategies.iter().find_map(|strategy| {
                strategy
                    .repair(&ctx, &current, &record)
                    .filter(|r| r.sql != current && !executed.contains(&r.sql))
                    .map(|r| (strategy.kind(), r))
            });

            let Some((kind, Repair { sql, description })) = repair else {
                warn!("No repair strategy changed the query");
                attempts.push(self.dead_end(attempt_number, current, &error.message, suggestions));
                return Err(MendError::RecoveryExhausted { last_error: error, attempts });
            };

            info!("Applied {}: {}", kind, description);
            attempts.push(RecoveryAttempt {
                attempt_number,
                query_before: std::mem::replace(&mut current, sql.clone()),
                query_after: Some(sql),
                strategy_applied: Some(kind),
                error_message: Some(error.message),
                suggestions,
                outcome: AttemptOutcome::StillFails,
            });
            applied.push(kind);
        }
    }

    fn dead_end(&self, attempt_number: usize, query: String, message: &str, suggestions: Vec<String>) -> RecoveryAttempt {
        RecoveryAttempt {
            attempt_number,
            query_before: query,
            query_after: None,
            strategy_applied: None,
            error_message: Some(message.to_string()),
            suggestions,
            outcome: AttemptOutcome::NoFixFound,
        }
    }
}
