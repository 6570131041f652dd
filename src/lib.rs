pub mod alias_dedup;
pub mod aliases;
pub mod column_resolver;
pub mod config;
pub mod deduction_mapper;
pub mod domain_rules;
pub mod error;
pub mod execution_loop;
pub mod executor;
pub mod fallback;
pub mod fuzzy_matcher;
pub mod llm;
pub mod pipeline;
pub mod schema;
pub mod security;
pub mod session;
pub mod sql_extractor;
pub mod sql_validator;

pub use error::{MendError, Result};
pub use execution_loop::{QueryProvenance, RecoveredQuery, RecoveryOrchestrator};
pub use executor::{QueryExecutor, ResultSet, SqliteExecutor};
pub use pipeline::Pipeline;
