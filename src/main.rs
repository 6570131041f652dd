use sqlmend::config::{LlmConfig, RecoveryConfig};
use sqlmend::domain_rules::DomainRules;
use sqlmend::error::MendError;
use sqlmend::execution_loop::{QueryProvenance, RecoveryAttempt};
use sqlmend::executor::{ResultSet, SqliteExecutor};
use sqlmend::llm::{LlmClient, PromptTemplate};
use sqlmend::pipeline::{Pipeline, PipelineOutcome};
use sqlmend::schema::SchemaInfo;
use sqlmend::session::QuerySession;
use sqlmend::sql_extractor::{check_sql, SqlExtractor};
use sqlmend::sql_validator::SqlStaticValidator;

use anyhow::Result;
use itertools::Itertools;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlmend")]
#[command(about = "Extract, validate and self-heal LLM-generated SQL")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Domain rules JSON (defaults to the built-in financial demo rules)
    #[arg(long, global = true)]
    domain_rules: Option<PathBuf>,

    /// Re-executions allowed after the first attempt
    #[arg(long, global = true)]
    max_retries: Option<usize>,

    /// Write the session history as JSON when done
    #[arg(long, global = true)]
    export_session: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute SQL against a SQLite database with automatic recovery
    Run {
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        sql: String,
    },
    /// Print the SQL statement found in a model response
    Extract {
        #[arg(long)]
        file: PathBuf,
    },
    /// Run the static checks on a statement
    Validate {
        #[arg(long)]
        sql: String,

        /// Schema JSON used for column checks
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Ask a question in natural language (needs GROQ_API_KEY or OPENAI_API_KEY)
    Ask {
        #[arg(long)]
        db: PathBuf,

        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = RecoveryConfig::from_env()?;
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    let rules = match &args.domain_rules {
        Some(path) => DomainRules::load(path)?,
        None => DomainRules::default(),
    };
    let mut session = QuerySession::from_config(&config);

    match args.command {
        Commands::Run { db, sql } => run_sql(db, sql, config, rules, &mut session)?,
        Commands::Extract { file } => extract(file)?,
        Commands::Validate { sql, schema } => validate(sql, schema)?,
        Commands::Ask { db, question } => ask(db, question, config, rules, &mut session).await?,
    }

    if let Some(path) = args.export_session {
        std::fs::write(&path, session.export_json()?)?;
        info!("Session exported to {}", path.display());
    }
    Ok(())
}

fn run_sql(db: PathBuf, sql: String, config: RecoveryConfig, rules: DomainRules, session: &mut QuerySession) -> Result<()> {
    let mut executor = SqliteExecutor::open(&db)?;
    let schema = SchemaInfo::from_sqlite(executor.connection())?;
    let pipeline = Pipeline::new(config, rules, Some(schema));

    let outcome = pipeline.execute(session, &mut executor, &sql, &sql);
    report(outcome)
}

fn extract(file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)?;
    match SqlExtractor::new().extract_with_method(&raw) {
        Some(found) => {
            info!("Extracted via {:?}", found.method);
            println!("{}", found.sql);
            Ok(())
        }
        None => Err(MendError::Extraction(format!("no valid SQL found in {}", file.display())).into()),
    }
}

fn validate(sql: String, schema: Option<PathBuf>) -> Result<()> {
    if let Err(reason) = check_sql(&sql) {
        println!("Not SQL: {}", reason);
        return Ok(());
    }
    let schema = schema.map(SchemaInfo::load).transpose()?;
    let report = SqlStaticValidator::new().validate(&sql, schema.as_ref());
    if report.issues.is_empty() {
        println!("No issues found");
    }
    for issue in &report.issues {
        println!("[{:?}] {}", issue.severity(), issue);
    }
    Ok(())
}

async fn ask(
    db: PathBuf,
    question: String,
    config: RecoveryConfig,
    rules: DomainRules,
    session: &mut QuerySession,
) -> Result<()> {
    let llm = LlmClient::from_config(&LlmConfig::from_env()?);
    let mut executor = SqliteExecutor::open(&db)?;
    let schema = SchemaInfo::from_sqlite(executor.connection())?;
    let described = schema.describe();
    let pipeline = Pipeline::new(config, rules, Some(schema));

    let raw = llm.generate_sql(&question, &described, PromptTemplate::Production).await?;
    let outcome = match pipeline.answer(session, &mut executor, &question, &raw) {
        Err(MendError::Extraction(reason)) => {
            warn!("{}; retrying with the basic prompt", reason);
            let raw = llm.generate_sql(&question, &described, PromptTemplate::Basic).await?;
            pipeline.answer(session, &mut executor, &question, &raw)
        }
        other => other,
    };
    report(outcome)
}

fn report(outcome: sqlmend::error::Result<PipelineOutcome>) -> Result<()> {
    match outcome {
        Ok(outcome) => {
            let recovered = &outcome.recovered;
            match &recovered.provenance {
                QueryProvenance::AsGenerated => {}
                QueryProvenance::Repaired { strategies } => {
                    println!("Query was modified automatically ({}):", strategies.iter().join(", "));
                    println!("  {}\n", recovered.effective_query);
                }
                QueryProvenance::Fallback => {
                    println!("Could not preserve the intent of the query; showing a preview instead:");
                    println!("  {}\n", recovered.effective_query);
                }
            }
            print_rows(&recovered.result);
            Ok(())
        }
        Err(e) => {
            print_attempts(e.attempts());
            Err(e.into())
        }
    }
}

fn print_rows(result: &ResultSet) {
    println!("{}", result.columns.join(" | "));
    for row in &result.rows {
        println!("{}", row.iter().join(" | "));
    }
    println!("({} row(s))", result.row_count());
}

fn print_attempts(attempts: &[RecoveryAttempt]) {
    for attempt in attempts {
        println!("Attempt {} ({:?}): {}", attempt.attempt_number, attempt.outcome, attempt.query_before);
        if let Some(message) = &attempt.error_message {
            println!("  error: {}", message);
        }
        if let (Some(strategy), Some(after)) = (&attempt.strategy_applied, &attempt.query_after) {
            println!("  {} -> {}", strategy, after);
        }
    }
}
