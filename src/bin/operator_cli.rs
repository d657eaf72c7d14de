use clap::{Parser, Subcommand};
use hybrid_ingest_rust::config::Config;
use hybrid_ingest_rust::db;
use hybrid_ingest_rust::dlq::{DeadLetterQueue, DlqQuery, InMemoryDeadLetterQueue};
use hybrid_ingest_rust::models::DlqSeverity;
use hybrid_ingest_rust::providers::sinks::{InMemoryKeywordSink, InMemorySemanticSink, InMemoryStructuredSink};
use hybrid_ingest_rust::retrieval::{retrieve, Policy, RetrievalFilters, RetrievalSources};
use hybrid_ingest_rust::telemetry::init_tracing;

const EXIT_SUCCESS: i32 = 0;
const EXIT_PARTIAL: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_DEPENDENCY_UNAVAILABLE: i32 = 3;

#[derive(Parser)]
#[command(name = "operator_cli", about = "Operator surface for the ingest pipeline")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Triggers today's scrape-stage plan against the scheduler budget.
  RunDaily {
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,
  },
  /// Replays a single dead-lettered job's original inputs.
  ReplayDlq {
    #[arg(long)]
    job_id: String,
  },
  /// Lists dead letter queue entries matching the given filters.
  QueryDlq {
    #[arg(long)]
    severity: Option<String>,
    #[arg(long)]
    job_type: Option<String>,
    #[arg(long)]
    since: Option<chrono::DateTime<chrono::Utc>>,
  },
  /// Runs a single retrieval query against the process-local sinks.
  Retrieve {
    #[arg(long)]
    query: String,
    #[arg(long, default_value_t = 10)]
    top_k: usize,
    #[arg(long)]
    channel: Option<String>,
    #[arg(long)]
    since: Option<chrono::DateTime<chrono::Utc>>,
    #[arg(long)]
    until: Option<chrono::DateTime<chrono::Utc>>,
  },
}

fn parse_severity(raw: &str) -> Option<DlqSeverity> {
  match raw {
    "low" => Some(DlqSeverity::Low),
    "medium" => Some(DlqSeverity::Medium),
    "high" => Some(DlqSeverity::High),
    "critical" => Some(DlqSeverity::Critical),
    _ => None,
  }
}

async fn run() -> i32 {
  let cli = Cli::parse();

  let config = match Config::from_env() {
    Ok(config) => config,
    Err(e) => {
      eprintln!("configuration error: {e}");
      return EXIT_CONFIG_ERROR;
    }
  };

  match cli.command {
    Command::RunDaily { channels } => {
      if channels.is_empty() {
        eprintln!("configuration error: --channels must not be empty");
        return EXIT_CONFIG_ERROR;
      }
      let timezone: chrono_tz::Tz = config.scheduler.timezone.parse().unwrap_or(chrono_tz::Europe::Amsterdam);

      let plan_result = if let Some(database_url) = &config.database_url {
        match db::get_pool(database_url).await {
          Ok(pool) => {
            let ledger = db::SqlxBudgetLedger::new(pool, timezone, config.budgets.transcription_daily_usd);
            hybrid_ingest_rust::scheduler::planner::plan_run(&config, &ledger, channels).await
          }
          Err(e) => {
            eprintln!("dependency unavailable: {e}");
            return EXIT_DEPENDENCY_UNAVAILABLE;
          }
        }
      } else {
        let ledger = hybrid_ingest_rust::budget_ledger::InMemoryBudgetLedger::new(
          timezone,
          config.budgets.transcription_daily_usd,
        );
        hybrid_ingest_rust::scheduler::planner::plan_run(&config, &ledger, channels).await
      };

      match plan_result {
        Ok(plan) => {
          println!("{}", serde_json::json!({"run_id": plan.run_id, "channels": plan.channels}));
          EXIT_SUCCESS
        }
        Err(e) => {
          eprintln!("dependency unavailable: {e}");
          EXIT_DEPENDENCY_UNAVAILABLE
        }
      }
    }

    Command::ReplayDlq { job_id } => {
      let result = if let Some(database_url) = &config.database_url {
        match db::get_pool(database_url).await {
          Ok(pool) => db::SqlxDeadLetterQueue::new(pool).replay(&job_id).await,
          Err(e) => {
            eprintln!("dependency unavailable: {e}");
            return EXIT_DEPENDENCY_UNAVAILABLE;
          }
        }
      } else {
        InMemoryDeadLetterQueue::new().replay(&job_id).await
      };

      match result {
        Ok(Some(inputs)) => {
          println!("{inputs}");
          EXIT_SUCCESS
        }
        Ok(None) => {
          eprintln!("no dead letter queue entry found for job_id {job_id}");
          EXIT_PARTIAL
        }
        Err(e) => {
          eprintln!("dependency unavailable: {e}");
          EXIT_DEPENDENCY_UNAVAILABLE
        }
      }
    }

    Command::QueryDlq { severity, job_type, since } => {
      let query = DlqQuery {
        job_type,
        severity: severity.as_deref().and_then(parse_severity),
        video_id: None,
        since,
        until: None,
        limit: 100,
      };

      let result = if let Some(database_url) = &config.database_url {
        match db::get_pool(database_url).await {
          Ok(pool) => db::SqlxDeadLetterQueue::new(pool).query(query).await,
          Err(e) => {
            eprintln!("dependency unavailable: {e}");
            return EXIT_DEPENDENCY_UNAVAILABLE;
          }
        }
      } else {
        InMemoryDeadLetterQueue::new().query(query).await
      };

      match result {
        Ok(entries) => {
          println!("{}", serde_json::to_string_pretty(&entries).unwrap_or_default());
          EXIT_SUCCESS
        }
        Err(e) => {
          eprintln!("dependency unavailable: {e}");
          EXIT_DEPENDENCY_UNAVAILABLE
        }
      }
    }

    Command::Retrieve { query, top_k, channel, since, until } => {
      if query.trim().is_empty() {
        eprintln!("configuration error: --query must not be empty");
        return EXIT_CONFIG_ERROR;
      }
      let filters = RetrievalFilters {
        channel_id: channel,
        min_published_at: since,
        max_published_at: until,
      };
      let semantic = InMemorySemanticSink::default();
      let keyword = InMemoryKeywordSink::default();
      let structured = InMemoryStructuredSink::default();
      let sources = RetrievalSources {
        semantic: Some(&semantic),
        keyword: Some(&keyword),
        structured: Some(&structured),
      };

      let result = retrieve(
        &query,
        &filters,
        top_k,
        &sources,
        config.routing.mode,
        None,
        config.retrieval.per_source_timeout_ms,
        config.retrieval.rrf_k,
      )
      .await;

      let policy = Policy {
        allowed_channels: config.policy.allowed_channels.clone(),
        max_age_days: config.policy.max_age_days,
        sensitive_patterns: Vec::new(),
        mode: config.policy.mode,
      }
      .with_default_patterns();
      let (enforced, _audit) = hybrid_ingest_rust::retrieval::policy::enforce(result.chunks, &policy);

      println!(
        "{}",
        serde_json::json!({
          "strategy": result.routing.strategy,
          "results": enforced.len(),
        })
      );

      if result.no_sources_available {
        EXIT_PARTIAL
      } else {
        EXIT_SUCCESS
      }
    }
  }
}

#[tokio::main]
async fn main() {
  init_tracing();
  std::process::exit(run().await);
}
