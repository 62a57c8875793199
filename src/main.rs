use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tracegrade::agent::sqlite::SqliteAgentDirectory;
use tracegrade::agent::{Agent, AgentDirectory};
use tracegrade::config::EvalConfig;
use tracegrade::consts::{AUTHOR, DEFAULT_TRACE_TAKE, REPO, default_db_path};
use tracegrade::grader::openai::OpenAiGradingService;
use tracegrade::grader::{EvalClient, GradingBackend};
use tracegrade::runner::{AgentRunner, RunRequest};
use tracegrade::synth::anthropic::AnthropicSynthesizer;
use tracegrade::synth::simulated::SimulatedSynthesizer;
use tracegrade::synth::{ChatMessage, Synthesizer};
use tracegrade::trace::sqlite::SqliteTraceStore;
use tracegrade::trace::{TraceSelector, TraceStore};

#[derive(Debug, Clone, ValueEnum)]
enum SynthesizerKind {
    Simulated,
    Anthropic,
}

#[derive(Parser)]
#[command(
    name = "tracegrade",
    version,
    author = AUTHOR,
    about = "Run agents, trace every attempt, grade the results.",
    after_help = REPO
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database path (use :memory: for ephemeral)
    #[arg(short, long)]
    db: Option<String>,

    /// Log at debug level
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the agents known to the runner
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Run an agent once and evaluate the result
    Run {
        agent_id: String,

        /// Single user input
        #[arg(short, long)]
        input: Option<String>,

        /// Prior conversation turn as role:content (repeatable)
        #[arg(short, long = "message")]
        messages: Vec<String>,

        /// Who writes the agent's reply
        #[arg(short, long, value_enum, default_value_t = SynthesizerKind::Simulated)]
        synthesizer: SynthesizerKind,

        /// Reuse one of the agent's traces instead of creating a new one
        #[arg(long)]
        trace_id: Option<String>,
    },
    /// List an agent's most recent traces
    Traces {
        agent_id: String,

        #[arg(short, long, default_value_t = DEFAULT_TRACE_TAKE)]
        take: usize,
    },
    /// Evaluate an existing trace
    Eval {
        agent_id: String,

        #[arg(long)]
        trace_id: Option<String>,

        #[arg(long)]
        run_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Register or replace an agent
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        area: Option<String>,
        #[arg(long)]
        instructions: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let db_path = match cli.db {
        Some(path) => path,
        None => {
            let path = default_db_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            path.to_string_lossy().into_owned()
        }
    };

    let agents = Arc::new(SqliteAgentDirectory::open(&db_path)?);
    let store: Arc<dyn TraceStore> = Arc::new(SqliteTraceStore::open(&db_path)?);

    match cli.command {
        Command::Agent {
            action:
                AgentAction::Add {
                    id,
                    name,
                    area,
                    instructions,
                    model,
                },
        } => {
            let agent = Agent {
                area,
                instructions,
                model,
                ..Agent::new(id, name)
            };
            agents.upsert(&agent)?;
            print_json(&agent)
        }
        Command::Run {
            agent_id,
            input,
            messages,
            synthesizer,
            trace_id,
        } => {
            let messages = messages
                .iter()
                .map(|m| parse_message(m))
                .collect::<Result<Vec<_>>>()?;
            let synthesizer = build_synthesizer(synthesizer)?;
            let runner = build_runner(agents, store, synthesizer)?;
            let request = RunRequest {
                input,
                messages,
                metadata: None,
            };
            let response = match trace_id {
                Some(trace_id) => runner.rerun(&agent_id, &trace_id, request).await?,
                None => runner.run(&agent_id, request).await?,
            };
            print_json(&response)
        }
        Command::Traces { agent_id, take } => {
            let runner = build_runner(agents, store, Arc::new(SimulatedSynthesizer))?;
            let traces = runner.list_traces(&agent_id, take).await?;
            print_json(&traces)
        }
        Command::Eval {
            agent_id,
            trace_id,
            run_id,
        } => {
            let runner = build_runner(agents, store, Arc::new(SimulatedSynthesizer))?;
            let report = runner
                .evaluate(&agent_id, &TraceSelector { trace_id, run_id })
                .await?;
            print_json(&report)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("TRACEGRADE_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Composition root: the only place the environment is read.
fn build_runner(
    agents: Arc<SqliteAgentDirectory>,
    store: Arc<dyn TraceStore>,
    synthesizer: Arc<dyn Synthesizer>,
) -> Result<AgentRunner> {
    let config = EvalConfig::from_env();
    let backend = match &config.api_key {
        Some(key) => GradingBackend::enabled(OpenAiGradingService::new(
            key.clone(),
            &config.base_url,
            config.poll_timeout,
        )?),
        None => GradingBackend::Disabled,
    };
    if !backend.is_enabled() {
        info!("OPENAI_API_KEY is not set, runs will not be evaluated");
    }
    let agents: Arc<dyn AgentDirectory> = agents;
    let evaluator = Arc::new(EvalClient::new(
        backend,
        &config,
        Arc::clone(&store),
        Arc::clone(&agents),
    ));
    Ok(AgentRunner::new(agents, synthesizer, store, evaluator))
}

fn build_synthesizer(kind: SynthesizerKind) -> Result<Arc<dyn Synthesizer>> {
    Ok(match kind {
        SynthesizerKind::Simulated => Arc::new(SimulatedSynthesizer),
        SynthesizerKind::Anthropic => {
            let key = std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .context("ANTHROPIC_API_KEY is not set")?;
            Arc::new(AnthropicSynthesizer::new(key, None))
        }
    })
}

fn parse_message(raw: &str) -> Result<ChatMessage> {
    let Some((role, content)) = raw.split_once(':') else {
        bail!("message must look like role:content, got {raw:?}");
    };
    Ok(ChatMessage::new(role.parse()?, content.trim()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
