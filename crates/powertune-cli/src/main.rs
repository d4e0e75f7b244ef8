use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use powertune_runner::config::{CONFIG_TEMPLATE, DEFAULT_CONFIG_PATH};
use powertune_runner::{
    FileTokenStore, HttpBackend, MemoryTokenStore, OperationType, PollEvent, TokenStore,
    TunerConfig, TunerError, TunerSession, TuningResult, TuningSummary,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "powertune", version, about = "Launch and track Lambda power tuning runs")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Keep the execution token in memory only.
    #[arg(long, global = true)]
    no_persist: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    #[value(name = "balanced")]
    Balanced,
    #[value(name = "cost")]
    Cost,
    #[value(name = "speed")]
    Speed,
}

impl From<StrategyArg> for powertune_runner::Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Balanced => powertune_runner::Strategy::Balanced,
            StrategyArg::Cost => powertune_runner::Strategy::Cost,
            StrategyArg::Speed => powertune_runner::Strategy::Speed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Init {
        #[arg(long)]
        force: bool,
    },
    Run {
        #[arg(long)]
        arn: String,
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Overrides the weight implied by --strategy.
        #[arg(long)]
        balanced_weight: Option<f64>,
        #[arg(long)]
        num: Option<u32>,
        /// Comma separated memory sizes; omit to try every size.
        #[arg(long)]
        power_values: Option<String>,
        /// JSON payload for each invocation.
        #[arg(long)]
        payload: Option<String>,
        #[arg(long)]
        parallel: bool,
        #[arg(long)]
        json: bool,
    },
    Resume {
        #[arg(long)]
        execution_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Status {
        #[arg(long)]
        execution_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Reset {
        #[arg(long)]
        json: bool,
    },
    PowerValues {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(&cli.config, cli.no_persist, cli.command, json_mode);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<TunerError>()
                    .map(TunerError::code)
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("POWERTUNE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(
    config_path: &Path,
    no_persist: bool,
    command: Commands,
    json_mode: bool,
) -> Result<Option<Value>> {
    match command {
        Commands::Init { force } => {
            if !force && config_path.exists() {
                return Err(anyhow::anyhow!(
                    "config already exists (use --force): {}",
                    config_path.display()
                ));
            }
            if let Some(parent) = config_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(config_path, CONFIG_TEMPLATE)?;
            println!("wrote: {}", config_path.display());
            println!(
                "next: edit {} and set endpoint (or export POWERTUNE_ENDPOINT)",
                config_path.display()
            );
            println!("next: powertune run --arn <lambda-function-arn>");
        }
        Commands::Run {
            arn,
            strategy,
            balanced_weight,
            num,
            power_values,
            payload,
            parallel,
            json,
        } => {
            let mut session = build_session(config_path, no_persist, json_mode)?;
            let draft = session.draft_mut();
            draft.set_operation_type(OperationType::NewTuner);
            draft.set_lambda_arn(arn);
            if let Some(strategy) = strategy {
                draft.set_strategy(strategy.into());
            }
            if balanced_weight.is_some() {
                draft.set_balanced_weight(balanced_weight);
            }
            if num.is_some() {
                draft.set_num(num);
            }
            if let Some(raw) = power_values {
                draft.set_power_values(parse_power_values(&raw)?);
                draft.set_use_custom(true);
            }
            if let Some(payload) = payload {
                draft.set_include_payload(true);
                draft.set_payload(payload);
            }
            draft.set_parallel_invocation(parallel);
            return finish_tuning(&mut session, "run", json);
        }
        Commands::Resume { execution_id, json } => {
            let mut session = build_session(config_path, no_persist, json_mode)?;
            let draft = session.draft_mut();
            draft.set_operation_type(OperationType::ExistingExecution);
            if let Some(id) = execution_id {
                draft.set_execution_id(id);
            }
            return finish_tuning(&mut session, "resume", json);
        }
        Commands::Status { execution_id, json } => {
            let mut session = build_session(config_path, no_persist, json_mode)?;
            if let Some(id) = execution_id {
                session.draft_mut().set_execution_id(id);
            }
            let response = session.fetch_status()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "execution_token": session.draft().execution_id(),
                    "status": response.status.as_str(),
                    "terminal": response.status.is_terminal(),
                    "output": response.output,
                })));
            }
            println!("execution_token: {}", session.draft().execution_id());
            println!("status: {}", response.status);
            if let Some(output) = &response.output {
                println!("output: {}", output);
            }
        }
        Commands::Reset { json } => {
            let mut store = FileTokenStore::new(token_path_for(config_path)?);
            store.clear()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "reset",
                    "token_path": store.path().display().to_string(),
                })));
            }
            println!("cleared: {}", store.path().display());
        }
        Commands::PowerValues { json } => {
            let values = powertune_runner::power_values();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "power-values",
                    "power_values": values,
                })));
            }
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            println!("{}", rendered.join(","));
        }
    }
    Ok(None)
}

fn build_session(config_path: &Path, no_persist: bool, quiet: bool) -> Result<TunerSession> {
    let config = TunerConfig::load(config_path)?;
    let backend = HttpBackend::new(&config)?;
    let store: Box<dyn TokenStore> = if no_persist {
        Box::new(MemoryTokenStore::new())
    } else {
        Box::new(FileTokenStore::new(&config.token_path))
    };
    let mut session = TunerSession::new(Box::new(backend), store, config.schedule())?;
    if !quiet {
        session.on_poll_event(print_poll_event);
    }
    Ok(session)
}

fn print_poll_event(event: &PollEvent) {
    match &event.status {
        Some(status) => eprintln!("attempt {}/{}: {}", event.attempt, event.max_attempts, status),
        None => eprintln!("attempt {}/{}: query failed", event.attempt, event.max_attempts),
    }
}

fn finish_tuning(session: &mut TunerSession, command: &str, json: bool) -> Result<Option<Value>> {
    if session.form_disabled() {
        let err = match session.draft().operation_type() {
            OperationType::NewTuner => session
                .draft()
                .validate()
                .err()
                .map(TunerError::Validation)
                .unwrap_or_else(|| TunerError::Config("form is not ready".to_string())),
            OperationType::ExistingExecution => TunerError::Validation(
                powertune_runner::ValidationErrors::single(
                    "executionId",
                    "required (pass --execution-id or run a tuning first)",
                ),
            ),
        };
        return Err(err.into());
    }
    if !json {
        eprintln!(
            "{} ({})...",
            session.form_label(),
            session.draft().operation_type().label()
        );
    }
    let result = session.start_tuning()?;
    let token = session.state().execution_token.clone();
    let url = session
        .state()
        .visualisation_url
        .as_ref()
        .map(|u| u.to_string())
        .unwrap_or_default();
    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": command,
            "execution_token": token,
            "attempts": session.last_attempts(),
            "summary": TuningSummary::from_result(&result),
            "result": result_to_json(&result),
            "visualization": url,
        })));
    }
    println!("execution_token: {}", token);
    print_summary(&TuningSummary::from_result(&result));
    println!("{}: {}", session.vis_label(), url);
    Ok(None)
}

fn result_to_json(result: &TuningResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}

fn print_summary(summary: &TuningSummary) {
    for (label, value) in summary.lines() {
        println!("{}: {}", label, value);
    }
}

fn parse_power_values(raw: &str) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let value: u32 = part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid --power-values entry '{}': expected MB", part))?;
        values.push(value);
    }
    if values.is_empty() {
        return Err(anyhow::anyhow!("--power-values needs at least one value"));
    }
    Ok(values)
}

/// `reset` must work even before an endpoint is configured.
fn token_path_for(config_path: &Path) -> Result<PathBuf> {
    if !config_path.exists() {
        return Ok(TunerConfig::default().token_path);
    }
    let text = std::fs::read_to_string(config_path)?;
    Ok(TunerConfig::from_yaml(&text)?.token_path)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Resume { json, .. }
        | Commands::Status { json, .. }
        | Commands::Reset { json, .. }
        | Commands::PowerValues { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}
