//! CLI entry point for replaying evaluation scenarios against a live (or
//! judge) LM provider and reporting deterministic metrics, in the same
//! clap-derive shape the wider example pack uses for its own CLIs.

use clap::Parser;
use incident_ops_core::clients::openai::OpenAIClient;
use incident_ops_core::config::IncidentOpsConfig;
use incident_ops_core::client_wrapper::ClientWrapper;
use incident_ops_core::eval::judge::judge_turn;
use incident_ops_core::eval::metrics::compute_metrics;
use incident_ops_core::eval::runner::run_scenario;
use incident_ops_core::eval::scenario::builtin_scenarios;
use incident_ops_core::telemetry::LoggingRuntimeEventHandler;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "eval_harness", about = "Replay incident-ops evaluation scenarios")]
struct Args {
    /// Scenario name to run; omit to run every built-in scenario.
    #[arg(long)]
    scenario: Option<String>,

    /// Number of times to replay each scenario.
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Model used for the Suggestion Engine and context agent calls.
    #[arg(long, default_value = "gpt-5-mini")]
    model: String,

    /// Model used for the LM-as-judge grading pass.
    #[arg(long, default_value = "gpt-5-mini")]
    judge_model: String,

    /// Optional path to an override system prompt file (unused by built-in
    /// scenarios, reserved for custom scenario authoring).
    #[arg(long)]
    prompt_file: Option<String>,

    /// Write the full JSON result artifact to this path.
    #[arg(long)]
    out: Option<String>,

    /// Skip the LM-as-judge grading pass and report only deterministic metrics.
    #[arg(long, default_value_t = false)]
    skip_judge: bool,

    /// Reasoning-effort hint forwarded to the provider, logged only.
    #[arg(long, default_value = "medium")]
    reasoning_effort: String,

    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("OPENAI_API_KEY is not set");
            return ExitCode::from(2);
        }
    };

    let client: Arc<dyn ClientWrapper> = Arc::new(OpenAIClient::new_with_model_string(&api_key, &args.model));
    let judge_client: Arc<dyn ClientWrapper> =
        Arc::new(OpenAIClient::new_with_model_string(&api_key, &args.judge_model));
    let config = IncidentOpsConfig::default();
    let handler = Arc::new(LoggingRuntimeEventHandler);

    let scenarios: Vec<_> = builtin_scenarios()
        .into_iter()
        .filter(|s| args.scenario.as_deref().map_or(true, |name| s.name == name))
        .collect();

    if scenarios.is_empty() {
        eprintln!("no scenario named {:?}", args.scenario);
        return ExitCode::from(2);
    }

    let mut results = Vec::new();
    for scenario in &scenarios {
        for run in 0..args.runs {
            if args.verbose {
                eprintln!("running {} (attempt {}/{})", scenario.name, run + 1, args.runs);
            }
            match run_scenario(scenario, client.clone(), &config, handler.clone()).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    eprintln!("scenario {} failed: {}", scenario.name, err);
                    return ExitCode::from(2);
                }
            }
        }
    }

    let report = compute_metrics(&results);
    println!(
        "scenario_pass_rate={:.2} duplicate_suggestion_rate={:.2} mean_suggestions_per_turn={:.2} zero_suggestion_turn_rate={:.2}",
        report.scenario_pass_rate,
        report.duplicate_suggestion_rate,
        report.mean_suggestions_per_turn,
        report.zero_suggestion_turn_rate,
    );

    if !args.skip_judge {
        for result in &results {
            for turn in &result.turns {
                if !turn.triggered {
                    continue;
                }
                if let Ok(verdict) = judge_turn(judge_client.as_ref(), &result.scenario_name, turn).await {
                    if args.verbose {
                        eprintln!(
                            "judge[{} turn {}]: score={:.2} rationale={}",
                            result.scenario_name, turn.turn_index, verdict.score, verdict.rationale
                        );
                    }
                }
            }
        }
    }

    if let Some(path) = &args.out {
        let artifact = serde_json::json!({
            "schema_version": 3,
            "scenario_pass_rate": report.scenario_pass_rate,
            "duplicate_suggestion_rate": report.duplicate_suggestion_rate,
            "mean_suggestions_per_turn": report.mean_suggestions_per_turn,
            "zero_suggestion_turn_rate": report.zero_suggestion_turn_rate,
            "scenarios": results.iter().map(|r| r.scenario_name.clone()).collect::<Vec<_>>(),
        });
        if let Err(err) = std::fs::write(path, artifact.to_string()) {
            eprintln!("failed to write artifact: {}", err);
            return ExitCode::from(2);
        }
    }

    if results.iter().all(|r| r.passed()) {
        ExitCode::from(0)
    } else {
        ExitCode::from(1)
    }
}
