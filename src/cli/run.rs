// src/cli/run.rs — `koi-rlm run`: one session against a file

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;

use super::RunArgs;
use crate::core::orchestrator::Session;
use crate::core::types::SessionResult;
use crate::infra::config::RlmConfig;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::retry::{RetryConfig, RetryProvider};
use crate::provider::ModelProvider;

/// Run a session and print the outcome. Returns whether an answer was reached.
pub async fn run_session(args: RunArgs, mut config: RlmConfig) -> anyhow::Result<bool> {
    if let Some(budget) = args.budget {
        config.max_session_budget_usd = budget;
    }
    if args.trace {
        config.trace_enabled = true;
    }

    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading context file {}", args.file))?;
    let task = match args.task {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading task from stdin")?;
            buf.trim().to_string()
        }
    };
    if task.is_empty() {
        anyhow::bail!("no task given; pass --task or pipe it on stdin");
    }

    let client: Arc<dyn ModelProvider> = Arc::new(
        AnthropicProvider::from_env().context("ANTHROPIC_API_KEY is not set")?,
    );
    let provider: Arc<dyn ModelProvider> = Arc::new(RetryProvider::with_config(
        client,
        RetryConfig {
            max_retries: config.max_retries,
            ..Default::default()
        },
    ));

    let mut session = Session::new(config, provider)?;
    let meta = if args.code {
        session.load_code_context(&content, args.language.as_deref())?
    } else {
        session.load_context(&content)?
    };

    if !args.json {
        eprintln!("[context] {} | {}", args.file, meta.describe());
        eprintln!("[run] {}", truncate_task(&task, 60));
    }

    let result = session.run(&task, args.max_turns).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(result.success)
}

fn print_result(result: &SessionResult) {
    match &result.answer {
        Some(answer) => println!("{}", answer),
        None => eprintln!("No answer ({}).", result.state),
    }
    if let Some(err) = &result.error {
        eprintln!("  error: {}", err);
    }
    eprintln!("  {} turn(s) · {}", result.turns, result.budget);
    if let Some(trace) = &result.trace {
        for event in trace {
            eprintln!("  [{}] {}", event.timestamp.format("%H:%M:%S%.3f"), event.kind.name());
        }
    }
}

fn truncate_task(task: &str, max: usize) -> String {
    let first_line = task.lines().next().unwrap_or(task);
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_task() {
        assert_eq!(truncate_task("short", 60), "short");
        assert_eq!(truncate_task("first\nsecond", 60), "first");
        assert_eq!(truncate_task("abcdefgh", 3), "abc...");
    }
}
