// src/sandbox/worker.rs — Worker process entry point (`koi-rlm sandbox-worker`)
//
// Reads one request from stdin, runs it, writes one response to stdout, exits.
// Stdout carries nothing but the response; diagnostics go to stderr.

use std::io::{Read, Write};

use anyhow::Context;

use super::engine::execute_request;
use super::protocol::{WorkerRequest, WorkerResponse};

pub fn run_worker() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading worker request from stdin")?;

    let response = match serde_json::from_str::<WorkerRequest>(&input) {
        Ok(request) => {
            tracing::debug!(
                code_chars = request.code.len(),
                bindings = request.namespace.len(),
                stubs = request.stubs.len(),
                "Worker executing request"
            );
            execute_request(&request)
        }
        Err(e) => WorkerResponse {
            success: false,
            error: Some(format!("Malformed worker request: {}", e)),
            ..Default::default()
        },
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &response).context("writing worker response")?;
    stdout.flush().context("flushing worker response")?;
    Ok(())
}
