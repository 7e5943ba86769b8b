//! CLI subcommand handlers

use std::time::Duration;

use anyhow::{bail, Result};
use colored::Colorize;
use strata::{
    CodeExecutor, Engine, ModeSelection, PersistentSandbox, Request, SandboxConfig, StrataConfig,
};
use tokio::sync::mpsc;

use crate::output::OutputHandler;

pub struct AskOptions {
    pub mode: Option<String>,
    pub stream: bool,
    pub conversation: Option<String>,
    pub json: bool,
}

/// Build a request from the command line flags
pub fn build_request(query: &str, mode: Option<&str>, conversation: Option<&str>) -> Request {
    let mut request = Request::new(query);
    if let Some(mode) = mode {
        request = request.with_mode(mode);
    }
    if let Some(conversation) = conversation {
        request = request.with_conversation(conversation);
    }
    request
}

/// Process one query and print the response
pub async fn ask(engine: &Engine, query: &str, options: AskOptions) -> Result<()> {
    let output = OutputHandler::new(true, !options.json);
    let request = build_request(
        query,
        options.mode.as_deref(),
        options.conversation.as_deref(),
    );
    tracing::debug!(trace_id = %request.trace_id, stream = options.stream, "[CLI] Submitting request");

    let response = if options.stream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            let output = OutputHandler::new(false, false);
            while let Some(event) = rx.recv().await {
                output.print_event(&event);
            }
        });
        let response = engine.process_streaming(request, tx).await;
        // The sender is gone once processing returns, so the printer drains and exits
        if let Err(e) = printer.await {
            output.print_warning(&format!("Event printer stopped: {}", e));
        }
        response
    } else {
        engine.process(request).await
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        output.print_outcome(&response);
    }

    if !response.is_success() {
        bail!("request {} failed", response.trace_id);
    }
    Ok(())
}

/// Show how a query would be routed
pub fn route(engine: &Engine, query: &str) {
    let output = OutputHandler::new(false, false);
    output.print_header("Routing Decision");
    output.print_routing(&engine.route(query, &ModeSelection::Auto));
}

/// List every registered mode
pub fn list_modes(engine: &Engine) {
    let output = OutputHandler::new(false, false);
    output.print_header("Processing Modes");
    let registry = engine.router().registry();
    output.print_modes_table(registry.modes(), registry.default_mode().name());
}

/// Run `print(1 + 1)` in the configured sandbox
pub async fn sandbox_check(config: StrataConfig, local: bool) -> Result<()> {
    let output = OutputHandler::new(false, false);
    output.print_header("Sandbox Check");

    let sandbox_config = if local {
        SandboxConfig::local(config.sandbox.python.clone())
    } else {
        config.sandbox.clone()
    };
    println!(
        "  {} {:?}",
        "Runtime:".dimmed(),
        sandbox_config.runtime
    );

    let sandbox = PersistentSandbox::new(sandbox_config);
    if !sandbox.is_available().await {
        output.print_error("Sandbox runtime not found on PATH");
        bail!("sandbox unavailable");
    }

    let result = sandbox
        .execute("print(1 + 1)", Duration::from_secs(30))
        .await;
    sandbox.shutdown().await;

    match result {
        Ok(run) if run.stdout.trim() == "2" => {
            output.print_success(&format!(
                "Sandbox answered in {} ms{}",
                run.elapsed.as_millis(),
                if run.degraded { " (degraded)" } else { "" }
            ));
            Ok(())
        }
        Ok(run) => {
            output.print_error(&format!(
                "Unexpected output: {:?}{}",
                run.stdout,
                run.error.map(|e| format!("\n{}", e)).unwrap_or_default()
            ));
            bail!("sandbox returned unexpected output");
        }
        Err(e) => {
            output.print_error(&format!("Sandbox failed: {}", e));
            Err(e.into())
        }
    }
}
