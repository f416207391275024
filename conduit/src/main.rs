#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::io::Write;

use anyhow::Context;
use args::Args;
use clap::Parser;
use conduit_config::Config;
use conduit_core::RequestContext;
use conduit_engine::{Engine, RunResult};
use conduit_llm::{Delta, Message, MessageRequest, StreamEvent, SystemPrompt};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    conduit_telemetry::init(&config.telemetry, args.log_filter.as_deref())?;

    tracing::debug!(config_path = %args.config.display(), model = %args.model, "starting conduit");

    let engine = Engine::from_config(&config)?;

    let mut request = MessageRequest::new(&args.model, vec![Message::user(args.prompt.join(" "))]);
    request.system = args.system.as_deref().map(SystemPrompt::from);
    request.max_tokens = args.max_tokens;

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });
    let context = RequestContext::with_token(shutdown);

    match (args.run, args.stream) {
        (false, false) => {
            let response = engine.create_message(&request, &context).await?;
            tracing::debug!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "response received"
            );
            println!("{}", response.text());
        }
        (false, true) => {
            let mut events = engine.stream_message(&request, &context).await?;
            print_text(&mut events).await?;
        }
        (true, false) => {
            let result = engine.run(request, engine.run_options(), &context).await?;
            log_run(&result);
            println!("{}", result.text());
        }
        (true, true) => {
            let mut events = engine.run_stream(request, engine.run_options(), &context);
            print_text(&mut events).await?;
            log_run(&events.finish().await?);
        }
    }

    Ok(())
}

/// Write text deltas to stdout until the stream ends
async fn print_text(events: &mut (impl Stream<Item = StreamEvent> + Unpin)) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::ContentBlockDelta {
                delta: Delta::Text { text },
                ..
            } => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            StreamEvent::Error { kind, message } => {
                writeln!(stdout)?;
                anyhow::bail!("{kind}: {message}");
            }
            _ => {}
        }
    }

    writeln!(stdout).context("failed to write to stdout")?;
    Ok(())
}

fn log_run(result: &RunResult) {
    tracing::debug!(
        stop = %result.stop,
        turns = result.turns,
        tool_calls = result.tool_calls,
        input_tokens = result.usage.input_tokens,
        output_tokens = result.usage.output_tokens,
        "run finished"
    );
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received, cancelling");
}
