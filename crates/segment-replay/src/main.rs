//! Replays a JSONL generation event script through the segment pipeline and
//! prints the display every time it changes.

mod renderers;
mod script;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt as _;
use segment_stream::prelude::*;
use segment_stream::init_observability;
use tracing::info;

use crate::script::ScriptSource;

/// Replays a recorded generation through the segment pipeline.
#[derive(Parser, Debug)]
#[command(name = "segment-replay", version, about)]
struct Cli {
    /// JSONL file with one generation event per line.
    script: PathBuf,

    /// Text shown until the first segment renders.
    #[arg(long, default_value = "thinking…")]
    placeholder: String,

    /// Delay between replayed events, in milliseconds.
    #[arg(long, env = "SEGMENT_REPLAY_STEP_DELAY_MS", default_value_t = 50)]
    step_delay_ms: u64,

    /// Print display snapshots as JSON arrays of nodes.
    #[arg(long)]
    json: bool,

    /// Also print the raw event branch to stderr.
    #[arg(long)]
    raw: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_observability();
    let cli = Cli::parse();

    let events = script::load_script(&cli.script)?;
    info!(path = %cli.script.display(), events = events.len(), "script loaded");
    let source = ScriptSource::new(events, Duration::from_millis(cli.step_delay_ms));

    let builder = PipelineBuilder::new()
        .initial(Node::text(cli.placeholder.clone()))
        .options(PipelineOptions::from_env()?)
        .on_segment(|segment| {
            eprintln!("segment {} closed ({})", segment.index(), segment.kind());
            Ok(())
        });
    let mut run = renderers::install(builder).start_source(Arc::new(source))?;
    info!(run_id = %run.run_id(), "replay started");

    let raw_printer = match run.take_raw_events() {
        Some(mut raw) if cli.raw => Some(tokio::spawn(async move {
            while let Some(item) = raw.next().await {
                match item {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("raw: {line}"),
                        Err(err) => eprintln!("raw: unprintable event: {err}"),
                    },
                    Err(failure) => eprintln!("raw: {failure}"),
                }
            }
        })),
        _ => None,
    };

    let mut display = run.display();
    let json = cli.json;
    let printer = tokio::spawn(async move {
        print_state(&display.current(), json);
        while let Some(state) = display.changed().await {
            print_state(&state, json);
        }
    });

    let result = run.finish().await;
    let _ = printer.await;
    if let Some(raw_printer) = raw_printer {
        let _ = raw_printer.await;
    }

    let output = result?;
    println!(
        "--- {} segment(s), finish_reason={}",
        output.segment_count(),
        output.finish_reason.as_deref().unwrap_or("-")
    );
    if let Some(usage) = output.usage {
        println!(
            "usage: {} in / {} out ({} total)",
            usage.input_tokens,
            usage.output_tokens,
            usage.total_tokens()
        );
    }
    Ok(())
}

fn print_state(state: &DisplayState, json: bool) {
    if json {
        match serde_json::to_string(&state.nodes()) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("display not serializable: {err}"),
        }
        return;
    }
    let status = match &state.status {
        DisplayStatus::Streaming => "streaming".to_string(),
        DisplayStatus::Done => "done".to_string(),
        DisplayStatus::Failed(err) => format!("failed: {err}"),
    };
    println!("[{status}] settled={:?}", state.settled_order);
    for node in state.nodes() {
        println!("  {}", describe(&node));
    }
}

fn describe(node: &Node) -> String {
    match node {
        Node::Empty => "(empty)".into(),
        Node::Text { value } => value.clone(),
        Node::Json { value } => value.to_string(),
        Node::ToolNotFound { name } => format!("(no renderer for tool `{name}`)"),
        Node::Stack { children } => children
            .iter()
            .map(describe)
            .collect::<Vec<_>>()
            .join(" | "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn describe_flattens_stacks() {
        let node = Node::Stack {
            children: vec![
                Node::text("a"),
                Node::json(json!({"k": 1})),
                Node::ToolNotFound {
                    name: "x".into(),
                },
            ],
        };
        assert_eq!(describe(&node), "a | {\"k\":1} | (no renderer for tool `x`)");
    }

    #[test]
    fn cli_reads_flags() {
        let cli = Cli::try_parse_from([
            "segment-replay",
            "demo.jsonl",
            "--step-delay-ms",
            "5",
            "--json",
        ])
        .expect("parse");
        assert_eq!(cli.script, PathBuf::from("demo.jsonl"));
        assert_eq!(cli.step_delay_ms, 5);
        assert!(cli.json);
        assert!(!cli.raw);
    }
}
