//! Demo renderers for the tool names used in replay scripts.
//!
//! - `echo`: shows its arguments as JSON.
//! - `lookup`: resolves after `delay_ms` with a line about `q`.
//! - `progress`: streams `steps` updates, `delay_ms` apart.
//! - `fail`: fails with `reason`.

use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use segment_stream::prelude::*;
use serde_json::Value;

pub fn install(builder: PipelineBuilder) -> PipelineBuilder {
    builder
        .tool("echo", |call| Ok(Rendered::value(Node::json(call.args.clone()))))
        .tool("lookup", |call| {
            let query = string_arg(&call.args, "q")?;
            let delay = delay_arg(&call.args);
            Ok(Rendered::deferred(async move {
                tokio::time::sleep(delay).await;
                Ok(Node::text(format!("results for {query}")))
            }))
        })
        .tool("progress", |call| {
            let steps = call.args.get("steps").and_then(Value::as_u64).unwrap_or(3);
            let delay = delay_arg(&call.args);
            let updates = stream::iter(1..=steps).then(move |n| async move {
                tokio::time::sleep(delay).await;
                let node = Node::text(format!("step {n}/{steps}"));
                Ok::<_, RenderError>(if n == steps {
                    RenderStep::Done(node)
                } else {
                    RenderStep::Update(node)
                })
            });
            Ok(Rendered::stream(updates))
        })
        .tool("fail", |call| {
            let reason = string_arg(&call.args, "reason")
                .unwrap_or_else(|_| "renderer asked to fail".to_string());
            Ok(Rendered::deferred(async move { Err(RenderError::new(reason)) }))
        })
}

fn string_arg(args: &Value, key: &str) -> Result<String, RenderError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RenderError::new(format!("missing string argument `{key}`")))
}

fn delay_arg(args: &Value) -> Duration {
    Duration::from_millis(args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn replay(
        events: Vec<GenerationEvent>,
    ) -> (Result<GenerationOutput, StreamError>, DisplayState) {
        let run = install(PipelineBuilder::new())
            .start(stream_of(events))
            .expect("start");
        let mut display = run.display();
        let result = run.finish().await;
        (result, display.wait_sealed().await)
    }

    #[tokio::test]
    async fn demo_tools_render_in_order() {
        let (result, state) = replay(vec![
            GenerationEvent::tool_call("1", "lookup", json!({"q": "rust", "delay_ms": 20})),
            GenerationEvent::tool_call("2", "progress", json!({"steps": 2})),
            GenerationEvent::tool_call("3", "echo", json!({"k": true})),
            GenerationEvent::finish(),
        ])
        .await;
        result.expect("finish");
        assert_eq!(state.settled_order, vec![0, 1, 2]);
        assert_eq!(
            state.nodes(),
            vec![
                Node::text("results for rust"),
                Node::text("step 2/2"),
                Node::json(json!({"k": true})),
            ]
        );
    }

    #[tokio::test]
    async fn missing_argument_fails_the_run() {
        let (result, state) = replay(vec![
            GenerationEvent::tool_call("1", "lookup", json!({})),
            GenerationEvent::finish(),
        ])
        .await;
        let err = result.expect_err("fails");
        assert!(matches!(
            &err,
            StreamError::Render { segment: 0, message } if message.contains("`q`")
        ));
        assert_eq!(state.status, DisplayStatus::Failed(err));
    }

    #[tokio::test]
    async fn fail_tool_reports_its_reason() {
        let (result, _) = replay(vec![
            GenerationEvent::tool_call("1", "fail", json!({"reason": "nope"})),
            GenerationEvent::finish(),
        ])
        .await;
        assert!(matches!(result, Err(StreamError::Render { message, .. }) if message == "nope"));
    }
}
