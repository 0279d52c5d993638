//! Run reporting, as readable text or as one JSON event per line.

use std::time::Instant;

use buildtree_core::api::{BuildState, TaskHandle, TaskResourceState};
use chrono::Local;
use serde::Serialize;

use crate::commands::cli::OutputFormat;

#[derive(Debug, Clone, Serialize)]
pub struct JsonlEvent {
    pub v: i32,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

pub struct Reporter {
    format: OutputFormat,
    run_id: String,
    started: Instant,
}

impl Reporter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            run_id: uuid::Uuid::new_v4().to_string(),
            started: Instant::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn event(&self, event_type: &str) -> JsonlEvent {
        JsonlEvent {
            v: 1,
            event_type: event_type.to_string(),
            ts: Local::now().to_rfc3339(),
            run_id: self.run_id.clone(),
            build: None,
            task: None,
            error: None,
            code: None,
            metadata: None,
        }
    }

    fn emit(&self, event: &JsonlEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
        }
    }

    pub fn run_start(&self, command: &str, scenario: &str) {
        match self.format {
            OutputFormat::Jsonl => {
                let mut event = self.event("run.start");
                event.metadata = Some(serde_json::json!({
                    "command": command,
                    "scenario": scenario,
                }));
                self.emit(&event);
            }
            OutputFormat::Text => println!("▶ {command} {scenario}"),
        }
    }

    pub fn build_registered(&self, build: &BuildState) {
        match self.format {
            OutputFormat::Jsonl => {
                let mut event = self.event("build.registered");
                event.build = Some(build.identity().path().to_string());
                event.metadata = Some(serde_json::json!({
                    "kind": format!("{:?}", build.kind()),
                    "dir": build.definition().root_dir().display().to_string(),
                    "plugin": build.definition().is_plugin_build(),
                }));
                self.emit(&event);
            }
            OutputFormat::Text => println!(
                "  {} ({:?}) at {}",
                build.identity(),
                build.kind(),
                build.definition().root_dir().display()
            ),
        }
    }

    pub fn task_scheduled(&self, task: &TaskHandle) {
        match self.format {
            OutputFormat::Jsonl => {
                let mut event = self.event("task.scheduled");
                event.build = Some(task.build().path().to_string());
                event.task = Some(task.identity_path());
                self.emit(&event);
            }
            OutputFormat::Text => println!("  ⏳ {task}"),
        }
    }

    pub fn task_end(&self, task: &TaskHandle, state: TaskResourceState) {
        match self.format {
            OutputFormat::Jsonl => {
                let mut event = self.event("task.end");
                event.build = Some(task.build().path().to_string());
                event.task = Some(task.identity_path());
                event.metadata = Some(serde_json::json!({ "state": state }));
                self.emit(&event);
            }
            OutputFormat::Text => {
                let icon = match state {
                    TaskResourceState::Success => "✅",
                    TaskResourceState::Failed => "❌",
                    TaskResourceState::Waiting => "…",
                };
                println!("  {icon} {task}");
            }
        }
    }

    pub fn failure(&self, failure: &anyhow::Error) {
        match self.format {
            OutputFormat::Jsonl => {
                let mut event = self.event("failure");
                event.error = Some(format!("{failure:#}"));
                self.emit(&event);
            }
            OutputFormat::Text => println!("  ✖ {failure:#}"),
        }
    }

    pub fn run_end(&self, code: i32, failures: usize) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        match self.format {
            OutputFormat::Jsonl => {
                let mut event = self.event("run.end");
                event.code = Some(code);
                event.metadata = Some(serde_json::json!({
                    "duration_ms": duration_ms,
                    "failures": failures,
                    "success": code == 0,
                }));
                self.emit(&event);
            }
            OutputFormat::Text => {
                if failures == 0 {
                    println!("\n✅ BUILD SUCCESSFUL in {duration_ms}ms");
                } else {
                    println!("\n❌ BUILD FAILED in {duration_ms}ms ({failures} failures)");
                }
            }
        }
    }
}
