//! Stage profiling for a single pipeline run.
//!
//! A [`RunContext`] is created once per run and handed to each stage by
//! reference. Stages open a [`ScopeTimer`] with [`RunContext::scope`]; the
//! event is recorded when the guard drops, so stages that bail out with `?`
//! still show up in the trace. The events are only diagnostic and are
//! drained once at the end into a Chrome tracing file.

use crate::error::Result;
use crate::json::write_json;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// One completed scope, with times relative to the run start.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEvent {
    pub name: String,
    pub thread: String,
    pub begin: Duration,
    pub end: Duration,
}

impl ProfileEvent {
    pub fn elapsed(&self) -> Duration {
        self.end.saturating_sub(self.begin)
    }
}

#[derive(Debug, Serialize)]
struct TraceEvent<'a> {
    name: &'a str,
    ph: &'static str,
    ts: f64,
    tid: &'a str,
    pid: u32,
}

#[derive(Debug, Serialize)]
struct Trace<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<TraceEvent<'a>>,
}

/// Per-run collector of profiling events.
#[derive(Debug)]
pub struct RunContext {
    t0: Instant,
    events: Mutex<Vec<ProfileEvent>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            t0: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Start timing a named scope. The event is recorded when the guard drops.
    pub fn scope(&self, name: impl Into<String>) -> ScopeTimer<'_> {
        ScopeTimer {
            ctx: self,
            name: name.into(),
            start: Instant::now(),
        }
    }

    fn record(&self, event: ProfileEvent) {
        // A poisoned lock only means another scope panicked; keep collecting.
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event);
    }

    /// Snapshot of the recorded events, in completion order.
    pub fn events(&self) -> Vec<ProfileEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drain all events into a Chrome tracing JSON file.
    ///
    /// Open `chrome://tracing` and load the file to inspect it.
    pub fn export_chrome_trace(&self, path: &Path) -> Result<usize> {
        let events = std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()));

        let mut trace_events = Vec::with_capacity(events.len() * 2);
        for event in &events {
            trace_events.push(TraceEvent {
                name: &event.name,
                ph: "B",
                ts: event.begin.as_secs_f64() * 1e6,
                tid: &event.thread,
                pid: 0,
            });
            trace_events.push(TraceEvent {
                name: &event.name,
                ph: "E",
                ts: event.end.as_secs_f64() * 1e6,
                tid: &event.thread,
                pid: 0,
            });
        }

        write_json(path, &Trace { trace_events }, false)?;
        info!(
            path = %path.display(),
            "Profiling trace written; load it in chrome://tracing"
        );
        Ok(events.len())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`RunContext::scope`].
#[must_use = "the scope is recorded when the timer is dropped"]
pub struct ScopeTimer<'a> {
    ctx: &'a RunContext,
    name: String,
    start: Instant,
}

impl ScopeTimer<'_> {
    /// Time elapsed since the scope was opened.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopeTimer<'_> {
    fn drop(&mut self) {
        let end = Instant::now();
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        info!("{} took {:.3}s", self.name, (end - self.start).as_secs_f64());
        self.ctx.record(ProfileEvent {
            name: std::mem::take(&mut self.name),
            thread,
            begin: self.start.duration_since(self.ctx.t0),
            end: end.duration_since(self.ctx.t0),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_call() -> std::result::Result<(), String> {
        Err("engine exploded".to_string())
    }

    fn failing_stage(ctx: &RunContext) -> std::result::Result<(), String> {
        let _timer = ctx.scope("failing_stage");
        engine_call()?;
        Ok(())
    }

    #[test]
    fn test_scope_records_on_drop() {
        let ctx = RunContext::new();
        {
            let _outer = ctx.scope("outer");
            let _inner = ctx.scope("inner");
        }
        let events = ctx.events();
        assert_eq!(events.len(), 2);
        // Inner drops first.
        assert_eq!(events[0].name, "inner");
        assert_eq!(events[1].name, "outer");
        assert!(events[1].begin <= events[0].begin);
        assert!(events[1].end >= events[0].end);
    }

    #[test]
    fn test_scope_recorded_on_error_path() {
        let ctx = RunContext::new();
        assert!(failing_stage(&ctx).is_err());
        let events = ctx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "failing_stage");
    }

    #[test]
    fn test_export_drains_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiling.json");
        let ctx = RunContext::new();
        drop(ctx.scope("train"));
        drop(ctx.scope("render"));

        assert_eq!(ctx.export_chrome_trace(&path).unwrap(), 2);
        assert!(ctx.events().is_empty());

        let trace: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let events = trace["traceEvents"].as_array().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["name"], "train");
        assert_eq!(events[0]["ph"], "B");
        assert_eq!(events[1]["ph"], "E");
        assert_eq!(events[2]["name"], "render");
    }
}
