//! # JSON Reporting Module / JSON 报告模块
//!
//! Collects the run and writes a single JSON document when it ends:
//! `{ stats, tests, pending, failures, passes }`. Failed hooks appear under
//! `failures` only, since they never reach `tests`.
//!
//! 收集整个运行过程，并在结束时写出单个 JSON 文档：
//! `{ stats, tests, pending, failures, passes }`。失败的钩子只出现在 `failures` 中。

use std::collections::HashMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::core::errors::TestError;
use crate::core::events::{Event, EventListener, RunnableInfo};
use crate::core::runnable::Speed;
use crate::core::stats::{Stats, StatsCollector};
use crate::core::suite::RunnableId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonError {
    pub code: &'static str,
    pub message: String,
}

impl From<&TestError> for JsonError {
    fn from(error: &TestError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonTest {
    pub title: String,
    pub full_title: String,
    pub file: Option<String>,
    pub duration_ms: Option<u64>,
    pub current_retry: u32,
    pub speed: Option<Speed>,
    pub err: Option<JsonError>,
}

impl JsonTest {
    fn new(info: &RunnableInfo, err: Option<&TestError>) -> Self {
        Self {
            title: info.title.clone(),
            full_title: info.full_title.clone(),
            file: info.file.clone(),
            duration_ms: info.duration_ms,
            current_retry: info.current_retry,
            speed: info.speed,
            err: err.map(JsonError::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonReport {
    pub stats: Stats,
    pub tests: Vec<JsonTest>,
    pub pending: Vec<JsonTest>,
    pub failures: Vec<JsonTest>,
    pub passes: Vec<JsonTest>,
}

/// Writes the whole run as one pretty-printed JSON document on `RunEnd`.
pub struct JsonReporter {
    out: Box<dyn Write + Send>,
    stats: StatsCollector,
    errors: HashMap<RunnableId, TestError>,
    tests: Vec<JsonTest>,
    pending: Vec<JsonTest>,
    failures: Vec<JsonTest>,
    passes: Vec<JsonTest>,
}

impl std::fmt::Debug for JsonReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonReporter")
            .field("tests", &self.tests.len())
            .field("failures", &self.failures.len())
            .finish_non_exhaustive()
    }
}

impl JsonReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            stats: StatsCollector::new(),
            errors: HashMap::new(),
            tests: Vec::new(),
            pending: Vec::new(),
            failures: Vec::new(),
            passes: Vec::new(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    fn report(&mut self) -> JsonReport {
        self.errors.clear();
        JsonReport {
            stats: self.stats.snapshot(),
            tests: std::mem::take(&mut self.tests),
            pending: std::mem::take(&mut self.pending),
            failures: std::mem::take(&mut self.failures),
            passes: std::mem::take(&mut self.passes),
        }
    }

    fn write(&mut self) {
        let report = self.report();
        let result = serde_json::to_string_pretty(&report)
            .map_err(io::Error::from)
            .and_then(|json| writeln!(self.out, "{json}"));
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to write JSON report");
        }
    }
}

impl EventListener for JsonReporter {
    fn on_event(&mut self, event: &Event) {
        self.stats.on_event(event);
        match event {
            Event::TestEnd { test } => {
                let entry = JsonTest::new(test, self.errors.get(&test.id));
                self.tests.push(entry);
            }
            Event::Pass { test } => self.passes.push(JsonTest::new(test, None)),
            Event::Pending { test } => self.pending.push(JsonTest::new(test, None)),
            Event::Fail { test, error } => {
                self.errors.insert(test.id, error.clone());
                self.failures.push(JsonTest::new(test, Some(error)));
            }
            Event::RunEnd { .. } => self.write(),
            _ => {}
        }
    }
}
