//! # Run Statistics / 运行统计
//!
//! Aggregate counts derived purely from the event stream. The runner attaches
//! a [`StatsCollector`] to itself and never updates the counts directly.
//!
//! 完全从事件流派生的汇总计数。运行器将 [`StatsCollector`] 挂到自身上，从不直接更新计数。

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::events::{Event, EventListener};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub suites: usize,
    pub tests: usize,
    pub passes: usize,
    pub pending: usize,
    pub failures: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Updates a shared [`Stats`] from events.
#[derive(Debug, Clone, Default)]
pub struct StatsCollector {
    stats: Arc<Mutex<Stats>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Stats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = Stats::default();
    }
}

impl EventListener for StatsCollector {
    fn on_event(&mut self, event: &Event) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            Event::RunBegin { .. } => stats.start = Some(Utc::now()),
            Event::SuiteBegin { suite } if !suite.root => stats.suites += 1,
            Event::TestEnd { .. } => stats.tests += 1,
            Event::Pass { .. } => stats.passes += 1,
            Event::Fail { .. } => stats.failures += 1,
            Event::Pending { .. } => stats.pending += 1,
            Event::RunEnd { .. } => {
                let end = Utc::now();
                stats.end = Some(end);
                stats.duration_ms = stats.start.map(|start| (end - start).num_milliseconds());
            }
            _ => {}
        }
    }
}
