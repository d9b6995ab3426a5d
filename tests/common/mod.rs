// Shared test helpers for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use suite_runner::core::events::Event;
use suite_runner::core::runner::Runner;

/// Keeps every event a runner emits.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(runner: &mut Runner) -> Self {
        let recorder = Self::default();
        let sink = recorder.events.clone();
        runner.add_listener(move |event: &Event| sink.lock().unwrap().push(event.clone()));
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// `name` or `name:title` for every event, in order.
    pub fn trace(&self) -> Vec<String> {
        self.events().iter().map(label).collect()
    }

    /// The trace restricted to events named in `names`.
    pub fn only(&self, names: &[&str]) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| names.contains(&e.name()))
            .map(label)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    /// `(title, error message)` of every failure.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Fail { test, error } => Some((test.title.clone(), error.to_string())),
                _ => None,
            })
            .collect()
    }
}

fn label(event: &Event) -> String {
    match event {
        Event::SuiteBegin { suite } | Event::SuiteEnd { suite } => format!("{}:{}", event.name(), suite.title),
        Event::TestBegin { test }
        | Event::TestEnd { test }
        | Event::Pass { test }
        | Event::Fail { test, .. }
        | Event::Pending { test }
        | Event::Retry { test, .. } => format!("{}:{}", event.name(), test.title),
        Event::HookBegin { hook } | Event::HookEnd { hook } => format!("{}:{}", event.name(), hook.title),
        Event::RunBegin { .. } | Event::RunEnd { .. } => event.name().to_string(),
    }
}

/// A shared call counter.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A shared log of labels, for ordering assertions.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: &str) {
        self.0.lock().unwrap().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
