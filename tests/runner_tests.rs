mod common;

use std::time::{Duration, Instant};

use anyhow::anyhow;
use common::{Counter, Log, Recorder};
use suite_runner::core::events::Event;
use suite_runner::core::runner::UNCAUGHT_OUTSIDE_TITLE;
use suite_runner::{Body, EngineError, Runner, RunnerOptions, SuiteTree, Test, TestError};

fn runner(tree: SuiteTree) -> (Runner, Recorder) {
    runner_with(tree, RunnerOptions::default())
}

fn runner_with(tree: SuiteTree, options: RunnerOptions) -> (Runner, Recorder) {
    let mut runner = Runner::new(tree, options);
    let recorder = Recorder::attach(&mut runner);
    (runner, recorder)
}

/// A body that appends `tag` to `log` and succeeds.
fn logs(log: &Log, tag: &str) -> Body {
    let l = log.clone();
    let tag = tag.to_string();
    Body::sync(move |_| {
        l.push(&tag);
        Ok(())
    })
}

/// A "before each" hook counts, and the test sees exactly one call.
#[tokio::test]
async fn before_each_runs_once_per_test() {
    let before = Counter::default();
    let after = Counter::default();
    let mut tree = SuiteTree::default();
    let math = tree.add_suite(tree.root(), "Math");
    let b = before.clone();
    tree.before_each(math, Body::sync(move |_| {
        b.hit();
        Ok(())
    }));
    let a = after.clone();
    tree.after_each(math, Body::sync(move |_| {
        a.hit();
        Ok(())
    }));
    let seen = before.clone();
    tree.add_test(math, Test::sync("adds", move |_| {
        anyhow::ensure!(seen.get() == 1, "counter was {}", seen.get());
        Ok(())
    }));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 0);
    assert_eq!(report.stats.passes, 1);
    assert_eq!(before.get(), 1);
    assert_eq!(after.get(), 1);
    assert_eq!(events.only(&["pass", "fail"]), vec!["pass:adds"]);
}

/// A callback body that never completes times out after its own timeout.
#[tokio::test]
async fn silent_callback_times_out() {
    let mut tree = SuiteTree::default();
    tree.add_test(tree.root(), Test::callback("hangs", |_ctx, _done| ()).timeout(50));

    let (mut runner, events) = runner(tree);
    let started = Instant::now();
    let report = runner.run().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(report.failures, 1);
    let failure = events
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::Fail { test, error } => Some((test, error)),
            _ => None,
        })
        .unwrap();
    assert!(failure.0.timed_out);
    assert_eq!(failure.1, TestError::Timeout { ms: 50, file: None });
    assert!(failure.1.to_string().starts_with("Timeout of 50ms exceeded."));
}

/// Two failures and a pass with a budget of two retries.
#[tokio::test]
async fn retried_test_eventually_passes() {
    let attempts = Counter::default();
    let mut tree = SuiteTree::default();
    let a = attempts.clone();
    tree.add_test(
        tree.root(),
        Test::sync("flaky", move |ctx| {
            let n = a.hit();
            anyhow::ensure!(n == 3, "attempt {n} (retry {})", ctx.current_retry());
            Ok(())
        })
        .retries(2),
    );

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 0);
    assert_eq!(attempts.get(), 3);
    assert_eq!(
        events.only(&["retry", "pass", "fail"]),
        vec!["retry:flaky", "retry:flaky", "pass:flaky"]
    );
    assert_eq!(report.stats.tests, 1);
    let last_pass = events
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::Pass { test } => Some(test),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_pass.current_retry, 2);
    assert!(last_pass.retried_from.is_some());
}

/// A test that always fails spends its whole budget and is tallied once;
/// "after each" runs for every attempt.
#[tokio::test]
async fn exhausted_retries_count_one_failure() {
    let after = Counter::default();
    let mut tree = SuiteTree::default();
    let a = after.clone();
    tree.after_each(tree.root(), Body::sync(move |_| {
        a.hit();
        Ok(())
    }));
    tree.add_test(tree.root(), Test::sync("broken", |_| Err(anyhow!("always"))).retries(2));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(events.count("retry"), 2);
    assert_eq!(events.count("fail"), 1);
    assert_eq!(after.get(), 3);
}

/// Skipping from "before all" makes the whole suite pending.
#[tokio::test]
async fn before_all_skip_marks_suite_pending() {
    let ran = Counter::default();
    let mut tree = SuiteTree::default();
    let outer = tree.add_suite(tree.root(), "outer");
    tree.before_all(outer, Body::sync(|ctx| Err(ctx.skip())));
    for title in ["one", "two"] {
        let r = ran.clone();
        tree.add_test(outer, Test::sync(title, move |_| {
            r.hit();
            Ok(())
        }));
    }
    let inner = tree.add_suite(outer, "inner");
    let r = ran.clone();
    tree.add_test(inner, Test::sync("three", move |_| {
        r.hit();
        Ok(())
    }));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(ran.get(), 0);
    assert_eq!(report.failures, 0);
    assert_eq!(
        events.only(&["pending"]),
        vec!["pending:one", "pending:two", "pending:three"]
    );
}

/// A panic after a pass fails the test again and stops the run.
#[tokio::test]
async fn uncaught_panic_after_pass_aborts() {
    let later = Counter::default();
    let mut tree = SuiteTree::default();
    let first = tree.add_suite(tree.root(), "first");
    tree.add_test(first, Test::future("spawns a bomb", |_| async {
        tokio::spawn(async {
            panic!("late boom");
        });
        Ok(())
    }));
    let second = tree.add_suite(tree.root(), "second");
    let l = later.clone();
    tree.add_test(second, Test::sync("never", move |_| {
        l.hit();
        Ok(())
    }));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(later.get(), 0);
    assert_eq!(report.failures, 1);
    assert_eq!(
        events.only(&["pass", "fail"]),
        vec!["pass:spawns a bomb", "fail:spawns a bomb"]
    );
    assert!(events.failures()[0].1.contains("late boom"));
    assert!(!events.trace().contains(&"suite_begin:second".to_string()));
}

/// A panic raised before any runnable starts lands on a detached runnable.
#[tokio::test]
async fn uncaught_panic_outside_any_runnable() {
    let mut tree = SuiteTree::default();
    tree.add_test(tree.root(), Test::sync("fine", |_| Ok(())));
    let (mut runner, events) = runner(tree);

    tokio::spawn(async {
        panic!("early boom");
    });
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    let failures = events.failures();
    assert_eq!(failures[0].0, UNCAUGHT_OUTSIDE_TITLE);
    assert!(failures[0].1.contains("early boom"));
    assert_eq!(events.only(&["pass"]), vec!["pass:fine"]);
}

/// Calling `done` twice settles once and reports the second call.
#[tokio::test]
async fn second_done_is_reported() {
    let mut tree = SuiteTree::default();
    tree.add_test(
        tree.root(),
        Test::callback("twice", |_ctx, done| {
            done.ok();
            done.ok();
        }),
    );

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(events.only(&["pass", "fail"]), vec!["pass:twice", "fail:twice"]);
    assert!(events.failures()[0].1.starts_with("done() called multiple times in test <twice>"));
}

/// Setup runs outer-first, cleanup inner-first.
#[tokio::test]
async fn hooks_run_in_nesting_order() {
    let log = Log::default();
    let mut tree = SuiteTree::default();
    let outer = tree.add_suite(tree.root(), "outer");
    let inner = tree.add_suite(outer, "inner");
    for (suite, name) in [(outer, "outer"), (inner, "inner")] {
        let l = log.clone();
        let tag = format!("{name}:before_all");
        tree.before_all(suite, Body::sync(move |_| {
            l.push(&tag);
            Ok(())
        }));
        let l = log.clone();
        let tag = format!("{name}:before_each");
        tree.before_each(suite, Body::sync(move |_| {
            l.push(&tag);
            Ok(())
        }));
        let l = log.clone();
        let tag = format!("{name}:after_each");
        tree.after_each(suite, Body::sync(move |_| {
            l.push(&tag);
            Ok(())
        }));
        let l = log.clone();
        let tag = format!("{name}:after_all");
        tree.after_all(suite, Body::sync(move |_| {
            l.push(&tag);
            Ok(())
        }));
    }
    let l = log.clone();
    tree.add_test(inner, Test::sync("test", move |_| {
        l.push("test");
        Ok(())
    }));

    let (mut runner, _) = runner(tree);
    runner.run().await.unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "outer:before_all",
            "inner:before_all",
            "outer:before_each",
            "inner:before_each",
            "test",
            "inner:after_each",
            "outer:after_each",
            "inner:after_all",
            "outer:after_all",
        ]
    );
}

/// A failing "before each" skips the rest of its suite but still cleans up.
#[tokio::test]
async fn before_each_failure_is_reported_against_the_hook() {
    let ran = Counter::default();
    let after_each = Counter::default();
    let after_all = Counter::default();
    let mut tree = SuiteTree::default();
    let suite = tree.add_suite(tree.root(), "db");
    tree.before_each(suite, Body::sync(|_| Err(anyhow!("connection refused"))));
    let a = after_each.clone();
    tree.after_each(suite, Body::sync(move |_| {
        a.hit();
        Ok(())
    }));
    let a = after_all.clone();
    tree.after_all(suite, Body::sync(move |_| {
        a.hit();
        Ok(())
    }));
    for title in ["first", "second"] {
        let r = ran.clone();
        tree.add_test(suite, Test::sync(title, move |_| {
            r.hit();
            Ok(())
        }));
    }

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(ran.get(), 0);
    assert_eq!(after_each.get(), 1);
    assert_eq!(after_all.get(), 1);
    assert_eq!(
        events.failures(),
        vec![(
            "\"before each\" hook for \"first\"".to_string(),
            "connection refused".to_string()
        )]
    );
}

/// An error recorded by a hook fails the test it ran for.
#[tokio::test]
async fn recorded_hook_error_fails_current_test() {
    let mut tree = SuiteTree::default();
    tree.before_each(tree.root(), Body::sync(|ctx| {
        ctx.record_error(anyhow!("deferred"));
        Ok(())
    }));
    tree.add_test(tree.root(), Test::sync("victim", |_| Ok(())));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(events.failures(), vec![("victim".to_string(), "deferred".to_string())]);
    assert_eq!(events.count("pass"), 0);
}

/// A "before all" hook runs for no test, so what it records fails the hook
/// and never a test of an earlier suite.
#[tokio::test]
async fn recorded_before_all_error_fails_the_hook() {
    let mut tree = SuiteTree::default();
    tree.add_test(tree.root(), Test::sync("a", |_| Ok(())));
    let child = tree.add_suite(tree.root(), "child");
    tree.before_all(child, Body::sync(|ctx| {
        ctx.record_error(anyhow!("deferred in before all"));
        Ok(())
    }));
    tree.add_test(child, Test::sync("b", |_| Ok(())));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(
        events.failures(),
        vec![(
            "\"before all\" hook for \"b\"".to_string(),
            "deferred in before all".to_string()
        )]
    );
    assert_eq!(
        events.only(&["pass", "fail"]),
        vec!["pass:a", "fail:\"before all\" hook for \"b\"", "pass:b"]
    );
}

/// Skipping from an outer "before each" leaves inner hooks untouched and
/// cleans up from the skipping suite outward.
#[tokio::test]
async fn before_each_skip_cleans_up_from_its_own_level() {
    let log = Log::default();
    let mut tree = SuiteTree::default();
    let outer = tree.add_suite(tree.root(), "outer");
    let l = log.clone();
    tree.before_each(outer, Body::sync(move |ctx| {
        l.push("outer:be");
        Err(ctx.skip())
    }));
    tree.after_each(outer, logs(&log, "outer:ae"));
    let inner = tree.add_suite(outer, "inner");
    tree.before_each(inner, logs(&log, "inner:be"));
    tree.after_each(inner, logs(&log, "inner:ae"));
    tree.add_test(inner, Test::new("one", logs(&log, "one")));
    tree.add_test(inner, Test::new("two", logs(&log, "two")));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 0);
    assert_eq!(log.entries(), vec!["outer:be", "outer:ae", "outer:be", "outer:ae"]);
    assert_eq!(events.only(&["pending", "pass"]), vec!["pending:one", "pending:two"]);
}

/// A failing "after each" of an ancestor runs the hooks above it once, then
/// abandons the rest of that ancestor's subtree; siblings still run.
#[tokio::test]
async fn ancestor_after_each_failure_abandons_its_subtree() {
    let log = Log::default();
    let mut tree = SuiteTree::default();
    tree.after_each(tree.root(), logs(&log, "root:ae"));
    let outer = tree.add_suite(tree.root(), "outer");
    let l = log.clone();
    tree.after_each(outer, Body::sync(move |_| {
        l.push("outer:ae");
        Err(anyhow!("cleanup broke"))
    }));
    tree.add_test(outer, Test::new("o1", logs(&log, "o1")));
    tree.add_test(outer, Test::new("o2", logs(&log, "o2")));
    let inner = tree.add_suite(outer, "inner");
    tree.add_test(inner, Test::new("i1", logs(&log, "i1")));
    let sibling = tree.add_suite(tree.root(), "sibling");
    tree.add_test(sibling, Test::new("s1", logs(&log, "s1")));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(log.entries(), vec!["o1", "outer:ae", "root:ae", "s1", "root:ae"]);
    assert_eq!(
        events.failures(),
        vec![(
            "\"after each\" hook for \"o1\"".to_string(),
            "cleanup broke".to_string()
        )]
    );
}

/// A failing "before all" skips the suite body but its "after all" still runs.
#[tokio::test]
async fn before_all_failure_still_runs_after_all() {
    let log = Log::default();
    let mut tree = SuiteTree::default();
    let db = tree.add_suite(tree.root(), "db");
    tree.before_all(db, Body::sync(|_| Err(anyhow!("no database"))));
    tree.after_all(db, logs(&log, "db:aa"));
    tree.add_test(db, Test::new("first", logs(&log, "first")));
    let nested = tree.add_suite(db, "nested");
    tree.add_test(nested, Test::new("deep", logs(&log, "deep")));
    let next = tree.add_suite(tree.root(), "next");
    tree.add_test(next, Test::new("after", logs(&log, "after")));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(log.entries(), vec!["db:aa", "after"]);
    assert_eq!(
        events.failures(),
        vec![(
            "\"before all\" hook for \"first\"".to_string(),
            "no database".to_string()
        )]
    );
}

/// A panic while a callback waits for `done` completes that attempt at once.
#[tokio::test]
async fn uncaught_panic_completes_a_waiting_callback() {
    let mut tree = SuiteTree::default();
    tree.add_test(
        tree.root(),
        Test::callback("waits", |_ctx, _done| {
            tokio::spawn(async {
                panic!("async boom");
            });
        })
        .timeout(5_000),
    );

    let (mut runner, events) = runner(tree);
    let started = Instant::now();
    let report = runner.run().await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(5_000));
    assert_eq!(report.failures, 1);
    let failures = events.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "waits");
    assert!(failures[0].1.contains("async boom"));
    assert!(!failures[0].1.starts_with("Timeout"));
}

/// A panic landing on a test that already went pending is still a failure.
#[tokio::test]
async fn uncaught_panic_during_pending_test_is_forced() {
    let mut tree = SuiteTree::default();
    tree.add_test(
        tree.root(),
        Test::future("skips", |ctx| async move {
            tokio::spawn(async {
                panic!("boom in pending");
            });
            Err(ctx.skip())
        }),
    );

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(events.only(&["pending", "fail"]), vec!["pending:skips", "fail:skips"]);
    assert!(events.failures()[0].1.contains("boom in pending"));
}

#[tokio::test]
async fn skip_in_after_each_is_forbidden() {
    let mut tree = SuiteTree::default();
    tree.after_each(tree.root(), Body::sync(|ctx| Err(ctx.skip())));
    tree.add_test(tree.root(), Test::sync("t", |_| Ok(())));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(events.failures()[0].1, "`skip()` forbidden in after each hook");
}

#[tokio::test]
async fn bail_stops_after_first_failure() {
    let ran = Counter::default();
    let mut tree = SuiteTree::default();
    tree.add_test(tree.root(), Test::sync("fails", |_| Err(anyhow!("no"))));
    let r = ran.clone();
    tree.add_test(tree.root(), Test::sync("skipped", move |_| {
        r.hit();
        Ok(())
    }));
    let options = RunnerOptions {
        bail: true,
        ..RunnerOptions::default()
    };

    let (mut runner, _) = runner_with(tree, options);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(ran.get(), 0);
}

fn grep_tree() -> SuiteTree {
    let mut tree = SuiteTree::default();
    let math = tree.add_suite(tree.root(), "Math");
    tree.add_test(math, Test::sync("adds", |_| Ok(())));
    tree.add_test(math, Test::sync("divides", |_| Ok(())));
    let string = tree.add_suite(tree.root(), "String");
    tree.add_test(string, Test::sync("concat", |_| Ok(())));
    tree
}

#[tokio::test]
async fn grep_selects_by_full_title() {
    let options = RunnerOptions {
        grep: Some("^Math".to_string()),
        ..RunnerOptions::default()
    };
    let (mut runner, events) = runner_with(grep_tree(), options);
    let report = runner.run().await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(events.only(&["pass"]), vec!["pass:adds", "pass:divides"]);
    assert!(!events.trace().contains(&"suite_begin:String".to_string()));

    let options = RunnerOptions {
        grep: Some("^Math".to_string()),
        invert: true,
        ..RunnerOptions::default()
    };
    let (mut runner, events) = runner_with(grep_tree(), options);
    let report = runner.run().await.unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(events.only(&["pass"]), vec!["pass:concat"]);
}

#[tokio::test]
async fn only_narrows_the_run() {
    let mut tree = grep_tree();
    let root = tree.root();
    let extra = tree.add_suite(root, "Extra");
    tree.add_test(extra, Test::sync("chosen", |_| Ok(())).only());

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(events.only(&["pass"]), vec!["pass:chosen"]);
}

#[tokio::test]
async fn forbid_only_refuses_to_start() {
    let mut tree = SuiteTree::default();
    tree.add_test(tree.root(), Test::sync("chosen", |_| Ok(())).only());
    let options = RunnerOptions {
        forbid_only: true,
        ..RunnerOptions::default()
    };

    let (mut runner, events) = runner_with(tree, options);
    assert!(matches!(runner.run().await, Err(EngineError::ForbiddenOnly)));
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn pending_tests_are_reported_or_forbidden() {
    let build = || {
        let mut tree = SuiteTree::default();
        tree.add_test(tree.root(), Test::pending("todo"));
        tree.add_test(tree.root(), Test::sync("skipped", |_| Ok(())).skip());
        tree
    };

    let (mut runner, events) = runner(build());
    let report = runner.run().await.unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.stats.pending, 2);
    assert_eq!(events.only(&["pending"]), vec!["pending:todo", "pending:skipped"]);

    let options = RunnerOptions {
        forbid_pending: true,
        ..RunnerOptions::default()
    };
    let (mut runner, events) = runner_with(build(), options);
    let report = runner.run().await.unwrap();
    assert_eq!(report.failures, 2);
    assert_eq!(events.failures()[0].1, "Pending test forbidden");
}

#[tokio::test]
async fn fail_zero_counts_an_empty_selection() {
    let options = RunnerOptions {
        grep: Some("nothing matches this".to_string()),
        fail_zero: true,
        ..RunnerOptions::default()
    };
    let (mut runner, _) = runner_with(grep_tree(), options);
    let report = runner.run().await.unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.failures, 1);
}

#[tokio::test]
async fn abort_token_stops_scheduling() {
    let ran = Counter::default();
    let mut tree = SuiteTree::default();
    let first = tree.add_test(tree.root(), Test::sync("first", |_| Ok(())));
    let r = ran.clone();
    tree.add_test(tree.root(), Test::sync("second", move |_| {
        r.hit();
        Ok(())
    }));

    let mut runner = Runner::new(tree, RunnerOptions::default());
    let token = runner.abort_token();
    runner.add_listener(move |event: &Event| {
        if let Event::TestEnd { test } = event {
            if test.id == first {
                token.cancel();
            }
        }
    });
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 0);
    assert_eq!(ran.get(), 0);
}

#[tokio::test]
async fn body_failure_kinds() {
    let mut tree = SuiteTree::default();
    tree.add_test(tree.root(), Test::sync("panics", |_| {
        assert_eq!(1 + 1, 3, "math is broken");
        Ok(())
    }));
    tree.add_test(tree.root(), Test::future("rejects empty", |_| async { Err(anyhow!("")) }));
    tree.add_test(tree.root(), Test::callback("non error", |_ctx, done| done.call("oops")));
    tree.add_test(tree.root(), Test::callback("throws", |_ctx, _done| Err::<(), _>(anyhow!("thrown"))));

    let (mut runner, events) = runner(tree);
    let report = runner.run().await.unwrap();
    assert_eq!(report.failures, 4);

    let failures = events.failures();
    assert!(failures[0].1.contains("math is broken"));
    assert_eq!(failures[1].1, "Promise rejected with no or falsy reason");
    assert_eq!(failures[2].1, "done() invoked with non-Error: oops");
    assert_eq!(failures[3].1, "thrown");
}

#[tokio::test]
async fn async_only_rejects_sync_bodies() {
    let mut tree = SuiteTree::default();
    tree.add_test(tree.root(), Test::sync("sync", |_| Ok(())));
    tree.add_test(tree.root(), Test::future("future", |_| async { Ok(()) }));
    let options = RunnerOptions {
        async_only: true,
        ..RunnerOptions::default()
    };

    let (mut runner, events) = runner_with(tree, options);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 1);
    assert_eq!(events.failures()[0].0, "sync");
    assert_eq!(events.only(&["pass"]), vec!["pass:future"]);
}

/// Hooks are exempt from async-only; only test bodies are checked.
#[tokio::test]
async fn async_only_exempts_sync_hooks() {
    let before = Counter::default();
    let mut tree = SuiteTree::default();
    let b = before.clone();
    tree.before_each(tree.root(), Body::sync(move |_| {
        b.hit();
        Ok(())
    }));
    tree.add_test(tree.root(), Test::future("future", |_| async { Ok(()) }));
    let options = RunnerOptions {
        async_only: true,
        ..RunnerOptions::default()
    };

    let (mut runner, events) = runner_with(tree, options);
    let report = runner.run().await.unwrap();

    assert_eq!(report.failures, 0);
    assert_eq!(before.get(), 1);
    assert_eq!(events.only(&["pass", "fail"]), vec!["pass:future"]);
}

#[tokio::test]
async fn body_can_extend_its_timeout() {
    let mut tree = SuiteTree::default();
    tree.add_test(
        tree.root(),
        Test::future("slow but allowed", |mut ctx| async move {
            ctx.set_timeout(1000);
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok(())
        })
        .timeout(30),
    );

    let (mut runner, _) = runner(tree);
    assert_eq!(runner.run().await.unwrap().failures, 0);
}

#[tokio::test]
async fn hooks_share_suite_scope_with_tests() {
    let mut tree = SuiteTree::default();
    let suite = tree.add_suite(tree.root(), "shared");
    tree.before_all(suite, Body::sync(|ctx| {
        ctx.scope().set("answer", 41_usize);
        Ok(())
    }));
    tree.add_test(suite, Test::sync("reads", |ctx| {
        let answer = ctx.scope().get::<usize>("answer");
        anyhow::ensure!(answer == Some(41), "got {answer:?}");
        Ok(())
    }));

    let (mut runner, _) = runner(tree);
    assert_eq!(runner.run().await.unwrap().failures, 0);
}

#[tokio::test]
async fn event_stream_sees_the_whole_run() {
    let mut tree = SuiteTree::default();
    let suite = tree.add_suite(tree.root(), "s");
    tree.add_test(suite, Test::sync("t", |_| Ok(())));

    let mut runner = Runner::new(tree, RunnerOptions::default());
    let mut rx = runner.subscribe();
    runner.run().await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "run_begin",
            "suite_begin",
            "suite_begin",
            "test_begin",
            "pass",
            "test_end",
            "suite_end",
            "suite_end",
            "run_end",
        ]
    );
}

#[tokio::test]
async fn reset_allows_a_second_run() {
    let ran = Counter::default();
    let mut tree = SuiteTree::default();
    let r = ran.clone();
    tree.add_test(
        tree.root(),
        Test::sync("flaky", move |_| {
            anyhow::ensure!(r.hit() % 2 == 0, "odd attempt");
            Ok(())
        })
        .retries(1),
    );

    let (mut runner, _) = runner(tree);
    assert_eq!(runner.run().await.unwrap().failures, 0);
    assert!(matches!(runner.run().await, Err(EngineError::AlreadyStopped)));

    runner.reset().unwrap();
    let report = runner.run().await.unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.stats.passes, 1);
    assert_eq!(ran.get(), 4);
}
