//! # Concurrency Tests using Loom
//!
//! The completion handle of an attempt is a once-only latch shared between
//! the body (which may call `done` from any thread, any number of times) and
//! the attempt's timer. These models check the latch's race outcomes with
//! loom: exactly one party settles the attempt, and every losing completion
//! is either reported as a second call or silently dropped after a timeout.

#[cfg(test)]
mod tests {
    use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use loom::sync::{Arc, Mutex};
    use loom::thread;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Latch {
        Open,
        Settled,
        TimedOut,
    }

    /// The latch logic of `Done`, rebuilt on loom primitives.
    struct Model {
        latch: Mutex<Latch>,
        reported_multiple: AtomicBool,
        settlements: AtomicUsize,
        multiple_reports: AtomicUsize,
        ignored: AtomicUsize,
    }

    impl Model {
        fn new() -> Self {
            Self {
                latch: Mutex::new(Latch::Open),
                reported_multiple: AtomicBool::new(false),
                settlements: AtomicUsize::new(0),
                multiple_reports: AtomicUsize::new(0),
                ignored: AtomicUsize::new(0),
            }
        }

        fn settle(&self) {
            let previous = {
                let mut latch = self.latch.lock().unwrap();
                let previous = *latch;
                if previous == Latch::Open {
                    *latch = Latch::Settled;
                }
                previous
            };
            match previous {
                Latch::Open => {
                    self.settlements.fetch_add(1, Ordering::SeqCst);
                }
                Latch::TimedOut => {
                    self.ignored.fetch_add(1, Ordering::SeqCst);
                }
                Latch::Settled => {
                    if !self.reported_multiple.swap(true, Ordering::SeqCst) {
                        self.multiple_reports.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }

        fn time_out(&self) -> bool {
            let mut latch = self.latch.lock().unwrap();
            if *latch == Latch::Open {
                *latch = Latch::TimedOut;
                true
            } else {
                false
            }
        }
    }

    fn with_big_stack(f: impl FnOnce() + Send + 'static) {
        // loom's exploration recurses deeply; give it room.
        const STACK_SIZE: usize = 8 * 1024 * 1024; // 8 MB

        std::thread::Builder::new()
            .name("loom-test-thread".into())
            .stack_size(STACK_SIZE)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap();
    }

    /// Three concurrent `done` calls: one settles, one report for the rest.
    #[test]
    fn test_concurrent_done_settles_once() {
        with_big_stack(|| {
            loom::model(|| {
                let model = Arc::new(Model::new());

                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let model = model.clone();
                        thread::spawn(move || model.settle())
                    })
                    .collect();
                model.settle();
                for handle in handles {
                    handle.join().unwrap();
                }

                assert_eq!(model.settlements.load(Ordering::SeqCst), 1);
                assert_eq!(model.multiple_reports.load(Ordering::SeqCst), 1);
                assert_eq!(model.ignored.load(Ordering::SeqCst), 0);
            });
        });
    }

    /// A completion racing the timer: exactly one of them wins, and a
    /// completion that loses to the timer is dropped, never reported.
    #[test]
    fn test_done_racing_timeout() {
        with_big_stack(|| {
            loom::model(|| {
                let model = Arc::new(Model::new());

                let body = {
                    let model = model.clone();
                    thread::spawn(move || model.settle())
                };
                let timed_out = model.time_out();
                body.join().unwrap();

                let settled = model.settlements.load(Ordering::SeqCst);
                if timed_out {
                    assert_eq!(settled, 0);
                    assert_eq!(model.ignored.load(Ordering::SeqCst), 1);
                } else {
                    assert_eq!(settled, 1);
                    assert_eq!(model.ignored.load(Ordering::SeqCst), 0);
                }
                assert_eq!(model.multiple_reports.load(Ordering::SeqCst), 0);
            });
        });
    }
}
