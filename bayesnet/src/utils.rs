use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use hytra::TrAdder;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};

const REFRESH: Duration = Duration::from_millis(50);

/// Waits up to `delay`, returning early with `false` once `done` is set.
fn wait_unless_done(done: &AtomicBool, delay: Duration) -> bool {
    let start = Instant::now();
    while let Some(left) = delay.checked_sub(start.elapsed()).filter(|d| !d.is_zero()) {
        thread::park_timeout(left);
        if done.load(Ordering::Acquire) {
            return false;
        }
    }
    !done.load(Ordering::Acquire)
}

fn progress_bar(len: u64, msg: &'static str, pos: u64) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len)
        .with_style(style)
        .with_finish(ProgressFinish::AndClear)
        .with_message(msg)
        .with_position(pos)
}

/// Runs `f` while a progress bar tracks the counter it is given.
///
/// The bar only appears once `config.progress_min_time` has elapsed, and `f` may increment the
/// counter from several rayon workers.
pub(crate) fn with_progress<F, T>(f: F, len: u64, msg: &'static str, config: &crate::Config) -> T
where
    F: FnOnce(&TrAdder<u64>) -> T + Send,
    T: Send,
{
    let counter: TrAdder<u64> = TrAdder::new();
    let done = AtomicBool::new(false);
    thread::scope(|s| {
        let (counter, done) = (&counter, &done);
        let display = config.show_progress.then(|| {
            s.spawn(move || {
                if !wait_unless_done(done, config.progress_min_time) {
                    return;
                }
                let pb = progress_bar(len, msg, counter.get());
                while !done.load(Ordering::Acquire) {
                    pb.set_position(counter.get());
                    thread::park_timeout(REFRESH);
                }
                pb.finish_and_clear();
            })
        });
        let res = f(counter);
        done.store(true, Ordering::Release);
        // An unpark before the park is not lost.
        if let Some(handle) = display {
            handle.thread().unpark();
        }
        res
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn counter_from_workers() {
        let config = crate::Config {
            show_progress: true,
            progress_min_time: Duration::from_secs(60),
        };
        let total = with_progress(
            |cnt| {
                (0..100u64).into_par_iter().for_each(|_| cnt.inc(1));
                cnt.get()
            },
            100,
            "test",
            &config,
        );
        assert_eq!(total, 100);
    }
}
