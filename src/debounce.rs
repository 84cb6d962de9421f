use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use jod_thread::JoinHandle;

/// Coalesces bursts of activity into a single delayed call.
///
/// Every call to `schedule` restarts the delay. The flush callback runs once,
/// on the debouncer's own thread, after `delay` has passed without another
/// `schedule`.
///
/// Dropping the debouncer abandons a pending flush and joins the thread.
pub struct Debouncer {
    /// Declared before `job_thread` so that it is dropped first: the thread
    /// only exits once every sender is gone.
    poke_sender: Sender<()>,

    /// Allowed to be unused because dropping this value has side effects.
    #[allow(unused)]
    job_thread: JoinHandle<()>,
}

impl Debouncer {
    pub fn new<F>(name: &str, delay: Duration, flush: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (poke_sender, poke_receiver) = crossbeam_channel::unbounded::<()>();
        let thread_name = format!("{} debouncer", name);

        let job_thread = jod_thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                log::trace!("{} thread started", thread_name);

                // Wait for the first poke of a burst, then keep waiting until
                // the channel stays quiet for a whole window.
                while poke_receiver.recv().is_ok() {
                    loop {
                        match poke_receiver.recv_timeout(delay) {
                            Ok(()) => continue,
                            Err(RecvTimeoutError::Timeout) => {
                                flush();
                                break;
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                log::trace!("{} dropped with a pending flush", thread_name);
                                return;
                            }
                        }
                    }
                }

                log::trace!("{} thread stopped", thread_name);
            })
            .expect("Could not start debouncer thread");

        Self {
            poke_sender,
            job_thread,
        }
    }

    /// Cancels any pending flush and schedules a new one `delay` from now.
    pub fn schedule(&self) {
        // Only fails if the thread is gone, which only happens while dropping.
        let _ = self.poke_sender.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::thread;
    use std::time::Instant;

    fn counting_debouncer(delay: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let flushes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flushes);

        let debouncer = Debouncer::new("test", delay, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        (debouncer, flushes)
    }

    fn wait_for(flushes: &AtomicUsize, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while flushes.load(Ordering::SeqCst) < expected {
            assert!(Instant::now() < deadline, "timed out waiting for flush");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn burst_flushes_exactly_once() {
        let (debouncer, flushes) = counting_debouncer(Duration::from_millis(100));

        for _ in 0..50 {
            debouncer.schedule();
        }

        wait_for(&flushes, 1);
        thread::sleep(Duration::from_millis(300));

        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn activity_postpones_flush() {
        let (debouncer, flushes) = counting_debouncer(Duration::from_millis(200));

        for _ in 0..5 {
            debouncer.schedule();
            thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(flushes.load(Ordering::SeqCst), 0);
        wait_for(&flushes, 1);
    }

    #[test]
    fn separate_bursts_flush_separately() {
        let (debouncer, flushes) = counting_debouncer(Duration::from_millis(30));

        debouncer.schedule();
        wait_for(&flushes, 1);

        debouncer.schedule();
        debouncer.schedule();
        wait_for(&flushes, 2);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_abandons_pending_flush() {
        let (debouncer, flushes) = counting_debouncer(Duration::from_millis(100));

        debouncer.schedule();
        drop(debouncer);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(flushes.load(Ordering::SeqCst), 0);
    }
}
