//! Message-pump thread.
//!
//! Some vendor libraries create native GUI widgets inside `OpenHW` and
//! expect the calling thread to keep servicing window messages. Each
//! session owns one pump; on non-Windows targets it is a plain task loop
//! with the same `post`/`send` interface.

use std::sync::mpsc::{channel, sync_channel, Sender};
use std::thread::JoinHandle;

use tracing::error;

type PumpTask = Box<dyn FnOnce() + Send>;

pub struct MessagePump {
    tx: Option<Sender<PumpTask>>,
    join: Option<JoinHandle<()>>,
}

impl MessagePump {
    pub fn new() -> Self {
        let (tx, rx) = channel::<PumpTask>();
        let join = std::thread::Builder::new()
            .name("extio-pump".into())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            });
        let join = match join {
            Ok(join) => Some(join),
            Err(e) => {
                error!(%e, "failed to spawn message pump");
                None
            }
        };
        Self { tx: Some(tx), join }
    }

    /// Queue a task, fire-and-forget.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(task));
        }
    }

    /// Run a task on the pump thread and wait for its result. `None` if the
    /// pump is gone.
    pub fn send<R: Send + 'static>(&self, task: impl FnOnce() -> R + Send + 'static) -> Option<R> {
        let (tx, rx) = sync_channel(1);
        self.post(move || {
            let _ = tx.send(task());
        });
        rx.recv().ok()
    }
}

impl Default for MessagePump {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        // Closing the queue lets the thread drain and exit.
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn send_runs_on_the_pump_thread_and_returns() {
        let pump = MessagePump::new();
        let here = std::thread::current().id();
        let there = pump.send(move || std::thread::current().id()).unwrap();
        assert_ne!(here, there);
        assert_eq!(pump.send(|| 6 * 7), Some(42));
    }

    #[test]
    fn post_runs_eventually_and_drop_drains() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pump = MessagePump::new();
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pump.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pump);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
