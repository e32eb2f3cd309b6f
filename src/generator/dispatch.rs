use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};

use crate::generator::task::Task;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    task: Arc<Task>,
    on_exit: Continuation,
}

/// Dedicated worker thread running one sampling job at a time.
///
/// Jobs are handed over through a channel; `on_exit` runs on the worker
/// after the sampling loop returns, whether it completed or was cancelled.
/// Dropping the executor disconnects the channel and joins the worker.
pub(super) struct JobExecutor {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl JobExecutor {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let worker = thread::Builder::new()
            .name("cloud-generator".into())
            .spawn(move || {
                for job in receiver.iter() {
                    job.task.run();
                    (job.on_exit)();
                }
            })
            .expect("failed to spawn cloud generator thread");
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    pub fn dispatch(&self, task: Arc<Task>, on_exit: Continuation) {
        if let Some(sender) = &self.sender {
            // A send failure means the worker is gone, which only happens
            // during shutdown.
            let _ = sender.send(Job { task, on_exit });
        }
    }
}

impl Drop for JobExecutor {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
