//! Dedicated sequential worker for device callbacks and frame conversion.
//!
//! All tasks run on one named thread in submission order, which serializes
//! access to the device and to the write side of the frame slot.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::traits::{CameraError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Stop,
}

/// Cloneable handle for queueing work onto a [`BackgroundExecutor`].
#[derive(Clone)]
pub struct TaskSender {
    sender: Sender<Message>,
}

impl TaskSender {
    /// Queue `task`. Returns `false` if the executor has stopped, in which
    /// case the task is dropped without running.
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Message::Run(Box::new(task))).is_ok()
    }
}

impl std::fmt::Debug for TaskSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSender").finish_non_exhaustive()
    }
}

/// A single background thread running queued tasks in arrival order.
pub struct BackgroundExecutor {
    name: String,
    sender: Option<TaskSender>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundExecutor {
    /// Spawn the worker thread.
    pub fn start(name: &str) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread_name = name.to_owned();

        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run(&thread_name, &receiver))
            .map_err(|err| CameraError::ExecutorUnavailable(err.to_string()))?;

        info!(name, "background executor started");

        Ok(Self {
            name: name.to_owned(),
            sender: Some(TaskSender { sender }),
            handle: Some(handle),
        })
    }

    /// Handle for queueing tasks, `None` after shutdown.
    #[must_use]
    pub fn sender(&self) -> Option<TaskSender> {
        self.sender.clone()
    }

    /// Queue `task`. Returns `false` after shutdown.
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.execute(task))
    }

    /// Whether the worker accepts tasks.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the worker after every task queued so far has run, and wait for it.
    ///
    /// Tasks queued through outstanding [`TaskSender`] clones after this call
    /// are dropped without running. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(sender) = self.sender.take() {
            // A send error means the worker is already gone; join still reaps it.
            let _ = sender.sender.send(Message::Stop);
        }

        if handle.thread().id() == thread::current().id() {
            warn!(name = %self.name, "executor shut down from its own thread, not joining");
            return;
        }
        if handle.join().is_err() {
            warn!(name = %self.name, "background executor thread panicked");
        }
        info!(name = %self.name, "background executor stopped");
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BackgroundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutor")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run(name: &str, receiver: &Receiver<Message>) {
    debug!(name, "executor thread running");
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(task) => {
                // Keep the worker alive if a task panics; its owned resources
                // are released during unwinding.
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!(name, "background task panicked");
                }
            }
            Message::Stop => break,
        }
    }
    debug!(name, "executor thread exiting");
}
