use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::{debug, warn};
use uuid::Uuid;

use sightline_contracts::ResponseEnvelope;

use crate::session::SessionRegistry;

pub struct DispatchJob {
    pub session_id: Uuid,
    pub raw: String,
}

/// Cloneable handle the connection threads use to enqueue work.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<DispatchJob>,
}

impl JobQueue {
    pub fn submit(&self, session_id: Uuid, raw: String) {
        if self.sender.send(DispatchJob { session_id, raw }).is_err() {
            warn!(%session_id, "dispatch pool is gone; dropping frame");
        }
    }
}

/// Fixed-size worker pool draining one shared job queue. A panic inside
/// the handler is caught per job, so one poisoned frame cannot take a
/// worker down or leave its session without a reply.
pub struct DispatchPool {
    sender: mpsc::Sender<DispatchJob>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl DispatchPool {
    pub fn new<F>(workers: usize, sessions: Arc<SessionRegistry>, handler: F) -> Self
    where
        F: Fn(&str) -> ResponseEnvelope + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel::<DispatchJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let workers = (0..workers.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let sessions = Arc::clone(&sessions);
                let handler = Arc::clone(&handler);
                thread::Builder::new()
                    .name(format!("dispatch-{index}"))
                    .spawn(move || worker_loop(&receiver, &sessions, handler.as_ref()))
                    .expect("failed to spawn dispatch worker")
            })
            .collect();

        Self { sender, workers }
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue {
            sender: self.sender.clone(),
        }
    }

    /// Closes the queue and waits for in-flight jobs to finish.
    pub fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop<F>(
    receiver: &Mutex<mpsc::Receiver<DispatchJob>>,
    sessions: &SessionRegistry,
    handler: &F,
) where
    F: Fn(&str) -> ResponseEnvelope,
{
    loop {
        let job = {
            let guard = receiver.lock().expect("dispatch queue poisoned");
            guard.recv()
        };
        let Ok(job) = job else {
            debug!("dispatch queue closed; worker exiting");
            break;
        };

        let envelope = match panic::catch_unwind(AssertUnwindSafe(|| handler(&job.raw))) {
            Ok(envelope) => envelope,
            Err(_) => {
                warn!(session_id = %job.session_id, "dispatch handler panicked");
                ResponseEnvelope::failure("Server Error: An unexpected error occurred.")
            }
        };
        sessions.emit(job.session_id, envelope.to_message());
    }
}
