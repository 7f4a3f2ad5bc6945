use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use uuid::Uuid;

use crate::export::ExportArtifact;

#[derive(Debug, Clone)]
pub enum JobState {
    Pending,
    Done(ExportArtifact),
    Failed { message: String },
}

/// Registry of export jobs running off the IPC loop. Jobs are fire and
/// forget; the shell polls `export.status` with the returned id.
#[derive(Debug, Clone, Default)]
pub struct ExportJobs {
    inner: Arc<Mutex<HashMap<String, JobState>>>,
}

impl ExportJobs {
    pub fn new() -> Self {
        ExportJobs::default()
    }

    /// Spawns `work` on a worker thread and returns the job id. A failing
    /// job lands in `Failed` with its message; the registry never panics
    /// the IPC loop.
    pub fn start<F>(&self, work: F) -> String
    where
        F: FnOnce() -> anyhow::Result<ExportArtifact> + Send + 'static,
    {
        let job_id = Uuid::new_v4().to_string();
        {
            let mut jobs = match self.inner.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            jobs.insert(job_id.clone(), JobState::Pending);
        }

        let inner = Arc::clone(&self.inner);
        let thread_job_id = job_id.clone();
        thread::spawn(move || {
            let state = match work() {
                Ok(artifact) => JobState::Done(artifact),
                Err(e) => JobState::Failed {
                    message: format!("{:#}", e),
                },
            };
            let mut jobs = match inner.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            jobs.insert(thread_job_id, state);
        });

        job_id
    }

    pub fn status(&self, job_id: &str) -> Option<JobState> {
        let jobs = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.get(job_id).cloned()
    }
}
