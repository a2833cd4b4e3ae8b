//! Job start/stop listeners.
//!
//! A [`HookRegistry`] is an ordered, append-only list of [`JobHook`]s. It is
//! constructed once and shared by reference with the start worker and the
//! lifecycle service. Notification is synchronous and runs every hook in
//! registration order; a hook that errors or panics is logged and skipped so
//! the remaining hooks still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::Result;
use crate::database::models::Job;

/// Listener for job lifecycle events.
pub trait JobHook: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called with jobs that just obtained a durable identifier.
    fn on_job_start(&self, _jobs: &[Job]) -> Result<()> {
        Ok(())
    }

    /// Called after a job was stopped.
    fn on_job_stop(&self, _job: &Job) -> Result<()> {
        Ok(())
    }
}

/// Ordered collection of job hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn JobHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook. `None` is ignored. Returns whether a hook was added.
    pub fn register(&self, hook: Option<Arc<dyn JobHook>>) -> bool {
        match hook {
            Some(hook) => {
                self.hooks.write().push(hook);
                true
            }
            None => false,
        }
    }

    pub fn add<H: JobHook + 'static>(&self, hook: Arc<H>) {
        self.register(Some(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn JobHook>> {
        self.hooks.read().clone()
    }

    /// Run every hook's start callback. Returns the number of hooks that failed.
    pub fn notify_start(&self, jobs: &[Job]) -> usize {
        self.notify("start", |hook| hook.on_job_start(jobs))
    }

    /// Run every hook's stop callback. Returns the number of hooks that failed.
    pub fn notify_stop(&self, job: &Job) -> usize {
        self.notify("stop", |hook| hook.on_job_stop(job))
    }

    fn notify<F>(&self, event: &'static str, call: F) -> usize
    where
        F: Fn(&dyn JobHook) -> Result<()>,
    {
        // Hooks run without the lock held so a hook may register another.
        let hooks = self.snapshot();
        let mut failed = 0;

        for hook in &hooks {
            match catch_unwind(AssertUnwindSafe(|| call(hook.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    warn!(hook = hook.name(), event, error = %e, "Job hook failed");
                }
                Err(panic) => {
                    failed += 1;
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(hook = hook.name(), event, panic = %msg, "Job hook panicked");
                }
            }
        }

        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use parking_lot::Mutex;

    /// Records every call into a shared log, tagged with its label.
    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl JobHook for Recorder {
        fn on_job_start(&self, jobs: &[Job]) -> Result<()> {
            let ids: Vec<String> = jobs.iter().map(|j| j.job_id.to_string()).collect();
            self.log
                .lock()
                .push(format!("{}:start:{}", self.label, ids.join(",")));
            Ok(())
        }

        fn on_job_stop(&self, job: &Job) -> Result<()> {
            self.log
                .lock()
                .push(format!("{}:stop:{}", self.label, job.job_id));
            Ok(())
        }
    }

    struct Failing;

    impl JobHook for Failing {
        fn on_job_start(&self, _jobs: &[Job]) -> Result<()> {
            Err(Error::Other("unreachable webhook".into()))
        }

        fn on_job_stop(&self, _job: &Job) -> Result<()> {
            panic!("stop hook exploded");
        }
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            label,
            log: log.clone(),
        })
    }

    #[test]
    fn test_register_none_is_noop() {
        let registry = HookRegistry::new();
        assert!(!registry.register(None));
        assert!(registry.is_empty());
        assert!(registry.register(Some(Arc::new(Failing))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_notify_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        registry.add(recorder("a", &log));
        registry.add(recorder("b", &log));

        let jobs = vec![Job::new(1, "c", 10, "u"), Job::new(2, "c", 10, "u")];
        assert_eq!(registry.notify_start(&jobs), 0);
        assert_eq!(registry.notify_stop(&jobs[0]), 0);

        assert_eq!(
            *log.lock(),
            vec!["a:start:1,2", "b:start:1,2", "a:stop:1", "b:stop:1"]
        );
    }

    #[test]
    fn test_failing_hook_does_not_block_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new();
        registry.add(Arc::new(Failing));
        registry.add(recorder("after", &log));

        let job = Job::new(7, "c", 10, "u");
        assert_eq!(registry.notify_start(std::slice::from_ref(&job)), 1);
        assert_eq!(registry.notify_stop(&job), 1);

        assert_eq!(*log.lock(), vec!["after:start:7", "after:stop:7"]);
    }
}
