//! Per-app ordering of build-available events.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use edgeship_common::{AppKey, Artifact};

/// Pending pushes per `(repo, manifest)`.
///
/// An app present in the map has exactly one worker task, which applies the
/// app's pushes one at a time in arrival order. Different apps never wait on
/// each other. The worker removes the entry once the queue runs dry.
#[derive(Default)]
pub struct PushQueues {
    pending: Mutex<HashMap<AppKey, VecDeque<Artifact>>>,
}

impl PushQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AppKey, VecDeque<Artifact>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `artifact` behind earlier pushes of the same app, starting a
    /// worker that runs `apply` if the app has none.
    pub fn submit<F, Fut>(self: &Arc<Self>, artifact: Artifact, apply: F)
    where
        F: Fn(Artifact) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let app = artifact.app_key();
        {
            let mut pending = self.lock();
            if let Some(queue) = pending.get_mut(&app) {
                tracing::debug!(%app, queued = queue.len() + 1, "push queued behind running update");
                queue.push_back(artifact);
                return;
            }
            pending.insert(app.clone(), VecDeque::new());
        }

        let queues = Arc::clone(self);
        tokio::spawn(async move {
            let mut next = Some(artifact);
            while let Some(artifact) = next {
                apply(artifact).await;
                next = queues.pop(&app);
            }
        });
    }

    fn pop(&self, app: &AppKey) -> Option<Artifact> {
        let mut pending = self.lock();
        let next = pending.get_mut(app).and_then(VecDeque::pop_front);
        if next.is_none() {
            pending.remove(app);
        }
        next
    }

    /// Number of apps with a running worker.
    pub fn active(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn push(manifest: &str, sha: &str) -> Artifact {
        Artifact {
            sha: sha.into(),
            repo_name: "org/app".into(),
            name: "build".into(),
            archive_download_url: None,
            manifest_name: manifest.into(),
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;
    type Step = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

    fn recorder(log: &Log, delay: Duration) -> impl Fn(Artifact) -> Step + Send + 'static {
        let log = Arc::clone(log);
        move |artifact: Artifact| {
            let log = Arc::clone(&log);
            let step: Step = Box::pin(async move {
                let id = format!("{}@{}", artifact.manifest_name, artifact.sha);
                log.lock().unwrap().push(format!("start {id}"));
                tokio::time::sleep(delay).await;
                log.lock().unwrap().push(format!("end {id}"));
            });
            step
        }
    }

    async fn settle(queues: &PushQueues) {
        while queues.active() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_app_applies_in_arrival_order() {
        let queues = Arc::new(PushQueues::new());
        let log = Log::default();

        for sha in ["a", "b", "c"] {
            queues.submit(push("web", sha), recorder(&log, Duration::from_secs(1)));
        }
        settle(&queues).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start web@a",
                "end web@a",
                "start web@b",
                "end web@b",
                "start web@c",
                "end web@c",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn different_apps_run_concurrently() {
        let queues = Arc::new(PushQueues::new());
        let log = Log::default();

        queues.submit(push("web", "a"), recorder(&log, Duration::from_secs(1)));
        queues.submit(push("worker", "a"), recorder(&log, Duration::from_secs(1)));
        assert_eq!(queues.active(), 2);
        settle(&queues).await;

        let log = log.lock().unwrap();
        assert!(log[..2].iter().all(|e| e.starts_with("start")), "{log:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_apps_are_forgotten() {
        let queues = Arc::new(PushQueues::new());
        let log = Log::default();

        queues.submit(push("web", "a"), recorder(&log, Duration::from_secs(1)));
        settle(&queues).await;
        assert_eq!(queues.active(), 0);

        queues.submit(push("web", "b"), recorder(&log, Duration::ZERO));
        settle(&queues).await;
        assert_eq!(log.lock().unwrap().len(), 4);
    }
}
