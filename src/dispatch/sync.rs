//! Polling sync client.
//!
//! A [`Poller`] asks a [`SyncSource`] for the server's sync version and,
//! when it differs from the last one seen, fetches the job list and hands
//! a [`SyncSnapshot`] to every registered callback. The server is the
//! source of truth; the latest version observed always wins.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::models::{Job, JobList, SyncStatus};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// State handed to change callbacks.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    pub version: i64,
    pub jobs: Vec<Job>,
}

/// Where a poller gets its data. Real implementation: [`HttpSyncSource`].
#[async_trait]
pub trait SyncSource: Send + Sync {
    async fn fetch_status(&self, since: Option<i64>) -> Result<SyncStatus>;

    async fn fetch_jobs(&self) -> Result<JobList>;
}

/// Talks to a running server's JSON API with a bearer token.
pub struct HttpSyncSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSyncSource {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("lockdispatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl SyncSource for HttpSyncSource {
    async fn fetch_status(&self, since: Option<i64>) -> Result<SyncStatus> {
        let mut request = self
            .client
            .get(format!("{}/api/sync/status", self.base_url))
            .bearer_auth(&self.token);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        request
            .send()
            .await
            .context("Failed to reach sync endpoint")?
            .error_for_status()
            .context("Sync status request failed")?
            .json::<SyncStatus>()
            .await
            .context("Failed to decode sync status")
    }

    async fn fetch_jobs(&self) -> Result<JobList> {
        self.client
            .get(format!("{}/api/jobs", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Failed to reach jobs endpoint")?
            .error_for_status()
            .context("Job list request failed")?
            .json::<JobList>()
            .await
            .context("Failed to decode job list")
    }
}

pub type ChangeCallback = Box<dyn Fn(&SyncSnapshot) + Send + Sync>;

pub struct Poller<S> {
    source: S,
    last_version: Option<i64>,
    callbacks: Vec<ChangeCallback>,
}

impl<S: SyncSource> Poller<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            last_version: None,
            callbacks: Vec::new(),
        }
    }

    /// Register a callback invoked with every new snapshot.
    pub fn on_change<F>(&mut self, callback: F)
    where
        F: Fn(&SyncSnapshot) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn last_version(&self) -> Option<i64> {
        self.last_version
    }

    /// Check once; returns true when a change was observed and callbacks ran.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let status = self.source.fetch_status(self.last_version).await?;
        if !status.changed {
            return Ok(false);
        }
        let list = self.source.fetch_jobs().await?;
        // The job list may have been read after a newer write landed.
        let version = status.version.max(list.version);
        self.last_version = Some(version);
        tracing::debug!(version, jobs = list.jobs.len(), "sync change observed");

        let snapshot = SyncSnapshot {
            version,
            jobs: list.jobs,
        };
        for callback in &self.callbacks {
            callback(&snapshot);
        }
        Ok(true)
    }

    /// Poll every `interval` until `shutdown` becomes true or its sender
    /// is dropped. Fetch errors are logged and retried on the next tick.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "sync poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("sync poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Serves a scripted sequence of server versions.
    struct FakeSource {
        versions: Mutex<Vec<i64>>,
        fail_next: Mutex<bool>,
        job_fetches: Arc<AtomicUsize>,
    }

    impl FakeSource {
        fn new(versions: Vec<i64>) -> Self {
            Self {
                versions: Mutex::new(versions),
                fail_next: Mutex::new(false),
                job_fetches: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn current(&self) -> i64 {
            let versions = self.versions.lock().unwrap();
            versions.first().copied().unwrap_or(0)
        }

        fn advance(&self) {
            let mut versions = self.versions.lock().unwrap();
            if versions.len() > 1 {
                versions.remove(0);
            }
        }
    }

    #[async_trait]
    impl SyncSource for FakeSource {
        async fn fetch_status(&self, since: Option<i64>) -> Result<SyncStatus> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                anyhow::bail!("connection refused");
            }
            let version = self.current();
            Ok(SyncStatus {
                version,
                changed: since != Some(version),
                server_time: "2024-03-04 10:00:00".to_string(),
            })
        }

        async fn fetch_jobs(&self) -> Result<JobList> {
            self.job_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(JobList {
                jobs: Vec::new(),
                version: self.current(),
            })
        }
    }

    #[tokio::test]
    async fn test_poll_once_fires_callbacks_only_on_change() {
        let source = FakeSource::new(vec![10, 20]);
        let fetches = source.job_fetches.clone();
        let mut poller = Poller::new(source);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        poller.on_change(move |snap| seen_clone.lock().unwrap().push(snap.version));
        let second = Arc::new(AtomicUsize::new(0));
        let second_clone = second.clone();
        poller.on_change(move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(poller.poll_once().await.unwrap());
        assert_eq!(poller.last_version(), Some(10));
        assert!(!poller.poll_once().await.unwrap());

        poller.source.advance();
        assert!(poller.poll_once().await.unwrap());

        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_poll_error_keeps_last_version() {
        let source = FakeSource::new(vec![5]);
        let mut poller = Poller::new(source);
        assert!(poller.poll_once().await.unwrap());

        *poller.source.fail_next.lock().unwrap() = true;
        assert!(poller.poll_once().await.is_err());
        assert_eq!(poller.last_version(), Some(5));
        assert!(!poller.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = FakeSource::new(vec![1]);
        let fetches = source.job_fetches.clone();
        let mut poller = Poller::new(source);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            poller.run(Duration::from_millis(10), rx).await;
            poller
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let poller = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller should stop")
            .unwrap();
        assert_eq!(poller.last_version(), Some(1));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
