//! Remote change feed: `lockdispatch watch`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use lockdispatch::config::DispatchConfig;
use lockdispatch::dispatch::sync::{HttpSyncSource, Poller, SyncSnapshot};

pub async fn cmd_watch(config: &DispatchConfig, once: bool) -> Result<()> {
    let token = config.sync.token.as_deref().ok_or_else(|| {
        anyhow::anyhow!("A session token is required: pass --token or set LOCKDISPATCH_TOKEN")
    })?;
    let source = HttpSyncSource::new(&config.sync.server_url, token)?;
    let mut poller = Poller::new(source);
    poller.on_change(print_snapshot);

    if once {
        poller.poll_once().await?;
        return Ok(());
    }

    let interval = Duration::from_secs(config.sync.poll_interval_secs.max(1));
    println!(
        "Watching {} every {}s (Ctrl-C to stop)",
        config.sync.server_url,
        interval.as_secs()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });
    poller.run(interval, shutdown_rx).await;
    Ok(())
}

fn print_snapshot(snapshot: &SyncSnapshot) {
    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for job in &snapshot.jobs {
        *by_status.entry(job.status.as_str()).or_default() += 1;
    }
    let summary = by_status
        .iter()
        .map(|(status, count)| format!("{}={}", status, count))
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "[version {}] {} jobs {}",
        snapshot.version,
        snapshot.jobs.len(),
        summary
    );
}
