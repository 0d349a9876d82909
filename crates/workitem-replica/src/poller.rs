//! Fixed-cadence background polling.
//!
//! Until the initial pass has succeeded, every tick retries it: a sync with
//! an index rebuild while no build has activated, and a metadata sync while
//! none has succeeded, side by side. After that, one incremental sync per
//! tick. The next tick is only scheduled once the previous one has
//! returned, so ticks never overlap no matter how long a sync takes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::context::AppContext;
use crate::sync::SyncRequest;

/// Poll until `shutdown` resolves.
pub async fn run_until(ctx: Arc<AppContext>, interval: Duration, shutdown: impl Future<Output = ()>) {
    tokio::select! {
        _ = poll_forever(ctx, interval) => {}
        _ = shutdown => tracing::info!("Poller stopped"),
    }
}

async fn poll_forever(ctx: Arc<AppContext>, interval: Duration) {
    // Serve searches from the snapshot while the first build runs.
    if let Err(e) = ctx.index.current_index().await {
        tracing::warn!("Failed to open index snapshot: {:#}", e);
    }

    initial_pass(&ctx, interval).await;

    loop {
        tokio::time::sleep(interval).await;
        if let Some(summary) = ctx.sync.sync(SyncRequest::default()).await {
            if summary.is_dirty() {
                tracing::info!("{}", summary.message());
            }
        }
    }
}

/// Retry the rebuild and the metadata sync each tick until both succeeded.
async fn initial_pass(ctx: &AppContext, interval: Duration) {
    let mut metadata_synced = false;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let rebuild = !ctx.index.is_built();
        let (summary, metadata) = tokio::join!(
            async {
                let request = SyncRequest {
                    rebuild_index: rebuild,
                };
                ctx.sync.sync(request).await
            },
            async {
                if metadata_synced {
                    None
                } else {
                    ctx.metadata.sync_metadata(ctx.remote.as_ref()).await
                }
            },
        );
        if let Some(summary) = summary {
            tracing::info!("{}", summary.message());
        }
        metadata_synced |= metadata.is_some();

        if ctx.index.is_built() && metadata_synced {
            tracing::info!(attempt, "Initial sync complete");
            return;
        }
        tracing::warn!(
            attempt,
            index_built = ctx.index.is_built(),
            metadata_synced,
            "Initial sync incomplete; retrying next tick"
        );
        tokio::time::sleep(interval).await;
    }
}
