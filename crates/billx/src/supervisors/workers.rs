//! 🧵 Workers: the ones who actually do the work while the Supervisor takes
//! all the credit in the sprint retro.
//!
//! 🚀 One struct per stage, one `tokio::spawn` per worker, channels in
//! between. Every worker hands back its slice of the run's counters through
//! its `JoinHandle`, and the supervisor adds them up at the end. No shared
//! counters, no locks, no arguing over who gets to increment what. 🦆
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::IngestOutcome;

mod enumerator_worker;
mod manifest_fetch_worker;
mod manifest_worker;
mod part_worker;
mod selector_worker;
mod sink_worker;

pub(super) use enumerator_worker::EnumeratorWorker;
pub(super) use manifest_fetch_worker::ManifestFetchWorker;
pub(super) use manifest_worker::ManifestWorker;
pub(super) use selector_worker::SelectorWorker;
pub(super) use sink_worker::SinkWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// Returns a `JoinHandle` because we trust but verify. Mostly verify.
/// The output is this worker's share of the run's tally.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<IngestOutcome>>;
}

/// 📥 Next item, or `None` once the channel is closed and empty or the run is cancelled.
pub(crate) async fn recv_or_cancelled<T>(rx: &Receiver<T>, token: &CancellationToken) -> Option<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        item = rx.recv() => item.ok(),
    }
}

/// 📤 Hand `item` downstream. `false` means stop: the run was cancelled or nobody is listening.
pub(crate) async fn send_or_cancelled<T>(tx: &Sender<T>, item: T, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}
