//! 🎬 *[many channels enter. one channel leaves.]*
//! *[nobody knows how many channels will enter. not even the channels.]*
//!
//! 🔀 **Fan-in**: merge a growing set of streams into one.
//!
//! The report parts of a manifest are not known until the manifest is fetched,
//! and the manifests of a run are not known until the bucket is listed. So the
//! merger cannot take a fixed `Vec` of inputs. It takes a *stream of streams*:
//! callers register receivers through a [`FanInRegistrar`], a supervisor task
//! spawns one drain per registration, and the merged output closes only when
//!
//! 1. every registrar clone has been dropped (no more inputs can arrive), AND
//! 2. every drain has emptied its input.
//!
//! 🧠 Knowledge graph:
//! - Order within one input is preserved (one drain, one loop, no reordering).
//! - Order across inputs is arrival order. Nobody promised anything else.
//! - The output channel is bounded, so a slow consumer back-pressures every drain,
//!   which back-pressures every producer. Memory stays flat. 🦆
//! - If the consumer drops the output, drains stop at their next send.

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::task::JoinSet;
use tracing::{error, trace};

/// 📮 The mail slot where new input streams are dropped off. Clone freely.
///
/// The merged output stays open for as long as any clone is alive, even if
/// every registered input has already closed.
#[derive(Debug)]
pub(crate) struct FanInRegistrar<T> {
    registrations: Sender<Receiver<T>>,
}

impl<T> Clone for FanInRegistrar<T> {
    fn clone(&self) -> Self {
        Self {
            registrations: self.registrations.clone(),
        }
    }
}

impl<T: Send + 'static> FanInRegistrar<T> {
    /// ➕ Hand one more input stream to the merger.
    ///
    /// 💀 Fails only if the supervisor is gone, which means the output's consumer
    /// already walked away. Nothing useful can happen to this stream anymore.
    pub(crate) async fn register(&self, stream: Receiver<T>) -> Result<()> {
        self.registrations
            .send(stream)
            .await
            .map_err(|_| anyhow::anyhow!("💀 fan-in supervisor has already shut down, nobody is listening"))
    }
}

/// 🔀 Start a merger. Returns the registrar and the merged output.
///
/// `capacity` is the output channel's buffer. Keep it small: the point is
/// hand-off, not hoarding.
pub(crate) fn fan_in<T: Send + 'static>(capacity: usize) -> (FanInRegistrar<T>, Receiver<T>) {
    let (the_registration_tx, the_registration_rx) = async_channel::bounded(1);
    let (the_output_tx, the_output_rx) = async_channel::bounded(capacity.max(1));
    tokio::spawn(supervise(the_registration_rx, the_output_tx));
    (
        FanInRegistrar {
            registrations: the_registration_tx,
        },
        the_output_rx,
    )
}

/// 👀 Accept registrations and spawn drains until the registrars are gone, then wait for
/// the drains. The output sender dies with this task, and the output closes after the
/// last drain's clone dies with it.
async fn supervise<T: Send + 'static>(registrations: Receiver<Receiver<T>>, output: Sender<T>) {
    let mut the_drains: JoinSet<usize> = JoinSet::new();
    let mut the_registered = 0usize;
    loop {
        tokio::select! {
            the_registration = registrations.recv() => match the_registration {
                Ok(the_stream) => {
                    the_registered += 1;
                    the_drains.spawn(drain(the_stream, output.clone()));
                }
                Err(_) => break,
            },
            // 🧹 reap finished drains as we go so the JoinSet does not grow with the run
            Some(the_joined) = the_drains.join_next(), if !the_drains.is_empty() => {
                log_drain_exit(the_joined);
            }
        }
    }
    drop(output);
    while let Some(the_joined) = the_drains.join_next().await {
        log_drain_exit(the_joined);
    }
    trace!("🔀 fan-in closed after {} registered streams", the_registered);
}

fn log_drain_exit(joined: std::result::Result<usize, tokio::task::JoinError>) {
    match joined {
        Ok(forwarded) => trace!("🔀 drain finished after forwarding {} items", forwarded),
        Err(join_error) => error!("💀 fan-in drain died: {}", join_error),
    }
}

async fn drain<T>(stream: Receiver<T>, output: Sender<T>) -> usize {
    let mut the_forwarded = 0usize;
    while let Ok(item) = stream.recv().await {
        if output.send(item).await.is_err() {
            // 🚪 consumer left. stop pulling so the producer sees a closed channel too.
            stream.close();
            break;
        }
        the_forwarded += 1;
    }
    the_forwarded
}
