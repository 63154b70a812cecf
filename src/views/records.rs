//! Sync loops for the record-family views.

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::MissedTickBehavior,
};
use tracing::{debug, trace};

use crate::{
    error::FetchError,
    id::ActionId,
    ledger::{Record, RecordDelete},
    signals::Signal,
    view::Publisher,
};

/// Tracks the latest revision of a record.
///
/// The poll is authoritative. In between, an update signal is applied
/// optimistically only when it is a direct successor of the current latest
/// revision; anything further down a chain the view has not seen yet waits
/// for the next poll instead of being applied speculatively.
pub(super) async fn run_latest<F, Fut>(
    publisher: Publisher<Record>,
    mut signals: broadcast::Receiver<Signal>,
    poll_interval: Duration,
    fetch: Arc<F>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Record>, FetchError>> + Send + 'static,
{
    let mut latest: Option<Record> = None;
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals_open = true;
    loop {
        tokio::select! {
            _ = tick.tick() => match (fetch)().await {
                Ok(Some(record)) => {
                    // Records are immutable, so comparing action hashes is
                    // all it takes to know whether the pointer moved.
                    if latest.as_ref().map(|r| r.action) != Some(record.action) {
                        latest = Some(record.clone());
                    }
                    publisher.publish_value(record);
                }
                Ok(None) => {
                    publisher.publish_error(FetchError::NotFound);
                }
                Err(err) => {
                    debug!("fetch failed: {err}");
                    publisher.publish_error(err);
                }
            },
            signal = signals.recv(), if signals_open => match signal {
                Ok(Signal::RecordUpdated { record }) => {
                    let direct_successor = match (&latest, record.original) {
                        (Some(current), Some(original)) => current.action == original,
                        _ => false,
                    };
                    if direct_successor {
                        latest = Some(record.clone());
                        publisher.publish_value(record);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("signal feed lagged, {n} signals dropped"),
                Err(RecvError::Closed) => {
                    trace!("signal feed closed, polling only");
                    signals_open = false;
                }
            },
        }
    }
}

/// Tracks every revision observed for a record.
///
/// An update signal is appended when it chains onto a known revision and
/// has not been seen before; the poll replaces the list wholesale.
pub(super) async fn run_revisions<F, Fut>(
    publisher: Publisher<Vec<Record>>,
    mut signals: broadcast::Receiver<Signal>,
    poll_interval: Duration,
    fetch: Arc<F>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>, FetchError>> + Send + 'static,
{
    let mut revisions: Vec<Record> = Vec::new();
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals_open = true;
    loop {
        tokio::select! {
            _ = tick.tick() => match (fetch)().await {
                Ok(fetched) => {
                    revisions = dedup_by_action(fetched, |r| r.action);
                    publisher.publish_value(revisions.clone());
                }
                Err(err) => {
                    debug!("fetch failed: {err}");
                    publisher.publish_error(err);
                }
            },
            signal = signals.recv(), if signals_open => match signal {
                Ok(Signal::RecordUpdated { record }) => {
                    let chained = record
                        .original
                        .is_some_and(|original| revisions.iter().any(|r| r.action == original));
                    let known = revisions.iter().any(|r| r.action == record.action);
                    if chained && !known {
                        revisions.push(record);
                        publisher.publish_value(revisions.clone());
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("signal feed lagged, {n} signals dropped"),
                Err(RecvError::Closed) => {
                    trace!("signal feed closed, polling only");
                    signals_open = false;
                }
            },
        }
    }
}

/// Tracks every delete action referencing `original`.
///
/// Distinct deletes (by different agents, say) are all retained; only the
/// redelivery of one already-seen delete action is a no-op.
pub(super) async fn run_deletes<F, Fut>(
    publisher: Publisher<Vec<RecordDelete>>,
    mut signals: broadcast::Receiver<Signal>,
    poll_interval: Duration,
    fetch: Arc<F>,
    original: ActionId,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<RecordDelete>, FetchError>> + Send + 'static,
{
    let mut deletes: Vec<RecordDelete> = Vec::new();
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals_open = true;
    loop {
        tokio::select! {
            _ = tick.tick() => match (fetch)().await {
                Ok(fetched) => {
                    deletes = dedup_by_action(fetched, |d| d.action);
                    publisher.publish_value(deletes.clone());
                }
                Err(err) => {
                    debug!("fetch failed: {err}");
                    publisher.publish_error(err);
                }
            },
            signal = signals.recv(), if signals_open => match signal {
                Ok(Signal::RecordDeleted { delete }) if delete.deletes == original => {
                    if !deletes.iter().any(|d| d.action == delete.action) {
                        deletes.push(delete);
                        publisher.publish_value(deletes.clone());
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("signal feed lagged, {n} signals dropped"),
                Err(RecvError::Closed) => {
                    trace!("signal feed closed, polling only");
                    signals_open = false;
                }
            },
        }
    }
}

/// Deduplicates by the identifying action, keeping the first occurrence.
fn dedup_by_action<T>(items: Vec<T>, action: impl Fn(&T) -> ActionId) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(action(item)))
        .collect()
}
