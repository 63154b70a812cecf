//! The synchronized read models over the ledger.
//!
//! Every constructor on [`Views`] returns a [`View`] built the same way:
//! while the view has subscribers, one owned task fetches the authoritative
//! state immediately and then on every poll tick, and applies matching
//! [`Signal`](crate::signals::Signal)s as they arrive in between. Both
//! channels merge into the same in-memory snapshot owned by that task, and
//! a status is only published when the merged value actually changed, so
//! the final published value does not depend on how polls and signals
//! interleave.
//!
//! Dropping the last subscription aborts the task — and with it the timer
//! and the signal receiver — and resets the view to pending. A later
//! subscribe starts over with a fresh fetch; no value is served across a
//! zero-subscriber gap.

mod links;
mod records;

use std::{future::Future, sync::Arc, time::Duration};

use tracing::{Instrument, debug_span};

use self::links::{DeletedKey, LinkScope};
use crate::{
    error::FetchError,
    id::{ActionId, AgentId, Id, IdKind},
    ledger::{DeletedLink, Link, LinkType, Record, RecordDelete},
    retry,
    signals::SignalHub,
    view::{Activation, View},
};

/// Default cadence of the authoritative re-fetch.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Options shared by every view built from one [`Views`] handle.
#[derive(Debug, Clone)]
pub struct ViewOptions {
    /// How often an active view re-fetches authoritative state.
    ///
    /// Signals keep a view current with low latency; the poll bounds how
    /// stale it can get when signals are dropped or missed.
    pub poll_interval: Duration,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Constructor handle for ledger views.
///
/// Cheap to clone; holds the signal hub and the options every view built
/// through it shares. The fetch functions passed to the constructors each
/// perform one authoritative read against the ledger client.
#[derive(Debug, Clone)]
pub struct Views {
    signals: SignalHub,
    options: ViewOptions,
}

impl Views {
    /// Creates a handle with default options.
    pub fn new(signals: SignalHub) -> Self {
        Self::with_options(signals, ViewOptions::default())
    }

    /// Creates a handle with the given options.
    pub fn with_options(signals: SignalHub, options: ViewOptions) -> Self {
        Self { signals, options }
    }

    /// The signal hub views built here listen on.
    pub fn signals(&self) -> &SignalHub {
        &self.signals
    }

    /// The options views built here run with.
    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    /// Tracks the targets of the non-deleted links of one type under a
    /// named collection, with no base filter.
    pub fn collection_targets<F, Fut>(&self, link_type: impl Into<LinkType>, fetch: F) -> View<Vec<Id>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Id>, FetchError>> + Send + 'static,
    {
        let scope = LinkScope::collection(link_type.into());
        self.targets_view("collection_targets", scope, None, fetch)
    }

    /// Tracks the targets of the non-deleted links of one type from `base`.
    ///
    /// For link types targeting agents, prefer
    /// [`Views::live_agent_targets`], which re-addresses signal targets to
    /// the agent kind.
    pub fn live_link_targets<F, Fut>(
        &self,
        base: Id,
        link_type: impl Into<LinkType>,
        fetch: F,
    ) -> View<Vec<Id>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Id>, FetchError>> + Send + 'static,
    {
        let scope = LinkScope::at_base(base, link_type.into());
        self.targets_view("live_link_targets", scope, None, fetch)
    }

    /// Tracks the agents targeted by the non-deleted links of one type from
    /// `base`.
    ///
    /// Signals report link targets as content identifiers even when the
    /// link logically points at an agent; this view re-addresses them, so
    /// the published identifiers are always agent-kind.
    pub fn live_agent_targets<F, Fut>(
        &self,
        base: Id,
        link_type: impl Into<LinkType>,
        fetch: F,
    ) -> View<Vec<AgentId>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<AgentId>, FetchError>> + Send + 'static,
    {
        let scope = LinkScope::at_base(base, link_type.into());
        self.targets_view("live_agent_targets", scope, Some(IdKind::Agent), fetch)
    }

    /// Tracks the non-deleted links of one type from `base`, ordered by
    /// creation time.
    pub fn live_links<F, Fut>(
        &self,
        base: Id,
        link_type: impl Into<LinkType>,
        fetch: F,
    ) -> View<Vec<Link>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Link>, FetchError>> + Send + 'static,
    {
        let scope = LinkScope::at_base(base, link_type.into());
        let span = debug_span!("view", kind = "live_links", %scope);
        let fetch = Arc::new(fetch);
        let signals = self.signals.clone();
        let poll_interval = self.options.poll_interval;
        View::new(move |publisher| {
            Activation::spawn(
                links::run_links(
                    publisher,
                    signals.subscribe(),
                    poll_interval,
                    fetch.clone(),
                    scope.clone(),
                )
                .instrument(span.clone()),
            )
        })
    }

    /// Tracks the deleted links of one type from `base`, each paired with
    /// every delete action observed against it, keyed by create action.
    pub fn deleted_links<F, Fut>(
        &self,
        base: Id,
        link_type: impl Into<LinkType>,
        fetch: F,
    ) -> View<Vec<DeletedLink>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<DeletedLink>, FetchError>> + Send + 'static,
    {
        let scope = LinkScope::at_base(base, link_type.into());
        self.deleted_view("deleted_links", scope, DeletedKey::CreateAction, fetch)
    }

    /// Like [`Views::deleted_links`], but aggregates deletes per target,
    /// for fetch functions that report one pair per deleted target.
    pub fn deleted_link_targets<F, Fut>(
        &self,
        base: Id,
        link_type: impl Into<LinkType>,
        fetch: F,
    ) -> View<Vec<DeletedLink>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<DeletedLink>, FetchError>> + Send + 'static,
    {
        let scope = LinkScope::at_base(base, link_type.into());
        self.deleted_view("deleted_link_targets", scope, DeletedKey::Target, fetch)
    }

    /// Tracks a record that can never be updated.
    ///
    /// Fetches with backoff until the record is found, publishes it once,
    /// and never fetches again for the rest of the activation. If the
    /// record never appears the view stays pending; apply a timeout
    /// externally if one is needed.
    pub fn immutable_record<F, Fut>(&self, fetch: F) -> View<Record>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Record>, FetchError>> + Send + 'static,
    {
        let span = debug_span!("view", kind = "immutable_record");
        let fetch = Arc::new(fetch);
        View::new(move |publisher| {
            let fetch = fetch.clone();
            Activation::spawn(
                async move {
                    let record = retry::until_found(move || (fetch)()).await;
                    publisher.publish_value(record);
                }
                .instrument(span.clone()),
            )
        })
    }

    /// Tracks the latest revision of a record.
    ///
    /// The fetch function resolves the revision chain and returns the
    /// current tip, `None` when the record does not exist, or
    /// [`FetchError::ConflictingUpdates`] when it finds concurrent tips.
    pub fn latest_record<F, Fut>(&self, fetch: F) -> View<Record>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Record>, FetchError>> + Send + 'static,
    {
        let span = debug_span!("view", kind = "latest_record");
        let fetch = Arc::new(fetch);
        let signals = self.signals.clone();
        let poll_interval = self.options.poll_interval;
        View::new(move |publisher| {
            Activation::spawn(
                records::run_latest(publisher, signals.subscribe(), poll_interval, fetch.clone())
                    .instrument(span.clone()),
            )
        })
    }

    /// Tracks every revision observed for a record, in fetch order with
    /// signal-applied revisions appended.
    pub fn all_revisions<F, Fut>(&self, fetch: F) -> View<Vec<Record>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Record>, FetchError>> + Send + 'static,
    {
        let span = debug_span!("view", kind = "all_revisions");
        let fetch = Arc::new(fetch);
        let signals = self.signals.clone();
        let poll_interval = self.options.poll_interval;
        View::new(move |publisher| {
            Activation::spawn(
                records::run_revisions(publisher, signals.subscribe(), poll_interval, fetch.clone())
                    .instrument(span.clone()),
            )
        })
    }

    /// Tracks every delete action referencing the record created by
    /// `original`.
    pub fn record_deletes<F, Fut>(&self, original: ActionId, fetch: F) -> View<Vec<RecordDelete>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<RecordDelete>, FetchError>> + Send + 'static,
    {
        let span = debug_span!("view", kind = "record_deletes", original = %original.fmt_short());
        let fetch = Arc::new(fetch);
        let signals = self.signals.clone();
        let poll_interval = self.options.poll_interval;
        View::new(move |publisher| {
            Activation::spawn(
                records::run_deletes(
                    publisher,
                    signals.subscribe(),
                    poll_interval,
                    fetch.clone(),
                    original,
                )
                .instrument(span.clone()),
            )
        })
    }

    fn targets_view<F, Fut>(
        &self,
        kind: &'static str,
        scope: LinkScope,
        retype_to: Option<IdKind>,
        fetch: F,
    ) -> View<Vec<Id>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Id>, FetchError>> + Send + 'static,
    {
        let span = debug_span!("view", kind, %scope);
        let fetch = Arc::new(fetch);
        let signals = self.signals.clone();
        let poll_interval = self.options.poll_interval;
        View::new(move |publisher| {
            Activation::spawn(
                links::run_targets(
                    publisher,
                    signals.subscribe(),
                    poll_interval,
                    fetch.clone(),
                    scope.clone(),
                    retype_to,
                )
                .instrument(span.clone()),
            )
        })
    }

    fn deleted_view<F, Fut>(
        &self,
        kind: &'static str,
        scope: LinkScope,
        key: DeletedKey,
        fetch: F,
    ) -> View<Vec<DeletedLink>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<DeletedLink>, FetchError>> + Send + 'static,
    {
        let span = debug_span!("view", kind, %scope);
        let fetch = Arc::new(fetch);
        let signals = self.signals.clone();
        let poll_interval = self.options.poll_interval;
        View::new(move |publisher| {
            Activation::spawn(
                links::run_deleted(
                    publisher,
                    signals.subscribe(),
                    poll_interval,
                    fetch.clone(),
                    scope.clone(),
                    key,
                )
                .instrument(span.clone()),
            )
        })
    }
}
