//! Sync loops for the link-family views.

use std::{collections::HashSet, fmt, future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::MissedTickBehavior,
};
use tracing::{debug, trace};

use crate::{
    error::FetchError,
    id::{Id, IdKind, uniquify},
    ledger::{DeletedLink, Link, LinkDelete, LinkType, LinkTypeSet},
    signals::Signal,
    view::Publisher,
};

/// What part of the link graph a view is watching.
#[derive(Debug, Clone)]
pub(super) struct LinkScope {
    /// `None` for named collections, which have no base filter.
    base: Option<Id>,
    link_type: LinkType,
}

impl LinkScope {
    pub(super) fn at_base(base: Id, link_type: LinkType) -> Self {
        Self {
            base: Some(normalize_base(base)),
            link_type,
        }
    }

    pub(super) fn collection(link_type: LinkType) -> Self {
        Self {
            base: None,
            link_type,
        }
    }

    fn matches(&self, link: &Link, link_types: &LinkTypeSet) -> bool {
        if !link_types.contains(&self.link_type) {
            return false;
        }
        match self.base {
            None => true,
            Some(base) => normalize_base(link.base) == base,
        }
    }
}

impl fmt::Display for LinkScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            Some(base) => write!(f, "{}@{}", self.link_type, base.fmt_short()),
            None => write!(f, "{}@*", self.link_type),
        }
    }
}

/// The ledger encodes a link hanging off an agent either against the public
/// key or against the equivalent entry identifier, depending on the declared
/// direction of the link type. Comparing bases in the entry kind makes both
/// encodings equal.
fn normalize_base(id: Id) -> Id {
    match id.kind() {
        IdKind::Agent => id.retype(IdKind::Entry),
        _ => id,
    }
}

/// Tracks the targets of the non-deleted links in scope.
///
/// With `retype_to` set, targets from signals are re-addressed to that kind
/// before dedup and compare; used when the link type targets agents but the
/// ledger reports content-kind identifiers.
pub(super) async fn run_targets<F, Fut>(
    publisher: Publisher<Vec<Id>>,
    mut signals: broadcast::Receiver<Signal>,
    poll_interval: Duration,
    fetch: Arc<F>,
    scope: LinkScope,
    retype_to: Option<IdKind>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Id>, FetchError>> + Send + 'static,
{
    let retype = |id: Id| match retype_to {
        Some(kind) => id.retype(kind),
        None => id,
    };
    let mut targets: Vec<Id> = Vec::new();
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals_open = true;
    loop {
        tokio::select! {
            _ = tick.tick() => match (fetch)().await {
                Ok(fetched) => {
                    targets = uniquify(fetched.into_iter().map(retype));
                    publisher.publish_value(targets.clone());
                }
                Err(err) => {
                    debug!("fetch failed: {err}");
                    publisher.publish_error(err);
                }
            },
            signal = signals.recv(), if signals_open => match signal {
                Ok(Signal::LinkCreated { link, link_types }) if scope.matches(&link, &link_types) => {
                    let target = retype(link.target);
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                    publisher.publish_value(targets.clone());
                }
                Ok(Signal::LinkDeleted { link, link_types, .. }) if scope.matches(&link, &link_types) => {
                    let target = retype(link.target);
                    targets.retain(|t| *t != target);
                    publisher.publish_value(targets.clone());
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

/// Tracks the non-deleted links in scope, ordered by creation time.
pub(super) async fn run_links<F, Fut>(
    publisher: Publisher<Vec<Link>>,
    mut signals: broadcast::Receiver<Signal>,
    poll_interval: Duration,
    fetch: Arc<F>,
    scope: LinkScope,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Link>, FetchError>> + Send + 'static,
{
    let mut links: Vec<Link> = Vec::new();
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals_open = true;
    loop {
        tokio::select! {
            _ = tick.tick() => match (fetch)().await {
                Ok(fetched) => {
                    links = ordered_links(fetched);
                    publisher.publish_value(links.clone());
                }
                Err(err) => {
                    debug!("fetch failed: {err}");
                    publisher.publish_error(err);
                }
            },
            signal = signals.recv(), if signals_open => match signal {
                Ok(Signal::LinkCreated { link, link_types }) if scope.matches(&link, &link_types) => {
                    if !links.iter().any(|l| l.create_action == link.create_action) {
                        links.push(link);
                        links.sort_by_key(|l| l.timestamp);
                    }
                    publisher.publish_value(links.clone());
                }
                Ok(Signal::LinkDeleted { link, delete, link_types }) if scope.matches(&link, &link_types) => {
                    links.retain(|l| l.create_action != delete.deletes);
                    publisher.publish_value(links.clone());
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

/// How a deleted-link view keys an incoming delete to an existing pair.
#[derive(Debug, Clone, Copy)]
pub(super) enum DeletedKey {
    /// By the create action of the deleted link.
    CreateAction,
    /// By the link target; for the target-oriented view, whose fetch
    /// function reports one pair per target.
    Target,
}

/// Tracks the deleted links in scope, each paired with every delete action
/// observed against it.
pub(super) async fn run_deleted<F, Fut>(
    publisher: Publisher<Vec<DeletedLink>>,
    mut signals: broadcast::Receiver<Signal>,
    poll_interval: Duration,
    fetch: Arc<F>,
    scope: LinkScope,
    key: DeletedKey,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<DeletedLink>, FetchError>> + Send + 'static,
{
    let mut deleted: Vec<DeletedLink> = Vec::new();
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals_open = true;
    loop {
        tokio::select! {
            _ = tick.tick() => match (fetch)().await {
                Ok(fetched) => {
                    deleted = ordered_deleted(fetched);
                    publisher.publish_value(deleted.clone());
                }
                Err(err) => {
                    debug!("fetch failed: {err}");
                    publisher.publish_error(err);
                }
            },
            signal = signals.recv(), if signals_open => match signal {
                Ok(Signal::LinkDeleted { link, delete, link_types }) if scope.matches(&link, &link_types) => {
                    apply_delete(&mut deleted, link, delete, key);
                    publisher.publish_value(deleted.clone());
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

fn apply_delete(deleted: &mut Vec<DeletedLink>, link: Link, delete: LinkDelete, key: DeletedKey) {
    let slot = deleted.iter_mut().find(|(known, _)| match key {
        DeletedKey::CreateAction => known.create_action == link.create_action,
        DeletedKey::Target => known.target == link.target,
    });
    match slot {
        Some((_, deletes)) => {
            // Redelivery of an already-seen delete is a no-op.
            if deletes.iter().any(|d| d.action == delete.action) {
                return;
            }
            deletes.push(delete);
            deletes.sort_by_key(|d| d.timestamp);
        }
        None => deleted.push((link, vec![delete])),
    }
    deleted.sort_by_key(|(link, _)| link.timestamp);
}

/// Deduplicates by create action (first occurrence wins) and orders the
/// pairs by link creation time and each deletion list by delete time. Sorts
/// are stable, so equal timestamps keep their arrival order.
fn ordered_deleted(fetched: Vec<DeletedLink>) -> Vec<DeletedLink> {
    let mut seen = HashSet::new();
    let mut deleted: Vec<DeletedLink> = fetched
        .into_iter()
        .filter(|(link, _)| seen.insert(link.create_action))
        .collect();
    for (_, deletes) in deleted.iter_mut() {
        deletes.sort_by_key(|d| d.timestamp);
    }
    deleted.sort_by_key(|(link, _)| link.timestamp);
    deleted
}

/// Deduplicates by create action (first occurrence wins) and orders by
/// creation time, stable.
fn ordered_links(fetched: Vec<Link>) -> Vec<Link> {
    let mut seen = HashSet::new();
    let mut links: Vec<Link> = fetched
        .into_iter()
        .filter(|l| seen.insert(l.create_action))
        .collect();
    links.sort_by_key(|l| l.timestamp);
    links
}

#[cfg(test)]
mod tests {
    use crate::ledger::Timestamp;

    use super::*;

    fn id(fill: u8, kind: IdKind) -> Id {
        Id::new(kind, [fill; 32])
    }

    fn link(create: u8, base: Id, ts: u64) -> Link {
        Link {
            create_action: id(create, IdKind::Action),
            base,
            target: id(create.wrapping_add(100), IdKind::Entry),
            tag: None,
            timestamp: Timestamp::from_micros(ts),
            author: id(0xee, IdKind::Agent),
        }
    }

    fn delete(action: u8, of: &Link, ts: u64) -> LinkDelete {
        LinkDelete {
            action: id(action, IdKind::Action),
            deletes: of.create_action,
            timestamp: Timestamp::from_micros(ts),
            author: id(0xee, IdKind::Agent),
        }
    }

    #[test]
    fn ordered_links_dedups_and_sorts() {
        let base = id(1, IdKind::Entry);
        let a = link(10, base, 300);
        let b = link(11, base, 100);
        let c = link(12, base, 200);
        let out = ordered_links(vec![a.clone(), b.clone(), a.clone(), c.clone()]);
        assert_eq!(out, vec![b, c, a]);
    }

    #[test]
    fn scope_normalizes_agent_bases_on_both_sides() {
        let agent = id(5, IdKind::Agent);
        let scope = LinkScope::at_base(agent, "member".into());

        let via_entry = link(20, agent.retype(IdKind::Entry), 1);
        let via_agent = link(21, agent, 2);
        let elsewhere = link(22, id(6, IdKind::Entry), 3);
        let types = LinkTypeSet::from("member");
        assert!(scope.matches(&via_entry, &types));
        assert!(scope.matches(&via_agent, &types));
        assert!(!scope.matches(&elsewhere, &types));
    }

    #[test]
    fn scope_matches_any_satisfied_type_name() {
        let base = id(1, IdKind::Entry);
        let scope = LinkScope::at_base(base, "member".into());
        let l = link(30, base, 1);
        let types: LinkTypeSet = ["member", "roster"]
            .into_iter()
            .map(LinkType::from)
            .collect();
        assert!(scope.matches(&l, &types));
        assert!(!scope.matches(&l, &LinkTypeSet::from("roster")));

        let collection = LinkScope::collection("roster".into());
        assert!(collection.matches(&l, &types));
    }

    #[test]
    fn apply_delete_aggregates_and_ignores_redelivery() {
        let base = id(1, IdKind::Entry);
        let l = link(40, base, 100);
        let d1 = delete(50, &l, 500);
        let d2 = delete(51, &l, 400);

        let mut deleted = Vec::new();
        apply_delete(&mut deleted, l.clone(), d1.clone(), DeletedKey::CreateAction);
        assert_eq!(deleted, vec![(l.clone(), vec![d1.clone()])]);

        // A second delete by another agent sorts before the first by time.
        apply_delete(&mut deleted, l.clone(), d2.clone(), DeletedKey::CreateAction);
        assert_eq!(deleted, vec![(l.clone(), vec![d2.clone(), d1.clone()])]);

        // Redelivery changes nothing.
        apply_delete(&mut deleted, l.clone(), d1.clone(), DeletedKey::CreateAction);
        assert_eq!(deleted, vec![(l, vec![d2, d1])]);
    }

    #[test]
    fn apply_delete_keys_by_target_when_asked() {
        let base = id(1, IdKind::Entry);
        let mut first = link(60, base, 100);
        let mut second = link(61, base, 200);
        second.target = first.target;
        let d1 = delete(70, &first, 300);
        let d2 = delete(71, &second, 400);

        let mut deleted = Vec::new();
        apply_delete(&mut deleted, first.clone(), d1.clone(), DeletedKey::Target);
        apply_delete(&mut deleted, second, d2.clone(), DeletedKey::Target);
        // Same target: both deletes aggregate under the first-known link.
        assert_eq!(deleted, vec![(first, vec![d1, d2])]);

        first = link(62, base, 100);
        second = link(63, base, 200);
        second.target = first.target;
        let d1 = delete(72, &first, 300);
        let d2 = delete(73, &second, 400);
        let mut by_action = Vec::new();
        apply_delete(&mut by_action, first.clone(), d1.clone(), DeletedKey::CreateAction);
        apply_delete(&mut by_action, second.clone(), d2.clone(), DeletedKey::CreateAction);
        // Keyed by create action the two links stay distinct.
        assert_eq!(by_action, vec![(first, vec![d1]), (second, vec![d2])]);
    }

    #[test]
    fn ordered_deleted_sorts_pairs_and_deletions() {
        let base = id(1, IdKind::Entry);
        let early = link(80, base, 100);
        let late = link(81, base, 200);
        let d_late = delete(90, &early, 900);
        let d_early = delete(91, &early, 800);
        let out = ordered_deleted(vec![
            (late.clone(), vec![]),
            (early.clone(), vec![d_late.clone(), d_early.clone()]),
        ]);
        assert_eq!(out, vec![(early, vec![d_early, d_late]), (late, vec![])]);
    }
}
