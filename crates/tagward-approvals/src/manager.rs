//! ApprovalManager: the voting state machine over a [`Cache`].
//!
//! Records live under `approvals/{provider}/{identifier}`. Every mutation is
//! a read-modify-write against the cache. Creation, votes and rejections
//! are serialised through a manager-wide lock; `update` is not, so a caller
//! writing back a stale record can still overwrite a vote that landed in
//! between.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tagward_core::ProviderType;
use tagward_state::{Cache, Codec, StateError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::approval::{Approval, ApprovalStatus};
use crate::error::{ApprovalError, ApprovalResult};
use crate::sink::EventSink;

/// Key prefix shared by all approval records.
pub const KEY_PREFIX: &str = "approvals";

const REQUEST_CHANNEL_CAPACITY: usize = 64;

fn record_key(provider: ProviderType, identifier: &str) -> String {
    format!("{KEY_PREFIX}/{provider}/{identifier}")
}

fn provider_prefix(provider: Option<ProviderType>) -> String {
    match provider {
        Some(provider) => format!("{KEY_PREFIX}/{provider}/"),
        None => format!("{KEY_PREFIX}/"),
    }
}

pub struct ApprovalManager {
    cache: Arc<dyn Cache>,
    codec: Arc<dyn Codec<Approval>>,
    sink: Arc<dyn EventSink>,
    requests: broadcast::Sender<Approval>,
    votes: Mutex<()>,
}

impl ApprovalManager {
    pub fn new(
        cache: Arc<dyn Cache>,
        codec: Arc<dyn Codec<Approval>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (requests, _) = broadcast::channel(REQUEST_CHANNEL_CAPACITY);
        Self {
            cache,
            codec,
            sink,
            requests,
            votes: Mutex::new(()),
        }
    }

    /// Receive every approval request created from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Approval> {
        self.requests.subscribe()
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Persist a new approval request. Fails if an active one already exists
    /// for the key; an archived record is replaced.
    pub fn create(&self, mut approval: Approval) -> ApprovalResult<Approval> {
        let _guard = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        let key = record_key(approval.provider, &approval.identifier);
        match self.load(approval.provider, &approval.identifier) {
            Ok(existing) if !existing.archived => {
                return Err(ApprovalError::AlreadyExists {
                    provider: approval.provider,
                    identifier: approval.identifier,
                });
            }
            Ok(_) => debug!(%key, "replacing archived approval"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let now = Utc::now();
        approval.created_at = now;
        approval.updated_at = now;

        let bytes = self.codec.encode(&approval)?;
        self.cache.put_with_ttl(&key, &bytes, approval.deadline)?;
        info!(
            provider = %approval.provider,
            identifier = %approval.identifier,
            delta = %approval.delta(),
            votes_required = approval.votes_required,
            "approval request created"
        );

        // No subscribers is fine.
        let _ = self.requests.send(approval.clone());
        Ok(approval)
    }

    /// Write back a modified record.
    ///
    /// `created_at` is kept from the stored record. If the written record is
    /// approved, its event is resubmitted; resubmission failures are logged.
    pub fn update(&self, mut approval: Approval) -> ApprovalResult<Approval> {
        let existing = self.load(approval.provider, &approval.identifier)?;
        approval.created_at = existing.created_at;
        approval.updated_at = Utc::now();

        self.store(&approval)?;

        if approval.status() == ApprovalStatus::Approved {
            info!(
                provider = %approval.provider,
                identifier = %approval.identifier,
                votes = approval.votes_received,
                "approval reached quorum, resubmitting event"
            );
            if let Err(e) = self.sink.submit(approval.event.clone()) {
                error!(
                    identifier = %approval.identifier,
                    error = %e,
                    "failed to resubmit approved event"
                );
            }
        }
        Ok(approval)
    }

    /// Add one vote.
    pub fn approve(&self, provider: ProviderType, identifier: &str) -> ApprovalResult<Approval> {
        let _guard = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut approval = self.get(provider, identifier)?;
        approval.votes_received += 1;
        debug!(%provider, %identifier, votes = approval.votes_received, "vote recorded");
        self.update(approval)
    }

    /// Add one vote from `voter`. A voter who already voted is a no-op.
    pub fn approve_as(
        &self,
        provider: ProviderType,
        identifier: &str,
        voter: &str,
    ) -> ApprovalResult<Approval> {
        let _guard = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut approval = self.get(provider, identifier)?;
        if approval.voters.contains_key(voter) {
            debug!(%provider, %identifier, %voter, "duplicate vote ignored");
            return Ok(approval);
        }
        approval.voters.insert(voter.to_string(), Utc::now());
        approval.votes_received += 1;
        debug!(%provider, %identifier, %voter, votes = approval.votes_received, "vote recorded");
        self.update(approval)
    }

    /// Reject the request. Rejection is permanent for the record's lifetime.
    pub fn reject(&self, provider: ProviderType, identifier: &str) -> ApprovalResult<Approval> {
        let _guard = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut approval = self.get(provider, identifier)?;
        approval.rejected = true;
        info!(%provider, %identifier, "approval rejected");
        self.update(approval)
    }

    /// Hide a finished request from `get` and `list` without deleting it.
    pub fn archive(&self, provider: ProviderType, identifier: &str) -> ApprovalResult<()> {
        let _guard = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut approval = self.load(provider, identifier)?;
        approval.archived = true;
        approval.updated_at = Utc::now();
        self.store(&approval)?;
        debug!(%provider, %identifier, "approval archived");
        Ok(())
    }

    /// Remove a record. Missing records are not an error.
    pub fn delete(&self, provider: ProviderType, identifier: &str) -> ApprovalResult<()> {
        self.cache.delete(&record_key(provider, identifier))?;
        debug!(%provider, %identifier, "approval deleted");
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get(&self, provider: ProviderType, identifier: &str) -> ApprovalResult<Approval> {
        let approval = self.load(provider, identifier)?;
        if approval.archived {
            return Err(not_found(provider, identifier));
        }
        Ok(approval)
    }

    /// Active records for one provider, or all providers. Order is unspecified.
    ///
    /// Records that fail to decode are logged and skipped.
    pub fn list(&self, provider: Option<ProviderType>) -> ApprovalResult<Vec<Approval>> {
        Ok(self
            .decode_all(&provider_prefix(provider))?
            .into_iter()
            .filter(|a| !a.archived)
            .collect())
    }

    // ── Expiry ─────────────────────────────────────────────────────

    /// Delete every record (archived included) whose deadline has passed.
    /// Returns how many were removed.
    pub fn expire_entries(&self, now: DateTime<Utc>) -> ApprovalResult<usize> {
        let mut expired = 0;
        for approval in self.decode_all(&provider_prefix(None))? {
            if !approval.expired_at(now) {
                continue;
            }
            match self.delete(approval.provider, &approval.identifier) {
                Ok(()) => {
                    expired += 1;
                    info!(
                        provider = %approval.provider,
                        identifier = %approval.identifier,
                        "approval expired"
                    );
                }
                Err(e) => {
                    warn!(identifier = %approval.identifier, error = %e, "failed to expire approval");
                }
            }
        }
        Ok(expired)
    }

    /// Sweep once, then every `interval` until `shutdown` flips.
    pub async fn run_expiry(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        debug!(?interval, "approval expiry sweep starting");
        self.sweep();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => self.sweep(),
                _ = shutdown.changed() => {
                    debug!("approval expiry sweep shutting down");
                    break;
                }
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    fn sweep(&self) {
        match self.expire_entries(Utc::now()) {
            Ok(0) => {}
            Ok(n) => debug!(expired = n, "approval expiry sweep finished"),
            Err(e) => error!(error = %e, "approval expiry sweep failed"),
        }
    }

    fn load(&self, provider: ProviderType, identifier: &str) -> ApprovalResult<Approval> {
        let bytes = match self.cache.get(&record_key(provider, identifier)) {
            Ok(bytes) => bytes,
            Err(StateError::NotFound(_)) => return Err(not_found(provider, identifier)),
            Err(e) => return Err(e.into()),
        };
        Ok(self.codec.decode(&bytes)?)
    }

    /// Rewrite a record, carrying over whatever is left of its deadline.
    fn store(&self, approval: &Approval) -> ApprovalResult<()> {
        let bytes = self.codec.encode(approval)?;
        self.cache.put_with_ttl(
            &record_key(approval.provider, &approval.identifier),
            &bytes,
            approval.remaining_at(Utc::now()),
        )?;
        Ok(())
    }

    fn decode_all(&self, prefix: &str) -> ApprovalResult<Vec<Approval>> {
        let entries = self.cache.list(prefix)?;
        let mut approvals = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            match self.codec.decode(&bytes) {
                Ok(approval) => approvals.push(approval),
                Err(e) => warn!(%key, error = %e, "skipping undecodable approval"),
            }
        }
        Ok(approvals)
    }
}

fn not_found(provider: ProviderType, identifier: &str) -> ApprovalError {
    ApprovalError::NotFound {
        provider,
        identifier: identifier.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use tagward_core::{Event, Repository};
    use tagward_state::{JsonCodec, MemoryCache, RedbCache};

    /// Records every resubmitted event.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl EventSink for RecordingSink {
        fn submit(&self, event: Event) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn submit(&self, _event: Event) -> Result<(), SinkError> {
            Err(SinkError("pipeline closed".to_string()))
        }
    }

    fn event(tag: &str) -> Event {
        Event::new(
            Repository {
                host: String::new(),
                name: "acme/api".to_string(),
                tag: tag.to_string(),
                digest: None,
            },
            "poll",
        )
    }

    fn request(identifier: &str, votes: u32) -> Approval {
        Approval::new(ProviderType::Kubernetes, identifier, event("1.1.0"))
            .with_versions("1.0.0", "1.1.0")
            .with_votes_required(votes)
    }

    fn manager_with(cache: Arc<dyn Cache>) -> (ApprovalManager, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let manager = ApprovalManager::new(cache, Arc::new(JsonCodec::<Approval>::new()), sink.clone());
        (manager, sink)
    }

    fn manager() -> (ApprovalManager, Arc<RecordingSink>) {
        manager_with(Arc::new(RedbCache::open_in_memory().unwrap()))
    }

    const K8S: ProviderType = ProviderType::Kubernetes;

    // ── Create / Get / Update ──────────────────────────────────────

    #[test]
    fn create_then_get() {
        let (m, _) = manager();
        let created = m.create(request("default/api:1.1.0", 2)).unwrap();
        let fetched = m.get(K8S, "default/api:1.1.0").unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status(), ApprovalStatus::Pending);
    }

    #[test]
    fn create_duplicate_fails() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 2)).unwrap();
        let err = m.create(request("default/api:1.1.0", 2)).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn same_identifier_under_other_provider_is_distinct() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 2)).unwrap();
        let mut helm = request("default/api:1.1.0", 2);
        helm.provider = ProviderType::Helm;
        m.create(helm).unwrap();
        assert_eq!(m.list(None).unwrap().len(), 2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (m, _) = manager();
        assert!(m.get(K8S, "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn update_missing_is_not_found() {
        let (m, _) = manager();
        assert!(m.update(request("nope", 1)).unwrap_err().is_not_found());
    }

    #[test]
    fn update_preserves_created_at() {
        let (m, _) = manager();
        let created = m.create(request("default/api:1.1.0", 3)).unwrap();

        let mut changed = created.clone();
        changed.created_at = created.created_at + chrono::TimeDelta::days(3);
        changed.message = "edited".to_string();
        let updated = m.update(changed).unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(m.get(K8S, "default/api:1.1.0").unwrap().message, "edited");
    }

    // ── Voting ─────────────────────────────────────────────────────

    #[test]
    fn first_vote_stays_pending() {
        let (m, sink) = manager();
        m.create(request("default/api:1.1.0", 2)).unwrap();

        let a = m.approve(K8S, "default/api:1.1.0").unwrap();
        assert_eq!(a.votes_received, 1);
        assert_eq!(a.status(), ApprovalStatus::Pending);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn quorum_resubmits_exactly_once() {
        let (m, sink) = manager();
        m.create(request("default/api:1.1.0", 2)).unwrap();

        m.approve(K8S, "default/api:1.1.0").unwrap();
        let a = m.approve(K8S, "default/api:1.1.0").unwrap();

        assert_eq!(a.status(), ApprovalStatus::Approved);
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.events.lock().unwrap()[0].repository.tag, "1.1.0");
    }

    #[test]
    fn votes_are_not_clamped() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 1)).unwrap();
        m.approve(K8S, "default/api:1.1.0").unwrap();
        let a = m.approve(K8S, "default/api:1.1.0").unwrap();
        assert_eq!(a.votes_received, 2);
        assert_eq!(a.status(), ApprovalStatus::Approved);
    }

    #[test]
    fn rejection_is_sticky() {
        let (m, sink) = manager();
        m.create(request("default/api:1.1.0", 2)).unwrap();

        m.reject(K8S, "default/api:1.1.0").unwrap();
        m.approve(K8S, "default/api:1.1.0").unwrap();
        let a = m.approve(K8S, "default/api:1.1.0").unwrap();

        assert_eq!(a.votes_received, 2);
        assert!(a.rejected);
        assert_eq!(a.status(), ApprovalStatus::Rejected);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn approve_as_ignores_repeat_voter() {
        let (m, sink) = manager();
        m.create(request("default/api:1.1.0", 2)).unwrap();

        m.approve_as(K8S, "default/api:1.1.0", "alice").unwrap();
        let a = m.approve_as(K8S, "default/api:1.1.0", "alice").unwrap();
        assert_eq!(a.votes_received, 1);
        assert_eq!(sink.count(), 0);

        let a = m.approve_as(K8S, "default/api:1.1.0", "bob").unwrap();
        assert_eq!(a.votes_received, 2);
        assert_eq!(a.voters.len(), 2);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn vote_on_missing_record_is_not_found() {
        let (m, _) = manager();
        assert!(m.approve(K8S, "nope").unwrap_err().is_not_found());
        assert!(m.reject(K8S, "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn failed_resubmission_keeps_the_vote() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let m = ApprovalManager::new(cache, Arc::new(JsonCodec::<Approval>::new()), Arc::new(FailingSink));
        m.create(request("default/api:1.1.0", 1)).unwrap();

        let a = m.approve(K8S, "default/api:1.1.0").unwrap();
        assert_eq!(a.status(), ApprovalStatus::Approved);
        assert_eq!(m.get(K8S, "default/api:1.1.0").unwrap().votes_received, 1);
    }

    #[test]
    fn stored_event_is_independent_of_caller() {
        let (m, sink) = manager();
        let mut original = event("1.1.0");
        let approval = Approval::new(K8S, "default/api:1.1.0", original.clone())
            .with_versions("1.0.0", "1.1.0")
            .with_votes_required(1);
        m.create(approval).unwrap();

        original.repository.tag = "9.9.9".to_string();
        m.approve(K8S, "default/api:1.1.0").unwrap();
        assert_eq!(sink.events.lock().unwrap()[0].repository.tag, "1.1.0");
    }

    #[test]
    fn stale_update_overwrites_concurrent_vote() {
        // Votes are serialised, but an external writer holding an older copy
        // still wins: last write lands.
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 3)).unwrap();
        let stale = m.get(K8S, "default/api:1.1.0").unwrap();

        m.approve(K8S, "default/api:1.1.0").unwrap();
        m.update(stale).unwrap();

        assert_eq!(m.get(K8S, "default/api:1.1.0").unwrap().votes_received, 0);
    }

    #[test]
    fn concurrent_votes_are_all_counted() {
        let (m, sink) = manager();
        m.create(request("default/api:1.1.0", 8)).unwrap();
        let m = Arc::new(m);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let m = m.clone();
                std::thread::spawn(move || {
                    m.approve_as(K8S, "default/api:1.1.0", &format!("voter-{i}"))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let a = m.get(K8S, "default/api:1.1.0").unwrap();
        assert_eq!(a.votes_received, 8);
        assert_eq!(sink.count(), 1);
    }

    // ── Listing / Delete / Archive ─────────────────────────────────

    #[test]
    fn list_filters_by_provider() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 1)).unwrap();
        m.create(request("default/web:2.0.0", 1)).unwrap();
        let mut helm = request("default/chart:0.3.0", 1);
        helm.provider = ProviderType::Helm;
        m.create(helm).unwrap();

        assert_eq!(m.list(Some(K8S)).unwrap().len(), 2);
        assert_eq!(m.list(Some(ProviderType::Helm)).unwrap().len(), 1);
        assert_eq!(m.list(None).unwrap().len(), 3);
    }

    #[test]
    fn list_skips_undecodable_records() {
        let cache = Arc::new(MemoryCache::new());
        let (m, _) = manager_with(cache.clone());
        m.create(request("default/api:1.1.0", 1)).unwrap();
        cache.put("approvals/kubernetes/broken", b"{not json").unwrap();

        let listed = m.list(Some(K8S)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].identifier, "default/api:1.1.0");
    }

    #[test]
    fn delete_is_idempotent() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 1)).unwrap();
        m.delete(K8S, "default/api:1.1.0").unwrap();
        m.delete(K8S, "default/api:1.1.0").unwrap();
        assert!(m.get(K8S, "default/api:1.1.0").unwrap_err().is_not_found());
    }

    #[test]
    fn archived_records_are_hidden() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 1)).unwrap();
        m.archive(K8S, "default/api:1.1.0").unwrap();

        assert!(m.get(K8S, "default/api:1.1.0").unwrap_err().is_not_found());
        assert!(m.list(None).unwrap().is_empty());
    }

    #[test]
    fn create_replaces_archived_record() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let (m, _) = manager_with(cache);
        m.create(request("default/api:1.1.0", 1)).unwrap();
        m.approve(K8S, "default/api:1.1.0").unwrap();
        m.archive(K8S, "default/api:1.1.0").unwrap();

        let fresh = m.create(request("default/api:1.1.0", 2)).unwrap();
        assert_eq!(fresh.votes_received, 0);
        assert!(!fresh.archived);

        let fetched = m.get(K8S, "default/api:1.1.0").unwrap();
        assert_eq!(fetched.votes_required, 2);
        assert_eq!(fetched.status(), ApprovalStatus::Pending);
        assert_eq!(m.list(None).unwrap().len(), 1);
    }

    #[test]
    fn votes_keep_the_remaining_deadline() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let (m, _) = manager_with(cache);
        m.create(request("default/api:1.1.0", 2).with_deadline(Duration::from_millis(200)))
            .unwrap();
        m.approve(K8S, "default/api:1.1.0").unwrap();
        assert!(m.get(K8S, "default/api:1.1.0").is_ok());

        std::thread::sleep(Duration::from_millis(400));
        assert!(m.get(K8S, "default/api:1.1.0").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn subscribers_see_new_requests() {
        let (m, _) = manager();
        let mut rx = m.subscribe();
        m.create(request("default/api:1.1.0", 1)).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.identifier, "default/api:1.1.0");
    }

    // ── Expiry ─────────────────────────────────────────────────────

    #[test]
    fn expire_entries_removes_only_expired() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 1).with_deadline(Duration::from_secs(3600)))
            .unwrap();
        m.create(request("default/web:2.0.0", 1).with_deadline(Duration::from_secs(86_400)))
            .unwrap();

        let later = Utc::now() + chrono::TimeDelta::hours(2);
        assert_eq!(m.expire_entries(later).unwrap(), 1);

        let left = m.list(None).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].identifier, "default/web:2.0.0");
    }

    #[tokio::test]
    async fn expiry_loop_sweeps_and_stops() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 1).with_deadline(Duration::ZERO))
            .unwrap();
        let m = Arc::new(m);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = m.clone();
        let handle = tokio::spawn(async move {
            sweeper
                .run_expiry(Duration::from_millis(10), shutdown_rx)
                .await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(m.list(None).unwrap().is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn expiry_loop_sweeps_on_start() {
        let (m, _) = manager();
        m.create(request("default/api:1.1.0", 1).with_deadline(Duration::ZERO))
            .unwrap();
        let m = Arc::new(m);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = m.clone();
        let handle = tokio::spawn(async move {
            sweeper
                .run_expiry(Duration::from_secs(3600), shutdown_rx)
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(m.list(None).unwrap().is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
