//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use fabric_utils::kv::{
    KeyDumpParams, KvCounters, TTL_INFINITY, Value,
};
use tokio::time::Instant;

use crate::error::Error;

// Originated keys are refreshed after three quarters of their lifetime.
fn refresh_after(ttl: i64) -> Duration {
    Duration::from_millis((ttl as u64 / 4) * 3)
}

// One stored entry, with its expiry bookkeeping.
#[derive(Debug)]
pub struct KvEntry {
    pub value: Value,
    // Absent for infinite-ttl values.
    pub deadline: Option<Instant>,
    // Next self-refresh time; only set on self-originated finite-ttl keys.
    pub refresh_at: Option<Instant>,
}

// Per-area replicated map.
#[derive(Debug)]
pub struct AreaStore {
    node_id: String,
    // Keys must start with one of these prefixes; empty means no filter.
    key_filters: Vec<String>,
    entries: BTreeMap<String, KvEntry>,
    // Self-originated keys deliberately left to expire.
    no_refresh: BTreeSet<String>,
    pub counters: KvCounters,
}

// ===== impl AreaStore =====

impl AreaStore {
    pub fn new(node_id: String, key_filters: Vec<String>) -> AreaStore {
        AreaStore {
            node_id,
            key_filters,
            entries: Default::default(),
            no_refresh: Default::default(),
            counters: Default::default(),
        }
    }

    // Merges a batch of key-values into the store.
    //
    // Each key's merge is atomic and the outcome is independent of arrival
    // order, except that a value fully equal to the stored one is a no-op.
    // Returns the set of accepted changes, which must be flooded and
    // published. Accepted ttl refreshes appear with their data stripped.
    pub fn merge_key_values(
        &mut self,
        key_vals: BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        let now = Instant::now();
        let mut changed = BTreeMap::new();

        for (key, value) in key_vals {
            match self.merge_one(&key, value, now) {
                Ok(Some(value)) => {
                    changed.insert(key, value);
                }
                Ok(None) => (),
                Err(error) => {
                    self.counters.protocol_errors += 1;
                    error.log();
                }
            }
        }

        changed
    }

    fn merge_one(
        &mut self,
        key: &str,
        value: Value,
        now: Instant,
    ) -> Result<Option<Value>, Error> {
        // Area key filter.
        if !self.key_allowed(key) {
            return Err(Error::KeyFiltered(key.to_owned()));
        }

        // Reject non-positive lifetimes.
        if value.ttl <= 0 {
            return Err(Error::InvalidTtl(key.to_owned(), value.ttl));
        }

        // The digest is part of the value identity; recompute and verify.
        if value.data.is_some()
            && value.hash
                != Value::hash_of(
                    value.version,
                    &value.originator,
                    value.data.as_ref(),
                )
        {
            return Err(Error::HashMismatch(key.to_owned()));
        }

        match self
            .entries
            .get(key)
            .map(|local| value.merge_rank(&local.value))
        {
            None => {
                // A ttl refresh never creates a key.
                if value.is_ttl_refresh() {
                    self.counters.merge_losses += 1;
                    return Ok(None);
                }
                self.counters.merge_wins += 1;
                self.counters.keys += 1;
                let entry = self.new_entry(key, value.clone(), now);
                self.entries.insert(key.to_owned(), entry);
                Ok(Some(value))
            }
            Some(Ordering::Greater) => {
                // A newer identity must carry its payload.
                if value.is_ttl_refresh() {
                    self.counters.merge_losses += 1;
                    return Ok(None);
                }
                self.counters.merge_wins += 1;
                let entry = self.new_entry(key, value.clone(), now);
                self.entries.insert(key.to_owned(), entry);
                Ok(Some(value))
            }
            Some(Ordering::Equal) => {
                // Same identity: only the ttl version may advance.
                let local = self.entries.get_mut(key).unwrap();
                if value.ttl_version > local.value.ttl_version {
                    local.value.ttl_version = value.ttl_version;
                    local.value.ttl = value.ttl;
                    if value.ttl != TTL_INFINITY {
                        local.deadline = Some(
                            now + Duration::from_millis(value.ttl as u64),
                        );
                    }
                    let refresh = local.value.to_hash_only();
                    self.counters.ttl_refreshes += 1;
                    Ok(Some(refresh))
                } else {
                    Ok(None)
                }
            }
            Some(Ordering::Less) => {
                self.counters.merge_losses += 1;
                Ok(None)
            }
        }
    }

    fn new_entry(&self, key: &str, value: Value, now: Instant) -> KvEntry {
        let deadline = (value.ttl != TTL_INFINITY)
            .then(|| now + Duration::from_millis(value.ttl as u64));
        let refresh_at = (value.originator == self.node_id
            && value.ttl != TTL_INFINITY
            && !self.no_refresh.contains(key))
        .then(|| now + refresh_after(value.ttl));
        KvEntry {
            value,
            deadline,
            refresh_at,
        }
    }

    // Point lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    // Filtered full dump.
    pub fn dump_all(&self, params: &KeyDumpParams) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .filter(|(key, _)| match &params.prefix {
                Some(prefix) => key.starts_with(prefix),
                None => true,
            })
            .filter(|(_, entry)| {
                params.originators.is_empty()
                    || params.originators.contains(&entry.value.originator)
            })
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    // Hash-only dump, used to drive incremental sync.
    pub fn dump_hashes(
        &self,
        prefix: Option<&str>,
    ) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .filter(|(key, _)| match prefix {
                Some(prefix) => key.starts_with(prefix),
                None => true,
            })
            .map(|(key, entry)| (key.clone(), entry.value.to_hash_only()))
            .collect()
    }

    // Computes the values the requester is missing, given its hash snapshot.
    pub fn sync_diff(
        &self,
        remote_hashes: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .filter(|(key, entry)| match remote_hashes.get(*key) {
                Some(remote) => {
                    entry.value.merge_rank(remote) == Ordering::Greater
                }
                None => true,
            })
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    // Removes expired keys and returns them.
    pub fn expire_keys(&mut self, now: Instant) -> Vec<String> {
        let expired = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in &expired {
            self.entries.remove(key);
            self.no_refresh.remove(key);
            self.counters.keys -= 1;
            self.counters.expired_keys += 1;
        }
        expired
    }

    // Drops already-expired keys reported by a peer, without re-flooding.
    // Keys whose local deadline hasn't passed yet are kept until it does.
    pub fn remove_expired(&mut self, keys: &[String], now: Instant) {
        for key in keys {
            if let Some(entry) = self.entries.get(key)
                && entry.deadline.is_some_and(|deadline| deadline <= now)
            {
                self.entries.remove(key);
                self.no_refresh.remove(key);
                self.counters.keys -= 1;
                self.counters.expired_keys += 1;
            }
        }
    }

    // Refreshes due self-originated keys: advances their ttl version and
    // expiry deadline, and returns the refresh values to flood.
    pub fn refresh_due(&mut self, now: Instant) -> BTreeMap<String, Value> {
        let mut refreshed = BTreeMap::new();
        for (key, entry) in self.entries.iter_mut() {
            if entry.refresh_at.is_some_and(|at| at <= now) {
                entry.value.ttl_version += 1;
                entry.deadline = Some(
                    now + Duration::from_millis(entry.value.ttl as u64),
                );
                entry.refresh_at = Some(now + refresh_after(entry.value.ttl));
                refreshed.insert(key.clone(), entry.value.to_hash_only());
            }
        }
        refreshed
    }

    // Stops refreshing a self-originated key so it expires everywhere.
    pub fn unset_key(&mut self, key: &str) {
        self.no_refresh.insert(key.to_owned());
        if let Some(entry) = self.entries.get_mut(key) {
            entry.refresh_at = None;
        }
    }

    // Earliest instant at which the expiry/refresh timer must fire.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .flat_map(|entry| [entry.deadline, entry.refresh_at])
            .flatten()
            .min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_allowed(&self, key: &str) -> bool {
        self.key_filters.is_empty()
            || self
                .key_filters
                .iter()
                .any(|filter| key.starts_with(filter.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn store() -> AreaStore {
        AreaStore::new("local".to_owned(), vec![])
    }

    fn value(version: i64, originator: &str, data: &'static [u8]) -> Value {
        Value::new(
            version,
            originator.to_owned(),
            Bytes::from_static(data),
            TTL_INFINITY,
            1,
        )
    }

    fn merge_single(
        store: &mut AreaStore,
        key: &str,
        value: Value,
    ) -> Option<Value> {
        let changed = store
            .merge_key_values(BTreeMap::from([(key.to_owned(), value)]));
        changed.into_values().next()
    }

    #[test]
    fn merge_is_order_independent() {
        let v1 = value(1, "node-a", b"one");
        let v2 = value(2, "node-b", b"two");
        let v3 = value(2, "node-c", b"three");

        // Apply the same set of values in two different orders; both stores
        // must converge on the same winner.
        let mut s1 = store();
        let mut s2 = store();
        for v in [&v1, &v2, &v3] {
            merge_single(&mut s1, "k", v.clone());
        }
        for v in [&v3, &v1, &v2] {
            merge_single(&mut s2, "k", v.clone());
        }
        assert_eq!(s1.get("k"), s2.get("k"));
        // Version tie between v2 and v3: higher originator wins.
        assert_eq!(s1.get("k").unwrap().originator, "node-c");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut s = store();
        let v = value(1, "node-a", b"data");
        assert!(merge_single(&mut s, "k", v.clone()).is_some());
        // Re-delivery of the identical value is a no-op.
        assert!(merge_single(&mut s, "k", v).is_none());
        assert_eq!(s.counters.merge_wins, 1);
    }

    #[test]
    fn stale_version_is_dropped() {
        let mut s = store();
        merge_single(&mut s, "k", value(5, "node-a", b"new"));
        assert!(merge_single(&mut s, "k", value(4, "node-z", b"old")).is_none());
        assert_eq!(s.get("k").unwrap().version, 5);
        assert_eq!(s.counters.merge_losses, 1);
    }

    #[test]
    fn hash_tiebreak_on_full_version_originator_tie() {
        let va = value(1, "node-a", b"aaaa");
        let vb = value(1, "node-a", b"bbbb");
        let winner_hash = va.hash.max(vb.hash);

        let mut s1 = store();
        merge_single(&mut s1, "k", va.clone());
        merge_single(&mut s1, "k", vb.clone());
        let mut s2 = store();
        merge_single(&mut s2, "k", vb);
        merge_single(&mut s2, "k", va);

        assert_eq!(s1.get("k").unwrap().hash, winner_hash);
        assert_eq!(s2.get("k").unwrap().hash, winner_hash);
    }

    #[test]
    fn ttl_refresh_requires_full_identity() {
        let mut s = store();
        let full = Value::new(
            3,
            "node-a".to_owned(),
            Bytes::from_static(b"data"),
            10_000,
            1,
        );
        merge_single(&mut s, "k", full.clone());

        // Refresh with matching identity and advanced ttl version.
        let mut refresh = full.to_hash_only();
        refresh.ttl_version = 2;
        assert!(merge_single(&mut s, "k", refresh).is_some());
        assert_eq!(s.get("k").unwrap().ttl_version, 2);
        // Payload was preserved.
        assert!(s.get("k").unwrap().data.is_some());

        // Refresh with a stale ttl version is ignored.
        let mut stale = full.to_hash_only();
        stale.ttl_version = 2;
        assert!(merge_single(&mut s, "k", stale).is_none());

        // Refresh with a different identity is ignored.
        let mut wrong = full.to_hash_only();
        wrong.version = 4;
        wrong.ttl_version = 9;
        assert!(merge_single(&mut s, "k", wrong).is_none());
        assert_eq!(s.get("k").unwrap().version, 3);

        // A refresh never creates a key.
        let mut orphan = full.to_hash_only();
        orphan.ttl_version = 1;
        assert!(merge_single(&mut s, "other", orphan).is_none());
        assert!(s.get("other").is_none());
    }

    #[test]
    fn corrupted_hash_is_rejected() {
        let mut s = store();
        let mut v = value(1, "node-a", b"data");
        v.hash ^= 1;
        assert!(merge_single(&mut s, "k", v).is_none());
        assert_eq!(s.counters.protocol_errors, 1);
        assert!(s.is_empty());
    }

    #[test]
    fn key_filters_apply_on_ingress() {
        let mut s =
            AreaStore::new("local".to_owned(), vec!["adj:".to_owned()]);
        assert!(
            merge_single(&mut s, "adj:node-a", value(1, "node-a", b"x"))
                .is_some()
        );
        assert!(
            merge_single(&mut s, "garbage", value(1, "node-a", b"x"))
                .is_none()
        );
        assert_eq!(s.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_and_refresh() {
        let mut s = store();

        // Remote key with a finite ttl.
        let remote = Value::new(
            1,
            "node-b".to_owned(),
            Bytes::from_static(b"r"),
            10_000,
            1,
        );
        merge_single(&mut s, "remote", remote);

        // Self-originated key with the same ttl: must be refreshed at 7.5s,
        // before the remote key expires at 10s.
        let local = Value::new(
            1,
            "local".to_owned(),
            Bytes::from_static(b"l"),
            10_000,
            1,
        );
        merge_single(&mut s, "self", local);

        tokio::time::advance(Duration::from_millis(7_600)).await;
        let now = Instant::now();
        let refreshed = s.refresh_due(now);
        assert_eq!(refreshed.len(), 1);
        let refresh = refreshed.get("self").unwrap();
        assert!(refresh.is_ttl_refresh());
        assert_eq!(refresh.ttl_version, 2);
        assert!(s.expire_keys(now).is_empty());

        // The remote key expires; the refreshed local key survives.
        tokio::time::advance(Duration::from_millis(3_000)).await;
        let now = Instant::now();
        assert_eq!(s.expire_keys(now), vec!["remote".to_owned()]);
        assert!(s.get("self").is_some());
        assert_eq!(s.counters.expired_keys, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unset_key_stops_refreshing() {
        let mut s = store();
        let local = Value::new(
            1,
            "local".to_owned(),
            Bytes::from_static(b"l"),
            10_000,
            1,
        );
        merge_single(&mut s, "self", local);
        s.unset_key("self");

        tokio::time::advance(Duration::from_millis(10_100)).await;
        let now = Instant::now();
        assert!(s.refresh_due(now).is_empty());
        assert_eq!(s.expire_keys(now), vec!["self".to_owned()]);
    }
}
