//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use fabric_utils::kv::{self, KvRequest, Value};
use fabric_utils::prefix::{
    PrefixEntry, PrefixType, PrefixUpdateRequest, resolve_forwarding,
    select_winners,
};
use fabric_utils::{UnboundedReceiver, UnboundedSender};
use ipnetwork::IpNetwork;

use crate::debug::Debug;

#[derive(Clone, Debug)]
pub struct PrefixManagerConfig {
    pub node_id: String,
    // All configured area ids; the default advertisement scope.
    pub areas: Vec<String>,
    // Lifetime of the advertised `prefix:` keys, in milliseconds. Finite,
    // so withdrawn prefixes age out of the replicated store.
    pub key_ttl: i64,
}

// One prefix received from a local source.
#[derive(Clone, Debug)]
struct OriginatedPrefix {
    entry: PrefixEntry,
    // None advertises into every configured area.
    dst_areas: Option<Vec<String>>,
}

// Prefix-Manager instance: aggregates prefixes across origin types, selects
// the best advertisement per prefix and owns the `prefix:*` key space.
pub struct PrefixManager {
    pub config: PrefixManagerConfig,
    // Received prefixes, per origin type.
    entries: BTreeMap<PrefixType, BTreeMap<IpNetwork, OriginatedPrefix>>,
    // Currently advertised keys with their version counters.
    advertised: BTreeMap<String, (i64, PrefixEntry)>,
    kv_tx: UnboundedSender<KvRequest>,
}

// ===== impl PrefixManager =====

impl PrefixManager {
    pub fn new(
        config: PrefixManagerConfig,
        kv_tx: UnboundedSender<KvRequest>,
    ) -> PrefixManager {
        PrefixManager {
            config,
            entries: Default::default(),
            advertised: Default::default(),
            kv_tx,
        }
    }

    /// Runs the event loop until the request queue is closed.
    pub async fn run(
        mut self,
        mut requests: UnboundedReceiver<PrefixUpdateRequest>,
    ) {
        while let Some(request) = requests.recv().await {
            self.process_request(request);
        }
    }

    pub fn process_request(&mut self, request: PrefixUpdateRequest) {
        match request {
            PrefixUpdateRequest::Add { entries, dst_areas } => {
                for entry in entries {
                    self.entries
                        .entry(entry.prefix_type)
                        .or_default()
                        .insert(
                            entry.prefix,
                            OriginatedPrefix {
                                entry,
                                dst_areas: dst_areas.clone(),
                            },
                        );
                }
            }
            PrefixUpdateRequest::Withdraw { entries } => {
                for entry in entries {
                    Debug::WithdrawPrefix(&entry.prefix.to_string()).log();
                    if let Some(by_prefix) =
                        self.entries.get_mut(&entry.prefix_type)
                    {
                        by_prefix.remove(&entry.prefix);
                    }
                }
            }
            PrefixUpdateRequest::WithdrawByType { prefix_type } => {
                self.entries.remove(&prefix_type);
            }
            PrefixUpdateRequest::SyncByType {
                prefix_type,
                entries,
                dst_areas,
            } => {
                Debug::SyncByType(&format!("{:?}", prefix_type), entries.len())
                    .log();
                let by_prefix = entries
                    .into_iter()
                    .filter(|entry| entry.prefix_type == prefix_type)
                    .map(|entry| {
                        (
                            entry.prefix,
                            OriginatedPrefix {
                                entry,
                                dst_areas: dst_areas.clone(),
                            },
                        )
                    })
                    .collect();
                self.entries.insert(prefix_type, by_prefix);
            }
            PrefixUpdateRequest::GetAdvertised { responder } => {
                let advertised = self
                    .advertised
                    .values()
                    .map(|(_, entry)| entry.clone())
                    .collect();
                let _ = responder.send(advertised);
                return;
            }
        }
        self.sync_kvstore();
    }

    // ===== helper functions =====

    // Reconciles the advertised `prefix:*` keys with the current selection.
    fn sync_kvstore(&mut self) {
        let mut desired: BTreeMap<String, (String, PrefixEntry)> =
            BTreeMap::new();

        for area in &self.config.areas {
            // Group candidates per prefix across all origin types.
            let mut candidates: BTreeMap<IpNetwork, Vec<&PrefixEntry>> =
                BTreeMap::new();
            for by_prefix in self.entries.values() {
                for originated in by_prefix.values() {
                    let in_area = match &originated.dst_areas {
                        Some(dst_areas) => dst_areas.contains(area),
                        None => true,
                    };
                    if in_area {
                        candidates
                            .entry(originated.entry.prefix)
                            .or_default()
                            .push(&originated.entry);
                    }
                }
            }

            for (prefix, candidates) in candidates {
                // Candidates are collected in origin-type order, so the
                // first winner is the lowest-keyed entry of the per-type
                // table on a full metrics tie.
                let winners = select_winners(&candidates);
                let mut best = winners[0].clone();
                (best.forwarding_type, best.forwarding_algorithm) =
                    resolve_forwarding(&winners);
                best.area_stack = vec![area.clone()];
                let key = kv::prefix_key(&self.config.node_id, area, &prefix);
                desired.insert(key, (area.clone(), best));
            }
        }

        // Withdrawn keys stop being refreshed and expire everywhere.
        let withdrawn = self
            .advertised
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect::<Vec<_>>();
        for key in withdrawn {
            Debug::WithdrawPrefix(&key).log();
            let area = kv::parse_prefix_key(&key)
                .map(|(_, area, _)| area.to_owned())
                .unwrap_or_default();
            let _ = self.kv_tx.send(KvRequest::UnsetKey {
                area,
                key: key.clone(),
            });
            self.advertised.remove(&key);
        }

        // Advertise new or changed selections, one batch per area.
        let mut batches: BTreeMap<String, BTreeMap<String, Value>> =
            BTreeMap::new();
        for (key, (area, entry)) in desired {
            if self
                .advertised
                .get(&key)
                .is_some_and(|(_, advertised)| *advertised == entry)
            {
                continue;
            }
            let version = self
                .advertised
                .get(&key)
                .map(|(version, _)| version + 1)
                .unwrap_or(1);

            Debug::AdvertisePrefix(&area, &key).log();
            let value = Value::new(
                version,
                self.config.node_id.clone(),
                entry.to_bytes(),
                self.config.key_ttl,
                1,
            );
            batches.entry(area.clone()).or_default().insert(
                key.clone(),
                value,
            );
            self.advertised.insert(key, (version, entry));
        }
        for (area, key_vals) in batches {
            let _ = self.kv_tx.send(KvRequest::SetKeys {
                area,
                key_vals,
                node_ids: None,
            });
        }
    }

}

#[cfg(test)]
mod tests {
    use const_addrs::net6;
    use fabric_utils::prefix::{
        ForwardingAlgorithm, ForwardingType, PrefixMetrics,
    };
    use tokio::sync::mpsc;

    use super::*;

    fn manager() -> (PrefixManager, UnboundedReceiver<KvRequest>) {
        let (kv_tx, kv_rx) = mpsc::unbounded_channel();
        let config = PrefixManagerConfig {
            node_id: "node-a".to_owned(),
            areas: vec!["0".to_owned()],
            key_ttl: 300_000,
        };
        (PrefixManager::new(config, kv_tx), kv_rx)
    }

    fn entry(
        prefix: &str,
        prefix_type: PrefixType,
        metrics: PrefixMetrics,
    ) -> PrefixEntry {
        let mut entry =
            PrefixEntry::new(prefix.parse().unwrap(), prefix_type);
        entry.metrics = metrics;
        entry
    }

    fn drain(
        kv_rx: &mut UnboundedReceiver<KvRequest>,
    ) -> (BTreeMap<String, Value>, Vec<String>) {
        let mut set = BTreeMap::new();
        let mut unset = vec![];
        while let Ok(msg) = kv_rx.try_recv() {
            match msg {
                KvRequest::SetKeys { key_vals, .. } => set.extend(key_vals),
                KvRequest::UnsetKey { key, .. } => unset.push(key),
                _ => (),
            }
        }
        (set, unset)
    }

    #[test]
    fn best_selection_prefers_metrics_then_lowest_type() {
        let prefix = net6!("2001:db8::1/128").into();
        let mut loopback = PrefixEntry::new(prefix, PrefixType::Loopback);
        loopback.metrics = PrefixMetrics::new(1000, 100, 10);
        let mut bgp = PrefixEntry::new(prefix, PrefixType::Bgp);
        bgp.metrics = PrefixMetrics::new(1000, 200, 10);
        bgp.forwarding_type = ForwardingType::SrMpls;

        // Higher source preference wins outright.
        let winners = select_winners(&[&loopback, &bgp]);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].prefix_type, PrefixType::Bgp);

        // A full metrics tie keeps every winner and resolves the forwarding
        // fields to the most conservative values.
        bgp.metrics = loopback.metrics;
        let winners = select_winners(&[&loopback, &bgp]);
        assert_eq!(winners.len(), 2);
        assert_eq!(
            resolve_forwarding(&winners),
            (ForwardingType::Ip, ForwardingAlgorithm::SpEcmp)
        );
    }

    #[test]
    fn tied_sources_advertise_lowest_type_representative() {
        let (mut pm, mut kv_rx) = manager();
        let metrics = PrefixMetrics::default();

        pm.process_request(PrefixUpdateRequest::Add {
            entries: vec![entry("2001:db8::1/128", PrefixType::Bgp, metrics)],
            dst_areas: None,
        });
        pm.process_request(PrefixUpdateRequest::Add {
            entries: vec![entry(
                "2001:db8::1/128",
                PrefixType::Loopback,
                metrics,
            )],
            dst_areas: None,
        });

        let (set, _) = drain(&mut kv_rx);
        let key = "prefix:node-a:0:v6/128:2001:db8::1";
        let mut data = set[key].data.clone().unwrap();
        let advertised = PrefixEntry::decode(&mut data).unwrap();
        assert_eq!(advertised.prefix_type, PrefixType::Loopback);
    }

    #[test]
    fn sync_by_type_replaces_and_withdraws() {
        let (mut pm, mut kv_rx) = manager();
        let metrics = PrefixMetrics::default();

        pm.process_request(PrefixUpdateRequest::SyncByType {
            prefix_type: PrefixType::Loopback,
            entries: vec![
                entry("2001:db8::1/128", PrefixType::Loopback, metrics),
                entry("2001:db8::2/128", PrefixType::Loopback, metrics),
            ],
            dst_areas: None,
        });
        let (set, unset) = drain(&mut kv_rx);
        assert_eq!(set.len(), 2);
        assert!(unset.is_empty());
        assert!(set.contains_key("prefix:node-a:0:v6/128:2001:db8::1"));

        // Replacing the type set withdraws what disappeared.
        pm.process_request(PrefixUpdateRequest::SyncByType {
            prefix_type: PrefixType::Loopback,
            entries: vec![entry(
                "2001:db8::1/128",
                PrefixType::Loopback,
                metrics,
            )],
            dst_areas: None,
        });
        let (set, unset) = drain(&mut kv_rx);
        // The surviving prefix is unchanged, so it is not re-advertised.
        assert!(set.is_empty());
        assert_eq!(unset, vec![
            "prefix:node-a:0:v6/128:2001:db8::2".to_owned()
        ]);
    }

    #[test]
    fn better_source_replaces_advertisement_with_version_bump() {
        let (mut pm, mut kv_rx) = manager();

        pm.process_request(PrefixUpdateRequest::Add {
            entries: vec![entry(
                "2001:db8::1/128",
                PrefixType::Loopback,
                PrefixMetrics::new(1000, 100, 0),
            )],
            dst_areas: None,
        });
        let (set, _) = drain(&mut kv_rx);
        let key = "prefix:node-a:0:v6/128:2001:db8::1";
        assert_eq!(set[key].version, 1);

        // A higher-preference source takes over the same prefix.
        pm.process_request(PrefixUpdateRequest::Add {
            entries: vec![entry(
                "2001:db8::1/128",
                PrefixType::Bgp,
                PrefixMetrics::new(2000, 100, 0),
            )],
            dst_areas: None,
        });
        let (set, _) = drain(&mut kv_rx);
        assert_eq!(set[key].version, 2);
        let mut data = set[key].data.clone().unwrap();
        let advertised = PrefixEntry::decode(&mut data).unwrap();
        assert_eq!(advertised.prefix_type, PrefixType::Bgp);

        // Withdrawing the better source falls back, with another bump.
        pm.process_request(PrefixUpdateRequest::WithdrawByType {
            prefix_type: PrefixType::Bgp,
        });
        let (set, unset) = drain(&mut kv_rx);
        assert!(unset.is_empty());
        assert_eq!(set[key].version, 3);
    }
}
