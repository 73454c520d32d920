//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use regex::RegexSet;

// Static per-area configuration: which interfaces participate in neighbor
// discovery, which interface addresses are redistributed, and which keys the
// area store accepts.
#[derive(Clone, Debug)]
pub struct AreaConfig {
    pub id: String,
    // Interfaces eligible for adjacency discovery.
    neighbor_ifnames: RegexSet,
    // Interfaces whose global unicast addresses are redistributed.
    redistribute_ifnames: RegexSet,
    // Accepted key prefixes; empty means no filter.
    pub key_filters: Vec<String>,
    // Spanning-star flood optimization root, if enabled.
    pub flood_root: Option<String>,
}

// ===== impl AreaConfig =====

impl AreaConfig {
    pub fn new(
        id: String,
        neighbor_regexes: &[String],
        redistribute_regexes: &[String],
        key_filters: Vec<String>,
        flood_root: Option<String>,
    ) -> Result<AreaConfig, regex::Error> {
        Ok(AreaConfig {
            id,
            neighbor_ifnames: anchored_set(neighbor_regexes)?,
            redistribute_ifnames: anchored_set(redistribute_regexes)?,
            key_filters,
            flood_root,
        })
    }

    // Returns whether the interface participates in neighbor discovery.
    pub fn matches_neighbor_ifname(&self, ifname: &str) -> bool {
        self.neighbor_ifnames.is_match(ifname)
    }

    // Returns whether the interface's addresses are redistributed.
    pub fn matches_redistribute_ifname(&self, ifname: &str) -> bool {
        self.redistribute_ifnames.is_match(ifname)
    }
}

// ===== helper functions =====

// Interface-name patterns always match the whole name.
fn anchored_set(regexes: &[String]) -> Result<RegexSet, regex::Error> {
    RegexSet::new(
        regexes
            .iter()
            .map(|regex| format!("^(?:{})$", regex))
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_name_matching() {
        let area = AreaConfig::new(
            "0".to_owned(),
            &["eth[0-9]+".to_owned()],
            &["lo".to_owned()],
            vec![],
            None,
        )
        .unwrap();

        assert!(area.matches_neighbor_ifname("eth0"));
        assert!(area.matches_neighbor_ifname("eth12"));
        assert!(!area.matches_neighbor_ifname("eth0.100"));
        assert!(!area.matches_neighbor_ifname("veth0"));
        assert!(area.matches_redistribute_ifname("lo"));
        assert!(!area.matches_redistribute_ifname("lo0"));
    }
}
