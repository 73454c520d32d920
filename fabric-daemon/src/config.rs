//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub node_id: String,
    pub database_path: String,
    pub kv_listen_addr: String,
    pub areas: Vec<Area>,
    pub kvstore: KvStore,
    pub link_monitor: LinkMonitor,
    pub decision: Decision,
    pub fib: Fib,
    pub logging: Logging,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Area {
    pub id: String,
    pub neighbor_regexes: Vec<String>,
    pub redistribute_regexes: Vec<String>,
    pub key_filters: Vec<String>,
    pub flood_root: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KvStore {
    // Lifetime of originated keys, in milliseconds.
    pub key_ttl: i64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkMonitor {
    pub node_label: u32,
    pub use_rtt_metric: bool,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub link_throttle_ms: u64,
    pub startup_hold_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Decision {
    pub ecmp_width: usize,
    pub spf_initial_delay: u32,
    pub spf_short_delay: u32,
    pub spf_long_delay: u32,
    pub spf_time_to_learn: u32,
    pub spf_hold_down: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Fib {
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub sync_interval_s: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub colors: bool,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/fabricd.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => toml::from_str(&config_str)
                .expect("failed to parse configuration file"),
            Err(_) => {
                eprintln!(
                    "failed to read configuration file, using defaults"
                );
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            node_id: "node".to_owned(),
            database_path: "/var/run/fabricd.db".to_owned(),
            kv_listen_addr: "[::]:2018".to_owned(),
            areas: vec![Area::default()],
            kvstore: KvStore::default(),
            link_monitor: LinkMonitor::default(),
            decision: Decision::default(),
            fib: Fib::default(),
            logging: Logging::default(),
        }
    }
}

impl Default for Area {
    fn default() -> Area {
        Area {
            id: "0".to_owned(),
            neighbor_regexes: vec![".*".to_owned()],
            redistribute_regexes: vec!["lo".to_owned()],
            key_filters: vec![],
            flood_root: None,
        }
    }
}

impl Default for KvStore {
    fn default() -> KvStore {
        KvStore { key_ttl: 300_000 }
    }
}

impl Default for LinkMonitor {
    fn default() -> LinkMonitor {
        LinkMonitor {
            node_label: 0,
            use_rtt_metric: false,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 8_000,
            link_throttle_ms: 20,
            startup_hold_ms: 10_000,
        }
    }
}

impl Default for Decision {
    fn default() -> Decision {
        Decision {
            ecmp_width: 16,
            spf_initial_delay: 50,
            spf_short_delay: 50,
            spf_long_delay: 500,
            spf_time_to_learn: 1_000,
            spf_hold_down: 2_000,
        }
    }
}

impl Default for Fib {
    fn default() -> Fib {
        Fib {
            retry_initial_ms: 500,
            retry_max_ms: 8_000,
            sync_interval_s: 60,
        }
    }
}

impl Default for Logging {
    fn default() -> Logging {
        Logging {
            stdout: LoggingStdout::default(),
        }
    }
}

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            colors: true,
        }
    }
}
