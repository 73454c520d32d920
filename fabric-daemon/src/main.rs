//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod platform;
mod transport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use config::Config;
use fabric_decision::instance::{Decision, DecisionConfig};
use fabric_fib::instance::{Fib, FibConfig};
use fabric_kvstore::instance::{KvAreaConfig, KvStore, KvStoreConfig};
use fabric_link_monitor::instance::{LinkMonitor, LinkMonitorConfig};
use fabric_prefix_manager::instance::{PrefixManager, PrefixManagerConfig};
use fabric_utils::Database;
use fabric_utils::area::AreaConfig;
use fabric_utils::mpls::Label;
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(config.stdout.colors)
            .with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("fabric=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

fn open_database(path: &str) -> Database {
    let db = PickleDb::load(
        path,
        PickleDbDumpPolicy::AutoDump,
        SerializationMethod::Json,
    )
    .unwrap_or_else(|_| {
        PickleDb::new(
            path,
            PickleDbDumpPolicy::AutoDump,
            SerializationMethod::Json,
        )
    });
    Arc::new(Mutex::new(db))
}

// Components run as blocking tasks backed by OS threads: processing a
// single event may take longer than is appropriate for the cooperative
// scheduler, so preemption is left to the OS.
fn spawn_component<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::task::spawn_blocking(|| {
        tokio::runtime::Handle::current().block_on(fut)
    });
}

async fn run(config: Config, assume_drained: bool) {
    let db = open_database(&config.database_path);

    // Area table.
    let areas = config
        .areas
        .iter()
        .map(|area| {
            AreaConfig::new(
                area.id.clone(),
                &area.neighbor_regexes,
                &area.redistribute_regexes,
                area.key_filters.clone(),
                area.flood_root.clone(),
            )
            .expect("invalid interface regex")
        })
        .collect::<Vec<_>>();
    let area_ids = areas.iter().map(|area| area.id.clone()).collect::<Vec<_>>();

    // Component request/event queues.
    let (kv_tx, kv_rx) = mpsc::unbounded_channel();
    let (prefix_tx, prefix_rx) = mpsc::unbounded_channel();
    let (lm_tx, lm_rx) = mpsc::unbounded_channel();
    let (decision_tx, decision_rx) = mpsc::unbounded_channel();
    let (route_tx, route_rx) = mpsc::unbounded_channel();
    let (spark_tx, spark_rx) = mpsc::unbounded_channel();
    let (netlink_tx, netlink_rx) = mpsc::unbounded_channel();

    // KV-Store, plus its peer transport.
    let rpc = Arc::new(transport::TcpPeerRpc::new(
        config.node_id.clone(),
        Duration::from_secs(5),
    ));
    let kv_config = KvStoreConfig {
        node_id: config.node_id.clone(),
        areas: areas
            .iter()
            .map(|area| KvAreaConfig {
                id: area.id.clone(),
                key_filters: area.key_filters.clone(),
                flood_root: area.flood_root.clone(),
            })
            .collect(),
    };
    let (mut kvstore, kv_proto_rx) = KvStore::new(kv_config, rpc);
    let publications = kvstore.subscribe_publications();
    let sync_events = kvstore.subscribe_sync_events();
    let _kv_server = transport::kv_server(
        config
            .kv_listen_addr
            .parse()
            .expect("invalid kv listen address"),
        kvstore.proto_tx(),
    );

    // Link-Monitor.
    let lm_config = LinkMonitorConfig {
        node_id: config.node_id.clone(),
        areas: Arc::new(areas),
        node_label: Label::new(config.link_monitor.node_label),
        use_rtt_metric: config.link_monitor.use_rtt_metric,
        backoff_initial: Duration::from_millis(
            config.link_monitor.backoff_initial_ms,
        ),
        backoff_max: Duration::from_millis(config.link_monitor.backoff_max_ms),
        link_throttle: Duration::from_millis(
            config.link_monitor.link_throttle_ms,
        ),
        startup_hold: Duration::from_millis(
            config.link_monitor.startup_hold_ms,
        ),
        key_ttl: config.kvstore.key_ttl,
        assume_drained,
    };
    let (link_monitor, lm_proto_rx) = LinkMonitor::new(
        lm_config,
        Some(db.clone()),
        kv_tx.clone(),
        prefix_tx.clone(),
    );

    // Prefix-Manager.
    let pm_config = PrefixManagerConfig {
        node_id: config.node_id.clone(),
        areas: area_ids,
        key_ttl: config.kvstore.key_ttl,
    };
    let prefix_manager = PrefixManager::new(pm_config, kv_tx.clone());

    // Decision.
    let decision_config = DecisionConfig {
        node_id: config.node_id.clone(),
        ecmp_width: config.decision.ecmp_width,
        spf_initial_delay: config.decision.spf_initial_delay,
        spf_short_delay: config.decision.spf_short_delay,
        spf_long_delay: config.decision.spf_long_delay,
        spf_time_to_learn: config.decision.spf_time_to_learn,
        spf_hold_down: config.decision.spf_hold_down,
    };
    let (decision, decision_proto_rx) =
        Decision::new(decision_config, route_tx);

    // Fib.
    let fib_config = FibConfig {
        retry_initial: Duration::from_millis(config.fib.retry_initial_ms),
        retry_max: Duration::from_millis(config.fib.retry_max_ms),
        sync_interval: Duration::from_secs(config.fib.sync_interval_s),
    };
    let (fib, fib_proto_rx) =
        Fib::new(fib_config, Arc::new(platform::DryRunPlatform::default()));

    // Spawn the component event loops.
    spawn_component(kvstore.run(kv_rx, kv_proto_rx));
    spawn_component(link_monitor.run(spark_rx, netlink_rx, lm_rx, lm_proto_rx));
    spawn_component(prefix_manager.run(prefix_rx));
    spawn_component(decision.run(
        publications,
        sync_events,
        decision_rx,
        decision_proto_rx,
    ));
    spawn_component(fib.run(route_rx, fib_proto_rx));

    info!("all components running");

    // The external collaborators attach through these queues: the neighbor
    // discovery daemon feeds spark_tx, the kernel event decoder feeds
    // netlink_tx, and the management plane drives the request channels.
    // Queue closure is the shutdown signal for every component.
    let _ingress = (spark_tx, netlink_tx, lm_tx, decision_tx, prefix_tx, kv_tx);
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to wait for interrupt signal");
    }
    info!("shutting down");
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = Command::new("fabricd")
        .about("Link-state routing agent for IP fabrics")
        .version(clap::crate_version!())
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::new("assume-drained")
                .long("assume-drained")
                .action(ArgAction::SetTrue)
                .help(
                    "Start drained when no persisted drain state exists.",
                ),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.get_one::<String>("config").map(String::as_str);
    let config = Config::load(config_file);
    let assume_drained = matches.get_flag("assume-drained");

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            run(config, assume_drained).await;
        });
}
