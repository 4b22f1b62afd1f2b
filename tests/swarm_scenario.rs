//! Live two-node swarm test.
//!
//! Needs two Docker engines with the plain-HTTP API enabled:
//!
//! ```bash
//! SWARM_MASTER_ADDRESS=http://core-01:2375 \
//! SWARM_WORKER_ADDRESS=http://core-02:2375 \
//!     cargo test --test swarm_scenario -- --nocapture --test-threads=1
//! ```
//!
//! Skipped when either variable is unset.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use swarm_converge::config::HarnessConfig;
use swarm_converge::poll::{PollConfig, Poller};
use swarm_converge::scenario::{self, ScenarioConfig};
use swarm_converge::swarm::{expect, DiscoverOptions, InitOptions, Swarm};
use tokio_util::sync::CancellationToken;

/// Both tests reset the same two engines
static ENGINES: Mutex<()> = Mutex::new(());

/// Skip the test unless both engine addresses are configured
macro_rules! require_engines {
    ($guard:ident) => {{
        let mut config = HarnessConfig::default();
        config.apply_env();
        if config.master_address.is_none() || config.worker_address.is_none() {
            eprintln!("skipping: SWARM_MASTER_ADDRESS and SWARM_WORKER_ADDRESS not set");
            return;
        }
        $guard = ENGINES.lock().unwrap_or_else(|e| e.into_inner());
        config
    }};
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("swarm_converge=debug"))
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_attach_to_running_swarm() {
    let _guard: MutexGuard<()>;
    let config = require_engines!(_guard);
    init_logging();

    let master = config.master().unwrap();
    let worker = config.worker().unwrap();
    let _ = Swarm::leave(&worker, true).await;
    let _ = Swarm::leave(&master, true).await;

    let mut swarm = Swarm::init(&master, InitOptions::default()).await.unwrap();
    let worker_node = swarm.join_worker(&worker).await.unwrap();
    assert!(!worker_node.id.is_empty());

    let mut spec = config.service_spec().unwrap();
    spec.set_replicas(3);
    swarm.create_service(&spec).await.unwrap();
    assert_eq!(swarm.services().await.unwrap().len(), 1);

    let attached = Swarm::find(
        &master,
        DiscoverOptions {
            discover_nodes: true,
            docker_api_port: config.docker_api_port,
        },
    )
    .await
    .unwrap();
    assert_eq!(attached.id(), swarm.id());
    assert_eq!(attached.services().await.unwrap().len(), 1);

    let poller = Poller::new(PollConfig::new(20, Duration::from_secs(1))).named("nodes ready");
    let nodes = attached
        .wait_for_nodes(&poller, |nodes| {
            nodes.len() == 2 && nodes.iter().all(|n| n.is_ready())
        })
        .await
        .unwrap()
        .into_result("nodes ready")
        .unwrap();
    assert_eq!(nodes.len(), 2);

    let poller = Poller::new(PollConfig::new(60, Duration::from_secs(1))).named("tasks running");
    attached
        .wait_for_tasks(&poller, expect::tasks_running(3))
        .await
        .unwrap()
        .into_result("tasks running")
        .unwrap();

    let report = swarm.remove().await;
    assert!(
        report.failures().iter().all(|f| !f.step.starts_with("remove service")),
        "{:?}",
        report.failures()
    );
}

#[tokio::test]
async fn test_add_and_scale_service() {
    let _guard: MutexGuard<()>;
    let config = require_engines!(_guard);
    init_logging();

    let scenario = ScenarioConfig::from_harness(&config).unwrap();
    let report = scenario::run(
        &config.master().unwrap(),
        &config.worker().unwrap(),
        &scenario,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.steps.len(), 10);
    for step in &report.steps {
        eprintln!("{:<34} {:>3} attempt(s) {:?}", step.name, step.attempts, step.elapsed);
    }
}
