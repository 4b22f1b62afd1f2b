//! Two-node swarm reconciliation scenario
//!
//! Builds a swarm from a manager and a worker engine, then walks it through
//! service placement, drain, scale-out, node loss and teardown, waiting for
//! the cluster to converge after every change. The swarm is removed at the
//! end whether or not the run succeeded.

use crate::cleanup::CleanupReport;
use crate::config::HarnessConfig;
use crate::error::{ConvergeError, Result};
use crate::poll::{PollConfig, PollResult, Poller};
use crate::swarm::{expect, network, Connection, InitOptions, ServiceSpec, Swarm};
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Scenario settings
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Replicas the service starts with; it is later scaled to twice this
    pub replicas: u64,
    /// Service to deploy
    pub service: ServiceSpec,
    /// Overlay network name, `overlay<unix time>` when unset
    pub network_name: Option<String>,
    /// Retry settings for every wait
    pub poll: PollConfig,
}

impl ScenarioConfig {
    pub fn new(service: ServiceSpec, poll: PollConfig) -> Self {
        Self {
            replicas: 5,
            service,
            network_name: None,
            poll,
        }
    }

    pub fn with_replicas(mut self, replicas: u64) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_network_name(mut self, name: impl Into<String>) -> Self {
        self.network_name = Some(name.into());
        self
    }

    pub fn from_harness(config: &HarnessConfig) -> Result<Self> {
        Ok(Self::new(config.service_spec()?, config.poll.to_poll_config()?)
            .with_replicas(config.replicas))
    }

    fn network_name(&self) -> String {
        self.network_name
            .clone()
            .unwrap_or_else(|| format!("overlay{}", Utc::now().timestamp()))
    }
}

/// A wait that converged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// What a scenario run did
#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    /// Swarm ID, once initialized
    pub swarm_id: Option<String>,
    /// Overlay network name
    pub network: Option<String>,
    /// Leaving stale swarms before the run
    pub reset: CleanupReport,
    /// Converged waits, in order
    pub steps: Vec<StepReport>,
    /// Teardown
    pub cleanup: CleanupReport,
}

impl ScenarioReport {
    fn finish<T>(&mut self, name: &str, result: PollResult<T, ConvergeError>) -> Result<T> {
        let (attempts, elapsed) = (result.attempts(), result.elapsed());
        let value = result.into_result(name)?;
        self.steps.push(StepReport {
            name: name.to_string(),
            attempts,
            elapsed,
        });
        Ok(value)
    }
}

/// Run the scenario against a manager and a worker engine.
///
/// Both engines are forced out of any swarm first. Returns the report on
/// success; on failure the swarm is still torn down before the error is
/// returned.
pub async fn run(
    master: &Connection,
    worker: &Connection,
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::default();
    if config.replicas == 0 {
        return Err(ConvergeError::InvalidConfig(
            "scenario needs at least one replica".to_string(),
        ));
    }
    config.poll.validate()?;

    report
        .reset
        .run("leave worker", Swarm::leave(worker, true))
        .await;
    report
        .reset
        .run("leave master", Swarm::leave(master, true))
        .await;

    let mut swarm = Swarm::init(master, InitOptions::default()).await?;
    report.swarm_id = Some(swarm.id().to_string());

    let run = Run {
        worker,
        config,
        cancel,
    };
    let outcome = run.drive(&mut swarm, &mut report).await;

    let cleanup = swarm.remove().await;
    report.cleanup.merge(cleanup);

    outcome?;
    info!(
        steps = report.steps.len(),
        cleanup_failures = report.cleanup.failures().len(),
        "Scenario finished"
    );
    Ok(report)
}

struct Run<'a> {
    worker: &'a Connection,
    config: &'a ScenarioConfig,
    cancel: &'a CancellationToken,
}

impl Run<'_> {
    fn poller(&self, name: &str) -> Poller {
        Poller::new(self.config.poll.clone())
            .named(name)
            .with_cancellation(self.cancel.clone())
    }

    async fn drive(&self, swarm: &mut Swarm, report: &mut ScenarioReport) -> Result<()> {
        let replicas = self.config.replicas as usize;

        let step = "manager ready";
        report.finish(
            step,
            swarm
                .wait_for_nodes(&self.poller(step), expect::node_count(1))
                .await?,
        )?;

        let worker_node = swarm.join_worker(self.worker).await?;
        let step = "worker joined";
        report.finish(
            step,
            swarm
                .wait_for_nodes(&self.poller(step), expect::node_count(2))
                .await?,
        )?;

        let network_name = self.config.network_name();
        report.network = Some(network_name.clone());
        report
            .cleanup
            .run(
                "remove stale network on master",
                swarm.remove_network_with_name(&network_name),
            )
            .await;
        report
            .cleanup
            .run(
                "remove stale network on worker",
                network::remove_by_name(self.worker, &network_name),
            )
            .await;
        let overlay = swarm.create_network_overlay(&network_name).await?;
        info!(network = %overlay.name, subnets = ?overlay.subnets(), "Overlay network ready");

        let mut spec = self.config.service.clone();
        spec.set_replicas(self.config.replicas);
        spec.attach_network(&overlay.id);
        let service = swarm.create_service(&spec).await?;

        let step = "network attached to service";
        report.finish(
            step,
            swarm
                .wait_for_services(&self.poller(step), expect::service_has_network(&overlay.id))
                .await?,
        )?;

        let step = "tasks running";
        report.finish(
            step,
            swarm
                .wait_for_tasks(&self.poller(step), expect::tasks_running(replicas))
                .await?,
        )?;

        swarm.drain_node(&worker_node.id).await?;
        let step = "tasks moved off drained worker";
        report.finish(
            step,
            swarm
                .wait_for_tasks(
                    &self.poller(step),
                    expect::running_off_node(&worker_node.id, replicas),
                )
                .await?,
        )?;

        let scaled = self.config.replicas * 2;
        swarm.scale_service(&service.id, scaled).await?;
        let step = "service scaled";
        report.finish(
            step,
            swarm
                .wait_for_tasks(&self.poller(step), expect::tasks_running(scaled as usize))
                .await?,
        )?;

        swarm.leave_node(&worker_node.id, false).await?;
        let step = "worker down";
        report.finish(
            step,
            swarm
                .wait_for_nodes(&self.poller(step), expect::workers_down(1))
                .await?,
        )?;

        let step = "tasks active after worker left";
        report.finish(
            step,
            swarm
                .wait_for_tasks(&self.poller(step), expect::active_tasks(scaled as usize))
                .await?,
        )?;

        // Networks deleted through the manager stay behind on former workers.
        report
            .cleanup
            .run(
                "remove network on worker",
                network::remove(self.worker, &overlay.id),
            )
            .await;
        swarm.remove_node(&worker_node.id, false).await?;
        let step = "worker removed";
        report.finish(
            step,
            swarm
                .wait_for_nodes(&self.poller(step), expect::node_count(1))
                .await?,
        )?;

        swarm.remove_service(&service.id).await?;
        let step = "tasks removed";
        report.finish(
            step,
            swarm
                .wait_for_tasks(&self.poller(step), expect::no_tasks())
                .await?,
        )?;

        swarm.remove_network(&overlay.id).await?;
        Ok(())
    }
}
