//! swarm-converge - wait for a Docker Swarm to converge
//!
//! This is the main CLI entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use swarm_converge::config::HarnessConfig;
use swarm_converge::poll::{PollConfig, Poller};
use swarm_converge::scenario::{self, ScenarioConfig};
use swarm_converge::swarm::{expect, DiscoverOptions, Swarm, Task};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// swarm-converge - Docker Swarm convergence harness
#[derive(Parser)]
#[command(name = "swarm-converge")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Wait for a Docker Swarm to converge", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file (defaults to <config dir>/swarm-converge/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Manager engine address, e.g. http://core-01:2375
    #[arg(long, global = true)]
    master: Option<String>,

    /// Worker engine address, e.g. http://core-02:2375
    #[arg(long, global = true)]
    worker: Option<String>,

    /// Attempts per wait
    #[arg(long, global = true)]
    attempts: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long, global = true)]
    delay_ms: Option<u64>,

    /// Overall time limit per wait in seconds
    #[arg(long, global = true)]
    deadline_secs: Option<u64>,

    /// Abort a wait on the first failed request
    #[arg(long, global = true)]
    fail_fast: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the swarm behind the manager
    Info,

    /// Wait for the swarm to reach a state
    Wait {
        #[command(subcommand)]
        target: WaitCommands,
    },

    /// Make the configured engines leave their swarm (worker first)
    Leave {
        /// Leave even as the last manager
        #[arg(short, long)]
        force: bool,
    },

    /// Run the two-node reconciliation scenario
    Scenario {
        /// Initial replicas; the service is later scaled to twice this
        #[arg(short, long)]
        replicas: Option<u64>,
        /// Service template (YAML or JSON)
        #[arg(short, long)]
        template: Option<PathBuf>,
        /// Overlay network name
        #[arg(long)]
        network: Option<String>,
    },
}

#[derive(Subcommand)]
enum WaitCommands {
    /// Wait for a number of running tasks
    Tasks {
        /// Running task count to wait for
        #[arg(long)]
        running: usize,
        /// Require that none of them run on this node
        #[arg(long)]
        off_node: Option<String>,
        /// Only count tasks of this service
        #[arg(long)]
        service: Option<String>,
    },
    /// Wait for worker nodes to be reported down
    Workers {
        /// Worker count, all of which must be down
        #[arg(long)]
        down: usize,
    },
    /// Wait until no tasks are left
    Empty,
}

impl Cli {
    /// Layer environment and flags over the config file
    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config =
            HarnessConfig::load(self.config.as_deref()).context("loading configuration")?;
        config.apply_env();

        if let Some(master) = &self.master {
            config.master_address = Some(master.clone());
        }
        if let Some(worker) = &self.worker {
            config.worker_address = Some(worker.clone());
        }
        if let Some(attempts) = self.attempts {
            config.poll.max_attempts = attempts;
            config.poll.unbounded = false;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.poll.delay_ms = delay_ms;
            config.poll.backoff = None;
        }
        if let Some(deadline) = self.deadline_secs {
            config.poll.deadline_secs = Some(deadline);
        }
        if self.fail_fast {
            config.poll.fail_fast = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.harness_config()?;
    let poll = config
        .poll
        .to_poll_config()
        .context("invalid poll settings")?;

    let cancel = CancellationToken::new();
    let interrupted = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupted.cancel();
        }
    });

    match cli.command {
        Commands::Info => {
            let master = config.master()?;
            let swarm = Swarm::find(
                &master,
                DiscoverOptions {
                    discover_nodes: true,
                    docker_api_port: config.docker_api_port,
                },
            )
            .await
            .with_context(|| format!("attaching to swarm through {}", master))?;

            println!("Swarm:    {}", swarm.id());
            if let Some(created) = swarm.created_at() {
                println!("Created:  {}", created.to_rfc3339());
            }
            println!("Manager:  {}", swarm.connection());

            println!();
            println!(
                "{:<28} {:<16} {:<8} {:<10} {:<8}",
                "ID", "HOSTNAME", "ROLE", "STATUS", "AVAIL"
            );
            for node in swarm.nodes().await? {
                println!(
                    "{:<28} {:<16} {:<8} {:<10} {:<8}",
                    node.id,
                    node.hostname(),
                    format!("{:?}", node.role()).to_lowercase(),
                    format!("{:?}", node.state()).to_lowercase(),
                    format!("{:?}", node.availability()).to_lowercase(),
                );
            }

            println!();
            println!("{:<28} {:<20} {:<10}", "SERVICE", "NAME", "REPLICAS");
            for service in swarm.services().await? {
                let replicas = service
                    .replicas()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "global".to_string());
                println!("{:<28} {:<20} {:<10}", service.id, service.name(), replicas);
            }

            println!();
            println!("Running tasks: {}", swarm.running_task_count().await?);
            println!("Reachable engines: {}", swarm.node_hash().len());
        }

        Commands::Wait { target } => {
            let master = config.master()?;
            let swarm = Swarm::find(&master, DiscoverOptions::default()).await?;
            wait(&swarm, target, poll, &cancel).await?;
        }

        Commands::Leave { force } => {
            if config.worker_address.is_some() {
                Swarm::leave(&config.worker()?, force).await?;
            }
            Swarm::leave(&config.master()?, force).await?;
        }

        Commands::Scenario {
            replicas,
            template,
            network,
        } => {
            let mut config = config;
            if let Some(replicas) = replicas {
                config.replicas = replicas;
            }
            if let Some(template) = template {
                config.service_template = Some(template);
            }

            let master = config.master()?;
            let worker = config.worker()?;
            let mut scenario = ScenarioConfig::from_harness(&config)?;
            if let Some(network) = network {
                scenario = scenario.with_network_name(network);
            }

            let report = scenario::run(&master, &worker, &scenario, &cancel).await?;

            println!("Swarm {} converged through:", report.swarm_id.as_deref().unwrap_or("-"));
            for step in &report.steps {
                println!(
                    "  {:<34} {:>3} attempt(s) {:>8.1}s",
                    step.name,
                    step.attempts,
                    step.elapsed.as_secs_f64()
                );
            }
            for failure in report.cleanup.failures() {
                println!("  cleanup: {} failed: {}", failure.step, failure.error);
            }
            info!(cleanup_clean = report.cleanup.is_clean(), "Scenario complete");
        }
    }

    Ok(())
}

async fn wait(
    swarm: &Swarm,
    target: WaitCommands,
    poll: PollConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let poller = |name: &str| {
        Poller::new(poll.clone())
            .named(name)
            .with_cancellation(cancel.clone())
    };

    match target {
        WaitCommands::Tasks {
            running,
            off_node,
            service,
        } => {
            let name = "running tasks";
            let poller = poller(name);
            let predicate: Box<dyn Fn(&Vec<Task>) -> bool> = match off_node {
                Some(node) => Box::new(expect::running_off_node(node, running)),
                None => Box::new(expect::tasks_running(running)),
            };
            let result = match &service {
                Some(service) => {
                    poller
                        .run(|| swarm.service_tasks(service), predicate)
                        .await?
                }
                None => swarm.wait_for_tasks(&poller, predicate).await?,
            };
            let tasks = result.into_result(name)?;
            println!("{} task(s) running", expect::running_count(&tasks));
        }
        WaitCommands::Workers { down } => {
            let name = "workers down";
            let nodes = swarm
                .wait_for_nodes(&poller(name), expect::workers_down(down))
                .await?
                .into_result(name)?;
            println!("{} node(s), {} worker(s) down", nodes.len(), down);
        }
        WaitCommands::Empty => {
            let name = "no tasks";
            swarm
                .wait_for_tasks(&poller(name), expect::no_tasks())
                .await?
                .into_result(name)?;
            println!("No tasks left");
        }
    }

    Ok(())
}
