//! swarm-converge xtask - Build automation tasks
//!
//! ## Usage
//!
//! ```bash
//! # Build everything
//! cargo xtask build
//!
//! # Run unit and mock-engine tests
//! cargo xtask test
//!
//! # Run the live two-node test against real engines
//! cargo xtask swarm-test --master http://core-01:2375 --worker http://core-02:2375
//!
//! # Run lints
//! cargo xtask lint
//!
//! # Run CI checks
//! cargo xtask ci
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for swarm-converge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the library and the swarm-converge binary
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run all tests that need no live swarm
    Test {
        /// Run tests in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run the live two-node scenario test
    SwarmTest {
        /// Manager engine (falls back to SWARM_MASTER_ADDRESS)
        #[arg(long)]
        master: Option<String>,
        /// Worker engine (falls back to SWARM_WORKER_ADDRESS)
        #[arg(long)]
        worker: Option<String>,
    },
    /// Run lints (clippy and rustfmt check)
    Lint,
    /// Format code
    Fmt {
        /// Check formatting without making changes
        #[arg(long)]
        check: bool,
    },
    /// Clean build artifacts
    Clean,
    /// Install the binary locally
    Install,
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run CI checks (fmt, lint, test, build)
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to project root
    let project_root = project_root()?;
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build { release } => build(&sh, release)?,
        Commands::Test { release } => test(&sh, release)?,
        Commands::SwarmTest { master, worker } => swarm_test(&sh, master, worker)?,
        Commands::Lint => lint(&sh)?,
        Commands::Fmt { check } => fmt(&sh, check)?,
        Commands::Clean => clean(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Doc { open } => doc(&sh, open)?,
        Commands::Ci => ci(&sh)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)?;
    let manifest = PathBuf::from(path.trim());

    manifest
        .parent()
        .map(|p| p.to_path_buf())
        .context("Failed to find project root")
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    println!("🔨 Building swarm-converge...");

    if release {
        cmd!(sh, "cargo build --release --bin swarm-converge").run()?;
    } else {
        cmd!(sh, "cargo build --bin swarm-converge").run()?;
    }

    println!("✅ Build complete!");
    Ok(())
}

fn test(sh: &Shell, release: bool) -> Result<()> {
    println!("🧪 Running tests...");

    // The live scenario test skips itself without engine addresses.
    let _master = sh.push_env("SWARM_MASTER_ADDRESS", "");
    let _worker = sh.push_env("SWARM_WORKER_ADDRESS", "");

    if release {
        cmd!(sh, "cargo test --release -p swarm-converge").run()?;
    } else {
        cmd!(sh, "cargo test -p swarm-converge").run()?;
    }

    println!("✅ All tests passed!");
    Ok(())
}

fn swarm_test(sh: &Shell, master: Option<String>, worker: Option<String>) -> Result<()> {
    println!("🐳 Running live swarm scenario...");

    let master = master
        .or_else(|| std::env::var("SWARM_MASTER_ADDRESS").ok())
        .context("Pass --master or set SWARM_MASTER_ADDRESS")?;
    let worker = worker
        .or_else(|| std::env::var("SWARM_WORKER_ADDRESS").ok())
        .context("Pass --worker or set SWARM_WORKER_ADDRESS")?;

    println!("  manager: {}", master);
    println!("  worker:  {}", worker);

    let _master = sh.push_env("SWARM_MASTER_ADDRESS", &master);
    let _worker = sh.push_env("SWARM_WORKER_ADDRESS", &worker);
    cmd!(sh, "cargo test -p swarm-converge --test swarm_scenario")
        .args(["--", "--nocapture", "--test-threads=1"])
        .run()?;

    println!("✅ Swarm converged!");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 Running lints...");

    // Check formatting
    println!("  Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;

    // Run clippy
    println!("  Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets --all-features -- -D warnings").run()?;

    println!("✅ All lints passed!");
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    println!("🎨 Formatting code...");

    if check {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    } else {
        cmd!(sh, "cargo fmt --all").run()?;
    }

    println!("✅ Formatting complete!");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 Cleaning build artifacts...");

    cmd!(sh, "cargo clean").run()?;

    println!("✅ Clean complete!");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📥 Installing swarm-converge locally...");

    cmd!(sh, "cargo install --path .").run()?;

    println!("✅ Installation complete!");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("📚 Generating documentation...");

    if open {
        cmd!(sh, "cargo doc --no-deps -p swarm-converge --open").run()?;
    } else {
        cmd!(sh, "cargo doc --no-deps -p swarm-converge").run()?;
    }

    println!("✅ Documentation generated!");
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    println!("🔄 Running CI checks...");

    // Lint covers the format check
    println!("\n📋 Step 1/3: Lint");
    lint(sh)?;

    // Test
    println!("\n📋 Step 2/3: Tests");
    test(sh, false)?;

    // Build release
    println!("\n📋 Step 3/3: Release build");
    build(sh, true)?;

    println!("\n✅ All CI checks passed!");
    Ok(())
}
