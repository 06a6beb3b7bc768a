/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */

/* Apply one-time boot overrides to the BMCs in a config file, then power-cycle the fleet.
 *
 * USAGE: ./bootcycle --config fleet.toml run
 *        ./bootcycle --config fleet.toml targets
 * Run with `-v` for more output, including every Redfish request.
 * Exit codes: 0 success, 1 some overrides failed, 2 aborted before power cycle,
 * 3 power cycle failed.
 */

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use bootcycle::{
    exit_code, FleetConfig, Orchestrator, PowerCycleCoordinator, RedfishClientPool,
    RedfishOverrideAdapter, RunPolicy, ScriptFleetPower,
};
use clap::{ArgAction, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "bootcycle", version, about = "Redfish one-time boot override and fleet power cycle")]
struct Cli {
    /// Fleet config file: targets and power cycle commands
    #[arg(long, short = 'c', global = true, env = "BOOTCYCLE_CONFIG", default_value = "bootcycle.toml")]
    config: PathBuf,

    /// Log at DEBUG level. Default is INFO
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every target's boot override, then power-cycle the fleet
    Run(RunArgs),

    /// List configured targets without contacting them
    Targets,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Pause between fleet shutdown and power up
    #[arg(long, default_value_t = 20)]
    settle_seconds: u64,

    /// Don't power-cycle if no boot override could be applied
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    skip_power_cycle_on_all_failures: bool,

    /// Empty the SSH known_hosts file before shutdown
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    clear_known_hosts: bool,

    /// Max boot overrides in flight
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: u16,

    /// Overall run timeout. Interrupts the settle delay.
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Per request timeout for BMC calls
    #[arg(long, default_value_t = 20)]
    http_timeout_seconds: u64,

    /// Refuse self-signed BMC certificates
    #[arg(long)]
    reject_invalid_certs: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging(verbose: bool) -> Result<(), anyhow::Error> {
    let log_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("rustls=warn".parse()?);
    tracing_subscriber::registry()
        .with(Layer::default().compact().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Could not set up logging: {e}");
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!("{e:#}");
            // Nothing was touched
            ExitCode::from(exit_code::ABORTED as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<i32, anyhow::Error> {
    let config = FleetConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let args = match cli.command {
        Commands::Targets => {
            for t in config.registry.list_targets() {
                println!("{:<12} {:<32} {:<12} {}", t.id, t.base_url, t.system_path, t.boot);
            }
            return Ok(exit_code::SUCCESS);
        }
        Commands::Run(args) => args,
    };

    let mut builder =
        RedfishClientPool::builder().timeout(Duration::from_secs(args.http_timeout_seconds));
    if args.reject_invalid_certs {
        builder = builder.reject_invalid_certs();
    }
    let pool = builder.build()?;

    let policy = RunPolicy {
        settle: Duration::from_secs(args.settle_seconds),
        skip_power_cycle_on_all_failures: args.skip_power_cycle_on_all_failures,
        clear_known_hosts: args.clear_known_hosts,
        concurrency: args.concurrency as usize,
        timeout: args.timeout_seconds.map(Duration::from_secs),
    };
    let orchestrator = Orchestrator::new(
        Arc::new(RedfishOverrideAdapter::new(pool)),
        PowerCycleCoordinator::new(Arc::new(ScriptFleetPower::new(config.power_cycle))),
        policy,
    );

    let report = orchestrator.run(&config.registry).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(report.exit_code())
}
