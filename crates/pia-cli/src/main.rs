// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod commands;
mod dispatcher;
mod systemd;
mod wiring;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

/// Exit code for fatal environmental errors (no NM, missing credentials,
/// unreadable configuration).
const EXIT_ENVIRONMENT: i32 = 3;

/// Manage PIA WireGuard profiles in NetworkManager
#[derive(Parser, Debug)]
#[command(name = "pia-nm", version, about)]
struct Cli {
	/// Enable debug logging
	#[arg(long, short, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Store PIA account credentials and verify them
	Setup(commands::setup::SetupArgs),

	/// Refresh tokens and credentials for configured regions
	Refresh(commands::refresh::RefreshArgs),

	/// Add a region to the managed set
	AddRegion {
		/// Region id as listed by 'list-regions' (e.g. us_east)
		region: String,
	},

	/// Remove a region, its NM profile, and its key material
	RemoveRegion {
		region: String,
	},

	/// List regions offered by PIA
	ListRegions {
		/// Only show regions with port forwarding
		#[arg(long)]
		port_forwarding: bool,
	},

	/// Show configured regions and their NM state
	Status,

	/// Install the systemd user timer and dispatcher scripts
	Install,

	/// Remove the systemd user timer and dispatcher scripts
	Uninstall,

	/// Enable the refresh timer
	Enable,

	/// Disable the refresh timer
	Disable,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let default_filter = if cli.verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
		)
		.with_writer(std::io::stderr)
		.init();

	let code = match run(cli.command).await {
		Ok(code) => code,
		Err(e) => {
			eprintln!("{} {e:#}", style("✗").red().bold());
			EXIT_ENVIRONMENT
		}
	};
	std::process::exit(code);
}

async fn run(command: Command) -> anyhow::Result<i32> {
	match command {
		Command::Setup(args) => commands::setup::run(args).await,
		Command::Refresh(args) => commands::refresh::run(args).await,
		Command::AddRegion { region } => commands::regions::add(&region).await,
		Command::RemoveRegion { region } => commands::regions::remove(&region).await,
		Command::ListRegions { port_forwarding } => {
			commands::regions::list(port_forwarding).await
		}
		Command::Status => commands::status::run().await,
		Command::Install => commands::install::install(),
		Command::Uninstall => commands::install::uninstall(),
		Command::Enable => commands::install::enable(),
		Command::Disable => commands::install::disable(),
	}
}
