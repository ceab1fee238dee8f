// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::wiring::App;
use anyhow::Context;
use clap::Args;
use console::{style, Term};
use pia_api::{AccountPassword, ApiError, PiaClient};
use tracing::instrument;

#[derive(Debug, Args)]
pub struct SetupArgs {
	/// PIA account username (prompted when omitted)
	#[arg(long)]
	pub username: Option<String>,
}

#[instrument(skip_all)]
pub async fn run(args: SetupArgs) -> anyhow::Result<i32> {
	let app = App::new()?;
	let term = Term::stdout();

	let username = match args.username {
		Some(username) => username,
		None => {
			term.write_str("PIA username: ")?;
			term.read_line()?.trim().to_string()
		}
	};
	anyhow::ensure!(!username.is_empty(), "username must not be empty");

	// PIA_PASSWORD makes non-interactive provisioning possible.
	let password = match std::env::var("PIA_PASSWORD") {
		Ok(value) => AccountPassword::new(value),
		Err(_) => {
			term.write_str("PIA password: ")?;
			AccountPassword::new(term.read_secure_line()?)
		}
	};
	anyhow::ensure!(!password.is_empty(), "password must not be empty");

	let client = PiaClient::new()?;
	match client.authenticate(&username, &password).await {
		Ok(_) => {}
		Err(ApiError::AuthInvalid) => {
			anyhow::bail!("PIA rejected these credentials; check username and password")
		}
		Err(ApiError::AuthLocked) => {
			anyhow::bail!("PIA reports this account as locked; try again later")
		}
		Err(e) => return Err(e).context("could not verify credentials against PIA"),
	}

	app.credentials
		.set(&username, &password)
		.context("failed to store credentials")?;

	println!("{} Credentials verified and stored", style("✓").green().bold());
	println!(
		"  Next: {} then {}",
		style("pia-nm add-region <id>").cyan(),
		style("pia-nm refresh").cyan()
	);
	Ok(0)
}
