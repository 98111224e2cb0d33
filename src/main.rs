// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths)]
#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused,
    unused_lifetimes,
    unused_qualifications,
    unused_results,
    anonymous_parameters,
    deprecated_in_future,
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::wildcard_enum_match_arm,
    clippy::clone_on_ref_ptr,
    clippy::todo,
    clippy::string_add,
    clippy::use_debug,
    clippy::future_not_send
)]

mod command;

use std::process;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gatekey::error::Result;
use log::error;

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Policy(command::policy::Command),
    #[command(subcommand)]
    Key(command::key::Command),
}

#[async_trait]
impl command::Command for Command {
    async fn execute(self, env: &command::Environment) -> Result<()> {
        match self {
            Self::Policy(cmd) => cmd.execute(env).await,
            Self::Key(cmd) => cmd.execute(env).await,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Keep keys in plain files even when the secret service or Keychain is
    /// available.
    #[arg(long)]
    no_system_key_store: bool,

    #[clap(subcommand)]
    command: Command,
}

async fn run(args: Args) -> Result<()> {
    let env = command::Environment::new(args.no_system_key_store);
    command::Command::execute(args.command, &env).await
}

#[tokio::main]
async fn main() {
    let logger_env = env_logger::Env::new()
        .filter_or("GATEKEY_LOG", "warn")
        .write_style("GATEKEY_LOG_STYLE");
    env_logger::Builder::from_env(logger_env).init();

    if let Err(e) = run(Args::parse()).await {
        error!("We encountered an error: {}", e);
        process::exit(1);
    };
}
