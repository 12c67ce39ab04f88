//! hexaned: the hexane DHCPv6 server
//!
//! Exit codes: 0 on clean shutdown, 2 on configuration errors, 3 on
//! socket bind failures, 4 when the server shut down with errors.

mod args;

use tracing::info;
use tracing_subscriber::EnvFilter;

use hexane_core::error::Error;
use hexane_server::{load_config, ExitStatus, Server};

use crate::args::Cli;

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_BIND: i32 = 3;
const EXIT_ERRORS: i32 = 4;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("hexaned: {}", err);
            return EXIT_CONFIG;
        }
    };

    let server = match Server::new(config, Some(cli.config.clone())) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("hexaned: {}", err);
            return EXIT_CONFIG;
        }
    };

    if cli.check {
        println!("configuration ok");
        return EXIT_OK;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("hexaned: cannot start runtime: {}", err);
            return EXIT_FAILURE;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hexaned");

    match runtime.block_on(server.run()) {
        Ok(ExitStatus::Clean) => EXIT_OK,
        Ok(ExitStatus::ShutdownWithErrors) => EXIT_ERRORS,
        Err(Error::Bind { address, source }) => {
            eprintln!("hexaned: cannot bind {}: {}", address, source);
            EXIT_BIND
        }
        Err(Error::Config(message)) => {
            eprintln!("hexaned: {}", message);
            EXIT_CONFIG
        }
        Err(err) => {
            eprintln!("hexaned: {}", err);
            EXIT_FAILURE
        }
    }
}
