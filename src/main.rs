//! opnsense-agent collects and evaluates the state of an OPNsense firewall.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use opnsense_agent::error::AgentError;
use opnsense_agent::Runner;

mod cli;

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "opnsense_agent=warn",
        1 => "opnsense_agent=info",
        _ => "opnsense_agent=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    Runner::new()
        .on_error(|err: &AgentError| err.state())
        .safe_run(|| cli.run())
        .print_and_exit()
}
