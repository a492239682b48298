//! cli defines and handles the command line arguments of the `opnsense-agent` program.
//!
//! The module uses the [clap] crate underneath. Every subcommand reports its outcome as a
//! [State] so the program can exit the way monitoring cores expect.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;

use opnsense_agent::agent::Agent;
use opnsense_agent::api::{HttpTransport, OpnSenseApi};
use opnsense_agent::checks::{self, CheckContext, Service};
use opnsense_agent::config::{self, Config, ConnectionConfig, Features};
use opnsense_agent::error::AgentError;
use opnsense_agent::rate::RateTracker;
use opnsense_agent::section::AgentOutput;
use opnsense_agent::State;

/// A structure holding parsed program arguments.
#[derive(Parser)]
#[command(name = "opnsense-agent")]
#[command(about = "Monitoring agent for OPNsense firewalls", long_about = None)]
#[command(version)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Log more details to stderr. Repeat for even more.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// The supported subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Polls the firewall and prints the agent sections on stdout.
    Collect {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        features: FeatureArgs,
    },
    /// Reads agent sections and prints the discovered services as JSON.
    Discover {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Reads agent sections and the discovered services and prints one status line per service.
    Check {
        #[command(flatten)]
        input: InputArgs,
        /// File with the services printed by `discover`.
        #[arg(short, long)]
        services: PathBuf,
        /// File keeping the counter history between runs.
        #[arg(long)]
        state_file: Option<PathBuf>,
        /// Evaluate as if it was this point in time (RFC 3339).
        #[arg(long, value_parser = parse_time)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Args)]
struct ConnectionArgs {
    /// Base URL of the API (e.g. https://opnsense.local/api).
    #[arg(short = 'U', long)]
    url: String,
    /// API key.
    #[arg(short, long)]
    key: String,
    /// API secret.
    #[arg(short, long, env = "OPNSENSE_SECRET", hide_env_values = true)]
    secret: String,
    /// HTTP timeout in seconds.
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,
    /// Do not verify the TLS certificate of the API.
    #[arg(long)]
    ignore_cert: bool,
}

impl ConnectionArgs {
    fn into_config(self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url,
            key: self.key,
            secret: self.secret,
            timeout: Duration::from_secs(self.timeout),
            verify_tls: !self.ignore_cert,
        }
    }
}

/// Without any of these flags firewall, firmware, vip, gateway and ipsec are collected.
#[derive(Args)]
struct FeatureArgs {
    /// Collect every feature.
    #[arg(long)]
    all: bool,
    #[arg(long)]
    firewall: bool,
    #[arg(long)]
    firmware: bool,
    #[arg(long)]
    vip: bool,
    #[arg(long)]
    gateway: bool,
    #[arg(long)]
    ipsec: bool,
    #[arg(long)]
    unbound: bool,
    #[arg(long)]
    snapshot: bool,
    #[arg(long)]
    ssl: bool,
    #[arg(long)]
    interfaces: bool,
}

impl FeatureArgs {
    fn features(&self) -> Features {
        if self.all {
            return Features::all();
        }

        let selected = Features {
            firewall: self.firewall,
            firmware: self.firmware,
            vip: self.vip,
            gateway: self.gateway,
            ipsec: self.ipsec,
            unbound: self.unbound,
            snapshot: self.snapshot,
            ssl: self.ssl,
            interfaces: self.interfaces,
        };

        if selected.any() {
            selected
        } else {
            Features::legacy()
        }
    }
}

#[derive(Args)]
struct InputArgs {
    /// Agent output to read, stdin if not given.
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Threshold and discovery configuration (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl InputArgs {
    fn load(&self) -> Result<(AgentOutput, Config), AgentError> {
        let text = match self.input {
            Some(ref path) => read_file(path)?,
            None => {
                let mut text = String::new();
                io::stdin()
                    .read_to_string(&mut text)
                    .map_err(|source| AgentError::Read {
                        path: "<stdin>".to_owned(),
                        source,
                    })?;
                text
            }
        };

        let config = match self.config {
            Some(ref path) => Config::load(path)?,
            None => Config::default(),
        };

        Ok((AgentOutput::parse(&text), config))
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| err.to_string())
}

fn read_file(path: &Path) -> Result<String, AgentError> {
    fs::read_to_string(path).map_err(|source| AgentError::Read {
        path: path.display().to_string(),
        source,
    })
}

impl Cli {
    /// Runs the selected subcommand and returns the state the program should exit with.
    pub fn run(self) -> Result<State, AgentError> {
        match self.command {
            Commands::Collect {
                connection,
                features,
            } => collect(connection.into_config(), features.features()),
            Commands::Discover { input } => discover(&input),
            Commands::Check {
                input,
                services,
                state_file,
                now,
            } => check(
                &input,
                &services,
                &state_file.unwrap_or_else(config::default_state_file),
                now.unwrap_or_else(Utc::now),
            ),
        }
    }
}

fn collect(connection: ConnectionConfig, features: Features) -> Result<State, AgentError> {
    let transport = HttpTransport::new(&connection)?;
    let agent = Agent::new(OpnSenseApi::new(transport), features);
    // a failed request must not leave a truncated section on stdout
    let mut sections = Vec::new();
    agent.run(&mut sections)?;
    io::stdout().lock().write_all(&sections)?;
    Ok(State::Ok)
}

fn discover(input: &InputArgs) -> Result<State, AgentError> {
    let (output, config) = input.load()?;
    let services = checks::discover(&output, &config);
    info!(services = services.len(), "discovery finished");

    let json = serde_json::to_string_pretty(&services).map_err(AgentError::Services)?;
    writeln!(io::stdout().lock(), "{}", json)?;
    Ok(State::Ok)
}

fn check(
    input: &InputArgs,
    services: &Path,
    state_file: &Path,
    now: DateTime<Utc>,
) -> Result<State, AgentError> {
    let (output, config) = input.load()?;
    let services: Vec<Service> =
        serde_json::from_str(&read_file(services)?).map_err(AgentError::Services)?;

    let mut rates = RateTracker::load(state_file)?;
    let mut worst = State::Ok;
    {
        let mut ctx = CheckContext::new(now, &mut rates);
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for service in &services {
            let resource = checks::check(service, &output, &config, &mut ctx);
            worst = worst.max(resource.get_state());
            writeln!(out, "{}", resource.to_nagios_string())?;
        }
    }
    rates.save(state_file)?;

    Ok(worst)
}
