use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use ramses_frame::Address;
use ramses_gateway::GatewayConfig;
use ramses_schema::{LayoutLoader, SystemLayout};

use crate::exit::{gateway_error, schema_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod listen;
pub mod parse;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a single frame line and print the message.
    Decode(DecodeArgs),
    /// Replay a packet log and print the resulting entity state.
    Parse(ParseArgs),
    /// Run the gateway and print state changes as they happen.
    Listen(ListenArgs),
    /// Send one command and print the reply.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Parse(args) => parse::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every command that runs the gateway core.
#[derive(Args, Debug, Default)]
pub struct CoreArgs {
    /// Gateway configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "RAMSES_CONFIG")]
    pub config: Option<PathBuf>,
    /// Known system layout (JSON) to seed bindings from.
    #[arg(long, value_name = "FILE")]
    pub layout: Option<PathBuf>,
}

impl CoreArgs {
    pub fn gateway_config(&self) -> CliResult<GatewayConfig> {
        match &self.config {
            Some(path) => GatewayConfig::load(path)
                .map_err(|err| gateway_error(&format!("config {}", path.display()), err)),
            None => Ok(GatewayConfig::default()),
        }
    }

    pub fn system_layout(&self, config: &GatewayConfig) -> CliResult<Option<SystemLayout>> {
        self.layout
            .as_deref()
            .map(|path| load_layout(path, config))
            .transpose()
    }
}

fn load_layout(path: &Path, config: &GatewayConfig) -> CliResult<SystemLayout> {
    let context = format!("layout {}", path.display());
    LayoutLoader::with_config(config.registry())
        .and_then(|loader| loader.load(path))
        .map_err(|err| schema_error(&context, err))
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame line as written by the gateway.
    pub line: String,
    /// Require and verify the trailing checksum.
    #[arg(long)]
    pub checksum: bool,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Packet log to replay; `-` reads stdin.
    pub file: PathBuf,
    #[command(flatten)]
    pub core: CoreArgs,
    /// Print each state change instead of the final snapshot.
    #[arg(long)]
    pub changes: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Serial device node or `host:port` of a serial bridge.
    pub target: String,
    #[command(flatten)]
    pub core: CoreArgs,
    /// Only print changes within this controller's system.
    #[arg(long, value_name = "ADDR")]
    pub controller: Option<String>,
    /// Exit after printing N changes.
    #[arg(long)]
    pub count: Option<usize>,
}

/// What `send` asks the controller for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Query {
    ZoneName,
    ZoneConfig,
    ZoneTemp,
    ZoneSetpoint,
    ZoneMode,
    SystemMode,
    DhwTemp,
    DhwMode,
    DhwParams,
    OutdoorTemp,
    SystemTime,
    ScheduleVersion,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Serial device node or `host:port` of a serial bridge.
    pub target: String,
    #[command(flatten)]
    pub core: CoreArgs,
    /// Controller address (e.g. 01:145038).
    #[arg(long, value_name = "ADDR", required_unless_present = "raw")]
    pub controller: Option<String>,
    /// Request a value from the controller.
    #[arg(long, value_enum, conflicts_with_all = ["setpoint", "raw"])]
    pub get: Option<Query>,
    /// Set the zone setpoint (°C).
    #[arg(long, conflicts_with_all = ["get", "raw"])]
    pub setpoint: Option<f64>,
    /// Send a literal frame line.
    #[arg(long, conflicts_with_all = ["get", "setpoint", "controller"])]
    pub raw: Option<String>,
    /// Zone index for zone commands.
    #[arg(long, default_value = "0")]
    pub zone: u8,
    /// Override the configured retry count.
    #[arg(long)]
    pub retries: Option<u8>,
    /// Maximum time to wait for the result (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_address(text: &str) -> CliResult<Address> {
    text.parse()
        .map_err(|err| CliError::new(USAGE, format!("invalid address {text}: {err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
