use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;

/// Default number of seconds a receiver may sit idle before it is considered drained.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Default maximum number of messages requested by the first fetch of a receiver.
pub const DEFAULT_PREFETCH: u32 = 30;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// JSON object mapping a connection key to its broker settings, e.g.
    /// {"orders": {"conn_str": "Endpoint=sb://..."}}
    #[arg(long, env)]
    connection_list: Option<String>,

    /// Seconds a receiver may stay idle before it is treated as drained,
    /// used when a request does not pass `idle_timeout`.
    #[arg(long, env, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub default_idle_timeout: u64,

    /// Batch size of the first fetch of a receiver, used when a request does
    /// not pass `prefetch`.
    #[arg(long, env, default_value_t = DEFAULT_PREFETCH)]
    pub default_prefetch: u32,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "0.0.0.0")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 5000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Builds the configuration from `.env`, the environment and defaults only, leaving the
    /// process arguments alone.
    pub fn from_env() -> Self {
        dotenv().ok();
        Config::parse_from([env!("CARGO_PKG_NAME")])
    }

    /// Raw `CONNECTION_LIST` JSON, if one was supplied.
    pub fn connection_list(&self) -> Option<&str> {
        self.connection_list.as_deref()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("0.0.0.0")
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }
}
