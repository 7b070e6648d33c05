use crate::error::{StorageError, StorageResult};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub port: String,
    pub baud: u32,
    /// host:port of a serial-over-TCP bridge. Empty means open `port`
    /// directly.
    pub tcp: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud: 115_200,
            tcp: String::new(),
        }
    }
}

/// Delay and timeout policy for the device shell. The defaults match the
/// firmware's observed settle behavior at 115200 baud.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub connect_timeout_ms: u64,
    pub prompt_poll_interval_ms: u64,
    pub command_settle_ms: u64,
    pub list_settle_ms: u64,
    pub read_settle_ms: u64,
    pub write_chunk_size: usize,
    pub chunk_pacing_ms: u64,
    pub write_finalize_ms: u64,
    pub post_delete_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            prompt_poll_interval_ms: 50,
            command_settle_ms: 200,
            list_settle_ms: 500,
            read_settle_ms: 500,
            write_chunk_size: 512,
            chunk_pacing_ms: 50,
            write_finalize_ms: 500,
            post_delete_settle_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version = crate::version::VERSION, about)]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub port: Option<String>,
    #[arg(long)]
    pub baud: Option<u32>,
    #[arg(long)]
    pub tcp: Option<String>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// List a directory on the device
    Ls(LsArgs),
    /// Print a file's text content
    Cat(CatArgs),
    /// Write a local file (or stdin) to the device
    Put(PutArgs),
    /// Delete a file on the device
    Rm(RmArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct LsArgs {
    #[arg(value_name = "PATH", default_value = "/")]
    pub path: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct CatArgs {
    #[arg(value_name = "REMOTE")]
    pub remote: String,
}

#[derive(Debug, Parser, Clone)]
pub struct PutArgs {
    #[arg(value_name = "REMOTE")]
    pub remote: String,
    #[arg(long)]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct RmArgs {
    #[arg(value_name = "REMOTE")]
    pub remote: String,
}

const DEFAULT_CONFIG_PATH: &str = "storctl.toml";

impl Config {
    /// File, then environment, then CLI flags; later layers win.
    pub fn load(cli: &Cli) -> StorageResult<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_env();
        config.apply_cli(cli);
        Ok(config)
    }

    fn from_file(path: &Path) -> StorageResult<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            StorageError::config("Failed to read config file").with_details(err.to_string())
        })?;
        toml::from_str(&text).map_err(|err| {
            StorageError::config("Failed to parse config file").with_details(err.to_string())
        })
    }

    fn apply_env(&mut self) {
        if let Ok(port) = env::var("STORCTL_PORT") {
            self.connection.port = port;
        }
        if let Ok(tcp) = env::var("STORCTL_TCP") {
            self.connection.tcp = tcp;
        }
        if let Ok(level) = env::var("STORCTL_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = &cli.port {
            self.connection.port = port.clone();
        }
        if let Some(baud) = cli.baud {
            self.connection.baud = baud;
        }
        if let Some(tcp) = &cli.tcp {
            self.connection.tcp = tcp.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_device_shell() {
        let config = Config::default();
        assert_eq!(config.connection.port, "/dev/ttyACM0");
        assert_eq!(config.connection.baud, 115_200);
        assert!(config.connection.tcp.is_empty());
        assert_eq!(config.timing.connect_timeout_ms, 5_000);
        assert_eq!(config.timing.write_chunk_size, 512);
        assert_eq!(config.timing.chunk_pacing_ms, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_keeps_defaults_for_unnamed_keys() {
        let config: Config = toml::from_str(
            "[connection]\nbaud = 9600\n\n[timing]\nlist_settle_ms = 750\n",
        )
        .unwrap();
        assert_eq!(config.connection.baud, 9_600);
        assert_eq!(config.connection.port, "/dev/ttyACM0");
        assert_eq!(config.timing.list_settle_ms, 750);
        assert_eq!(config.timing.read_settle_ms, 500);
    }

    #[test]
    fn cli_flags_override_file_values() {
        let cli = Cli::try_parse_from([
            "storctl",
            "--port",
            "/dev/ttyUSB3",
            "--tcp",
            "bench:5555",
            "--log-level",
            "debug",
            "ls",
            "/ext",
        ])
        .unwrap();

        let mut config = Config::default();
        config.apply_cli(&cli);
        assert_eq!(config.connection.port, "/dev/ttyUSB3");
        assert_eq!(config.connection.tcp, "bench:5555");
        assert_eq!(config.logging.level, "debug");
        match cli.command {
            Command::Ls(args) => {
                assert_eq!(args.path, "/ext");
                assert!(!args.json);
            }
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn ls_path_defaults_to_root() {
        let cli = Cli::try_parse_from(["storctl", "ls"]).unwrap();
        match cli.command {
            Command::Ls(args) => assert_eq!(args.path, "/"),
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn explicit_config_file_loads_and_cli_still_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storctl.toml");
        fs::write(&path, "[connection]\nport = \"/dev/ttyS9\"\nbaud = 57600\n").unwrap();

        let cli = Cli::try_parse_from([
            "storctl",
            "--config",
            path.to_str().unwrap(),
            "--baud",
            "230400",
            "ls",
        ])
        .unwrap();

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.connection.port, "/dev/ttyS9");
        assert_eq!(config.connection.baud, 230_400);
    }

    #[test]
    fn malformed_config_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storctl.toml");
        fs::write(&path, "[connection\nport =").unwrap();

        let cli =
            Cli::try_parse_from(["storctl", "--config", path.to_str().unwrap(), "ls"]).unwrap();
        assert!(matches!(
            Config::load(&cli),
            Err(StorageError::Config { .. })
        ));
    }
}
