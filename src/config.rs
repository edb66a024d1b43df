use clap::Parser;
use std::path::PathBuf;

/// Unix domain socket filename for IPC.
const SOCKET_FILENAME: &str = "herald.sock";

/// Fallback runtime directory when XDG_RUNTIME_DIR is unset.
const FALLBACK_RUNTIME_DIR: &str = "/var/run";

#[derive(Parser, Debug)]
#[command(name = "herald", version, about = "mDNS service registration and discovery daemon")]
pub struct Cli {
    /// IPC socket path (default: platform runtime directory)
    #[arg(long, env = "HERALD_PIPE")]
    pub pipe: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "HERALD_LOG", default_value = "info")]
    pub log_level: String,

    /// Disable the interface watcher (no engine restarts on address churn)
    #[arg(long, env = "HERALD_NO_WATCH")]
    pub no_watch: bool,
}

#[derive(Debug)]
pub struct Config {
    pub pipe_path: PathBuf,
    pub no_watch: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            pipe_path: cli.pipe.clone().unwrap_or_else(default_pipe_path),
            no_watch: cli.no_watch,
        }
    }
}

fn default_pipe_path() -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_RUNTIME_DIR));
    dir.join(SOCKET_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_pipe_path_wins() {
        let cli = Cli {
            pipe: Some(PathBuf::from("/tmp/test.sock")),
            log_level: "info".into(),
            no_watch: false,
        };
        let config = Config::from_cli(&cli);
        assert_eq!(config.pipe_path, PathBuf::from("/tmp/test.sock"));
    }

    #[test]
    fn default_pipe_path_ends_with_socket_name() {
        let path = default_pipe_path();
        assert_eq!(path.file_name().unwrap(), SOCKET_FILENAME);
    }
}
