//! CLI argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// Telegram archiver - record account messages, serve a live dashboard feed
/// and mail a daily word cloud
#[derive(Parser, Debug, Clone)]
#[command(name = "tg-archiver")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the JSON config file
    #[arg(short, long, value_name = "FILE", default_value = "config.json", env = "TG_CONFIG")]
    pub config: PathBuf,

    /// Path to the SQLite database
    #[arg(short, long, value_name = "FILE", default_value = "data.db", env = "TG_DB")]
    pub db: PathBuf,

    /// Don't listen for messages; only run the web server and scheduler
    #[arg(long, env = "TG_NO_LISTEN")]
    pub no_listen: bool,

    /// Run one report cycle immediately and exit
    #[arg(long)]
    pub report_now: bool,

    /// Path to tg-bridge binary (auto-detected by default)
    #[arg(long, value_name = "PATH", env = "TG_BRIDGE_PATH")]
    pub bridge_path: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(short, long, env = "TG_VERBOSE")]
    pub verbose: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["tg-archiver"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert_eq!(args.db, PathBuf::from("data.db"));
        assert!(!args.no_listen);
        assert!(!args.report_now);
        assert!(args.bridge_path.is_none());
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "tg-archiver",
            "-c",
            "/etc/tg/config.json",
            "--db",
            "/var/lib/tg/data.db",
            "--no-listen",
            "--report-now",
            "--bridge-path",
            "/opt/tg-bridge",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/tg/config.json"));
        assert_eq!(args.db, PathBuf::from("/var/lib/tg/data.db"));
        assert!(args.no_listen);
        assert!(args.report_now);
        assert_eq!(args.bridge_path, Some(PathBuf::from("/opt/tg-bridge")));
    }
}
