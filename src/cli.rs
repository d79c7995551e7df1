// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{ArgGroup, Parser, ValueEnum};

/// Command-line arguments for `buildcoord`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildcoord",
    version,
    about = "Build interdependent configurations in dependency order.",
    long_about = None
)]
#[command(group(ArgGroup::new("target").args(["set", "build"])))]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Builds.toml")]
    pub config: String,

    /// Build the configuration set with this name.
    ///
    /// Without `--set` or `--build`, every configuration is built as one set.
    #[arg(long, value_name = "NAME")]
    pub set: Option<String>,

    /// Build a single configuration, ignoring its dependencies.
    #[arg(long, value_name = "NAME")]
    pub build: Option<String>,

    /// Build even revisions that already have a successful build.
    #[arg(long)]
    pub rebuild_all: bool,

    /// Attach results to this record set. May be given more than once.
    #[arg(long = "record-set", value_name = "NAME")]
    pub record_sets: Vec<String>,

    /// User the builds are submitted as.
    #[arg(long, value_name = "NAME", default_value = "local")]
    pub user: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDCOORD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the build plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_build_are_exclusive() {
        let res = CliArgs::try_parse_from(["buildcoord", "--set", "release", "--build", "core"]);
        assert!(res.is_err());
    }

    #[test]
    fn record_sets_repeat() {
        let args = CliArgs::try_parse_from([
            "buildcoord",
            "--set",
            "release",
            "--record-set",
            "nightly",
            "--record-set",
            "qa",
        ])
        .unwrap();
        assert_eq!(args.record_sets, vec!["nightly", "qa"]);
        assert_eq!(args.config, "Builds.toml");
        assert!(!args.rebuild_all);
    }
}
