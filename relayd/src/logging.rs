// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fs::OpenOptions;
use std::io::Write;

use anyhow::Context;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;

use crate::config::Config;

/// Maps a configured level name to a filter. Unknown names fall back to `info`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "err" | "error" => LevelFilter::Error,
        other => {
            eprintln!("Unknown log level '{other}', using info");
            LevelFilter::Info
        }
    }
}

fn target_for(log_path: &str) -> anyhow::Result<Target> {
    let target = match log_path {
        "stdout" | "console" => Target::Stdout,
        "stderr" => Target::Stderr,
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            Target::Pipe(Box::new(file))
        }
    };
    Ok(target)
}

/// Install the global logger. `RUST_LOG` still overrides the configured level.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let level = parse_level(&config.log_level);
    let mut builder = Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.target(target_for(&config.log_path)?);

    if config.log_json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "ts": buf.timestamp().to_string(),
                "level": record.level().as_str(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        });
    }

    builder.try_init().context("logger already initialized")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_and_aliases() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("INFO"), LevelFilter::Info);
        assert_eq!(parse_level("warning"), LevelFilter::Warn);
        assert_eq!(parse_level("err"), LevelFilter::Error);
        assert_eq!(parse_level("error"), LevelFilter::Error);
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("verbose"), LevelFilter::Info);
        assert_eq!(parse_level(""), LevelFilter::Info);
    }

    #[test]
    fn console_is_an_alias_for_stdout() {
        assert!(matches!(target_for("console").unwrap(), Target::Stdout));
        assert!(matches!(target_for("stderr").unwrap(), Target::Stderr));
    }

    #[test]
    fn file_target_is_created() {
        let path = std::env::temp_dir().join(format!("relayd-log-{}.log", std::process::id()));
        let target = target_for(path.to_str().unwrap()).unwrap();
        assert!(matches!(target, Target::Pipe(_)));
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        assert!(target_for("/nonexistent-dir/relayd.log").is_err());
    }
}
