//! Logger setup.
//!
//! Configures the global `env_logger` with an aligned, optionally colored
//! line format. `RUST_LOG` controls filtering (default `info`); setting
//! `NO_COLOR` disables ANSI colors.

use chrono::Local;
use env_logger::Builder;
use log::Level;
use std::env;
use std::io::Write;

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m", // red
        Level::Warn => "\x1b[33m",  // yellow
        Level::Info => "\x1b[32m",  // green
        Level::Debug => "\x1b[34m", // blue
        Level::Trace => "\x1b[35m", // magenta
    }
}

/// Initializes the process-wide logger.
///
/// Safe to call once at startup; a second call panics inside `env_logger`,
/// so tests use their own capture.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    let mut builder = Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder
        .format(move |buf, record| {
            let level = record.level();
            let target = record.target();

            if no_color {
                writeln!(
                    buf,
                    "{} | {:<5} | {} | {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    level,
                    target,
                    record.args(),
                )
            } else {
                writeln!(
                    buf,
                    "{} | {}{:<5}\x1b[0m | {} | {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    level_color(level),
                    level,
                    target,
                    record.args(),
                )
            }
        })
        .init();
}
