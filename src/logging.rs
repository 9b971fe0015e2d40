//! Logging setup: an `env_logger` builder configured from the effective
//! log level and optional log file.

use std::io::Write;

use log::LevelFilter;
use runtime::RuntimeConfig;

pub fn init(config: &RuntimeConfig, verbose: usize) -> std::io::Result<()> {
    let level = level_from_str(config.log_level()).max(level_from_verbosity(verbose));

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{} {}] {}",
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(log_file) = config.log_file() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn level_from_str(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn level_from_verbosity(verbose: usize) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
