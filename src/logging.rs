//! Logging setup for the SMC bridge

use fern::Dispatch;
use log::LevelFilter;

/// Setup logging with the specified verbosity level
pub fn setup(verbosity: u8) -> Result<(), fern::InitError> {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // results go to stdout, diagnostics to stderr
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}
