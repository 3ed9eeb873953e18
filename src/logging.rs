//! Logging initializer. Library code only ever calls the `log` macros;
//! this module wires up a `fern` dispatcher (`fern::Dispatch::new().chain(stdout)`),
//! driven by the `LogOpt` struct `Config` already carries. Embedding callers
//! that already run their own `log` backend can skip this and call the
//! crate's operations directly — nothing here is required for correctness.

use log::LevelFilter;

use crate::config::LogOpt;

fn level_filter(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Installs a process-wide `fern` logger writing to stdout. `opts.quiet`
/// suppresses everything below `error`; otherwise `opts.level` selects the
/// filter. `opts.timestamps` being non-empty and not `"off"` prefixes each
/// line with seconds-since-epoch, without pulling in a second logging
/// dependency.
pub fn init(opts: &LogOpt) -> Result<(), fern::InitError> {
    let filter = if opts.quiet { LevelFilter::Error } else { level_filter(&opts.level) };
    let with_timestamp = !opts.timestamps.is_empty() && opts.timestamps != "off";

    fern::Dispatch::new()
        .format(move |out, message, record| {
            if with_timestamp {
                let secs = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                out.finish(format_args!("{} {} [{}] {}", secs, record.level(), record.target(), message))
            } else {
                out.finish(format_args!("{} [{}] {}", record.level(), record.target(), message))
            }
        })
        .level(filter)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_maps_known_names() {
        assert_eq!(level_filter("debug"), LevelFilter::Debug);
        assert_eq!(level_filter("bogus"), LevelFilter::Info);
    }
}
