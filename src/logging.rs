use log::LevelFilter;

/// Install the global logger. `RUST_LOG` overrides the built-in levels.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let result = env_logger::Builder::new()
        .filter_level(level)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .filter_module("rustls", LevelFilter::Warn)
        .filter_module("diesel", LevelFilter::Warn)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
    if let Err(e) = result {
        eprintln!("logger already installed: {e}");
    }
}
