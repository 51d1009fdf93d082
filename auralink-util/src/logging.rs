/// Installs `env_logger` with a default filter of `info`, honoring
/// `RUST_LOG` when the caller has set it. Both binaries call this
/// first thing in `main`.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
