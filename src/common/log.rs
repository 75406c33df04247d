//! Logging utilities

/// Initialize the logging system
///
/// # Parameters
///
/// * `level` - Log level used when `RUST_LOG` is not set
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    env_logger::init_from_env(env);
}
