/// Short git commit hash, `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("GIT_HASH");

pub const BUILD_TARGET: &str = env!("BUILD_TARGET");

/// Version string for `--version`.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

pub fn log_startup() {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = GIT_HASH,
        target = BUILD_TARGET,
        "rowsync starting"
    );
}
