/// Version string reported by `--version`: the crate version plus the
/// git revision and build time stamped by `build/build.rs`.
pub const VERSION: &str = env!("STORCTL_BUILD_VERSION");
