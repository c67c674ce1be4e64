/// Re-export `Config` from `foliometry-core` for use within this crate.
///
/// All environment-variable parsing lives in `foliometry-core` so integration
/// tests can build a `Config` without depending on the full server.
pub use foliometry_core::config::{Config, Environment};
