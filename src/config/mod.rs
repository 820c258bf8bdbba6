//! Configuration handling for the tackboard server.
//!
//! The configuration is an immutable snapshot read once at startup; the
//! server never observes file changes after construction.

mod loader;
mod types;

pub use loader::load;
pub use types::{
    AuthMode, Configuration, DEFAULT_PORT, DEFAULT_SERVER_ROOT, OidcConfig, TlsConfig,
};
