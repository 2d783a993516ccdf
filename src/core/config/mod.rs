pub mod data;
pub mod defaults;
pub mod io;

pub use data::{Config, ProviderConfig};
pub use io::ConfigError;
