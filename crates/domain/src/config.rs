pub mod errors;
pub mod logging;
pub mod query;
pub mod root;
pub mod upstream;

pub use errors::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use query::{ClientSubnetSpec, QueryConfig};
pub use root::{CliOverrides, Config};
pub use upstream::UpstreamEntry;
