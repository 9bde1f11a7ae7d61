#[cfg(test)]
use std::fs;
#[cfg(test)]
use std::path::{Path, PathBuf};

mod env_parsing;
mod loader;
mod schema;

pub use self::loader::{load_from_env_or_default, load_from_path, CONFIG_PATH_ENV};
pub use self::schema::{
    AdmissionConfig, AlertsConfig, AppConfig, ConfirmationConfig, FeedConfig, MetricsConfig,
    NodeConfig, NotifyConfig, RegistryConfig, ResolverConfig, SystemConfig, TrackedTokenConfig,
};
