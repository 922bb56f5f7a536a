//! Configuration loading: discovery, env substitution, and the schema shared
//! by the session store and the CLI.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, find_or_default_config_path,
        load_config, set_config_dir, write_default_config,
    },
    schema::{ParleyConfig, SessionsConfig, StoreConfig},
};
