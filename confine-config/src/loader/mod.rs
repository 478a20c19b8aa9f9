pub mod layers;

mod builder;
mod manager;
mod merge;

#[cfg(test)]
mod tests;

pub use builder::ConfigBuilder;
pub use manager::{ConfigManager, ConfigSearchPaths};
pub use merge::merge_toml_values;
