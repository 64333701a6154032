use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::Deserialize;
use utilities::result::Result;

fn default_listen_addrs() -> String {
    "0.0.0.0:50051".to_owned()
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_log_base() -> String {
    "./logs".to_owned()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_base")]
    pub log_base: String,
}

impl Config {
    // every field has a default, so a missing config file still works
    pub fn load() -> Result<Self> {
        let config_file_path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| "./metaserver/config/default.yaml".to_owned());
        Ok(Figment::new()
            .merge(Yaml::file(config_file_path))
            .extract()?)
    }
}
