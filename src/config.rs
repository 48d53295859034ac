/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! Load server and client configuration from TOML files. Every field has a
//! default, and a missing or malformed file falls back to the defaults so
//! the binaries always come up.

use std::fs;

use super::logger::DEFAULT_LOGS_DIR;
use super::policy::Policy;
use super::shm::DEFAULT_CAPACITY;

/// Configuration for the scheduler server process.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name of the shared queue segment; must begin with `/`.
    pub queue_name: String,

    /// Ring capacity in records.
    pub capacity: usize,

    /// TCP port the command server listens on.
    pub port: u16,

    /// Execution quantum handed to tasks, in milliseconds.
    pub quantum_ms: u64,

    /// One of `round_robin`, `static_priority`, `dynamic_priority`.
    pub policy: String,

    /// Directory for the log sinks.
    pub logs_dir: String,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            queue_name: "/task_queue".to_string(),
            capacity: DEFAULT_CAPACITY,
            port: 8080,
            quantum_ms: 100,
            policy: "round_robin".to_string(),
            logs_dir: DEFAULT_LOGS_DIR.to_string(),
        }
    }
}

impl ServerConfig {
    /// Parses the configured policy name, falling back to round robin for
    /// anything unrecognized.
    pub fn scheduling_policy(&self) -> Policy {
        match self.policy.as_str() {
            "static_priority" => Policy::StaticPriority,
            "dynamic_priority" => Policy::DynamicPriority,
            "round_robin" => Policy::round_robin(),
            other => {
                warn!("unknown policy {:?}, using round robin", other);
                Policy::round_robin()
            }
        }
    }

    /// Loads the server configuration from `path`, falling back to defaults
    /// when the file is missing or does not parse.
    pub fn load(path: &str) -> ServerConfig {
        load_or_default(path)
    }
}

/// Configuration for the command-line client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the command server.
    pub server_addr: String,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            server_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &str) -> ClientConfig {
        load_or_default(path)
    }
}

fn load_or_default<T>(path: &str) -> T
where
    T: Default + serde::de::DeserializeOwned,
{
    match fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!("failed to parse {}: {}; using defaults", path, e);
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: ServerConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.queue_name, "/task_queue");
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.quantum_ms, 100);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load("/taskd_no_such_config.toml");
        assert_eq!(config.port, 8080);
        assert_eq!(config.logs_dir, DEFAULT_LOGS_DIR);
    }

    #[test]
    fn policy_names_parse() {
        let mut config = ServerConfig::default();
        config.policy = "static_priority".to_string();
        assert_eq!(config.scheduling_policy().name(), "static priority");
        config.policy = "dynamic_priority".to_string();
        assert_eq!(config.scheduling_policy().name(), "dynamic priority");
        config.policy = "mystery".to_string();
        assert_eq!(config.scheduling_policy().name(), "round robin");
    }
}
