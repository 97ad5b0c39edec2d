use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 50_000;

#[derive(Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize)]
pub struct Log {
    pub level: String,
}

#[derive(Serialize, Deserialize)]
pub struct RelayConfig {
    pub server: Server,
    pub log: Log,
}

impl Default for RelayConfig {
    fn default() -> RelayConfig {
        RelayConfig {
            server: Server {
                host: "localhost".to_string(),
                port: DEFAULT_PORT,
            },
            log: Log {
                level: "info".to_string(),
            },
        }
    }
}

impl RelayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> RelayConfig {
        serdeconv::from_toml_file(path).expect("Error loading relay configuration file")
    }

    /// The `host:port` string the listener binds to.
    #[inline]
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_address() {
        let config = RelayConfig::default();
        assert_eq!(config.address(), "localhost:50000");
    }

    #[test]
    fn test_toml_roundtrip() {
        let rendered = serdeconv::to_toml_string(&RelayConfig::default()).unwrap();
        let parsed: RelayConfig = serdeconv::from_toml_str(&rendered).unwrap();

        assert_eq!(parsed.server.host, "localhost");
        assert_eq!(parsed.server.port, DEFAULT_PORT);
        assert_eq!(parsed.log.level, "info");
    }
}
