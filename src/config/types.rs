use serde::{Deserialize, Serialize};

use crate::device::constants::{DEFAULT_BAUD, POLL_INTERVAL};

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_poll_interval_ms() -> u64 {
    POLL_INTERVAL
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Last port the user connected to, preselected on the next start.
    pub port: Option<String>,

    #[serde(default = "default_baud")]
    pub baud: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: None,
            baud: DEFAULT_BAUD,
            poll_interval_ms: POLL_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"port": "/dev/ttyACM0"}"#).unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud, DEFAULT_BAUD);
        assert_eq!(config.poll_interval_ms, POLL_INTERVAL);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config {
            port: Some("COM3".to_string()),
            baud: 9600,
            poll_interval_ms: 250,
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
