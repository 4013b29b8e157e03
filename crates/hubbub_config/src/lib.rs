pub mod settings;

use crate::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BackpressurePolicy, BrokerSettings, ServerSettings, Settings};

/// Load settings from `config/default.toml` (optional) and the environment
/// (`HUBBUB_SERVER__PORT=9000` style; the double underscore separates
/// nesting levels so keys like `max_queue_size` stay intact), falling back
/// to defaults for anything left unset.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::with_prefix("HUBBUB").separator("__"));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            admin_port: partial
                .server
                .as_ref()
                .and_then(|s| s.admin_port)
                .unwrap_or(default.server.admin_port),
            expose_errors: partial
                .server
                .as_ref()
                .and_then(|s| s.expose_errors)
                .unwrap_or(default.server.expose_errors),
        },
        broker: BrokerSettings {
            max_queue_size: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_queue_size)
                .unwrap_or(default.broker.max_queue_size),
            ring_buffer_size: partial
                .broker
                .as_ref()
                .and_then(|b| b.ring_buffer_size)
                .unwrap_or(default.broker.ring_buffer_size),
            backpressure_policy: partial
                .broker
                .as_ref()
                .and_then(|b| b.backpressure_policy)
                .unwrap_or(default.broker.backpressure_policy),
        },
    })
}

#[cfg(test)]
mod env_tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Settings::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.admin_port, 8081);
        assert!(!cfg.server.expose_errors);
        assert_eq!(cfg.broker.max_queue_size, 1000);
        assert_eq!(cfg.broker.ring_buffer_size, 100);
        assert_eq!(
            cfg.broker.backpressure_policy,
            BackpressurePolicy::DropOldest
        );
    }

    #[test]
    fn load_config_from_file_overrides_defaults() {
        // Create a temporary directory and set it as current dir so load_config
        // will pick up config/default.toml from there.
        let tmp = TempDir::new().expect("create tempdir");
        let orig = env::current_dir().expect("current_dir");
        env::set_current_dir(tmp.path()).expect("set current dir");

        fs::create_dir_all("config").expect("create config dir");
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            admin_port = 9001

            [broker]
            max_queue_size = 2
            ring_buffer_size = 10
            backpressure_policy = "DISCONNECT"
        "#;
        fs::write("config/default.toml", toml).expect("write config file");

        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.admin_port, 9001);
        assert_eq!(cfg.broker.max_queue_size, 2);
        assert_eq!(cfg.broker.ring_buffer_size, 10);
        assert_eq!(
            cfg.broker.backpressure_policy,
            BackpressurePolicy::Disconnect
        );

        // restore cwd
        env::set_current_dir(orig).expect("restore cwd");
    }
}
