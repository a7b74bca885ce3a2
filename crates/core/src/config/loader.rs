use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment variables with this prefix override file values.
/// Nested keys are separated by a double underscore, so
/// `HELPDESK_SERVER__PORT=9000` sets `server.port` and
/// `HELPDESK_AUTH__API_KEY` sets `auth.api_key`.
pub const ENV_PREFIX: &str = "HELPDESK_";

const ENV_SEPARATOR: &str = "__";

/// Load configuration from `path`, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parse configuration from a TOML string, without environment overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_str_minimal() {
        let config = load_config_from_str(
            r#"
[auth]
method = "none"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path.to_str(), Some("helpdesk.db"));
    }

    #[test]
    fn test_from_str_missing_auth() {
        let result = load_config_from_str("[server]\nport = 8080\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_from_str_unknown_auth_method() {
        let result = load_config_from_str("[auth]\nmethod = \"oidc\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_file_not_found() {
        let result = load_config(Path::new("/nonexistent/helpdesk.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "helpdesk.toml",
                "[auth]\nmethod = \"api_key\"\napi_key = \"from-file\"\n",
            )?;
            jail.set_env("HELPDESK_AUTH__API_KEY", "from-env");
            jail.set_env("HELPDESK_SERVER__PORT", "9100");

            let config = load_config(Path::new("helpdesk.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.auth.api_key.as_deref(), Some("from-env"));
            assert_eq!(config.server.port, 9100);
            Ok(())
        });
    }

    #[test]
    fn test_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[auth]
method = "api_key"
api_key = "s3cret"

[server]
host = "127.0.0.1"
port = 3000

[database]
path = "/var/lib/helpdesk/tickets.db"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.auth.api_key.as_deref(), Some("s3cret"));
        assert_eq!(
            config.database.path.to_str(),
            Some("/var/lib/helpdesk/tickets.db")
        );
    }
}
