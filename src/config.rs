// Configuration loading and parsing (auction.toml).

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_port: u16,
    pub db_path: PathBuf,
    pub rules: AuctionRules,
}

/// Auction-floor rules consumed by the API layer.
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionRules {
    /// Budget allotted to a team created without an explicit budget.
    pub default_team_budget: u64,
    /// Floor for player base prices.
    pub min_base_price: u64,
}

impl Default for AuctionRules {
    fn default() -> Self {
        AuctionRules {
            default_team_budget: 1_000_000,
            min_base_price: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// auction.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire auction.toml file. Every
/// section is optional; a missing file yields a fully-defaulted config.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    auction: AuctionSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection { port: 9100 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuctionSection {
    default_team_budget: u64,
    min_base_price: u64,
}

impl Default for AuctionSection {
    fn default() -> Self {
        let rules = AuctionRules::default();
        AuctionSection {
            default_team_budget: rules.default_team_budget,
            min_base_price: rules.min_base_price,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from `auction.toml` in the current working directory.
/// A missing file is not an error; every setting has a default.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = Path::new("auction.toml");
    if path.exists() {
        load_config_from(path)
    } else {
        assemble(ConfigFile::default())
    }
}

/// Load and validate configuration from an explicit file path.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    assemble(file)
}

fn assemble(file: ConfigFile) -> Result<Config, ConfigError> {
    let db_path = match file.database.path {
        Some(path) => PathBuf::from(path),
        None => default_db_path(),
    };
    let config = Config {
        ws_port: file.server.port,
        db_path,
        rules: AuctionRules {
            default_team_budget: file.auction.default_team_budget,
            min_base_price: file.auction.min_base_price,
        },
    };
    validate(&config)?;
    Ok(config)
}

/// Platform data directory when available, `./auction.db` otherwise.
fn default_db_path() -> PathBuf {
    match ProjectDirs::from("", "", "auction-desk") {
        Some(dirs) => dirs.data_dir().join("auction.db"),
        None => PathBuf::from("auction.db"),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.ws_port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.rules.default_team_budget == 0 {
        return Err(ConfigError::ValidationError {
            field: "auction.default_team_budget".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.rules.min_base_price > config.rules.default_team_budget {
        return Err(ConfigError::ValidationError {
            field: "auction.min_base_price".into(),
            message: format!(
                "must not exceed the default team budget ({})",
                config.rules.default_team_budget
            ),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tmp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("auction_config_{name}.toml"));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn full_file_loads_every_section() {
        let path = tmp_file(
            "full",
            r#"
[server]
port = 9200

[database]
path = "custom/auction.db"

[auction]
default_team_budget = 5000000
min_base_price = 50000
"#,
        );

        let config = load_config_from(&path).expect("should load valid config");
        assert_eq!(config.ws_port, 9200);
        assert_eq!(config.db_path, PathBuf::from("custom/auction.db"));
        assert_eq!(config.rules.default_team_budget, 5_000_000);
        assert_eq!(config.rules.min_base_price, 50_000);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn empty_file_falls_back_to_defaults() {
        let path = tmp_file("empty", "");

        let config = load_config_from(&path).expect("should load empty config");
        assert_eq!(config.ws_port, 9100);
        assert_eq!(
            config.rules.default_team_budget,
            AuctionRules::default().default_team_budget
        );
        assert_eq!(
            config.rules.min_base_price,
            AuctionRules::default().min_base_price
        );

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = tmp_file(
            "partial",
            r#"
[server]
port = 7777
"#,
        );

        let config = load_config_from(&path).expect("should load partial config");
        assert_eq!(config.ws_port, 7777);
        assert_eq!(
            config.rules.min_base_price,
            AuctionRules::default().min_base_price
        );

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn file_not_found_for_missing_path() {
        let err = load_config_from(Path::new("/nonexistent/auction.toml")).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => {
                assert!(path.ends_with("auction.toml"));
            }
            other => panic!("expected FileNotFound, got: {other}"),
        }
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let path = tmp_file("invalid", "this is not valid [[[ toml");

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_port_zero() {
        let path = tmp_file(
            "port_zero",
            r#"
[server]
port = 0
"#,
        );

        let err = load_config_from(&path).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "server.port");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_zero_default_budget() {
        let path = tmp_file(
            "zero_budget",
            r#"
[auction]
default_team_budget = 0
min_base_price = 0
"#,
        );

        let err = load_config_from(&path).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "auction.default_team_budget");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_base_price_floor_above_budget() {
        let path = tmp_file(
            "floor_above_budget",
            r#"
[auction]
default_team_budget = 1000
min_base_price = 2000
"#,
        );

        let err = load_config_from(&path).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "auction.min_base_price");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_file(&path);
    }
}
