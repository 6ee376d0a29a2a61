use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{BnmpError, Result};

const CONFIG_DIR_NAME: &str = ".bnmp";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Application configuration.
///
/// Loaded once at startup and passed into each component's constructor.
/// All limits mirror the BNMP portal's observed behavior: 2,000 rows per
/// page, at most 5 pages per ordered query (10,000 rows), and a second
/// descending pass extending coverage to 20,000 rows per filter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub urls: UrlConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlConfig {
    /// Paged warrant query endpoint. Placeholders: `{page}`, `{size}`, `{order}`.
    pub filter: String,
    /// City listing per state. Placeholder: `{state}`.
    pub cities: String,
    /// Issuing agency listing per city. Placeholder: `{city}`.
    pub agencies: String,
    /// Full warrant document. Placeholders: `{id}`, `{type}`.
    pub detail: String,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            filter: "https://portalbnmp.cnj.jus.br/bnmpportal/api/pesquisa-pecas/filter?page={page}&size={size}&sort=numeroPeca,{order}".to_string(),
            cities: "https://portalbnmp.cnj.jus.br/scaservice/api/municipios/por-uf/{state}".to_string(),
            agencies: "https://portalbnmp.cnj.jus.br/bnmpportal/api/pesquisa-pecas/orgaos/municipio/{city}".to_string(),
            detail: "https://portalbnmp.cnj.jus.br/bnmpportal/api/certidaos/{id}/{type}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    /// User agent string.
    pub user_agent: String,
    /// Path to the header bundle written by the cookie-refresh workflow.
    pub headers_path: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            user_agent: format!("bnmp-etl/{}", env!("CARGO_PKG_VERSION")),
            headers_path: PathBuf::from("headers.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Rows per bulk page.
    pub page_size: u32,
    /// Pages per ordered query. The API caps retrieval at 5 x 2,000 rows.
    pub max_pages: u32,
    /// Rows reachable with a single ascending query.
    pub single_order_cap: u64,
    /// Rows reachable with an ascending plus a descending query.
    pub dual_order_cap: u64,
    /// Document type ids probed when an agency filter is still too deep.
    pub doctype_max: u8,
    /// Concurrent in-flight requests for probing and scraping fan-out.
    pub max_workers: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            page_size: 2_000,
            max_pages: 5,
            single_order_cap: 10_000,
            dual_order_cap: 20_000,
            doctype_max: 13,
            max_workers: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database holding raw and parsed warrant tables.
    pub path: PathBuf,
    /// Directory receiving pipe-delimited batch artifacts.
    pub output_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bnmp.db"),
            output_dir: PathBuf::from("out"),
        }
    }
}

impl Config {
    /// Get the configuration directory path
    pub fn config_path() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| BnmpError::Config("Could not determine home directory".to_string()))?;

        Ok(home_dir.join(CONFIG_DIR_NAME))
    }

    /// Get the configuration file full path
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_path()?.join(CONFIG_FILE_NAME))
    }

    /// Initialize configuration directory and default file
    pub fn initialize() -> Result<()> {
        let config_dir = Self::config_path()?;

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| BnmpError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let config_file = Self::config_file_path()?;

        if !config_file.exists() {
            let default_config = Self::default();
            let yaml = serde_yaml::to_string(&default_config)
                .map_err(|e| BnmpError::Config(format!("Failed to serialize config: {}", e)))?;

            fs::write(&config_file, yaml)
                .map_err(|e| BnmpError::Config(format!("Failed to write config file: {}", e)))?;
        }

        Ok(())
    }

    /// Load configuration from file, creating it with defaults when absent
    pub fn load() -> Result<Self> {
        Self::initialize()?;

        let config_file = Self::config_file_path()?;
        Self::load_from(&config_file)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| BnmpError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| BnmpError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        Self::initialize()?;

        let config_file = Self::config_file_path()?;
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| BnmpError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_file, yaml)
            .map_err(|e| BnmpError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_api_caps() {
        let cfg = ScraperConfig::default();
        assert_eq!(cfg.page_size as u64 * cfg.max_pages as u64, cfg.single_order_cap);
        assert_eq!(cfg.single_order_cap * 2, cfg.dual_order_cap);
        assert_eq!(cfg.doctype_max, 13);
    }

    #[test]
    fn roundtrip_yaml() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.scraper.page_size, cfg.scraper.page_size);
        assert_eq!(back.urls.filter, cfg.urls.filter);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("scraper:\n  page_size: 2000\n  max_pages: 5\n  single_order_cap: 10000\n  dual_order_cap: 20000\n  doctype_max: 13\n  max_workers: 4\n").unwrap();
        assert_eq!(cfg.scraper.max_workers, 4);
        assert!(cfg.urls.filter.contains("{page}"));
    }
}
