//! 目录加载器
//!
//! 从 TOML 文件读取 `[[resources]]` 列表；未指定路径时依次查找 config/resources.toml、../config/resources.toml。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Catalog, CatalogError, ResourceDescriptor};

/// resources.toml 的顶层结构
#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
}

impl CatalogFile {
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        toml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))
    }
}

fn default_catalog_path() -> Option<PathBuf> {
    [
        PathBuf::from("config/resources.toml"),
        PathBuf::from("../config/resources.toml"),
    ]
    .into_iter()
    .find(|p| p.exists())
}

/// 加载目录；找不到任何文件时返回空目录（所有分类都会得到 NoResourcesAvailable）
pub fn load_catalog(path: Option<&Path>) -> Result<Catalog, CatalogError> {
    let path = match path.map(Path::to_path_buf).or_else(default_catalog_path) {
        Some(p) => p,
        None => {
            tracing::warn!("No catalog file found, starting with an empty catalog");
            return Catalog::new(Vec::new());
        }
    };

    let text = std::fs::read_to_string(&path)?;
    let file = CatalogFile::parse(&text)?;
    let catalog = Catalog::new(file.resources)?;
    tracing::info!(
        "Loaded {} resources in {} categories from {}",
        catalog.len(),
        catalog.categories().len(),
        path.display()
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AuthMode, Category};

    const SAMPLE: &str = r#"
[[resources]]
id = "coingecko"
name = "CoinGecko"
category = "market_data"
base_url = "https://api.coingecko.com/api/v3"
priority = 1

[[resources]]
id = "cmc"
name = "CoinMarketCap"
category = "market_data"
base_url = "https://pro-api.coinmarketcap.com/v1"
priority = 2
is_free = false
auth = { mode = "header", header = "X-CMC_PRO_API_KEY", key_env = "CMC_API_KEY" }

[[resources]]
id = "binance"
name = "Binance"
category = "market_data"
base_url = "https://api.binance.com/api/v3"
requires_proxy = true
websocket = true
"#;

    #[test]
    fn test_parse_catalog_file() {
        let file = CatalogFile::parse(SAMPLE).unwrap();
        assert_eq!(file.resources.len(), 3);
        let cmc = &file.resources[1];
        assert_eq!(cmc.category, Category::MarketData);
        assert!(!cmc.is_free);
        assert!(matches!(cmc.auth, AuthMode::Header { .. }));
        let binance = &file.resources[2];
        assert!(binance.requires_proxy);
        assert!(binance.websocket);
        assert_eq!(binance.priority, 100);
    }

    #[test]
    fn test_load_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let catalog = load_catalog(Some(&path)).unwrap();
        assert_eq!(catalog.category_len(Category::MarketData), 3);
    }

    #[test]
    fn test_parse_rejects_unknown_category() {
        let bad = "[[resources]]\nid = \"x\"\nname = \"x\"\ncategory = \"weather\"\nbase_url = \"https://x\"\n";
        assert!(matches!(CatalogFile::parse(bad), Err(CatalogError::Parse(_))));
    }
}
