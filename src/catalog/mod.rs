//! 资源目录：启动时加载一次，之后只读
//!
//! 按分类建立索引；健康追踪器永远不会从目录中删除资源（排除只通过健康状态体现）。

pub mod descriptor;
pub mod loader;

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

pub use descriptor::{AuthMode, Category, ResourceDescriptor, ResourceId};
pub use loader::{load_catalog, CatalogFile};

/// 目录加载 / 校验错误
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Duplicate resource id: {0}")]
    DuplicateId(String),

    #[error("Resource {0} has an empty base_url")]
    EmptyEndpoint(String),

    #[error("Resource {0} uses path auth but base_url has no {{key}} placeholder")]
    MissingKeyPlaceholder(String),

    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog: {0}")]
    Parse(String),
}

/// 不可变资源目录
#[derive(Debug, Default)]
pub struct Catalog {
    resources: HashMap<ResourceId, ResourceDescriptor>,
    by_category: BTreeMap<Category, Vec<ResourceId>>,
}

impl Catalog {
    /// 校验并建立索引；id 重复、URL 为空或路径鉴权缺少占位符时拒绝
    pub fn new(descriptors: Vec<ResourceDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        let mut resources = HashMap::with_capacity(descriptors.len());
        let mut by_category: BTreeMap<Category, Vec<ResourceId>> = BTreeMap::new();

        for d in descriptors {
            if !seen.insert(d.id.clone()) {
                return Err(CatalogError::DuplicateId(d.id));
            }
            if d.base_url.trim().is_empty() {
                return Err(CatalogError::EmptyEndpoint(d.id));
            }
            if matches!(d.auth, AuthMode::Path { .. }) && !d.base_url.contains("{key}") {
                return Err(CatalogError::MissingKeyPlaceholder(d.id));
            }
            by_category.entry(d.category).or_default().push(d.id.clone());
            resources.insert(d.id.clone(), d);
        }

        Ok(Self {
            resources,
            by_category,
        })
    }

    pub fn get(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.resources.get(id)
    }

    /// 某分类下的全部资源（按加载顺序）
    pub fn by_category(&self, category: Category) -> Vec<&ResourceDescriptor> {
        self.by_category
            .get(&category)
            .map(|ids| ids.iter().filter_map(|id| self.resources.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn category_len(&self, category: Category) -> usize {
        self.by_category.get(&category).map_or(0, Vec::len)
    }

    /// 至少包含一个资源的分类
    pub fn categories(&self) -> Vec<Category> {
        self.by_category.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.values()
    }
}
