//! 资源描述：分类（封闭枚举）、鉴权方式、不可变的 ResourceDescriptor

use std::fmt;

use serde::{Deserialize, Serialize};

/// 资源 ID（目录内唯一）
pub type ResourceId = String;

/// 数据分类：封闭集合，新增分类需要在所有 match 处显式处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// 行情价格
    MarketData,
    /// 新闻
    News,
    /// 情绪指数
    Sentiment,
    /// 链上数据
    OnChain,
    /// 区块浏览器
    BlockExplorer,
    /// 节点 RPC
    Rpc,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::MarketData,
        Category::News,
        Category::Sentiment,
        Category::OnChain,
        Category::BlockExplorer,
        Category::Rpc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::MarketData => "market_data",
            Category::News => "news",
            Category::Sentiment => "sentiment",
            Category::OnChain => "on_chain",
            Category::BlockExplorer => "block_explorer",
            Category::Rpc => "rpc",
        }
    }

    /// 在 `ALL` 中的下标（用于按分类的无锁计数器数组）
    pub fn index(&self) -> usize {
        match self {
            Category::MarketData => 0,
            Category::News => 1,
            Category::Sentiment => 2,
            Category::OnChain => 3,
            Category::BlockExplorer => 4,
            Category::Rpc => 5,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// API Key 的携带方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthMode {
    /// 无需鉴权
    None,
    /// Key 作为查询参数，如 `?apikey=...`
    Query { param: String, key_env: String },
    /// Key 放在请求头中
    Header { header: String, key_env: String },
    /// Key 嵌入路径，base_url 中需包含 `{key}` 占位符
    Path { key_env: String },
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::None
    }
}

impl AuthMode {
    /// 需要读取的环境变量名（None 表示无需 Key）
    pub fn key_env(&self) -> Option<&str> {
        match self {
            AuthMode::None => None,
            AuthMode::Query { key_env, .. }
            | AuthMode::Header { key_env, .. }
            | AuthMode::Path { key_env } => Some(key_env.as_str()),
        }
    }
}

/// 单个外部数据源端点（加载后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub name: String,
    pub category: Category,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthMode,
    /// 需要经代理访问（地域限制）
    #[serde(default)]
    pub requires_proxy: bool,
    #[serde(default = "default_true")]
    pub is_free: bool,
    /// 目录声明的优先级，数值越小越优先；仅用于同分排序
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub websocket: bool,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>, category: Category, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category,
            base_url: base_url.into(),
            auth: AuthMode::None,
            requires_proxy: false,
            is_free: true,
            priority: default_priority(),
            websocket: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_proxy(mut self, requires_proxy: bool) -> Self {
        self.requires_proxy = requires_proxy;
        self
    }

    pub fn with_websocket(mut self, websocket: bool) -> Self {
        self.websocket = websocket;
        self
    }

    pub fn paid(mut self) -> Self {
        self.is_free = false;
        self
    }
}
