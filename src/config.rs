//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DATAHIVE__*` 覆盖（双下划线表示嵌套，如 `DATAHIVE__EXECUTOR__ATTEMPT_TIMEOUT_MS=5000`）。
//! 所有阈值与权重都只是可调的默认值。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::Category;
use crate::executor::RequestSpec;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub health: HealthSection,
    pub scoring: ScoringSection,
    pub executor: ExecutorSection,
    pub proxy: ProxySection,
    pub cache: CacheSection,
    pub agent: AgentSection,
}

/// [app] 段：名称、目录文件、健康快照路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 资源目录 TOML，未设置时查找 config/resources.toml
    pub catalog_path: Option<PathBuf>,
    /// 健康状态快照（JSON），设置后启动时加载、退出时保存
    pub health_snapshot_path: Option<PathBuf>,
}

/// [health] 段：状态机阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// 延迟 EMA 平滑系数
    pub ema_alpha: f64,
    /// 成功但延迟超过此值时记为 DEGRADED
    pub degraded_latency_ms: u64,
    pub degraded_after: u32,
    pub failed_after: u32,
    /// FAILED 且持续无成功超过该时长 → BLOCKED
    pub blocked_grace_secs: u64,
    /// BLOCKED 连续经历多少次巡检后报告为已排除
    pub blocked_sweeps_before_exclusion: u32,
    /// 每个资源保留的尝试记录条数
    pub history_capacity: usize,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            ema_alpha: 0.3,
            degraded_latency_ms: 5_000,
            degraded_after: 3,
            failed_after: 5,
            blocked_grace_secs: 24 * 3600,
            blocked_sweeps_before_exclusion: 1,
            history_capacity: 50,
        }
    }
}

/// [scoring] 段：优先级评分权重
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub success_weight: f64,
    pub latency_weight: f64,
    pub recency_weight: f64,
    /// 延迟归一化基准：avg == 该值时延迟分为 0.5
    pub latency_reference_ms: f64,
    pub recency_half_life_secs: u64,
    /// 新近度按桶量化，保证同一桶内排序稳定
    pub recency_bucket_secs: u64,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            success_weight: 0.6,
            latency_weight: 0.25,
            recency_weight: 0.15,
            latency_reference_ms: 1_000.0,
            recency_half_life_secs: 3_600,
            recency_bucket_secs: 60,
        }
    }
}

/// [executor] 段：单次尝试超时、尝试上限、地域封锁特征
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub attempt_timeout_ms: u64,
    pub max_attempts_cap: usize,
    /// 403 响应体匹配任一正则即视为地域封锁（不区分大小写）
    pub geo_block_patterns: Vec<String>,
    pub user_agent: String,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 10_000,
            max_attempts_cap: 15,
            geo_block_patterns: default_geo_block_patterns(),
            user_agent: "datahive/0.1".to_string(),
        }
    }
}

impl ExecutorSection {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

fn default_geo_block_patterns() -> Vec<String> {
    vec![
        r"not available in your (country|region)".into(),
        r"restricted (location|jurisdiction)".into(),
        r"unavailable for legal reasons".into(),
        r"geo.?block".into(),
        r"access denied.*region".into(),
    ]
}

/// 单个代理条目
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyEntry {
    /// 如 http://1.2.3.4:8080、socks5://host:1080
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// [proxy] 段：代理池与备用解析器
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub proxies: Vec<ProxyEntry>,
    /// 单次资源尝试内最多换几个代理
    pub max_proxy_retries: usize,
    /// 连续失败多少次后 suspected → unhealthy
    pub unhealthy_after: u32,
    pub rotation_interval_secs: u64,
    /// 代理滚动健康分的 EMA 系数
    pub score_alpha: f64,
    pub probe_url: String,
    /// DNS-over-HTTPS JSON 接口（连接类错误时的备用手段）
    pub resolvers: Vec<String>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            max_proxy_retries: 3,
            unhealthy_after: 3,
            rotation_interval_secs: 300,
            score_alpha: 0.3,
            probe_url: "https://www.gstatic.com/generate_204".to_string(),
            resolvers: vec![
                "https://cloudflare-dns.com/dns-query".to_string(),
                "https://dns.google/resolve".to_string(),
            ],
        }
    }
}

/// 缓存后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

/// [cache] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub backend: CacheBackend,
    pub sqlite_path: PathBuf,
    pub default_ttl_secs: u64,
    /// 按分类覆盖 TTL（键为分类名，如 market_data）
    pub ttl_overrides: BTreeMap<Category, u64>,
    /// 超过此时长的过期条目由巡检清理（过期但未超龄的条目保留用于兜底）
    pub max_stale_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            sqlite_path: PathBuf::from("data/cache.db"),
            default_ttl_secs: 300,
            ttl_overrides: BTreeMap::new(),
            max_stale_secs: 24 * 3600,
        }
    }
}

impl CacheSection {
    pub fn ttl_for(&self, category: Category) -> Duration {
        Duration::from_secs(
            self.ttl_overrides
                .get(&category)
                .copied()
                .unwrap_or(self.default_ttl_secs),
        )
    }
}

/// 后台采集的默认请求
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// 设置后以 POST 发送（如 JSON-RPC）
    #[serde(default)]
    pub body: Option<String>,
}

impl DefaultRequest {
    pub fn to_spec(&self) -> RequestSpec {
        let mut spec = match &self.body {
            Some(body) => RequestSpec::post(&self.path, body),
            None => RequestSpec::get(&self.path),
        };
        for (k, v) in &self.query {
            spec = spec.with_query(k, v);
        }
        spec
    }
}

/// [agent] 段：后台采集间隔与默认请求
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub enabled: bool,
    /// 各分类采集间隔（秒），未列出的分类不启动采集任务
    pub intervals: BTreeMap<Category, u64>,
    pub sweep_interval_secs: u64,
    pub stop_timeout_secs: u64,
    pub requests: BTreeMap<Category, DefaultRequest>,
}

impl Default for AgentSection {
    fn default() -> Self {
        let intervals = BTreeMap::from([
            (Category::MarketData, 60),
            (Category::News, 600),
            (Category::Sentiment, 300),
            (Category::OnChain, 300),
            (Category::BlockExplorer, 600),
            (Category::Rpc, 120),
        ]);
        Self {
            enabled: true,
            intervals,
            sweep_interval_secs: 300,
            stop_timeout_secs: 10,
            requests: BTreeMap::new(),
        }
    }
}

impl AgentSection {
    pub fn request_for(&self, category: Category) -> RequestSpec {
        self.requests
            .get(&category)
            .map(DefaultRequest::to_spec)
            .unwrap_or_else(|| RequestSpec::get(""))
    }
}

impl AppConfig {
    /// 校验取值范围；在构建编排器时调用
    pub fn validate(&self) -> Result<(), String> {
        let h = &self.health;
        if !(h.ema_alpha > 0.0 && h.ema_alpha <= 1.0) {
            return Err(format!("health.ema_alpha must be in (0, 1], got {}", h.ema_alpha));
        }
        if h.degraded_after == 0 || h.degraded_after > h.failed_after {
            return Err(format!(
                "health thresholds out of order: degraded_after={} failed_after={}",
                h.degraded_after, h.failed_after
            ));
        }
        let s = &self.scoring;
        if s.success_weight < 0.0 || s.latency_weight < 0.0 || s.recency_weight < 0.0 {
            return Err("scoring weights must be non-negative".to_string());
        }
        if s.latency_reference_ms <= 0.0 {
            return Err("scoring.latency_reference_ms must be positive".to_string());
        }
        if !(self.proxy.score_alpha > 0.0 && self.proxy.score_alpha <= 1.0) {
            return Err("proxy.score_alpha must be in (0, 1]".to_string());
        }
        if self.executor.attempt_timeout_ms == 0 {
            return Err("executor.attempt_timeout_ms must be positive".to_string());
        }
        for p in &self.executor.geo_block_patterns {
            regex::Regex::new(p).map_err(|e| format!("invalid geo_block pattern {p:?}: {e}"))?;
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 DATAHIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DATAHIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DATAHIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
