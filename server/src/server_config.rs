use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub default_email_query: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptLimits {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub endpoint: String,
    pub prompt_limits: PromptLimits,
    /// Filled from `ENRICHMENT_API_KEY`, never read from the file
    #[serde(skip)]
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub temperature: f64,
    pub max_body_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Max message ids requested from the provider per run
    pub page_size: u32,
    pub workers: usize,
    /// Global ceiling on in-flight enrichment calls, shared by every run
    pub enrichment_concurrency: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub output_buffer: usize,
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailConfig {
    pub base_url: String,
    pub quota_per_sec: usize,
    pub messages_get_cost: usize,
    pub messages_list_cost: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    /// Events collection of the user's primary calendar
    pub base_url: String,
    /// Zone for event times given without an offset
    pub time_zone: String,
    pub default_days: u32,
    pub max_days: u32,
    pub max_results: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_key_len: usize,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpRateLimitConfig {
    pub replenish_secs: u64,
    pub burst_size: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    settings: Settings,
    api: ApiConfig,
    model: ModelConfig,
    pipeline: PipelineConfig,
    gmail: GmailConfig,
    calendar: CalendarConfig,
    cache: CacheConfig,
    rate_limit: IpRateLimitConfig,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub settings: Settings,
    pub api: ApiConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub gmail: GmailConfig,
    pub calendar: CalendarConfig,
    pub cache: CacheConfig,
    pub rate_limit: IpRateLimitConfig,
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\n{:?}\n\nAPI: {} (prompts/sec: {})\n\nModel Config: {:?}\n\nPipeline Config: {:?}\n\nGmail Config: {:?}\n\nCalendar Config: {:?}\n\nCache Config: {:?}\n\nIP Rate Limit: {:?}",
            self.settings,
            self.api.endpoint,
            self.api.prompt_limits.rate_limit_per_sec,
            self.model,
            self.pipeline,
            self.gmail,
            self.calendar,
            self.cache,
            self.rate_limit,
        )
    }
}

fn config_root() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir =
            env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        let dir = Path::new(&dir)
            .parent()
            .expect("Failed to get parent dir")
            .display()
            .to_string();
        format!("{}/config", dir)
    })
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let root = config_root();
        let path = format!("{root}/config.toml");
        let cfg_file: ConfigFile = Config::builder()
            .add_source(config::File::with_name(&path))
            .build()
            .expect("config.toml is required")
            .try_deserialize()
            .expect("config.toml is invalid");

        let ConfigFile {
            mut settings,
            mut api,
            model,
            pipeline,
            gmail,
            calendar,
            cache,
            rate_limit,
        } = cfg_file;

        if let Ok(query) = env::var("DEFAULT_EMAIL_QUERY") {
            if !query.trim().is_empty() {
                settings.default_email_query = query;
            }
        }
        if let Ok(origins) = env::var("ALLOWED_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            if !origins.is_empty() {
                settings.allowed_origins = origins;
            }
        }
        api.key = env::var("ENRICHMENT_API_KEY").unwrap_or_default();

        ServerConfig {
            settings,
            api,
            model,
            pipeline,
            gmail,
            calendar,
            cache,
            rate_limit,
        }
    };
}
