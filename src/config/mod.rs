use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    /// 平台管理员，绕过所有群内权限检查
    pub app_admin_user_ids: Vec<String>,
    pub user_service_url: String,
    pub msg_service_url: String,
    pub callback_url: Option<String>,
    pub callback_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// 单次增量同步允许的最大变更数，超出则全量
    pub sync_limit: usize,
    /// 批量增量同步的总变更数上限
    pub batch_sync_ceiling: usize,
    /// 每个版本日志保留的条目数
    pub version_log_retention: usize,
    pub notification_queue_capacity: usize,
    pub notification_workers: usize,
    pub cache_expire_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .unwrap_or_default()
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            server_host: env::var("SERVER_HOST")?,
            server_port: parse_or("SERVER_PORT", 3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".to_string()),
            app_admin_user_ids: parse_list(&env::var("APP_ADMIN_USER_IDS").unwrap_or_default()),
            user_service_url: env::var("USER_SERVICE_URL")?,
            msg_service_url: env::var("MSG_SERVICE_URL")?,
            callback_url: env::var("CALLBACK_URL").ok().filter(|url| !url.is_empty()),
            callback_timeout_secs: parse_or("CALLBACK_TIMEOUT", 5),
            request_timeout_secs: parse_or("REQUEST_TIMEOUT", 10),
            sync_limit: parse_or("SYNC_LIMIT", 1000),
            batch_sync_ceiling: parse_or("BATCH_SYNC_CEILING", 500),
            version_log_retention: parse_or("VERSION_LOG_RETENTION", 5000),
            notification_queue_capacity: parse_or("NOTIFICATION_QUEUE_CAPACITY", 1024),
            notification_workers: parse_or("NOTIFICATION_WORKERS", 4),
            cache_expire_secs: parse_or("CACHE_EXPIRE", 600),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn is_app_admin(&self, user_id: &str) -> bool {
        self.app_admin_user_ids.iter().any(|id| id == user_id)
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// 解析逗号分隔的列表，忽略空白项
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
