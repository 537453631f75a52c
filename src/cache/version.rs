use std::sync::Arc;

use redis::{AsyncCommands, Client as RedisClient, Script};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::keys::{join_version_key, member_ids_key, member_version_key};
use crate::group::version::VersionHeader;

/// 只有键不存在或缓存中的 version 更低时才写入
const FILL_IF_NEWER: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
    local ok, decoded = pcall(cjson.decode, current)
    if ok and type(decoded) == 'table' and tonumber(decoded['version']) ~= nil
        and tonumber(decoded['version']) >= tonumber(ARGV[2]) then
        return 0
    end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

/// 带版本号的成员ID列表，version 为读取时的成员日志版本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMemberIds {
    pub version: u64,
    pub user_ids: Vec<String>,
}

/// 版本头与成员ID列表的旁路缓存
///
/// 读失败视为未命中。所有写入都按 version 比较，旧值不会覆盖新值；
/// 数据库提交后由存储层把最新值写回，而不是删除键。
#[derive(Clone)]
pub struct VersionCache {
    redis: Arc<RedisClient>,
    expire_secs: u64,
    fill: Arc<Script>,
}

impl VersionCache {
    pub fn new(redis: Arc<RedisClient>, expire_secs: u64) -> Self {
        Self {
            redis,
            expire_secs,
            fill: Arc::new(Script::new(FILL_IF_NEWER)),
        }
    }

    pub async fn member_version(&self, group_id: &str) -> Option<VersionHeader> {
        self.get(&member_version_key(group_id)).await
    }

    pub async fn fill_member_version(&self, group_id: &str, header: &VersionHeader) -> bool {
        self.fill_if_newer(&member_version_key(group_id), header.version, header)
            .await
    }

    pub async fn join_version(&self, user_id: &str) -> Option<VersionHeader> {
        self.get(&join_version_key(user_id)).await
    }

    pub async fn fill_join_version(&self, user_id: &str, header: &VersionHeader) -> bool {
        self.fill_if_newer(&join_version_key(user_id), header.version, header)
            .await
    }

    pub async fn member_ids(&self, group_id: &str) -> Option<CachedMemberIds> {
        self.get(&member_ids_key(group_id)).await
    }

    pub async fn fill_member_ids(&self, group_id: &str, ids: &CachedMemberIds) -> bool {
        self.fill_if_newer(&member_ids_key(group_id), ids.version, ids)
            .await
    }

    /// 无法写回最新值时的兜底
    pub async fn invalidate_group(&self, group_id: &str) {
        self.del(vec![member_version_key(group_id), member_ids_key(group_id)])
            .await;
    }

    pub async fn invalidate_users(&self, user_ids: &[String]) {
        if user_ids.is_empty() {
            return;
        }
        self.del(user_ids.iter().map(|id| join_version_key(id)).collect())
            .await;
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Ok(mut conn) = self.redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<Option<String>> = conn.get(key).await;
            match cached {
                Ok(Some(json_str)) => {
                    if let Ok(value) = serde_json::from_str::<T>(&json_str) {
                        tracing::debug!("Get from cache: {}", key);
                        return Some(value);
                    }
                    tracing::warn!("缓存数据无法解析: {}", key);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Redis get {} failed: {}", key, e),
            }
        }
        None
    }

    /// 返回是否写入；缓存中已有相同或更新的版本时不写
    async fn fill_if_newer<T: Serialize + ?Sized>(&self, key: &str, version: u64, value: &T) -> bool {
        let json_str = match serde_json::to_string(value) {
            Ok(json_str) => json_str,
            Err(e) => {
                tracing::warn!("缓存序列化失败 {}: {}", key, e);
                return false;
            }
        };
        let mut conn = match self.redis.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Redis connection failed, skip fill {}: {}", key, e);
                return false;
            }
        };
        let result: redis::RedisResult<i32> = self
            .fill
            .key(key)
            .arg(json_str)
            .arg(version)
            .arg(self.expire_secs)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(written) => written == 1,
            Err(e) => {
                tracing::warn!("Redis fill {} failed: {}", key, e);
                false
            }
        }
    }

    async fn del(&self, keys: Vec<String>) {
        match self.redis.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let result: Result<(), redis::RedisError> = conn.del(&keys).await;
                if let Err(e) = result {
                    tracing::error!("缓存失效失败 {:?}: {}", keys, e);
                }
            }
            Err(e) => tracing::error!("Redis connection failed, keys {:?} left stale: {}", keys, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_values_expose_top_level_version() {
        let ids = CachedMemberIds {
            version: 7,
            user_ids: vec!["a".into()],
        };
        let value: serde_json::Value = serde_json::to_value(&ids).unwrap();
        assert_eq!(value["version"], 7);

        let mut header = VersionHeader::fresh();
        header.version = 3;
        let value: serde_json::Value = serde_json::to_value(&header).unwrap();
        assert_eq!(value["version"], 3);
    }

    fn live_cache() -> Option<VersionCache> {
        let url = std::env::var("REDIS_URL").ok()?;
        let client = RedisClient::open(url).ok()?;
        Some(VersionCache::new(Arc::new(client), 60))
    }

    #[tokio::test]
    #[ignore = "requires a redis server at REDIS_URL"]
    async fn stale_fill_does_not_overwrite_newer_header() {
        let Some(cache) = live_cache() else {
            return;
        };
        let group_id = format!("cache-test-{}", uuid::Uuid::new_v4().simple());
        let mut old = VersionHeader::fresh();
        old.version = 1;
        let mut new = old.clone();
        new.version = 2;

        // 写入方提交后写回新版本，之后读方才带着旧版本回填
        assert!(cache.fill_member_version(&group_id, &new).await);
        assert!(!cache.fill_member_version(&group_id, &old).await);
        assert_eq!(cache.member_version(&group_id).await.map(|h| h.version), Some(2));

        let stale_ids = CachedMemberIds {
            version: 1,
            user_ids: vec!["a".into()],
        };
        let fresh_ids = CachedMemberIds {
            version: 2,
            user_ids: vec!["a".into(), "b".into()],
        };
        assert!(cache.fill_member_ids(&group_id, &fresh_ids).await);
        assert!(!cache.fill_member_ids(&group_id, &stale_ids).await);
        assert_eq!(cache.member_ids(&group_id).await, Some(fresh_ids));

        cache.invalidate_group(&group_id).await;
    }
}
