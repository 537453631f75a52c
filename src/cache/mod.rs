// 缓存模块
// 版本头与成员ID列表的 Redis 旁路缓存

pub mod keys;
pub mod version;

pub use version::{CachedMemberIds, VersionCache};
