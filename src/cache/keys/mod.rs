/// 缓存键模块
/// 提供群组同步相关的缓存键生成函数

// 群组缓存键模块
pub mod group_keys;

pub use group_keys::{join_version_key, member_ids_key, member_version_key};
