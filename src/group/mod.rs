// 群组模块
// 成员一致性与增量同步：版本日志、指纹、权限状态机、写操作与通知。

pub mod auth;
pub mod callback;
pub mod fingerprint;
mod lifecycle;
pub mod model;
pub mod notification;
mod query;
pub mod service;
mod sync;
pub mod types;
pub mod version;
pub mod view;

pub use service::{GroupService, SyncLimits};
