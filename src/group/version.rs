// 版本日志
// 每个同步范围（群成员列表 / 用户已加入群列表）一份日志，
// 每个目标只保留最新一条变更，版本号单调递增。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 日志条目指向的对象
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LogTarget {
    /// 普通元素（成员ID或群ID）
    Element(String),
    /// 群资料本身发生变化
    GroupMetadata,
    /// 成员排序发生变化
    SortOrder,
}

impl LogTarget {
    pub fn element(id: impl Into<String>) -> Self {
        LogTarget::Element(id.into())
    }

    /// 存储层使用的 (kind, element_id) 编码
    pub fn kind(&self) -> &'static str {
        match self {
            LogTarget::Element(_) => "element",
            LogTarget::GroupMetadata => "group_metadata",
            LogTarget::SortOrder => "sort_order",
        }
    }

    pub fn element_id(&self) -> &str {
        match self {
            LogTarget::Element(id) => id,
            _ => "",
        }
    }

    pub fn from_parts(kind: &str, element_id: String) -> Option<Self> {
        match kind {
            "element" => Some(LogTarget::Element(element_id)),
            "group_metadata" => Some(LogTarget::GroupMetadata),
            "sort_order" => Some(LogTarget::SortOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    Insert,
    Update,
    Delete,
}

impl ChangeState {
    pub fn as_i16(self) -> i16 {
        match self {
            ChangeState::Insert => 1,
            ChangeState::Update => 2,
            ChangeState::Delete => 3,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(ChangeState::Insert),
            2 => Some(ChangeState::Update),
            3 => Some(ChangeState::Delete),
            _ => None,
        }
    }
}

/// 一次写入要追加的变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChange {
    pub target: LogTarget,
    pub state: ChangeState,
}

impl LogChange {
    pub fn insert(id: &str) -> Self {
        Self {
            target: LogTarget::element(id),
            state: ChangeState::Insert,
        }
    }

    pub fn update(id: &str) -> Self {
        Self {
            target: LogTarget::element(id),
            state: ChangeState::Update,
        }
    }

    pub fn delete(id: &str) -> Self {
        Self {
            target: LogTarget::element(id),
            state: ChangeState::Delete,
        }
    }

    pub fn group_metadata() -> Self {
        Self {
            target: LogTarget::GroupMetadata,
            state: ChangeState::Update,
        }
    }

    pub fn sort_order() -> Self {
        Self {
            target: LogTarget::SortOrder,
            state: ChangeState::Update,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub target: LogTarget,
    pub state: ChangeState,
    pub version: u64,
    /// 该元素本次存在开始时的版本，早于保留窗口时为 0
    pub created_version: u64,
    pub last_update: DateTime<Utc>,
}

/// 日志头
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHeader {
    /// 日志身份，重建日志时更换
    pub version_id: String,
    pub version: u64,
    /// 已被裁剪掉的最高版本
    pub pruned_version: u64,
    pub last_update: DateTime<Utc>,
}

impl VersionHeader {
    pub fn fresh() -> Self {
        Self {
            version_id: Uuid::new_v4().to_string(),
            version: 0,
            pruned_version: 0,
            last_update: Utc::now(),
        }
    }

    /// 客户端检查点是否必须走全量同步
    pub fn requires_full_sync(&self, known_version_id: &str, known_version: u64) -> bool {
        known_version_id != self.version_id
            || known_version == 0
            || known_version > self.version
            || known_version < self.pruned_version
    }

    /// 检查点与当前版本完全一致
    pub fn is_current(&self, known_version_id: &str, known_version: u64) -> bool {
        known_version_id == self.version_id && known_version == self.version
    }
}

/// 增量查询结果：日志头加上检查点之后的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLog {
    pub header: VersionHeader,
    /// 检查点之后的条目总数
    pub log_len: usize,
    /// 最多 limit 条
    pub entries: Vec<LogEntry>,
}

impl VersionLog {
    pub fn empty(header: VersionHeader) -> Self {
        Self {
            header,
            log_len: 0,
            entries: Vec::new(),
        }
    }

    /// 条目被 limit 截断，客户端无法仅靠增量追上
    pub fn truncated(&self) -> bool {
        self.entries.len() != self.log_len
    }

    /// 按检查点把条目归类为删除、新增与更新
    pub fn changes_since(&self, known_version: u64) -> LogDelta {
        let mut delta = LogDelta::default();
        for entry in &self.entries {
            if entry.version <= known_version {
                continue;
            }
            match &entry.target {
                LogTarget::GroupMetadata => delta.has_group_update = true,
                LogTarget::SortOrder => delta.sort_version = delta.sort_version.max(entry.version),
                LogTarget::Element(id) => match entry.state {
                    ChangeState::Delete => delta.delete.push(id.clone()),
                    _ if entry.created_version > known_version => delta.insert.push(id.clone()),
                    _ => delta.update.push(id.clone()),
                },
            }
        }
        delta
    }
}

/// 归类后的元素ID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDelta {
    pub delete: Vec<String>,
    pub insert: Vec<String>,
    pub update: Vec<String>,
    pub has_group_update: bool,
    /// 0 表示排序未变
    pub sort_version: u64,
}

impl LogDelta {
    /// 计入批量上限的变更数，哨兵条目不计
    pub fn changed(&self) -> usize {
        self.delete.len() + self.insert.len() + self.update.len()
    }
}

/// 单个范围的内存日志，MemoryGroupStore 直接使用，PgGroupStore 用 SQL 实现同样的规则
#[derive(Debug, Clone)]
pub struct VersionLogTable {
    header: VersionHeader,
    /// 按版本升序
    entries: Vec<LogEntry>,
}

impl Default for VersionLogTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionLogTable {
    pub fn new() -> Self {
        Self {
            header: VersionHeader::fresh(),
            entries: Vec::new(),
        }
    }

    pub fn header(&self) -> &VersionHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 以一个新版本追加一批变更，返回追加后的版本号
    pub fn append(&mut self, changes: &[LogChange], retention: usize) -> u64 {
        if changes.is_empty() {
            return self.header.version;
        }
        let now = Utc::now();
        let version = self.header.version + 1;

        for change in collapse(changes) {
            let previous = self
                .entries
                .iter()
                .position(|entry| entry.target == change.target)
                .map(|index| self.entries.remove(index));
            let created_version = created_version_for(
                change.state,
                previous.map(|entry| (entry.state, entry.created_version)),
                version,
            );
            self.entries.push(LogEntry {
                target: change.target,
                state: change.state,
                version,
                created_version,
                last_update: now,
            });
        }

        self.header.version = version;
        self.header.last_update = now;
        self.prune(retention);
        version
    }

    fn prune(&mut self, retention: usize) {
        if retention == 0 || self.entries.len() <= retention {
            return;
        }
        let excess = self.entries.len() - retention;
        for entry in self.entries.drain(..excess) {
            self.header.pruned_version = self.header.pruned_version.max(entry.version);
        }
    }

    /// 版本号大于 known_version 的条目，最多 limit 条
    pub fn since(&self, known_version: u64, limit: usize) -> VersionLog {
        let changed: Vec<&LogEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.version > known_version)
            .collect();
        VersionLog {
            header: self.header.clone(),
            log_len: changed.len(),
            entries: changed.into_iter().take(limit).cloned().collect(),
        }
    }
}

/// 同一批次中同一目标只保留最后一次变更，保持首次出现的顺序
pub fn collapse(changes: &[LogChange]) -> Vec<LogChange> {
    let mut latest: HashMap<&LogTarget, ChangeState> = HashMap::new();
    let mut order = Vec::new();
    for change in changes {
        if latest.insert(&change.target, change.state).is_none() {
            order.push(&change.target);
        }
    }
    order
        .into_iter()
        .map(|target| LogChange {
            target: target.clone(),
            state: latest[target],
        })
        .collect()
}

/// 计算新条目的 created_version
///
/// 新增从当前版本开始；更新和删除沿用上一条的值，上一条不存在（早于保留窗口）时为 0。
pub fn created_version_for(
    state: ChangeState,
    previous: Option<(ChangeState, u64)>,
    version: u64,
) -> u64 {
    match state {
        ChangeState::Insert => version,
        ChangeState::Update => previous
            .filter(|(prev_state, _)| *prev_state != ChangeState::Delete)
            .map_or(0, |(_, created)| created),
        ChangeState::Delete => previous.map_or(0, |(_, created)| created),
    }
}
