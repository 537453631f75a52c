// Postgres 实现
// 每个写方法一个事务：锁住日志头（SELECT ... FOR UPDATE），变更行并追加日志，一次提交。
// 提交后把最新的版本头与成员ID写回 Redis，写回失败时删除对应键。
// 锁日志头一律按 scope_id 排序，避免并发写互相等待。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::{GroupStore, RequestDecision};
use crate::cache::{CachedMemberIds, VersionCache};
use crate::error::{AppError, AppResult};
use crate::group::model::{
    Group, GroupMember, GroupRequest, GroupStatus, GroupUpdate, MemberUpdate, RoleLevel,
};
use crate::group::version::{
    ChangeState, LogChange, LogEntry, LogTarget, VersionHeader, VersionLog, collapse,
    created_version_for,
};

const MEMBER_SCOPE: &str = "member";
const JOIN_SCOPE: &str = "join";

const GROUP_COLUMNS: &str = "group_id, name, face_url, introduction, notification, \
    notification_update_time, notification_user_id, creator_user_id, create_time, group_type, \
    status, need_verification, look_member_info, apply_member_friend, ex";

const MEMBER_COLUMNS: &str = "group_id, user_id, role_level, nickname, face_url, join_time, \
    join_source, inviter_user_id, operator_user_id, mute_end_time, ex";

const REQUEST_COLUMNS: &str = "group_id, user_id, req_msg, req_time, join_source, \
    inviter_user_id, handle_result, handled_msg, handle_user_id, handled_time, ex";

#[derive(sqlx::FromRow)]
struct GroupRow {
    group_id: String,
    name: String,
    face_url: String,
    introduction: String,
    notification: String,
    notification_update_time: DateTime<Utc>,
    notification_user_id: String,
    creator_user_id: String,
    create_time: DateTime<Utc>,
    group_type: i32,
    status: i32,
    need_verification: i32,
    look_member_info: i32,
    apply_member_friend: i32,
    ex: String,
}

impl TryFrom<GroupRow> for Group {
    type Error = AppError;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        Ok(Group {
            group_type: row.group_type.try_into().map_err(AppError::internal)?,
            status: row.status.try_into().map_err(AppError::internal)?,
            need_verification: row.need_verification.try_into().map_err(AppError::internal)?,
            group_id: row.group_id,
            name: row.name,
            face_url: row.face_url,
            introduction: row.introduction,
            notification: row.notification,
            notification_update_time: row.notification_update_time,
            notification_user_id: row.notification_user_id,
            creator_user_id: row.creator_user_id,
            create_time: row.create_time,
            look_member_info: row.look_member_info,
            apply_member_friend: row.apply_member_friend,
            ex: row.ex,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    group_id: String,
    user_id: String,
    role_level: i32,
    nickname: String,
    face_url: String,
    join_time: DateTime<Utc>,
    join_source: i32,
    inviter_user_id: String,
    operator_user_id: String,
    mute_end_time: DateTime<Utc>,
    ex: String,
}

impl TryFrom<MemberRow> for GroupMember {
    type Error = AppError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(GroupMember {
            role_level: row.role_level.try_into().map_err(AppError::internal)?,
            join_source: row.join_source.try_into().map_err(AppError::internal)?,
            group_id: row.group_id,
            user_id: row.user_id,
            nickname: row.nickname,
            face_url: row.face_url,
            join_time: row.join_time,
            inviter_user_id: row.inviter_user_id,
            operator_user_id: row.operator_user_id,
            mute_end_time: row.mute_end_time,
            ex: row.ex,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    group_id: String,
    user_id: String,
    req_msg: String,
    req_time: DateTime<Utc>,
    join_source: i32,
    inviter_user_id: String,
    handle_result: i32,
    handled_msg: String,
    handle_user_id: String,
    handled_time: DateTime<Utc>,
    ex: String,
}

impl TryFrom<RequestRow> for GroupRequest {
    type Error = AppError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(GroupRequest {
            join_source: row.join_source.try_into().map_err(AppError::internal)?,
            handle_result: row.handle_result.try_into().map_err(AppError::internal)?,
            group_id: row.group_id,
            user_id: row.user_id,
            req_msg: row.req_msg,
            req_time: row.req_time,
            inviter_user_id: row.inviter_user_id,
            handled_msg: row.handled_msg,
            handle_user_id: row.handle_user_id,
            handled_time: row.handled_time,
            ex: row.ex,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> AppResult<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

pub struct PgGroupStore {
    pool: PgPool,
    cache: Option<VersionCache>,
    retention: usize,
}

impl PgGroupStore {
    pub fn new(pool: PgPool, cache: Option<VersionCache>, retention: usize) -> Self {
        Self {
            pool,
            cache,
            retention,
        }
    }

    /// 执行 migrations 目录下的建表脚本
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// 提交后刷新缓存
    async fn refresh_cache(&self, group_id: &str, user_ids: &[String]) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = self.write_back(cache, group_id, user_ids).await {
            tracing::error!("缓存写回失败 group={}，改为删除: {}", group_id, e);
            cache.invalidate_group(group_id).await;
            cache.invalidate_users(user_ids).await;
        }
    }

    async fn write_back(&self, cache: &VersionCache, group_id: &str, user_ids: &[String]) -> AppResult<()> {
        let header = self.max_version(MEMBER_SCOPE, group_id).await?;
        cache.fill_member_version(group_id, &header).await;
        let ids = self.member_ids_with_version(group_id).await?;
        cache.fill_member_ids(group_id, &ids).await;

        if user_ids.is_empty() {
            return Ok(());
        }
        let rows = sqlx::query(
            "SELECT scope_id, version_id, version, pruned_version, last_update
             FROM version_logs WHERE scope_kind = $1 AND scope_id = ANY($2)",
        )
        .bind(JOIN_SCOPE)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            let user_id: String = row.try_get("scope_id")?;
            cache.fill_join_version(&user_id, &header_from_row(row)?).await;
        }
        Ok(())
    }

    /// 同一条语句读取成员ID和成员日志版本，两者来自同一快照
    async fn member_ids_with_version(&self, group_id: &str) -> AppResult<CachedMemberIds> {
        let row = sqlx::query(
            "SELECT COALESCE(
                    (SELECT version FROM version_logs WHERE scope_kind = $1 AND scope_id = $2), 0
                ) AS version,
                ARRAY(SELECT user_id::text FROM group_members WHERE group_id = $2 ORDER BY user_id) AS user_ids",
        )
        .bind(MEMBER_SCOPE)
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(CachedMemberIds {
            version: row.try_get::<i64, _>("version")? as u64,
            user_ids: row.try_get("user_ids")?,
        })
    }

    async fn read_log(
        &self,
        scope_kind: &str,
        scope_id: &str,
        version: u64,
        limit: usize,
    ) -> AppResult<VersionLog> {
        let mut conn = self.pool.acquire().await?;
        let header = ensure_header(&mut conn, scope_kind, scope_id).await?;

        let log_len: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM version_log_entries
             WHERE scope_kind = $1 AND scope_id = $2 AND version > $3",
        )
        .bind(scope_kind)
        .bind(scope_id)
        .bind(version as i64)
        .fetch_one(&mut *conn)
        .await?;

        let rows = sqlx::query(
            "SELECT target_kind, element_id, state, version, created_version, last_update
             FROM version_log_entries
             WHERE scope_kind = $1 AND scope_id = $2 AND version > $3
             ORDER BY version ASC, target_kind ASC, element_id ASC
             LIMIT $4",
        )
        .bind(scope_kind)
        .bind(scope_id)
        .bind(version as i64)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("target_kind")?;
            let target = LogTarget::from_parts(&kind, row.try_get("element_id")?)
                .ok_or_else(|| AppError::internal(format!("unknown log target kind {}", kind)))?;
            let state: i16 = row.try_get("state")?;
            entries.push(LogEntry {
                target,
                state: ChangeState::from_i16(state)
                    .ok_or_else(|| AppError::internal(format!("unknown log state {}", state)))?,
                version: row.try_get::<i64, _>("version")? as u64,
                created_version: row.try_get::<i64, _>("created_version")? as u64,
                last_update: row.try_get("last_update")?,
            });
        }

        Ok(VersionLog {
            header,
            log_len: log_len as usize,
            entries,
        })
    }

    async fn max_version(&self, scope_kind: &str, scope_id: &str) -> AppResult<VersionHeader> {
        let mut conn = self.pool.acquire().await?;
        ensure_header(&mut conn, scope_kind, scope_id).await
    }
}

/// 读取日志头，不存在时创建
async fn ensure_header(
    conn: &mut PgConnection,
    scope_kind: &str,
    scope_id: &str,
) -> AppResult<VersionHeader> {
    sqlx::query(
        "INSERT INTO version_logs (scope_kind, scope_id, version_id)
         VALUES ($1, $2, $3)
         ON CONFLICT (scope_kind, scope_id) DO NOTHING",
    )
    .bind(scope_kind)
    .bind(scope_id)
    .bind(Uuid::new_v4().to_string())
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT version_id, version, pruned_version, last_update
         FROM version_logs WHERE scope_kind = $1 AND scope_id = $2",
    )
    .bind(scope_kind)
    .bind(scope_id)
    .fetch_one(&mut *conn)
    .await?;

    header_from_row(&row)
}

fn header_from_row(row: &sqlx::postgres::PgRow) -> AppResult<VersionHeader> {
    Ok(VersionHeader {
        version_id: row.try_get("version_id")?,
        version: row.try_get::<i64, _>("version")? as u64,
        pruned_version: row.try_get::<i64, _>("pruned_version")? as u64,
        last_update: row.try_get("last_update")?,
    })
}

/// 在当前事务内以新版本追加一批变更
async fn append_log(
    conn: &mut PgConnection,
    scope_kind: &str,
    scope_id: &str,
    changes: &[LogChange],
    retention: usize,
) -> AppResult<u64> {
    ensure_header(conn, scope_kind, scope_id).await?;
    let row = sqlx::query(
        "SELECT version_id, version, pruned_version, last_update
         FROM version_logs WHERE scope_kind = $1 AND scope_id = $2
         FOR UPDATE",
    )
    .bind(scope_kind)
    .bind(scope_id)
    .fetch_one(&mut *conn)
    .await?;
    let header = header_from_row(&row)?;
    if changes.is_empty() {
        return Ok(header.version);
    }

    let version = header.version + 1;
    let now = Utc::now();

    for change in collapse(changes) {
        let previous = sqlx::query(
            "SELECT state, created_version FROM version_log_entries
             WHERE scope_kind = $1 AND scope_id = $2 AND target_kind = $3 AND element_id = $4",
        )
        .bind(scope_kind)
        .bind(scope_id)
        .bind(change.target.kind())
        .bind(change.target.element_id())
        .fetch_optional(&mut *conn)
        .await?;
        let previous = match previous {
            Some(row) => {
                let state: i16 = row.try_get("state")?;
                let created: i64 = row.try_get("created_version")?;
                ChangeState::from_i16(state).map(|state| (state, created as u64))
            }
            None => None,
        };
        let created_version = created_version_for(change.state, previous, version);

        sqlx::query(
            "INSERT INTO version_log_entries
                (scope_kind, scope_id, target_kind, element_id, state, version, created_version, last_update)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (scope_kind, scope_id, target_kind, element_id) DO UPDATE
             SET state = EXCLUDED.state,
                 version = EXCLUDED.version,
                 created_version = EXCLUDED.created_version,
                 last_update = EXCLUDED.last_update",
        )
        .bind(scope_kind)
        .bind(scope_id)
        .bind(change.target.kind())
        .bind(change.target.element_id())
        .bind(change.state.as_i16())
        .bind(version as i64)
        .bind(created_version as i64)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        "UPDATE version_logs SET version = $3, last_update = $4
         WHERE scope_kind = $1 AND scope_id = $2",
    )
    .bind(scope_kind)
    .bind(scope_id)
    .bind(version as i64)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    prune_log(conn, scope_kind, scope_id, retention).await?;
    Ok(version)
}

/// 超出保留条数时删除最旧的条目并推进裁剪边界
async fn prune_log(
    conn: &mut PgConnection,
    scope_kind: &str,
    scope_id: &str,
    retention: usize,
) -> AppResult<()> {
    if retention == 0 {
        return Ok(());
    }
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM version_log_entries WHERE scope_kind = $1 AND scope_id = $2",
    )
    .bind(scope_kind)
    .bind(scope_id)
    .fetch_one(&mut *conn)
    .await?;
    let excess = count - retention as i64;
    if excess <= 0 {
        return Ok(());
    }

    let pruned: Option<i64> = sqlx::query_scalar(
        "WITH doomed AS (
             DELETE FROM version_log_entries e
             USING (
                 SELECT target_kind, element_id FROM version_log_entries
                 WHERE scope_kind = $1 AND scope_id = $2
                 ORDER BY version ASC
                 LIMIT $3
             ) d
             WHERE e.scope_kind = $1 AND e.scope_id = $2
               AND e.target_kind = d.target_kind AND e.element_id = d.element_id
             RETURNING e.version
         )
         SELECT MAX(version) FROM doomed",
    )
    .bind(scope_kind)
    .bind(scope_id)
    .bind(excess)
    .fetch_one(&mut *conn)
    .await?;

    if let Some(pruned) = pruned {
        sqlx::query(
            "UPDATE version_logs SET pruned_version = GREATEST(pruned_version, $3)
             WHERE scope_kind = $1 AND scope_id = $2",
        )
        .bind(scope_kind)
        .bind(scope_id)
        .bind(pruned)
        .execute(&mut *conn)
        .await?;
        tracing::debug!("版本日志 {}:{} 裁剪至 {}", scope_kind, scope_id, pruned);
    }
    Ok(())
}

async fn insert_member(conn: &mut PgConnection, member: &GroupMember) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO group_members
            (group_id, user_id, role_level, nickname, face_url, join_time, join_source,
             inviter_user_id, operator_user_id, mute_end_time, ex)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(&member.group_id)
    .bind(&member.user_id)
    .bind(member.role_level.as_i32())
    .bind(&member.nickname)
    .bind(&member.face_url)
    .bind(member.join_time)
    .bind(member.join_source.as_i32())
    .bind(&member.inviter_user_id)
    .bind(&member.operator_user_id)
    .bind(member.mute_end_time)
    .bind(&member.ex)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// 写入成员并记录两类日志
async fn add_members(
    conn: &mut PgConnection,
    members: &[GroupMember],
    retention: usize,
) -> AppResult<()> {
    let mut per_group: BTreeMap<&str, Vec<LogChange>> = BTreeMap::new();
    for member in member_lock_order(members) {
        insert_member(conn, member).await?;
        per_group
            .entry(member.group_id.as_str())
            .or_default()
            .push(LogChange::insert(&member.user_id));
    }
    for (group_id, changes) in per_group {
        append_log(conn, MEMBER_SCOPE, group_id, &changes, retention).await?;
    }
    for member in join_lock_order(members) {
        append_log(
            conn,
            JOIN_SCOPE,
            &member.user_id,
            &[LogChange::insert(&member.group_id)],
            retention,
        )
        .await?;
    }
    Ok(())
}

/// 成员行按 (group_id, user_id) 加锁
fn member_lock_order(members: &[GroupMember]) -> Vec<&GroupMember> {
    let mut ordered: Vec<&GroupMember> = members.iter().collect();
    ordered.sort_by(|a, b| (&a.group_id, &a.user_id).cmp(&(&b.group_id, &b.user_id)));
    ordered
}

/// 已加入群日志头按 (user_id, group_id) 加锁
fn join_lock_order(members: &[GroupMember]) -> Vec<&GroupMember> {
    let mut ordered: Vec<&GroupMember> = members.iter().collect();
    ordered.sort_by(|a, b| (&a.user_id, &a.group_id).cmp(&(&b.user_id, &b.group_id)));
    ordered
}

async fn lock_member_ids(conn: &mut PgConnection, group_id: &str) -> AppResult<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT user_id FROM group_members WHERE group_id = $1 ORDER BY user_id FOR UPDATE",
    )
    .bind(group_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

#[async_trait]
impl GroupStore for PgGroupStore {
    async fn take_group(&self, group_id: &str) -> AppResult<Group> {
        let row: Option<GroupRow> =
            sqlx::query_as(&format!("SELECT {} FROM groups WHERE group_id = $1", GROUP_COLUMNS))
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?
            .try_into()
    }

    async fn find_groups(&self, group_ids: &[String]) -> AppResult<Vec<Group>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<GroupRow> = sqlx::query_as(&format!(
            "SELECT {} FROM groups WHERE group_id = ANY($1) ORDER BY group_id",
            GROUP_COLUMNS
        ))
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn take_group_member(&self, group_id: &str, user_id: &str) -> AppResult<GroupMember> {
        let row: Option<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM group_members WHERE group_id = $1 AND user_id = $2",
            MEMBER_COLUMNS
        ))
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| AppError::not_found(format!("user {} not in group {}", user_id, group_id)))?
            .try_into()
    }

    async fn find_group_members(
        &self,
        group_id: &str,
        user_ids: Option<&[String]>,
    ) -> AppResult<Vec<GroupMember>> {
        let rows: Vec<MemberRow> = match user_ids {
            Some(ids) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM group_members
                     WHERE group_id = $1 AND user_id = ANY($2) ORDER BY user_id",
                    MEMBER_COLUMNS
                ))
                .bind(group_id)
                .bind(ids)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM group_members WHERE group_id = $1 ORDER BY user_id",
                    MEMBER_COLUMNS
                ))
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        convert_all(rows)
    }

    async fn find_group_member_role_levels(
        &self,
        group_id: &str,
        role_levels: &[RoleLevel],
    ) -> AppResult<Vec<GroupMember>> {
        let levels: Vec<i32> = role_levels.iter().map(|level| level.as_i32()).collect();
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM group_members
             WHERE group_id = $1 AND role_level = ANY($2) ORDER BY user_id",
            MEMBER_COLUMNS
        ))
        .bind(group_id)
        .bind(&levels)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn find_member_user_ids(&self, group_id: &str) -> AppResult<Vec<String>> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.member_ids(group_id).await {
                return Ok(cached.user_ids);
            }
        }
        let ids = self.member_ids_with_version(group_id).await?;
        if let Some(cache) = &self.cache {
            cache.fill_member_ids(group_id, &ids).await;
        }
        Ok(ids.user_ids)
    }

    async fn find_joined_group_ids(&self, user_id: &str) -> AppResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT group_id FROM group_members WHERE user_id = $1 ORDER BY group_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn count_group_members(&self, group_id: &str) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = $1")
            .bind(group_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn create_group(&self, group: Option<&Group>, members: &[GroupMember]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        match group {
            Some(group) => {
                sqlx::query(&format!(
                    "INSERT INTO groups ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
                    GROUP_COLUMNS
                ))
                .bind(&group.group_id)
                .bind(&group.name)
                .bind(&group.face_url)
                .bind(&group.introduction)
                .bind(&group.notification)
                .bind(group.notification_update_time)
                .bind(&group.notification_user_id)
                .bind(&group.creator_user_id)
                .bind(group.create_time)
                .bind(group.group_type.as_i32())
                .bind(group.status.as_i32())
                .bind(group.need_verification.as_i32())
                .bind(group.look_member_info)
                .bind(group.apply_member_friend)
                .bind(&group.ex)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                for member in members {
                    let exists: Option<String> = sqlx::query_scalar(
                        "SELECT group_id FROM groups WHERE group_id = $1 FOR SHARE",
                    )
                    .bind(&member.group_id)
                    .fetch_optional(&mut *tx)
                    .await?;
                    if exists.is_none() {
                        return Err(AppError::not_found(format!("group {}", member.group_id)));
                    }
                }
            }
        }

        add_members(&mut tx, members, self.retention).await?;
        tx.commit().await?;

        let user_ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
        let mut group_ids: Vec<&str> = members.iter().map(|m| m.group_id.as_str()).collect();
        group_ids.sort_unstable();
        group_ids.dedup();
        for group_id in group_ids {
            self.refresh_cache(group_id, &user_ids).await;
        }
        Ok(())
    }

    async fn update_group(&self, group_id: &str, update: &GroupUpdate) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let row: Option<GroupRow> = sqlx::query_as(&format!(
            "SELECT {} FROM groups WHERE group_id = $1 FOR UPDATE",
            GROUP_COLUMNS
        ))
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut group: Group = row
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?
            .try_into()?;
        update.apply(&mut group, Utc::now());

        sqlx::query(
            "UPDATE groups SET name = $2, face_url = $3, introduction = $4, notification = $5,
                notification_update_time = $6, notification_user_id = $7, status = $8,
                need_verification = $9, look_member_info = $10, apply_member_friend = $11, ex = $12
             WHERE group_id = $1",
        )
        .bind(&group.group_id)
        .bind(&group.name)
        .bind(&group.face_url)
        .bind(&group.introduction)
        .bind(&group.notification)
        .bind(group.notification_update_time)
        .bind(&group.notification_user_id)
        .bind(group.status.as_i32())
        .bind(group.need_verification.as_i32())
        .bind(group.look_member_info)
        .bind(group.apply_member_friend)
        .bind(&group.ex)
        .execute(&mut *tx)
        .await?;

        let member_ids = lock_member_ids(&mut tx, group_id).await?;
        append_log(&mut tx, MEMBER_SCOPE, group_id, &[LogChange::group_metadata()], self.retention)
            .await?;
        for user_id in &member_ids {
            append_log(&mut tx, JOIN_SCOPE, user_id, &[LogChange::update(group_id)], self.retention)
                .await?;
        }
        tx.commit().await?;

        self.refresh_cache(group_id, &member_ids).await;
        Ok(())
    }

    async fn dismiss_group(&self, group_id: &str) -> AppResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE groups SET status = $2 WHERE group_id = $1")
            .bind(group_id)
            .bind(GroupStatus::Dismissed.as_i32())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::not_found(format!("group {}", group_id)));
        }

        let mut removed: Vec<String> = sqlx::query_scalar(
            "DELETE FROM group_members WHERE group_id = $1 RETURNING user_id",
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await?;
        removed.sort();

        let mut changes = vec![LogChange::group_metadata()];
        changes.extend(removed.iter().map(|user_id| LogChange::delete(user_id)));
        append_log(&mut tx, MEMBER_SCOPE, group_id, &changes, self.retention).await?;
        for user_id in &removed {
            append_log(&mut tx, JOIN_SCOPE, user_id, &[LogChange::delete(group_id)], self.retention)
                .await?;
        }
        tx.commit().await?;

        self.refresh_cache(group_id, &removed).await;
        Ok(removed)
    }

    async fn delete_group_members(&self, group_id: &str, user_ids: &[String]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut removed: Vec<String> = sqlx::query_scalar(
            "DELETE FROM group_members WHERE group_id = $1 AND user_id = ANY($2) RETURNING user_id",
        )
        .bind(group_id)
        .bind(user_ids)
        .fetch_all(&mut *tx)
        .await?;
        if removed.is_empty() {
            return Ok(());
        }
        removed.sort();

        let changes: Vec<LogChange> = removed.iter().map(|id| LogChange::delete(id)).collect();
        append_log(&mut tx, MEMBER_SCOPE, group_id, &changes, self.retention).await?;
        for user_id in &removed {
            append_log(&mut tx, JOIN_SCOPE, user_id, &[LogChange::delete(group_id)], self.retention)
                .await?;
        }
        tx.commit().await?;

        self.refresh_cache(group_id, &removed).await;
        Ok(())
    }

    async fn update_group_members(&self, updates: &[MemberUpdate]) -> AppResult<()> {
        let mut ordered: Vec<&MemberUpdate> = updates.iter().collect();
        ordered.sort_by(|a, b| (&a.group_id, &a.user_id).cmp(&(&b.group_id, &b.user_id)));

        let mut tx = self.pool.begin().await?;
        let mut per_group: BTreeMap<&str, Vec<LogChange>> = BTreeMap::new();

        for update in ordered {
            let row: Option<MemberRow> = sqlx::query_as(&format!(
                "SELECT {} FROM group_members WHERE group_id = $1 AND user_id = $2 FOR UPDATE",
                MEMBER_COLUMNS
            ))
            .bind(&update.group_id)
            .bind(&update.user_id)
            .fetch_optional(&mut *tx)
            .await?;
            let mut member: GroupMember = row
                .ok_or_else(|| {
                    AppError::not_found(format!(
                        "user {} not in group {}",
                        update.user_id, update.group_id
                    ))
                })?
                .try_into()?;
            update.apply(&mut member);

            sqlx::query(
                "UPDATE group_members SET role_level = $3, nickname = $4, face_url = $5,
                    mute_end_time = $6, ex = $7
                 WHERE group_id = $1 AND user_id = $2",
            )
            .bind(&member.group_id)
            .bind(&member.user_id)
            .bind(member.role_level.as_i32())
            .bind(&member.nickname)
            .bind(&member.face_url)
            .bind(member.mute_end_time)
            .bind(&member.ex)
            .execute(&mut *tx)
            .await?;

            let changes = per_group.entry(update.group_id.as_str()).or_default();
            changes.push(LogChange::update(&update.user_id));
            if update.role_level.is_some() {
                changes.push(LogChange::sort_order());
            }
        }

        for (group_id, changes) in &per_group {
            append_log(&mut tx, MEMBER_SCOPE, group_id, changes, self.retention).await?;
        }
        tx.commit().await?;

        for group_id in per_group.keys() {
            self.refresh_cache(group_id, &[]).await;
        }
        Ok(())
    }

    async fn transfer_group_owner(
        &self,
        group_id: &str,
        old_owner_user_id: &str,
        new_owner_user_id: &str,
        old_owner_role: RoleLevel,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        // 先降级旧群主，群主唯一索引逐条检查
        for (user_id, role) in [
            (old_owner_user_id, old_owner_role),
            (new_owner_user_id, RoleLevel::Owner),
        ] {
            let updated = sqlx::query(
                "UPDATE group_members SET role_level = $3 WHERE group_id = $1 AND user_id = $2",
            )
            .bind(group_id)
            .bind(user_id)
            .bind(role.as_i32())
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(AppError::not_found(format!(
                    "user {} not in group {}",
                    user_id, group_id
                )));
            }
        }
        append_log(
            &mut tx,
            MEMBER_SCOPE,
            group_id,
            &[
                LogChange::update(old_owner_user_id),
                LogChange::update(new_owner_user_id),
                LogChange::sort_order(),
            ],
            self.retention,
        )
        .await?;
        tx.commit().await?;

        self.refresh_cache(group_id, &[]).await;
        Ok(())
    }

    async fn create_group_requests(&self, requests: &[GroupRequest]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for request in requests {
            sqlx::query(&format!(
                "INSERT INTO group_requests ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (group_id, user_id) DO UPDATE
                 SET req_msg = EXCLUDED.req_msg, req_time = EXCLUDED.req_time,
                     join_source = EXCLUDED.join_source, inviter_user_id = EXCLUDED.inviter_user_id,
                     handle_result = EXCLUDED.handle_result, handled_msg = EXCLUDED.handled_msg,
                     handle_user_id = EXCLUDED.handle_user_id, handled_time = EXCLUDED.handled_time,
                     ex = EXCLUDED.ex",
                REQUEST_COLUMNS
            ))
            .bind(&request.group_id)
            .bind(&request.user_id)
            .bind(&request.req_msg)
            .bind(request.req_time)
            .bind(request.join_source.as_i32())
            .bind(&request.inviter_user_id)
            .bind(request.handle_result.as_i32())
            .bind(&request.handled_msg)
            .bind(&request.handle_user_id)
            .bind(request.handled_time)
            .bind(&request.ex)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn take_group_request(&self, group_id: &str, user_id: &str) -> AppResult<GroupRequest> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM group_requests WHERE group_id = $1 AND user_id = $2",
            REQUEST_COLUMNS
        ))
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| {
            AppError::not_found(format!("request of {} to group {}", user_id, group_id))
        })?
        .try_into()
    }

    async fn find_group_requests(&self, group_id: &str) -> AppResult<Vec<GroupRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM group_requests WHERE group_id = $1 ORDER BY req_time DESC",
            REQUEST_COLUMNS
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn handle_group_request(&self, decision: &RequestDecision) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE group_requests
             SET handle_result = $3, handled_msg = $4, handle_user_id = $5, handled_time = $6
             WHERE group_id = $1 AND user_id = $2 AND handle_result = 0",
        )
        .bind(&decision.group_id)
        .bind(&decision.user_id)
        .bind(decision.handle_result.as_i32())
        .bind(&decision.handled_msg)
        .bind(&decision.handle_user_id)
        .bind(decision.handled_time)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: Option<i32> = sqlx::query_scalar(
                "SELECT handle_result FROM group_requests WHERE group_id = $1 AND user_id = $2",
            )
            .bind(&decision.group_id)
            .bind(&decision.user_id)
            .fetch_optional(&mut *tx)
            .await?;
            return Err(match exists {
                Some(_) => AppError::args("group request already processed"),
                None => AppError::not_found(format!(
                    "request of {} to group {}",
                    decision.user_id, decision.group_id
                )),
            });
        }

        if let Some(member) = &decision.member {
            add_members(&mut tx, std::slice::from_ref(member), self.retention).await?;
        }
        tx.commit().await?;

        if decision.member.is_some() {
            self.refresh_cache(&decision.group_id, std::slice::from_ref(&decision.user_id))
                .await;
        }
        Ok(())
    }

    async fn find_member_incr_version(
        &self,
        group_id: &str,
        version: u64,
        limit: usize,
    ) -> AppResult<VersionLog> {
        self.read_log(MEMBER_SCOPE, group_id, version, limit).await
    }

    async fn find_join_incr_version(
        &self,
        user_id: &str,
        version: u64,
        limit: usize,
    ) -> AppResult<VersionLog> {
        self.read_log(JOIN_SCOPE, user_id, version, limit).await
    }

    async fn find_max_member_version(&self, group_id: &str) -> AppResult<VersionHeader> {
        if let Some(cache) = &self.cache {
            if let Some(header) = cache.member_version(group_id).await {
                return Ok(header);
            }
        }
        let header = self.max_version(MEMBER_SCOPE, group_id).await?;
        if let Some(cache) = &self.cache {
            cache.fill_member_version(group_id, &header).await;
        }
        Ok(header)
    }

    async fn find_max_join_version(&self, user_id: &str) -> AppResult<VersionHeader> {
        if let Some(cache) = &self.cache {
            if let Some(header) = cache.join_version(user_id).await {
                return Ok(header);
            }
        }
        let header = self.max_version(JOIN_SCOPE, user_id).await?;
        if let Some(cache) = &self.cache {
            cache.fill_join_version(user_id, &header).await;
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(pairs: &[(&str, &str)]) -> Vec<GroupMember> {
        pairs
            .iter()
            .map(|(group_id, user_id)| GroupMember::new(group_id, user_id, RoleLevel::Ordinary, "op"))
            .collect()
    }

    fn keys(ordered: Vec<&GroupMember>) -> Vec<(String, String)> {
        ordered
            .into_iter()
            .map(|m| (m.group_id.clone(), m.user_id.clone()))
            .collect()
    }

    #[test]
    fn concurrent_creates_lock_in_the_same_order() {
        let first = members(&[("g1", "x"), ("g1", "y")]);
        let second = members(&[("g2", "y"), ("g2", "x")]);

        let first_users: Vec<String> = join_lock_order(&first).iter().map(|m| m.user_id.clone()).collect();
        let second_users: Vec<String> = join_lock_order(&second).iter().map(|m| m.user_id.clone()).collect();
        assert_eq!(first_users, vec!["x", "y"]);
        assert_eq!(first_users, second_users);
    }

    #[test]
    fn member_rows_sorted_by_group_then_user() {
        let input = members(&[("g2", "a"), ("g1", "b"), ("g1", "a")]);
        assert_eq!(
            keys(member_lock_order(&input)),
            vec![
                ("g1".to_string(), "a".to_string()),
                ("g1".to_string(), "b".to_string()),
                ("g2".to_string(), "a".to_string()),
            ]
        );
        assert_eq!(
            keys(join_lock_order(&input)),
            vec![
                ("g1".to_string(), "a".to_string()),
                ("g2".to_string(), "a".to_string()),
                ("g1".to_string(), "b".to_string()),
            ]
        );
    }
}
