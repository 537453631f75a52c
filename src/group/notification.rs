// 群通知
// 写操作提交后把事件放入有界队列，由固定数量的 worker 取出、补齐展示字段并逐个接收方投递。
// 投递失败只记录日志，不影响已经提交的操作。

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

use super::model::RoleLevel;
use super::types::{GroupInfo, MemberInfo};
use super::view;
use crate::clients::{Messenger, Notification, Recipient, UserProfile, UserProfileProvider};
use crate::context::RequestContext;
use crate::database::GroupStore;
use crate::error::AppResult;
use crate::utils::distinct;

/// 提示消息类型，沿用平台编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    GroupCreated,
    GroupInfoSet,
    JoinGroupApplication,
    MemberQuit,
    ApplicationAccepted,
    ApplicationRejected,
    OwnerTransferred,
    MemberKicked,
    MemberInvited,
    MemberEnter,
    GroupDismissed,
    MemberMuted,
    MemberCancelMuted,
    GroupMuted,
    GroupCancelMuted,
    MemberInfoSet,
    SetToAdmin,
    SetToOrdinary,
    InfoSetAnnouncement,
    InfoSetName,
}

impl NotificationKind {
    pub fn code(self) -> i32 {
        match self {
            NotificationKind::GroupCreated => 1501,
            NotificationKind::GroupInfoSet => 1502,
            NotificationKind::JoinGroupApplication => 1503,
            NotificationKind::MemberQuit => 1504,
            NotificationKind::ApplicationAccepted => 1505,
            NotificationKind::ApplicationRejected => 1506,
            NotificationKind::OwnerTransferred => 1507,
            NotificationKind::MemberKicked => 1508,
            NotificationKind::MemberInvited => 1509,
            NotificationKind::MemberEnter => 1510,
            NotificationKind::GroupDismissed => 1511,
            NotificationKind::MemberMuted => 1512,
            NotificationKind::MemberCancelMuted => 1513,
            NotificationKind::GroupMuted => 1514,
            NotificationKind::GroupCancelMuted => 1515,
            NotificationKind::MemberInfoSet => 1516,
            NotificationKind::SetToAdmin => 1517,
            NotificationKind::SetToOrdinary => 1518,
            NotificationKind::InfoSetAnnouncement => 1519,
            NotificationKind::InfoSetName => 1520,
        }
    }
}

/// 接收方集合
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    /// 群会话，全部当前成员
    Group,
    /// 明确的用户列表
    Users(Vec<String>),
    /// 群主与管理员，加上额外的用户
    Managers(Vec<String>),
}

/// 已提交的事实，worker 据此组装提示
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub group_id: String,
    pub op_user_id: String,
    pub operation_id: String,
    pub audience: Audience,
    /// 提示中涉及的成员
    pub subjects: Vec<String>,
    /// 已被移除、无法再从存储读取的成员
    pub removed: Vec<MemberInfo>,
    /// 群已解散等情况下使用的群快照
    pub group: Option<GroupInfo>,
    /// 入群申请人，申请处理结果按其区分接收身份
    pub applicant: Option<String>,
    pub detail: serde_json::Value,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, ctx: &RequestContext, group_id: &str, audience: Audience) -> Self {
        Self {
            kind,
            group_id: group_id.to_string(),
            op_user_id: ctx.op_user_id.clone(),
            operation_id: ctx.operation_id.clone(),
            audience,
            subjects: Vec::new(),
            removed: Vec::new(),
            group: None,
            applicant: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn subjects(mut self, user_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.subjects = user_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn removed(mut self, members: Vec<MemberInfo>) -> Self {
        self.removed = members;
        self
    }

    pub fn group(mut self, group: GroupInfo) -> Self {
        self.group = Some(group);
        self
    }

    pub fn applicant(mut self, user_id: &str) -> Self {
        self.applicant = Some(user_id.to_string());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// 申请人收到的是“你的申请已处理”
const APPLICANT_RECEIVER: i32 = 0;
/// 管理者收到的是“某人的申请已处理”
const ADMIN_RECEIVER: i32 = 1;

#[derive(Debug, Clone, Serialize)]
struct Tips<'a> {
    group: &'a GroupInfo,
    op_user: Option<&'a MemberInfo>,
    members: &'a [MemberInfo],
    #[serde(skip_serializing_if = "Option::is_none")]
    applicant: Option<&'a UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    receiver_as: Option<i32>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    detail: &'a serde_json::Value,
    group_member_version: u64,
    group_member_version_id: &'a str,
    operation_time: i64,
}

/// 组装并投递单个事件
pub struct Dispatcher {
    store: Arc<dyn GroupStore>,
    users: Arc<dyn UserProfileProvider>,
    messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn GroupStore>,
        users: Arc<dyn UserProfileProvider>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            store,
            users,
            messenger,
        }
    }

    pub async fn dispatch(&self, event: NotificationEvent) -> AppResult<()> {
        let group = match &event.group {
            Some(group) => group.clone(),
            None => {
                let group = self.store.take_group(&event.group_id).await?;
                view::group_info(self.store.as_ref(), &group).await?
            }
        };

        let referenced = distinct(
            std::iter::once(event.op_user_id.clone()).chain(event.subjects.iter().cloned()),
        );
        let mut members: Vec<MemberInfo> = self
            .store
            .find_group_members(&event.group_id, Some(&referenced))
            .await?
            .iter()
            .map(MemberInfo::from)
            .collect();
        for removed in &event.removed {
            if !members.iter().any(|m| m.user_id == removed.user_id) {
                members.push(removed.clone());
            }
        }

        // 一次批量查询补齐所有涉及的用户
        let mut profile_ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
        profile_ids.push(event.op_user_id.clone());
        if let Some(applicant) = &event.applicant {
            profile_ids.push(applicant.clone());
        }
        let profiles = self
            .users
            .get_users_info_map(&distinct(profile_ids))
            .await?;
        view::fill_members(&mut members, &profiles);

        let op_user = match members.iter().position(|m| m.user_id == event.op_user_id) {
            Some(index) => members.remove(index),
            None => operator_outside_group(&event, profiles.get(&event.op_user_id)),
        };
        let applicant = event.applicant.as_ref().and_then(|id| profiles.get(id));
        let header = self.store.find_max_member_version(&event.group_id).await?;

        let recipients = self.resolve_audience(&event).await?;
        let operation_time = chrono::Utc::now().timestamp_millis();

        for recipient in recipients {
            let receiver_as = event.applicant.as_ref().map(|applicant| match &recipient {
                Recipient::User(user_id) if user_id == applicant => APPLICANT_RECEIVER,
                _ => ADMIN_RECEIVER,
            });
            let tips = Tips {
                group: &group,
                op_user: Some(&op_user),
                members: &members,
                applicant,
                receiver_as,
                detail: &event.detail,
                group_member_version: header.version,
                group_member_version_id: &header.version_id,
                operation_time,
            };
            let notification = Notification {
                send_id: event.op_user_id.clone(),
                recipient: recipient.clone(),
                content_type: event.kind.code(),
                content: serde_json::to_value(&tips)?,
                operation_id: event.operation_id.clone(),
            };
            if let Err(e) = self.messenger.send_notification(&notification).await {
                tracing::error!(
                    operation_id = %event.operation_id,
                    "notification {} to {:?} failed: {}",
                    event.kind.code(),
                    recipient,
                    e
                );
            }
        }
        Ok(())
    }

    async fn resolve_audience(&self, event: &NotificationEvent) -> AppResult<Vec<Recipient>> {
        let user_ids = match &event.audience {
            Audience::Group => return Ok(vec![Recipient::Group(event.group_id.clone())]),
            Audience::Users(user_ids) => distinct(user_ids.iter().cloned()),
            Audience::Managers(extra) => {
                let managers = self
                    .store
                    .find_group_member_role_levels(
                        &event.group_id,
                        &[RoleLevel::Owner, RoleLevel::Admin],
                    )
                    .await?;
                distinct(
                    managers
                        .into_iter()
                        .map(|member| member.user_id)
                        .chain(extra.iter().cloned()),
                )
            }
        };
        Ok(user_ids
            .into_iter()
            .filter(|user_id| !user_id.is_empty())
            .map(Recipient::User)
            .collect())
    }
}

/// 平台管理员等非成员操作人，用用户资料构造
fn operator_outside_group(event: &NotificationEvent, profile: Option<&UserProfile>) -> MemberInfo {
    MemberInfo {
        group_id: event.group_id.clone(),
        user_id: event.op_user_id.clone(),
        role_level: RoleLevel::Ordinary,
        nickname: profile.map(|p| p.nickname.clone()).unwrap_or_default(),
        face_url: profile.map(|p| p.face_url.clone()).unwrap_or_default(),
        join_time: 0,
        join_source: super::model::JoinSource::Direct,
        inviter_user_id: String::new(),
        operator_user_id: String::new(),
        mute_end_time: 0,
        ex: String::new(),
        app_manager_level: profile.map_or(0, |p| p.app_manager_level),
    }
}

/// 通知 worker 池
///
/// notify 从不阻塞调用方；队列满时丢弃事件并记录错误。shutdown 关闭队列并等待 worker 处理完剩余事件。
pub struct NotificationSender {
    tx: Mutex<Option<mpsc::Sender<NotificationEvent>>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl NotificationSender {
    pub fn start(capacity: usize, workers: usize, dispatcher: Arc<Dispatcher>) -> Self {
        let (tx, rx) = mpsc::channel::<NotificationEvent>(capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|index| {
                let rx = Arc::clone(&rx);
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    loop {
                        let event = rx.lock().await.recv().await;
                        let Some(event) = event else {
                            break;
                        };
                        let kind = event.kind;
                        let group_id = event.group_id.clone();
                        if let Err(e) = dispatcher.dispatch(event).await {
                            tracing::error!(
                                "通知发送失败 worker={} kind={} group={}: {}",
                                index,
                                kind.code(),
                                group_id,
                                e
                            );
                        }
                    }
                    tracing::debug!("notification worker {} stopped", index);
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            workers: AsyncMutex::new(handles),
        }
    }

    pub fn notify(&self, event: NotificationEvent) {
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            tracing::warn!("notification queue closed, dropping {}", event.kind.code());
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::error!(
                    "通知队列已满，丢弃 kind={} group={}",
                    event.kind.code(),
                    event.group_id
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::error!(
                    "通知 worker 已退出，丢弃 kind={} group={}",
                    event.kind.code(),
                    event.group_id
                );
            }
        }
    }

    /// 关闭队列并等待已入队的事件处理完毕
    pub async fn shutdown(&self) {
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(tx);

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("notification worker panicked: {}", e);
            }
        }
        tracing::info!("notification workers drained");
    }
}

/// 按修改内容选择群资料通知类型
pub fn group_info_kind(name_changed: bool, announcement_changed: bool, changed_fields: usize) -> NotificationKind {
    match (name_changed, announcement_changed, changed_fields) {
        (true, false, 1) => NotificationKind::InfoSetName,
        (false, true, 1) => NotificationKind::InfoSetAnnouncement,
        _ => NotificationKind::GroupInfoSet,
    }
}

/// 按角色变化选择成员资料通知类型
pub fn member_info_kind(role_level: Option<RoleLevel>) -> NotificationKind {
    match role_level {
        Some(RoleLevel::Admin) => NotificationKind::SetToAdmin,
        Some(RoleLevel::Ordinary) => NotificationKind::SetToOrdinary,
        _ => NotificationKind::MemberInfoSet,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_after_workers_exit_drops_event() {
        let (tx, rx) = mpsc::channel::<NotificationEvent>(1);
        drop(rx);
        let sender = NotificationSender {
            tx: Mutex::new(Some(tx)),
            workers: AsyncMutex::new(Vec::new()),
        };
        let ctx = RequestContext::new("a", false);
        sender.notify(NotificationEvent::new(NotificationKind::GroupMuted, &ctx, "g1", Audience::Group));
        assert!(sender.tx.lock().unwrap().as_ref().is_some_and(|tx| tx.is_closed()));
        sender.shutdown().await;
        assert!(sender.tx.lock().unwrap().is_none());
    }

    #[test]
    fn codes_follow_platform_numbering() {
        assert_eq!(NotificationKind::GroupCreated.code(), 1501);
        assert_eq!(NotificationKind::MemberKicked.code(), 1508);
        assert_eq!(NotificationKind::InfoSetName.code(), 1520);
    }

    #[test]
    fn info_kind_selection() {
        assert_eq!(group_info_kind(true, false, 1), NotificationKind::InfoSetName);
        assert_eq!(group_info_kind(false, true, 1), NotificationKind::InfoSetAnnouncement);
        assert_eq!(group_info_kind(true, true, 2), NotificationKind::GroupInfoSet);
        assert_eq!(member_info_kind(Some(RoleLevel::Admin)), NotificationKind::SetToAdmin);
        assert_eq!(member_info_kind(None), NotificationKind::MemberInfoSet);
    }
}
