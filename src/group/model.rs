// 群组领域模型
// 群组、群成员、入群申请以及各自的更新描述

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! int_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "i32", try_from = "i32")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_i32(self) -> i32 {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value.as_i32()
            }
        }

        impl TryFrom<i32> for $name {
            type Error = String;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(format!("invalid {} value {}", stringify!($name), other)),
                }
            }
        }
    };
}

int_enum! {
    /// 群内角色，按权限从低到高声明，派生的 Ord 即权限高低
    #[derive(PartialOrd, Ord)]
    RoleLevel {
        Ordinary = 20,
        Admin = 60,
        Owner = 100,
    }
}

int_enum! {
    /// 群状态
    GroupStatus {
        Normal = 0,
        Dismissed = 2,
        Muted = 3,
    }
}

int_enum! {
    /// 群类型
    GroupType {
        Normal = 0,
        Super = 1,
        Working = 2,
    }
}

int_enum! {
    /// 入群验证方式
    NeedVerification {
        ApplyNeedsApproval = 0,
        AllNeedApproval = 1,
        Directly = 2,
    }
}

int_enum! {
    /// 入群来源
    JoinSource {
        Direct = 1,
        Invitation = 2,
        Search = 3,
        QrCode = 4,
    }
}

int_enum! {
    /// 入群申请处理结果
    HandleResult {
        Refused = -1,
        Pending = 0,
        Agreed = 1,
    }
}

impl RoleLevel {
    /// 群主或管理员
    pub fn is_manager(self) -> bool {
        matches!(self, RoleLevel::Owner | RoleLevel::Admin)
    }
}

/// 群组，群主不是字段，由 role_level = Owner 的成员推导
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub face_url: String,
    pub introduction: String,
    /// 群公告
    pub notification: String,
    pub notification_update_time: DateTime<Utc>,
    pub notification_user_id: String,
    pub creator_user_id: String,
    pub create_time: DateTime<Utc>,
    pub group_type: GroupType,
    pub status: GroupStatus,
    pub need_verification: NeedVerification,
    pub look_member_info: i32,
    pub apply_member_friend: i32,
    pub ex: String,
}

impl Group {
    pub fn is_dismissed(&self) -> bool {
        self.status == GroupStatus::Dismissed
    }
}

/// 群成员，(group_id, user_id) 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    pub role_level: RoleLevel,
    pub nickname: String,
    pub face_url: String,
    pub join_time: DateTime<Utc>,
    pub join_source: JoinSource,
    pub inviter_user_id: String,
    pub operator_user_id: String,
    /// 禁言截止时间，不晚于当前时间即未禁言
    pub mute_end_time: DateTime<Utc>,
    pub ex: String,
}

impl GroupMember {
    pub fn new(group_id: &str, user_id: &str, role_level: RoleLevel, operator: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            role_level,
            nickname: String::new(),
            face_url: String::new(),
            join_time: Utc::now(),
            join_source: JoinSource::Invitation,
            inviter_user_id: operator.to_string(),
            operator_user_id: operator.to_string(),
            mute_end_time: DateTime::<Utc>::UNIX_EPOCH,
            ex: String::new(),
        }
    }

    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.mute_end_time > now
    }
}

/// 入群申请，(group_id, user_id) 至多一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub group_id: String,
    pub user_id: String,
    pub req_msg: String,
    pub req_time: DateTime<Utc>,
    pub join_source: JoinSource,
    pub inviter_user_id: String,
    pub handle_result: HandleResult,
    pub handled_msg: String,
    pub handle_user_id: String,
    pub handled_time: DateTime<Utc>,
    pub ex: String,
}

impl GroupRequest {
    pub fn pending(group_id: &str, user_id: &str, join_source: JoinSource, inviter: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            req_msg: String::new(),
            req_time: Utc::now(),
            join_source,
            inviter_user_id: inviter.to_string(),
            handle_result: HandleResult::Pending,
            handled_msg: String::new(),
            handle_user_id: String::new(),
            handled_time: DateTime::<Utc>::UNIX_EPOCH,
            ex: String::new(),
        }
    }
}

/// 群资料的部分更新，None 表示不修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub face_url: Option<String>,
    pub introduction: Option<String>,
    /// 修改公告时同时记录修改人
    pub notification: Option<(String, String)>,
    pub need_verification: Option<NeedVerification>,
    pub look_member_info: Option<i32>,
    pub apply_member_friend: Option<i32>,
    pub status: Option<GroupStatus>,
    pub ex: Option<String>,
}

impl GroupUpdate {
    pub fn status(status: GroupStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == GroupUpdate::default()
    }

    /// 修改的字段数量，用于选择通知类型
    pub fn changed_fields(&self) -> usize {
        [
            self.name.is_some(),
            self.face_url.is_some(),
            self.introduction.is_some(),
            self.notification.is_some(),
            self.need_verification.is_some(),
            self.look_member_info.is_some(),
            self.apply_member_friend.is_some(),
            self.status.is_some(),
            self.ex.is_some(),
        ]
        .iter()
        .filter(|changed| **changed)
        .count()
    }

    pub fn apply(&self, group: &mut Group, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            group.name = name.clone();
        }
        if let Some(face_url) = &self.face_url {
            group.face_url = face_url.clone();
        }
        if let Some(introduction) = &self.introduction {
            group.introduction = introduction.clone();
        }
        if let Some((notification, user_id)) = &self.notification {
            group.notification = notification.clone();
            group.notification_user_id = user_id.clone();
            group.notification_update_time = now;
        }
        if let Some(need_verification) = self.need_verification {
            group.need_verification = need_verification;
        }
        if let Some(look_member_info) = self.look_member_info {
            group.look_member_info = look_member_info;
        }
        if let Some(apply_member_friend) = self.apply_member_friend {
            group.apply_member_friend = apply_member_friend;
        }
        if let Some(status) = self.status {
            group.status = status;
        }
        if let Some(ex) = &self.ex {
            group.ex = ex.clone();
        }
    }
}

/// 群成员资料的部分更新
#[derive(Debug, Clone, PartialEq)]
pub struct MemberUpdate {
    pub group_id: String,
    pub user_id: String,
    pub nickname: Option<String>,
    pub face_url: Option<String>,
    pub role_level: Option<RoleLevel>,
    pub mute_end_time: Option<DateTime<Utc>>,
    pub ex: Option<String>,
}

impl MemberUpdate {
    pub fn new(group_id: &str, user_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            nickname: None,
            face_url: None,
            role_level: None,
            mute_end_time: None,
            ex: None,
        }
    }

    pub fn mute_until(group_id: &str, user_id: &str, end: DateTime<Utc>) -> Self {
        Self {
            mute_end_time: Some(end),
            ..Self::new(group_id, user_id)
        }
    }

    pub fn apply(&self, member: &mut GroupMember) {
        if let Some(nickname) = &self.nickname {
            member.nickname = nickname.clone();
        }
        if let Some(face_url) = &self.face_url {
            member.face_url = face_url.clone();
        }
        if let Some(role_level) = self.role_level {
            member.role_level = role_level;
        }
        if let Some(mute_end_time) = self.mute_end_time {
            member.mute_end_time = mute_end_time;
        }
        if let Some(ex) = &self.ex {
            member.ex = ex.clone();
        }
    }
}
