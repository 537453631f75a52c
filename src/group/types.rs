// 群组 RPC 的请求与响应结构

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::model::{
    Group, GroupMember, GroupRequest, GroupStatus, GroupType, HandleResult, JoinSource,
    NeedVerification, RoleLevel,
};

/// 对外的群信息视图，附带派生的群主与成员数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub name: String,
    pub face_url: String,
    pub introduction: String,
    pub notification: String,
    pub notification_update_time: i64,
    pub notification_user_id: String,
    pub creator_user_id: String,
    pub create_time: i64,
    pub group_type: GroupType,
    pub status: GroupStatus,
    pub need_verification: NeedVerification,
    pub look_member_info: i32,
    pub apply_member_friend: i32,
    pub ex: String,
    pub owner_user_id: String,
    pub member_count: u64,
}

impl GroupInfo {
    pub fn new(group: &Group, owner_user_id: String, member_count: u64) -> Self {
        Self {
            group_id: group.group_id.clone(),
            name: group.name.clone(),
            face_url: group.face_url.clone(),
            introduction: group.introduction.clone(),
            notification: group.notification.clone(),
            notification_update_time: group.notification_update_time.timestamp_millis(),
            notification_user_id: group.notification_user_id.clone(),
            creator_user_id: group.creator_user_id.clone(),
            create_time: group.create_time.timestamp_millis(),
            group_type: group.group_type,
            status: group.status,
            need_verification: group.need_verification,
            look_member_info: group.look_member_info,
            apply_member_friend: group.apply_member_friend,
            ex: group.ex.clone(),
            owner_user_id,
            member_count,
        }
    }
}

/// 成员视图，昵称与头像为空时已用用户资料补齐
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub group_id: String,
    pub user_id: String,
    pub role_level: RoleLevel,
    pub nickname: String,
    pub face_url: String,
    pub join_time: i64,
    pub join_source: JoinSource,
    pub inviter_user_id: String,
    pub operator_user_id: String,
    pub mute_end_time: i64,
    pub ex: String,
    /// 平台管理员等级，不属于成员列表的逻辑内容
    pub app_manager_level: i32,
}

impl From<&GroupMember> for MemberInfo {
    fn from(member: &GroupMember) -> Self {
        Self {
            group_id: member.group_id.clone(),
            user_id: member.user_id.clone(),
            role_level: member.role_level,
            nickname: member.nickname.clone(),
            face_url: member.face_url.clone(),
            join_time: member.join_time.timestamp_millis(),
            join_source: member.join_source,
            inviter_user_id: member.inviter_user_id.clone(),
            operator_user_id: member.operator_user_id.clone(),
            mute_end_time: member.mute_end_time.timestamp_millis(),
            ex: member.ex.clone(),
            app_manager_level: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRequestInfo {
    pub group_id: String,
    pub user_id: String,
    pub nickname: String,
    pub face_url: String,
    pub req_msg: String,
    pub req_time: i64,
    pub join_source: JoinSource,
    pub inviter_user_id: String,
    pub handle_result: HandleResult,
    pub handled_msg: String,
    pub handle_user_id: String,
    pub handled_time: i64,
    pub ex: String,
}

impl From<&GroupRequest> for GroupRequestInfo {
    fn from(request: &GroupRequest) -> Self {
        Self {
            group_id: request.group_id.clone(),
            user_id: request.user_id.clone(),
            nickname: String::new(),
            face_url: String::new(),
            req_msg: request.req_msg.clone(),
            req_time: request.req_time.timestamp_millis(),
            join_source: request.join_source,
            inviter_user_id: request.inviter_user_id.clone(),
            handle_result: request.handle_result,
            handled_msg: request.handled_msg.clone(),
            handle_user_id: request.handle_user_id.clone(),
            handled_time: request.handled_time.timestamp_millis(),
            ex: request.ex.clone(),
        }
    }
}

// ---------- 写操作 ----------

/// 建群时的群资料
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupInfoInput {
    /// 为空时由服务端生成
    pub group_id: String,
    pub name: String,
    pub face_url: String,
    pub introduction: String,
    pub notification: String,
    pub group_type: Option<GroupType>,
    pub need_verification: Option<NeedVerification>,
    pub look_member_info: i32,
    pub apply_member_friend: i32,
    pub ex: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateGroupReq {
    pub owner_user_id: String,
    pub admin_user_ids: Vec<String>,
    pub member_user_ids: Vec<String>,
    pub group_info: GroupInfoInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupResp {
    pub group_info: GroupInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteUserToGroupReq {
    pub group_id: String,
    pub invited_user_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGroupReq {
    pub group_id: String,
    #[serde(default)]
    pub req_message: String,
    #[serde(default = "default_join_source")]
    pub join_source: JoinSource,
    #[serde(default)]
    pub inviter_user_id: String,
    #[serde(default)]
    pub ex: String,
}

fn default_join_source() -> JoinSource {
    JoinSource::Search
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupApplicationResponseReq {
    pub group_id: String,
    pub from_user_id: String,
    #[serde(default)]
    pub handled_msg: String,
    pub handle_result: HandleResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KickGroupMemberReq {
    pub group_id: String,
    pub kicked_user_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuitGroupReq {
    pub group_id: String,
    /// 为空表示操作人自己退群
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferGroupOwnerReq {
    pub group_id: String,
    pub old_owner_user_id: String,
    pub new_owner_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupIdReq {
    pub group_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteGroupMemberReq {
    pub group_id: String,
    pub user_id: String,
    pub muted_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelMuteGroupMemberReq {
    pub group_id: String,
    pub user_id: String,
}

/// 群资料修改，None 字段保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetGroupInfoReq {
    pub group_id: String,
    pub name: Option<String>,
    pub face_url: Option<String>,
    pub introduction: Option<String>,
    pub notification: Option<String>,
    pub need_verification: Option<NeedVerification>,
    pub look_member_info: Option<i32>,
    pub apply_member_friend: Option<i32>,
    pub ex: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberInfoPatch {
    pub group_id: String,
    pub user_id: String,
    pub nickname: Option<String>,
    pub face_url: Option<String>,
    pub role_level: Option<RoleLevel>,
    pub ex: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetGroupMemberInfoReq {
    pub members: Vec<MemberInfoPatch>,
}

// ---------- 同步与查询 ----------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetFullGroupMemberUserIdsReq {
    pub group_id: String,
    pub id_hash: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetFullJoinGroupIdsReq {
    pub user_id: String,
    pub id_hash: u64,
}

/// 指纹对比结果，equal 时不携带ID列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullIdsResp {
    pub id_hash: u64,
    pub version_id: String,
    pub version: u64,
    pub equal: bool,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetIncrementalGroupMemberReq {
    pub group_id: String,
    pub version_id: String,
    pub version: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetIncrementalJoinGroupReq {
    pub user_id: String,
    pub version_id: String,
    pub version: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchGetIncrementalGroupMemberReq {
    pub req_list: Vec<GetIncrementalGroupMemberReq>,
}

/// 增量同步响应
///
/// full 时 insert 为完整快照，delete 与 update 为空；
/// 客户端按 delete、insert、update 的顺序应用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalResp<T> {
    pub version_id: String,
    pub version: u64,
    pub full: bool,
    pub delete: Vec<String>,
    pub insert: Vec<T>,
    pub update: Vec<T>,
    /// 群资料有变化时附带最新群信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupInfo>,
    /// 成员排序令牌，0 表示未变化
    pub sort_version: u64,
}

impl<T> IncrementalResp<T> {
    pub fn changed(&self) -> usize {
        self.delete.len() + self.insert.len() + self.update.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchIncrementalGroupMemberResp {
    /// 超出批量上限的群不出现在结果中，需要重试
    pub resp_list: HashMap<String, IncrementalResp<MemberInfo>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetGroupsInfoReq {
    pub group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetGroupMembersInfoReq {
    pub group_id: String,
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetJoinedGroupListReq {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Empty {}
