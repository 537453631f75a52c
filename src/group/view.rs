// 视图组装
// 群信息补充群主与成员数；成员昵称头像为空时用用户资料补齐，每次组装只查询一次用户服务。

use std::collections::HashMap;

use futures_util::future::try_join_all;

use super::model::{Group, GroupMember, RoleLevel};
use super::types::{GroupInfo, MemberInfo};
use crate::clients::{UserProfile, UserProfileProvider};
use crate::database::GroupStore;
use crate::error::AppResult;

pub async fn group_info(store: &dyn GroupStore, group: &Group) -> AppResult<GroupInfo> {
    let owner = store
        .find_group_member_role_levels(&group.group_id, &[RoleLevel::Owner])
        .await?
        .into_iter()
        .next()
        .map(|member| member.user_id)
        .unwrap_or_default();
    let member_count = store.count_group_members(&group.group_id).await?;
    Ok(GroupInfo::new(group, owner, member_count))
}

pub async fn group_infos(store: &dyn GroupStore, groups: &[Group]) -> AppResult<Vec<GroupInfo>> {
    try_join_all(groups.iter().map(|group| group_info(store, group))).await
}

/// 用资料补齐空白的昵称与头像，并带上平台管理员等级
pub fn fill_member(member: &mut MemberInfo, profile: Option<&UserProfile>) {
    let Some(profile) = profile else {
        return;
    };
    if member.nickname.is_empty() {
        member.nickname = profile.nickname.clone();
    }
    if member.face_url.is_empty() {
        member.face_url = profile.face_url.clone();
    }
    member.app_manager_level = profile.app_manager_level;
}

pub fn fill_members(members: &mut [MemberInfo], profiles: &HashMap<String, UserProfile>) {
    for member in members {
        fill_member(member, profiles.get(&member.user_id));
    }
}

/// 成员视图，批量补齐资料
pub async fn member_infos(
    users: &dyn UserProfileProvider,
    members: &[GroupMember],
) -> AppResult<Vec<MemberInfo>> {
    let mut infos: Vec<MemberInfo> = members.iter().map(MemberInfo::from).collect();
    let user_ids: Vec<String> = infos
        .iter()
        .map(|member| member.user_id.clone())
        .collect();
    let profiles = users.get_users_info_map(&user_ids).await?;
    fill_members(&mut infos, &profiles);
    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_blank_fields_are_filled() {
        let member = GroupMember {
            nickname: "group nick".into(),
            ..GroupMember::new("g1", "a", RoleLevel::Owner, "a")
        };
        let mut info = MemberInfo::from(&member);
        let profile = UserProfile {
            user_id: "a".into(),
            nickname: "alice".into(),
            face_url: "http://face/a".into(),
            app_manager_level: 1,
        };
        fill_member(&mut info, Some(&profile));
        assert_eq!(info.nickname, "group nick");
        assert_eq!(info.face_url, "http://face/a");
        assert_eq!(info.app_manager_level, 1);
    }
}
