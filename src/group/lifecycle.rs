// 群组写操作
// 每个操作按 校验 → 读取 → 状态检查 → 鉴权 → 存储写入 → 通知 的顺序执行。
// 存储写入成功后才入队通知，通知失败不影响返回结果。

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use super::auth::{Operation, Target, authorize};
use super::model::{
    Group, GroupMember, GroupRequest, GroupStatus, GroupType, GroupUpdate, HandleResult,
    JoinSource, MemberUpdate, NeedVerification, RoleLevel,
};
use super::notification::{
    Audience, NotificationEvent, NotificationKind, group_info_kind, member_info_kind,
};
use super::service::GroupService;
use super::types::{
    CancelMuteGroupMemberReq, CreateGroupReq, CreateGroupResp, GroupApplicationResponseReq,
    GroupIdReq, InviteUserToGroupReq, JoinGroupReq, KickGroupMemberReq, MemberInfo,
    MuteGroupMemberReq, QuitGroupReq, SetGroupInfoReq, SetGroupMemberInfoReq,
    TransferGroupOwnerReq,
};
use super::view;
use crate::context::RequestContext;
use crate::database::RequestDecision;
use crate::error::{AppError, AppResult};
use crate::utils::has_duplicate;

impl GroupService {
    pub async fn create_group(
        &self,
        ctx: &RequestContext,
        req: CreateGroupReq,
    ) -> AppResult<CreateGroupResp> {
        if req.owner_user_id.is_empty() {
            return Err(AppError::args("owner_user_id is required"));
        }
        if !ctx.is_app_admin && !ctx.is_self(&req.owner_user_id) {
            return Err(AppError::permission("only the owner or an app admin can create a group"));
        }
        let group_type = req.group_info.group_type.unwrap_or(GroupType::Normal);
        if group_type == GroupType::Super {
            return Err(AppError::args("super group type is not supported"));
        }

        let user_ids: Vec<String> = std::iter::once(req.owner_user_id.clone())
            .chain(req.admin_user_ids.iter().cloned())
            .chain(req.member_user_ids.iter().cloned())
            .collect();
        if user_ids.iter().any(String::is_empty) {
            return Err(AppError::args("empty user id in member list"));
        }
        if has_duplicate(&user_ids) {
            return Err(AppError::args("duplicate user ids in member list"));
        }
        self.resolve_users(&user_ids).await?;

        let input = req.group_info;
        let now = Utc::now();
        let group = Group {
            group_id: if input.group_id.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                input.group_id
            },
            name: input.name,
            face_url: input.face_url,
            introduction: input.introduction,
            notification_update_time: if input.notification.is_empty() {
                DateTime::<Utc>::UNIX_EPOCH
            } else {
                now
            },
            notification_user_id: if input.notification.is_empty() {
                String::new()
            } else {
                ctx.op_user_id.clone()
            },
            notification: input.notification,
            creator_user_id: ctx.op_user_id.clone(),
            create_time: now,
            group_type,
            status: GroupStatus::Normal,
            need_verification: input
                .need_verification
                .unwrap_or(NeedVerification::ApplyNeedsApproval),
            look_member_info: input.look_member_info,
            apply_member_friend: input.apply_member_friend,
            ex: input.ex,
        };

        // 群主在前，其次管理员，最后普通成员
        let roles = std::iter::once(RoleLevel::Owner)
            .chain(req.admin_user_ids.iter().map(|_| RoleLevel::Admin))
            .chain(req.member_user_ids.iter().map(|_| RoleLevel::Ordinary));
        let mut members = Vec::with_capacity(user_ids.len());
        for (user_id, role) in user_ids.iter().zip(roles) {
            let mut member = GroupMember::new(&group.group_id, user_id, role, &ctx.op_user_id);
            member.join_time = now;
            self.hook
                .before_member_join(&ctx.operation_id, &mut member, &group.ex)
                .await?;
            members.push(member);
        }

        self.store.create_group(Some(&group), &members).await?;
        let group_info = view::group_info(self.store.as_ref(), &group).await?;
        tracing::info!(
            operation_id = %ctx.operation_id,
            "群创建成功 group={} owner={} members={}",
            group.group_id,
            req.owner_user_id,
            members.len()
        );

        self.notify(
            NotificationEvent::new(NotificationKind::GroupCreated, ctx, &group.group_id, Audience::Group)
                .subjects(user_ids)
                .group(group_info.clone()),
        );
        Ok(CreateGroupResp { group_info })
    }

    pub async fn invite_user_to_group(
        &self,
        ctx: &RequestContext,
        req: InviteUserToGroupReq,
    ) -> AppResult<()> {
        if req.invited_user_ids.is_empty() {
            return Err(AppError::args("invited_user_ids is empty"));
        }
        if has_duplicate(&req.invited_user_ids) {
            return Err(AppError::args("duplicate invited user ids"));
        }
        let group = self.load_active_group(&req.group_id).await?;

        let existing = self
            .store
            .find_group_members(&group.group_id, Some(&req.invited_user_ids))
            .await?;
        if !existing.is_empty() {
            let ids: Vec<&str> = existing.iter().map(|m| m.user_id.as_str()).collect();
            return Err(AppError::conflict(format!("already in group: {}", ids.join(","))));
        }
        self.resolve_users(&req.invited_user_ids).await?;

        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        if role.is_none() && !ctx.is_app_admin {
            return Err(AppError::permission("only group members can invite"));
        }
        let privileged = ctx.is_app_admin || role.is_some_and(RoleLevel::is_manager);

        if group.need_verification == NeedVerification::AllNeedApproval && !privileged {
            let requests: Vec<GroupRequest> = req
                .invited_user_ids
                .iter()
                .map(|user_id| GroupRequest {
                    req_msg: req.reason.clone(),
                    ..GroupRequest::pending(
                        &group.group_id,
                        user_id,
                        JoinSource::Invitation,
                        &ctx.op_user_id,
                    )
                })
                .collect();
            self.store.create_group_requests(&requests).await?;
            tracing::info!(
                "邀请需要审批 group={} inviter={} invitees={:?}",
                group.group_id,
                ctx.op_user_id,
                req.invited_user_ids
            );
            for request in &requests {
                self.notify(
                    NotificationEvent::new(
                        NotificationKind::JoinGroupApplication,
                        ctx,
                        &group.group_id,
                        Audience::Managers(vec![ctx.op_user_id.clone()]),
                    )
                    .applicant(&request.user_id)
                    .subjects([request.user_id.clone()])
                    .detail(json!({ "req_msg": request.req_msg })),
                );
            }
            return Ok(());
        }

        let mut members = Vec::with_capacity(req.invited_user_ids.len());
        for user_id in &req.invited_user_ids {
            let mut member =
                GroupMember::new(&group.group_id, user_id, RoleLevel::Ordinary, &ctx.op_user_id);
            self.hook
                .before_member_join(&ctx.operation_id, &mut member, &group.ex)
                .await?;
            members.push(member);
        }
        self.store.create_group(None, &members).await?;
        tracing::info!(
            "invited {} users into group {}",
            members.len(),
            group.group_id
        );

        self.notify(
            NotificationEvent::new(NotificationKind::MemberInvited, ctx, &group.group_id, Audience::Group)
                .subjects(req.invited_user_ids)
                .detail(json!({ "reason": req.reason })),
        );
        Ok(())
    }

    pub async fn join_group(&self, ctx: &RequestContext, req: JoinGroupReq) -> AppResult<()> {
        let group = self.load_active_group(&req.group_id).await?;
        if self.role_of(&group.group_id, &ctx.op_user_id).await?.is_some() {
            return Err(AppError::conflict(format!(
                "{} is already in group {}",
                ctx.op_user_id, group.group_id
            )));
        }
        self.resolve_users(std::slice::from_ref(&ctx.op_user_id)).await?;

        if group.need_verification == NeedVerification::Directly {
            let mut member = GroupMember {
                join_source: req.join_source,
                inviter_user_id: req.inviter_user_id.clone(),
                ex: req.ex,
                ..GroupMember::new(&group.group_id, &ctx.op_user_id, RoleLevel::Ordinary, &ctx.op_user_id)
            };
            self.hook
                .before_member_join(&ctx.operation_id, &mut member, &group.ex)
                .await?;
            self.store.create_group(None, std::slice::from_ref(&member)).await?;
            tracing::info!("user {} joined group {}", ctx.op_user_id, group.group_id);

            self.notify(
                NotificationEvent::new(NotificationKind::MemberEnter, ctx, &group.group_id, Audience::Group)
                    .subjects([ctx.op_user_id.clone()]),
            );
            return Ok(());
        }

        let request = GroupRequest {
            req_msg: req.req_message,
            ex: req.ex,
            ..GroupRequest::pending(&group.group_id, &ctx.op_user_id, req.join_source, &req.inviter_user_id)
        };
        self.store
            .create_group_requests(std::slice::from_ref(&request))
            .await?;
        tracing::info!("入群申请已提交 group={} user={}", group.group_id, ctx.op_user_id);

        // 邀请人只有在群内时才会收到提示
        let mut receivers = vec![ctx.op_user_id.clone()];
        if !req.inviter_user_id.is_empty()
            && self.role_of(&group.group_id, &req.inviter_user_id).await?.is_some()
        {
            receivers.push(req.inviter_user_id);
        }
        self.notify(
            NotificationEvent::new(
                NotificationKind::JoinGroupApplication,
                ctx,
                &group.group_id,
                Audience::Managers(receivers),
            )
            .applicant(&ctx.op_user_id)
            .subjects([ctx.op_user_id.clone()])
            .detail(json!({ "req_msg": request.req_msg })),
        );
        Ok(())
    }

    pub async fn group_application_response(
        &self,
        ctx: &RequestContext,
        req: GroupApplicationResponseReq,
    ) -> AppResult<()> {
        if req.from_user_id.is_empty() {
            return Err(AppError::args("from_user_id is required"));
        }
        if req.handle_result == HandleResult::Pending {
            return Err(AppError::args("handle_result must be agree or refuse"));
        }
        let group = self.load_active_group(&req.group_id).await?;
        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        authorize(Operation::HandleApplication, &Self::actor(ctx, role), None)?;

        let request = self
            .store
            .take_group_request(&group.group_id, &req.from_user_id)
            .await?;
        if request.handle_result != HandleResult::Pending {
            return Err(AppError::args("group request already processed"));
        }

        if self.role_of(&group.group_id, &req.from_user_id).await?.is_some() {
            return Err(AppError::conflict(format!(
                "{} is already in group {}",
                req.from_user_id, group.group_id
            )));
        }

        let member = if req.handle_result == HandleResult::Agreed {
            let mut member = GroupMember {
                join_source: request.join_source,
                inviter_user_id: request.inviter_user_id.clone(),
                ex: request.ex.clone(),
                ..GroupMember::new(&group.group_id, &req.from_user_id, RoleLevel::Ordinary, &ctx.op_user_id)
            };
            self.hook
                .before_member_join(&ctx.operation_id, &mut member, &group.ex)
                .await?;
            Some(member)
        } else {
            None
        };

        let decision = RequestDecision {
            group_id: group.group_id.clone(),
            user_id: req.from_user_id.clone(),
            handle_result: req.handle_result,
            handled_msg: req.handled_msg.clone(),
            handle_user_id: ctx.op_user_id.clone(),
            handled_time: Utc::now(),
            member,
        };
        let agreed = decision.member.is_some();
        self.store.handle_group_request(&decision).await?;
        tracing::info!(
            "入群申请已处理 group={} applicant={} result={}",
            group.group_id,
            req.from_user_id,
            req.handle_result.as_i32()
        );

        let kind = if agreed {
            NotificationKind::ApplicationAccepted
        } else {
            NotificationKind::ApplicationRejected
        };
        self.notify(
            NotificationEvent::new(
                kind,
                ctx,
                &group.group_id,
                Audience::Managers(vec![req.from_user_id.clone()]),
            )
            .applicant(&req.from_user_id)
            .subjects([req.from_user_id.clone()])
            .detail(json!({ "handled_msg": req.handled_msg })),
        );
        if agreed {
            self.notify(
                NotificationEvent::new(NotificationKind::MemberEnter, ctx, &group.group_id, Audience::Group)
                    .subjects([req.from_user_id]),
            );
        }
        Ok(())
    }

    pub async fn kick_group_member(
        &self,
        ctx: &RequestContext,
        req: KickGroupMemberReq,
    ) -> AppResult<()> {
        if req.kicked_user_ids.is_empty() {
            return Err(AppError::args("kicked_user_ids is empty"));
        }
        if has_duplicate(&req.kicked_user_ids) {
            return Err(AppError::args("duplicate kicked user ids"));
        }
        if req.kicked_user_ids.contains(&ctx.op_user_id) {
            return Err(AppError::args("operator cannot kick themself"));
        }
        let group = self.load_active_group(&req.group_id).await?;

        let targets = self
            .store
            .find_group_members(&group.group_id, Some(&req.kicked_user_ids))
            .await?;
        if targets.len() != req.kicked_user_ids.len() {
            return Err(AppError::not_found("some kicked users are not in the group"));
        }
        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        let actor = Self::actor(ctx, role);
        // 任何一个目标不允许则整批失败
        for target in &targets {
            authorize(
                Operation::Kick,
                &actor,
                Some(&Target {
                    user_id: &target.user_id,
                    role: target.role_level,
                }),
            )?;
        }

        let removed: Vec<MemberInfo> = targets.iter().map(MemberInfo::from).collect();
        self.store
            .delete_group_members(&group.group_id, &req.kicked_user_ids)
            .await?;
        tracing::info!(
            "kicked {:?} from group {} by {}",
            req.kicked_user_ids,
            group.group_id,
            ctx.op_user_id
        );

        self.notify(
            NotificationEvent::new(NotificationKind::MemberKicked, ctx, &group.group_id, Audience::Group)
                .subjects(req.kicked_user_ids)
                .removed(removed)
                .detail(json!({ "reason": req.reason })),
        );
        Ok(())
    }

    pub async fn quit_group(&self, ctx: &RequestContext, req: QuitGroupReq) -> AppResult<()> {
        let user_id = if req.user_id.is_empty() {
            ctx.op_user_id.clone()
        } else {
            req.user_id
        };
        let group = self.load_active_group(&req.group_id).await?;
        let member = self.store.take_group_member(&group.group_id, &user_id).await?;
        let role = if ctx.is_self(&user_id) {
            Some(member.role_level)
        } else {
            self.role_of(&group.group_id, &ctx.op_user_id).await?
        };
        authorize(
            Operation::Quit,
            &Self::actor(ctx, role),
            Some(&Target {
                user_id: &member.user_id,
                role: member.role_level,
            }),
        )?;

        self.store
            .delete_group_members(&group.group_id, std::slice::from_ref(&user_id))
            .await?;
        tracing::info!("user {} quit group {}", user_id, group.group_id);

        self.notify(
            NotificationEvent::new(NotificationKind::MemberQuit, ctx, &group.group_id, Audience::Group)
                .subjects([user_id])
                .removed(vec![MemberInfo::from(&member)]),
        );
        Ok(())
    }

    /// 转让群主，旧群主取得新群主原来的角色
    pub async fn transfer_group_owner(
        &self,
        ctx: &RequestContext,
        req: TransferGroupOwnerReq,
    ) -> AppResult<()> {
        if req.old_owner_user_id.is_empty() || req.new_owner_user_id.is_empty() {
            return Err(AppError::args("old and new owner are required"));
        }
        if req.old_owner_user_id == req.new_owner_user_id {
            return Err(AppError::args("new owner is the same as the old owner"));
        }
        let group = self.load_active_group(&req.group_id).await?;

        let members = self
            .store
            .find_group_members(
                &group.group_id,
                Some(&[req.old_owner_user_id.clone(), req.new_owner_user_id.clone()]),
            )
            .await?;
        let find = |user_id: &str| {
            members
                .iter()
                .find(|member| member.user_id == user_id)
                .ok_or_else(|| AppError::not_found(format!("user {} not in group {}", user_id, group.group_id)))
        };
        let old_owner = find(&req.old_owner_user_id)?;
        let new_owner = find(&req.new_owner_user_id)?;
        if old_owner.role_level != RoleLevel::Owner {
            return Err(AppError::permission(format!(
                "user {} is not the group owner",
                old_owner.user_id
            )));
        }

        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        authorize(Operation::TransferOwner, &Self::actor(ctx, role), None)?;

        self.store
            .transfer_group_owner(
                &group.group_id,
                &old_owner.user_id,
                &new_owner.user_id,
                new_owner.role_level,
            )
            .await?;
        tracing::info!(
            "群主转让 group={} {} -> {}",
            group.group_id,
            old_owner.user_id,
            new_owner.user_id
        );

        self.notify(
            NotificationEvent::new(NotificationKind::OwnerTransferred, ctx, &group.group_id, Audience::Group)
                .subjects([req.old_owner_user_id, req.new_owner_user_id]),
        );
        Ok(())
    }

    /// 解散群，同时移除全部成员
    pub async fn dismiss_group(&self, ctx: &RequestContext, req: GroupIdReq) -> AppResult<()> {
        let group = self.load_active_group(&req.group_id).await?;
        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        authorize(Operation::DismissGroup, &Self::actor(ctx, role), None)?;

        let mut snapshot = view::group_info(self.store.as_ref(), &group).await?;
        let removed = self.store.dismiss_group(&group.group_id).await?;
        snapshot.status = GroupStatus::Dismissed;
        tracing::info!(
            "group {} dismissed by {}, {} members removed",
            group.group_id,
            ctx.op_user_id,
            removed.len()
        );

        self.notify(
            NotificationEvent::new(
                NotificationKind::GroupDismissed,
                ctx,
                &group.group_id,
                Audience::Users(removed),
            )
            .group(snapshot),
        );
        Ok(())
    }

    pub async fn mute_group_member(
        &self,
        ctx: &RequestContext,
        req: MuteGroupMemberReq,
    ) -> AppResult<()> {
        if req.muted_seconds == 0 {
            return Err(AppError::args("muted_seconds must be positive"));
        }
        let end = Utc::now() + Duration::seconds(i64::from(req.muted_seconds));
        self.set_member_mute(ctx, &req.group_id, &req.user_id, Operation::MuteMember, end)
            .await?;

        self.notify(
            NotificationEvent::new(NotificationKind::MemberMuted, ctx, &req.group_id, Audience::Group)
                .subjects([req.user_id])
                .detail(json!({ "muted_seconds": req.muted_seconds })),
        );
        Ok(())
    }

    pub async fn cancel_mute_group_member(
        &self,
        ctx: &RequestContext,
        req: CancelMuteGroupMemberReq,
    ) -> AppResult<()> {
        self.set_member_mute(
            ctx,
            &req.group_id,
            &req.user_id,
            Operation::CancelMuteMember,
            DateTime::<Utc>::UNIX_EPOCH,
        )
        .await?;

        self.notify(
            NotificationEvent::new(NotificationKind::MemberCancelMuted, ctx, &req.group_id, Audience::Group)
                .subjects([req.user_id]),
        );
        Ok(())
    }

    async fn set_member_mute(
        &self,
        ctx: &RequestContext,
        group_id: &str,
        user_id: &str,
        operation: Operation,
        end: DateTime<Utc>,
    ) -> AppResult<()> {
        if user_id.is_empty() {
            return Err(AppError::args("user_id is required"));
        }
        let group = self.load_active_group(group_id).await?;
        let target = self.store.take_group_member(&group.group_id, user_id).await?;
        let role = if ctx.is_self(user_id) {
            Some(target.role_level)
        } else {
            self.role_of(&group.group_id, &ctx.op_user_id).await?
        };
        authorize(
            operation,
            &Self::actor(ctx, role),
            Some(&Target {
                user_id: &target.user_id,
                role: target.role_level,
            }),
        )?;

        self.store
            .update_group_members(&[MemberUpdate::mute_until(&group.group_id, user_id, end)])
            .await?;
        tracing::info!("{} group={} user={} until={}", operation, group.group_id, user_id, end);
        Ok(())
    }

    pub async fn mute_group(&self, ctx: &RequestContext, req: GroupIdReq) -> AppResult<()> {
        self.set_group_status(ctx, &req.group_id, Operation::MuteGroup, GroupStatus::Muted)
            .await?;
        self.notify(NotificationEvent::new(
            NotificationKind::GroupMuted,
            ctx,
            &req.group_id,
            Audience::Group,
        ));
        Ok(())
    }

    pub async fn cancel_mute_group(&self, ctx: &RequestContext, req: GroupIdReq) -> AppResult<()> {
        self.set_group_status(ctx, &req.group_id, Operation::CancelMuteGroup, GroupStatus::Normal)
            .await?;
        self.notify(NotificationEvent::new(
            NotificationKind::GroupCancelMuted,
            ctx,
            &req.group_id,
            Audience::Group,
        ));
        Ok(())
    }

    async fn set_group_status(
        &self,
        ctx: &RequestContext,
        group_id: &str,
        operation: Operation,
        status: GroupStatus,
    ) -> AppResult<()> {
        let group = self.load_active_group(group_id).await?;
        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        authorize(operation, &Self::actor(ctx, role), None)?;

        self.store
            .update_group(&group.group_id, &GroupUpdate::status(status))
            .await?;
        tracing::info!("{} group={} by {}", operation, group.group_id, ctx.op_user_id);
        Ok(())
    }

    pub async fn set_group_info(&self, ctx: &RequestContext, req: SetGroupInfoReq) -> AppResult<()> {
        let group = self.load_active_group(&req.group_id).await?;
        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        authorize(Operation::SetGroupInfo, &Self::actor(ctx, role), None)?;

        if req.name.as_deref() == Some("") {
            return Err(AppError::args("group name cannot be empty"));
        }
        let update = GroupUpdate {
            name: req.name,
            face_url: req.face_url,
            introduction: req.introduction,
            notification: req
                .notification
                .map(|notification| (notification, ctx.op_user_id.clone())),
            need_verification: req.need_verification,
            look_member_info: req.look_member_info,
            apply_member_friend: req.apply_member_friend,
            status: None,
            ex: req.ex,
        };
        if update.is_empty() {
            return Ok(());
        }
        self.store.update_group(&group.group_id, &update).await?;
        tracing::info!(
            "群资料已修改 group={} fields={}",
            group.group_id,
            update.changed_fields()
        );

        let kind = group_info_kind(
            update.name.is_some(),
            update.notification.is_some(),
            update.changed_fields(),
        );
        self.notify(NotificationEvent::new(kind, ctx, &group.group_id, Audience::Group));
        Ok(())
    }

    pub async fn set_group_member_info(
        &self,
        ctx: &RequestContext,
        req: SetGroupMemberInfoReq,
    ) -> AppResult<()> {
        if req.members.is_empty() {
            return Err(AppError::args("members is empty"));
        }
        let keys: Vec<(&str, &str)> = req
            .members
            .iter()
            .map(|patch| (patch.group_id.as_str(), patch.user_id.as_str()))
            .collect();
        if has_duplicate(&keys) {
            return Err(AppError::args("duplicate members in request"));
        }

        let mut roles: HashMap<String, Option<RoleLevel>> = HashMap::new();
        let mut updates = Vec::with_capacity(req.members.len());
        for patch in &req.members {
            if patch.user_id.is_empty() {
                return Err(AppError::args("user_id is required"));
            }
            if !roles.contains_key(&patch.group_id) {
                let group = self.load_active_group(&patch.group_id).await?;
                let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
                roles.insert(group.group_id, role);
            }
            let role = roles.get(&patch.group_id).copied().flatten();
            let actor = Self::actor(ctx, role);

            let target = self
                .store
                .take_group_member(&patch.group_id, &patch.user_id)
                .await?;
            let target_ref = Target {
                user_id: &target.user_id,
                role: target.role_level,
            };
            authorize(Operation::SetMemberInfo, &actor, Some(&target_ref))?;

            let role_level = patch.role_level.filter(|level| *level != target.role_level);
            if let Some(level) = role_level {
                if target.role_level == RoleLevel::Owner {
                    return Err(AppError::args("owner role can only change by transfer"));
                }
                authorize(Operation::SetMemberRole(level), &actor, Some(&target_ref))?;
            }

            updates.push(MemberUpdate {
                nickname: patch.nickname.clone(),
                face_url: patch.face_url.clone(),
                role_level,
                ex: patch.ex.clone(),
                ..MemberUpdate::new(&patch.group_id, &patch.user_id)
            });
        }

        self.store.update_group_members(&updates).await?;
        tracing::info!("updated {} member infos by {}", updates.len(), ctx.op_user_id);

        for update in updates {
            self.notify(
                NotificationEvent::new(
                    member_info_kind(update.role_level),
                    ctx,
                    &update.group_id,
                    Audience::Group,
                )
                .subjects([update.user_id]),
            );
        }
        Ok(())
    }
}
