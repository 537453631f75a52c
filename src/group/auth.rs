// 群内权限状态机
// 所有写操作通过 authorize 统一判定，平台管理员绕过角色检查。

use std::fmt;

use super::model::RoleLevel;
use crate::error::{AppError, AppResult};

/// 需要鉴权的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Kick,
    Quit,
    MuteMember,
    CancelMuteMember,
    SetMemberInfo,
    /// 修改成员角色为指定值
    SetMemberRole(RoleLevel),
    DismissGroup,
    MuteGroup,
    CancelMuteGroup,
    SetGroupInfo,
    HandleApplication,
    ViewApplications,
    TransferOwner,
}

impl Operation {
    fn is_group_level(self) -> bool {
        matches!(
            self,
            Operation::DismissGroup
                | Operation::MuteGroup
                | Operation::CancelMuteGroup
                | Operation::SetGroupInfo
                | Operation::HandleApplication
                | Operation::ViewApplications
                | Operation::TransferOwner
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Kick => "kick member",
            Operation::Quit => "quit group",
            Operation::MuteMember => "mute member",
            Operation::CancelMuteMember => "cancel mute member",
            Operation::SetMemberInfo => "set member info",
            Operation::SetMemberRole(_) => "set member role",
            Operation::DismissGroup => "dismiss group",
            Operation::MuteGroup => "mute group",
            Operation::CancelMuteGroup => "cancel mute group",
            Operation::SetGroupInfo => "set group info",
            Operation::HandleApplication => "handle application",
            Operation::ViewApplications => "view applications",
            Operation::TransferOwner => "transfer owner",
        };
        f.write_str(name)
    }
}

/// 操作人
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub user_id: &'a str,
    /// 不是群成员时为 None
    pub role: Option<RoleLevel>,
    pub is_app_admin: bool,
}

/// 被操作的成员
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub user_id: &'a str,
    pub role: RoleLevel,
}

/// 判定 actor 能否对 target 执行 operation，群级操作 target 为 None
pub fn authorize(operation: Operation, actor: &Actor<'_>, target: Option<&Target<'_>>) -> AppResult<()> {
    let is_self = target.is_some_and(|target| target.user_id == actor.user_id);

    // 以下规则对平台管理员同样生效
    if operation == Operation::Kick && is_self {
        return Err(AppError::args("operator cannot kick themself"));
    }
    if operation == Operation::SetMemberRole(RoleLevel::Owner) {
        return Err(AppError::args("owner can only be changed by transfer"));
    }
    if operation == Operation::Quit && target.is_some_and(|target| target.role == RoleLevel::Owner) {
        return Err(AppError::permission("group owner cannot quit, transfer ownership first"));
    }

    if actor.is_app_admin {
        return Ok(());
    }

    if operation.is_group_level() {
        return match (operation, actor.role) {
            (Operation::TransferOwner, Some(RoleLevel::Owner)) => Ok(()),
            (Operation::TransferOwner, _) => Err(denied(operation, "only the owner may transfer")),
            (_, Some(role)) if role.is_manager() => Ok(()),
            _ => Err(denied(operation, "requires owner or admin")),
        };
    }

    let Some(target) = target else {
        return Err(AppError::args(format!("{} requires a target member", operation)));
    };

    if is_self {
        return match operation {
            Operation::SetMemberRole(_) => Err(denied(operation, "cannot change own role")),
            Operation::CancelMuteMember => Err(denied(operation, "cannot lift own mute")),
            _ => Ok(()),
        };
    }

    match actor.role {
        Some(RoleLevel::Owner) => match operation {
            Operation::Quit => Err(denied(operation, "cannot quit on behalf of others")),
            _ => Ok(()),
        },
        Some(RoleLevel::Admin) => match (operation, target.role) {
            (Operation::SetMemberRole(_), _) => Err(denied(operation, "admin cannot change roles")),
            (Operation::Quit, _) => Err(denied(operation, "cannot quit on behalf of others")),
            (_, RoleLevel::Ordinary) => Ok(()),
            _ => Err(denied(operation, "admin can only act on ordinary members")),
        },
        Some(RoleLevel::Ordinary) | None => Err(denied(operation, "requires owner or admin")),
    }
}

fn denied(operation: Operation, rule: &str) -> AppError {
    AppError::permission(format!("{}: {}", operation, rule))
}
