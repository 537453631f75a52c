use axum::{
    Extension,
    extract::{Json, State},
    response::IntoResponse,
};

use crate::AppState;
use crate::context::RequestContext;
use crate::group::types::{
    BatchGetIncrementalGroupMemberReq, CancelMuteGroupMemberReq, CreateGroupReq, Empty,
    GetFullGroupMemberUserIdsReq, GetFullJoinGroupIdsReq, GetGroupMembersInfoReq,
    GetGroupsInfoReq, GetIncrementalGroupMemberReq, GetIncrementalJoinGroupReq,
    GetJoinedGroupListReq, GroupApplicationResponseReq, GroupIdReq, InviteUserToGroupReq,
    JoinGroupReq, KickGroupMemberReq, MuteGroupMemberReq, QuitGroupReq, SetGroupInfoReq,
    SetGroupMemberInfoReq, TransferGroupOwnerReq,
};
use crate::utils::result_to_api_response;

// 写操作成功时返回空对象
macro_rules! empty_ok {
    ($result:expr) => {
        result_to_api_response($result.map(|_| Empty {}))
    };
}

#[axum::debug_handler]
pub async fn create_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateGroupReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.create_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn invite_user_to_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<InviteUserToGroupReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.invite_user_to_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn join_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<JoinGroupReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.join_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn group_application_response(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GroupApplicationResponseReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.group_application_response(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn kick_group_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<KickGroupMemberReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.kick_group_member(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn quit_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<QuitGroupReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.quit_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn transfer_group_owner(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<TransferGroupOwnerReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.transfer_group_owner(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn dismiss_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GroupIdReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.dismiss_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn mute_group_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<MuteGroupMemberReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.mute_group_member(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn cancel_mute_group_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CancelMuteGroupMemberReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.cancel_mute_group_member(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn mute_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GroupIdReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.mute_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn cancel_mute_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GroupIdReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.cancel_mute_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn set_group_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<SetGroupInfoReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.set_group_info(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn set_group_member_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<SetGroupMemberInfoReq>,
) -> impl IntoResponse {
    empty_ok!(state.groups.set_group_member_info(&ctx, req).await)
}

// ---------- 同步 ----------

#[axum::debug_handler]
pub async fn get_full_group_member_user_ids(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GetFullGroupMemberUserIdsReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_full_group_member_user_ids(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn get_full_join_group_ids(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GetFullJoinGroupIdsReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_full_join_group_ids(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn get_incremental_group_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GetIncrementalGroupMemberReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_incremental_group_member(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn get_incremental_join_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GetIncrementalJoinGroupReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_incremental_join_group(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn batch_get_incremental_group_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<BatchGetIncrementalGroupMemberReq>,
) -> impl IntoResponse {
    result_to_api_response(
        state
            .groups
            .batch_get_incremental_group_member(&ctx, req)
            .await,
    )
}

// ---------- 查询 ----------

#[axum::debug_handler]
pub async fn get_groups_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GetGroupsInfoReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_groups_info(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn get_group_members_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GetGroupMembersInfoReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_group_members_info(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn get_group_application_list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GroupIdReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_group_application_list(&ctx, req).await)
}

#[axum::debug_handler]
pub async fn get_joined_group_list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<GetJoinedGroupListReq>,
) -> impl IntoResponse {
    result_to_api_response(state.groups.get_joined_group_list(&ctx, req).await)
}
