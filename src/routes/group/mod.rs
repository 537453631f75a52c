use axum::{Router, routing::post};

use crate::AppState;

mod handler;

/// 群组 RPC，全部为 POST + JSON
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create_group", post(handler::create_group))
        .route("/invite_user_to_group", post(handler::invite_user_to_group))
        .route("/join_group", post(handler::join_group))
        .route(
            "/group_application_response",
            post(handler::group_application_response),
        )
        .route("/kick_group", post(handler::kick_group_member))
        .route("/quit_group", post(handler::quit_group))
        .route("/transfer_group", post(handler::transfer_group_owner))
        .route("/dismiss_group", post(handler::dismiss_group))
        .route("/mute_group_member", post(handler::mute_group_member))
        .route(
            "/cancel_mute_group_member",
            post(handler::cancel_mute_group_member),
        )
        .route("/mute_group", post(handler::mute_group))
        .route("/cancel_mute_group", post(handler::cancel_mute_group))
        .route("/set_group_info", post(handler::set_group_info))
        .route("/set_group_member_info", post(handler::set_group_member_info))
        // 同步
        .route(
            "/get_full_group_member_user_ids",
            post(handler::get_full_group_member_user_ids),
        )
        .route("/get_full_join_group_ids", post(handler::get_full_join_group_ids))
        .route(
            "/get_incremental_group_member",
            post(handler::get_incremental_group_member),
        )
        .route(
            "/get_incremental_join_group",
            post(handler::get_incremental_join_group),
        )
        .route(
            "/get_incremental_group_member_batch",
            post(handler::batch_get_incremental_group_member),
        )
        // 查询
        .route("/get_groups_info", post(handler::get_groups_info))
        .route("/get_group_members_info", post(handler::get_group_members_info))
        .route(
            "/get_group_application_list",
            post(handler::get_group_application_list),
        )
        .route("/get_joined_group_list", post(handler::get_joined_group_list))
}
