mod common;

use std::collections::BTreeMap;

use chrono::Utc;
use common::{Fixture, RecordingMessenger, ctx, ids};
use group_service::clients::Recipient;
use group_service::database::GroupStore;
use group_service::error::AppError;
use group_service::group::SyncLimits;
use group_service::group::fingerprint::{id_hash, member_hash};
use group_service::group::model::{GroupStatus, HandleResult, NeedVerification, RoleLevel};
use group_service::group::types::{
    BatchGetIncrementalGroupMemberReq, CancelMuteGroupMemberReq, CreateGroupReq, GetFullGroupMemberUserIdsReq,
    GetFullJoinGroupIdsReq, GetIncrementalGroupMemberReq, GetIncrementalJoinGroupReq,
    GroupApplicationResponseReq, GroupIdReq, IncrementalResp, InviteUserToGroupReq, JoinGroupReq,
    KickGroupMemberReq, MemberInfo, MemberInfoPatch, MuteGroupMemberReq, QuitGroupReq,
    SetGroupInfoReq, SetGroupMemberInfoReq, TransferGroupOwnerReq,
};
use group_service::group::version::VersionHeader;

async fn header(fx: &Fixture, group_id: &str) -> VersionHeader {
    fx.store.find_max_member_version(group_id).await.unwrap()
}

fn incr_req(group_id: &str, header: &VersionHeader) -> GetIncrementalGroupMemberReq {
    GetIncrementalGroupMemberReq {
        group_id: group_id.to_string(),
        version_id: header.version_id.clone(),
        version: header.version,
    }
}

async fn incremental(fx: &Fixture, group_id: &str, header: &VersionHeader) -> IncrementalResp<MemberInfo> {
    fx.service
        .get_incremental_group_member(&ctx("A"), incr_req(group_id, header))
        .await
        .unwrap()
}

async fn invite(fx: &Fixture, op: &str, group_id: &str, users: &[&str]) {
    fx.service
        .invite_user_to_group(
            &ctx(op),
            InviteUserToGroupReq {
                group_id: group_id.to_string(),
                invited_user_ids: ids(users),
                reason: String::new(),
            },
        )
        .await
        .unwrap();
}

async fn kick(fx: &Fixture, op: &str, group_id: &str, users: &[&str]) -> Result<(), AppError> {
    fx.service
        .kick_group_member(
            &ctx(op),
            KickGroupMemberReq {
                group_id: group_id.to_string(),
                kicked_user_ids: ids(users),
                reason: String::new(),
            },
        )
        .await
}

async fn role(fx: &Fixture, group_id: &str, user_id: &str) -> RoleLevel {
    fx.store
        .take_group_member(group_id, user_id)
        .await
        .unwrap()
        .role_level
}

/// 客户端本地成员缓存，按 delete、insert、update 顺序应用
#[derive(Default)]
struct ClientRoster {
    members: BTreeMap<String, MemberInfo>,
    version_id: String,
    version: u64,
}

impl ClientRoster {
    fn apply(&mut self, resp: IncrementalResp<MemberInfo>) {
        if resp.full {
            self.members.clear();
        }
        for user_id in resp.delete {
            self.members.remove(&user_id);
        }
        for member in resp.insert.into_iter().chain(resp.update) {
            self.members.insert(member.user_id.clone(), member);
        }
        self.version_id = resp.version_id;
        self.version = resp.version;
    }

    fn fingerprint(&self) -> u64 {
        let members: Vec<MemberInfo> = self.members.values().cloned().collect();
        member_hash(&members)
    }

    async fn sync(&mut self, fx: &Fixture, group_id: &str) {
        let resp = fx
            .service
            .get_incremental_group_member(
                &ctx("A"),
                GetIncrementalGroupMemberReq {
                    group_id: group_id.to_string(),
                    version_id: self.version_id.clone(),
                    version: self.version,
                },
            )
            .await
            .unwrap();
        self.apply(resp);
    }
}

#[tokio::test]
async fn create_group_with_duplicate_members_is_rejected() {
    let fx = Fixture::new();
    let err = fx
        .service
        .create_group(
            &ctx("A"),
            CreateGroupReq {
                owner_user_id: "A".into(),
                admin_user_ids: ids(&["B"]),
                member_user_ids: ids(&["C", "B"]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Args(_)));
    assert!(fx.store.find_joined_group_ids("A").await.unwrap().is_empty());
}

#[tokio::test]
async fn create_group_rejects_unknown_users() {
    let fx = Fixture::new();
    let err = fx
        .service
        .create_group(
            &ctx("A"),
            CreateGroupReq {
                owner_user_id: "A".into(),
                member_user_ids: ids(&["nobody"]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn invite_changes_fingerprint_and_shows_up_as_insert() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B", "C"]).await;

    let h0 = id_hash(&ids(&["C", "A", "B"]));
    let before = fx
        .service
        .get_full_group_member_user_ids(
            &ctx("A"),
            GetFullGroupMemberUserIdsReq {
                group_id: group_id.clone(),
                id_hash: h0,
            },
        )
        .await
        .unwrap();
    assert!(before.equal);
    assert!(before.ids.is_empty());
    let v0 = header(&fx, &group_id).await;

    invite(&fx, "A", &group_id, &["D"]).await;

    let after = fx
        .service
        .get_full_group_member_user_ids(
            &ctx("A"),
            GetFullGroupMemberUserIdsReq {
                group_id: group_id.clone(),
                id_hash: h0,
            },
        )
        .await
        .unwrap();
    assert!(!after.equal);
    assert_eq!(after.ids, ids(&["A", "B", "C", "D"]));
    assert_eq!(after.version, v0.version + 1);

    let resp = incremental(&fx, &group_id, &v0).await;
    assert!(!resp.full);
    assert_eq!(resp.insert.len(), 1);
    assert_eq!(resp.insert[0].user_id, "D");
    // 空白昵称由用户资料补齐
    assert_eq!(resp.insert[0].nickname, "nick-D");
    assert!(resp.delete.is_empty());
    assert!(resp.update.is_empty());
}

#[tokio::test]
async fn current_checkpoint_returns_empty_delta() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B"]).await;
    let current = header(&fx, &group_id).await;

    let resp = incremental(&fx, &group_id, &current).await;
    assert!(!resp.full);
    assert_eq!(resp.changed(), 0);
    assert_eq!(resp.version, current.version);
    assert_eq!(resp.version_id, current.version_id);
}

#[tokio::test]
async fn unknown_version_id_forces_full_resync() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["B"], &["C"]).await;

    let resp = fx
        .service
        .get_incremental_group_member(
            &ctx("A"),
            GetIncrementalGroupMemberReq {
                group_id: group_id.clone(),
                version_id: "rebuilt-log".into(),
                version: 1,
            },
        )
        .await
        .unwrap();
    assert!(resp.full);
    assert!(resp.delete.is_empty());
    assert!(resp.update.is_empty());
    let mut users: Vec<&str> = resp.insert.iter().map(|m| m.user_id.as_str()).collect();
    users.sort();
    assert_eq!(users, vec!["A", "B", "C"]);
    assert_eq!(resp.group.as_ref().map(|g| g.owner_user_id.as_str()), Some("A"));
}

#[tokio::test]
async fn too_many_changes_force_full_resync() {
    let fx = Fixture::with(
        SyncLimits {
            sync_limit: 2,
            batch_ceiling: 500,
        },
        RecordingMessenger::default(),
        5000,
    );
    let group_id = fx.create_group("A", &[], &[]).await;
    let v0 = header(&fx, &group_id).await;
    invite(&fx, "A", &group_id, &["B", "C", "D"]).await;

    let resp = incremental(&fx, &group_id, &v0).await;
    assert!(resp.full);
    assert_eq!(resp.insert.len(), 4);
}

#[tokio::test]
async fn pruned_checkpoint_forces_full_resync() {
    let fx = Fixture::with(SyncLimits::default(), RecordingMessenger::default(), 2);
    let group_id = fx.create_group("A", &[], &[]).await;
    let v0 = header(&fx, &group_id).await;
    for user in ["B", "C", "D"] {
        invite(&fx, "A", &group_id, &[user]).await;
    }

    let current = header(&fx, &group_id).await;
    assert!(current.pruned_version > v0.version);
    let resp = incremental(&fx, &group_id, &v0).await;
    assert!(resp.full);
    assert_eq!(resp.insert.len(), 4);
}

#[tokio::test]
async fn replaying_deltas_matches_server_fingerprint() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["B"], &["C", "D"]).await;

    let mut client = ClientRoster::default();
    client.sync(&fx, &group_id).await;
    assert_eq!(client.members.len(), 4);

    invite(&fx, "A", &group_id, &["E", "F"]).await;
    client.sync(&fx, &group_id).await;

    kick(&fx, "B", &group_id, &["C"]).await.unwrap();
    fx.service
        .mute_group_member(
            &ctx("A"),
            MuteGroupMemberReq {
                group_id: group_id.clone(),
                user_id: "D".into(),
                muted_seconds: 60,
            },
        )
        .await
        .unwrap();
    client.sync(&fx, &group_id).await;

    // 同一窗口内先踢出再邀请回来
    kick(&fx, "A", &group_id, &["E"]).await.unwrap();
    invite(&fx, "A", &group_id, &["E", "C"]).await;
    fx.service
        .set_group_member_info(
            &ctx("A"),
            SetGroupMemberInfoReq {
                members: vec![MemberInfoPatch {
                    group_id: group_id.clone(),
                    user_id: "F".into(),
                    nickname: Some("group-nick".into()),
                    role_level: Some(RoleLevel::Admin),
                    ..Default::default()
                }],
            },
        )
        .await
        .unwrap();
    fx.service
        .transfer_group_owner(
            &ctx("A"),
            TransferGroupOwnerReq {
                group_id: group_id.clone(),
                old_owner_user_id: "A".into(),
                new_owner_user_id: "B".into(),
            },
        )
        .await
        .unwrap();
    client.sync(&fx, &group_id).await;

    let server = fx.service.member_fingerprint(&group_id).await.unwrap();
    assert_eq!(client.fingerprint(), server);
    assert_eq!(client.members.len(), 6);
    assert_eq!(client.members["F"].nickname, "group-nick");
    assert_eq!(client.members["B"].role_level, RoleLevel::Owner);
}

#[tokio::test]
async fn batch_incremental_respects_ceiling() {
    let fx = Fixture::with(
        SyncLimits {
            sync_limit: 1000,
            batch_ceiling: 5,
        },
        RecordingMessenger::default(),
        5000,
    );
    let mut req_list = Vec::new();
    for _ in 0..3 {
        let group_id = fx.create_group("A", &[], &["B"]).await;
        req_list.push(incr_req(&group_id, &header(&fx, &group_id).await));
        invite(&fx, "A", &group_id, &["C", "D", "E"]).await;
    }

    let resp = fx
        .service
        .batch_get_incremental_group_member(
            &ctx("A"),
            BatchGetIncrementalGroupMemberReq {
                req_list: req_list.clone(),
            },
        )
        .await
        .unwrap();
    let total: usize = resp.resp_list.values().map(|r| r.changed()).sum();
    assert!(total <= 5);
    assert_eq!(resp.resp_list.len(), 1);
    assert!(resp.resp_list.contains_key(&req_list[0].group_id));
    assert!(!resp.resp_list.contains_key(&req_list[2].group_id));
    assert_eq!(resp.resp_list[&req_list[0].group_id].insert.len(), 3);
}

#[tokio::test]
async fn batch_incremental_omits_a_first_group_above_the_ceiling() {
    let fx = Fixture::with(
        SyncLimits {
            sync_limit: 1000,
            batch_ceiling: 2,
        },
        RecordingMessenger::default(),
        5000,
    );
    let group_id = fx.create_group("A", &[], &["B"]).await;
    let req = incr_req(&group_id, &header(&fx, &group_id).await);
    invite(&fx, "A", &group_id, &["C", "D", "E"]).await;

    let resp = fx
        .service
        .batch_get_incremental_group_member(
            &ctx("A"),
            BatchGetIncrementalGroupMemberReq { req_list: vec![req.clone()] },
        )
        .await
        .unwrap();
    assert!(resp.resp_list.is_empty());

    // 单群接口不受批量上限约束
    let single = fx
        .service
        .get_incremental_group_member(&ctx("A"), req)
        .await
        .unwrap();
    assert_eq!(single.insert.len(), 3);
}

#[tokio::test]
async fn kick_authorization_matrix() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["B", "E"], &["C", "D"]).await;

    assert!(matches!(kick(&fx, "B", &group_id, &["A"]).await, Err(AppError::Permission(_))));
    assert!(matches!(kick(&fx, "B", &group_id, &["E"]).await, Err(AppError::Permission(_))));
    assert!(matches!(kick(&fx, "C", &group_id, &["D"]).await, Err(AppError::Permission(_))));
    assert!(matches!(kick(&fx, "A", &group_id, &["A"]).await, Err(AppError::Args(_))));

    // 批量中有一个不允许则整批失败
    assert!(matches!(
        kick(&fx, "E", &group_id, &["C", "A"]).await,
        Err(AppError::Permission(_))
    ));
    assert!(fx.store.take_group_member(&group_id, "C").await.is_ok());

    kick(&fx, "A", &group_id, &["B"]).await.unwrap();
    kick(&fx, "E", &group_id, &["C"]).await.unwrap();
    assert_eq!(
        fx.store.find_member_user_ids(&group_id).await.unwrap(),
        ids(&["A", "D", "E"])
    );
}

#[tokio::test]
async fn transfer_leaves_exactly_one_owner() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["B"], &["C"]).await;

    let err = fx
        .service
        .transfer_group_owner(
            &ctx("B"),
            TransferGroupOwnerReq {
                group_id: group_id.clone(),
                old_owner_user_id: "A".into(),
                new_owner_user_id: "B".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));

    fx.service
        .transfer_group_owner(
            &ctx("A"),
            TransferGroupOwnerReq {
                group_id: group_id.clone(),
                old_owner_user_id: "A".into(),
                new_owner_user_id: "C".into(),
            },
        )
        .await
        .unwrap();

    let owners = fx
        .store
        .find_group_member_role_levels(&group_id, &[RoleLevel::Owner])
        .await
        .unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].user_id, "C");
    assert_eq!(role(&fx, &group_id, "A").await, RoleLevel::Ordinary);

    // 旧群主现在可以退群，新群主不行
    fx.service
        .quit_group(
            &ctx("A"),
            QuitGroupReq {
                group_id: group_id.clone(),
                user_id: String::new(),
            },
        )
        .await
        .unwrap();
    let err = fx
        .service
        .quit_group(
            &ctx("C"),
            QuitGroupReq {
                group_id: group_id.clone(),
                user_id: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));
}

#[tokio::test]
async fn mute_requires_higher_role_and_reports_update() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B", "C"]).await;
    let v0 = header(&fx, &group_id).await;

    let mute = |op: &'static str| {
        let req = MuteGroupMemberReq {
            group_id: group_id.clone(),
            user_id: "B".into(),
            muted_seconds: 60,
        };
        let service = &fx.service;
        async move { service.mute_group_member(&ctx(op), req).await }
    };

    assert!(matches!(mute("C").await, Err(AppError::Permission(_))));
    mute("A").await.unwrap();

    let member = fx.store.take_group_member(&group_id, "B").await.unwrap();
    assert!(member.is_muted(Utc::now()));

    let resp = incremental(&fx, &group_id, &v0).await;
    assert!(!resp.full);
    assert!(resp.insert.is_empty());
    assert_eq!(resp.update.len(), 1);
    assert_eq!(resp.update[0].user_id, "B");
}

#[tokio::test]
async fn muted_member_cannot_lift_own_mute() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["E"], &["B", "C"]).await;
    fx.service
        .mute_group_member(
            &ctx("A"),
            MuteGroupMemberReq {
                group_id: group_id.clone(),
                user_id: "B".into(),
                muted_seconds: 3600,
            },
        )
        .await
        .unwrap();
    let muted = header(&fx, &group_id).await;

    let cancel = |op: &'static str| {
        let req = CancelMuteGroupMemberReq {
            group_id: group_id.clone(),
            user_id: "B".into(),
        };
        let service = &fx.service;
        async move { service.cancel_mute_group_member(&ctx(op), req).await }
    };

    assert!(matches!(cancel("B").await, Err(AppError::Permission(_))));
    assert!(matches!(cancel("C").await, Err(AppError::Permission(_))));
    let member = fx.store.take_group_member(&group_id, "B").await.unwrap();
    assert!(member.is_muted(Utc::now()));
    assert_eq!(header(&fx, &group_id).await.version, muted.version);

    cancel("E").await.unwrap();
    let member = fx.store.take_group_member(&group_id, "B").await.unwrap();
    assert!(!member.is_muted(Utc::now()));

    let resp = incremental(&fx, &group_id, &muted).await;
    assert!(!resp.full);
    assert!(resp.insert.is_empty());
    assert!(resp.delete.is_empty());
    assert_eq!(resp.update.len(), 1);
    assert_eq!(resp.update[0].user_id, "B");

    fx.service.shutdown().await;
    assert!(fx.messenger.codes().contains(&1513));
}

#[tokio::test]
async fn cancel_mute_group_restores_normal_status() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["B"], &["C"]).await;
    let req = || GroupIdReq {
        group_id: group_id.clone(),
    };

    fx.service.mute_group(&ctx("A"), req()).await.unwrap();
    assert_eq!(fx.store.take_group(&group_id).await.unwrap().status, GroupStatus::Muted);

    let err = fx.service.cancel_mute_group(&ctx("C"), req()).await.unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));
    assert_eq!(fx.store.take_group(&group_id).await.unwrap().status, GroupStatus::Muted);

    let before = header(&fx, &group_id).await;
    fx.service.cancel_mute_group(&ctx("B"), req()).await.unwrap();
    assert_eq!(fx.store.take_group(&group_id).await.unwrap().status, GroupStatus::Normal);

    let resp = incremental(&fx, &group_id, &before).await;
    assert!(!resp.full);
    assert_eq!(
        resp.group.map(|group| group.status),
        Some(GroupStatus::Normal)
    );
}

#[tokio::test]
async fn inviting_existing_member_conflicts_without_version_bump() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B"]).await;
    let before = header(&fx, &group_id).await;

    let err = fx
        .service
        .invite_user_to_group(
            &ctx("A"),
            InviteUserToGroupReq {
                group_id: group_id.clone(),
                invited_user_ids: ids(&["C", "B"]),
                reason: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let after = header(&fx, &group_id).await;
    assert_eq!(after.version, before.version);
    assert!(fx.store.take_group_member(&group_id, "C").await.is_err());
}

#[tokio::test]
async fn application_tip_skips_inviters_outside_the_group() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B"]).await;

    for (applicant, inviter) in [("D", "H"), ("E", "B")] {
        fx.service
            .join_group(
                &ctx(applicant),
                JoinGroupReq {
                    group_id: group_id.clone(),
                    req_message: String::new(),
                    join_source: group_service::group::model::JoinSource::Invitation,
                    inviter_user_id: inviter.into(),
                    ex: String::new(),
                },
            )
            .await
            .unwrap();
    }

    fx.service.shutdown().await;
    let receivers: Vec<Recipient> = fx
        .messenger
        .sent()
        .into_iter()
        .filter(|n| n.content_type == 1503)
        .map(|n| n.recipient)
        .collect();
    assert!(!receivers.contains(&Recipient::User("H".into())));
    assert!(receivers.contains(&Recipient::User("B".into())));
    assert!(receivers.contains(&Recipient::User("A".into())));
}

#[tokio::test]
async fn refusing_an_applicant_who_already_joined_conflicts() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B"]).await;
    fx.service
        .join_group(
            &ctx("D"),
            JoinGroupReq {
                group_id: group_id.clone(),
                req_message: String::new(),
                join_source: group_service::group::model::JoinSource::Search,
                inviter_user_id: String::new(),
                ex: String::new(),
            },
        )
        .await
        .unwrap();
    invite(&fx, "A", &group_id, &["D"]).await;

    let err = fx
        .service
        .group_application_response(
            &ctx("A"),
            GroupApplicationResponseReq {
                group_id: group_id.clone(),
                from_user_id: "D".into(),
                handled_msg: String::new(),
                handle_result: HandleResult::Refused,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn application_can_only_be_handled_once() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B"]).await;

    fx.service
        .join_group(
            &ctx("D"),
            JoinGroupReq {
                group_id: group_id.clone(),
                req_message: "let me in".into(),
                join_source: group_service::group::model::JoinSource::Search,
                inviter_user_id: String::new(),
                ex: String::new(),
            },
        )
        .await
        .unwrap();
    assert!(fx.store.take_group_member(&group_id, "D").await.is_err());

    let respond = GroupApplicationResponseReq {
        group_id: group_id.clone(),
        from_user_id: "D".into(),
        handled_msg: "welcome".into(),
        handle_result: HandleResult::Agreed,
    };
    let err = fx
        .service
        .group_application_response(&ctx("B"), respond.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));

    fx.service
        .group_application_response(&ctx("A"), respond.clone())
        .await
        .unwrap();
    assert_eq!(role(&fx, &group_id, "D").await, RoleLevel::Ordinary);

    let err = fx
        .service
        .group_application_response(&ctx("A"), respond)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Args(_)));

    fx.service.shutdown().await;
    let accepted: Vec<_> = fx
        .messenger
        .sent()
        .into_iter()
        .filter(|n| n.content_type == 1505)
        .collect();
    let receiver_as = |user: &str| {
        accepted
            .iter()
            .find(|n| n.recipient == Recipient::User(user.to_string()))
            .map(|n| n.content["receiver_as"].as_i64())
    };
    assert_eq!(receiver_as("D"), Some(Some(0)));
    assert_eq!(receiver_as("A"), Some(Some(1)));
    assert!(fx.messenger.codes().contains(&1503));
}

#[tokio::test]
async fn invites_by_ordinary_members_need_approval_when_configured() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B", "C"]).await;
    fx.service
        .set_group_info(
            &ctx("A"),
            SetGroupInfoReq {
                group_id: group_id.clone(),
                need_verification: Some(NeedVerification::AllNeedApproval),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    invite(&fx, "B", &group_id, &["D"]).await;
    assert!(fx.store.take_group_member(&group_id, "D").await.is_err());

    let list = fx
        .service
        .get_group_application_list(&ctx("A"), GroupIdReq { group_id: group_id.clone() })
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].user_id, "D");
    assert_eq!(list[0].inviter_user_id, "B");
    assert_eq!(list[0].nickname, "nick-D");

    let err = fx
        .service
        .get_group_application_list(&ctx("C"), GroupIdReq { group_id: group_id.clone() })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));

    // 群主邀请不需要审批
    invite(&fx, "A", &group_id, &["E"]).await;
    assert!(fx.store.take_group_member(&group_id, "E").await.is_ok());
}

#[tokio::test]
async fn role_changes_are_guarded_and_move_sort_version() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["B"], &["C"]).await;
    let v0 = header(&fx, &group_id).await;

    let set_role = |op: &'static str, user: &'static str, level: RoleLevel| {
        let req = SetGroupMemberInfoReq {
            members: vec![MemberInfoPatch {
                group_id: group_id.clone(),
                user_id: user.into(),
                role_level: Some(level),
                ..Default::default()
            }],
        };
        let service = &fx.service;
        async move { service.set_group_member_info(&ctx(op), req).await }
    };

    assert!(matches!(set_role("A", "C", RoleLevel::Owner).await, Err(AppError::Args(_))));
    assert!(matches!(set_role("B", "C", RoleLevel::Admin).await, Err(AppError::Permission(_))));
    assert!(matches!(set_role("B", "B", RoleLevel::Ordinary).await, Err(AppError::Permission(_))));

    set_role("A", "C", RoleLevel::Admin).await.unwrap();
    assert_eq!(role(&fx, &group_id, "C").await, RoleLevel::Admin);

    let resp = incremental(&fx, &group_id, &v0).await;
    assert_eq!(resp.update.len(), 1);
    assert!(resp.sort_version > v0.version);
}

#[tokio::test]
async fn group_info_changes_reach_roster_and_joined_lists() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B"]).await;
    let member_v0 = header(&fx, &group_id).await;
    let join_v0 = fx.store.find_max_join_version("B").await.unwrap();

    fx.service
        .set_group_info(
            &ctx("A"),
            SetGroupInfoReq {
                group_id: group_id.clone(),
                name: Some("renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let other_group = fx.create_group("C", &[], &["B"]).await;

    let roster = incremental(&fx, &group_id, &member_v0).await;
    assert_eq!(roster.changed(), 0);
    assert_eq!(roster.group.map(|g| g.name), Some("renamed".to_string()));

    let joined = fx
        .service
        .get_incremental_join_group(
            &ctx("B"),
            GetIncrementalJoinGroupReq {
                user_id: String::new(),
                version_id: join_v0.version_id,
                version: join_v0.version,
            },
        )
        .await
        .unwrap();
    assert!(!joined.full);
    assert_eq!(joined.update.len(), 1);
    assert_eq!(joined.update[0].name, "renamed");
    assert_eq!(joined.insert.len(), 1);
    assert_eq!(joined.insert[0].group_id, other_group);

    // 只能查询自己的已加入列表
    let err = fx
        .service
        .get_full_join_group_ids(
            &ctx("C"),
            GetFullJoinGroupIdsReq {
                user_id: "B".into(),
                id_hash: 0,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));
    let full = fx
        .service
        .get_full_join_group_ids(
            &ctx("admin"),
            GetFullJoinGroupIdsReq {
                user_id: "B".into(),
                id_hash: 0,
            },
        )
        .await
        .unwrap();
    assert_eq!(full.ids.len(), 2);
}

#[tokio::test]
async fn dismiss_cascades_and_blocks_further_mutation() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B", "C"]).await;
    let join_v0 = fx.store.find_max_join_version("B").await.unwrap();

    let err = fx
        .service
        .dismiss_group(&ctx("B"), GroupIdReq { group_id: group_id.clone() })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));

    fx.service
        .dismiss_group(&ctx("A"), GroupIdReq { group_id: group_id.clone() })
        .await
        .unwrap();
    let group = fx.store.take_group(&group_id).await.unwrap();
    assert_eq!(group.status, GroupStatus::Dismissed);
    assert_eq!(fx.store.count_group_members(&group_id).await.unwrap(), 0);

    let err = fx
        .service
        .invite_user_to_group(
            &ctx("A"),
            InviteUserToGroupReq {
                group_id: group_id.clone(),
                invited_user_ids: ids(&["D"]),
                reason: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    let joined = fx
        .service
        .get_incremental_join_group(
            &ctx("B"),
            GetIncrementalJoinGroupReq {
                user_id: "B".into(),
                version_id: join_v0.version_id,
                version: join_v0.version,
            },
        )
        .await
        .unwrap();
    assert_eq!(joined.delete, vec![group_id.clone()]);

    fx.service.shutdown().await;
    let dismissed: Vec<Recipient> = fx
        .messenger
        .sent()
        .into_iter()
        .filter(|n| n.content_type == 1511)
        .map(|n| n.recipient)
        .collect();
    assert_eq!(dismissed.len(), 3);
    assert!(dismissed.contains(&Recipient::User("C".into())));
}

#[tokio::test]
async fn notification_failures_do_not_fail_operations() {
    let fx = Fixture::with(SyncLimits::default(), RecordingMessenger::failing(), 5000);
    let group_id = fx.create_group("A", &[], &["B", "C"]).await;
    kick(&fx, "A", &group_id, &["C"]).await.unwrap();
    fx.service.shutdown().await;

    assert!(fx.messenger.sent().is_empty());
    assert_eq!(
        fx.store.find_member_user_ids(&group_id).await.unwrap(),
        ids(&["A", "B"])
    );
}

#[tokio::test]
async fn tips_carry_hydrated_members_and_version_pointer() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &[], &["B"]).await;
    kick(&fx, "A", &group_id, &["B"]).await.unwrap();
    fx.service.shutdown().await;

    let sent = fx.messenger.sent();
    let kicked = sent
        .iter()
        .find(|n| n.content_type == 1508)
        .expect("kick notification");
    assert_eq!(kicked.recipient, Recipient::Group(group_id.clone()));
    assert_eq!(kicked.content["op_user"]["nickname"], "nick-A");
    assert_eq!(kicked.content["members"][0]["user_id"], "B");
    assert_eq!(kicked.content["members"][0]["nickname"], "nick-B");
    let current = header(&fx, &group_id).await;
    assert!(kicked.content["group_member_version"].as_u64().unwrap() <= current.version);
    assert!(sent.iter().any(|n| n.content_type == 1501));
}

#[tokio::test]
async fn app_admin_bypasses_roles_but_not_owner_rules() {
    let fx = Fixture::new();
    let group_id = fx.create_group("A", &["B"], &["C"]).await;

    kick(&fx, "admin", &group_id, &["B"]).await.unwrap();
    let err = fx
        .service
        .quit_group(
            &ctx("admin"),
            QuitGroupReq {
                group_id: group_id.clone(),
                user_id: "A".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));
    fx.service
        .mute_group(&ctx("admin"), GroupIdReq { group_id: group_id.clone() })
        .await
        .unwrap();
    assert_eq!(
        fx.store.take_group(&group_id).await.unwrap().status,
        GroupStatus::Muted
    );
}
