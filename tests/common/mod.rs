#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use group_service::clients::{Messenger, Notification, UserProfile, UserProfileProvider};
use group_service::context::RequestContext;
use group_service::database::{GroupStore, MemoryGroupStore};
use group_service::error::{AppError, AppResult};
use group_service::group::callback::NoopJoinHook;
use group_service::group::notification::{Dispatcher, NotificationSender};
use group_service::group::types::{CreateGroupReq, GroupInfoInput};
use group_service::group::{GroupService, SyncLimits};

/// 固定的用户资料，只认识构造时给出的用户
pub struct StaticUserProvider {
    profiles: HashMap<String, UserProfile>,
}

impl StaticUserProvider {
    pub fn new(user_ids: &[&str]) -> Self {
        let profiles = user_ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    UserProfile {
                        user_id: id.to_string(),
                        nickname: format!("nick-{}", id),
                        face_url: format!("http://face/{}", id),
                        app_manager_level: 0,
                    },
                )
            })
            .collect();
        Self { profiles }
    }
}

#[async_trait]
impl UserProfileProvider for StaticUserProvider {
    async fn get_users_info(&self, user_ids: &[String]) -> AppResult<Vec<UserProfile>> {
        Ok(user_ids
            .iter()
            .filter_map(|id| self.profiles.get(id).cloned())
            .collect())
    }
}

/// 记录所有投递的通知，可设置为全部失败
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingMessenger {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn codes(&self) -> Vec<i32> {
        self.sent().iter().map(|n| n.content_type).collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_notification(&self, notification: &Notification) -> AppResult<()> {
        if self.fail {
            return Err(AppError::internal("msg service unavailable"));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub const USERS: &[&str] = &["A", "B", "C", "D", "E", "F", "G", "H", "admin"];

pub struct Fixture {
    pub service: GroupService,
    pub store: Arc<MemoryGroupStore>,
    pub messenger: Arc<RecordingMessenger>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(SyncLimits::default(), RecordingMessenger::default(), 5000)
    }

    pub fn with(limits: SyncLimits, messenger: RecordingMessenger, retention: usize) -> Self {
        let store = Arc::new(MemoryGroupStore::new(retention));
        let users = Arc::new(StaticUserProvider::new(USERS));
        let messenger = Arc::new(messenger);
        let dyn_store: Arc<dyn GroupStore> = store.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            dyn_store.clone(),
            users.clone(),
            messenger.clone(),
        ));
        let notifier = Arc::new(NotificationSender::start(64, 2, dispatcher));
        let service = GroupService::new(dyn_store, users, Arc::new(NoopJoinHook), notifier, limits);
        Self {
            service,
            store,
            messenger,
        }
    }

    /// 以 owner 身份建群
    pub async fn create_group(&self, owner: &str, admins: &[&str], members: &[&str]) -> String {
        let req = CreateGroupReq {
            owner_user_id: owner.to_string(),
            admin_user_ids: admins.iter().map(|id| id.to_string()).collect(),
            member_user_ids: members.iter().map(|id| id.to_string()).collect(),
            group_info: GroupInfoInput {
                name: "test group".into(),
                ..Default::default()
            },
        };
        self.service
            .create_group(&ctx(owner), req)
            .await
            .unwrap()
            .group_info
            .group_id
    }
}

pub fn ctx(user_id: &str) -> RequestContext {
    RequestContext::new(user_id, user_id == "admin")
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|id| id.to_string()).collect()
}
