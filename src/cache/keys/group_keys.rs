/// 群成员列表版本头缓存键前缀
const MEMBER_VERSION_PREFIX: &str = "group:member_version:";

/// 用户已加入群列表版本头缓存键前缀
const JOIN_VERSION_PREFIX: &str = "group:join_version:";

/// 群成员ID列表缓存键前缀
const MEMBER_IDS_PREFIX: &str = "group:member_ids:";

/// 生成群成员列表版本头缓存键
pub fn member_version_key(group_id: &str) -> String {
    format!("{}{}", MEMBER_VERSION_PREFIX, group_id)
}

/// 生成已加入群列表版本头缓存键
pub fn join_version_key(user_id: &str) -> String {
    format!("{}{}", JOIN_VERSION_PREFIX, user_id)
}

/// 生成群成员ID列表缓存键
pub fn member_ids_key(group_id: &str) -> String {
    format!("{}{}", MEMBER_IDS_PREFIX, group_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_scope() {
        assert_eq!(member_version_key("g1"), "group:member_version:g1");
        assert_eq!(join_version_key("u1"), "group:join_version:u1");
        assert_ne!(member_ids_key("g1"), member_version_key("g1"));
    }
}
