// ID 集合指纹
// 排序后序列化为 JSON，取 sha256 前 8 字节（大端）作为 u64，空集合为 0。

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::MemberInfo;

/// ID 集合的指纹，与输入顺序无关
pub fn id_hash(ids: &[String]) -> u64 {
    if ids.is_empty() {
        return 0;
    }
    let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    digest(&sorted)
}

/// 成员列表指纹，包含成员字段但不包含平台管理员等级
pub fn member_hash(members: &[MemberInfo]) -> u64 {
    if members.is_empty() {
        return 0;
    }
    let mut sorted: Vec<MemberInfo> = members
        .iter()
        .map(|member| MemberInfo {
            app_manager_level: 0,
            ..member.clone()
        })
        .collect();
    sorted.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    digest(&sorted)
}

fn digest<T: Serialize + ?Sized>(value: &T) -> u64 {
    // Vec<&str> 与成员视图的序列化不会失败
    let data = serde_json::to_vec(value).unwrap_or_default();
    let sum = Sha256::digest(&data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&sum[..8]);
    u64::from_be_bytes(head)
}
