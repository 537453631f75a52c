use uuid::Uuid;

/// 一次调用的身份信息，由认证中间件注入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// 操作人
    pub op_user_id: String,
    /// 贯穿日志与通知的操作ID
    pub operation_id: String,
    /// 平台管理员，绕过群内角色检查
    pub is_app_admin: bool,
}

impl RequestContext {
    pub fn new(op_user_id: impl Into<String>, is_app_admin: bool) -> Self {
        Self {
            op_user_id: op_user_id.into(),
            operation_id: Uuid::new_v4().to_string(),
            is_app_admin,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    pub fn is_self(&self, user_id: &str) -> bool {
        self.op_user_id == user_id
    }
}
