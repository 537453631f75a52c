use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::AppState;
use crate::context::RequestContext;
use crate::utils::{error_codes, error_to_api_response, verify_token};

/// 调用方传入的操作ID头
pub const OPERATION_ID_HEADER: &str = "operationID";

/// 校验 Bearer token 并注入 RequestContext
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return unauthorized("missing bearer token");
    };

    let claims = match verify_token(bearer.token(), &state.config) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("token 校验失败: {}", e);
            return unauthorized("invalid token");
        }
    };

    let mut ctx = RequestContext::new(
        claims.sub.clone(),
        state.config.is_app_admin(&claims.sub),
    );
    if let Some(operation_id) = req
        .headers()
        .get(OPERATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        ctx = ctx.with_operation_id(operation_id);
    }

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

fn unauthorized(msg: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        error_to_api_response::<()>(error_codes::AUTH_FAILED, msg.to_string()),
    )
        .into_response()
}
