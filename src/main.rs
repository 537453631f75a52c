use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use group_service::{
    AppState,
    cache::VersionCache,
    clients::{HttpMessenger, HttpUserClient, Messenger, UserProfileProvider},
    config::Config,
    database::{GroupStore, PgGroupStore},
    group::{
        GroupService, SyncLimits,
        callback::{MemberJoinHook, NoopJoinHook, WebhookJoinHook},
        notification::{Dispatcher, NotificationSender},
    },
    middleware::{auth_middleware, log_errors},
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'group_service';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // Redis 版本缓存
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let cache = VersionCache::new(Arc::new(redis_client), config.cache_expire_secs);

    let pg_store = PgGroupStore::new(pool, Some(cache), config.version_log_retention);
    pg_store.migrate().await.expect("Failed to run migrations");
    let store: Arc<dyn GroupStore> = Arc::new(pg_store);

    // 外部服务
    let users: Arc<dyn UserProfileProvider> = Arc::new(
        HttpUserClient::new(&config.user_service_url, config.request_timeout())
            .expect("Failed to build user client"),
    );
    let messenger: Arc<dyn Messenger> = Arc::new(
        HttpMessenger::new(&config.msg_service_url, config.request_timeout())
            .expect("Failed to build msg client"),
    );
    let hook: Arc<dyn MemberJoinHook> = match &config.callback_url {
        Some(url) => {
            tracing::info!("before member join callback enabled: {}", url);
            Arc::new(
                WebhookJoinHook::new(url.clone(), config.callback_timeout())
                    .expect("Failed to build callback client"),
            )
        }
        None => Arc::new(NoopJoinHook),
    };

    // 通知队列
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), users.clone(), messenger));
    let notifier = Arc::new(NotificationSender::start(
        config.notification_queue_capacity,
        config.notification_workers,
        dispatcher,
    ));

    let groups = Arc::new(GroupService::new(
        store,
        users,
        hook,
        notifier,
        SyncLimits {
            sync_limit: config.sync_limit,
            batch_ceiling: config.batch_sync_ceiling,
        },
    ));

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        groups: groups.clone(),
    };

    let protected_routes = Router::new()
        .nest("/group", routes::group::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let router = Router::new()
        .nest(&config.api_base_uri, protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.request_timeout()))
                .layer(axum::middleware::from_fn(log_errors)),
        );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    let app = router.with_state(state);

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app,
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // 服务停止后把队列中的通知发完
    groups.shutdown().await;
    tracing::info!("server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
