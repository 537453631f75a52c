use std::sync::Arc;

use config::Config;
use group::GroupService;

pub mod cache;
pub mod clients;
pub mod common;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod group;
pub mod middleware;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub groups: Arc<GroupService>,
}
