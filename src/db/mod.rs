mod actor;
mod models;
mod schema;

pub use actor::{DbActorHandle, NewAccount, TokenRotation, spawn};
pub use models::{DbAccount, DbProxyApiKey};
