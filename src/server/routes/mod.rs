pub(crate) mod accounts;
pub(crate) mod chat;
pub(crate) mod messages;
pub(crate) mod models;
pub(crate) mod oauth_flow;
