pub mod auth;
pub mod ended_sessions;
pub mod handlers;
pub mod jwt;
pub mod login_id;
pub mod middleware;
pub mod password;
