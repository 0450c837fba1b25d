pub mod activity_log;
pub mod attendance;
pub mod company;
pub mod leave;
pub mod payroll;
pub mod role;
pub mod user;
pub mod user_request;
pub mod user_session;
pub mod work_settings;
