pub mod activity;
pub mod attendance;
pub mod company;
pub mod dashboard;
pub mod leave;
pub mod payroll;
pub mod requests;
pub mod sessions;
pub mod settings;
pub mod users;
