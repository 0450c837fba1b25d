pub mod db_utils;
pub mod email_index;
pub mod pagination;
pub mod session_reaper;
pub mod warmup;
