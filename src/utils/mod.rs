pub mod client_ip;
pub mod db_utils;
pub mod email_cache;
pub mod email_filter;
pub mod rate_limiter;
pub mod session_cache;
