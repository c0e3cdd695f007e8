pub mod attendance;
pub mod compensatory;
pub mod role;
pub mod session;
pub mod user;
pub mod vacation;
