pub mod backup;
pub mod email;
pub mod sessions;
pub mod storage;
