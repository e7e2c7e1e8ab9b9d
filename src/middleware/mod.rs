pub mod user;

pub use user::{require_user, UserId, USER_HEADER};
