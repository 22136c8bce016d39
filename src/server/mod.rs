mod account;
mod admin;
pub mod dto;
mod extract;
pub mod response;
mod router;
pub mod user;
pub mod validation;

pub use account::account_router;
pub use admin::admin_router;
pub use extract::ApiJson;
pub use router::{AppState, create_router};
pub use user::user_router;
