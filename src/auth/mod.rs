mod helpers;
mod middleware;
mod password;
mod rate_limit;
mod token;

pub use helpers::API_KEY_HEADER;
pub use middleware::{RequireAdmin, RequireSession, RequireUser};
pub use password::{hash_password, verify_password};
pub use rate_limit::RateLimiter;
pub use token::{TokenGenerator, TokenKind, parse_token};
