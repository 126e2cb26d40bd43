//! Credentials for the remote music service
//!
//! Two tokens are needed: a service token shared by every user of this app
//! instance (issued by a trusted backend) and a per-user token obtained
//! through the platform's media authorization flow.

mod authorization;
mod token_authority;

pub use authorization::{AuthorizationStatus, MediaAuthorization};
pub use token_authority::{AuthError, TokenAuthority, USER_TOKEN_RETRY_LIMIT};
