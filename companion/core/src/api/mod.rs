//! REST Backend
//!
//! Request/response collaborators of the chat core:
//! - [`AuthApi`]: credential issuance (login, profile lookup, registration)
//! - [`GroupChatApi`]: snapshot, send and edit for the family conversation
//! - [`AssistantApi`]: conversation management and batched sends for the
//!   assistant surface
//!
//! [`HttpApiClient`] implements all three over `reqwest`. Authentication
//! failures surface as [`ApiError::Unauthorized`]; what to do about them is
//! the caller's decision.

pub mod error;
pub mod http;
pub mod traits;

pub use error::{ApiError, ApiResult};
pub use http::HttpApiClient;
pub use traits::{
    AssistantApi, AssistantReply, AuthApi, GroupChatApi, LoginGrant, Profile, Registration,
};
