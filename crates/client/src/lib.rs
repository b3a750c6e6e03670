//! REST side of the engage client: session state, the request gateway and
//! the auth calls built on it.

pub mod auth;
pub mod error;
pub mod gateway;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod session;
pub mod store;

pub use {
    auth::LoginResponse,
    error::{ApiError, Error, Failure, Result, UNREACHABLE_MESSAGE, classify},
    gateway::{ApiClient, Navigator, RequestOptions},
    session::{Credential, SessionContext, User},
    store::SessionStore,
};
