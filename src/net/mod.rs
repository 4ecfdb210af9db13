//! HTTP plumbing: transport, auth endpoints and the interception chain.

pub mod auth_api;
pub mod chain;
pub mod transport;

pub use auth_api::{AuthApi, AuthPaths};
pub use chain::{
    ApiClient, AuthInjector, ErrorNormalizer, InterceptionChain, Middleware, Next,
    RefreshOnUnauthorized,
};
pub use transport::{ApiRequest, ApiResponse, HttpTransport};
