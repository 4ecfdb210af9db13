//! scx-session -- session and token lifecycle for the SupplyChainX API.
//!
//! Signs users in against the `/auth/*` endpoints, keeps the access and
//! refresh tokens in tiered storage, renews them proactively and on 401
//! (single-flight), and gates routes by role.

pub mod config;
pub mod error;
pub mod gate;
pub mod models;
pub mod navigation;
pub mod net;
pub mod session;
pub mod store;
pub mod token;

pub use config::Config;
pub use error::{ErrorKind, RequestError, SessionError};
pub use gate::{AccessGate, GateOutcome, RouteTable};
pub use models::{Credential, Role, UserProfile};
pub use navigation::{Navigation, Navigator};
pub use net::{ApiClient, ApiRequest, ApiResponse, HttpTransport};
pub use session::{Phase, Session, SessionController, SessionState};
pub use store::{CredentialStore, KeyValueStore};
