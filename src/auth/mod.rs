//! Authentication against the Caido instance.
//!
//! The OAuth device flow is started over GraphQL and completed asynchronously by a
//! WebSocket subscription. The resulting credential is persisted per instance and
//! refreshed ahead of expiry before forwarded tool calls.

pub mod credential;
pub mod device_flow;
pub mod refresh;
pub mod session;
pub mod store;
pub mod subscription;

pub use credential::{AuthToken, AuthenticationRequest, Credential, PendingAuthRequest};
pub use session::{AuthCheck, AuthSession, TokenStatus};
pub use store::TokenStore;
pub use subscription::{AuthEvent, AuthEventKind, SubscriptionRequest, TokenSubscriber, WsTokenSubscriber};
