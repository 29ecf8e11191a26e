//! Everything that speaks the venue's dialect: wire frames, request
//! signing, and the WebSocket session.

pub mod auth;
pub mod protocol;
pub mod session;

pub use auth::Credentials;
pub use session::{ExchangeSession, Transport};
