//! Client side of the remote season service.
//!
//! `transport` is the wire seam, `session` layers credential handling and the single
//! refresh-and-replay on top of it, and `season` exposes the typed endpoints.

mod credentials;
mod error;
mod season;
mod session;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

#[cfg(test)]
pub(crate) use credentials::MemoryTokenStore;
pub use credentials::{Credentials, TokenStore};
pub use error::ApiError;
pub use season::SeasonClient;
pub use session::SessionManager;
pub use transport::HttpTransport;
