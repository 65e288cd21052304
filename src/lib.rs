//! BITS Upload Server
//!
//! Implements the server side of the Microsoft BITS (Background Intelligent
//! Transfer Service) upload protocol over HTTP. Clients push files in one or
//! more fragments; the server assembles them under a temporary directory and
//! emits lifecycle events for a surrounding application.
//!
//! # Modules
//!
//! - `protocol`: BITS header vocabulary and Content-Range parsing
//! - `session`: session ids, on-disk session store, filename filter, fragment writer
//! - `routes`: the HTTP endpoint and packet dispatch
//! - `events`: lifecycle event hook

pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::BitsError;
pub use events::{BitsEvent, EventHook};
pub use session::SessionId;
pub use state::AppState;
