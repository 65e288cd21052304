//! BITS protocol vocabulary
//!
//! Header names, packet types, and the Content-Range grammar used by the
//! upload protocol. Parsing lives here; the state machine in `routes::bits`
//! consumes these types.

pub mod headers;

pub use headers::{
    ContentRange, PacketType, parse_content_length, parse_content_range, supported_protocols,
};

/// Default BITS upload protocol GUID announced by Windows clients.
pub const BITS_PROTOCOL_GUID: &str = "{7df0354d-249b-430f-820d-3d2a9bef4931}";

/// Default HTTP method used by BITS upload requests.
pub const BITS_METHOD: &str = "BITS_POST";
