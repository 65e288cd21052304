//! Upload sessions
//!
//! A session is a directory named after a freshly minted UUID under the
//! configured temp root. The filesystem is the authoritative session store:
//! a session exists iff its directory exists.

pub mod filter;
pub mod locks;
pub mod store;
pub mod writer;

pub use filter::FilenameFilter;
pub use locks::SessionLocks;
pub use store::SessionStore;
pub use writer::{append_fragment, FragmentWrite};

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::BitsError;

/// A BITS session identifier.
///
/// The wire form is a braced lowercase UUID,
/// `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`. Externally supplied ids that
/// deviate from that form (missing braces, wrong length, uppercase hex) are
/// rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mints a fresh v4 session id.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.braced())
    }
}

impl FromStr for SessionId {
    type Err = BitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BitsError::BadRequest(format!("invalid session id: {s:?}"));

        let inner = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(invalid)?;

        // Canonical form only: 36-char hyphenated, lowercase hex.
        if inner.len() != 36 || inner.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid());
        }

        let uuid = Uuid::try_parse(inner).map_err(|_| invalid())?;
        Ok(Self(uuid))
    }
}
