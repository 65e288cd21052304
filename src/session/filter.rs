//! Filename filter
//!
//! Ordered deny/allow regex lists applied to the filename component of the
//! request URI. Deny is evaluated first and always wins; after that, at
//! least one allow pattern must match. Patterns are compiled once at
//! startup, so a bad pattern is a configuration error rather than a
//! per-request failure.

use regex::Regex;

use crate::error::BitsError;

#[derive(Debug, Clone)]
pub struct FilenameFilter {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl FilenameFilter {
    /// Compiles the configured pattern lists.
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            allow: allow.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
            deny: deny.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
        })
    }

    /// Checks a filename against the deny list, then the allow list.
    pub fn check(&self, filename: &str) -> Result<(), BitsError> {
        if let Some(pattern) = self.deny.iter().find(|re| re.is_match(filename)) {
            return Err(BitsError::BadRequest(format!(
                "filename {filename:?} denied by {:?}",
                pattern.as_str()
            )));
        }

        if self.allow.iter().any(|re| re.is_match(filename)) {
            Ok(())
        } else {
            Err(BitsError::BadRequest(format!(
                "filename {filename:?} matched no allow pattern"
            )))
        }
    }
}
