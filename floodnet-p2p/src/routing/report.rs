//! Search results presented to the operator.

use std::fmt;

use crate::protocol::Response;

/// A Response that answered one of this node's own searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    /// Query text the search was sent with.
    pub query: String,
    /// The Response as received (after this hop's TTL decrement).
    pub response: Response,
}

impl SearchReport {
    /// Create a report.
    pub fn new(query: impl Into<String>, response: Response) -> Self {
        Self {
            query: query.into(),
            response,
        }
    }
}

impl fmt::Display for SearchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Search response for {}:", self.query)?;
        write!(f, "Download host: {}", self.response.host())?;
        for result in self.response.results() {
            write!(
                f,
                "\n      {}: ID {} ({} bytes)",
                result.file_name(),
                result.file_id(),
                result.file_size()
            )?;
        }
        Ok(())
    }
}
