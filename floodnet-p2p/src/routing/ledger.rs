//! Local search ledger.
//!
//! Remembers which search IDs this node originated, so a returning Response
//! is shown to the user instead of relayed, and which query text went out
//! under each search ID, so results can be labelled. Entries never expire.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::protocol::MessageId;

#[derive(Debug, Default)]
struct LedgerState {
    originated: HashSet<MessageId>,
    query_text: HashMap<MessageId, String>,
}

/// Searches originated here and the text sent under each search ID.
#[derive(Debug, Default)]
pub struct LocalSearchLedger {
    state: Mutex<LedgerState>,
}

impl LocalSearchLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a search this node initiated.
    pub async fn originate(&self, id: MessageId, query: &str) {
        let mut state = self.state.lock().await;
        state.originated.insert(id);
        state.query_text.insert(id, query.to_string());
    }

    /// Check whether a message ID belongs to a search this node initiated.
    pub async fn is_originated(&self, id: &MessageId) -> bool {
        self.state.lock().await.originated.contains(id)
    }

    /// Record the text of a Search as it was transmitted. Relays overwrite
    /// any earlier entry; the text is identical on every hop.
    pub async fn record_query_text(&self, id: MessageId, query: &str) {
        self.state
            .lock()
            .await
            .query_text
            .insert(id, query.to_string());
    }

    /// Query text last transmitted under an ID.
    pub async fn query_text(&self, id: &MessageId) -> Option<String> {
        self.state.lock().await.query_text.get(id).cloned()
    }

    /// Number of searches originated here.
    pub async fn originated_count(&self) -> usize {
        self.state.lock().await.originated.len()
    }
}
