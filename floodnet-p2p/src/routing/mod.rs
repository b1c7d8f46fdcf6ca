//! Flood routing.
//!
//! Every decoded message goes through [`RoutingEngine::route`] on the reader
//! task of the connection it arrived on:
//!
//! - The TTL is decremented once, whatever happens next.
//! - A Response for a search this node originated is reported to the
//!   operator and goes no further. Any other Response is relayed to every
//!   connection except the one it came from.
//! - A Search is relayed to every connection except the one it came from
//!   and, independently, answered over the same connection when local files
//!   match or when it is an empty probe.
//!
//! Relayed copies are queued regardless of TTL; writers drop what has no hop
//! budget left. Searches are not deduplicated, so a search that loops back
//! through the mesh is relayed again until its TTL runs out.

pub mod ledger;
pub mod report;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::P2pConfig;
use crate::error::P2pResult;
use crate::files::FileIndex;
use crate::manager::ConnectionRegistry;
use crate::peer::ConnectionId;
use crate::protocol::{Header, Message, MessageId, Response, Search};

pub use ledger::LocalSearchLedger;
pub use report::SearchReport;

/// What routing did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Answer to a local search, handed to the operator.
    Delivered,
    /// Transit Response queued to this many connections.
    Relayed { destinations: usize },
    /// Search queued to this many connections, and whether it was answered.
    Flooded { destinations: usize, answered: bool },
}

/// Shared routing state and policy.
#[derive(Debug)]
pub struct RoutingEngine {
    config: Arc<P2pConfig>,
    registry: Arc<ConnectionRegistry>,
    ledger: Arc<LocalSearchLedger>,
    files: Arc<FileIndex>,
    report_tx: mpsc::UnboundedSender<SearchReport>,
}

impl RoutingEngine {
    /// Create an engine with an empty registry and ledger.
    pub fn new(
        config: Arc<P2pConfig>,
        files: Arc<FileIndex>,
        report_tx: mpsc::UnboundedSender<SearchReport>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            ledger: Arc::new(LocalSearchLedger::new()),
            files,
            report_tx,
        }
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Searches originated by this node.
    pub fn ledger(&self) -> &Arc<LocalSearchLedger> {
        &self.ledger
    }

    /// Shared files.
    pub fn files(&self) -> &Arc<FileIndex> {
        &self.files
    }

    /// Node configuration.
    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    /// Route one message received on connection `from`.
    pub async fn route(&self, from: ConnectionId, mut message: Message) -> RouteOutcome {
        message.decrement_ttl();

        match message {
            Message::Response(response) => self.route_response(from, response).await,
            Message::Search(search) => self.route_search(from, search).await,
        }
    }

    async fn route_response(&self, from: ConnectionId, response: Response) -> RouteOutcome {
        let id = *response.header().id();

        if self.ledger.is_originated(&id).await {
            let query = match self.ledger.query_text(&id).await {
                Some(query) => query,
                None => id.to_string(),
            };
            tracing::debug!(conn = %from, id = %id, results = response.results().len(), "Response for local search");
            if self.report_tx.send(SearchReport::new(query, response)).is_err() {
                tracing::info!(id = %id, "Search report dropped, nobody is listening");
            }
            return RouteOutcome::Delivered;
        }

        let destinations = self
            .registry
            .broadcast_except(Message::Response(response), from)
            .await;
        tracing::debug!(conn = %from, id = %id, destinations, "Relayed response");
        RouteOutcome::Relayed { destinations }
    }

    async fn route_search(&self, from: ConnectionId, search: Search) -> RouteOutcome {
        let destinations = self
            .registry
            .broadcast_except(Message::Search(search.clone()), from)
            .await;
        tracing::debug!(conn = %from, id = %search.header().id(), ttl = search.header().ttl(), destinations, "Flooded search");

        let answered = match self.answer(&search).await {
            Ok(Some(response)) => match self.registry.send_to(from, Message::Response(response)).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(conn = %from, error = %e, "Could not answer search");
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(conn = %from, error = %e, "Local match failed");
                false
            }
        };

        RouteOutcome::Flooded { destinations, answered }
    }

    /// Build this node's answer to a Search, if it has one.
    ///
    /// An empty query is a probe and is always answered, with no results.
    /// Otherwise there is an answer only when at least one file matches.
    pub async fn answer(&self, search: &Search) -> P2pResult<Option<Response>> {
        let header = Header::new(
            *search.header().id(),
            self.config.response_ttl,
            self.config.routing_service,
        );
        let mut response = Response::new(header, self.config.download_addr)?;

        if search.is_probe() {
            return Ok(Some(response));
        }

        let matches = self.files.matches(search.query()).await?;
        if matches.is_empty() {
            return Ok(None);
        }

        let total = matches.len();
        for result in matches {
            if let Err(e) = response.add_result(result) {
                tracing::warn!(
                    query = search.query(),
                    included = response.results().len(),
                    total,
                    error = %e,
                    "Response full, dropping remaining matches"
                );
                break;
            }
        }
        Ok(Some(response))
    }

    /// Start a search from this node. Returns its ID and how many
    /// connections it was queued to.
    pub async fn originate(&self, query: &str) -> P2pResult<(MessageId, usize)> {
        let id = MessageId::random();
        let header = Header::new(id, self.config.initial_ttl, self.config.routing_service);
        let search = Search::new(header, query)?;

        // Recorded first so a fast answer from a neighbour is recognized
        self.ledger.originate(id, query).await;

        let destinations = self.registry.broadcast(Message::Search(search)).await;
        tracing::info!(id = %id, query, destinations, "Started search");
        Ok((id, destinations))
    }
}
