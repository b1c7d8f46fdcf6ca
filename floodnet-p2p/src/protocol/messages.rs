//! Search overlay protocol messages.
//!
//! Two message kinds share a common header: `Search` floods a query string
//! across the mesh and `Response` carries a download host plus the matching
//! files back. Every constructor validates its input, so a value of these
//! types always encodes to a well-formed frame.

use std::fmt;
use std::net::{SocketAddr, SocketAddrV4};
use std::str::FromStr;

use rand::RngCore;

use crate::error::{P2pError, P2pResult};

/// Length of a message identifier in bytes.
pub const MESSAGE_ID_LEN: usize = 15;

/// Length of a compact file identifier in bytes.
pub const FILE_ID_LEN: usize = 4;

/// Largest value the 2-byte payload length field can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Largest value the 1-byte match count field can carry.
pub const MAX_RESULTS: usize = u8::MAX as usize;

/// Match count, port and IPv4 address preceding the result records.
pub const RESPONSE_FIXED_LEN: usize = 7;

/// File ID and file size preceding each result name.
pub const RESULT_FIXED_LEN: usize = 8;

/// Whether a byte belongs to the `[A-Za-z0-9_.-]` token class.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')
}

/// Validate a TTL given as a wider integer.
///
/// The wire field is a single unsigned byte; anything outside `0..=255`
/// is rejected naming `ttl`.
pub fn checked_ttl(value: i64) -> P2pResult<u8> {
    u8::try_from(value)
        .map_err(|_| P2pError::invalid("ttl", format!("{} is outside 0..=255", value)))
}

/// Message type code carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Search,
    Response,
}

impl MessageType {
    /// Wire code for this message type.
    pub fn code(self) -> u8 {
        match self {
            MessageType::Search => 1,
            MessageType::Response => 2,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> P2pResult<Self> {
        match code {
            1 => Ok(MessageType::Search),
            2 => Ok(MessageType::Response),
            other => Err(P2pError::invalid("msgType", format!("unknown type code {}", other))),
        }
    }
}

/// Routing discipline tag.
///
/// Carried on every message for protocol compatibility. The engine floods
/// both kinds identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoutingService {
    #[default]
    BreadthFirst,
    DepthFirst,
}

impl RoutingService {
    /// Wire code for this routing service.
    pub fn code(self) -> u8 {
        match self {
            RoutingService::BreadthFirst => 0,
            RoutingService::DepthFirst => 1,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> P2pResult<Self> {
        match code {
            0 => Ok(RoutingService::BreadthFirst),
            1 => Ok(RoutingService::DepthFirst),
            other => Err(P2pError::invalid(
                "routingService",
                format!("unknown routing code {}", other),
            )),
        }
    }
}

impl fmt::Display for RoutingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingService::BreadthFirst => write!(f, "BREADTHFIRST"),
            RoutingService::DepthFirst => write!(f, "DEPTHFIRST"),
        }
    }
}

impl FromStr for RoutingService {
    type Err = P2pError;

    fn from_str(s: &str) -> P2pResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "breadth-first" | "breadthfirst" | "0" => Ok(RoutingService::BreadthFirst),
            "depth-first" | "depthfirst" | "1" => Ok(RoutingService::DepthFirst),
            _ => Err(P2pError::invalid(
                "routingService",
                format!("expected breadth-first or depth-first, got {:?}", s),
            )),
        }
    }
}

/// 15-byte identifier of a logical query, unchanged across every hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    /// Create an ID from raw bytes.
    pub fn new(bytes: [u8; MESSAGE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random ID.
    pub fn random() -> Self {
        let mut bytes = [0u8; MESSAGE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw ID bytes.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.0
    }
}

impl From<[u8; MESSAGE_ID_LEN]> for MessageId {
    fn from(bytes: [u8; MESSAGE_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for MessageId {
    type Error = P2pError;

    fn try_from(bytes: &[u8]) -> P2pResult<Self> {
        let array: [u8; MESSAGE_ID_LEN] = bytes.try_into().map_err(|_| {
            P2pError::invalid(
                "msgID",
                format!("expected {} bytes, got {}", MESSAGE_ID_LEN, bytes.len()),
            )
        })?;
        Ok(Self(array))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// Compact file identifier, unique only within the advertising node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId([u8; FILE_ID_LEN]);

impl FileId {
    /// Create a file ID from raw bytes.
    pub fn new(bytes: [u8; FILE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a random file ID.
    pub fn random() -> Self {
        let mut bytes = [0u8; FILE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw ID bytes.
    pub fn as_bytes(&self) -> &[u8; FILE_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// Parses the 8 hex character form used by the download side-channel.
impl FromStr for FileId {
    type Err = P2pError;

    fn from_str(s: &str) -> P2pResult<Self> {
        if s.len() != FILE_ID_LEN * 2 {
            return Err(P2pError::invalid(
                "fileID",
                format!("expected {} hex characters, got {:?}", FILE_ID_LEN * 2, s),
            ));
        }
        let bytes = hex::decode(s)
            .map_err(|e| P2pError::invalid("fileID", format!("{:?}: {}", s, e)))?;
        let mut id = [0u8; FILE_ID_LEN];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

/// Fields shared by every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    id: MessageId,
    ttl: u8,
    routing: RoutingService,
}

impl Header {
    /// Create a header.
    pub fn new(id: MessageId, ttl: u8, routing: RoutingService) -> Self {
        Self { id, ttl, routing }
    }

    /// Message identifier.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Remaining hop budget.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Routing service tag.
    pub fn routing(&self) -> RoutingService {
        self.routing
    }

    /// Spend one hop. A TTL already at zero stays at zero.
    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID={} TTL={} Routing={}", self.id, self.ttl, self.routing)
    }
}

/// Flooded query for file names containing a substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    header: Header,
    query: String,
}

impl Search {
    /// Create a search. The query may be empty (a presence probe).
    pub fn new(header: Header, query: impl Into<String>) -> P2pResult<Self> {
        let query = query.into();
        if query.len() > MAX_PAYLOAD_LEN {
            return Err(P2pError::invalid(
                "searchString",
                format!("{} bytes exceeds {}", query.len(), MAX_PAYLOAD_LEN),
            ));
        }
        if let Some(bad) = query.bytes().find(|b| !is_token_byte(*b)) {
            return Err(P2pError::invalid(
                "searchString",
                format!("byte 0x{:02X} is outside [A-Za-z0-9_.-]", bad),
            ));
        }
        Ok(Self { header, query })
    }

    /// Common header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Search string.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Whether this is the empty "identify yourself" probe.
    pub fn is_probe(&self) -> bool {
        self.query.is_empty()
    }

    /// Encoded payload length.
    pub fn payload_len(&self) -> usize {
        self.query.len()
    }
}

impl fmt::Display for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Search: {} Search={}", self.header, self.query)
    }
}

/// One file match inside a Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    file_id: FileId,
    file_size: u32,
    file_name: String,
}

impl FileResult {
    /// Create a result. The name must be a non-empty `[A-Za-z0-9_.-]+` token.
    pub fn new(file_id: FileId, file_size: u32, file_name: impl Into<String>) -> P2pResult<Self> {
        let file_name = file_name.into();
        if file_name.is_empty() {
            return Err(P2pError::invalid("fileName", "empty"));
        }
        if let Some(bad) = file_name.bytes().find(|b| !is_token_byte(*b)) {
            return Err(P2pError::invalid(
                "fileName",
                format!("byte 0x{:02X} is outside [A-Za-z0-9_.-]", bad),
            ));
        }
        Ok(Self {
            file_id,
            file_size,
            file_name,
        })
    }

    /// File identifier.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// File size in bytes.
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// File name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Encoded size: ID, size, name and the line-feed delimiter.
    pub fn encoded_len(&self) -> usize {
        RESULT_FIXED_LEN + self.file_name.len() + 1
    }
}

impl fmt::Display for FileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Result: FileID={} FileSize={} bytes FileName={}",
            self.file_id, self.file_size, self.file_name
        )
    }
}

/// Download host plus the files that matched a Search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    header: Header,
    host: SocketAddrV4,
    results: Vec<FileResult>,
}

impl Response {
    /// Create a response with no results. Multicast hosts are rejected.
    pub fn new(header: Header, host: SocketAddrV4) -> P2pResult<Self> {
        if host.ip().is_multicast() {
            return Err(P2pError::invalid(
                "responseHost",
                format!("{} is a multicast address", host.ip()),
            ));
        }
        Ok(Self {
            header,
            host,
            results: Vec::new(),
        })
    }

    /// Create a response from any socket address; IPv6 hosts are rejected.
    pub fn from_socket_addr(header: Header, host: SocketAddr) -> P2pResult<Self> {
        match host {
            SocketAddr::V4(v4) => Self::new(header, v4),
            SocketAddr::V6(v6) => Err(P2pError::invalid(
                "responseHost",
                format!("{} is not a 4-octet IPv4 address", v6),
            )),
        }
    }

    /// Append a result, refusing to overflow the count or payload length fields.
    pub fn add_result(&mut self, result: FileResult) -> P2pResult<()> {
        if self.results.len() >= MAX_RESULTS {
            return Err(P2pError::TooManyResults { max: MAX_RESULTS });
        }
        let size = self.payload_len() + result.encoded_len();
        if size > MAX_PAYLOAD_LEN {
            return Err(P2pError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD_LEN,
            });
        }
        self.results.push(result);
        Ok(())
    }

    /// Common header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Where matched files can be downloaded.
    pub fn host(&self) -> SocketAddrV4 {
        self.host
    }

    /// Results in insertion order.
    pub fn results(&self) -> &[FileResult] {
        &self.results
    }

    /// Encoded payload length.
    pub fn payload_len(&self) -> usize {
        RESPONSE_FIXED_LEN + self.results.iter().map(FileResult::encoded_len).sum::<usize>()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response: {} Host={} [", self.header, self.host)?;
        for (i, result) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", result)?;
        }
        write!(f, "]")
    }
}

/// All protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Flooded query.
    Search(Search),
    /// Answer carrying matches.
    Response(Response),
}

impl Message {
    /// Get a human-readable name for the message type.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Search(_) => "search",
            Message::Response(_) => "response",
        }
    }

    /// Wire type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Search(_) => MessageType::Search,
            Message::Response(_) => MessageType::Response,
        }
    }

    /// Common header.
    pub fn header(&self) -> &Header {
        match self {
            Message::Search(s) => &s.header,
            Message::Response(r) => &r.header,
        }
    }

    /// Message identifier.
    pub fn id(&self) -> &MessageId {
        self.header().id()
    }

    /// Remaining hop budget.
    pub fn ttl(&self) -> u8 {
        self.header().ttl()
    }

    /// Spend one hop.
    pub fn decrement_ttl(&mut self) {
        match self {
            Message::Search(s) => s.header.decrement_ttl(),
            Message::Response(r) => r.header.decrement_ttl(),
        }
    }

    /// Encoded payload length.
    pub fn payload_len(&self) -> usize {
        match self {
            Message::Search(s) => s.payload_len(),
            Message::Response(r) => r.payload_len(),
        }
    }
}

impl From<Search> for Message {
    fn from(search: Search) -> Self {
        Message::Search(search)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Search(s) => fmt::Display::fmt(s, f),
            Message::Response(r) => fmt::Display::fmt(r, f),
        }
    }
}
