//! Wire codec for search overlay messages.
//!
//! Every frame starts with a 20-byte header:
//! - 1 byte: message type (1 = Search, 2 = Response)
//! - 15 bytes: message ID
//! - 1 byte: TTL
//! - 1 byte: routing service code
//! - 2 bytes: big-endian payload length
//!
//! A Search payload is exactly `payload length` bytes of query string. A
//! Response payload is a match count, port and IPv4 address followed by
//! `match count` records of `[fileID:4][fileSize:4][name]['\n']`; its extent
//! is found by walking the records, and the declared length is then checked
//! against what was actually carried.
//!
//! The decoder yields `Ok(Some(Err(_)))` for a frame that was consumed whole
//! but failed validation: the stream is still aligned and the caller can keep
//! reading. A returned `Err(_)` means the stream can no longer be trusted.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{P2pError, P2pResult};
use crate::protocol::messages::{
    FileId, FileResult, Header, Message, MessageId, MessageType, Response, RoutingService,
    Search, FILE_ID_LEN, MAX_PAYLOAD_LEN, MESSAGE_ID_LEN, RESPONSE_FIXED_LEN, RESULT_FIXED_LEN,
};

/// Header size: type, ID, TTL, routing service and payload length.
pub const HEADER_SIZE: usize = 1 + MESSAGE_ID_LEN + 1 + 1 + 2;

/// Largest frame a valid message can occupy.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_LEN;

const TTL_OFFSET: usize = 1 + MESSAGE_ID_LEN;
const ROUTING_OFFSET: usize = TTL_OFFSET + 1;
const LENGTH_OFFSET: usize = ROUTING_OFFSET + 1;

/// Write `value` as a `width`-byte big-endian unsigned integer.
pub(crate) fn put_uint(dst: &mut BytesMut, value: u64, width: usize) {
    for i in (0..width).rev() {
        dst.put_u8((value >> (8 * i)) as u8);
    }
}

/// Read a big-endian unsigned integer spanning all of `src`.
pub(crate) fn get_uint(src: &[u8]) -> u64 {
    src.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Codec for search overlay frames.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Total length of the current frame (once it is known).
    current_length: Option<usize>,
}

impl MessageCodec {
    /// Create a new message codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
        }
    }
}

/// Determine how many bytes the frame at the front of `src` occupies.
///
/// Returns `Ok(None)` until enough bytes are buffered to tell.
fn frame_length(src: &[u8]) -> P2pResult<Option<usize>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let declared = get_uint(&src[LENGTH_OFFSET..HEADER_SIZE]) as usize;
    if src[0] != MessageType::Response.code() {
        return Ok(Some(HEADER_SIZE + declared));
    }

    let records_start = HEADER_SIZE + RESPONSE_FIXED_LEN;
    if src.len() < records_start {
        return Ok(None);
    }

    let count = src[HEADER_SIZE] as usize;
    let mut pos = records_start;
    for _ in 0..count {
        let name_start = pos + RESULT_FIXED_LEN;
        let newline = src
            .get(name_start..)
            .and_then(|rest| rest.iter().position(|b| *b == b'\n'));
        match newline {
            Some(offset) => pos = name_start + offset + 1,
            None => {
                if src.len() > MAX_FRAME_SIZE {
                    return Err(P2pError::FrameOverrun {
                        limit: MAX_FRAME_SIZE,
                    });
                }
                return Ok(None);
            }
        }
        if pos > MAX_FRAME_SIZE {
            return Err(P2pError::FrameOverrun {
                limit: MAX_FRAME_SIZE,
            });
        }
    }

    Ok(Some(pos))
}

/// Parse one complete frame.
fn parse_frame(frame: &[u8]) -> P2pResult<Message> {
    let message_type = MessageType::from_code(frame[0])?;
    let id = MessageId::try_from(&frame[1..TTL_OFFSET])?;
    let ttl = frame[TTL_OFFSET];
    let routing = RoutingService::from_code(frame[ROUTING_OFFSET])?;
    let declared = get_uint(&frame[LENGTH_OFFSET..HEADER_SIZE]) as usize;
    let header = Header::new(id, ttl, routing);
    let payload = &frame[HEADER_SIZE..];

    match message_type {
        MessageType::Search => {
            let query = std::str::from_utf8(payload)
                .map_err(|_| P2pError::invalid("searchString", "not ASCII"))?;
            Ok(Message::Search(Search::new(header, query)?))
        }
        MessageType::Response => {
            let response = parse_response(header, payload)?;
            let actual = response.payload_len();
            if declared != actual {
                return Err(P2pError::invalid(
                    "payloadLen",
                    format!("declared {} bytes but the response carries {}", declared, actual),
                ));
            }
            Ok(Message::Response(response))
        }
    }
}

/// Parse a Response payload whose record extent has already been established.
fn parse_response(header: Header, payload: &[u8]) -> P2pResult<Response> {
    let count = payload[0] as usize;
    let port = get_uint(&payload[1..3]) as u16;
    let ip = Ipv4Addr::new(payload[3], payload[4], payload[5], payload[6]);
    let mut response = Response::new(header, SocketAddrV4::new(ip, port))?;

    let mut pos = RESPONSE_FIXED_LEN;
    for _ in 0..count {
        let mut file_id = [0u8; FILE_ID_LEN];
        file_id.copy_from_slice(&payload[pos..pos + FILE_ID_LEN]);
        let file_size = get_uint(&payload[pos + FILE_ID_LEN..pos + RESULT_FIXED_LEN]) as u32;

        let name_start = pos + RESULT_FIXED_LEN;
        let name_len = payload[name_start..]
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| P2pError::invalid("fileName", "missing line feed"))?;
        let name = std::str::from_utf8(&payload[name_start..name_start + name_len])
            .map_err(|_| P2pError::invalid("fileName", "not ASCII"))?;

        response.add_result(FileResult::new(FileId::new(file_id), file_size, name)?)?;
        pos = name_start + name_len + 1;
    }

    Ok(response)
}

impl Decoder for MessageCodec {
    type Item = P2pResult<Message>;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> P2pResult<Option<Self::Item>> {
        let length = match self.current_length {
            Some(length) => length,
            None => match frame_length(src)? {
                Some(length) => length,
                None => return Ok(None),
            },
        };

        if src.len() < length {
            self.current_length = Some(length);
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.current_length = None;
        let frame = src.split_to(length);
        Ok(Some(parse_frame(&frame)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> P2pResult<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(P2pError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream closed {} bytes into a message", src.len()),
            ))),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = P2pError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> P2pResult<()> {
        let header = message.header();
        let payload_len = message.payload_len();

        dst.reserve(HEADER_SIZE + payload_len);
        dst.put_u8(message.message_type().code());
        dst.put_slice(header.id().as_bytes());
        dst.put_u8(header.ttl());
        dst.put_u8(header.routing().code());
        put_uint(dst, payload_len as u64, 2);

        match &message {
            Message::Search(search) => dst.put_slice(search.query().as_bytes()),
            Message::Response(response) => {
                let host = response.host();
                put_uint(dst, response.results().len() as u64, 1);
                put_uint(dst, u64::from(host.port()), 2);
                dst.put_slice(&host.ip().octets());
                for result in response.results() {
                    dst.put_slice(result.file_id().as_bytes());
                    put_uint(dst, u64::from(result.file_size()), 4);
                    dst.put_slice(result.file_name().as_bytes());
                    dst.put_u8(b'\n');
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::MAX_RESULTS;

    const BOB: [u8; 23] = [
        1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 3, b'b', b'o', b'b',
    ];

    fn single_result_response(declared_len: u8) -> Vec<u8> {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&[0u8; 15]);
        bytes.extend_from_slice(&[3, 0, 0, declared_len, 1, 0, 20, 127, 0, 0, 1]);
        bytes.extend_from_slice(&[1, 2, 3, 4, 0, 0, 0, 56]);
        bytes.extend_from_slice(b"TESTING\n");
        bytes
    }

    fn multi_result_response(declared_len: u8) -> Vec<u8> {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&[0u8; 15]);
        bytes.extend_from_slice(&[3, 0, 0, declared_len, 3, 0, 20, 127, 0, 0, 1]);
        bytes.extend_from_slice(&[1, 2, 3, 4, 0, 0, 0, 56]);
        bytes.extend_from_slice(b"TESTING\n");
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 23]);
        bytes.extend_from_slice(b"funny\n");
        bytes.extend_from_slice(&[100, 23, 10, 36, 0, 0, 12, 47]);
        bytes.extend_from_slice(b"ouch\n");
        bytes
    }

    fn decode_one(bytes: &[u8]) -> P2pResult<Message> {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(bytes);
        let frame = codec.decode(&mut buf)?.expect("complete frame");
        assert!(buf.is_empty(), "frame should consume all input");
        frame
    }

    fn encode_one(message: Message) -> Vec<u8> {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_shift_loop_helpers() {
        let mut buf = BytesMut::new();
        put_uint(&mut buf, 0xFFFF_FFFF, 4);
        put_uint(&mut buf, 0x0102, 2);
        assert_eq!(&buf[..], &[0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x02]);
        assert_eq!(get_uint(&buf[..4]), 4_294_967_295);
        assert_eq!(get_uint(&buf[4..]), 258);
    }

    #[test]
    fn test_encode_search_bob() {
        let header = Header::new(MessageId::new([0u8; 15]), 3, RoutingService::BreadthFirst);
        let search = Search::new(header, "bob").unwrap();
        assert_eq!(encode_one(search.into()), BOB.to_vec());
    }

    #[test]
    fn test_decode_search_bob() {
        let message = decode_one(&BOB).unwrap();
        let Message::Search(search) = &message else {
            panic!("expected search, got {}", message.name());
        };
        assert_eq!(search.header().id().as_bytes(), &[0u8; 15]);
        assert_eq!(search.header().ttl(), 3);
        assert_eq!(search.header().routing(), RoutingService::BreadthFirst);
        assert_eq!(search.query(), "bob");
        assert_eq!(encode_one(message), BOB.to_vec());
    }

    #[test]
    fn test_decode_empty_search() {
        let mut bytes = BOB[..HEADER_SIZE].to_vec();
        bytes[LENGTH_OFFSET + 1] = 0;
        let message = decode_one(&bytes).unwrap();
        assert!(matches!(&message, Message::Search(s) if s.is_probe()));
    }

    #[test]
    fn test_decode_single_result_response() {
        let bytes = single_result_response(23);
        let message = decode_one(&bytes).unwrap();
        let Message::Response(response) = &message else {
            panic!("expected response, got {}", message.name());
        };
        assert_eq!(response.header().ttl(), 3);
        assert_eq!(response.host(), SocketAddrV4::new(Ipv4Addr::LOCALHOST, 20));
        assert_eq!(response.results().len(), 1);
        let result = &response.results()[0];
        assert_eq!(result.file_id().as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(result.file_size(), 56);
        assert_eq!(result.file_name(), "TESTING");
        assert_eq!(encode_one(message), bytes);
    }

    #[test]
    fn test_decode_multi_result_response() {
        let bytes = multi_result_response(50);
        let message = decode_one(&bytes).unwrap();
        let Message::Response(response) = &message else {
            panic!("expected response");
        };
        let names: Vec<_> = response.results().iter().map(|r| r.file_name()).collect();
        assert_eq!(names, vec!["TESTING", "funny", "ouch"]);
        assert_eq!(response.results()[1].file_id().to_string(), "FFFFFFFF");
        assert_eq!(response.results()[1].file_size(), 23);
        assert_eq!(response.results()[2].file_size(), 3119);

        // Byte-exact re-encoding
        assert_eq!(encode_one(message), bytes);
    }

    #[test]
    fn test_payload_length_mismatch() {
        // Declared 30 but the records only account for 23 bytes
        let err = decode_one(&single_result_response(30)).unwrap_err();
        assert_eq!(err.field(), Some("payloadLen"));

        // Declared smaller than the 50 bytes the three results need
        let err = decode_one(&multi_result_response(40)).unwrap_err();
        assert_eq!(err.field(), Some("payloadLen"));
    }

    #[test]
    fn test_invalid_type() {
        let mut bytes = BOB.to_vec();
        bytes[0] = 19;
        assert_eq!(decode_one(&bytes).unwrap_err().field(), Some("msgType"));
    }

    #[test]
    fn test_invalid_routing_code() {
        let mut bytes = BOB.to_vec();
        bytes[ROUTING_OFFSET] = 7;
        assert_eq!(decode_one(&bytes).unwrap_err().field(), Some("routingService"));
    }

    #[test]
    fn test_invalid_search_characters() {
        let mut bytes = BOB.to_vec();
        bytes[LENGTH_OFFSET + 1] = 5;
        bytes.extend_from_slice(b"&*");
        assert_eq!(decode_one(&bytes).unwrap_err().field(), Some("searchString"));
    }

    #[test]
    fn test_multicast_host_rejected_on_decode() {
        let mut bytes = single_result_response(23);
        bytes[HEADER_SIZE + 3] = 230;
        assert_eq!(decode_one(&bytes).unwrap_err().field(), Some("responseHost"));
    }

    #[test]
    fn test_stream_stays_aligned_after_validation_error() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        let mut bad = BOB.to_vec();
        bad[ROUTING_OFFSET] = 9;
        buf.extend_from_slice(&bad);
        buf.extend_from_slice(&single_result_response(30));
        buf.extend_from_slice(&BOB);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(first.unwrap_err().is_validation());
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(second.unwrap_err().is_validation());
        let third = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert!(matches!(third, Message::Search(ref s) if s.query() == "bob"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_header() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&BOB[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_search_payload() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&BOB[..21]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&BOB[21..]);
        let message = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(encode_one(message), BOB.to_vec());
    }

    #[test]
    fn test_partial_response_records() {
        let bytes = multi_result_response(50);
        let mut codec = MessageCodec::new();

        // Cut inside the second file name
        let mut buf = BytesMut::from(&bytes[..HEADER_SIZE + 7 + 16 + 10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[HEADER_SIZE + 7 + 16 + 10..]);
        let message = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(encode_one(message), bytes);
    }

    #[test]
    fn test_truncated_search_at_eof() {
        // Declares 5 payload bytes but only 3 arrive before the stream ends
        let mut bytes = BOB.to_vec();
        bytes[LENGTH_OFFSET + 1] = 5;
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&bytes[..]);

        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, P2pError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_truncated_result_at_eof() {
        let bytes = single_result_response(23);
        let mut codec = MessageCodec::new();
        // Drop the trailing line feed
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);

        assert!(matches!(codec.decode_eof(&mut buf), Err(P2pError::Io(_))));
    }

    #[test]
    fn test_clean_eof() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_response_frame_overrun() {
        let mut bytes = single_result_response(23);
        bytes.truncate(HEADER_SIZE + RESPONSE_FIXED_LEN + RESULT_FIXED_LEN);
        bytes.extend(std::iter::repeat(b'a').take(MAX_FRAME_SIZE));

        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(P2pError::FrameOverrun { .. })
        ));
    }

    #[test]
    fn test_multiple_messages() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        let first = decode_one(&BOB).unwrap();
        let second = decode_one(&multi_result_response(50)).unwrap();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_boundary_ttls_roundtrip() {
        for ttl in [0u8, 255] {
            let header = Header::new(MessageId::random(), ttl, RoutingService::DepthFirst);
            let message = Message::from(Search::new(header, "x").unwrap());
            let bytes = encode_one(message.clone());
            assert_eq!(decode_one(&bytes).unwrap(), message);
        }
    }

    /// 255 results whose records fill the payload to exactly 65535 bytes.
    fn full_response() -> Response {
        let header = Header::new(MessageId::random(), 9, RoutingService::DepthFirst);
        let host = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 9), 6001);
        let mut response = Response::new(header, host).unwrap();
        for i in 0..MAX_RESULTS {
            let len = if i == MAX_RESULTS - 1 { 241 } else { 248 };
            let result = FileResult::new(FileId::new([i as u8; 4]), i as u32, "n".repeat(len)).unwrap();
            response.add_result(result).unwrap();
        }
        response
    }

    #[test]
    fn test_full_response_at_frame_limit() {
        let response = full_response();
        assert_eq!(response.results().len(), MAX_RESULTS);
        assert_eq!(response.payload_len(), MAX_PAYLOAD_LEN);

        let message = Message::from(response);
        let bytes = encode_one(message.clone());
        assert_eq!(bytes.len(), MAX_FRAME_SIZE);

        // A max-size frame followed by another must not trip the overrun guard
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&bytes[..]);
        buf.extend_from_slice(&BOB);
        let first = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(first, message);
        assert_eq!(encode_one(first), bytes);
        let second = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert!(matches!(second, Message::Search(ref s) if s.query() == "bob"));
    }

    #[test]
    fn test_max_results_with_short_names() {
        let header = Header::new(MessageId::random(), 1, RoutingService::BreadthFirst);
        let mut response = Response::new(header, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1)).unwrap();
        for i in 0..MAX_RESULTS {
            let result = FileResult::new(FileId::new([0, 0, 0, i as u8]), 0, format!("f{}", i)).unwrap();
            response.add_result(result).unwrap();
        }

        let message = Message::from(response);
        let bytes = encode_one(message.clone());
        assert_eq!(bytes[HEADER_SIZE], 255);
        assert_eq!(decode_one(&bytes).unwrap(), message);
    }

    #[test]
    fn test_longest_search_at_frame_limit() {
        let header = Header::new(MessageId::random(), 2, RoutingService::BreadthFirst);
        let query = "q".repeat(MAX_PAYLOAD_LEN);
        let message = Message::from(Search::new(header, query).unwrap());

        let bytes = encode_one(message.clone());
        assert_eq!(bytes.len(), MAX_FRAME_SIZE);
        assert_eq!(decode_one(&bytes).unwrap(), message);
    }
}
