//! Binary codec for the 0.7-generation broker protocol.
//!
//! Requests and responses are length-framed. A request body starts with an
//! `i16` request type; a response body starts with an `i16` error code.
//! A message on the wire is `length | magic | attributes | checksum |
//! payload`, and a message's logical offset is the log position *after*
//! the message, so the offset of the last consumed message is directly
//! usable as the next fetch position.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::broker::TopicPartition;
use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

pub mod error_code {
    pub const NONE: i16 = 0;
    pub const OFFSET_OUT_OF_RANGE: i16 = 1;
    pub const INVALID_MESSAGE: i16 = 2;
    pub const WRONG_PARTITION: i16 = 3;
    pub const INVALID_FETCH_SIZE: i16 = 4;
}

pub const FETCH_REQUEST: i16 = 1;
pub const OFFSETS_REQUEST: i16 = 4;

pub const MESSAGE_MAGIC: i8 = 1;
/// magic + attributes + checksum
const MESSAGE_OVERHEAD: usize = 6;

/// One decoded message: the payload plus the log position after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub offset: i64,
    pub payload: Bytes,
}

fn put_request_header(buf: &mut BytesMut, request_type: i16, tp: &TopicPartition) {
    buf.put_i16(request_type);
    buf.put_i16(tp.topic.len() as i16);
    buf.put_slice(tp.topic.as_bytes());
    buf.put_i32(tp.partition);
}

pub fn encode_fetch_request(
    buf: &mut BytesMut,
    tp: &TopicPartition,
    offset: i64,
    max_bytes: i32,
) {
    let body_len = 2 + 2 + tp.topic.len() + 4 + 8 + 4;
    buf.put_i32(body_len as i32);
    put_request_header(buf, FETCH_REQUEST, tp);
    buf.put_i64(offset);
    buf.put_i32(max_bytes);
}

pub fn encode_offsets_request(
    buf: &mut BytesMut,
    tp: &TopicPartition,
    time: i64,
    max_count: i32,
) {
    let body_len = 2 + 2 + tp.topic.len() + 4 + 8 + 4;
    buf.put_i32(body_len as i32);
    put_request_header(buf, OFFSETS_REQUEST, tp);
    buf.put_i64(time);
    buf.put_i32(max_count);
}

pub fn encode_fetch_response(buf: &mut BytesMut, error_code: i16, message_set: &[u8]) {
    buf.put_i32((2 + message_set.len()) as i32);
    buf.put_i16(error_code);
    buf.put_slice(message_set);
}

pub fn encode_offsets_response(buf: &mut BytesMut, error_code: i16, offsets: &[i64]) {
    buf.put_i32((2 + 4 + offsets.len() * 8) as i32);
    buf.put_i16(error_code);
    buf.put_i32(offsets.len() as i32);
    for offset in offsets {
        buf.put_i64(*offset);
    }
}

/// One length-framed broker response.
#[derive(Debug)]
pub struct ResponseFrame {
    pub error_code: i16,
    pub body: BytesMut,
}

impl ResponseFrame {
    pub fn check(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<()> {
        if buffer.remaining() < 4 {
            return Err(Incomplete);
        }
        let bytes_slice = buffer.get(0..4).unwrap();
        let body_size = i32::from_be_bytes(bytes_slice.try_into().unwrap());
        if body_size < 2 {
            return Err(AppError::MalformedProtocol(format!(
                "response frame size {} too small",
                body_size
            )));
        }
        if body_size as usize > max_frame_size {
            return Err(AppError::MalformedProtocol(format!(
                "response frame of length {} is too large",
                body_size
            )));
        }
        if buffer.remaining() < body_size as usize + 4 {
            buffer.reserve(body_size as usize + 4);
            return Err(Incomplete);
        }
        Ok(())
    }

    pub fn parse(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<Option<ResponseFrame>> {
        // perform a check to ensure we have enough data
        match ResponseFrame::check(buffer, max_frame_size) {
            Ok(_) => {
                let body_length = buffer.get_i32();
                let mut body = buffer.split_to(body_length as usize);
                let error_code = body.get_i16();
                Ok(Some(ResponseFrame { error_code, body }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub fn encode_message(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_i32((MESSAGE_OVERHEAD + payload.len()) as i32);
    buf.put_i8(MESSAGE_MAGIC);
    buf.put_i8(0);
    buf.put_u32(crc32c::crc32c(payload));
    buf.put_slice(payload);
}

/// Decodes the message set of a fetch response.
///
/// `fetch_offset` is the log position the fetch started at; each decoded
/// message is stamped with the position after itself. A partial message at
/// the end of the fetch window is ignored, the next fetch re-reads it.
pub fn decode_message_set(data: &mut BytesMut, fetch_offset: i64) -> AppResult<Vec<WireMessage>> {
    let mut messages = Vec::new();
    let mut position = fetch_offset;

    while data.remaining() >= 4 {
        let bytes_slice = data.get(0..4).unwrap();
        let size = i32::from_be_bytes(bytes_slice.try_into().unwrap());
        if size < MESSAGE_OVERHEAD as i32 {
            return Err(AppError::MalformedProtocol(format!(
                "message size {} below minimum {}",
                size, MESSAGE_OVERHEAD
            )));
        }
        if data.remaining() < 4 + size as usize {
            break;
        }
        data.advance(4);
        let magic = data.get_i8();
        if magic != MESSAGE_MAGIC {
            return Err(AppError::MalformedProtocol(format!(
                "unknown message magic {}",
                magic
            )));
        }
        let _attributes = data.get_i8();
        let checksum = data.get_u32();
        let payload = data.split_to(size as usize - MESSAGE_OVERHEAD).freeze();
        if crc32c::crc32c(&payload) != checksum {
            return Err(AppError::MalformedProtocol(format!(
                "message checksum mismatch at position {}",
                position
            )));
        }
        position += 4 + size as i64;
        messages.push(WireMessage {
            offset: position,
            payload,
        });
    }
    Ok(messages)
}

pub fn decode_offsets(body: &mut BytesMut) -> AppResult<Vec<i64>> {
    if body.remaining() < 4 {
        return Err(AppError::MalformedProtocol(
            "offsets response truncated".to_string(),
        ));
    }
    let count = body.get_i32();
    if count < 0 || body.remaining() < count as usize * 8 {
        return Err(AppError::MalformedProtocol(format!(
            "offsets response claims {} entries with {} bytes left",
            count,
            body.remaining()
        )));
    }
    let mut offsets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        offsets.push(body.get_i64());
    }
    Ok(offsets)
}
