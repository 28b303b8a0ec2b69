// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Binary encoding of replicated event batches.
//!
//! The active node packs one or more [`QueuedEvent`]s into a single buffer per
//! replication attempt; the passive node unpacks it with [`decode()`].
//!
//! # Layout
//!
//! All integers are big-endian. Strings are a `u32` byte length followed by
//! UTF-8 bytes.
//!
//! ```text
//! u32 event_count
//! ┌ per event ───────────────────────────────────────────────┐
//! │ str app_name                                             │
//! │ str source_handler_id                                    │
//! │ u64 sequence_id                                          │
//! │ i64 timestamp                                            │
//! │ u32 attribute_count, then per attribute: u8 tag + value  │
//! │ i32 marker_count (-1 = no markers), then str per marker  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Encoding is all-or-nothing: if any attribute cannot be serialized no
//! buffer is produced, so a partial message can never reach the peer.

use crate::error::{ReplicationError, Result};
use crate::event::{Attribute, Event, QueuedEvent};
use bytes::{Buf, BufMut};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_LONG: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_DOUBLE: u8 = 5;
const TAG_STRING: u8 = 6;

/// Marker count written when an event carries no resume markers.
const NO_MARKERS: i32 = -1;

/// Encode events into one transmissible buffer, preserving order.
///
/// Deterministic for identical input. Fails with
/// [`ReplicationError::Encoding`] if any attribute is not serializable.
pub fn encode(events: &[QueuedEvent]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(encoded_len_hint(events));
    put_len(&mut buf, events.len(), "event count")?;

    for queued in events {
        put_str(&mut buf, &queued.app_name)?;
        put_str(&mut buf, &queued.source_handler_id)?;
        buf.put_u64(queued.sequence_id);
        buf.put_i64(queued.event.timestamp);

        put_len(&mut buf, queued.event.data.len(), "attribute count")?;
        for (index, attribute) in queued.event.data.iter().enumerate() {
            put_attribute(&mut buf, attribute).map_err(|e| match e {
                ReplicationError::Encoding(msg) => ReplicationError::Encoding(format!(
                    "event {} (seq {}) attribute {}: {}",
                    queued.event.timestamp, queued.sequence_id, index, msg
                )),
                other => other,
            })?;
        }

        match &queued.resume_markers {
            None => buf.put_i32(NO_MARKERS),
            Some(markers) => {
                let count = i32::try_from(markers.len()).map_err(|_| {
                    ReplicationError::Encoding(format!("too many resume markers: {}", markers.len()))
                })?;
                buf.put_i32(count);
                for marker in markers {
                    put_str(&mut buf, marker)?;
                }
            }
        }
    }

    Ok(buf)
}

/// Decode a buffer produced by [`encode()`].
///
/// Never panics on malformed input; returns [`ReplicationError::Decoding`].
pub fn decode(mut buf: &[u8]) -> Result<Vec<QueuedEvent>> {
    let count = get_u32(&mut buf, "event count")? as usize;
    // Bound the preallocation by what the buffer could possibly hold
    let mut events = Vec::with_capacity(count.min(buf.remaining() / 32));

    for _ in 0..count {
        let app_name = get_str(&mut buf, "app name")?;
        let source_handler_id = get_str(&mut buf, "source handler id")?;
        let sequence_id = get_u64(&mut buf, "sequence id")?;
        let timestamp = get_i64(&mut buf, "timestamp")?;

        let attribute_count = get_u32(&mut buf, "attribute count")? as usize;
        let mut data = Vec::with_capacity(attribute_count.min(buf.remaining()));
        for _ in 0..attribute_count {
            data.push(get_attribute(&mut buf)?);
        }

        let marker_count = get_i32(&mut buf, "marker count")?;
        let resume_markers = match marker_count {
            NO_MARKERS => None,
            n if n < 0 => {
                return Err(ReplicationError::Decoding(format!(
                    "invalid marker count {}",
                    n
                )))
            }
            n => {
                let n = n as usize;
                let mut markers = Vec::with_capacity(n.min(buf.remaining() / 4));
                for _ in 0..n {
                    markers.push(get_str(&mut buf, "resume marker")?);
                }
                Some(markers)
            }
        };

        events.push(QueuedEvent {
            app_name,
            source_handler_id,
            sequence_id,
            event: Event { timestamp, data },
            resume_markers,
        });
    }

    if buf.has_remaining() {
        return Err(ReplicationError::Decoding(format!(
            "{} trailing bytes after {} events",
            buf.remaining(),
            count
        )));
    }

    Ok(events)
}

fn encoded_len_hint(events: &[QueuedEvent]) -> usize {
    events
        .iter()
        .map(|e| 40 + e.app_name.len() + e.source_handler_id.len() + e.event.data.len() * 9)
        .sum::<usize>()
        + 4
}

fn put_len(buf: &mut Vec<u8>, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| ReplicationError::Encoding(format!("{} {} exceeds u32", what, len)))?;
    buf.put_u32(len);
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    put_len(buf, s.len(), "string length")?;
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_attribute(buf: &mut Vec<u8>, attribute: &Attribute) -> Result<()> {
    match attribute {
        Attribute::Null => buf.put_u8(TAG_NULL),
        Attribute::Bool(v) => {
            buf.put_u8(TAG_BOOL);
            buf.put_u8(u8::from(*v));
        }
        Attribute::Int(v) => {
            buf.put_u8(TAG_INT);
            buf.put_i32(*v);
        }
        Attribute::Long(v) => {
            buf.put_u8(TAG_LONG);
            buf.put_i64(*v);
        }
        Attribute::Float(v) => {
            buf.put_u8(TAG_FLOAT);
            buf.put_f32(*v);
        }
        Attribute::Double(v) => {
            buf.put_u8(TAG_DOUBLE);
            buf.put_f64(*v);
        }
        Attribute::String(v) => {
            buf.put_u8(TAG_STRING);
            put_str(buf, v)?;
        }
        Attribute::Object(_) => {
            return Err(ReplicationError::Encoding(format!(
                "unsupported attribute type: {}",
                attribute.type_name()
            )))
        }
    }
    Ok(())
}

fn need(buf: &&[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(ReplicationError::Decoding(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32())
}

fn get_i32(buf: &mut &[u8], what: &str) -> Result<i32> {
    need(buf, 4, what)?;
    Ok(buf.get_i32())
}

fn get_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    need(buf, 8, what)?;
    Ok(buf.get_u64())
}

fn get_i64(buf: &mut &[u8], what: &str) -> Result<i64> {
    need(buf, 8, what)?;
    Ok(buf.get_i64())
}

fn get_str(buf: &mut &[u8], what: &str) -> Result<String> {
    let len = get_u32(buf, what)? as usize;
    need(buf, len, what)?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|e| ReplicationError::Decoding(format!("{} is not UTF-8: {}", what, e)))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn get_attribute(buf: &mut &[u8]) -> Result<Attribute> {
    need(buf, 1, "attribute tag")?;
    let attribute = match buf.get_u8() {
        TAG_NULL => Attribute::Null,
        TAG_BOOL => {
            need(buf, 1, "bool")?;
            match buf.get_u8() {
                0 => Attribute::Bool(false),
                1 => Attribute::Bool(true),
                other => {
                    return Err(ReplicationError::Decoding(format!("invalid bool byte {}", other)))
                }
            }
        }
        TAG_INT => Attribute::Int(get_i32(buf, "int")?),
        TAG_LONG => Attribute::Long(get_i64(buf, "long")?),
        TAG_FLOAT => {
            need(buf, 4, "float")?;
            Attribute::Float(buf.get_f32())
        }
        TAG_DOUBLE => {
            need(buf, 8, "double")?;
            Attribute::Double(buf.get_f64())
        }
        TAG_STRING => Attribute::String(get_str(buf, "string attribute")?),
        tag => {
            return Err(ReplicationError::Decoding(format!(
                "unknown attribute tag {}",
                tag
            )))
        }
    };
    Ok(attribute)
}
