use crate::types::{RawRecord, RecordValue};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::fmt;
use tracing::warn;

/// Result of asking the decoder for the next record of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Record(DateTime<Utc>, RawRecord),
    End,
    Invalid(String),
}

impl Decoded {
    /// Return code as the collection agent reports it; anything non-zero ends
    /// the batch.
    pub fn code(&self) -> i32 {
        match self {
            Self::Record(..) => 0,
            Self::End => -1,
            Self::Invalid(_) => -2,
        }
    }
}

/// Decodes newline-delimited `[time, record]` events from a flushed chunk.
pub struct RecordDecoder<'a> {
    lines: std::slice::Split<'a, u8, fn(&u8) -> bool>,
    done: bool,
}

impl<'a> RecordDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let is_newline: fn(&u8) -> bool = |b| *b == b'\n';
        Self {
            lines: data.split(is_newline),
            done: false,
        }
    }

    pub fn get_record(&mut self) -> Decoded {
        if self.done {
            return Decoded::End;
        }
        let decoded = loop {
            let Some(line) = self.lines.next() else {
                break Decoded::End;
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            break decode_event(line);
        };
        if decoded.code() != 0 {
            self.done = true;
        }
        decoded
    }
}

impl Iterator for RecordDecoder<'_> {
    type Item = (DateTime<Utc>, RawRecord);

    fn next(&mut self) -> Option<Self::Item> {
        match self.get_record() {
            Decoded::Record(ts, record) => Some((ts, record)),
            Decoded::End => None,
            Decoded::Invalid(reason) => {
                warn!("Stopping decode of chunk at invalid event: {}", reason);
                None
            }
        }
    }
}

fn decode_event(line: &[u8]) -> Decoded {
    match serde_json::from_slice::<(EventTime, RawRecord)>(line) {
        Ok((time, record)) => match time.to_datetime() {
            Some(ts) => Decoded::Record(ts, record),
            None => Decoded::Invalid(format!("timestamp {}s out of range", time.seconds)),
        },
        Err(e) => Decoded::Invalid(e.to_string()),
    }
}

/// Event time as whole seconds plus nanoseconds. Integer times are taken
/// exactly; only float times go through `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventTime {
    seconds: i64,
    nanos: u32,
}

impl EventTime {
    fn from_float(v: f64) -> Option<Self> {
        if !v.is_finite() {
            return None;
        }
        let whole = v.floor();
        let mut seconds = whole as i64;
        let mut nanos = ((v - whole) * 1e9).round() as u32;
        if nanos >= 1_000_000_000 {
            seconds = seconds.checked_add(1)?;
            nanos -= 1_000_000_000;
        }
        Some(Self { seconds, nanos })
    }

    fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanos)
    }
}

impl<'de> Deserialize<'de> for EventTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EventTimeVisitor)
    }
}

struct EventTimeVisitor;

impl<'de> Visitor<'de> for EventTimeVisitor {
    type Value = EventTime;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("event time in seconds, or [time, metadata]")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(EventTime {
            seconds: v,
            nanos: 0,
        })
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map_err(|_| E::custom(format!("event time {} out of range", v)))
            .and_then(|v| self.visit_i64(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        EventTime::from_float(v).ok_or_else(|| E::custom(format!("event time {} out of range", v)))
    }

    // `[time, metadata]`; the metadata is not used
    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let time: EventTime = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(time)
    }
}

impl<'de> Deserialize<'de> for RecordValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RecordValueVisitor)
    }
}

impl<'de> Deserialize<'de> for RawRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RawRecordVisitor)
    }
}

struct RecordValueVisitor;

impl<'de> Visitor<'de> for RecordValueVisitor {
    type Value = RecordValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a record value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(RecordValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(RecordValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(i64::try_from(v).map_or(RecordValue::UInt(v), RecordValue::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(RecordValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(RecordValue::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(RecordValue::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(RecordValue::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(RecordValue::Bytes(v))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RecordValue::Nil)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RecordValue::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        RecordValue::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(RecordValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
        RawRecordVisitor.visit_map(map).map(RecordValue::Map)
    }
}

struct RawRecordVisitor;

impl<'de> Visitor<'de> for RawRecordVisitor {
    type Value = RawRecord;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a record map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut record = RawRecord::new();
        while let Some((key, value)) = map.next_entry::<RecordValue, RecordValue>()? {
            record.insert(key, value);
        }
        Ok(record)
    }
}
