// iCalendar (RFC 5545) event rendering for the ics operator

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use uuid::Builder;

use crate::context::Entropy;
use crate::datetime::{coerce_date, millis_to_delta, parse_duration};
use crate::value::JValue;

#[derive(Error, Debug, PartialEq)]
pub enum IcsError {
    #[error("ics start must be a date, got {0}")]
    InvalidStart(&'static str),

    #[error("ics event needs an end date or a duration")]
    MissingEnd,

    #[error("ics event end is out of the supported date range")]
    OutOfRange,
}

/// Resolved operand values of one `ics` evaluation.
#[derive(Debug, Clone, Default)]
pub struct EventFields {
    pub start: JValue,
    pub end: JValue,
    pub duration: JValue,
    pub title: JValue,
    pub description: JValue,
    pub url: JValue,
    pub location: JValue,
    pub coordinates: JValue,
}

/// A calendar event ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub location: Option<String>,
    pub geo: Option<(f64, f64)>,
}

impl Event {
    /// Build an event from resolved values.
    ///
    /// An explicit end wins over a duration. Durations are either duration
    /// strings (`1h 30m`) or milliseconds.
    pub fn from_fields(fields: &EventFields) -> Result<Self, IcsError> {
        let start =
            coerce_date(&fields.start).ok_or(IcsError::InvalidStart(fields.start.type_name()))?;
        let end = match coerce_date(&fields.end) {
            Some(end) => end,
            None => {
                let duration = duration(&fields.duration).ok_or(IcsError::MissingEnd)?;
                start
                    .checked_add_signed(duration)
                    .ok_or(IcsError::OutOfRange)?
            }
        };

        Ok(Event {
            start,
            end,
            title: fields.title.to_text(),
            description: text(&fields.description),
            url: text(&fields.url),
            location: text(&fields.location),
            geo: coordinates(&fields.coordinates),
        })
    }

    /// Render as a `VCALENDAR` holding this single `VEVENT`.
    pub fn render(&self, uid: &str, stamp: DateTime<Utc>, prodid: &str) -> String {
        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            format!("PRODID:{}", escape(prodid)),
            "BEGIN:VEVENT".to_string(),
            format!("UID:{uid}"),
            format!("DTSTAMP:{}", timestamp(&stamp)),
            format!("DTSTART:{}", timestamp(&self.start)),
            format!("DTEND:{}", timestamp(&self.end)),
            format!("SUMMARY:{}", escape(&self.title)),
        ];
        if let Some(description) = &self.description {
            lines.push(format!("DESCRIPTION:{}", escape(description)));
        }
        if let Some(url) = &self.url {
            lines.push(format!("URL:{url}"));
        }
        if let Some(location) = &self.location {
            lines.push(format!("LOCATION:{}", escape(location)));
        }
        if let Some((lat, lon)) = self.geo {
            lines.push(format!("GEO:{lat};{lon}"));
        }
        lines.push("END:VEVENT".to_string());
        lines.push("END:VCALENDAR".to_string());

        let mut out = String::new();
        for line in &lines {
            fold(line, &mut out);
        }
        out
    }
}

fn text(value: &JValue) -> Option<String> {
    if value.is_nullish() {
        None
    } else {
        Some(value.to_text())
    }
}

fn duration(value: &JValue) -> Option<TimeDelta> {
    match value {
        JValue::Number(ms) => millis_to_delta(*ms),
        JValue::String(s) => parse_duration(s).ok(),
        _ => None,
    }
}

/// Read `[lat, lon]`, `{latitude, longitude}`, `{lat, lng}` or `"lat,lon"`.
pub fn coordinates(value: &JValue) -> Option<(f64, f64)> {
    let number = |v: Option<&JValue>| match v? {
        JValue::Number(n) => Some(*n),
        JValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match value {
        JValue::Array(items) if items.len() == 2 => Some((number(items.first())?, number(items.get(1))?)),
        JValue::Object(map) => {
            let lat = number(map.get("latitude").or_else(|| map.get("lat")))?;
            let lon = number(
                map.get("longitude")
                    .or_else(|| map.get("lng"))
                    .or_else(|| map.get("lon")),
            )?;
            Some((lat, lon))
        }
        JValue::String(s) => {
            let (lat, lon) = s.split_once(',')?;
            Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
        }
        _ => None,
    }
}

/// A random version 4 UUID drawn from `entropy`.
pub fn uid(entropy: &dyn Entropy) -> String {
    let mut bytes = [0u8; 16];
    for byte in bytes.iter_mut() {
        *byte = (entropy.next_f64() * 256.0).floor().clamp(0.0, 255.0) as u8;
    }
    Builder::from_random_bytes(bytes).into_uuid().to_string()
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// Append `line` folded at 75 octets, terminated by CRLF.
fn fold(line: &str, out: &mut String) {
    const LIMIT: usize = 75;
    let mut width = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > LIMIT {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += len;
    }
    out.push_str("\r\n");
}
