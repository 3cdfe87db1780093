//! Stored timestamp encodings.
//!
//! `start_time`/`end_time` columns were written by several generations of the tracker:
//! newer rows hold integer epoch seconds, older rows hold local datetime text such as
//! `2024-03-01 09:15:00.123456`. Each encoding is one variant of [`StoredTime`]; adding
//! an encoding means adding a variant and its arm in [`StoredTime::to_epoch`].

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};

use crate::error::{Result, TrackerError};

const LOCAL_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A `start_time`/`end_time` value as it sits in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredTime {
    EpochSeconds(i64),
    LocalDatetime(String),
}

impl StoredTime {
    /// Resolves the stored value to epoch seconds, interpreting naive text in `tz`.
    pub fn to_epoch<Tz: TimeZone>(&self, tz: &Tz) -> Result<i64> {
        match self {
            StoredTime::EpochSeconds(secs) => Ok(*secs),
            StoredTime::LocalDatetime(text) => parse_local_datetime(text, tz),
        }
    }

    pub fn as_epoch(&self) -> Option<i64> {
        match self {
            StoredTime::EpochSeconds(secs) => Some(*secs),
            StoredTime::LocalDatetime(_) => None,
        }
    }
}

impl From<i64> for StoredTime {
    fn from(secs: i64) -> Self {
        StoredTime::EpochSeconds(secs)
    }
}

fn parse_local_datetime<Tz: TimeZone>(text: &str, tz: &Tz) -> Result<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::Parse {
            value: text.to_string(),
            reason: "empty timestamp".to_string(),
        });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp());
    }

    for format in LOCAL_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Ok(dt.timestamp()),
                // Fall-back DST transition: pick the first occurrence.
                LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp()),
                LocalResult::None => Err(TrackerError::Parse {
                    value: text.to_string(),
                    reason: "local time does not exist in this time zone".to_string(),
                }),
            };
        }
    }

    Err(TrackerError::Parse {
        value: text.to_string(),
        reason: "neither epoch seconds nor a recognised datetime".to_string(),
    })
}

impl FromSql for StoredTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(secs) => Ok(StoredTime::EpochSeconds(secs)),
            ValueRef::Real(secs) => Ok(StoredTime::EpochSeconds(secs.trunc() as i64)),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|err| FromSqlError::Other(Box::new(err)))?;
                match text.trim().parse::<i64>() {
                    Ok(secs) => Ok(StoredTime::EpochSeconds(secs)),
                    Err(_) => Ok(StoredTime::LocalDatetime(text.to_string())),
                }
            }
            ValueRef::Null | ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn epoch_variant_passes_through() {
        assert_eq!(StoredTime::EpochSeconds(1_000).to_epoch(&Utc).unwrap(), 1_000);
    }

    #[test]
    fn parses_python_default_datetime_text() {
        let stored = StoredTime::LocalDatetime("2024-03-01 09:15:00.123456".to_string());
        let expected = Utc
            .with_ymd_and_hms(2024, 3, 1, 9, 15, 0)
            .single()
            .expect("valid date")
            .timestamp();
        assert_eq!(stored.to_epoch(&Utc).expect("parse"), expected);
    }

    #[test]
    fn naive_text_is_interpreted_in_given_zone() {
        let plus_two = FixedOffset::east_opt(2 * 3600).expect("offset");
        let stored = StoredTime::LocalDatetime("2024-03-01T11:15:00".to_string());
        let utc = StoredTime::LocalDatetime("2024-03-01T09:15:00".to_string());
        assert_eq!(
            stored.to_epoch(&plus_two).expect("parse"),
            utc.to_epoch(&Utc).expect("parse")
        );
    }

    #[test]
    fn rfc3339_text_keeps_its_offset() {
        let stored = StoredTime::LocalDatetime("2024-03-01T09:15:00+00:00".to_string());
        let plus_two = FixedOffset::east_opt(2 * 3600).expect("offset");
        assert_eq!(
            stored.to_epoch(&plus_two).expect("parse"),
            stored.to_epoch(&Utc).expect("parse")
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = StoredTime::LocalDatetime("yesterday-ish".to_string())
            .to_epoch(&Utc)
            .unwrap_err();
        assert!(matches!(err, TrackerError::Parse { .. }));
    }
}
