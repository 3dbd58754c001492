//! CSV event loading and rule export
//!
//! Reads interaction logs with the columns `UserId, ServiceId, CategoryId,
//! CreateDate`. Rows with missing columns still become events (with empty
//! fields) so the basket builder's malformed-record policy decides what to
//! do with them. Only I/O and CSV framing errors fail a load.

use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::mining::{RawEvent, Rule};

#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(rename = "UserId", default)]
    user_id: Option<String>,
    #[serde(rename = "ServiceId", default)]
    service_id: Option<String>,
    #[serde(rename = "CategoryId", default)]
    category_id: Option<String>,
    #[serde(rename = "CreateDate", default)]
    create_date: Option<String>,
}

impl From<EventRow> for RawEvent {
    fn from(row: EventRow) -> Self {
        RawEvent {
            user_id: row.user_id.unwrap_or_default(),
            service_id: row.service_id.unwrap_or_default(),
            category_id: row.category_id.unwrap_or_default(),
            timestamp: row.create_date.unwrap_or_default(),
        }
    }
}

/// Load every event from a CSV file
pub fn read_events(path: impl AsRef<Path>, delimiter: u8) -> Result<Vec<RawEvent>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let events = read_events_from(file, delimiter)?;
    info!(path = %path.display(), events = events.len(), "📥 Loaded events");
    Ok(events)
}

/// Load events from any reader with a header row
pub fn read_events_from<R: Read>(reader: R, delimiter: u8) -> Result<Vec<RawEvent>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    debug!(?headers, "CSV headers");

    csv_reader
        .deserialize::<EventRow>()
        .map(|row| row.map(RawEvent::from).map_err(Error::from))
        .collect()
}

/// Write rules as a pretty-printed JSON array
pub fn export_rules(path: impl AsRef<Path>, rules: &[Rule]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, rules)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!(path = %path.display(), rules = rules.len(), "💾 Exported rules");
    Ok(())
}

/// Parse a single-byte delimiter such as `,`, `;` or `\t`
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "\\t" | "\t" | "tab" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        other => Err(Error::InvalidConfig {
            key: "ARL_CSV_DELIMITER",
            message: format!("expected a single ASCII character, got '{}'", other).into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{Item, RuleSet};

    const SAMPLE: &str = "\
UserId,ServiceId,CategoryId,CreateDate
u1,s1,c1,2017-08-01 10:00:00
u1, s2 ,c1,2017-08-03 09:30:00
u2,s1,c1
";

    #[test]
    fn test_read_events_from_reader() {
        let events = read_events_from(SAMPLE.as_bytes(), b',').unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], RawEvent::new("u1", "s1", "c1", "2017-08-01 10:00:00"));
        assert_eq!(events[1].service_id, "s2");
        // short row keeps going, the builder decides
        assert_eq!(events[2].timestamp, "");
    }

    #[test]
    fn test_read_events_from_file_with_semicolons() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "CreateDate;UserId;ServiceId;CategoryId;Extra").unwrap();
        writeln!(file, "2017-09-01;u9;s3;c2;ignored").unwrap();

        let events = read_events(file.path(), b';').unwrap();
        assert_eq!(events, vec![RawEvent::new("u9", "s3", "c2", "2017-09-01")]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_events("/definitely/not/here.csv", b',').unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_export_rules_writes_json() {
        let a = Item::new("a", "1");
        let b = Item::new("b", "1");
        let rule = Rule::from_supports(
            vec![a].into(),
            vec![b].into(),
            0.5,
            0.5,
            1.0,
        )
        .unwrap();
        let rules = RuleSet::new(vec![rule]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        export_rules(&path, rules.as_slice()).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["antecedent"][0], "a_1");
        assert_eq!(written[0]["consequent"][0], "b_1");
        assert_eq!(written[0]["confidence"], 1.0);
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(",").unwrap(), b',');
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert!(parse_delimiter(";;").is_err());
    }
}
