use std::io::Write;

use marketpulse_core::{Domain, MarketRecord, UtcDateTime};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

/// Prints one JSON document to stdout.
pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{payload}");
    Ok(())
}

/// Body of one stream line, tagged by `event`.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum StreamBody<'a> {
    Start { data: Value },
    Update {
        domain: Domain,
        records: &'a [MarketRecord],
    },
    End { data: Value },
}

#[derive(Debug, Serialize)]
struct StreamLine<'a> {
    seq: u64,
    ts: UtcDateTime,
    #[serde(flatten)]
    body: StreamBody<'a>,
}

/// Newline-delimited JSON for `run`: a `start` line, one `update` per
/// worker publish, and an `end` line. `seq` starts at 1.
pub struct NdjsonStreamWriter<W: Write> {
    out: W,
    seq: u64,
}

impl<W: Write> NdjsonStreamWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, seq: 0 }
    }

    pub fn emit_start(&mut self, data: Value) -> Result<(), CliError> {
        self.write_line(StreamBody::Start { data })
    }

    pub fn emit_update(&mut self, domain: Domain, records: &[MarketRecord]) -> Result<(), CliError> {
        self.write_line(StreamBody::Update { domain, records })
    }

    pub fn emit_end(&mut self, data: Value) -> Result<(), CliError> {
        self.write_line(StreamBody::End { data })
    }

    fn write_line(&mut self, body: StreamBody<'_>) -> Result<(), CliError> {
        self.seq += 1;
        let line = StreamLine {
            seq: self.seq,
            ts: UtcDateTime::now(),
            body,
        };
        serde_json::to_writer(&mut self.out, &line)?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn record() -> MarketRecord {
        MarketRecord {
            symbol: String::from("BTC"),
            name: String::from("Bitcoin"),
            price: 65_000.0,
            change_24h: Some(1.5),
            volume: None,
            market_cap: None,
            timestamp: UtcDateTime::now(),
            source: String::from("coingecko"),
            kind: Domain::Crypto,
        }
    }

    #[test]
    fn emits_numbered_lifecycle_and_update_lines() {
        let mut sink = Vec::<u8>::new();

        {
            let mut writer = NdjsonStreamWriter::new(&mut sink);
            writer.emit_start(json!({ "domains": 2 })).expect("start");
            writer
                .emit_update(Domain::Crypto, &[record()])
                .expect("update");
            writer.emit_end(json!({ "updates": 1 })).expect("end");
        }

        let events = std::str::from_utf8(&sink)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).expect("json line"))
            .collect::<Vec<_>>();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].get("event"), Some(&Value::from("start")));
        assert_eq!(events[1].get("domain"), Some(&Value::from("crypto")));
        assert_eq!(
            events[1].pointer("/records/0/symbol"),
            Some(&Value::from("BTC"))
        );
        assert_eq!(events[1].pointer("/records/0/change24h"), Some(&Value::from(1.5)));
        assert!(events[1].get("data").is_none());
        assert_eq!(events[2].get("seq"), Some(&Value::from(3)));
    }
}
