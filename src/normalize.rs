//! Conversion of the heterogeneous field encodings used by the OPNsense API into canonical
//! values.
//!
//! The sentinel `"~"` always becomes `None`, never zero. Anything else that cannot be read is a
//! [NormalizeError].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::SkipReason;

/// Marker the API uses for "no value".
pub const SENTINEL: &str = "~";

#[derive(Debug, Error, Clone, PartialEq)]
#[error("cannot read {kind} from {input:?}")]
pub struct NormalizeError {
    pub kind: &'static str,
    pub input: String,
}

impl NormalizeError {
    fn new(kind: &'static str, input: &str) -> Self {
        NormalizeError {
            kind,
            input: input.to_owned(),
        }
    }
}

/// `"<n> ms"` to seconds, a bare number is already seconds.
pub fn duration(input: &str) -> Result<Option<f64>, NormalizeError> {
    let input = input.trim();
    if input == SENTINEL {
        return Ok(None);
    }

    let mut parts = input.split_whitespace();
    let number = parts
        .next()
        .and_then(|n| n.parse::<f64>().ok())
        .ok_or_else(|| NormalizeError::new("duration", input))?;

    match (parts.next(), parts.next()) {
        (None, None) | (Some("s"), None) => Ok(Some(number)),
        (Some("ms"), None) => Ok(Some(number / 1000.0)),
        _ => Err(NormalizeError::new("duration", input)),
    }
}

/// `"<n> %"` or `"<n>%"` to a float between 0 and 100.
pub fn percent(input: &str) -> Result<Option<f64>, NormalizeError> {
    let input = input.trim();
    if input == SENTINEL {
        return Ok(None);
    }

    input
        .strip_suffix('%')
        .unwrap_or(input)
        .trim()
        .parse::<f64>()
        .map(Some)
        .map_err(|_| NormalizeError::new("percentage", input))
}

/// Sizes like `"886M"` or `"2.26G"` to bytes, using binary multiples. A bare number is taken as
/// bytes.
pub fn size(input: &str) -> Result<u64, NormalizeError> {
    let input = input.trim();
    let err = || NormalizeError::new("size", input);

    let (number, exponent) = match input.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let exponent = match c.to_ascii_lowercase() {
                'k' => 1,
                'm' => 2,
                'g' => 3,
                _ => return Err(err()),
            };
            (&input[..input.len() - 1], exponent)
        }
        Some(_) => (input, 0),
        None => return Err(err()),
    };

    let number: f64 = number.trim().parse().map_err(|_| err())?;
    if number < 0.0 {
        return Err(err());
    }

    Ok((number * 1024f64.powi(exponent)) as u64)
}

/// `"1000000000 bit/s"` to bits per second.
pub fn line_rate(input: &str) -> Result<u64, NormalizeError> {
    input
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| NormalizeError::new("line rate", input))
}

/// Flags of a boot environment as encoded in its `active` column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotFlags {
    /// `N`: the system is running from it.
    pub current: bool,
    /// `R`: it is used on next boot.
    pub reboot: bool,
}

pub fn snapshot_flags(active: &str) -> SnapshotFlags {
    SnapshotFlags {
        current: active.contains('N'),
        reboot: active.contains('R'),
    }
}

const INTERFACE_TYPES: [&str; 58] = [
    "reserved",
    "other",
    "BBN 1822",
    "HDH 1822",
    "X.25 DDN",
    "X.25",
    "Ethernet",
    "ISO 8802-3 CSMA/CD",
    "ISO 8802-4 Token Bus",
    "ISO 8802-5 Token Ring",
    "ISO 8802-6 DQDB MAN",
    "StarLAN",
    "Proteon proNET-10",
    "Proteon proNET-80",
    "HyperChannel",
    "FDDI",
    "LAP-B",
    "SDLC",
    "T-1",
    "CEPT",
    "Basic rate ISDN",
    "Primary rate ISDN",
    "Proprietary P2P",
    "PPP",
    "Loopback",
    "ISO CLNP over IP",
    "Experimental Ethernet",
    "XNS over IP",
    "SLIP",
    "Ultra Technologies",
    "DS-3",
    "SMDS",
    "Frame Relay",
    "RS-232 serial",
    "Parallel printer port",
    "ARCNET",
    "ARCNET+",
    "ATM",
    "MIOX25",
    "SONET/SDH",
    "X25PLE",
    "ISO 8802-2 LLC",
    "LocalTalk",
    "SMDSDXI",
    "Frame Relay DCE",
    "V.35",
    "HSSI",
    "HIPPI",
    "Generic Modem",
    "ATM AAL5",
    "SONETPATH",
    "SONETVT",
    "SMDS InterCarrier Interface",
    "Proprietary virtual interface",
    "Proprietary multiplexing",
    "Generic tunnel interface",
    "IPv6-to-IPv4 TCP relay capturing interface",
    "6to4 tunnel interface",
];

const UNKNOWN_TYPE: &str = "unknown type ";

/// The ifType number of an interface type description. Unlisted types are `other` (1).
pub fn interface_type(description: &str) -> u32 {
    if let Some(index) = INTERFACE_TYPES.iter().position(|t| *t == description) {
        return index as u32;
    }

    description
        .strip_prefix(UNKNOWN_TYPE)
        .and_then(|code| code.trim().parse().ok())
        .unwrap_or(1)
}

/// Reads a counter that may be encoded as number or numeric string.
pub fn counter(field: &str, value: &Value) -> Result<u64, SkipReason> {
    let malformed = || SkipReason::Malformed {
        field: field.to_owned(),
        value: value.to_string(),
    };

    match value {
        Value::Null => Err(SkipReason::Missing(field.to_owned())),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(malformed),
        Value::String(s) => s.trim().parse().map_err(|_| malformed()),
        _ => Err(malformed()),
    }
}

/// A counter kept as reported until it is used. Reading it tells a missing counter from a
/// malformed one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counter(Value);

impl Counter {
    pub fn read(&self, field: &str) -> Result<u64, SkipReason> {
        counter(field, &self.0)
    }

    pub fn is_missing(&self) -> bool {
        self.0.is_null()
    }
}

impl From<Value> for Counter {
    fn from(value: Value) -> Self {
        Counter(value)
    }
}

impl From<u64> for Counter {
    fn from(value: u64) -> Self {
        Counter(Value::from(value))
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Serde helpers for fields that arrive either as JSON numbers or as numeric strings.
pub mod de {
    use super::*;

    /// Number or numeric string, required.
    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let value = Value::deserialize(d)?;
        match number(&value) {
            Some(n) if n >= 0.0 => Ok(n as u64),
            _ => Err(serde::de::Error::custom(format!(
                "expected a non-negative number, got {}",
                value
            ))),
        }
    }

    /// Number or numeric string, required.
    pub fn i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        number(&value).map(|n| n as i64).ok_or_else(|| {
            serde::de::Error::custom(format!("expected a number, got {}", value))
        })
    }

    /// Absent, `null` or unreadable values become `None`.
    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(number(&value).filter(|n| *n >= 0.0).map(|n| n as u64))
    }

    /// Absent, `null` or unreadable values become `None`.
    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(number(&value).map(|n| n as i64))
    }

    /// Absent, `null` or unreadable values become `None`.
    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(number(&value))
    }

    /// `true`/`false`, `"1"`/`"0"` or a number.
    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let value = Value::deserialize(d)?;
        match value {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            Value::Number(ref n) => Ok(n.as_f64().map(|n| n != 0.0).unwrap_or(false)),
            Value::String(ref s) => match s.trim() {
                "1" | "true" | "yes" => Ok(true),
                "" | "0" | "false" | "no" => Ok(false),
                _ => Err(serde::de::Error::custom(format!("expected a flag, got {}", value))),
            },
            _ => Err(serde::de::Error::custom(format!("expected a flag, got {}", value))),
        }
    }

    /// Number or numeric string rendered as string, e.g. a vhid.
    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let value = Value::deserialize(d)?;
        match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(serde::de::Error::custom(format!(
                "expected a string, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duration() {
        assert_eq!(duration("0.9 ms"), Ok(Some(0.0009)));
        assert_eq!(duration("7.0 ms"), Ok(Some(0.007)));
        assert_eq!(duration("1.5"), Ok(Some(1.5)));
        assert_eq!(duration("2 s"), Ok(Some(2.0)));
        assert_eq!(duration("~"), Ok(None));
        assert!(duration("fast").is_err());
        assert!(duration("5 h").is_err());
        assert!(duration("").is_err());
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent("0.0 %"), Ok(Some(0.0)));
        assert_eq!(percent("100.0 %"), Ok(Some(100.0)));
        assert_eq!(percent("12.5%"), Ok(Some(12.5)));
        assert_eq!(percent("~"), Ok(None));
        assert!(percent("lots").is_err());
    }

    #[test]
    fn test_size() {
        assert_eq!(size("886M"), Ok(929038336));
        assert_eq!(size("2.26G"), Ok(2426656522));
        assert_eq!(size("4k"), Ok(4096));
        assert_eq!(size("512"), Ok(512));
        assert!(size("3T").is_err());
        assert!(size("M").is_err());
        assert!(size("").is_err());
    }

    #[test]
    fn test_line_rate() {
        assert_eq!(line_rate("1000000000 bit/s"), Ok(1_000_000_000));
        assert!(line_rate("unknown").is_err());
    }

    #[test]
    fn test_snapshot_flags() {
        assert_eq!(
            snapshot_flags("NR"),
            SnapshotFlags {
                current: true,
                reboot: true
            }
        );
        assert_eq!(
            snapshot_flags("N"),
            SnapshotFlags {
                current: true,
                reboot: false
            }
        );
        assert_eq!(
            snapshot_flags("R"),
            SnapshotFlags {
                current: false,
                reboot: true
            }
        );
        assert_eq!(snapshot_flags("-"), SnapshotFlags::default());
    }

    #[test]
    fn test_interface_type() {
        assert_eq!(interface_type("reserved"), 0);
        assert_eq!(interface_type("other"), 1);
        assert_eq!(interface_type("Ethernet"), 6);
        assert_eq!(interface_type("Loopback"), 24);
        assert_eq!(interface_type("Generic tunnel interface"), 55);
        assert_eq!(interface_type("6to4 tunnel interface"), 57);
        assert_eq!(interface_type("unknown type 209"), 209);
        assert_eq!(interface_type("unknown type nope"), 1);
        assert_eq!(interface_type("Quantum link"), 1);
    }

    #[test]
    fn test_counter() {
        assert_eq!(counter("bytes-in", &json!(1024)), Ok(1024));
        assert_eq!(counter("bytes-in", &json!("2048")), Ok(2048));
        assert_eq!(
            counter("bytes-in", &Value::Null),
            Err(SkipReason::Missing("bytes-in".to_owned()))
        );
        assert!(matches!(
            counter("bytes-in", &json!("n/a")),
            Err(SkipReason::Malformed { .. })
        ));
        assert!(matches!(
            counter("bytes-in", &json!(-3)),
            Err(SkipReason::Malformed { .. })
        ));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counted {
        #[serde(rename = "bytes-in", default)]
        bytes_in: Counter,
        #[serde(rename = "bytes-out", default)]
        bytes_out: Counter,
    }

    #[test]
    fn test_counter_field() {
        let rec: Counted = serde_json::from_value(json!({"bytes-in": "abc"})).unwrap();
        assert_eq!(
            rec.bytes_in.read("bytes-in"),
            Err(SkipReason::Malformed {
                field: "bytes-in".to_owned(),
                value: "\"abc\"".to_owned(),
            })
        );
        assert!(!rec.bytes_in.is_missing());
        assert!(rec.bytes_out.is_missing());
        assert_eq!(
            rec.bytes_out.read("bytes-out"),
            Err(SkipReason::Missing("bytes-out".to_owned()))
        );
        assert_eq!(Counter::from(7).read("bytes-in"), Ok(7));

        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(serde_json::from_str::<Counted>(&json).unwrap(), rec);
    }

    #[derive(Debug, Deserialize)]
    struct Lenient {
        #[serde(deserialize_with = "de::u64")]
        current: u64,
        #[serde(default, deserialize_with = "de::opt_f64")]
        time: Option<f64>,
        #[serde(default, deserialize_with = "de::flag")]
        enabled: bool,
        #[serde(deserialize_with = "de::string")]
        vhid: String,
    }

    #[test]
    fn test_lenient_fields() {
        let raw = json!({"current": "12", "time": "1.5", "enabled": "1", "vhid": 3});
        let rec: Lenient = serde_json::from_value(raw).unwrap();
        assert_eq!(rec.current, 12);
        assert_eq!(rec.time, Some(1.5));
        assert!(rec.enabled);
        assert_eq!(rec.vhid, "3");

        let rec: Lenient =
            serde_json::from_value(json!({"current": 7, "time": "soon", "vhid": "1"})).unwrap();
        assert_eq!(rec.time, None);
        assert!(!rec.enabled);

        assert!(serde_json::from_value::<Lenient>(json!({"current": "x", "vhid": "1"})).is_err());
    }
}
