//! The agent output format connecting collection and evaluation.
//!
//! Each section starts with a `<<<name:sep(0)>>>` header, followed by either one JSON document or
//! one JSON document per line.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ShapeError;

pub const FIRMWARE: &str = "opnsense_firmware";
pub const CARP: &str = "opnsense_carp";
pub const VIP: &str = "opnsense_vip";
pub const GATEWAY: &str = "opnsense_gateway";
pub const PF_STATES: &str = "opnsense_pf_states";
pub const ALIAS_TABLE: &str = "opnsense_alias_table";
pub const IPSEC: &str = "opnsense_ipsec";
pub const IPSEC_PHASE1: &str = "opnsense_ipsec_phase1";
pub const IPSEC_PHASE2: &str = "opnsense_ipsec_phase2";
pub const UNBOUND: &str = "opnsense_unbound";
pub const SNAPSHOT: &str = "opnsense_snapshot";
pub const SSL: &str = "opnsense_ssl";
pub const INTERFACES: &str = "opnsense_interfaces";

/// Writes sections to the agent output.
pub struct SectionWriter<W> {
    out: W,
    written: usize,
}

impl<W: Write> SectionWriter<W> {
    pub fn new(out: W) -> Self {
        SectionWriter { out, written: 0 }
    }

    fn header(&mut self, name: &str) -> io::Result<()> {
        self.written += 1;
        writeln!(self.out, "<<<{}:sep(0)>>>", name)
    }

    /// A section holding a single JSON document.
    pub fn json<T: Serialize>(&mut self, name: &str, document: &T) -> io::Result<()> {
        self.header(name)?;
        serde_json::to_writer(&mut self.out, document)?;
        writeln!(self.out)
    }

    /// A section holding one JSON document per line.
    pub fn jsonl<'a, T, I>(&mut self, name: &str, rows: I) -> io::Result<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        self.header(name)?;
        for row in rows {
            serde_json::to_writer(&mut self.out, row)?;
            writeln!(self.out)?;
        }
        Ok(())
    }

    /// Number of sections written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Agent output split into its sections.
#[derive(Debug, Default, Clone)]
pub struct AgentOutput {
    sections: BTreeMap<String, Vec<String>>,
}

impl AgentOutput {
    pub fn parse(text: &str) -> Self {
        let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in text.lines() {
            if let Some(header) = line
                .trim()
                .strip_prefix("<<<")
                .and_then(|l| l.strip_suffix(">>>"))
            {
                let name = header.split(':').next().unwrap_or(header).to_owned();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            if let Some(ref name) = current {
                sections.entry(name.clone()).or_default().push(line.to_owned());
            }
        }

        AgentOutput { sections }
    }

    /// Lines of a section; `None` when the section is absent or empty.
    pub fn lines(&self, name: &str) -> Option<&[String]> {
        self.sections
            .get(name)
            .filter(|lines| !lines.is_empty())
            .map(|lines| lines.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|s| s.as_str())
    }

    /// Decodes a section holding one JSON document.
    pub fn json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ShapeError> {
        let lines = match self.lines(name) {
            Some(lines) => lines,
            None => return Ok(None),
        };

        serde_json::from_str(&lines.join("\n"))
            .map(Some)
            .map_err(|err| ShapeError::Json {
                section: name.to_owned(),
                reason: err.to_string(),
            })
    }

    /// Decodes a section holding one JSON document per line.
    pub fn jsonl<T: DeserializeOwned>(&self, name: &str) -> Result<Option<Vec<T>>, ShapeError> {
        let lines = match self.lines(name) {
            Some(lines) => lines,
            None => return Ok(None),
        };

        lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|err| ShapeError::Json {
                    section: name.to_owned(),
                    reason: format!("line {}: {}", idx + 1, err),
                })
            })
            .collect::<Result<Vec<T>, _>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_write_and_parse() {
        let mut writer = SectionWriter::new(Vec::new());
        writer
            .json(CARP, &json!({"demotion": "0", "maintenancemode": false}))
            .unwrap();
        writer
            .jsonl(GATEWAY, &[json!({"name": "GW_A"}), json!({"name": "GW_B"})])
            .unwrap();
        writer.jsonl::<Value, _>(VIP, &[]).unwrap();
        assert_eq!(writer.written(), 3);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            text,
            "<<<opnsense_carp:sep(0)>>>\n\
             {\"demotion\":\"0\",\"maintenancemode\":false}\n\
             <<<opnsense_gateway:sep(0)>>>\n\
             {\"name\":\"GW_A\"}\n\
             {\"name\":\"GW_B\"}\n\
             <<<opnsense_vip:sep(0)>>>\n"
        );

        let output = AgentOutput::parse(&text);
        let carp: Value = output.json(CARP).unwrap().unwrap();
        assert_eq!(carp["demotion"], "0");
        let gateways: Vec<Value> = output.jsonl(GATEWAY).unwrap().unwrap();
        assert_eq!(gateways.len(), 2);
        assert!(output.jsonl::<Value>(VIP).unwrap().is_none());
        assert!(output.json::<Value>(FIRMWARE).unwrap().is_none());
        assert_eq!(output.names().count(), 3);
    }

    #[test]
    fn test_malformed_section() {
        let output =
            AgentOutput::parse("<<<opnsense_gateway:sep(0)>>>\n{\"name\": \"GW_A\"}\nnope\n");
        let err = output.jsonl::<Value>(GATEWAY).unwrap_err();
        assert!(matches!(err, ShapeError::Json { ref section, .. } if section == GATEWAY));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_lines_before_first_header_are_ignored() {
        let output = AgentOutput::parse("garbage\n\n<<<opnsense_firmware>>>\n{}\n");
        assert_eq!(output.lines(FIRMWARE), Some(&["{}".to_owned()][..]));
    }
}
