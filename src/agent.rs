//! The collector: polls the enabled endpoints and writes their documents as agent sections.

use std::io::Write;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::{OpnSenseApi, Transport};
use crate::config::Features;
use crate::error::{AgentError, ApiError};
use crate::section::{self, SectionWriter};

pub struct Agent<T> {
    api: OpnSenseApi<T>,
    features: Features,
}

impl<T: Transport> Agent<T> {
    pub fn new(api: OpnSenseApi<T>, features: Features) -> Self {
        Agent { api, features }
    }

    /// Collects every enabled feature into `out` and returns the number of sections written.
    ///
    /// The first failing request aborts the collection. Sections written before stay in `out`.
    pub fn run<W: Write>(&self, out: W) -> Result<usize, AgentError> {
        let mut writer = SectionWriter::new(out);
        let features = self.features;

        if features.firmware {
            self.firmware(&mut writer)?;
        }
        if features.vip {
            self.vip(&mut writer)?;
        }
        if features.gateway {
            self.gateway(&mut writer)?;
        }
        if features.firewall {
            self.firewall(&mut writer)?;
        }
        if features.ipsec {
            self.ipsec(&mut writer)?;
        }
        if features.unbound {
            self.unbound(&mut writer)?;
        }
        if features.snapshot {
            self.rows(&mut writer, section::SNAPSHOT, ("core", "snapshots", "search"))?;
        }
        if features.ssl {
            self.rows(&mut writer, section::SSL, ("trust", "cert", "search"))?;
        }
        if features.interfaces {
            self.interfaces(&mut writer)?;
        }

        let written = writer.written();
        info!(sections = written, "collection finished");
        Ok(written)
    }

    fn firmware<W: Write>(&self, writer: &mut SectionWriter<W>) -> Result<(), AgentError> {
        let status = self.api.get("core", "firmware", "status")?;
        writer.json(section::FIRMWARE, &status)?;
        info!(section = section::FIRMWARE, "collected");
        Ok(())
    }

    fn vip<W: Write>(&self, writer: &mut SectionWriter<W>) -> Result<(), AgentError> {
        let result = self.api.search("diagnostics", "interface", "get_vip_status")?;

        match result.extra.get("carp") {
            Some(carp) if !carp.is_null() => writer.json(section::CARP, carp)?,
            _ => debug!("vip status without carp object"),
        }
        writer.jsonl(section::VIP, &result.rows)?;
        info!(section = section::VIP, rows = result.rows.len(), "collected");
        Ok(())
    }

    fn gateway<W: Write>(&self, writer: &mut SectionWriter<W>) -> Result<(), AgentError> {
        let items = self.api.get_list("routes", "gateway", "status", "items")?;
        writer.jsonl(section::GATEWAY, &items)?;
        info!(section = section::GATEWAY, rows = items.len(), "collected");
        Ok(())
    }

    fn firewall<W: Write>(&self, writer: &mut SectionWriter<W>) -> Result<(), AgentError> {
        let states = self.api.get("diagnostics", "firewall", "pf_states")?;
        writer.json(section::PF_STATES, &states)?;
        let aliases = self.api.get("firewall", "alias", "get_table_size")?;
        writer.json(section::ALIAS_TABLE, &aliases)?;
        info!(section = section::PF_STATES, "collected");
        Ok(())
    }

    fn ipsec<W: Write>(&self, writer: &mut SectionWriter<W>) -> Result<(), AgentError> {
        self.rows(writer, section::IPSEC, ("ipsec", "connections", "search_connection"))?;
        self.rows(writer, section::IPSEC_PHASE1, ("ipsec", "sessions", "search_phase1"))?;
        self.rows(writer, section::IPSEC_PHASE2, ("ipsec", "sessions", "search_phase2"))
    }

    fn unbound<W: Write>(&self, writer: &mut SectionWriter<W>) -> Result<(), AgentError> {
        let stats = self.api.get("unbound", "diagnostics", "stats")?;
        writer.json(section::UNBOUND, &stats)?;
        info!(section = section::UNBOUND, "collected");
        Ok(())
    }

    fn interfaces<W: Write>(&self, writer: &mut SectionWriter<W>) -> Result<(), AgentError> {
        let (module, controller, command) =
            ("diagnostics", "interface", "get_interface_statistics");
        let mut document = self.api.get(module, controller, command)?;

        let statistics = match document.get_mut("statistics").map(Value::take) {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(ApiError::Shape {
                    url: format!("{}/{}/{}", module, controller, command),
                    reason: "no `statistics` object".to_owned(),
                }
                .into())
            }
        };

        let rows: Vec<Value> = statistics
            .into_iter()
            .map(|(description, statistics)| {
                json!({ "description": description, "statistics": statistics })
            })
            .collect();
        writer.jsonl(section::INTERFACES, &rows)?;
        info!(section = section::INTERFACES, rows = rows.len(), "collected");
        Ok(())
    }

    /// All rows of a paged search as a JSONL section.
    fn rows<W: Write>(
        &self,
        writer: &mut SectionWriter<W>,
        name: &str,
        (module, controller, command): (&str, &str, &str),
    ) -> Result<(), AgentError> {
        let result = self.api.search(module, controller, command)?;
        writer.jsonl(name, &result.rows)?;
        info!(section = name, rows = result.rows.len(), "collected");
        Ok(())
    }
}
