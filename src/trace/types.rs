use crate::sim::{ActivityId, ResourceId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// What happened to an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    Spawned,
    /// Control handed to the process.
    Resumed,
    /// Suspended until `until_ns`.
    Delayed { until_ns: u64 },
    Requested { resource: ResourceId },
    Granted { resource: ResourceId },
    Released { resource: ResourceId },
    /// Pending request removed from outside.
    Withdrawn { resource: ResourceId },
    /// Pending request removed after the patience ran out.
    Reneged { resource: ResourceId },
    Finished,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Simulated time (ns, same scale as `SimTime.0`).
    pub t_ns: u64,
    pub activity: ActivityId,
    pub name: String,
    #[serde(flatten)]
    pub kind: TraceKind,
}

/// In-memory collector, written out as JSON when the run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLog {
    pub records: Vec<TraceRecord>,
}

impl TraceLog {
    pub fn push(&mut self, rec: TraceRecord) {
        self.records.push(rec);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one activity, in order.
    pub fn for_activity(&self, id: ActivityId) -> impl Iterator<Item = &TraceRecord> + '_ {
        self.records.iter().filter(move |r| r.activity == id)
    }

    /// Time of the first record of `kind` for `id`.
    pub fn first_time(&self, id: ActivityId, kind: &TraceKind) -> Option<u64> {
        self.for_activity(id)
            .find(|r| &r.kind == kind)
            .map(|r| r.t_ns)
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()
    }
}
