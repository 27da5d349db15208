//! pprof profile builder
//!
//! Each collected sample becomes up to two pprof samples: the user and the
//! kernel stack separately, tagged with a `profile_type` label. This keeps
//! the two sides separable downstream. Functions are deduplicated by name
//! and locations by address.

use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;
use std::collections::HashMap;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use super::pprof_proto as proto;
use crate::domain::{ExportError, Sample, Symbol};

/// Interned string table; index 0 is always the empty string.
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, i64>,
}

impl StringTable {
    fn new() -> Self {
        let mut table = Self { strings: Vec::new(), index: HashMap::new() };
        table.intern("");
        table
    }

    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as i64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }
}

/// Build a pprof profile from collected samples.
///
/// `sample_type_name`/`sample_type_unit` describe the single value column
/// (usually "samples"/"count"). An empty input produces an empty profile.
#[must_use]
pub fn build_pprof_profile(
    samples: &[Sample],
    sample_type_name: &str,
    sample_type_unit: &str,
) -> proto::Profile {
    if samples.is_empty() {
        return proto::Profile::default();
    }

    let mut st = StringTable::new();
    let mut profile = proto::Profile {
        sample_type: vec![proto::ValueType {
            r#type: st.intern(sample_type_name),
            unit: st.intern(sample_type_unit),
        }],
        period_type: Some(proto::ValueType {
            r#type: st.intern("cpu"),
            unit: st.intern("nanoseconds"),
        }),
        ..Default::default()
    };

    let label_key = st.intern("profile_type");
    let user_label = st.intern("user");
    let kernel_label = st.intern("kernel");

    let mut func_ids: HashMap<String, u64> = HashMap::new();
    let mut loc_ids: HashMap<u64, u64> = HashMap::new();

    let mut location_for = |sym: &Symbol,
                            st: &mut StringTable,
                            profile: &mut proto::Profile|
     -> u64 {
        if let Some(&id) = loc_ids.get(&sym.addr) {
            return id;
        }

        let func_id = match func_ids.get(&sym.name) {
            Some(&id) => id,
            None => {
                let id = profile.function.len() as u64 + 1;
                let name = st.intern(&sym.name);
                profile.function.push(proto::Function {
                    id,
                    name,
                    system_name: name,
                    ..Default::default()
                });
                func_ids.insert(sym.name.clone(), id);
                id
            }
        };

        let id = profile.location.len() as u64 + 1;
        profile.location.push(proto::Location {
            id,
            address: sym.addr,
            line: vec![proto::Line { function_id: func_id, line: 0 }],
            ..Default::default()
        });
        loc_ids.insert(sym.addr, id);
        id
    };

    for sample in samples {
        let mut emit = |stack: &[Symbol], label: i64| {
            if stack.is_empty() {
                return;
            }
            // pprof stacks are leaf-first, same as ours.
            let location_id: Vec<u64> =
                stack.iter().map(|sym| location_for(sym, &mut st, &mut profile)).collect();

            profile.sample.push(proto::Sample {
                location_id,
                value: vec![sample.count as i64],
                label: vec![proto::Label {
                    key: label_key,
                    str: label,
                    ..Default::default()
                }],
            });
        };

        emit(&sample.user_stack, user_label);
        emit(&sample.kernel_stack, kernel_label);
    }

    let first = samples.iter().map(|s| s.timestamp).min().unwrap_or(UNIX_EPOCH);
    let last = samples.iter().map(|s| s.timestamp).max().unwrap_or(first);
    profile.time_nanos = unix_nanos(first) as i64;
    profile.duration_nanos =
        last.duration_since(first).map_or(0, |d| d.as_nanos() as i64);

    profile.string_table = st.strings;
    profile
}

/// Serialize and gzip a profile, as pprof tooling expects.
pub fn write_profile_gzip<W: Write>(
    profile: &proto::Profile,
    writer: W,
) -> Result<(), ExportError> {
    let encoded = profile.encode_to_vec();
    let mut gz = GzEncoder::new(writer, Compression::default());
    gz.write_all(&encoded)?;
    gz.finish()?;
    Ok(())
}

fn unix_nanos(ts: SystemTime) -> u128 {
    ts.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos()
}
