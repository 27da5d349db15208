//! OTLP profiles builder
//!
//! Builds one `ProfilesData` message with a single profile: each sample
//! contributes one dictionary stack made of its user frames followed by its
//! kernel frames (both leaf-first) and one sample entry carrying the count
//! and the collection timestamp.

use std::time::{SystemTime, UNIX_EPOCH};

use super::otlp_proto as proto;
use crate::domain::{Sample, Symbol};

/// Build an OTLP profiles message. `now_unix_nano` stamps the profile
/// itself; per-sample timestamps come from the samples.
#[must_use]
pub fn build_otlp_profile(samples: &[Sample], now_unix_nano: u64) -> proto::ProfilesData {
    let mut string_table = vec![String::new()];
    // Index 0 of each dictionary table is a placeholder zero value.
    let mut mapping_table = vec![proto::Mapping::default()];
    let mut location_table = vec![proto::Location::default()];
    let mut function_table = vec![proto::Function::default()];
    let mut stack_table = vec![proto::Stack::default()];

    let sample_type = proto::ValueType {
        type_strindex: str_index(&mut string_table, "samples"),
        unit_strindex: str_index(&mut string_table, "count"),
    };

    let mut profile_samples = Vec::with_capacity(samples.len());

    for sample in samples {
        if sample.user_stack.is_empty() && sample.kernel_stack.is_empty() {
            continue;
        }

        let mut location_indices =
            Vec::with_capacity(sample.user_stack.len() + sample.kernel_stack.len());
        for sym in sample.user_stack.iter().chain(&sample.kernel_stack) {
            location_indices.push(push_location(
                sym,
                &mut string_table,
                &mut function_table,
                &mut location_table,
            ));
        }

        stack_table.push(proto::Stack { location_indices });
        let stack_index = (stack_table.len() - 1) as i32;

        profile_samples.push(proto::Sample {
            stack_index,
            values: vec![sample.count as i64],
            attribute_indices: Vec::new(),
            link_index: 0,
            timestamps_unix_nano: vec![unix_nanos(sample.timestamp)],
        });
    }

    let profile = proto::Profile {
        sample_type: Some(sample_type),
        samples: profile_samples,
        time_unix_nano: now_unix_nano,
        duration_nano: 0,
    };

    proto::ProfilesData {
        resource_profiles: vec![proto::ResourceProfiles {
            resource: Some(proto::Resource {}),
            scope_profiles: vec![proto::ScopeProfiles {
                scope: Some(proto::InstrumentationScope {
                    name: "strobe".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }),
                profiles: vec![profile],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
        dictionary: Some(proto::ProfilesDictionary {
            mapping_table,
            location_table,
            function_table,
            string_table,
            stack_table,
        }),
    }
}

fn push_location(
    sym: &Symbol,
    string_table: &mut Vec<String>,
    function_table: &mut Vec<proto::Function>,
    location_table: &mut Vec<proto::Location>,
) -> i32 {
    let name_idx = str_index(string_table, &sym.name);
    function_table.push(proto::Function {
        name_strindex: name_idx,
        system_name_strindex: name_idx,
        ..Default::default()
    });
    let function_index = (function_table.len() - 1) as i32;

    location_table.push(proto::Location {
        mapping_index: 0,
        address: sym.addr,
        lines: vec![proto::Line { function_index, line: 0, column: 0 }],
    });
    (location_table.len() - 1) as i32
}

fn str_index(table: &mut Vec<String>, s: &str) -> i32 {
    if let Some(idx) = table.iter().position(|v| v == s) {
        return idx as i32;
    }
    table.push(s.to_string());
    (table.len() - 1) as i32
}

fn unix_nanos(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sym(name: &str, addr: u64, offset: u64) -> Symbol {
        Symbol { name: name.to_string(), addr, offset }
    }

    #[test]
    fn builds_dictionary_tables_with_placeholders() {
        let ts = UNIX_EPOCH + Duration::new(10, 123_456_789);
        let samples = vec![Sample {
            timestamp: ts,
            user_stack: vec![sym("foo", 0x1000, 0x10), sym("bar", 0x1100, 0)],
            kernel_stack: vec![],
            count: 5,
        }];

        let data = build_otlp_profile(&samples, 9_999_999_999);
        let dict = data.dictionary.as_ref().unwrap();

        assert_eq!(dict.string_table, vec!["", "samples", "count", "foo", "bar"]);
        assert_eq!(dict.mapping_table.len(), 1); // placeholder only

        assert_eq!(dict.function_table.len(), 3);
        assert_eq!(dict.function_table[1].name_strindex, 3); // "foo"
        assert_eq!(dict.function_table[1].system_name_strindex, 3);
        assert_eq!(dict.function_table[2].name_strindex, 4); // "bar"

        assert_eq!(dict.location_table.len(), 3);
        assert_eq!(dict.location_table[1].address, 0x1000);
        assert_eq!(dict.location_table[1].lines[0].function_index, 1);
        assert_eq!(dict.location_table[2].address, 0x1100);

        assert_eq!(dict.stack_table.len(), 2);
        assert_eq!(dict.stack_table[1].location_indices, vec![1, 2]);
    }

    #[test]
    fn emits_one_sample_with_count_and_timestamp() {
        let ts = UNIX_EPOCH + Duration::new(10, 123_456_789);
        let samples = vec![Sample {
            timestamp: ts,
            user_stack: vec![sym("foo", 0x1000, 0)],
            kernel_stack: vec![],
            count: 5,
        }];

        let data = build_otlp_profile(&samples, 9_999_999_999);
        let profile = &data.resource_profiles[0].scope_profiles[0].profiles[0];

        assert_eq!(profile.time_unix_nano, 9_999_999_999);
        assert_eq!(profile.samples.len(), 1);
        assert_eq!(profile.samples[0].stack_index, 1);
        assert_eq!(profile.samples[0].values, vec![5]);
        assert_eq!(profile.samples[0].timestamps_unix_nano, vec![10_123_456_789]);

        let st = profile.sample_type.unwrap();
        assert_eq!(st.type_strindex, 1);
        assert_eq!(st.unit_strindex, 2);
    }

    #[test]
    fn combines_user_and_kernel_frames_in_one_stack() {
        let samples = vec![Sample {
            timestamp: SystemTime::now(),
            user_stack: vec![sym("u", 0x10, 0)],
            kernel_stack: vec![sym("k", 0xffff_ffff_8100_0000, 0)],
            count: 1,
        }];

        let data = build_otlp_profile(&samples, 1);
        let dict = data.dictionary.as_ref().unwrap();
        assert_eq!(dict.stack_table[1].location_indices.len(), 2);
        assert_eq!(dict.location_table[1].address, 0x10);
        assert_eq!(dict.location_table[2].address, 0xffff_ffff_8100_0000);
    }

    #[test]
    fn skips_samples_with_no_frames() {
        let samples = vec![Sample {
            timestamp: SystemTime::now(),
            user_stack: vec![],
            kernel_stack: vec![],
            count: 9,
        }];

        let data = build_otlp_profile(&samples, 1);
        let profile = &data.resource_profiles[0].scope_profiles[0].profiles[0];
        assert!(profile.samples.is_empty());
    }

    #[test]
    fn scope_names_the_producer() {
        let data = build_otlp_profile(&[], 1);
        let scope =
            data.resource_profiles[0].scope_profiles[0].scope.as_ref().unwrap();
        assert_eq!(scope.name, "strobe");
    }
}
