//! Folded-stacks export
//!
//! One line per unique stack, `frame1;frame2;...;frameN count`, frames in
//! root-to-leaf order, the input format of flamegraph.pl and inferno.

use std::collections::HashMap;
use std::io::Write;

use crate::domain::{ExportError, Sample, Symbol};

/// Which stacks of each sample participate in the aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSelection {
    User,
    Kernel,
    Both,
}

/// Aggregate samples into folded-stack keys and summed counts.
#[must_use]
pub fn build_folded_stacks(
    samples: &[Sample],
    which: StackSelection,
) -> HashMap<String, u64> {
    let mut agg = HashMap::new();

    for sample in samples {
        let mut add = |stack: &[Symbol]| {
            if stack.is_empty() {
                return;
            }
            // Samples are leaf-first; folded stacks want root-first.
            let key = stack
                .iter()
                .rev()
                .map(|sym| escape_folded_name(&sym.name))
                .collect::<Vec<_>>()
                .join(";");
            *agg.entry(key).or_insert(0) += sample.count;
        };

        match which {
            StackSelection::User => add(&sample.user_stack),
            StackSelection::Kernel => add(&sample.kernel_stack),
            StackSelection::Both => {
                add(&sample.user_stack);
                add(&sample.kernel_stack);
            }
        }
    }

    agg
}

/// Semicolons separate frames and newlines separate records, so neither may
/// survive inside a frame name.
fn escape_folded_name(name: &str) -> String {
    let name = name.replace(';', "_").replace('\n', " ");
    let name = name.trim();
    if name.is_empty() {
        "<unknown>".to_string()
    } else {
        name.to_string()
    }
}

/// Write the aggregation as `key count` lines, highest counts first (ties
/// broken by key for deterministic output).
pub fn write_folded_stacks<W: Write>(
    agg: &HashMap<String, u64>,
    writer: &mut W,
) -> Result<(), ExportError> {
    let mut items: Vec<(&String, &u64)> = agg.iter().collect();
    items.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    for (key, count) in items {
        writeln!(writer, "{key} {count}")?;
    }
    Ok(())
}
