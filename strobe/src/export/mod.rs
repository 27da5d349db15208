//! Profile exporters
//!
//! Pure transformers from collected [`crate::domain::Sample`]s to the
//! supported output formats:
//!
//! - [`folded`]: flamegraph.pl / inferno folded-stacks text
//! - [`pprof`]: gzipped pprof `profile.proto`
//! - [`otlp`]: OTLP profiles (development) `ProfilesData`

pub mod folded;
pub mod otlp;
pub mod otlp_proto;
pub mod pprof;
pub mod pprof_proto;

pub use folded::{build_folded_stacks, write_folded_stacks, StackSelection};
pub use otlp::build_otlp_profile;
pub use pprof::{build_pprof_profile, write_profile_gzip};
