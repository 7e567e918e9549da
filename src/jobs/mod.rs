mod pod;
mod presubmit;
mod prowjob;

pub use pod::{Container, EnvVar, EnvVarSource, PodSpec, Volume};
pub use presubmit::Presubmit;
pub use prowjob::*;
