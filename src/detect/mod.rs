mod backend;
pub mod backends;
mod labels;
mod registry;
mod result;

pub use backend::TrackerBackend;
pub use backends::{Scene, SceneDetection, SceneFrame, ScriptedTracker, StubTracker};
pub use labels::{LabelTable, UNKNOWN_LABEL};
pub use registry::BackendRegistry;
pub use result::TrackedDetection;
