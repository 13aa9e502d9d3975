pub mod scripted;
pub mod stub;

pub use scripted::{Scene, SceneDetection, SceneFrame, ScriptedTracker};
pub use stub::StubTracker;
