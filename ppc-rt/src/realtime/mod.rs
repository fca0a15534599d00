//! Realtime coaching core
//!
//! Frames flow from a `FeatureSource` into the `SessionController`, which
//! corrects them with the performer's calibration, coalesces them through a
//! single-slot mailbox and hands one at a time to a `PolicyEvaluator`.
//! Decisions come back as cues and are logged and broadcast.

pub mod calibration;
pub mod controller;
pub mod feature;
pub mod mailbox;
pub mod navigation;
pub mod offload;
pub mod policy;
pub mod quality;
pub mod storage;

pub use calibration::{CalibrationProfile, CalibrationTuning, Calibrator};
pub use controller::{ControllerDeps, SessionController, SessionState};
pub use feature::{ChannelFeatureSource, FeatureFrame, FeatureSource};
pub use navigation::NavigationSignal;
pub use offload::{DefaultEvaluatorFactory, EvaluatorFactory, OffloadMode, PolicyEvaluator};
pub use policy::{PolicyState, PolicyTuning};
pub use storage::{CalibrationStore, EventLog, PresetStore};
