//! Navigation and lifecycle signals
//!
//! The host pushes the identifier of the visible surface (plus visibility and
//! teardown signals). The controller classifies the surface and decides
//! whether to pause, resume or stop the session.

use serde::{Deserialize, Serialize};

/// Signal pushed by the hosting surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum NavigationSignal {
    /// A surface became visible
    Surface { surface_id: String },
    /// The host was backgrounded
    Hidden,
    /// The host is being torn down
    Teardown,
}

/// How a surface relates to practice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceClass {
    Practice,
    /// Informational surface next to practice (e.g. the parent zone)
    PausedAdjacent,
    Unrelated,
}

#[derive(Debug, Clone)]
pub struct SurfaceClassifier {
    paused_adjacent: Vec<String>,
    practice_prefixes: Vec<String>,
}

impl Default for SurfaceClassifier {
    fn default() -> Self {
        Self::new(
            vec!["view-parent".to_string()],
            [
                "view-home",
                "view-coach",
                "view-games",
                "view-songs",
                "view-tuner",
                "view-progress",
                "view-analysis",
                "view-game-",
                "view-song-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }
}

impl SurfaceClassifier {
    pub fn new(paused_adjacent: Vec<String>, practice_prefixes: Vec<String>) -> Self {
        Self {
            paused_adjacent,
            practice_prefixes,
        }
    }

    pub fn classify(&self, surface_id: &str) -> SurfaceClass {
        let id = surface_id.trim().trim_start_matches('#');
        if self.paused_adjacent.iter().any(|s| s == id) {
            SurfaceClass::PausedAdjacent
        } else if self.practice_prefixes.iter().any(|p| id.starts_with(p.as_str())) {
            SurfaceClass::Practice
        } else {
            SurfaceClass::Unrelated
        }
    }
}

/// What the controller should do in response to a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationAction {
    Pause,
    Resume,
    Stop(&'static str),
    Ignore,
}

pub const STOP_REASON_LEAVING: &str = "leaving-practice";
pub const STOP_REASON_TEARDOWN: &str = "pagehide";

/// Map a signal onto a lifecycle action given the current session flags
pub fn decide(
    classifier: &SurfaceClassifier,
    signal: &NavigationSignal,
    active: bool,
    paused: bool,
) -> NavigationAction {
    if !active {
        return NavigationAction::Ignore;
    }
    match signal {
        NavigationSignal::Surface { surface_id } => match classifier.classify(surface_id) {
            SurfaceClass::PausedAdjacent if !paused => NavigationAction::Pause,
            SurfaceClass::Practice if paused => NavigationAction::Resume,
            SurfaceClass::Unrelated => NavigationAction::Stop(STOP_REASON_LEAVING),
            _ => NavigationAction::Ignore,
        },
        NavigationSignal::Hidden if !paused => NavigationAction::Pause,
        NavigationSignal::Hidden => NavigationAction::Ignore,
        NavigationSignal::Teardown => NavigationAction::Stop(STOP_REASON_TEARDOWN),
    }
}
