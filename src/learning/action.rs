use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Symbolic driving actions shared by both archetypes. Their simulator-level
/// meaning is owned by the driving style.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DriveAction {
    Stop,
    Slow,
    GoCompliant,
    GoOvershootSmall,
    GoOvershootLarge,
}

impl DriveAction {
    pub fn all() -> Vec<DriveAction> {
        DriveAction::iter().collect()
    }

    pub fn is_go(&self) -> bool {
        matches!(
            self,
            DriveAction::GoCompliant | DriveAction::GoOvershootSmall | DriveAction::GoOvershootLarge
        )
    }
}
