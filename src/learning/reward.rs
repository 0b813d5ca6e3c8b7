//! Reward shaping for the two driving archetypes. Both functions are pure: the
//! score depends only on the transition and the auxiliary signals passed in.

use crate::learning::action::DriveAction;
use crate::learning::agent_state::DrivingState;
use crate::signal::Phase;

/// Reward for running a red as a cautious driver. Overrides every other term.
pub const CAUTIOUS_RED_PENALTY: f64 = -1.0;
/// Penalty per unit of realised deceleration when braking.
pub const K_DECEL: f64 = 0.08;
/// Scale of the aggressive bonus for going on green far from the light.
pub const R_GREEN: f64 = 0.5;

/// Cautious archetype: stop on red, slow on amber, go on green, brake gently
/// and keep to the limit.
///
/// `epsilon` is the exploration rate at reward time. Overshoot actions are
/// rewarded while it is high and penalised as it decays towards zero.
pub fn cautious_reward(
    prev: &DrivingState,
    action: DriveAction,
    _new: &DrivingState,
    decel: f64,
    epsilon: f64,
) -> f64 {
    let is_go = action.is_go();
    if prev.phase == Phase::Red && is_go {
        return CAUTIOUS_RED_PENALTY;
    }
    let mut reward = if is_go { 0.1 } else { 0.0 };

    match (prev.phase, action) {
        (Phase::Green, a) if a.is_go() => reward += 1.0,
        (Phase::Green, DriveAction::Stop) => reward -= 0.5,
        (Phase::Amber, DriveAction::Slow) => reward += 0.5,
        (Phase::Amber, a) if a.is_go() => reward -= 0.5,
        _ => {}
    }

    if matches!(action, DriveAction::Stop | DriveAction::Slow) {
        reward -= K_DECEL * decel;
    }

    let eps = epsilon.clamp(0.0, 1.0);
    reward += match action {
        DriveAction::GoCompliant => 0.2,
        DriveAction::GoOvershootSmall => eps * 0.5 + (1.0 - eps) * -0.5,
        DriveAction::GoOvershootLarge => eps * 0.3 + (1.0 - eps) * -1.0,
        _ => 0.0,
    };
    reward
}

/// Aggressive archetype: always keen to go, runs ambers, occasionally reds,
/// and likes speeding when the light is about to change.
///
/// The green bonus grows with `dist_bin / max_dist_bin`, and the large
/// overshoot bonus scales with the time-to-switch bin of the new state.
pub fn aggressive_reward(
    prev: &DrivingState,
    action: DriveAction,
    new: &DrivingState,
    dist_bin: u8,
    max_dist_bin: u8,
) -> f64 {
    let phase = prev.phase;
    let is_go = action.is_go();
    let mut reward = if is_go { 0.2 } else { -0.1 };

    if is_go {
        match phase {
            Phase::Green if max_dist_bin > 0 => {
                reward += R_GREEN * (dist_bin as f64 / max_dist_bin as f64)
            }
            Phase::Amber => reward += 0.3,
            Phase::Red => reward -= 0.9,
            _ => {}
        }
    } else if phase == Phase::Green && action == DriveAction::Stop {
        reward -= 1.0;
    }

    match action {
        DriveAction::GoCompliant if phase != Phase::Red => reward += 1.0,
        DriveAction::GoOvershootSmall => reward += 3.0,
        DriveAction::GoOvershootLarge => reward += 3.0 * new.switch_bin as f64,
        _ => {}
    }
    reward
}

/// Extra shaping the aggressive driver applies on the speed it ended up at:
/// slight speeding is encouraged, heavy speeding is not.
pub fn aggressive_speed_shaping(new: &DrivingState) -> f64 {
    match new.speed_bin {
        2 => 0.2,
        3 => -0.5,
        _ => 0.0,
    }
}
