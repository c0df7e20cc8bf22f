//! Growth law, consumption plausibility checks and position integration.
//!
//! These are the numbers clients predict locally, so the server must reach
//! the same outcome for every claim it accepts.

use crate::player::Player;
use std::f64::consts::PI;

/// Why a consumption claim was thrown away.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("spore with id {0} does not exist")]
    SporeNotFound(u64),
    #[error("player with id {0} does not exist")]
    PlayerNotFound(u64),
    #[error("a player cannot consume itself")]
    SelfConsumption,
    #[error("player is too far from the object (distSq: {dist_sq:.2}, thresholdSq: {threshold_sq:.2})")]
    TooFar { dist_sq: f64, threshold_sq: f64 },
    #[error("player's radius not big enough ({radius:.2} <= {other_radius:.2} x {ratio})")]
    TooSmall {
        radius: f64,
        other_radius: f64,
        ratio: f64,
    },
}

pub fn rad_to_mass(radius: f64) -> f64 {
    PI * radius * radius
}

pub fn mass_to_rad(mass: f64) -> f64 {
    (mass / PI).sqrt()
}

/// Radius after absorbing a body of `eaten_radius`: areas add up.
pub fn grown_radius(radius: f64, eaten_radius: f64) -> f64 {
    mass_to_rad(rad_to_mass(radius) + rad_to_mass(eaten_radius))
}

/// Leaderboard score for a body of this radius.
pub fn score(radius: f64) -> i64 {
    rad_to_mass(radius).round() as i64
}

/// The claimed target must be within touching distance plus `buffer`.
pub fn check_within_reach(
    player: &Player,
    (obj_x, obj_y, obj_radius): (f64, f64, f64),
    buffer: f64,
) -> Result<(), Rejection> {
    let dx = player.x - obj_x;
    let dy = player.y - obj_y;
    let dist_sq = dx * dx + dy * dy;

    let threshold = player.radius + buffer + obj_radius;
    let threshold_sq = threshold * threshold;

    if dist_sq > threshold_sq {
        return Err(Rejection::TooFar {
            dist_sq,
            threshold_sq,
        });
    }
    Ok(())
}

/// A player may only eat another that is strictly more than `ratio` times
/// smaller.
pub fn check_big_enough(radius: f64, other_radius: f64, ratio: f64) -> Result<(), Rejection> {
    if radius <= other_radius * ratio {
        return Err(Rejection::TooSmall {
            radius,
            other_radius,
            ratio,
        });
    }
    Ok(())
}

/// Advance the player along its heading by one fixed step.
pub fn integrate(player: &mut Player, dt: f64) {
    player.x += player.speed * player.direction.cos() * dt;
    player.y += player.speed * player.direction.sin() * dt;
}
