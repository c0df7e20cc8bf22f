//! Procedural placement of new circular entities.

use crate::config::WorldConfig;
use crate::player::Circle;
use crate::registry::Registry;
use rand::Rng;
use rand_distr::StandardNormal;

/// A source of existing entities a new one must not overlap.
pub trait Obstacles {
    fn overlaps(&self, x: f64, y: f64, radius: f64) -> bool;
}

impl<T: Circle> Obstacles for Registry<T> {
    fn overlaps(&self, x: f64, y: f64, radius: f64) -> bool {
        self.any(|_, entity| {
            let (ex, ey, er) = entity.circle();
            let dx = ex - x;
            let dy = ey - y;
            let reach = radius + er;
            dx * dx + dy * dy <= reach * reach
        })
    }
}

/// A missing source constrains nothing.
impl<O: Obstacles> Obstacles for Option<&O> {
    fn overlaps(&self, x: f64, y: f64, radius: f64) -> bool {
        self.is_some_and(|o| o.overlaps(x, y, radius))
    }
}

/// Pick a point where a circle of `radius` overlaps none of `obstacles`.
///
/// Samples uniformly in a square centered on the origin. After
/// `spawn_max_tries` misses the square doubles, so a bounded population
/// always ends up with room; a very dense world can still take many rounds.
pub fn spawn_coords<R: Rng + ?Sized>(
    rng: &mut R,
    radius: f64,
    obstacles: &[&dyn Obstacles],
    config: &WorldConfig,
) -> (f64, f64) {
    let mut bound = config.spawn_bound;
    let mut tries = 0;

    loop {
        let x = bound * (2.0 * rng.gen::<f64>() - 1.0);
        let y = bound * (2.0 * rng.gen::<f64>() - 1.0);

        if !obstacles.iter().any(|o| o.overlaps(x, y, radius)) {
            return (x, y);
        }

        tries += 1;
        if tries >= config.spawn_max_tries {
            bound *= 2.0;
            tries = 0;
        }
    }
}

/// Radius for a new spore: normally distributed around 10 (σ = 3), at least 5.
pub fn spore_radius<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    (10.0 + z * 3.0).max(5.0)
}
