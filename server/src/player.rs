use parking_lot::Mutex;
use std::sync::Arc;

/// A live player. Shared between the owning connection's handlers and its
/// position loop; peers only read it.
#[derive(Debug, Clone, Default)]
pub struct Player {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// Heading in radians
    pub direction: f64,
    pub speed: f64,
    pub best_score: i64,
    /// Player record id in the store
    pub db_id: i64,
    pub color: u32,
}

impl Player {
    /// Fresh record for the same account, as used on respawn.
    pub fn reset(&self) -> Self {
        Self {
            name: self.name.clone(),
            best_score: self.best_score,
            db_id: self.db_id,
            color: self.color,
            ..Default::default()
        }
    }
}

pub type SharedPlayer = Arc<Mutex<Player>>;

/// A consumable blob. Immutable once placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spore {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

/// Anything round that takes up space in the world.
pub trait Circle {
    fn position(&self) -> (f64, f64);
    fn radius(&self) -> f64;

    /// Position and radius read together.
    fn circle(&self) -> (f64, f64, f64) {
        let (x, y) = self.position();
        (x, y, self.radius())
    }
}

impl Circle for Spore {
    fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    fn radius(&self) -> f64 {
        self.radius
    }
}

impl Circle for Player {
    fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    fn radius(&self) -> f64 {
        self.radius
    }
}

impl Circle for SharedPlayer {
    fn position(&self) -> (f64, f64) {
        let p = self.lock();
        (p.x, p.y)
    }

    fn radius(&self) -> f64 {
        self.lock().radius
    }

    fn circle(&self) -> (f64, f64, f64) {
        let p = self.lock();
        (p.x, p.y, p.radius)
    }
}

/// Generate a color from an id using golden angle hue distribution.
pub fn color_from_id(id: u64) -> u32 {
    let hue = (id.wrapping_mul(137)) % 360;
    hsv_to_rgb(hue as f64, 0.55, 0.95)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> u32 {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    let ri = ((r + m) * 255.0).round() as u32;
    let gi = ((g + m) * 255.0).round() as u32;
    let bi = ((b + m) * 255.0).round() as u32;

    (ri << 16) | (gi << 8) | bi
}
