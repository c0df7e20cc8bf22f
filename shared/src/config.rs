/// World and gameplay tuning.
///
/// Clients read the same values to keep their prediction in step with the
/// server's validation, so everything here is plain data.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct WorldConfig {
    /// Target spore population kept alive by the replenish loop
    pub max_spores: usize,
    /// Seconds between replenish checks
    pub replenish_interval: f64,
    /// Most spores added per replenish check
    pub replenish_batch: usize,
    /// Seconds to wait between two replenished spores
    pub replenish_pause: f64,
    pub player_start_radius: f64,
    pub player_speed: f64,
    /// Position integration step (seconds)
    pub tick_interval: f64,
    /// Slack added to the touching distance when validating a consumption
    pub consume_buffer: f64,
    /// A player must be more than this many times larger than its prey
    pub min_size_ratio: f64,
    /// Spores per batch when streaming the world to a new player
    pub spore_batch_size: usize,
    /// Seconds between two streamed spore batches
    pub spore_batch_pause: f64,
    /// Half-width of the initial spawn square
    pub spawn_bound: f64,
    /// Failed samples before the spawn square doubles
    pub spawn_max_tries: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_spores: 1000,
            replenish_interval: 2.0,
            replenish_batch: 10,
            replenish_pause: 0.05,
            player_start_radius: 20.0,
            player_speed: 150.0,
            tick_interval: 0.05, // 20 Hz
            consume_buffer: 10.0,
            min_size_ratio: 1.5,
            spore_batch_size: 20,
            spore_batch_pause: 0.05,
            spawn_bound: 3000.0,
            spawn_max_tries: 25,
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.replenish_interval.is_finite() || self.replenish_interval <= 0.0 {
            return Err("replenish_interval must be finite and > 0".to_string());
        }
        if self.replenish_batch == 0 {
            return Err("replenish_batch must be > 0".to_string());
        }
        if !self.replenish_pause.is_finite() || self.replenish_pause < 0.0 {
            return Err("replenish_pause must be finite and >= 0".to_string());
        }
        if !self.player_start_radius.is_finite() || self.player_start_radius <= 0.0 {
            return Err("player_start_radius must be finite and > 0".to_string());
        }
        if !self.player_speed.is_finite() || self.player_speed < 0.0 {
            return Err("player_speed must be finite and >= 0".to_string());
        }
        if !self.tick_interval.is_finite() || self.tick_interval <= 0.0 {
            return Err("tick_interval must be finite and > 0".to_string());
        }
        if !self.consume_buffer.is_finite() || self.consume_buffer < 0.0 {
            return Err("consume_buffer must be finite and >= 0".to_string());
        }
        if !self.min_size_ratio.is_finite() || self.min_size_ratio < 1.0 {
            return Err("min_size_ratio must be finite and >= 1".to_string());
        }
        if self.spore_batch_size == 0 {
            return Err("spore_batch_size must be > 0".to_string());
        }
        if !self.spawn_bound.is_finite() || self.spawn_bound <= 0.0 {
            return Err("spawn_bound must be finite and > 0".to_string());
        }
        if self.spawn_max_tries == 0 {
            return Err("spawn_max_tries must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_world_config_is_valid() {
        let config = WorldConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_tick_interval_invalid() {
        let config = WorldConfig {
            tick_interval: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn size_ratio_below_one_invalid() {
        let config = WorldConfig {
            min_size_ratio: 0.9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
