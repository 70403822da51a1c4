use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{
    fmt::Debug,
    fs,
    ops::RangeBounds,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

pub const MINUTE: u64 = 60;
pub const DAY: u64 = 24 * 60 * MINUTE;

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Total number of individuals.
    pub n_individuals: u64,
    /// Number of initially infected individuals.
    pub n_infected: u64,

    /// Width of the world rectangle in meters.
    pub world_width: u64,
    /// Length of the world rectangle in meters.
    pub world_length: u64,
    /// Width of a single country, must divide the world width.
    pub country_width: u64,
    /// Length of a single country, must divide the world length.
    pub country_length: u64,

    /// Moving speed of an individual in m/s.
    pub velocity: f64,
    /// Maximum spreading distance in meters.
    pub spreading_distance: f64,

    /// Continuous exposure time needed to become infected, in seconds.
    #[serde(default = "default_t_infection")]
    pub t_infection: u64,
    /// Time needed to recover from an infection, in seconds.
    #[serde(default = "default_t_recovery")]
    pub t_recovery: u64,
    /// Duration of the immunity period after recovering, in seconds.
    #[serde(default = "default_t_immunity")]
    pub t_immunity: u64,

    /// Simulation step in seconds.
    pub t_step: u64,
    /// Length of the simulation in days.
    pub days: u64,

    /// Seed of the per-country pseudo-random number generators.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Write the per-individual detail trace.
    #[serde(default)]
    pub trace: bool,
}

fn default_t_infection() -> u64 {
    10 * MINUTE
}

fn default_t_recovery() -> u64 {
    10 * DAY
}

fn default_t_immunity() -> u64 {
    90 * DAY
}

fn default_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Timestamp at which the simulation stops, in seconds.
    pub fn t_target(&self) -> u64 {
        self.days * DAY
    }

    fn validate(&self) -> Result<()> {
        check_num(self.n_individuals, 1..100_000_000).context("invalid number of individuals")?;
        if self.n_infected > self.n_individuals {
            bail!(
                "initially infected individuals exceed the population ({} > {})",
                self.n_infected,
                self.n_individuals
            );
        }

        check_num(self.world_width, 1..).context("invalid world width")?;
        check_num(self.world_length, 1..).context("invalid world length")?;
        if self.country_width > self.world_width || self.country_length > self.world_length {
            bail!("country dimensions cannot exceed world dimensions");
        }
        if self.country_width == 0 || self.world_width % self.country_width != 0 {
            bail!("country width must divide the world width");
        }
        if self.country_length == 0 || self.world_length % self.country_length != 0 {
            bail!("country length must divide the world length");
        }

        if self.velocity <= 0.0 {
            bail!("velocity must be positive");
        }
        if self.spreading_distance <= 0.0 {
            bail!("spreading distance must be positive");
        }

        check_num(self.t_step, 1..=DAY).context("invalid simulation step")?;
        let max_displ = self.t_step as f64 * self.velocity;
        let min_side = self.country_width.min(self.country_length);
        if max_displ > min_side as f64 {
            bail!("the movement at each step is larger than a country: t * v = {max_displ} > {min_side}");
        }

        check_num(self.days, 1..10_000).context("invalid number of days")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str(
            r#"
            n_individuals = 100
            n_infected = 5
            world_width = 100
            world_length = 50
            country_width = 50
            country_length = 50
            velocity = 1.4
            spreading_distance = 2.0
            t_step = 10
            days = 2
            seed = 42
            "#,
        )
        .expect("failed to parse base config")
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = base_config();
        assert_eq!(cfg.t_infection, 10 * MINUTE);
        assert_eq!(cfg.t_recovery, 10 * DAY);
        assert_eq!(cfg.t_immunity, 90 * DAY);
        assert!(!cfg.trace);
        assert_eq!(cfg.t_target(), 2 * DAY);
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_excess_infected() {
        let mut cfg = base_config();
        cfg.n_infected = cfg.n_individuals + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_dividing_country() {
        let mut cfg = base_config();
        cfg.country_width = 33;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_oversized_country() {
        let mut cfg = base_config();
        cfg.country_length = cfg.world_length + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_velocity() {
        let mut cfg = base_config();
        cfg.velocity = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_step_longer_than_a_day() {
        let mut cfg = base_config();
        cfg.t_step = DAY + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_step_crossing_a_country() {
        let mut cfg = base_config();
        // 100 s * 1.4 m/s > 50 m
        cfg.t_step = 100;
        assert!(cfg.validate().is_err());
    }
}
