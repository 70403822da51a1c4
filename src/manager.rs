use crate::comm::mesh;
use crate::config::Config;
use crate::engine::{Message, Worker};
use crate::topology::Grid;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg = Config::from_file(sim_dir.join("config.toml"))
            .context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Run the whole simulation, one worker thread per country.
    ///
    /// Every worker gets its own copy of the configuration and its endpoint
    /// of the channel mesh; the first failure is propagated once all
    /// workers have been joined. A failing worker drops its endpoint, which
    /// unblocks any peer waiting on it, so errors cascade instead of
    /// hanging the run.
    pub fn run_simulation(&self) -> Result<()> {
        let grid = Grid::new(&self.cfg);
        log::info!(
            "simulating {} countries ({} columns x {} rows)",
            grid.num_tiles(),
            grid.cols,
            grid.rows
        );

        let mut handles = Vec::with_capacity(grid.num_tiles());
        for endpoint in mesh::<Message>(grid.num_tiles()) {
            let cfg = self.cfg.clone();
            let tile = grid.tile(endpoint.rank());
            let sim_dir = self.sim_dir.clone();
            let handle = thread::Builder::new()
                .name(format!("country-{}", endpoint.rank()))
                .spawn(move || Worker::new(cfg, tile, endpoint, sim_dir)?.run())
                .context("failed to spawn worker thread")?;
            handles.push(handle);
        }

        for (rank, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(result) => result.with_context(|| format!("country {rank} failed"))?,
                Err(_) => bail!("country {rank} panicked"),
            }
        }

        log::info!("simulation finished");
        Ok(())
    }

    /// Remove the CSV files left behind by a previous run.
    pub fn clean_sim(&self) -> Result<()> {
        for pattern in ["summary.csv", "detail_*.csv"] {
            let pattern = self.sim_dir.join(pattern);
            let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
            for path in glob(pattern)
                .context("failed to glob output files")?
                .filter_map(Result::ok)
            {
                fs::remove_file(&path).with_context(|| format!("failed to remove {path:?}"))?;
                log::info!("removed {path:?}");
            }
        }
        Ok(())
    }
}
