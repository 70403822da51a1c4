use crate::comm::Endpoint;
use crate::config::{Config, DAY};
use crate::model::{Individual, Status};
use crate::report::{DetailWriter, SummaryWriter};
use crate::store::{Population, scan_remove};
use crate::topology::{Direction, NUM_DIRECTIONS, Tile, distribute_uniform, starting_ids};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Uniform;
use std::{f64::consts::TAU, mem, path::Path};

/// Rank coordinating the scatter, gathers and reductions.
pub const ROOT: usize = 0;

/// Message exchanged between country workers.
#[derive(Debug, Clone)]
pub enum Message {
    /// Initial share of the population, scattered by the root.
    Assignment(Assignment),
    /// Individuals entering the destination country this tick.
    Migrants(Vec<Individual>),
    /// Daily per-country census, gathered at the root.
    Census(u64, u64, u64),
    /// Infected count: per-country towards the root, global total back.
    Infected(u64),
}

/// Share of the population assigned to one country.
#[derive(Debug, Clone, Copy)]
pub struct Assignment {
    pub individuals: u64,
    pub infected: u64,
    pub start_id: u64,
}

/// Simulation worker of a single country.
///
/// Owns the resident population, a seeded random number generator and this
/// rank's endpoint of the channel mesh. Every worker executes the same tick
/// loop; the root additionally distributes the population and writes the
/// daily summary.
pub struct Worker {
    cfg: Config,
    tile: Tile,
    endpoint: Endpoint<Message>,
    pop: Population,
    rng: ChaCha12Rng,
    outbound: [Vec<Individual>; NUM_DIRECTIONS],
    detail: Option<DetailWriter>,
    summary: Option<SummaryWriter>,
}

impl Worker {
    pub fn new<P: AsRef<Path>>(
        cfg: Config,
        tile: Tile,
        endpoint: Endpoint<Message>,
        sim_dir: P,
    ) -> Result<Self> {
        let sim_dir = sim_dir.as_ref();
        let detail = cfg
            .trace
            .then(|| DetailWriter::create(sim_dir, tile.rank))
            .transpose()
            .context("failed to create detail trace")?;
        let summary = (tile.rank == ROOT)
            .then(|| SummaryWriter::create(sim_dir))
            .transpose()
            .context("failed to create summary")?;
        let rng = ChaCha12Rng::seed_from_u64(cfg.seed.wrapping_add(tile.rank as u64));

        Ok(Self {
            pop: Population::with_capacity(0),
            rng,
            outbound: Default::default(),
            detail,
            summary,
            cfg,
            tile,
            endpoint,
        })
    }

    /// Run the simulation to completion.
    pub fn run(mut self) -> Result<()> {
        let assignment = self.receive_assignment()?;
        log::info!(
            "country {} of {}: {} individuals ({} infected), ids from {}",
            self.tile.rank,
            self.endpoint.size(),
            assignment.individuals,
            assignment.infected,
            assignment.start_id
        );
        self.init_population(&assignment)?;

        let mut t = 0;
        let mut day = 0;
        self.write_trace(t)?;

        loop {
            let infected = self.global_infected()?;
            if infected == 0 {
                if self.tile.rank == ROOT {
                    log::info!("no infected individuals remain, stopping at t = {t}");
                }
                break;
            }
            if t >= self.cfg.t_target() {
                break;
            }

            self.update_exposure();
            self.update_status();
            self.update_position();
            self.exchange_migrants()?;
            t += self.cfg.t_step;

            self.write_trace(t)?;
            if t / DAY > day {
                day = t / DAY;
                self.report_census(day)?;
            }
        }

        if let Some(detail) = &mut self.detail {
            detail.flush()?;
        }
        Ok(())
    }

    /// Take this country's share of the population from the root's scatter.
    ///
    /// The root splits individuals and initially infected uniformly and
    /// derives the starting ids as an exclusive prefix sum, so id ranges
    /// never overlap.
    fn receive_assignment(&mut self) -> Result<Assignment> {
        let assignments = (self.tile.rank == ROOT).then(|| {
            let counts = distribute_uniform(self.cfg.n_individuals, self.endpoint.size());
            let infected = distribute_uniform(self.cfg.n_infected, self.endpoint.size());
            let ids = starting_ids(&counts);
            counts
                .iter()
                .zip(&infected)
                .zip(&ids)
                .map(|((&individuals, &infected), &start_id)| {
                    Message::Assignment(Assignment {
                        individuals,
                        infected,
                        start_id,
                    })
                })
                .collect()
        });

        match self.endpoint.scatter(ROOT, assignments)? {
            Message::Assignment(assignment) => Ok(assignment),
            other => bail!("expected the population assignment, got {other:?}"),
        }
    }

    /// Create this country's residents uniformly inside its rectangle.
    ///
    /// Each individual gets a fixed displacement: velocity scaled by the
    /// tick length, along a direction drawn once and never re-drawn.
    fn init_population(&mut self, assignment: &Assignment) -> Result<()> {
        self.pop = Population::with_capacity(assignment.individuals as usize);

        let x_dist = Uniform::new(self.tile.xmin, self.tile.xmax)?;
        let y_dist = Uniform::new(self.tile.ymin, self.tile.ymax)?;
        let angle_dist = Uniform::new(0.0, TAU)?;
        let step = self.cfg.velocity * self.cfg.t_step as f64;

        for k in 0..assignment.individuals {
            let mut ind = Individual::new(assignment.start_id + k);
            ind.pos = [
                x_dist.sample(&mut self.rng),
                y_dist.sample(&mut self.rng),
            ];
            let angle = angle_dist.sample(&mut self.rng);
            ind.displ = [step * angle.cos(), step * angle.sin()];
            if k < assignment.infected {
                ind.status = Status::Infected;
            }
            let slot = self.pop.alloc(ind);
            self.pop.insert(slot);
        }
        Ok(())
    }

    /// First pass of the tick: mark susceptible individuals that lie within
    /// the spreading distance of an infected one as exposed.
    fn update_exposure(&mut self) {
        let spread_2 = self.cfg.spreading_distance.powi(2);
        for &slot in &self.pop.susceptible {
            if self.pop.slots[slot].status != Status::NotExposed {
                continue;
            }
            let pos = self.pop.slots[slot].pos;
            let exposed = self.pop.infected.iter().any(|&inf| {
                let other = self.pop.slots[inf].pos;
                let (dx, dy) = (pos[0] - other[0], pos[1] - other[1]);
                dx * dx + dy * dy <= spread_2
            });
            if exposed {
                self.pop.slots[slot].set_status(Status::Exposed);
            }
        }
    }

    /// Second pass: advance the status-duration counters and move
    /// individuals whose dwell time has elapsed to their next container.
    ///
    /// All three windows are taken before the first scan, so an individual
    /// moved between containers is never processed twice in the same tick.
    fn update_status(&mut self) {
        let t_step = self.cfg.t_step;
        let mut s_window = self.pop.susceptible.len();
        let mut i_window = self.pop.infected.len();
        let mut m_window = self.pop.immune.len();

        let mut pos = 0;
        while pos < s_window {
            let slot = self.pop.susceptible[pos];
            let ind = &mut self.pop.slots[slot];
            if ind.status == Status::Exposed {
                ind.t_status += t_step;
                if ind.t_status >= self.cfg.t_infection {
                    ind.set_status(Status::Infected);
                    let slot = scan_remove(&mut self.pop.susceptible, pos, &mut s_window);
                    self.pop.infected.push(slot);
                    continue;
                }
            } else {
                // Not being exposed carries no memory.
                ind.t_status = 0;
            }
            pos += 1;
        }

        let mut pos = 0;
        while pos < i_window {
            let slot = self.pop.infected[pos];
            let ind = &mut self.pop.slots[slot];
            ind.t_status += t_step;
            if ind.t_status >= self.cfg.t_recovery {
                ind.set_status(Status::Immune);
                let slot = scan_remove(&mut self.pop.infected, pos, &mut i_window);
                self.pop.immune.push(slot);
                continue;
            }
            pos += 1;
        }

        let mut pos = 0;
        while pos < m_window {
            let slot = self.pop.immune[pos];
            let ind = &mut self.pop.slots[slot];
            ind.t_status += t_step;
            if ind.t_status >= self.cfg.t_immunity {
                ind.set_status(Status::NotExposed);
                let slot = scan_remove(&mut self.pop.immune, pos, &mut m_window);
                self.pop.susceptible.push(slot);
                continue;
            }
            pos += 1;
        }
    }

    /// Third pass: move every resident, bouncing at the world border and
    /// staging emigrants into the per-direction outbound buffers.
    fn update_position(&mut self) {
        let mut lists = [
            mem::take(&mut self.pop.susceptible),
            mem::take(&mut self.pop.infected),
            mem::take(&mut self.pop.immune),
        ];

        for list in &mut lists {
            let mut window = list.len();
            let mut pos = 0;
            while pos < window {
                let slot = list[pos];
                match advance(&self.tile, &mut self.pop.slots[slot]) {
                    Some(exit) => {
                        let slot = scan_remove(list, pos, &mut window);
                        self.outbound[exit.index()].push(self.pop.slots[slot]);
                        self.pop.release(slot);
                    }
                    None => pos += 1,
                }
            }
        }

        [self.pop.susceptible, self.pop.infected, self.pop.immune] = lists;
    }

    /// Send this tick's emigrants to every neighbor and take in theirs.
    fn exchange_migrants(&mut self) -> Result<()> {
        self.send_migrants()?;
        self.receive_migrants()
    }

    /// Post one batch per present neighbor, empty ones included.
    ///
    /// Sends never block and all of them are posted before the first
    /// receive, so the pairwise exchange cannot deadlock. The buffers are
    /// emptied by moving their storage into the messages.
    fn send_migrants(&mut self) -> Result<()> {
        for dir in Direction::ALL {
            if let Some(peer) = self.tile.neighbor(dir) {
                let batch = mem::take(&mut self.outbound[dir.index()]);
                self.endpoint.send(peer, Message::Migrants(batch))?;
            }
        }
        Ok(())
    }

    /// Block on each present neighbor's batch and integrate the arrivals,
    /// reusing freed slots and inserting by their resolved status.
    fn receive_migrants(&mut self) -> Result<()> {
        for dir in Direction::ALL {
            let Some(peer) = self.tile.neighbor(dir) else {
                continue;
            };
            match self.endpoint.recv(peer)? {
                Message::Migrants(batch) => {
                    for ind in batch {
                        let slot = self.pop.alloc(ind);
                        self.pop.insert(slot);
                    }
                }
                other => bail!("expected migrants from country {peer}, got {other:?}"),
            }
        }
        Ok(())
    }

    /// Global number of infected individuals: reduced at the root and
    /// broadcast back, so every country decides termination identically.
    fn global_infected(&self) -> Result<u64> {
        let local = self.pop.infected.len() as u64;
        let counts = self.endpoint.gather(ROOT, Message::Infected(local))?;

        let total = match counts {
            Some(counts) => {
                let mut total = 0;
                for count in counts {
                    match count {
                        Message::Infected(n) => total += n,
                        other => bail!("expected an infected count, got {other:?}"),
                    }
                }
                Some(Message::Infected(total))
            }
            None => None,
        };

        match self.endpoint.broadcast(ROOT, total)? {
            Message::Infected(total) => Ok(total),
            other => bail!("expected the global infected count, got {other:?}"),
        }
    }

    /// Gather every country's census at the root and append the daily rows.
    fn report_census(&mut self, day: u64) -> Result<()> {
        log::debug!(
            "country {}: day {day} census, {} residents",
            self.tile.rank,
            self.pop.total()
        );
        let (susceptible, infected, immune) = self.pop.counts();
        let rows = self
            .endpoint
            .gather(ROOT, Message::Census(susceptible, infected, immune))?;
        let Some(rows) = rows else {
            return Ok(());
        };

        let summary = self
            .summary
            .as_mut()
            .context("the root has no summary writer")?;
        for (country, row) in rows.into_iter().enumerate() {
            match row {
                Message::Census(s, i, m) => summary.write(day, country, (s, i, m))?,
                other => bail!("expected a census from country {country}, got {other:?}"),
            }
        }
        summary.flush()
    }

    /// Append one detail row per resident, when tracing is enabled.
    fn write_trace(&mut self, t: u64) -> Result<()> {
        let Some(detail) = &mut self.detail else {
            return Ok(());
        };
        for list in [&self.pop.susceptible, &self.pop.infected, &self.pop.immune] {
            for &slot in list {
                detail.write(t, &self.pop.slots[slot])?;
            }
        }
        Ok(())
    }
}

/// Move one individual and resolve its boundary crossings axis by axis:
/// bounce at the world border, otherwise report the exit direction.
///
/// A diagonal exit needs both axes to cross; mixed outcomes (one axis
/// bouncing, the other leaving) resolve to the cardinal exit alone.
fn advance(tile: &Tile, ind: &mut Individual) -> Option<Direction> {
    let mut dx = 0;
    let mut dy = 0;

    ind.pos[0] += ind.displ[0];
    if ind.pos[0] < tile.xmin || ind.pos[0] >= tile.xmax {
        let side = if ind.pos[0] < tile.xmin {
            Direction::West
        } else {
            Direction::East
        };
        if tile.neighbor(side).is_some() {
            dx = if side == Direction::West { -1 } else { 1 };
        } else {
            reflect(&mut ind.pos[0], &mut ind.displ[0], tile.xmin, tile.xmax);
        }
    }

    ind.pos[1] += ind.displ[1];
    if ind.pos[1] < tile.ymin || ind.pos[1] >= tile.ymax {
        let side = if ind.pos[1] < tile.ymin {
            Direction::South
        } else {
            Direction::North
        };
        if tile.neighbor(side).is_some() {
            dy = if side == Direction::South { -1 } else { 1 };
        } else {
            reflect(&mut ind.pos[1], &mut ind.displ[1], tile.ymin, tile.ymax);
        }
    }

    Direction::from_offsets(dx, dy)
}

/// Mirror `pos` back across the crossed edge of `[lo, hi)` and flip the
/// displacement component: an elastic bounce at the world border.
fn reflect(pos: &mut f64, displ: &mut f64, lo: f64, hi: f64) {
    if *pos < lo {
        *pos = 2.0 * lo - *pos;
    } else {
        *pos = 2.0 * hi - *pos;
        if *pos >= hi {
            // A bounce landing exactly on the exclusive edge steps inside.
            *pos = hi - (hi - lo) * f64::EPSILON;
        }
    }
    *displ = -*displ;
}
