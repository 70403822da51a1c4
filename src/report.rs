//! CSV output: the per-individual detail trace and the daily summary.

use crate::model::Individual;
use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::{fs::File, path::Path};

/// Open a CSV file and write its header up front, so a run that produces no
/// rows still leaves a well-formed file behind.
fn create_csv<P: AsRef<Path>>(path: P, header: &[&str]) -> Result<Writer<File>> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {path:?}"))?;
    writer
        .write_record(header)
        .context("failed to write CSV header")?;
    Ok(writer)
}

/// Row of the detail trace; the headers follow the field names.
#[derive(Serialize)]
struct DetailRecord<'a> {
    country: usize,
    t: u64,
    id: u64,
    pos_x: f64,
    pos_y: f64,
    displ_x: f64,
    displ_y: f64,
    status: &'a str,
    t_status: u64,
}

/// Writer of a country's detail trace, one row per resident per tick.
pub struct DetailWriter {
    country: usize,
    writer: Writer<File>,
}

impl DetailWriter {
    pub fn create<P: AsRef<Path>>(dir: P, country: usize) -> Result<Self> {
        let path = dir.as_ref().join(format!("detail_{country}.csv"));
        let writer = create_csv(
            path,
            &[
                "country", "t", "id", "pos_x", "pos_y", "displ_x", "displ_y", "status", "t_status",
            ],
        )?;
        Ok(Self { country, writer })
    }

    pub fn write(&mut self, t: u64, ind: &Individual) -> Result<()> {
        self.writer
            .serialize(DetailRecord {
                country: self.country,
                t,
                id: ind.id,
                pos_x: ind.pos[0],
                pos_y: ind.pos[1],
                displ_x: ind.displ[0],
                displ_y: ind.displ[1],
                status: ind.status.name(),
                t_status: ind.t_status,
            })
            .context("failed to write detail record")
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush detail trace")
    }
}

/// Row of the daily summary, one per country per day.
#[derive(Serialize)]
struct SummaryRecord {
    day: u64,
    country: usize,
    susceptible: u64,
    infected: u64,
    immune: u64,
}

/// Writer of the daily summary; only the root country holds one.
pub struct SummaryWriter {
    writer: Writer<File>,
}

impl SummaryWriter {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join("summary.csv");
        let writer = create_csv(path, &["day", "country", "susceptible", "infected", "immune"])?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, day: u64, country: usize, counts: (u64, u64, u64)) -> Result<()> {
        let (susceptible, infected, immune) = counts;
        self.writer
            .serialize(SummaryRecord {
                day,
                country,
                susceptible,
                infected,
                immune,
            })
            .context("failed to write summary record")
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush summary")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = env::temp_dir().join(format!("contagio-{name}-{}", std::process::id()));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).expect("failed to create scratch dir");
        dir
    }

    #[test]
    fn detail_rows_match_the_header() {
        let dir = scratch_dir("detail");
        let mut writer = DetailWriter::create(&dir, 3).unwrap();
        let mut ind = Individual::new(11);
        ind.pos = [1.5, 2.5];
        writer.write(60, &ind).unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(dir.join("detail_3.csv")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("country,t,id,pos_x,pos_y,displ_x,displ_y,status,t_status")
        );
        assert_eq!(lines.next(), Some("3,60,11,1.5,2.5,0.0,0.0,NOT_EXPOSED,0"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn summary_rows_follow_the_census() {
        let dir = scratch_dir("summary");
        let mut writer = SummaryWriter::create(&dir).unwrap();
        writer.write(1, 0, (95, 4, 1)).unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(dir.join("summary.csv")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("day,country,susceptible,infected,immune"));
        assert_eq!(lines.next(), Some("1,0,95,4,1"));
        fs::remove_dir_all(&dir).ok();
    }
}
