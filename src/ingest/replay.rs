use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

use super::ObservationSource;
use crate::observation::Observation;

/// Recorded observations, one JSON object per line.
///
/// Blank lines are skipped. A line that fails to parse is an error for that
/// call only; the next call continues with the following line. A read error
/// ends the replay.
pub struct ReplaySource<R> {
    reader: BufReader<R>,
    line_no: usize,
    finished: bool,
}

impl ReplaySource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("open replay file {}", path.display()))?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> ReplaySource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line_no: 0,
            finished: false,
        }
    }
}

impl<R: Read> ObservationSource for ReplaySource<R> {
    fn next_observation(&mut self) -> Result<Option<Observation>> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = match self.reader.read_line(&mut line) {
                Ok(read) => read,
                Err(err) => {
                    self.finished = true;
                    return Err(err).context("read replay line");
                }
            };
            if read == 0 {
                self.finished = true;
                return Ok(None);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                break;
            }
        }
        let observation: Observation = serde_json::from_str(line.trim())
            .with_context(|| format!("parse replay line {}", self.line_no))?;
        Ok(Some(observation))
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_live(&self) -> bool {
        false
    }
}
