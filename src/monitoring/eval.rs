// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Evaluation file emission.
//!
//! At shutdown the node writes five text files under `eval/`:
//! four latency series (`<round>: <milliseconds>` per line, `0` for
//! rounds that never completed the phase) and a throughput table with
//! one row per completed round.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::core::broadcast::round::RoundTable;
use crate::core::types::{NodeId, Round};
use crate::monitoring::throughput::ThruputLog;

/// Evaluation output errors.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("io")]
    Io,
}

fn millis(d: Option<Duration>) -> u128 {
    d.map(|d| d.as_millis()).unwrap_or(0)
}

fn write_latency<'a, I>(path: &Path, series: I) -> Result<(), EvalError>
where
    I: Iterator<Item = (Round, Option<Duration>)>,
{
    let mut f = fs::File::create(path).map_err(|_| EvalError::Io)?;
    for (round, d) in series {
        writeln!(f, "{}: {}", round, millis(d)).map_err(|_| EvalError::Io)?;
    }
    Ok(())
}

/// Write the five `.eval` files for `node` under `dir`.
///
/// Latency rows cover the locally started rounds `0..rounds_started`.
pub fn write_all(
    dir: &Path,
    node: NodeId,
    rounds: &RoundTable,
    thruput: &ThruputLog,
    rounds_started: Round,
) -> Result<(), EvalError> {
    fs::create_dir_all(dir).map_err(|_| EvalError::Io)?;

    let series = |pick: fn(&crate::core::broadcast::round::RoundState) -> Option<Duration>| {
        (0..rounds_started).map(move |r| (r, rounds.round(r).and_then(pick)))
    };

    write_latency(
        &dir.join(format!("send2echo_{node}.eval")),
        series(|s| s.send_to_echo),
    )?;
    write_latency(
        &dir.join(format!("send2fin_{node}.eval")),
        series(|s| s.send_to_fin),
    )?;
    write_latency(
        &dir.join(format!("fin2fin_{node}.eval")),
        series(|s| s.fin_to_fin),
    )?;
    write_latency(
        &dir.join(format!("send2delivered_{node}.eval")),
        series(|s| s.send_to_delivered),
    )?;

    let mut f =
        fs::File::create(dir.join(format!("thruput_{node}.eval"))).map_err(|_| EvalError::Io)?;
    for (gap, s) in thruput.rows() {
        writeln!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            gap.as_millis(),
            s.recv_send,
            s.recv_echo,
            s.recv_fin,
            s.recv_sup,
            s.sent_send,
            s.sent_echo,
            s.sent_fin,
            s.sent_sup,
        )
        .map_err(|_| EvalError::Io)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::throughput::ThruputSample;
    use std::time::Instant;

    #[test]
    fn writes_five_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut table = RoundTable::new(4);
        let t0 = Instant::now();
        {
            let st = table.round_mut(0);
            st.started_at = Some(t0);
            st.send_to_echo = Some(Duration::from_millis(12));
        }

        let mut log = ThruputLog::default();
        log.push(t0, ThruputSample::default());
        log.push(
            t0 + Duration::from_millis(100),
            ThruputSample {
                sent_send: 4096,
                ..Default::default()
            },
        );

        write_all(dir.path(), NodeId::from(2), &table, &log, 2).expect("write");

        let echo = fs::read_to_string(dir.path().join("send2echo_02.eval")).expect("read");
        assert_eq!(echo, "0: 12\n1: 0\n");

        let thr = fs::read_to_string(dir.path().join("thruput_02.eval")).expect("read");
        let row: Vec<&str> = thr.trim().split(' ').collect();
        assert_eq!(row.len(), 9);
        assert_eq!(row[1], "0");

        for name in ["send2fin_02", "fin2fin_02", "send2delivered_02"] {
            assert!(dir.path().join(format!("{name}.eval")).exists());
        }
    }
}
