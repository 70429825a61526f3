//! Result summary files.
//!
//! A summary is one line,
//! `<result> <elapsedSeconds> <visitedStates> <proposedFlips>
//! <acceptedFlips> <rejectedFlips>`, followed on sat by one
//! `xK = <value>` line per variable. The portfolio writes the property
//! tokens `holds` / `violated` / `unknown`; the single-engine runner
//! writes `sat` / `unsat` / `TIMEOUT` / `ERROR` / `UNKNOWN`.

use std::io::Write;
use std::path::Path;

use crate::statistics::StatisticsSnapshot;

pub fn write_summary(
    path: impl AsRef<Path>,
    token: &str,
    stats: &StatisticsSnapshot,
    assignment: Option<&[f64]>,
) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(
        file,
        "{} {} {} {} {} {}",
        token,
        stats.elapsed.as_secs(),
        stats.visited_tree_states,
        stats.num_proposed_flips,
        stats.num_accepted_flips,
        stats.num_rejected_flips
    )?;
    if let Some(assignment) = assignment {
        for (index, value) in assignment.iter().enumerate() {
            writeln!(file, "x{index} = {value:.6}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_summary_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        let stats = StatisticsSnapshot {
            elapsed: Duration::from_secs(3),
            visited_tree_states: 5,
            num_proposed_flips: 7,
            num_accepted_flips: 4,
            num_rejected_flips: 3,
            ..Default::default()
        };

        write_summary(&path, "sat", &stats, Some(&[0.5, -1.0])).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("sat 3 5 7 4 3"));
        assert_eq!(lines.next(), Some("x0 = 0.500000"));
        assert_eq!(lines.next(), Some("x1 = -1.000000"));
    }

    #[test]
    fn test_summary_without_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        write_summary(&path, "unsat", &StatisticsSnapshot::default(), None).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("unsat "));
    }
}
