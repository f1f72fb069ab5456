use std::fmt;

use crate::engine::FillEvent;

/// Fill counts for one target item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSummary {
    pub target: String,
    pub filled: usize,
    /// `(donor, pieces)` in the order donors first contributed.
    pub donors: Vec<(String, usize)>,
}

/// Per-target view of a reconciliation's fill events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub targets: Vec<TargetSummary>,
}

impl Report {
    pub fn from_events(events: &[FillEvent]) -> Self {
        let mut targets: Vec<TargetSummary> = Vec::new();
        for ev in events {
            let idx = match targets.iter().position(|t| t.target == ev.target) {
                Some(idx) => idx,
                None => {
                    targets.push(TargetSummary {
                        target: ev.target.clone(),
                        filled: 0,
                        donors: Vec::new(),
                    });
                    targets.len() - 1
                }
            };
            let summary = &mut targets[idx];
            summary.filled += 1;
            match summary.donors.iter_mut().find(|(d, _)| *d == ev.donor) {
                Some((_, count)) => *count += 1,
                None => summary.donors.push((ev.donor.clone(), 1)),
            }
        }
        Report { targets }
    }

    pub fn total_filled(&self) -> usize {
        self.targets.iter().map(|t| t.filled).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.targets.is_empty() {
            return writeln!(f, "no pieces filled");
        }
        for t in &self.targets {
            let donors = t
                .donors
                .iter()
                .map(|(d, n)| format!("{} from {}", n, d))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "{}: {} pieces filled ({})", t.target, t.filled, donors)?;
        }
        Ok(())
    }
}
