// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Serialize;
use std::fmt;

/// Phases of one upgrade run, in order.
///
/// `Done` and `Failed` are terminal. There is no rollback: a failed phase
/// leaves the cluster partially upgraded, and the recovery path is to run
/// the whole sequence again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    Start,
    BootstrapLinux,
    BootstrapWindows,
    MastersRollingUpgrade,
    AgentsRollingUpgrade,
    Done,
    Failed,
}

/// How the current phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Failed,
}

impl UpgradePhase {
    /// The phase that follows `self` given how `self` ended.
    ///
    /// `BootstrapWindows` is only entered when `windows_bootstrap` is set.
    /// Terminal phases map to themselves.
    pub fn next(self, outcome: PhaseOutcome, windows_bootstrap: bool) -> Self {
        if self.is_terminal() {
            return self;
        }
        if outcome == PhaseOutcome::Failed {
            return UpgradePhase::Failed;
        }
        match self {
            UpgradePhase::Start => UpgradePhase::BootstrapLinux,
            UpgradePhase::BootstrapLinux if windows_bootstrap => {
                UpgradePhase::BootstrapWindows
            }
            UpgradePhase::BootstrapLinux | UpgradePhase::BootstrapWindows => {
                UpgradePhase::MastersRollingUpgrade
            }
            UpgradePhase::MastersRollingUpgrade => {
                UpgradePhase::AgentsRollingUpgrade
            }
            UpgradePhase::AgentsRollingUpgrade => UpgradePhase::Done,
            UpgradePhase::Done | UpgradePhase::Failed => self,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UpgradePhase::Done | UpgradePhase::Failed)
    }
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradePhase::Start => "start",
            UpgradePhase::BootstrapLinux => "bootstrap_linux",
            UpgradePhase::BootstrapWindows => "bootstrap_windows",
            UpgradePhase::MastersRollingUpgrade => "masters_rolling_upgrade",
            UpgradePhase::AgentsRollingUpgrade => "agents_rolling_upgrade",
            UpgradePhase::Done => "done",
            UpgradePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL: [UpgradePhase; 7] = [
        UpgradePhase::Start,
        UpgradePhase::BootstrapLinux,
        UpgradePhase::BootstrapWindows,
        UpgradePhase::MastersRollingUpgrade,
        UpgradePhase::AgentsRollingUpgrade,
        UpgradePhase::Done,
        UpgradePhase::Failed,
    ];

    fn walk(windows_bootstrap: bool) -> Vec<UpgradePhase> {
        let mut phase = UpgradePhase::Start;
        let mut visited = vec![phase];
        while !phase.is_terminal() {
            phase = phase.next(PhaseOutcome::Completed, windows_bootstrap);
            visited.push(phase);
        }
        visited
    }

    #[test]
    fn happy_path_without_windows() {
        assert_eq!(
            walk(false),
            [
                UpgradePhase::Start,
                UpgradePhase::BootstrapLinux,
                UpgradePhase::MastersRollingUpgrade,
                UpgradePhase::AgentsRollingUpgrade,
                UpgradePhase::Done,
            ]
        );
    }

    #[test]
    fn happy_path_with_windows() {
        assert_eq!(
            walk(true),
            [
                UpgradePhase::Start,
                UpgradePhase::BootstrapLinux,
                UpgradePhase::BootstrapWindows,
                UpgradePhase::MastersRollingUpgrade,
                UpgradePhase::AgentsRollingUpgrade,
                UpgradePhase::Done,
            ]
        );
    }

    #[test]
    fn failure_is_reachable_from_every_running_phase() {
        for phase in ALL.into_iter().filter(|p| !p.is_terminal()) {
            for windows in [false, true] {
                assert_eq!(
                    phase.next(PhaseOutcome::Failed, windows),
                    UpgradePhase::Failed,
                    "{phase}"
                );
            }
        }
    }

    #[test]
    fn terminal_phases_absorb() {
        for phase in [UpgradePhase::Done, UpgradePhase::Failed] {
            for outcome in [PhaseOutcome::Completed, PhaseOutcome::Failed] {
                assert_eq!(phase.next(outcome, true), phase);
                assert_eq!(phase.next(outcome, false), phase);
            }
        }
    }

    #[test]
    fn transitions_never_go_backwards() {
        for phase in ALL {
            for outcome in [PhaseOutcome::Completed, PhaseOutcome::Failed] {
                for windows in [false, true] {
                    assert!(phase.next(outcome, windows) >= phase, "{phase}");
                }
            }
        }
    }
}
