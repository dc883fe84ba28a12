//! Best-effort discovery and shutdown of a process's descendants.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of shutting down a set of descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescendantOutcome {
    pub found: Vec<u32>,
    pub force_killed: Vec<u32>,
}

/// Every process below `root`, children before grandchildren.
///
/// Returns an empty list if the root is gone or the table cannot be read.
pub fn find_descendants(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

    let root = Pid::from_u32(root);
    if system.process(root).is_none() {
        debug!("Process {} not found while listing descendants", root);
        return Vec::new();
    }

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut found = Vec::new();
    let mut seen: HashSet<Pid> = HashSet::from([root]);
    let mut queue = std::collections::VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        if let Some(kids) = children.get(&current) {
            for kid in kids {
                if seen.insert(*kid) {
                    found.push(kid.as_u32());
                    queue.push_back(*kid);
                }
            }
        }
    }
    found
}

/// Pids from `pids` that are still running. Zombies count as gone.
pub fn still_alive(pids: &[u32]) -> Vec<u32> {
    if pids.is_empty() {
        return Vec::new();
    }
    let targets: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&targets),
        true,
        ProcessRefreshKind::nothing(),
    );

    targets
        .into_iter()
        .filter(|pid| {
            system
                .process(*pid)
                .is_some_and(|process| process.status() != ProcessStatus::Zombie)
        })
        .map(|pid| pid.as_u32())
        .collect()
}

/// Ask each descendant to exit, wait up to `timeout`, then kill whatever is left.
pub async fn terminate_descendants(pids: &[u32], timeout: Duration) -> DescendantOutcome {
    let mut outcome = DescendantOutcome {
        found: pids.to_vec(),
        force_killed: Vec::new(),
    };
    if pids.is_empty() {
        return outcome;
    }

    info!("Terminating {} child process(es)", pids.len());
    send_signal(pids, Signal::Term);

    let survivors = wait_for_exit(pids, timeout).await;
    if survivors.is_empty() {
        return outcome;
    }

    warn!("Force killing {} remaining child process(es)", survivors.len());
    send_signal(&survivors, Signal::Kill);
    let remaining = wait_for_exit(&survivors, timeout).await;
    if !remaining.is_empty() {
        warn!("{} child process(es) survived SIGKILL", remaining.len());
    }
    outcome.force_killed = survivors;
    outcome
}

/// Poll until every pid is gone or the deadline passes; returns survivors.
pub async fn wait_for_exit(pids: &[u32], timeout: Duration) -> Vec<u32> {
    let deadline = Instant::now() + timeout;
    loop {
        let alive = still_alive(pids);
        if alive.is_empty() || Instant::now() >= deadline {
            return alive;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn send_signal(pids: &[u32], signal: Signal) {
    let targets: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&targets),
        true,
        ProcessRefreshKind::nothing(),
    );

    for pid in targets {
        let Some(process) = system.process(pid) else {
            debug!("Child process {} already exited", pid);
            continue;
        };
        // Platforms without a graceful signal only support a hard kill.
        let delivered = process
            .kill_with(signal)
            .unwrap_or_else(|| process.kill());
        if !delivered {
            debug!("Could not signal child process {} with {:?}", pid, signal);
        }
    }
}
