//! Per-project exclusive leases for structural mutations.
//!
//! # Responsibility
//! - Serialize create/move/delete/clone per affected project.
//! - Hand out a guard object that callers pass down as proof of ownership.
//!
//! # Invariants
//! - A project id is held by at most one `ProjectLease` at a time.
//! - Multi-project leases acquire ids in ascending order, so two callers
//!   asking for overlapping sets cannot deadlock.
//! - Dropping the guard releases every id it holds and wakes waiters.
//! - Reads never need a lease.

use crate::model::node::ProjectId;
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::time::Instant;

/// Registry of currently held project leases.
#[derive(Debug, Default)]
pub struct ProjectLeases {
    held: Mutex<HashSet<ProjectId>>,
    released: Condvar,
}

impl ProjectLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until every id in `projects` is free, then holds them all.
    pub fn acquire(&self, projects: &[ProjectId]) -> ProjectLease<'_> {
        let ordered = normalize(projects);
        let started_at = Instant::now();
        let mut held = self.held.lock();
        for project_id in &ordered {
            if held.contains(project_id) {
                info!("event=lease_wait module=lease status=start project_id={project_id}");
                while held.contains(project_id) {
                    self.released.wait(&mut held);
                }
                info!(
                    "event=lease_wait module=lease status=ok project_id={} waited_ms={}",
                    project_id,
                    started_at.elapsed().as_millis()
                );
            }
            held.insert(*project_id);
        }
        debug!(
            "event=lease_acquire module=lease status=ok projects={}",
            ordered.len()
        );
        ProjectLease {
            leases: self,
            projects: ordered,
        }
    }

    /// Holds every id in `projects` if none is currently held.
    pub fn try_acquire(&self, projects: &[ProjectId]) -> Option<ProjectLease<'_>> {
        let ordered = normalize(projects);
        let mut held = self.held.lock();
        if ordered.iter().any(|project_id| held.contains(project_id)) {
            return None;
        }
        held.extend(ordered.iter().copied());
        Some(ProjectLease {
            leases: self,
            projects: ordered,
        })
    }

    /// Returns whether some lease currently holds `project_id`.
    pub fn is_held(&self, project_id: ProjectId) -> bool {
        self.held.lock().contains(&project_id)
    }

    fn release(&self, projects: &[ProjectId]) {
        let mut held = self.held.lock();
        for project_id in projects {
            held.remove(project_id);
        }
        drop(held);
        self.released.notify_all();
        debug!(
            "event=lease_release module=lease status=ok projects={}",
            projects.len()
        );
    }
}

/// Guard for a set of held project ids.
#[derive(Debug)]
pub struct ProjectLease<'a> {
    leases: &'a ProjectLeases,
    projects: Vec<ProjectId>,
}

impl ProjectLease<'_> {
    /// Held ids in acquisition (ascending) order.
    pub fn projects(&self) -> &[ProjectId] {
        &self.projects
    }

    pub fn covers(&self, project_id: ProjectId) -> bool {
        self.projects.binary_search(&project_id).is_ok()
    }
}

impl Drop for ProjectLease<'_> {
    fn drop(&mut self) {
        self.leases.release(&self.projects);
    }
}

fn normalize(projects: &[ProjectId]) -> Vec<ProjectId> {
    let mut ordered = projects.to_vec();
    ordered.sort();
    ordered.dedup();
    ordered
}

#[cfg(test)]
mod tests {
    use super::ProjectLeases;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let leases = ProjectLeases::new();
        let project = Uuid::new_v4();

        let lease = leases.acquire(&[project]);
        assert!(lease.covers(project));
        assert!(leases.is_held(project));
        assert!(leases.try_acquire(&[project]).is_none());

        drop(lease);
        assert!(!leases.is_held(project));
        assert!(leases.try_acquire(&[project]).is_some());
    }

    #[test]
    fn duplicate_ids_are_collapsed_and_sorted() {
        let leases = ProjectLeases::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let lease = leases.acquire(&[b, a, b]);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(lease.projects(), expected.as_slice());
    }

    #[test]
    fn try_acquire_is_all_or_nothing() {
        let leases = ProjectLeases::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _held = leases.acquire(&[b]);
        assert!(leases.try_acquire(&[a, b]).is_none());
        assert!(!leases.is_held(a));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let leases = Arc::new(ProjectLeases::new());
        let project = Uuid::new_v4();
        let lease = leases.acquire(&[project]);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let leases = Arc::clone(&leases);
            thread::spawn(move || {
                let _lease = leases.acquire(&[project]);
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(lease);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
