//! Named-probe synchronization between concurrent package releases
//!
//! A probe is identified by its name and an optional package. It fires at most
//! once; anyone awaiting it afterwards resolves immediately with the original
//! resolution. Each resolution carries a global sequence number, so tests and
//! logs can tell the order probes fired in.

use crate::release::package::PackageId;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Baton for sequential verification
pub const READY_FOR_VERIFY: &str = "readyForVerify";
/// Conditions verified
pub const READY: &str = "ready";
/// Own commit analysis done
pub const ANALYZED: &str = "analyzed";
/// Next release known (or known not to happen)
pub const NEXT_RELEASE: &str = "nextRelease";
/// Manifest written and prepare step done
pub const PREPARED: &str = "prepared";
/// Publish step done
pub const PUBLISHED: &str = "published";

/// How a probe fired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProbeResolution {
  /// Position in the global firing order, starting at 1
  pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProbeKey {
  name: String,
  scope: Option<PackageId>,
}

impl ProbeKey {
  fn new(name: &str, scope: Option<PackageId>) -> Self {
    Self {
      name: name.to_string(),
      scope,
    }
  }
}

type ProbeSender = Arc<watch::Sender<Option<ProbeResolution>>>;
type Waiter = Shared<BoxFuture<'static, ProbeResolution>>;
type BarrierFilter = Arc<dyn Fn(PackageId) -> bool + Send + Sync>;

struct State {
  package_count: usize,
  probes: HashMap<ProbeKey, ProbeSender>,
  sequence: u64,
  reached: HashMap<String, HashSet<PackageId>>,
  finished: HashSet<PackageId>,
  barriers: HashMap<String, BarrierFilter>,
  lucky: HashSet<String>,
  waiters: HashMap<ProbeKey, Waiter>,
}

impl State {
  /// Get or create the channel for a probe
  ///
  /// Probes scoped to a finished package resolve on creation, since that package
  /// will never reach them on its own.
  fn probe(&mut self, key: &ProbeKey) -> ProbeSender {
    let sender = self
      .probes
      .entry(key.clone())
      .or_insert_with(|| Arc::new(watch::channel(None).0))
      .clone();
    let unresolved = sender.borrow().is_none();
    if let Some(id) = key.scope
      && unresolved
      && self.finished.contains(&id)
    {
      self.emit(&key.name, Some(id));
    }
    sender
  }

  fn emit(&mut self, name: &str, scope: Option<PackageId>) -> ProbeResolution {
    let key = ProbeKey::new(name, scope);
    let sender = self
      .probes
      .entry(key)
      .or_insert_with(|| Arc::new(watch::channel(None).0))
      .clone();

    let existing = *sender.borrow();
    if let Some(resolution) = existing {
      return resolution;
    }

    self.sequence += 1;
    let resolution = ProbeResolution {
      sequence: self.sequence,
    };
    sender.send_replace(Some(resolution));

    if let Some(id) = scope {
      self.reached.entry(name.to_string()).or_default().insert(id);
      self.check_barrier(name);
    }
    resolution
  }

  /// Fire the global probe once every unfinished package in the filter reached it
  fn check_barrier(&mut self, name: &str) {
    let Some(filter) = self.barriers.get(name).cloned() else {
      return;
    };
    let reached = self.reached.get(name);
    let complete = (0..self.package_count)
      .filter(|id| !self.finished.contains(id) && filter(*id))
      .all(|id| reached.is_some_and(|ids| ids.contains(&id)));
    if complete {
      self.barriers.remove(name);
      self.emit(name, None);
    }
  }

  fn is_resolved(&self, key: &ProbeKey) -> bool {
    self.probes.get(key).is_some_and(|sender| sender.borrow().is_some())
  }

  fn has_reached(&self, name: &str, pkg: PackageId) -> bool {
    self.is_resolved(&ProbeKey::new(name, Some(pkg)))
  }

  fn todo(&self) -> impl Iterator<Item = PackageId> + '_ {
    (0..self.package_count).filter(|id| !self.finished.contains(id))
  }

  fn hand_off(&mut self, baton: &str, done: &str, from: PackageId) -> Option<PackageId> {
    let next = self
      .todo()
      .find(|id| *id != from && !self.has_reached(done, *id) && !self.has_reached(baton, *id))?;
    self.emit(baton, Some(next));
    Some(next)
  }

  fn finish(&mut self, pkg: PackageId) {
    self.finished.insert(pkg);

    let pending: Vec<String> = self
      .probes
      .iter()
      .filter(|(key, sender)| key.scope == Some(pkg) && sender.borrow().is_none())
      .map(|(key, _)| key.name.clone())
      .collect();
    for name in pending {
      self.emit(&name, Some(pkg));
    }

    let barriers: Vec<String> = self.barriers.keys().cloned().collect();
    for name in barriers {
      self.check_barrier(&name);
    }
  }
}

/// Event bus shared by every release task of a run
pub struct Synchronizer {
  state: Mutex<State>,
  local_deps: Vec<Vec<PackageId>>,
}

impl Synchronizer {
  /// `local_deps[id]` lists the local dependencies of package `id`
  pub fn new(local_deps: Vec<Vec<PackageId>>) -> Self {
    Self {
      state: Mutex::new(State {
        package_count: local_deps.len(),
        probes: HashMap::new(),
        sequence: 0,
        reached: HashMap::new(),
        finished: HashSet::new(),
        barriers: HashMap::new(),
        lucky: HashSet::new(),
        waiters: HashMap::new(),
      }),
      local_deps,
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Fire a probe; repeated calls return the first resolution
  pub fn emit(&self, probe: &str, pkg: Option<PackageId>) -> ProbeResolution {
    self.lock().emit(probe, pkg)
  }

  /// Resolves when the probe fires, immediately if it already has
  pub fn once(&self, probe: &str, pkg: Option<PackageId>) -> BoxFuture<'static, ProbeResolution> {
    let sender = self.lock().probe(&ProbeKey::new(probe, pkg));
    resolution_future(sender)
  }

  /// Resolves when `pkg` reaches `probe`; one shared future per pair
  pub fn wait_for(&self, probe: &str, pkg: PackageId) -> Waiter {
    let key = ProbeKey::new(probe, Some(pkg));
    let mut state = self.lock();
    if let Some(waiter) = state.waiters.get(&key) {
      return waiter.clone();
    }
    let waiter = resolution_future(state.probe(&key)).shared();
    state.waiters.insert(key, waiter.clone());
    waiter
  }

  /// Resolves once every unfinished package accepted by `filter` reached `probe`
  pub fn wait_for_all<F>(&self, probe: &str, filter: F) -> BoxFuture<'static, ProbeResolution>
  where
    F: Fn(PackageId) -> bool + Send + Sync + 'static,
  {
    let mut state = self.lock();
    let global = ProbeKey::new(probe, None);
    let sender = state.probe(&global);
    if !state.is_resolved(&global) && !state.barriers.contains_key(probe) {
      state.barriers.insert(probe.to_string(), Arc::new(filter));
      state.check_barrier(probe);
    }
    resolution_future(sender)
  }

  /// Single-winner election: only the first caller for `probe` fires its own probe
  pub fn get_lucky(&self, probe: &str, pkg: PackageId) -> Option<ProbeResolution> {
    let mut state = self.lock();
    if !state.lucky.insert(probe.to_string()) {
      return None;
    }
    Some(state.emit(probe, Some(pkg)))
  }

  /// Resolves once every local dependency of `pkg` reached `probe`
  pub fn wait_local_deps(&self, probe: &str, pkg: PackageId) -> BoxFuture<'static, ()> {
    let waits: Vec<Waiter> = self
      .local_deps
      .get(pkg)
      .into_iter()
      .flatten()
      .filter(|dep| **dep != pkg)
      .map(|dep| self.wait_for(probe, *dep))
      .collect();
    async move {
      join_all(waits).await;
    }
    .boxed()
  }

  /// Has `pkg` reached `probe`?
  pub fn has_reached(&self, probe: &str, pkg: PackageId) -> bool {
    self.lock().has_reached(probe, pkg)
  }

  /// Packages still releasing, in id order
  pub fn todo(&self) -> Vec<PackageId> {
    self.lock().todo().collect()
  }

  /// Pass the `baton` probe from `from` to the next unfinished package that
  /// reached neither `baton` nor `done`
  ///
  /// Returns the new holder, if any package was still waiting.
  pub fn hand_off(&self, baton: &str, done: &str, from: PackageId) -> Option<PackageId> {
    self.lock().hand_off(baton, done, from)
  }

  /// Mark a package done and release everyone waiting on it
  ///
  /// Every probe scoped to the package fires, and pending barriers are
  /// re-evaluated without it.
  pub fn finish(&self, pkg: PackageId) {
    self.lock().finish(pkg);
  }

  /// `finish`, passing `baton` on if `pkg` holds it without having reached `done`
  ///
  /// Runs under one lock, so a hand-off racing with the finish cannot leave the
  /// baton with a finished package.
  pub fn finish_holding(&self, pkg: PackageId, baton: &str, done: &str) -> Option<PackageId> {
    let mut state = self.lock();
    let holds_baton = state.has_reached(baton, pkg) && !state.has_reached(done, pkg);
    state.finish(pkg);
    if holds_baton { state.hand_off(baton, done, pkg) } else { None }
  }
}

fn resolution_future(sender: ProbeSender) -> BoxFuture<'static, ProbeResolution> {
  let mut receiver = sender.subscribe();
  async move {
    // The sender lives in the map for the whole run; holding it here keeps the
    // channel open even if the synchronizer is dropped first.
    let _sender = sender;
    receiver
      .wait_for(Option::is_some)
      .await
      .map(|value| *value)
      .ok()
      .flatten()
      .unwrap_or_default()
  }
  .boxed()
}
