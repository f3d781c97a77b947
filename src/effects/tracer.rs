//! Unified dependency tracking via effect tracing.
//!
//! The tracer records effects during rendering and answers invalidation
//! queries between render phases. Producers call [`EffectTracer::record`]
//! from the render pool; queries and recording are both guarded by one
//! internal lock, so a shared reference is safe across threads.
//!
//! The tracer persists to a JSON sidecar next to the build cache. Each file
//! dependency's size is recorded alongside it; on load, dependencies whose
//! current size differs are reported via [`EffectTracer::stale_dependencies`]
//! so a restarted process answers queries as the original would have.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::persist;
use crate::effects::effect::{Dependency, Effect};

const TRACER_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TracerFile {
    version: u32,
    effects: Vec<Effect>,
    /// File dependency → size at record time.
    fingerprints: BTreeMap<PathBuf, u64>,
}

#[derive(Debug, Default)]
struct TracerState {
    effects: Vec<Effect>,
    dep_index: HashMap<Dependency, Vec<usize>>,
    output_index: HashMap<PathBuf, usize>,
    invalidation_index: HashMap<String, Vec<usize>>,
    fingerprints: BTreeMap<PathBuf, u64>,
    /// Dependencies whose size changed between save and load.
    stale: BTreeSet<PathBuf>,
}

impl TracerState {
    fn index_effect(&mut self, effect: Effect, fingerprint: bool) {
        let index = self.effects.len();
        for dep in &effect.depends_on {
            self.dep_index.entry(dep.clone()).or_default().push(index);
            if fingerprint {
                if let Dependency::File(path) = dep {
                    if let Ok(meta) = fs::metadata(path) {
                        self.fingerprints.insert(path.clone(), meta.len());
                    }
                }
            }
        }
        for output in &effect.outputs {
            self.output_index.insert(output.clone(), index);
        }
        for key in &effect.invalidates {
            self.invalidation_index
                .entry(key.clone())
                .or_default()
                .push(index);
        }
        self.effects.push(effect);
    }

    /// Effects depending on a path, checking both the full path and the
    /// bare filename (templates are often referenced by basename).
    fn effects_for_path(&self, path: &Path) -> Vec<usize> {
        let mut indices = self
            .dep_index
            .get(&Dependency::File(path.to_path_buf()))
            .cloned()
            .unwrap_or_default();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(by_name) = self.dep_index.get(&Dependency::Name(name.to_string())) {
                indices.extend(by_name.iter().copied());
            }
        }
        indices
    }
}

/// Thread-safe store of recorded effects with reverse indexes.
#[derive(Debug, Default)]
pub struct EffectTracer {
    inner: Mutex<TracerState>,
}

/// Statistics snapshot, stable across save/load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerStatistics {
    pub total_effects: usize,
    pub unique_dependencies: usize,
    pub unique_outputs: usize,
    pub cache_keys: usize,
    pub by_operation: BTreeMap<String, usize>,
}

impl EffectTracer {
    pub fn new() -> Self {
        EffectTracer::default()
    }

    fn lock(&self) -> MutexGuard<'_, TracerState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record(&self, effect: Effect) {
        self.lock().index_effect(effect, true);
    }

    pub fn record_batch(&self, effects: Vec<Effect>) {
        let mut state = self.lock();
        for effect in effects {
            state.index_effect(effect, true);
        }
    }

    /// Snapshot of all recorded effects.
    pub fn effects(&self) -> Vec<Effect> {
        self.lock().effects.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().effects.is_empty()
    }

    /// Cache keys invalidated by the changed paths, including transitively:
    /// an effect's outputs are themselves inputs to later effects, so the
    /// query chases the closure to a fixed point.
    pub fn invalidated_by(&self, changed: &BTreeSet<PathBuf>) -> BTreeSet<String> {
        let state = self.lock();
        let mut invalidated = BTreeSet::new();
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue: Vec<PathBuf> = changed.iter().cloned().collect();

        while let Some(path) = queue.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }
            for index in state.effects_for_path(&path) {
                let effect = &state.effects[index];
                invalidated.extend(effect.invalidates.iter().cloned());
                queue.extend(effect.outputs.iter().cloned());
            }
        }
        invalidated
    }

    /// Outputs needing rebuild after the changed paths, transitively.
    pub fn outputs_needing_rebuild(&self, changed: &BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
        let state = self.lock();
        let mut outputs = BTreeSet::new();
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue: Vec<PathBuf> = changed.iter().cloned().collect();

        while let Some(path) = queue.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }
            for index in state.effects_for_path(&path) {
                let effect = &state.effects[index];
                outputs.extend(effect.outputs.iter().cloned());
                queue.extend(effect.outputs.iter().cloned());
            }
        }
        outputs
    }

    /// Dependencies of the effect that produced an output.
    pub fn get_dependencies_for_output(&self, output: &Path) -> BTreeSet<Dependency> {
        let state = self.lock();
        match state.output_index.get(output) {
            Some(&index) => state.effects[index].depends_on.clone(),
            None => BTreeSet::new(),
        }
    }

    /// Effects that would invalidate a cache key.
    pub fn get_effects_for_cache_key(&self, cache_key: &str) -> Vec<Effect> {
        let state = self.lock();
        state
            .invalidation_index
            .get(cache_key)
            .map(|indices| indices.iter().map(|&i| state.effects[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        *state = TracerState::default();
    }

    pub fn get_statistics(&self) -> TracerStatistics {
        let state = self.lock();
        let mut by_operation: BTreeMap<String, usize> = BTreeMap::new();
        for effect in &state.effects {
            let name = if effect.operation.is_empty() {
                "unknown"
            } else {
                &effect.operation
            };
            *by_operation.entry(name.to_string()).or_default() += 1;
        }
        TracerStatistics {
            total_effects: state.effects.len(),
            unique_dependencies: state.dep_index.len(),
            unique_outputs: state.output_index.len(),
            cache_keys: state.invalidation_index.len(),
            by_operation,
        }
    }

    /// Output → dependency strings, for `build --show-effects` debugging.
    pub fn to_dependency_graph(&self) -> BTreeMap<String, Vec<String>> {
        let state = self.lock();
        let mut graph = BTreeMap::new();
        for (output, &index) in &state.output_index {
            let deps: Vec<String> = state.effects[index]
                .depends_on
                .iter()
                .map(|dep| match dep {
                    Dependency::File(path) => path.display().to_string(),
                    Dependency::Name(name) => name.clone(),
                })
                .collect();
            graph.insert(output.display().to_string(), deps);
        }
        graph
    }

    /// File dependencies whose size no longer matches the recorded value.
    /// Populated by [`EffectTracer::load`].
    pub fn stale_dependencies(&self) -> BTreeSet<PathBuf> {
        self.lock().stale.clone()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.lock();
        let file = TracerFile {
            version: TRACER_VERSION,
            effects: state.effects.clone(),
            fingerprints: state.fingerprints.clone(),
        };
        persist::save_json(path, &file, false)
    }

    /// Load a tracer saved by a previous process. Recorded fingerprints are
    /// revalidated; entries whose file size differs are marked stale.
    pub fn load(path: &Path) -> Self {
        let tracer = EffectTracer::new();
        let Some(file) = persist::load_versioned_json::<TracerFile>(path, TRACER_VERSION) else {
            return tracer;
        };
        {
            let mut state = tracer.lock();
            for effect in file.effects {
                state.index_effect(effect, false);
            }
            for (dep_path, recorded_size) in &file.fingerprints {
                let current = fs::metadata(dep_path).map(|m| m.len()).ok();
                if current != Some(*recorded_size) {
                    state.stale.insert(dep_path.clone());
                }
            }
            state.fingerprints = file.fingerprints;
            if !state.stale.is_empty() {
                debug!(
                    stale = state.stale.len(),
                    "effect tracer loaded with stale dependencies"
                );
            }
        }
        tracer
    }
}

static ACTIVE_TRACER: Mutex<Option<Arc<EffectTracer>>> = Mutex::new(None);

/// Install the build's tracer so render-time recording flows into it.
/// Injected once per build by the cache manager, never discovered.
pub fn set_active_tracer(tracer: Arc<EffectTracer>) {
    if let Ok(mut active) = ACTIVE_TRACER.lock() {
        *active = Some(tracer);
    }
}

pub fn active_tracer() -> Option<Arc<EffectTracer>> {
    ACTIVE_TRACER.lock().ok().and_then(|active| active.clone())
}

pub fn clear_active_tracer() {
    if let Ok(mut active) = ACTIVE_TRACER.lock() {
        *active = None;
    }
}
