//! # Merge Engine
//!
//! Combines a source tunebook into a target tunebook without losing or
//! silently duplicating tunes.
//!
//! ## Algorithm
//! 1. **Tunes**: each source tune whose content equals a tune already in the
//!    target is skipped. Otherwise, if its id is taken, it gets a fresh id
//!    (`reel1` -> `reel1_1`, `reel1_2`, ...). It is appended with index
//!    `target.count_tunes() + 1`.
//! 2. **Sets**: every source set is appended. Its references are remapped
//!    to the ids the tunes ended up with in the target: renamed tunes follow
//!    their new id, skipped duplicates point at the equal target tune.
//!
//! ## Background merge
//! [`spawn_merge`] moves both books onto a worker thread and streams
//! [`MergeEvent`]s back over a channel: progress for each phase, then exactly
//! one `Complete`. There is no cancellation.
//!
//! ```rust
//! use chordgrid::{merge, RhythmRegistry, Tunebook};
//!
//! let registry = RhythmRegistry::with_defaults();
//! let text = "X:1\nI:reel1\nT:My Reel\nR:Reel\nK:D\n| D | G |\n";
//! let mut target = Tunebook::parse(text, &registry);
//! let source = Tunebook::parse(text, &registry);
//!
//! let summary = merge::merge(&mut target, source);
//! assert_eq!(summary.tunes_skipped, 1);
//! assert_eq!(target.count_tunes(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::{ChordGridError, Result};
use crate::model::{Tune, TuneSet, Tunebook};

/// The two stages of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    Tunes,
    Sets,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePhase::Tunes => write!(f, "Merging tunes"),
            MergePhase::Sets => write!(f, "Merging sets"),
        }
    }
}

/// Progress counter within one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeProgress {
    pub phase: MergePhase,
    pub done: usize,
    pub total: usize,
}

/// What a merge changed in the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub tunes_added: usize,
    pub tunes_skipped: usize,
    /// (source id, id given in the target)
    pub renamed: Vec<(String, String)>,
    pub sets_added: usize,
}

/// Events sent by a background merge.
#[derive(Debug, Clone)]
pub enum MergeEvent {
    Progress {
        phase: MergePhase,
        done: usize,
        total: usize,
    },
    Complete(MergeSummary),
}

/// Merge `source` into `target`.
pub fn merge(target: &mut Tunebook, source: Tunebook) -> MergeSummary {
    merge_with_progress(target, source, |_| {})
}

/// Merge `source` into `target`, reporting progress as each tune and set
/// is processed.
pub fn merge_with_progress<F>(target: &mut Tunebook, source: Tunebook, mut on_progress: F) -> MergeSummary
where
    F: FnMut(MergeProgress),
{
    info!(
        "Merging {} tunes and {} sets",
        source.count_tunes(),
        source.count_sets()
    );
    let mut summary = MergeSummary::default();
    let (tunes, sets) = source.into_parts();

    let total = tunes.len();
    let mut id_map: HashMap<String, String> = HashMap::with_capacity(total);
    on_progress(MergeProgress {
        phase: MergePhase::Tunes,
        done: 0,
        total,
    });
    for (done, mut tune) in tunes.into_iter().enumerate() {
        let source_id = tune.id().to_string();

        if let Some(existing) = find_equal(target, &tune) {
            debug!("Tune '{}' is already here, skip", tune.title());
            id_map.insert(source_id, existing.to_string());
            summary.tunes_skipped += 1;
        } else {
            if target.contains_id(&source_id) {
                let fresh = fresh_id(target, &source_id);
                debug!("Tune id '{}' already in use, reassigning '{}'", source_id, fresh);
                tune.set_id(&fresh);
                summary.renamed.push((source_id.clone(), fresh));
            }
            debug!("Inserting tune '{}'", tune.title());
            tune.set_index(u32::try_from(target.count_tunes() + 1).unwrap_or(u32::MAX));
            id_map.insert(source_id, tune.id().to_string());
            target.insert_tune(tune);
            summary.tunes_added += 1;
        }

        on_progress(MergeProgress {
            phase: MergePhase::Tunes,
            done: done + 1,
            total,
        });
    }

    let total = sets.len();
    on_progress(MergeProgress {
        phase: MergePhase::Sets,
        done: 0,
        total,
    });
    for (done, set) in sets.into_iter().enumerate() {
        let set = remap_set(set, &id_map);
        debug!("Inserting set '{}'", set.name());
        target.push_set(set);
        summary.sets_added += 1;
        on_progress(MergeProgress {
            phase: MergePhase::Sets,
            done: done + 1,
            total,
        });
    }

    info!(
        "Merge complete: {} tunes added, {} skipped, {} renamed, {} sets added",
        summary.tunes_added,
        summary.tunes_skipped,
        summary.renamed.len(),
        summary.sets_added
    );
    summary
}

fn find_equal<'a>(target: &'a Tunebook, tune: &Tune) -> Option<&'a str> {
    target.tunes().find(|t| t.same_content(tune)).map(Tune::id)
}

/// A free id derived from `id`: one more than the highest numeric `_N`
/// suffix among the target ids built on `id`.
/// Suffixes too large to increment are ignored.
fn fresh_id(target: &Tunebook, id: &str) -> String {
    let prefix = format!("{}_", id);
    let next = target
        .ids()
        .filter_map(|existing| {
            let suffix = if existing == id {
                0
            } else {
                existing.strip_prefix(&prefix)?.parse::<u64>().ok()?
            };
            suffix.checked_add(1)
        })
        .max()
        .unwrap_or(1);
    format!("{}_{}", id, next)
}

fn remap_set(mut set: TuneSet, id_map: &HashMap<String, String>) -> TuneSet {
    let mut ids = Vec::with_capacity(set.len());
    for id in set.tune_ids() {
        match id_map.get(id) {
            Some(mapped) => ids.push(mapped.clone()),
            None => warn!("Set '{}' refers to unknown tune '{}', dropping it", set.name(), id),
        }
    }
    set.set_tunes(ids);
    set
}

/// A merge running on a worker thread.
pub struct MergeHandle {
    events: Receiver<MergeEvent>,
    worker: JoinHandle<Tunebook>,
}

/// Start merging `source` into `target` on a worker thread.
pub fn spawn_merge(target: Tunebook, source: Tunebook) -> MergeHandle {
    let (tx, rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        let mut target = target;
        let summary = merge_with_progress(&mut target, source, |progress| {
            let _ = tx.send(MergeEvent::Progress {
                phase: progress.phase,
                done: progress.done,
                total: progress.total,
            });
        });
        let _ = tx.send(MergeEvent::Complete(summary));
        target
    });

    MergeHandle { events: rx, worker }
}

impl MergeHandle {
    /// Block for the next event. `None` once the worker is gone.
    pub fn recv(&self) -> Option<MergeEvent> {
        self.events.recv().ok()
    }

    /// The next event, if one is already waiting.
    pub fn try_recv(&self) -> Option<MergeEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the merge to finish and return the merged tunebook.
    pub fn wait(self) -> Result<(Tunebook, MergeSummary)> {
        self.wait_with_progress(|_| {})
    }

    /// Wait for the merge to finish, passing each progress event to
    /// `on_progress`.
    ///
    /// # Errors
    /// [`ChordGridError::MergeAborted`] if the worker stopped without
    /// sending `Complete`.
    pub fn wait_with_progress<F>(self, mut on_progress: F) -> Result<(Tunebook, MergeSummary)>
    where
        F: FnMut(MergeProgress),
    {
        let mut summary = None;
        while let Ok(event) = self.events.recv() {
            match event {
                MergeEvent::Progress { phase, done, total } => {
                    on_progress(MergeProgress { phase, done, total })
                }
                MergeEvent::Complete(s) => summary = Some(s),
            }
        }
        let book = self.worker.join().map_err(|_| ChordGridError::MergeAborted)?;
        let summary = summary.ok_or(ChordGridError::MergeAborted)?;
        Ok((book, summary))
    }
}
