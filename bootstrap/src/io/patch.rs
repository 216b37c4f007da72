//! Temporary replacement of a working directory's `main.tf`.
//!
//! A patch moves through `Original → Staged → Swapped → {Committed,
//! RolledBack}`. [`StagedPatch`] and [`SwappedPatch`] carry the state in the
//! type, so a patch cannot be committed before it is swapped in.
//!
//! The swap never leaves the directory without `main.tf`: the original is
//! *copied* to the backup, then the fragment is renamed over `main.tf` in one
//! atomic step. A journal file marks the window between the first write and
//! the final cleanup; if it is found on startup, [`recover`] restores the
//! original, or finishes a commit that had already dropped the backup.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::atomic::{copy_atomic, remove_if_exists, temp_path, write_atomic};
use crate::io::paths::MAIN_CONFIG_FILE;

pub const FRAGMENT_FILE: &str = "main_phase3.tf.tmp";
pub const BACKUP_FILE: &str = "main.tf.phase1.backup";
pub const JOURNAL_FILE: &str = ".main.tf.swap.json";

/// Files involved in patching one working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPaths {
    pub permanent: PathBuf,
    pub backup: PathBuf,
    pub fragment: PathBuf,
    pub journal: PathBuf,
}

impl PatchPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            permanent: dir.join(MAIN_CONFIG_FILE),
            backup: dir.join(BACKUP_FILE),
            fragment: dir.join(FRAGMENT_FILE),
            journal: dir.join(JOURNAL_FILE),
        }
    }
}

/// Observable state of a working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    /// No patch files present.
    Original,
    /// Fragment written, `main.tf` untouched.
    Staged,
    /// A swap is in flight, or a run stopped before finishing one. A backup
    /// without a journal also counts.
    Interrupted,
}

pub fn state(dir: &Path) -> PatchState {
    let paths = PatchPaths::new(dir);
    if paths.journal.exists() || paths.backup.exists() {
        PatchState::Interrupted
    } else if paths.fragment.exists() {
        PatchState::Staged
    } else {
        PatchState::Original
    }
}

/// Journal content. Written before any file under `main.tf`'s name changes.
#[derive(Debug, Serialize, Deserialize)]
struct SwapJournal {
    paths: PatchPaths,
}

/// Fragment written next to the untouched original.
#[derive(Debug)]
pub struct StagedPatch {
    paths: PatchPaths,
}

/// Fragment in place as `main.tf`, original kept as the backup.
#[derive(Debug)]
pub struct SwappedPatch {
    paths: PatchPaths,
}

/// Write `fragment` next to `dir/main.tf`.
///
/// Refuses to start over an interrupted swap or a stray backup, since either
/// may hold the only copy of the original.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn stage(dir: &Path, fragment: &str) -> Result<StagedPatch> {
    let paths = PatchPaths::new(dir);
    if paths.journal.exists() {
        return Err(anyhow!(
            "interrupted patch found ({}); run `bootstrap recover` first",
            paths.journal.display()
        ));
    }
    if paths.backup.exists() {
        return Err(anyhow!(
            "backup {} already exists; run `bootstrap recover` first",
            paths.backup.display()
        ));
    }
    if !paths.permanent.is_file() {
        return Err(anyhow!("missing {}", paths.permanent.display()));
    }
    write_atomic(&paths.fragment, fragment)
        .with_context(|| format!("stage {}", paths.fragment.display()))?;
    debug!(fragment = %paths.fragment.display(), "fragment staged");
    Ok(StagedPatch { paths })
}

impl StagedPatch {
    /// Put the fragment in place of `main.tf`, keeping the original as the
    /// backup. On failure the directory is restored to `Original`.
    #[instrument(skip_all, fields(permanent = %self.paths.permanent.display()))]
    pub fn swap(self) -> Result<SwappedPatch> {
        match swap_files(&self.paths) {
            Ok(()) => {
                info!("phase 3 configuration swapped in");
                Ok(SwappedPatch { paths: self.paths })
            }
            Err(err) => {
                warn!(err = %err, "swap failed, restoring original");
                if let Err(restore_err) = restore_original(&self.paths) {
                    return Err(err.context(format!("restore also failed: {restore_err:#}")));
                }
                Err(err)
            }
        }
    }

    /// Drop the staged fragment without swapping.
    pub fn discard(self) -> Result<()> {
        remove_if_exists(&self.paths.fragment)?;
        Ok(())
    }
}

fn swap_files(paths: &PatchPaths) -> Result<()> {
    let journal = SwapJournal {
        paths: paths.clone(),
    };
    let mut buf = serde_json::to_string_pretty(&journal).context("serialize swap journal")?;
    buf.push('\n');
    write_atomic(&paths.journal, buf).context("write swap journal")?;
    copy_atomic(&paths.permanent, &paths.backup).context("back up original configuration")?;
    fs::rename(&paths.fragment, &paths.permanent).with_context(|| {
        format!(
            "move {} over {}",
            paths.fragment.display(),
            paths.permanent.display()
        )
    })?;
    Ok(())
}

impl SwappedPatch {
    /// Keep the patched `main.tf`; drop the backup and journal.
    ///
    /// The backup goes first. A journal without a backup or fragment is how
    /// [`recover`] recognizes a commit that stopped halfway.
    #[instrument(skip_all, fields(permanent = %self.paths.permanent.display()))]
    pub fn commit(self) -> Result<()> {
        remove_if_exists(&self.paths.backup)?;
        remove_if_exists(&self.paths.journal)?;
        info!("phase 3 configuration committed");
        Ok(())
    }

    /// Put the original `main.tf` back, byte for byte.
    #[instrument(skip_all, fields(permanent = %self.paths.permanent.display()))]
    pub fn rollback(self) -> Result<()> {
        restore_original(&self.paths)?;
        info!("original configuration restored");
        Ok(())
    }
}

/// Return a directory to `Original` from any point of a swap. Returns `true`
/// if a backup was moved back over `main.tf`.
///
/// A present backup is a complete copy of the original (it is written via a
/// rename), so it always wins. Without a backup `main.tf` was never replaced,
/// or the swap was already committed.
fn restore_original(paths: &PatchPaths) -> Result<bool> {
    let from_backup = paths.backup.exists();
    if from_backup {
        fs::rename(&paths.backup, &paths.permanent).with_context(|| {
            format!(
                "restore {} from {}",
                paths.permanent.display(),
                paths.backup.display()
            )
        })?;
    }
    remove_if_exists(&paths.fragment)?;
    remove_if_exists(&temp_path(&paths.fragment))?;
    remove_if_exists(&temp_path(&paths.backup))?;
    remove_if_exists(&paths.journal)?;
    remove_if_exists(&temp_path(&paths.journal))?;
    Ok(from_backup)
}

/// Result of [`recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Nothing to recover.
    Clean,
    /// The original `main.tf` was moved back from the backup.
    Restored,
    /// A leftover fragment was removed; `main.tf` was never replaced.
    DiscardedFragment,
    /// A commit stopped after dropping the backup. The patched `main.tf` is
    /// kept and only the journal was removed.
    ClearedCommitted,
}

/// Bring a directory back to `Original` after a run that stopped mid-patch.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn recover(dir: &Path) -> Result<Recovery> {
    let paths = PatchPaths::new(dir);
    match state(dir) {
        PatchState::Original => Ok(Recovery::Clean),
        PatchState::Staged => {
            remove_if_exists(&paths.fragment)?;
            Ok(Recovery::DiscardedFragment)
        }
        PatchState::Interrupted => {
            if paths.journal.exists() {
                check_journal(&paths)?;
            }
            let fragment_left = paths.fragment.exists();
            let recovery = if restore_original(&paths)? {
                Recovery::Restored
            } else if fragment_left {
                Recovery::DiscardedFragment
            } else {
                Recovery::ClearedCommitted
            };
            info!(?recovery, "interrupted patch recovered");
            Ok(recovery)
        }
    }
}

fn check_journal(paths: &PatchPaths) -> Result<()> {
    let contents = fs::read_to_string(&paths.journal)
        .with_context(|| format!("read {}", paths.journal.display()))?;
    let journal: SwapJournal = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", paths.journal.display()))?;
    if journal.paths != *paths {
        warn!(
            recorded = %journal.paths.permanent.display(),
            "journal was written for another location; recovering in place"
        );
    }
    Ok(())
}

/// Run `f` with `fragment` swapped in as `dir/main.tf`.
///
/// On `Ok` the fragment stays as the new `main.tf`. On `Err` the original is
/// restored before the error is returned.
pub fn run_patched<T, F>(dir: &Path, fragment: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let swapped = stage(dir, fragment)?.swap()?;
    match f() {
        Ok(value) => {
            swapped
                .commit()
                .context("patched phase succeeded but cleanup failed")?;
            Ok(value)
        }
        Err(err) => {
            warn!(err = %err, "patched phase failed, rolling back");
            if let Err(rollback_err) = swapped.rollback() {
                return Err(err.context(format!("rollback failed: {rollback_err:#}")));
            }
            Err(err)
        }
    }
}
