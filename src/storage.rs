//! # Storage — Pluggable Object Stores
//!
//! Persists and retrieves samples under a logical name `(client_id, obj_id)`,
//! rendered `{:08X}-{:08X}`. Two filesystem backends exist; the directory
//! layout is the *measured variable* of the benchmark:
//!
//! - [`FlatStore`] ("debug") keeps every object in one directory. Simple, and
//!   a worst case for directory-catalogue growth at scale.
//! - [`DirTreeStore`] ("dirtree") spreads objects over a three-level hex
//!   hierarchy `{:04X}/{:04X}/{:04X}/` built from the low and high halves of
//!   `client_id` and the high half of `obj_id`, keeping any single catalogue
//!   bounded.
//!
//! Both share the same contract: the workspace directory must not already
//! exist at creation, the first write of a name must be an exclusive create
//! (a second write of the same name fails), and `destroy` removes the whole
//! workspace tree. Every read and write emits one trace record whose duration
//! covers the open + I/O + close sequence.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, ensure, Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use tracing::debug;

use crate::sample::{Sample, SAMPLE_LEN_MAX};
use crate::trace::Trace;

/// Render the logical object name.
pub fn object_name(client_id: u32, obj_id: u32) -> String {
    format!("{client_id:08X}-{obj_id:08X}")
}

/// Backend selection, decided once from configuration and consumed at
/// construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Single flat directory.
    Debug,
    /// Three-level hex directory hierarchy.
    Dirtree,
}

impl StoreKind {
    /// Prepare a backend of this kind. For filesystem backends the workspace
    /// is a directory path which must not already exist. `extra_args` are
    /// forwarded verbatim for backend-specific configuration.
    pub fn create(self, workspace: &str, extra_args: &[String]) -> Result<Box<dyn ObjectStore>> {
        if !extra_args.is_empty() {
            debug!(?extra_args, "filesystem backends take no extra arguments; ignored");
        }
        let root = claim_workspace(workspace)?;
        Ok(match self {
            StoreKind::Debug => Box::new(FlatStore { root }),
            StoreKind::Dirtree => Box::new(DirTreeStore { root }),
        })
    }
}

/// A named object store. Implementations are shared across workers and hold
/// no per-operation mutable state.
pub trait ObjectStore: Send + Sync {
    /// Persist the sample's bytes under the logical name. Fails if an object
    /// with the same identity already exists.
    fn write(&self, client_id: u32, obj_id: u32, sample: &Sample, trace: &Trace) -> Result<()>;

    /// Fetch the object's bytes into the sample.
    fn read(&self, client_id: u32, obj_id: u32, sample: &mut Sample, trace: &Trace) -> Result<()>;

    /// Tear down, removing the workspace and everything under it.
    fn destroy(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ObjectStore")
    }
}

/// Exclusively create the workspace directory.
fn claim_workspace(workspace: &str) -> Result<PathBuf> {
    match fs::create_dir(workspace) {
        Ok(()) => {
            debug!(workspace, "workspace created");
            Ok(PathBuf::from(workspace))
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            bail!("workspace {workspace} already exists: cannot proceed")
        }
        Err(err) => {
            Err(err).with_context(|| format!("workspace {workspace} could not be created"))
        }
    }
}

fn open_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Write the payload and emit the WRITE record. `start` is when the
/// (successful) open began, so the timed window is open + write + close.
fn store_payload(mut file: File, path: &Path, sample: &Sample, trace: &Trace, start: Instant) -> Result<()> {
    file.write_all(sample.data())
        .with_context(|| format!("writing {} bytes to {}", sample.len(), path.display()))?;
    drop(file);
    trace.write(start, start.elapsed());
    Ok(())
}

/// Open + fstat + read + close, timed as one window, then transfer the bytes
/// into the sample.
fn fetch_payload(path: &Path, sample: &mut Sample, trace: &Trace) -> Result<()> {
    let mut buf = [0u8; SAMPLE_LEN_MAX];

    let start = Instant::now();
    let mut file =
        File::open(path).with_context(|| format!("opening object {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("stat of object {}", path.display()))?
        .len() as usize;
    ensure!(
        size <= SAMPLE_LEN_MAX,
        "object {} is {size} bytes, larger than any sample",
        path.display()
    );
    file.read_exact(&mut buf[..size])
        .with_context(|| format!("loading {size} bytes from {}", path.display()))?;
    drop(file);
    trace.read(start, start.elapsed());

    sample.read(&buf[..size]);
    Ok(())
}

/// Flat-directory backend: every object lives directly in the workspace.
pub struct FlatStore {
    root: PathBuf,
}

impl FlatStore {
    fn object_path(&self, client_id: u32, obj_id: u32) -> PathBuf {
        self.root.join(object_name(client_id, obj_id))
    }
}

impl ObjectStore for FlatStore {
    fn write(&self, client_id: u32, obj_id: u32, sample: &Sample, trace: &Trace) -> Result<()> {
        let path = self.object_path(client_id, obj_id);
        let start = Instant::now();
        let file = open_exclusive(&path)
            .with_context(|| format!("creating object {}", path.display()))?;
        store_payload(file, &path, sample, trace, start)
    }

    fn read(&self, client_id: u32, obj_id: u32, sample: &mut Sample, trace: &Trace) -> Result<()> {
        fetch_payload(&self.object_path(client_id, obj_id), sample, trace)
    }

    fn destroy(&self) -> Result<()> {
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("removing workspace {}", self.root.display()))
    }
}

/// Hierarchical backend: objects spread over three levels of hex directories
/// so no single catalogue grows unmanageable.
pub struct DirTreeStore {
    root: PathBuf,
}

impl DirTreeStore {
    fn object_path(&self, client_id: u32, obj_id: u32) -> PathBuf {
        self.root.join(format!(
            "{:04X}/{:04X}/{:04X}/{}",
            client_id & 0xFFFF,
            (client_id >> 16) & 0xFFFF,
            (obj_id >> 16) & 0xFFFF,
            object_name(client_id, obj_id)
        ))
    }

    /// Create the three intermediate directories, tolerating ones that
    /// already exist.
    fn make_parents(&self, client_id: u32, obj_id: u32) -> Result<()> {
        let mut dir = self.root.join(format!("{:04X}", client_id & 0xFFFF));
        for component in [
            format!("{:04X}", (client_id >> 16) & 0xFFFF),
            format!("{:04X}", (obj_id >> 16) & 0xFFFF),
        ] {
            mkdir_tolerant(&dir)?;
            dir.push(component);
        }
        mkdir_tolerant(&dir)
    }
}

fn mkdir_tolerant(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err).with_context(|| format!("creating directory {}", path.display())),
    }
}

impl ObjectStore for DirTreeStore {
    fn write(&self, client_id: u32, obj_id: u32, sample: &Sample, trace: &Trace) -> Result<()> {
        let path = self.object_path(client_id, obj_id);

        let mut start = Instant::now();
        let file = match open_exclusive(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // First object under this prefix: build the directory path
                // and retry exactly once. The timer restarts so the mkdir
                // detour stays out of the measured window.
                self.make_parents(client_id, obj_id)?;
                start = Instant::now();
                open_exclusive(&path)
                    .with_context(|| format!("creating object {}", path.display()))?
            }
            Err(err) => {
                return Err(err).with_context(|| format!("creating object {}", path.display()))
            }
        };
        store_payload(file, &path, sample, trace, start)
    }

    fn read(&self, client_id: u32, obj_id: u32, sample: &mut Sample, trace: &Trace) -> Result<()> {
        fetch_payload(&self.object_path(client_id, obj_id), sample, trace)
    }

    fn destroy(&self) -> Result<()> {
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("removing workspace {}", self.root.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::DebugPrng;

    fn workspace_in(dir: &Path) -> String {
        dir.join("ws").to_str().unwrap().to_owned()
    }

    fn fresh_sample(seed: u32) -> Sample {
        Sample::new(&mut DebugPrng::new(seed))
    }

    #[test]
    fn write_then_read_identity() {
        for kind in [StoreKind::Debug, StoreKind::Dirtree] {
            let dir = tempfile::tempdir().unwrap();
            let store = kind.create(&workspace_in(dir.path()), &[]).unwrap();
            let trace = Trace::disabled();

            let sample = fresh_sample(42);
            store.write(3, 0x10, &sample, &trace).unwrap();

            let mut back = fresh_sample(0);
            store.read(3, 0x10, &mut back, &trace).unwrap();
            assert_eq!(back.data(), sample.data(), "{kind:?} returned different bytes");

            store.destroy().unwrap();
        }
    }

    #[test]
    fn second_write_of_same_identity_fails() {
        for kind in [StoreKind::Debug, StoreKind::Dirtree] {
            let dir = tempfile::tempdir().unwrap();
            let store = kind.create(&workspace_in(dir.path()), &[]).unwrap();
            let trace = Trace::disabled();

            let sample = fresh_sample(1);
            store.write(0, 0x10, &sample, &trace).unwrap();
            assert!(
                store.write(0, 0x10, &sample, &trace).is_err(),
                "{kind:?} allowed a duplicate create"
            );

            store.destroy().unwrap();
        }
    }

    /// Two writers racing on the same identity: exactly one create wins,
    /// the loser gets the exclusive-create error.
    #[test]
    fn concurrent_writers_one_wins() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> =
            Arc::from(StoreKind::Dirtree.create(&workspace_in(dir.path()), &[]).unwrap());
        let barrier = crate::barrier::Barrier::new(2);

        let handles: Vec<_> = (0..2)
            .map(|seed| {
                let store = Arc::clone(&store);
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let sample = fresh_sample(seed);
                    barrier.wait();
                    store.write(0, 0x10, &sample, &Trace::disabled()).is_ok()
                })
            })
            .collect();

        let wins: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(
            wins.iter().filter(|&&ok| ok).count(),
            1,
            "exactly one writer must win: {wins:?}"
        );

        store.destroy().unwrap();
    }

    /// The documented dirtree layout: client 0x11223344, object 0xAABBCCDD
    /// lands at 3344/1122/AABB/11223344-AABBCCDD.
    #[test]
    fn dirtree_path_contract() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace_in(dir.path());
        let store = StoreKind::Dirtree.create(&ws, &[]).unwrap();

        store
            .write(0x1122_3344, 0xAABB_CCDD, &fresh_sample(9), &Trace::disabled())
            .unwrap();

        let expected = Path::new(&ws).join("3344/1122/AABB/11223344-AABBCCDD");
        assert!(expected.is_file(), "missing {}", expected.display());

        store.destroy().unwrap();
    }

    #[test]
    fn flat_store_uses_plain_names() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace_in(dir.path());
        let store = StoreKind::Debug.create(&ws, &[]).unwrap();

        store.write(7, 0xBEEF, &fresh_sample(2), &Trace::disabled()).unwrap();
        assert!(Path::new(&ws).join("00000007-0000BEEF").is_file());

        store.destroy().unwrap();
    }

    #[test]
    fn existing_workspace_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace_in(dir.path());
        fs::create_dir(&ws).unwrap();

        for kind in [StoreKind::Debug, StoreKind::Dirtree] {
            let err = kind.create(&ws, &[]).unwrap_err();
            assert!(
                err.to_string().contains("already exists"),
                "{kind:?}: unexpected error {err:#}"
            );
        }
    }

    #[test]
    fn destroy_removes_workspace_tree() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace_in(dir.path());
        let store = StoreKind::Dirtree.create(&ws, &[]).unwrap();
        let trace = Trace::disabled();

        // Populate several prefixes so destroy has real pruning to do.
        for (client, obj) in [(0u32, 0x10u32), (1, 0x2000_0000), (0xFFFF_0001, 7)] {
            store.write(client, obj, &fresh_sample(client ^ obj), &trace).unwrap();
        }
        store.destroy().unwrap();
        assert!(!Path::new(&ws).exists());
    }

    #[test]
    fn read_of_missing_object_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreKind::Debug.create(&workspace_in(dir.path()), &[]).unwrap();
        let mut sample = fresh_sample(0);
        assert!(store.read(0, 0xDEAD, &mut sample, &Trace::disabled()).is_err());
        store.destroy().unwrap();
    }

    /// Reads on each backend emit one READ record, writes one WRITE record;
    /// the dirtree mkdir retry path still records a single entry.
    #[test]
    fn operations_emit_trace_records() {
        use crate::trace::{TraceOp, ENTRY_SIZE};
        use std::time::Instant;

        let dir = tempfile::tempdir().unwrap();
        let store = StoreKind::Dirtree.create(&workspace_in(dir.path()), &[]).unwrap();

        let trace_dir = tempfile::tempdir().unwrap();
        let trace = Trace::create(trace_dir.path(), 0, Instant::now()).unwrap();

        let sample = fresh_sample(11);
        store.write(5, 0x30, &sample, &trace).unwrap();
        let mut back = fresh_sample(0);
        store.read(5, 0x30, &mut back, &trace).unwrap();
        trace.finish().unwrap();

        let bytes = fs::read(trace_dir.path().join("0.trc")).unwrap();
        assert_eq!(bytes.len(), 2 * ENTRY_SIZE);
        assert_eq!(bytes[0], TraceOp::Write as u8);
        assert_eq!(bytes[ENTRY_SIZE], TraceOp::Read as u8);

        store.destroy().unwrap();
    }
}
