//! Two-phase write of the agent configuration.
//!
//! The document is staged in a scratch file first and the target is only
//! opened once the staged copy is complete and synced.  Consul watches the
//! config directory with `auto_reload_config`, so it must never see a
//! document that failed half-way through serialization or staging.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::Builder;

use crate::consul::ConsulConfig;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

fn serialize(document: &ConsulConfig) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(document)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Fills a freshly created scratch file.
type Fill = fn(&mut File, &[u8]) -> io::Result<()>;

fn fill_and_sync(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_all()
}

/// Writes `bytes` to a fresh `consul-config-*.json` in `scratch_dir`.  The
/// returned pipeline removes the scratch file when evaluated.
fn stage(scratch_dir: &Path, bytes: Vec<u8>, fill: Fill) -> Pipeline<PathBuf> {
    let temp = match Builder::new()
        .prefix("consul-config-")
        .suffix(".json")
        .tempfile_in(scratch_dir)
    {
        Ok(temp) => temp,
        Err(e) => return Pipeline::fail(Error::io("failed to create temporary file")(e)),
    };
    let (mut file, path) = match temp.keep() {
        Ok(kept) => kept,
        Err(e) => return Pipeline::fail(Error::io("failed to create temporary file")(e.error)),
    };

    let scratch = path.clone();
    Pipeline::succeed(path)
        .with_cleanup(move || {
            if let Err(e) = fs::remove_file(&scratch) {
                warn!("Failed to remove {}: {}", scratch.display(), e);
            }
        })
        .chain(move |path| {
            match fill(&mut file, &bytes) {
                Ok(()) => {
                    debug!("Staged {} bytes in {}", bytes.len(), path.display());
                    Pipeline::succeed(path)
                }
                Err(e) => Pipeline::fail(Error::io("failed to write temporary file")(e)),
            }
        })
}

fn copy_into_place(staged: &Path, target: &Path) -> Pipeline<u64> {
    let copied = File::open(staged)
        .map_err(Error::io("failed to reopen temporary file"))
        .and_then(|mut source| {
            let mut dest = File::create(target).map_err(Error::io("failed to open config file"))?;
            let n = io::copy(&mut source, &mut dest).map_err(Error::io("failed to copy config file"))?;
            dest.sync_all().map_err(Error::io("failed to sync config file"))?;
            Ok(n)
        });
    Pipeline::from(copied)
}

/// Serializes `document` and installs it at `target` via a scratch file in
/// `scratch_dir`.
pub fn write_atomic(target: &Path, scratch_dir: &Path, document: &ConsulConfig) -> Result<()> {
    write_with(target, scratch_dir, document, fill_and_sync)
}

fn write_with(target: &Path, scratch_dir: &Path, document: &ConsulConfig, fill: Fill) -> Result<()> {
    let written = Pipeline::from(serialize(document))
        .chain(|bytes| stage(scratch_dir, bytes, fill))
        .chain(|staged| copy_into_place(&staged, target))
        .evaluate()?;
    info!("Wrote {} bytes of configuration to {}", written, target.display());
    Ok(())
}
