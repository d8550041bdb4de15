//! Shared write-temp-then-rename helper (§3 invariant 5, §4.1).
//!
//! Both [`crate::persist::Persist::save`] and
//! [`crate::store::queue_dir::MessageDir`] need the same crash-safe write;
//! factored out once rather than duplicated, in the style of
//! `Alb-O-xeno`'s `crates/editor/src/io.rs::write_atomic`.

use std::io;
use std::path::Path;

pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    io::Write::write_all(&mut tmp, bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
