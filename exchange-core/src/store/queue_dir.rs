//! One-file-per-message on-disk mirror for the pending/held queues (§6.4).
//!
//! Filenames are zero-padded, monotonically increasing integers
//! (`NNNNNNNNN.msg`) so a directory listing already reflects FIFO order;
//! `open` replays that order back into a `VecDeque<Message>` on startup.

use std::collections::VecDeque;
use std::path::PathBuf;

use crate::message::Message;
use crate::persist::PersistError;

pub struct MessageDir {
    dir: PathBuf,
    next_index: u64,
}

impl MessageDir {
    /// Ensure `dir` exists and load whatever messages are already there, in
    /// filename order.
    pub fn open(dir: impl Into<PathBuf>) -> Result<(Self, VecDeque<Message>), PersistError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| PersistError::Write { path: dir.clone(), source })?;

        let mut entries = indexed_entries(&dir)?;
        entries.sort_by_key(|(index, _)| *index);

        let mut messages = VecDeque::with_capacity(entries.len());
        let mut max_index = None;
        for (index, path) in &entries {
            let bytes = std::fs::read(path).map_err(|source| PersistError::Read { path: path.clone(), source })?;
            let message: Message =
                serde_json::from_slice(&bytes).map_err(|source| PersistError::Parse { path: path.clone(), source })?;
            messages.push_back(message);
            max_index = Some(max_index.map_or(*index, |m: u64| m.max(*index)));
        }

        let next_index = max_index.map_or(0, |m| m + 1);
        Ok((Self { dir, next_index }, messages))
    }

    /// Append one message as the newest file in the directory.
    pub fn append(&mut self, message: &Message) -> Result<(), PersistError> {
        let path = self.dir.join(format!("{:09}.msg", self.next_index));
        let bytes = serde_json::to_vec(message).map_err(|source| PersistError::Parse { path: path.clone(), source })?;
        crate::atomic::write_atomic(&path, &bytes).map_err(|source| PersistError::Write { path, source })?;
        self.next_index += 1;
        Ok(())
    }

    /// Delete the oldest `count` on-disk files (after `add_pending_offset`
    /// truncates the in-memory queue).
    pub fn remove_oldest(&self, count: usize) -> Result<(), PersistError> {
        let mut entries = indexed_entries(&self.dir)?;
        entries.sort_by_key(|(index, _)| *index);
        for (_, path) in entries.into_iter().take(count) {
            std::fs::remove_file(&path).map_err(|source| PersistError::Write { path, source })?;
        }
        Ok(())
    }

    /// Remove every on-disk file (e.g. when a held queue type is fully
    /// drained into pending).
    pub fn clear(&self) -> Result<(), PersistError> {
        for (_, path) in indexed_entries(&self.dir)? {
            std::fs::remove_file(&path).map_err(|source| PersistError::Write { path, source })?;
        }
        Ok(())
    }

    /// Replace the directory contents with exactly `messages`, in order.
    pub fn rewrite(&mut self, messages: &VecDeque<Message>) -> Result<(), PersistError> {
        self.clear()?;
        self.next_index = 0;
        for message in messages {
            self.append(message)?;
        }
        Ok(())
    }
}

fn indexed_entries(dir: &std::path::Path) -> Result<Vec<(u64, PathBuf)>, PersistError> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|source| PersistError::Read {
        path: dir.to_path_buf(),
        source,
    })? {
        let entry = entry.map_err(|source| PersistError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if let Some(index) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u64>().ok()) {
            entries.push((index, path));
        }
    }
    Ok(entries)
}
