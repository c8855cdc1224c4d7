use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use data_encoding::HEXLOWER;
use log::debug;

use refsync_shared::{KeyValueStore, StorageError};

/// A `KeyValueStore` with one file per key in a single directory. File
/// names are the hex form of the key, so any key is a valid name.
pub struct FileStore {
    directory: PathBuf,
}

fn io_error(key: &str, err: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

impl FileStore {
    /// Opens (and creates, if needed) `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, StorageError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)
            .map_err(|err| io_error(&directory.display().to_string(), err))?;
        debug!("Opened file store at {}", directory.display());
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, key: &str) -> PathBuf {
        self.directory.join(HEXLOWER.encode(key.as_bytes()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(key, err)),
        }
    }

    fn set(&mut self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path(key);
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes).map_err(|err| io_error(key, err))?;
        fs::rename(&staging, &path).map_err(|err| io_error(key, err))
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(key, err)),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.path(key).is_file())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.directory)
            .map_err(|err| io_error(&self.directory.display().to_string(), err))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(prefix, err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // staging files and foreign files are not keys
            let Ok(raw) = HEXLOWER.decode(name.as_bytes()) else {
                continue;
            };
            let Ok(key) = String::from_utf8(raw) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
