use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;
use log::{info, warn};

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to gyroled-remote.json next to the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\gyroled-remote.exe => F:\gyroled-remote.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to gyroled-remote.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "gyroled", "gyroled-remote").map(|dirs| {
        dirs.config_dir().join("gyroled-remote.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                info!("Could not read metadata of: {}; Using local path instead. ({})", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    /// Only one controller may talk to the totem at a time; hold the guard for the whole run.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Opens the default config file location.
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        Self::open_sync(&path)
    }

    pub fn open_sync(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            if !directory.as_os_str().is_empty() {
                std::fs::create_dir_all(directory)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    fn clone_file(&self) -> Result<std::fs::File, ConfigError> {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(inner.file.try_clone()?)
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(self.clone_file()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        Ok(File::from_std(self.clone_file()?))
    }

    async fn read_content(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(content))
    }

    /// A blank file gets the defaults written to it so they can be edited.
    pub async fn read_or_init(&self) -> Result<Config, ConfigError> {
        match self.read_content().await? {
            None => {
                let config = Config::default();
                self.save(&config).await?;
                Ok(config)
            },
            Some(content) => Ok(serde_json::from_str(str::from_utf8(&content)?)?),
        }
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gyroled-remote-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn empty_file_reads_as_default() {
        let path = temp_path("empty");
        let _ = std::fs::remove_file(&path);

        let io = ConfigIO::open_sync(&path).unwrap();
        assert_eq!(io.read_or_init().await.unwrap(), Config::default());

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn save_then_read() {
        let path = temp_path("save");
        let _ = std::fs::remove_file(&path);

        let io = ConfigIO::open_sync(&path).unwrap();
        let config = Config { write_deadline_ms: 750, ..Config::default() };
        io.save(&config).await.unwrap();
        assert_eq!(io.read_or_init().await.unwrap(), config);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn blank_file_is_initialized_with_defaults() {
        let path = temp_path("init");
        std::fs::write(&path, "  \n").unwrap();

        let io = ConfigIO::open_sync(&path).unwrap();
        assert_eq!(io.read_or_init().await.unwrap(), Config::default());

        let written: Config = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, Config::default());

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn existing_config_is_not_overwritten() {
        let path = temp_path("keep");
        std::fs::write(&path, r#"{"writeDeadlineMs": 500}"#).unwrap();

        let io = ConfigIO::open_sync(&path).unwrap();
        assert_eq!(io.read_or_init().await.unwrap().write_deadline_ms, 500);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"writeDeadlineMs": 500}"#);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn broken_json_is_an_error() {
        let path = temp_path("broken");
        std::fs::write(&path, "{ not json").unwrap();

        let io = ConfigIO::open_sync(&path).unwrap();
        assert!(matches!(io.read_or_init().await, Err(ConfigError::JsonError { .. })));

        std::fs::remove_file(&path).unwrap();
    }
}
