use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{fs, process};

/// Holds the process id on disk while the server runs, removed on drop.
pub struct Pidfile {
    path: Option<PathBuf>,
}

impl Pidfile {
    pub fn create(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(default_path) else {
            return Ok(Self { path: None });
        };
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to create pidfile '{path:?}'"))?;
        file.write_all(process::id().to_string().as_bytes())?;
        Ok(Self { path: Some(path) })
    }
}

#[cfg(unix)]
fn default_path() -> Option<PathBuf> {
    let uid = nix::unistd::getuid();
    let path = if uid.is_root() {
        PathBuf::from("/run/fleetbeat.pid")
    } else {
        PathBuf::from(format!("/run/user/{}/fleetbeat.pid", uid.as_raw()))
    };
    path.parent().filter(|dir| dir.is_dir())?;
    Some(path)
}

#[cfg(not(unix))]
fn default_path() -> Option<PathBuf> {
    None
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = fs::remove_file(&path) {
                eprintln!("Failed to remove pidfile '{path:?}', reason: {err}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pidfile_lifecycle() {
        let path = std::env::temp_dir().join(format!("fleetbeat-{}.pid", uuid::Uuid::new_v4()));
        let pidfile = Pidfile::create(Some(&path)).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            process::id().to_string()
        );
        drop(pidfile);
        assert!(!path.exists());
    }
}
