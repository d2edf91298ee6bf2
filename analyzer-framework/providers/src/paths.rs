use std::path::{Path, PathBuf};

/// Translates locations between the container mount root and the host source
/// root. Every path crossing the container boundary goes through here.
#[derive(Clone, Debug)]
pub struct PathTranslator {
    container_root: PathBuf,
    host_root: PathBuf,
}

impl PathTranslator {
    pub fn new(container_root: impl Into<PathBuf>, host_root: impl Into<PathBuf>) -> Self {
        Self {
            container_root: container_root.into(),
            host_root: host_root.into(),
        }
    }

    pub fn container_root(&self) -> &Path {
        &self.container_root
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Re-root a container-side location under the host source root.
    ///
    /// The container root itself maps to the host root; locations outside the
    /// container root are returned unchanged.
    pub fn to_host(&self, location: &str) -> String {
        let path = Path::new(location);
        match path.strip_prefix(&self.container_root) {
            Ok(relative) if relative.as_os_str().is_empty() => {
                self.host_root.display().to_string()
            }
            Ok(relative) => self.host_root.join(relative).display().to_string(),
            Err(_) => location.to_owned(),
        }
    }
}

/// Rewrite a host path into the form the Linux-based container runtime
/// expects. Windows drive-letter paths become `/mnt/<drive>/<rest>`.
pub fn runtime_device_path(path: &Path) -> String {
    let raw = path.display().to_string();
    let bytes = raw.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
    if !has_drive {
        return raw;
    }
    let drive = (bytes[0] as char).to_ascii_lowercase();
    let rest = raw[2..].trim_start_matches(['\\', '/']).replace('\\', "/");
    format!("/mnt/{drive}/{rest}")
}
