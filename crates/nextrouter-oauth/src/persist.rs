//! On-disk token cache: one 0600 file per cache key, written via
//! temp-file + atomic rename. Missing or corrupt files read as a miss.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::client::CachedToken;

fn file_for(dir: &Path, cache_key: &str) -> PathBuf {
    // Cache keys contain `|`; the filename is their digest.
    let mut hasher = Sha256::new();
    hasher.update(cache_key.as_bytes());
    dir.join(format!("{:x}.json", hasher.finalize()))
}

pub fn load(dir: &Path, cache_key: &str) -> Option<CachedToken> {
    let raw = std::fs::read(file_for(dir, cache_key)).ok()?;
    serde_json::from_slice(&raw).ok()
}

pub fn save(dir: &Path, cache_key: &str, token: &CachedToken) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let target = file_for(dir, cache_key);
    let tmp = target.with_extension("tmp");

    let payload = serde_json::to_vec(token)?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        set_owner_only(&file)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &target)
}

pub fn remove(dir: &Path, cache_key: &str) {
    let _ = std::fs::remove_file(file_for(dir, cache_key));
}

#[cfg(unix)]
fn set_owner_only(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: i64) -> CachedToken {
        CachedToken {
            access_token: "tok".into(),
            token_type: "Bearer".into(),
            expires_at,
        }
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "p|i|hash", &token(99)).unwrap();
        let loaded = load(dir.path(), "p|i|hash").unwrap();
        assert_eq!(loaded.access_token, "tok");
        assert_eq!(loaded.expires_at, 99);
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "key", &token(1)).unwrap();
        let path = file_for(dir.path(), "key");
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_for(dir.path(), "bad");
        std::fs::write(&path, b"not json").unwrap();
        assert!(load(dir.path(), "bad").is_none());
        assert!(load(dir.path(), "absent").is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "k", &token(1)).unwrap();
        remove(dir.path(), "k");
        remove(dir.path(), "k");
        assert!(load(dir.path(), "k").is_none());
    }
}
