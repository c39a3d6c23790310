use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Returns the session id stored at `path`, creating and persisting a new
/// UUID v4 on first use. If nothing usable is stored and the file cannot be
/// written, an unpersisted fallback id is returned instead.
pub fn load_or_create(path: &Path) -> String {
  match std::fs::read_to_string(path) {
    Ok(stored) if !stored.trim().is_empty() => return stored.trim().to_string(),
    Ok(_) => {}
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
    Err(err) => tracing::warn!(path = %path.display(), error = %err, "unreadable session id"),
  }

  let id = uuid::Uuid::new_v4().to_string();
  match std::fs::write(path, &id) {
    Ok(()) => {
      tracing::debug!(path = %path.display(), "created session id");
      id
    }
    Err(err) => {
      tracing::warn!(path = %path.display(), error = %err, "cannot persist session id");
      fallback_id()
    }
  }
}

/// `session_<millis>_<9 base-36 chars>`
pub fn fallback_id() -> String {
  const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
  let millis = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis())
    .unwrap_or_default();
  let mut rng = rand::thread_rng();
  let suffix: String = (0..9)
    .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
    .collect();
  format!("session_{millis}_{suffix}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generated_once_then_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session_id");
    let first = load_or_create(&path);
    assert!(uuid::Uuid::parse_str(&first).is_ok());
    assert_eq!(load_or_create(&path), first);
  }

  #[test]
  fn blank_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session_id");
    std::fs::write(&path, "  \n").unwrap();
    let id = load_or_create(&path);
    assert!(uuid::Uuid::parse_str(&id).is_ok());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), id);
  }

  #[test]
  fn unwritable_location_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("session_id");
    let id = load_or_create(&path);
    assert!(id.starts_with("session_"));
    assert_ne!(load_or_create(&path), id);
  }

  #[test]
  fn fallback_has_expected_shape() {
    let id = fallback_id();
    let parts: Vec<&str> = id.split('_').collect();
    assert_eq!(parts.len(), 3);
    assert!(parts[1].parse::<u128>().is_ok());
    assert_eq!(parts[2].len(), 9);
  }
}
