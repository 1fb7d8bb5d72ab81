use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))
}

pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

pub fn write_log(path: &Path, log: &str) -> Result<()> {
    atomic_write_bytes(path, log.as_bytes())
}

pub(crate) fn read_log(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
pub(crate) fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "bench_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    ensure_dir(&dir).expect("scratch dir");
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_log_creates_parents_and_leaves_no_temp_files() {
        let root = scratch_dir("write_log");
        let path = root.join("log").join("bool").join("Median-alice-1.log");
        write_log(&path, "finished interpretation, total running time: 5ms\n").expect("write");
        assert_eq!(
            read_log(&path).expect("read"),
            "finished interpretation, total running time: 5ms\n"
        );
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .collect();
        assert_eq!(entries.len(), 1);
        let _ = fs::remove_dir_all(root);
    }
}
