//! Plain JSON settings files in the data directory.
//!
//! Readers fall back to defaults on a missing or corrupt file; writers go
//! through a `.tmp` file and a rename, owner-only on Unix.

use std::fs;
use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read `{data_dir}/{file}`, or `T::default()` if it is missing or corrupt.
pub(crate) fn read_json_or_default<T>(data_dir: &Path, file: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let path = data_dir.join(file);
    let Ok(contents) = fs::read_to_string(&path) else {
        return T::default();
    };
    serde_json::from_str(&contents).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "corrupt settings file, using defaults");
        T::default()
    })
}

/// Atomically replace `{data_dir}/{file}` with `value` as pretty JSON.
///
/// The temporary file is `{data_dir}/.{file}.tmp`.
pub(crate) fn write_private_json<T: Serialize>(
    data_dir: &Path,
    file: &str,
    value: &T,
) -> io::Result<()> {
    let path = data_dir.join(file);
    let tmp = data_dir.join(tmp_name(file));

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    fs::write(&tmp, &json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&tmp, &path)
}

/// Remove `{data_dir}/{file}`. Absence is not an error.
pub(crate) fn remove_if_present(data_dir: &Path, file: &str) -> io::Result<()> {
    match fs::remove_file(data_dir.join(file)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

pub(crate) fn tmp_name(file: &str) -> String {
    format!(".{file}.tmp")
}
