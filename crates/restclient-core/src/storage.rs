//! Save-to-file for response bodies.
//!
//! The body is streamed into `<destination>.part` and renamed into place only
//! once the whole body has arrived, so a failed transfer never leaves a
//! truncated file under the final name.

use std::path::{Path, PathBuf};

use tokio::fs::File;

use crate::http::{HttpError, Response};

/// Temporary file suffix used before the final rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `body.json` → `body.json.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Write the rest of `resp`'s body to `path`. Returns the bytes written.
pub async fn save_body(resp: &mut Response<'_>, path: &Path) -> Result<u64, HttpError> {
    let tmp = temp_path(path);
    let mut file = File::create(&tmp).await.map_err(HttpError::Storage)?;
    let written = match resp.copy_to(&mut file).await {
        Ok(n) => n,
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };
    file.sync_all().await.map_err(HttpError::Storage)?;
    drop(file);
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(HttpError::Storage)?;
    tracing::debug!(path = %path.display(), bytes = written, "saved response body");
    Ok(written)
}
