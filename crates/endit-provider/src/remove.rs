//! Removal requests.
//!
//! The agent purges a tape copy when `<trash>/<bfid>` appears, holding the
//! locator it was flushed under. Nothing comes back, so there is no task.

use std::fs;
use std::path::{Path, PathBuf};

use endit_config::log_engine_info;

use crate::error::{Result, TaskError};
use crate::model::{FileId, Locator};

/// Write the removal request for `locator`, returning the file written
pub fn write_removal(trash: &Path, locator: &Locator) -> Result<PathBuf> {
    let bfid = locator
        .bfid()
        .ok_or_else(|| TaskError::InvalidLocator(locator.to_string()))?;
    // the bfid becomes a file name, hold it to the same rules as an id
    let id = FileId::new(bfid).map_err(|_| TaskError::InvalidLocator(locator.to_string()))?;

    let file = trash.join(id.as_str());
    fs::write(&file, locator.to_string())?;
    log_engine_info!(%locator, "Removal requested");
    Ok(file)
}
