//! Symbol file persistence.
//!
//! The four maps (user and kernel, forward and reverse) are written as one
//! JSON document. Writes go to a sibling temporary file which is then renamed
//! over the destination, and a restore only touches the table once the whole
//! file has been parsed and checked.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{SymbolNamespace, SymbolTable};
use crate::error::{DebuggerError, Result};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SymbolFile
{
    version: u32,
    user: SymbolNamespace,
    kernel: SymbolNamespace,
}

impl SymbolTable
{
    /// Write both namespaces to `path`.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file could not be written or renamed into place
    /// - `Serialization`: encoding failed
    pub fn store(&self, path: &Path) -> Result<()>
    {
        let file = SymbolFile {
            version: FORMAT_VERSION,
            user: self.user.clone(),
            kernel: self.kernel.clone(),
        };
        let encoded = serde_json::to_vec(&file)?;

        let staging = staging_path(path);
        {
            let mut out = fs::File::create(&staging)?;
            out.write_all(&encoded)?;
            out.sync_all()?;
        }
        if let Err(err) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }

        info!(
            path = %path.display(),
            user = self.user.len(),
            kernel = self.kernel.len(),
            "symbols stored"
        );
        Ok(())
    }

    /// Replace both namespaces with the contents of `path`.
    ///
    /// On error the table is left untouched.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file could not be read
    /// - `Serialization`: the file is not a symbol file, has an unknown
    ///   version, or its forward and reverse maps disagree
    pub fn restore(&mut self, path: &Path) -> Result<()>
    {
        let bytes = fs::read(path)?;
        let file: SymbolFile = serde_json::from_slice(&bytes)?;
        if file.version != FORMAT_VERSION {
            return Err(DebuggerError::Serialization(format!(
                "unsupported symbol file version {}",
                file.version
            )));
        }
        if !file.user.is_consistent() || !file.kernel.is_consistent() {
            return Err(DebuggerError::Serialization(
                "symbol file maps are not mirror images".to_string(),
            ));
        }

        info!(
            path = %path.display(),
            user = file.user.len(),
            kernel = file.kernel.len(),
            "symbols restored"
        );
        self.replace(file.user, file.kernel);
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf
{
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
