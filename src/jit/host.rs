//! Symbol lookup in the host process and in explicitly loaded libraries.

use std::path::{Path, PathBuf};

use tracing::debug;

struct LoadedLibrary {
    path: PathBuf,
    native: libloading::Library,
}

/// Symbols that existed before the session: the running executable, the
/// libraries it was linked against, and libraries loaded on request.
pub(crate) struct HostSymbols {
    process: Option<libloading::Library>,
    libraries: Vec<LoadedLibrary>,
}

impl HostSymbols {
    pub(crate) fn new() -> Self {
        HostSymbols {
            process: process_library(),
            libraries: Vec::new(),
        }
    }

    /// Address of `name`, searching the process first, then libraries in
    /// load order.
    pub(crate) fn lookup(&self, name: &str) -> Option<usize> {
        self.process
            .iter()
            .chain(self.libraries.iter().map(|l| &l.native))
            .find_map(|lib| unsafe {
                lib.get::<*const std::ffi::c_void>(name.as_bytes())
                    .ok()
                    .map(|sym| *sym as usize)
            })
            .filter(|addr| *addr != 0)
    }

    /// Load a shared library and make its symbols available.
    pub(crate) fn load_library(&mut self, path: &Path) -> Result<(), libloading::Error> {
        if self.libraries.iter().any(|l| l.path == path) {
            return Ok(());
        }
        let native = unsafe { libloading::Library::new(path) }?;
        debug!(path = %path.display(), "loaded library");
        self.libraries.push(LoadedLibrary {
            path: path.to_path_buf(),
            native,
        });
        Ok(())
    }

    pub(crate) fn num_libraries(&self) -> usize {
        self.libraries.len()
    }
}

#[cfg(unix)]
fn process_library() -> Option<libloading::Library> {
    Some(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn process_library() -> Option<libloading::Library> {
    libloading::os::windows::Library::this().ok().map(Into::into)
}
