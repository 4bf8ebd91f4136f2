//! Locating and loading the native engine.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use log::{debug, info};

use crate::api::RawApi;
use crate::error::EngineError;
use crate::handle::{FamilyListKind, Owned};

/// Environment variable holding extra engine search directories.
pub const LIBRARY_PATH_ENV: &str = "APRILTAG_LIB_PATH";

/// Base name of the engine library; the platform prefix/suffix is added.
pub const LIBRARY_BASE_NAME: &str = "apriltag";

/// Platform file name of the engine library (`libapriltag.so` on Linux).
pub fn library_file_name() -> OsString {
    libloading::library_filename(LIBRARY_BASE_NAME)
}

/// Ordered list of directories searched for the engine library.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchPaths {
    dirs: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories listed in [`LIBRARY_PATH_ENV`], in order.
    pub fn from_env() -> Self {
        std::env::var_os(LIBRARY_PATH_ENV)
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default()
    }

    /// Append a directory. Duplicates are ignored.
    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.dirs.contains(&dir) {
            self.dirs.push(dir);
        }
    }

    pub fn with(mut self, dir: impl Into<PathBuf>) -> Self {
        self.push(dir);
        self
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// First directory that contains `file_name`.
    pub fn locate(&self, file_name: &OsStr) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.is_file())
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for SearchPaths {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut paths = Self::new();
        for dir in iter {
            paths.push(dir);
        }
        paths
    }
}

/// Where the engine's entry points came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineOrigin {
    /// Found in one of the caller's search directories.
    SearchPath(PathBuf),
    /// Resolved by the system loader from the bare file name.
    System(OsString),
    /// Supplied as an in-process entry table.
    InProcess,
}

struct EngineInner {
    api: RawApi,
    origin: EngineOrigin,
    // Keeps the entry points in `api` mapped.
    _library: Option<Library>,
}

/// Shared handle to a resolved engine.
///
/// Cloning is cheap. Every owned foreign object holds a clone, so the
/// library cannot be unloaded while anything it allocated is still alive.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Load the engine, trying each search directory before falling back to
    /// the system loader.
    pub fn load(paths: &SearchPaths) -> Result<Self, EngineError> {
        let file_name = library_file_name();
        let (target, origin) = match paths.locate(&file_name) {
            Some(path) => (path.as_os_str().to_owned(), EngineOrigin::SearchPath(path)),
            None => {
                debug!(
                    "{} not found in {} search dirs, deferring to the system loader",
                    Path::new(&file_name).display(),
                    paths.dirs().len()
                );
                (file_name.clone(), EngineOrigin::System(file_name.clone()))
            }
        };

        // SAFETY: loading runs the library's initializers; the engine is a
        // plain C library with no global constructors beyond its family table.
        let library = unsafe { Library::new(&target) };
        let library = library.map_err(|source| EngineError::LibraryNotFound {
            name: file_name.to_string_lossy().into_owned(),
            searched: paths.dirs().to_vec(),
            source,
        })?;
        let api = RawApi::resolve(&library)?;
        info!("loaded engine from {:?}", origin);

        Ok(Self {
            inner: Arc::new(EngineInner {
                api,
                origin,
                _library: Some(library),
            }),
        })
    }

    /// Wrap an in-process entry table, e.g. a statically linked engine.
    pub fn from_api(api: RawApi) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                api,
                origin: EngineOrigin::InProcess,
                _library: None,
            }),
        }
    }

    #[inline]
    pub fn api(&self) -> &RawApi {
        &self.inner.api
    }

    pub fn origin(&self) -> &EngineOrigin {
        &self.inner.origin
    }

    /// Names of the families compiled into the engine.
    ///
    /// The enumeration array is released before returning.
    pub fn family_names(&self) -> Result<Vec<String>, EngineError> {
        // SAFETY: `family_list` has no preconditions and returns an owned array.
        let list = unsafe { Owned::<FamilyListKind>::from_raw(self, (self.api().family_list)()) }?;
        Ok(list.names())
    }

    /// Whether two handles share the same loaded engine.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("origin", &self.inner.origin)
            .finish_non_exhaustive()
    }
}
