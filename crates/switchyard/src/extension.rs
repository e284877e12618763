//! Extension loading.
//!
//! An extension is a dynamic library in the extension directory that
//! exports [`ENTRY_SYMBOL`]. The loader opens each candidate file, asks the
//! entry point for an [`Extension`], and hands it a [`ProxyContext`]. A
//! module that fails to open, lacks the entry point or panics during
//! `init` is reported and skipped; it never takes the proxy down with it.
//!
//! Build an extension as a `cdylib` and export it with
//! [`declare_extension!`](crate::declare_extension):
//!
//! ```rust,ignore
//! use switchyard::prelude::*;
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! impl Extension for Greeter {
//!     fn init(&self, context: ProxyContext) {
//!         tracing::info!(players = context.player_count(), "greeter loaded");
//!     }
//! }
//!
//! switchyard::declare_extension!(Greeter::default());
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::context::ProxyContext;

/// Symbol every extension module exports.
pub const ENTRY_SYMBOL: &str = "switchyard_extension";

/// Loadable module suffix on this platform (`.so`, `.dylib` or `.dll`).
pub const MODULE_SUFFIX: &str = std::env::consts::DLL_SUFFIX;

/// Signature of [`ENTRY_SYMBOL`].
#[allow(improper_ctypes_definitions)]
pub type EntryPoint = unsafe extern "C" fn() -> *mut dyn Extension;

/// Code loaded into the proxy at startup.
pub trait Extension: Send + Sync {
    /// Called once, right after loading. Spawn tasks or subscribe to
    /// events here; do not block.
    fn init(&self, context: ProxyContext);
}

/// Errors raised while loading a single module.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("failed to open module: {0}")]
    Load(#[source] libloading::Error),

    #[error("module does not export `{ENTRY_SYMBOL}`: {0}")]
    MissingEntryPoint(#[source] libloading::Error),

    #[error("entry point returned a null extension")]
    NullEntryPoint,

    #[error("extension panicked during init: {0}")]
    InitPanicked(String),

    #[error("failed to read extension directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Exports `$ctor` as the module's extension.
///
/// Expands to the `extern "C"` entry point the loader looks up, so a
/// module may use this macro at most once.
#[macro_export]
macro_rules! declare_extension {
    ($ctor:expr) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn switchyard_extension() -> *mut dyn $crate::Extension {
            let extension: ::std::boxed::Box<dyn $crate::Extension> =
                ::std::boxed::Box::new($ctor);
            ::std::boxed::Box::into_raw(extension)
        }
    };
}

// ---------------------------------------------------------------------------
// Module openers
// ---------------------------------------------------------------------------

/// Turns a file into an [`Extension`].
pub trait ModuleOpener: Send + Sync {
    fn open(&mut self, path: &Path) -> Result<Box<dyn Extension>, ExtensionError>;
}

/// Opens modules with the platform's dynamic loader.
///
/// Libraries stay mapped for as long as the opener lives.
#[derive(Default)]
pub struct DylibOpener {
    libraries: Vec<Library>,
}

impl ModuleOpener for DylibOpener {
    fn open(&mut self, path: &Path) -> Result<Box<dyn Extension>, ExtensionError> {
        // SAFETY: loading a module runs its initializers; only files placed
        // in the extension directory by the operator get here. The entry
        // point's signature is fixed by `declare_extension!`.
        unsafe {
            let library = Library::new(path).map_err(ExtensionError::Load)?;
            let raw = {
                let entry: Symbol<EntryPoint> = library
                    .get(ENTRY_SYMBOL.as_bytes())
                    .map_err(ExtensionError::MissingEntryPoint)?;
                entry()
            };
            if raw.is_null() {
                return Err(ExtensionError::NullEntryPoint);
            }
            let extension = Box::from_raw(raw);
            self.libraries.push(library);
            Ok(extension)
        }
    }
}

// ---------------------------------------------------------------------------
// ExtensionLoader
// ---------------------------------------------------------------------------

/// Outcome of [`ExtensionLoader::load_all`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Modules that loaded and initialized.
    pub loaded: Vec<PathBuf>,
    /// Modules that were skipped, with the reason.
    pub failures: Vec<(PathBuf, ExtensionError)>,
}

impl LoadReport {
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

/// Loads and owns the proxy's extensions.
pub struct ExtensionLoader {
    // Declared before `opener` so extensions drop before their code is
    // unmapped.
    extensions: Vec<Box<dyn Extension>>,
    opener: Box<dyn ModuleOpener>,
}

impl ExtensionLoader {
    pub fn new() -> Self {
        Self::with_opener(Box::new(DylibOpener::default()))
    }

    pub fn with_opener(opener: Box<dyn ModuleOpener>) -> Self {
        Self {
            extensions: Vec::new(),
            opener,
        }
    }

    /// Number of initialized extensions, static and loaded.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Initializes an extension compiled into the binary.
    ///
    /// # Errors
    /// [`ExtensionError::InitPanicked`] if `init` panics; the extension is
    /// dropped.
    pub fn register(
        &mut self,
        extension: Box<dyn Extension>,
        context: &ProxyContext,
    ) -> Result<(), ExtensionError> {
        init_isolated(extension.as_ref(), context)?;
        self.extensions.push(extension);
        Ok(())
    }

    /// Loads every module in `dir`, in file-name order.
    ///
    /// Subdirectories and files without the platform's module suffix are
    /// ignored. A missing directory loads nothing. Never fails as a whole:
    /// each module's problem is recorded in the report.
    pub fn load_all(&mut self, dir: &Path, context: &ProxyContext) -> LoadReport {
        let mut report = LoadReport::default();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "no extension directory");
                return report;
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read extension directory");
                report.failures.push((dir.to_path_buf(), ExtensionError::Io(e)));
                return report;
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_module(path))
            .collect();
        candidates.sort();

        for path in candidates {
            match self.load_one(&path, context) {
                Ok(()) => {
                    tracing::info!(module = %path.display(), "extension loaded");
                    report.loaded.push(path);
                }
                Err(e) => {
                    tracing::warn!(module = %path.display(), error = %e, "skipping extension");
                    report.failures.push((path, e));
                }
            }
        }

        report
    }

    fn load_one(&mut self, path: &Path, context: &ProxyContext) -> Result<(), ExtensionError> {
        let extension = self.opener.open(path)?;
        self.register(extension, context)
    }
}

impl Default for ExtensionLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_module(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.len() > MODULE_SUFFIX.len() && name.ends_with(MODULE_SUFFIX))
}

fn init_isolated(extension: &dyn Extension, context: &ProxyContext) -> Result<(), ExtensionError> {
    let context = context.clone();
    panic::catch_unwind(AssertUnwindSafe(|| extension.init(context)))
        .map_err(|payload| ExtensionError::InitPanicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
