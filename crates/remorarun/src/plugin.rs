//! # Plugin Loader
//!
//! Instantiates capabilities (channels, handler modules) from shared modules at
//! runtime.
//!
//! ## Philosophy
//!
//! - **One Symbol Per Factory**: A factory is one exported function that takes
//!   one argument and returns an owned, boxed instance. `remora_create` unless
//!   the module says otherwise.
//! - **Module Outlives Instance**: The instance is code from the module, so it is
//!   always dropped before the module is unloaded.
//! - **Same Toolchain**: Factories use the Rust ABI. Host and module must be built
//!   by the same compiler with the same `remora*` crate versions.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use libloading::Library;

/// Factory symbol looked up when none is given.
pub const DEFAULT_SYMBOL: &str = "remora_create";

/// Plugin loading failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The module could not be opened.
    Load { path: PathBuf, reason: String },
    /// The module has no factory under the expected name.
    Symbol { symbol: String, reason: String },
    /// The instance was requested before `build`.
    NotBuilt,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { path, reason } => {
                write!(f, "Can't load module {}: {}", path.display(), reason)
            }
            Self::Symbol { symbol, reason } => {
                write!(f, "Can't resolve factory '{}': {}", symbol, reason)
            }
            Self::NotBuilt => write!(f, "Plugin instance has not been built"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A loaded module plus, once built, the instance its factory returned.
pub struct Plugin<T: ?Sized> {
    instance: Option<Box<T>>,
    library: Library,
    path: PathBuf,
    symbol: String,
}

impl<T: ?Sized> Plugin<T> {
    /// Opens `path` and checks that it exports `symbol`.
    ///
    /// On a missing symbol the module is released before returning.
    pub fn open(path: impl AsRef<Path>, symbol: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: loading runs the module's initializers. Modules are trusted
        // deployment artifacts named by configuration.
        let library = unsafe { Library::new(&path) }.map_err(|e| Error::Load {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // SAFETY: only the symbol's presence is checked here; it is not called.
        let found = unsafe { library.get::<*const ()>(symbol.as_bytes()) }.map(|_| ());
        if let Err(e) = found {
            return Err(Error::Symbol { symbol: symbol.to_string(), reason: e.to_string() });
        }

        tracing::debug!(path = %path.display(), symbol, "plugin module loaded");
        Ok(Self { instance: None, library, path, symbol: symbol.to_string() })
    }

    /// Opens `path` with the default factory symbol.
    pub fn open_default(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, DEFAULT_SYMBOL)
    }

    /// Invokes the factory with `args` and keeps the result.
    ///
    /// Building again replaces (and drops) the previous instance. The factory's
    /// argument type must match what the module was compiled with.
    pub fn build<A>(&mut self, args: A) -> Result<&mut T> {
        // SAFETY: the factory's signature is part of the module contract
        // documented on the export macros.
        let instance = unsafe {
            let factory = self
                .library
                .get::<unsafe extern "Rust" fn(A) -> Box<T>>(self.symbol.as_bytes())
                .map_err(|e| Error::Symbol { symbol: self.symbol.clone(), reason: e.to_string() })?;
            factory(args)
        };
        Ok(self.instance.insert(instance))
    }

    pub fn instance(&self) -> Result<&T> {
        self.instance.as_deref().ok_or(Error::NotBuilt)
    }

    pub fn instance_mut(&mut self) -> Result<&mut T> {
        self.instance.as_deref_mut().ok_or(Error::NotBuilt)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: ?Sized> Drop for Plugin<T> {
    fn drop(&mut self) {
        // The library field is dropped after this body, so the instance goes first.
        drop(self.instance.take());
        tracing::debug!(path = %self.path.display(), "plugin module released");
    }
}

impl<T: ?Sized> fmt::Debug for Plugin<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("path", &self.path)
            .field("symbol", &self.symbol)
            .field("built", &self.instance.is_some())
            .finish()
    }
}

/// Exports a channel factory from a plugin crate.
///
/// The constructor takes the resolved endpoint by value and returns a type
/// implementing `Channel`.
///
/// ```ignore
/// remorarun::export_channel!(MyChannel::from_endpoint_owned);
/// ```
///
/// `as name` exports under another symbol, for modules that carry more than one
/// factory.
#[macro_export]
macro_rules! export_channel {
    ($constructor:path) => {
        $crate::export_channel!($constructor as remora_create);
    };
    ($constructor:path as $symbol:ident) => {
        #[unsafe(no_mangle)]
        pub fn $symbol(
            endpoint: $crate::remoralink::Endpoint,
        ) -> ::std::boxed::Box<dyn $crate::remoralink::Channel> {
            ::std::boxed::Box::new($constructor(endpoint))
        }
    };
}

/// Exports a handler module factory from a plugin crate.
///
/// The constructor takes no arguments and returns a type implementing
/// `HandlerModule`.
///
/// ```ignore
/// remorarun::export_handler!(CudartHandlers::new);
/// ```
#[macro_export]
macro_rules! export_handler {
    ($constructor:path) => {
        $crate::export_handler!($constructor as remora_create);
    };
    ($constructor:path as $symbol:ident) => {
        #[unsafe(no_mangle)]
        pub fn $symbol(_: ()) -> ::std::boxed::Box<dyn $crate::backend::HandlerModule> {
            ::std::boxed::Box::new($constructor())
        }
    };
}
