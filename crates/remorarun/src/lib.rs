//! # Remorarun
//!
//! Both ends of a remoted API call: per-thread `Frontend` dispatchers on the
//! calling side, a routine-table `Backend` on the executing side, and the plugin
//! loader that lets either end pick up channels and handler tables from shared
//! modules.

pub mod backend;
pub mod frontend;
pub mod logging;
pub mod plugin;
pub mod registry;
pub mod settings;


pub use backend::Backend;
pub use backend::CallResult;
pub use backend::HandlerModule;
pub use frontend::Frontend;
pub use frontend::Stats;
pub use registry::FrontendRegistry;
pub use settings::Settings;

// Re-exported for the export macros.
pub use remorapack;
pub use remoralink;
