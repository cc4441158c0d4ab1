//! # Backend
//!
//! The executing side. Reads requests off a channel, routes each to a handler by
//! routine name and writes the handler's result back.
//!
//! ## Philosophy
//!
//! - **Table First**: Handlers registered directly win over handler modules;
//!   modules are asked in registration order.
//! - **Unknown Is Not Fatal**: A routine nobody handles gets `ROUTINE_NOT_FOUND`
//!   and the connection keeps going.
//! - **Hang-Up Ends Cleanly**: A peer that disconnects between requests ends the
//!   serve loop without error. A disconnect mid-request is an error.

use std::collections::HashMap;
use std::fmt;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use remorapack::WireBuffer;
use remoralink::Channel;
use remoralink::TcpChannel;
use remoralink::transport;

use crate::plugin;
use crate::plugin::Plugin;

/// Exit code for a routine with no handler.
pub const ROUTINE_NOT_FOUND: i32 = -1;

/// Longest routine name accepted on the wire, terminator excluded.
pub const MAX_ROUTINE_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Transport(transport::Error),
    Buffer(remorapack::Error),
    Plugin(plugin::Error),
    /// The request header was not a routine name.
    Protocol(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Buffer(e) => write!(f, "Buffer error: {}", e),
            Self::Plugin(e) => write!(f, "Plugin error: {}", e),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self { Self::Transport(e) }
}

impl From<remorapack::Error> for Error {
    fn from(e: remorapack::Error) -> Self { Self::Buffer(e) }
}

impl From<plugin::Error> for Error {
    fn from(e: plugin::Error) -> Self { Self::Plugin(e) }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a handler hands back: the remoted API's status plus optional
/// return-by-reference data.
#[derive(Debug, Clone, Default)]
pub struct CallResult {
    pub exit_code: i32,
    pub output: Option<WireBuffer>,
}

impl CallResult {
    /// Success with no output.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn code(exit_code: i32) -> Self {
        Self { exit_code, output: None }
    }

    pub fn with_output(exit_code: i32, output: WireBuffer) -> Self {
        Self { exit_code, output: Some(output) }
    }

    pub fn not_found() -> Self {
        Self::code(ROUTINE_NOT_FOUND)
    }
}

/// Handles one routine.
pub type Handler = Box<dyn Fn(&WireBuffer) -> CallResult + Send + Sync>;

/// A table of routines shipped as one unit, usually from a plugin module.
pub trait HandlerModule: Send + Sync {
    fn name(&self) -> &str;

    fn can_execute(&self, routine: &str) -> bool;

    fn execute(&self, routine: &str, input: &WireBuffer) -> CallResult;
}

enum Module {
    Local(Box<dyn HandlerModule>),
    Loaded(Plugin<dyn HandlerModule>),
}

impl Module {
    fn get(&self) -> Option<&dyn HandlerModule> {
        match self {
            Module::Local(module) => Some(module.as_ref()),
            Module::Loaded(plugin) => match plugin.instance() {
                Ok(module) => Some(module),
                Err(_) => None,
            },
        }
    }
}

/// Routine table plus serve loop.
#[derive(Default)]
pub struct Backend {
    handlers: HashMap<String, Handler>,
    modules: Vec<Module>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `routine` to `handler`, replacing any previous handler.
    pub fn register<F>(&mut self, routine: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&WireBuffer) -> CallResult + Send + Sync + 'static,
    {
        self.handlers.insert(routine.into(), Box::new(handler));
        self
    }

    pub fn register_module(&mut self, module: Box<dyn HandlerModule>) -> &mut Self {
        tracing::info!(module = module.name(), "handler module registered");
        self.modules.push(Module::Local(module));
        self
    }

    /// Loads a handler module from a shared module exporting the default factory.
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let mut plugin = Plugin::<dyn HandlerModule>::open_default(path)?;
        let name = plugin.build(())?.name().to_string();
        tracing::info!(module = %name, path = %plugin.path().display(), "handler module loaded");
        self.modules.push(Module::Loaded(plugin));
        Ok(self)
    }

    /// Whether any handler or module accepts `routine`.
    pub fn can_execute(&self, routine: &str) -> bool {
        self.handlers.contains_key(routine)
            || self.modules.iter().filter_map(Module::get).any(|m| m.can_execute(routine))
    }

    /// Runs `routine` against `input` without any channel involved.
    pub fn dispatch(&self, routine: &str, input: &WireBuffer) -> CallResult {
        if let Some(handler) = self.handlers.get(routine) {
            return handler(input);
        }
        let module = self
            .modules
            .iter()
            .filter_map(Module::get)
            .find(|m| m.can_execute(routine));
        match module {
            Some(module) => module.execute(routine, input),
            None => {
                tracing::warn!(routine, "no handler for routine");
                CallResult::not_found()
            }
        }
    }

    /// Serves requests from one connected channel until the peer hangs up.
    ///
    /// Returns how many requests were answered.
    pub fn serve(&self, channel: &mut dyn Channel) -> Result<u64> {
        let mut input = WireBuffer::new();
        let mut served = 0;

        while let Some(routine) = read_routine(channel)? {
            input.reset_from(&mut channel.io())?;

            let started = Instant::now();
            let result = self.dispatch(&routine, &input);
            let seconds = started.elapsed().as_secs_f64();

            channel.write_value(result.exit_code)?;
            channel.write_value(seconds)?;
            match &result.output {
                Some(output) => channel.write_buffer(output)?,
                None => channel.write_value(0u64)?,
            }
            channel.sync()?;

            tracing::trace!(routine = %routine, exit_code = result.exit_code, "request served");
            served += 1;
        }

        tracing::debug!(served, transport = channel.name(), "peer hung up");
        Ok(served)
    }

    /// Accepts connections forever, serving each on its own thread.
    ///
    /// Returns only when the listener itself fails.
    pub fn listen(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().map_err(transport::Error::from)?;
        tracing::info!(%local, "backend listening");

        for stream in listener.incoming() {
            let stream = stream.map_err(transport::Error::from)?;
            let backend = Arc::clone(&self);
            thread::spawn(move || {
                let mut channel = match TcpChannel::from_stream(stream) {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::error!(error = %e, "can't set up connection");
                        return;
                    }
                };
                if let Err(e) = backend.serve(&mut channel) {
                    tracing::error!(error = %e, "connection failed");
                }
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.modules.iter().filter_map(Module::get).map(|m| m.name()).collect();
        f.debug_struct("Backend")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("modules", &names)
            .finish()
    }
}

/// Reads a NUL-terminated routine name. `None` when the peer hung up before
/// sending anything.
fn read_routine(channel: &mut dyn Channel) -> Result<Option<String>> {
    let mut name = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match channel.read(&mut byte) {
            Ok(()) => {}
            Err(transport::Error::ConnectionLost(_)) if name.is_empty() => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if byte[0] == 0 {
            break;
        }
        if name.len() == MAX_ROUTINE_LEN {
            return Err(Error::Protocol(format!("routine name longer than {} bytes", MAX_ROUTINE_LEN)));
        }
        name.push(byte[0]);
    }
    String::from_utf8(name)
        .map(Some)
        .map_err(|_| Error::Protocol("routine name is not UTF-8".into()))
}
