//! # Frontend
//!
//! The calling side of a remoted API. One `Frontend` per calling thread owns a
//! channel to the backend, three buffers and the usage statistics for every call
//! it has made.
//!
//! ## Philosophy
//!
//! - **One Call In Flight**: `execute` writes the whole request, syncs, then blocks
//!   for the whole response. There is no pipelining and no timeout.
//! - **Exit Codes Are Data**: A nonzero code from the backend is the remoted API's
//!   own error and comes back as `Ok(code)`. Only framework failures are `Err`.
//! - **Reusable After Failure**: A failed call leaves the buffers intact; `prepare`
//!   starts the next one clean.
//!
//! ## Wire Format
//!
//! - **Request**: `[routine][0x00][u64 length][input bytes]`
//! - **Response**: `[i32 exit code][f64 seconds][u64 length][output bytes]`

use std::fmt;
use std::path::Path;
use std::time::Duration;
use std::time::Instant;

use remorapack::WireBuffer;
use remoralink::Channel;
use remoralink::ChannelRegistry;
use remoralink::Config;
use remoralink::Endpoint;
use remoralink::EndpointCursor;
use remoralink::endpoint;
use remoralink::transport;

use crate::plugin;
use crate::plugin::Plugin;
use crate::settings::Settings;

/// Exit code reported before any call has completed.
pub const NO_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The dispatcher was used outside an active registry.
    NotInitialized,
    /// A routine name can't travel in a NUL-terminated request.
    InvalidRoutine(String),
    Config(endpoint::Error),
    Transport(transport::Error),
    Buffer(remorapack::Error),
    Plugin(plugin::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "Frontend registry is not initialized"),
            Self::InvalidRoutine(name) => write!(f, "Invalid routine name {:?}", name),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Buffer(e) => write!(f, "Buffer error: {}", e),
            Self::Plugin(e) => write!(f, "Plugin error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<endpoint::Error> for Error {
    fn from(e: endpoint::Error) -> Self { Self::Config(e) }
}

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

// ============================================================================
//  STATISTICS
// ============================================================================

/// Cumulative usage counters for one or more dispatchers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    pub routines_executed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Time spent writing requests, sync included.
    pub sending_time: Duration,
    /// Time spent reading response payloads.
    pub receiving_time: Duration,
    /// Execution time as measured by the backend.
    pub execution_time: Duration,
}

impl Stats {
    /// Folds `other` into `self`.
    pub fn merge(&mut self, other: &Stats) {
        self.routines_executed += other.routines_executed;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.sending_time += other.sending_time;
        self.receiving_time += other.receiving_time;
        self.execution_time += other.execution_time;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MIB: f64 = 1024.0 * 1024.0;
        writeln!(
            f,
            "[REMORA_STATS] Executed {} routine(s) in {:.3} second(s)",
            self.routines_executed,
            self.execution_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "[REMORA_STATS] Sent {:.3} MiB in {:.3} second(s)",
            self.bytes_sent as f64 / MIB,
            self.sending_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "[REMORA_STATS] Received {:.3} MiB in {:.3} second(s)",
            self.bytes_received as f64 / MIB,
            self.receiving_time.as_secs_f64()
        )
    }
}

// ============================================================================
//  FRONTEND
// ============================================================================

/// Where the channel came from. A plugin channel keeps its module loaded.
enum ChannelHandle {
    Builtin(Box<dyn Channel>),
    Plugin(Plugin<dyn Channel>),
}

impl ChannelHandle {
    fn get(&mut self) -> Result<&mut dyn Channel> {
        let channel: &mut dyn Channel = match self {
            Self::Builtin(channel) => &mut **channel,
            Self::Plugin(plugin) => plugin.instance_mut()?,
        };
        Ok(channel)
    }

    fn name(&self) -> &str {
        match self {
            Self::Builtin(channel) => channel.name(),
            Self::Plugin(plugin) => plugin.instance().map(|c| c.name()).unwrap_or("plugin"),
        }
    }
}

/// Per-thread call dispatcher.
pub struct Frontend {
    channel: ChannelHandle,
    input: WireBuffer,
    output: WireBuffer,
    launch: WireBuffer,
    exit_code: i32,
    stats: Stats,
}

impl Frontend {
    /// Resolves the next configured suite, builds its channel and connects.
    pub fn connect(settings: &Settings, cursor: &EndpointCursor) -> Result<Self> {
        let config = Config::load(&settings.config_path)?;
        let endpoint = cursor.next(&config)?;
        Self::open(&endpoint, &ChannelRegistry::with_defaults())
    }

    /// Builds and connects the channel for an already resolved endpoint.
    ///
    /// A suite that names a plugin module gets its channel from that module;
    /// otherwise `channels` supplies it.
    pub fn open(endpoint: &Endpoint, channels: &ChannelRegistry) -> Result<Self> {
        let mut channel = match &endpoint.plugin {
            Some(path) => ChannelHandle::Plugin(Self::load_channel(path, endpoint)?),
            None => ChannelHandle::Builtin(channels.create(endpoint)?),
        };
        channel.get()?.connect()?;
        tracing::info!(%endpoint, transport = channel.name(), "frontend connected");
        Ok(Self::from_handle(channel))
    }

    /// Wraps a channel that is already connected.
    pub fn with_channel(channel: Box<dyn Channel>) -> Self {
        Self::from_handle(ChannelHandle::Builtin(channel))
    }

    fn load_channel(path: &Path, endpoint: &Endpoint) -> Result<Plugin<dyn Channel>> {
        let mut plugin = Plugin::<dyn Channel>::open_default(path)?;
        plugin.build(endpoint.clone())?;
        Ok(plugin)
    }

    fn from_handle(channel: ChannelHandle) -> Self {
        Self {
            channel,
            input: WireBuffer::new(),
            output: WireBuffer::new(),
            launch: WireBuffer::new(),
            exit_code: NO_EXIT_CODE,
            stats: Stats::default(),
        }
    }

    /// Clears the input buffer for a new call.
    pub fn prepare(&mut self) {
        self.input.reset();
    }

    /// Sends `routine` with `input` (or the frontend's own input buffer) and
    /// waits for the backend's answer.
    ///
    /// Returns the remote exit code. The output buffer holds the result payload.
    pub fn execute(&mut self, routine: &str, input: Option<&WireBuffer>) -> Result<i32> {
        if routine.as_bytes().contains(&0) {
            return Err(Error::InvalidRoutine(routine.to_string()));
        }
        let input = input.unwrap_or(&self.input);
        let channel = self.channel.get()?;

        let started = Instant::now();
        channel.write(routine.as_bytes())?;
        channel.write(&[0])?;
        channel.write_buffer(input)?;
        channel.sync()?;
        self.stats.routines_executed += 1;
        self.stats.bytes_sent += input.len() as u64;
        self.stats.sending_time += started.elapsed();

        self.output.reset();
        let exit_code: i32 = channel.read_value()?;
        let seconds: f64 = channel.read_value()?;
        self.exit_code = exit_code;
        self.stats.execution_time += Duration::try_from_secs_f64(seconds).unwrap_or_default();

        let started = Instant::now();
        let size: u64 = channel.read_value()?;
        if size > 0 {
            self.output.read_from(&mut channel.io(), size as usize)?;
        }
        self.stats.bytes_received += size;
        self.stats.receiving_time += started.elapsed();

        tracing::trace!(routine, exit_code, output = size, "routine executed");
        Ok(exit_code)
    }

    /// Result payload of the last call.
    pub fn output(&self) -> &WireBuffer {
        &self.output
    }

    pub fn input(&self) -> &WireBuffer {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut WireBuffer {
        &mut self.input
    }

    /// Staging buffer for deferred launch arguments.
    pub fn launch_mut(&mut self) -> &mut WireBuffer {
        &mut self.launch
    }

    /// Exit code of the last completed call, `NO_EXIT_CODE` before the first.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn transport(&self) -> &str {
        self.channel.name()
    }
}

impl fmt::Debug for Frontend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frontend")
            .field("transport", &self.channel.name())
            .field("exit_code", &self.exit_code)
            .field("stats", &self.stats)
            .finish()
    }
}
