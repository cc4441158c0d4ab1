//! # Remoraecho
//!
//! A loadable module carrying one of each plugin kind: the `echo` handler table
//! under the default factory symbol and an in-process loopback channel under
//! `remora_create_loopback`.

use std::collections::VecDeque;
use std::sync::Mutex;

use remorarun::CallResult;
use remorarun::HandlerModule;
use remorarun::remorapack::WireBuffer;
use remorarun::remoralink::Channel;
use remorarun::remoralink::Endpoint;
use remorarun::remoralink::transport;

remorarun::export_handler!(EchoHandlers::new);
remorarun::export_channel!(LoopbackChannel::new as remora_create_loopback);

/// Called once when the `EchoHandlers` holding it is dropped.
pub type DropHook = extern "C" fn();

/// Routines: `Reverse` (u32 array back to front) and `SetDropHook` (a marshalled
/// `DropHook`).
pub struct EchoHandlers {
    on_drop: Mutex<Option<DropHook>>,
}

impl EchoHandlers {
    pub const ROUTINES: [&'static str; 2] = ["Reverse", "SetDropHook"];

    pub fn new() -> Self {
        Self { on_drop: Mutex::new(None) }
    }

    fn reverse(input: &WireBuffer) -> CallResult {
        let Ok(Some(mut items)) = input.get_all::<u32>() else {
            return CallResult::code(1);
        };
        items.reverse();
        let mut output = WireBuffer::new();
        match output.append_array(Some(&items[..])) {
            Ok(()) => CallResult::with_output(0, output),
            Err(_) => CallResult::code(1),
        }
    }

    fn set_drop_hook(&self, input: &WireBuffer) -> CallResult {
        let hook = match input.unmarshal::<()>() {
            Ok(hook) if !hook.is_null() => hook,
            _ => return CallResult::code(1),
        };
        // SAFETY: the caller marshals the address of an `extern "C" fn()` that
        // stays loaded for as long as this module.
        let hook = unsafe { std::mem::transmute::<*mut (), DropHook>(hook) };
        *self.on_drop.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(hook);
        CallResult::ok()
    }
}

impl Default for EchoHandlers {
    fn default() -> Self { Self::new() }
}

impl HandlerModule for EchoHandlers {
    fn name(&self) -> &str {
        "echo"
    }

    fn can_execute(&self, routine: &str) -> bool {
        Self::ROUTINES.contains(&routine)
    }

    fn execute(&self, routine: &str, input: &WireBuffer) -> CallResult {
        match routine {
            "Reverse" => Self::reverse(input),
            "SetDropHook" => self.set_drop_hook(input),
            _ => CallResult::not_found(),
        }
    }
}

impl Drop for EchoHandlers {
    fn drop(&mut self) {
        let hook = self.on_drop.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// A channel whose peer is itself: synced bytes come back on `read`.
pub struct LoopbackChannel {
    endpoint: Endpoint,
    connected: bool,
    staged: Vec<u8>,
    inbound: VecDeque<u8>,
}

impl LoopbackChannel {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, connected: false, staged: Vec::new(), inbound: VecDeque::new() }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Channel for LoopbackChannel {
    fn connect(&mut self) -> transport::Result<()> {
        self.connected = true;
        Ok(())
    }

    fn accept(&mut self) -> transport::Result<()> {
        self.connect()
    }

    fn read(&mut self, buf: &mut [u8]) -> transport::Result<()> {
        if !self.connected {
            return Err(transport::Error::NotConnected);
        }
        let wanted = buf.len();
        if self.inbound.len() < wanted {
            return Err(transport::Error::ConnectionLost(format!(
                "{} byte(s) wanted, {} synced",
                wanted,
                self.inbound.len()
            )));
        }
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..wanted)) {
            *slot = byte;
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> transport::Result<()> {
        if !self.connected {
            return Err(transport::Error::NotConnected);
        }
        self.staged.extend_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> transport::Result<()> {
        self.inbound.extend(self.staged.drain(..));
        Ok(())
    }

    fn name(&self) -> &str {
        "loopback"
    }
}
