//! Loading a real module: the `remoraecho` cdylib, built as a dev-dependency of
//! this crate.

use std::env::consts::DLL_PREFIX;
use std::env::consts::DLL_SUFFIX;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use anyhow::Result;
use remorapack::WireBuffer;
use remoralink::Channel;
use remoralink::Endpoint;
use remorarun::Backend;
use remorarun::HandlerModule;
use remorarun::plugin;
use remorarun::plugin::Plugin;

const MODULE: &str = "remoraecho";

/// Test binaries and dependency artifacts share `target/<profile>/deps`.
fn echo_module() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let exact = format!("{DLL_PREFIX}{MODULE}{DLL_SUFFIX}");
    let hashed = format!("{DLL_PREFIX}{MODULE}-");

    for dir in exe.ancestors().skip(1).take(2) {
        let candidate = dir.join(&exact);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if let Some(found) = find_hashed(dir, &hashed) {
            return Ok(found);
        }
    }
    anyhow::bail!("{} was not built next to {}", exact, exe.display())
}

fn find_hashed(dir: &Path, prefix: &str) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix) && name.ends_with(DLL_SUFFIX))
        })
}

// ============================================================================
//  HANDLER MODULES
// ============================================================================

#[test]
fn loaded_handlers_dispatch_like_local_ones() -> Result<()> {
    let mut backend = Backend::new();
    backend.load_module(echo_module()?)?;
    assert!(backend.can_execute("Reverse"));
    assert!(!backend.can_execute("cudaMalloc"));

    let mut input = WireBuffer::new();
    input.append_array(Some(&[1u32, 2, 3, 4][..]))?;
    let result = backend.dispatch("Reverse", &input);
    assert_eq!(result.exit_code, 0);
    let output = result.output.ok_or_else(|| anyhow::anyhow!("no output"))?;
    assert_eq!(output.get_all::<u32>()?, Some(vec![4, 3, 2, 1]));
    Ok(())
}

static DROPS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn count_drop() {
    DROPS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn instance_is_dropped_while_its_module_is_loaded() -> Result<()> {
    let mut backend = Backend::new();
    backend.load_module(echo_module()?)?;

    let mut input = WireBuffer::new();
    input.append_marshal(count_drop as extern "C" fn() as *const ())?;
    assert_eq!(backend.dispatch("SetDropHook", &input).exit_code, 0);
    assert_eq!(DROPS.load(Ordering::SeqCst), 0);

    // The hook runs from the module's own Drop impl, so it can only fire if
    // the instance goes before the library.
    drop(backend);
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn plugin_is_empty_until_built() -> Result<()> {
    let path = echo_module()?;
    let mut plugin = Plugin::<dyn HandlerModule>::open_default(&path)?;
    assert_eq!(plugin.path(), path.as_path());
    assert!(matches!(plugin.instance(), Err(plugin::Error::NotBuilt)));

    assert_eq!(plugin.build(())?.name(), "echo");
    assert!(plugin.instance()?.can_execute("SetDropHook"));
    assert_eq!(plugin.instance_mut()?.name(), "echo");
    Ok(())
}

#[test]
fn unknown_symbol_in_real_module() -> Result<()> {
    let err = Plugin::<dyn Channel>::open(echo_module()?, "remora_create_nothing").unwrap_err();
    assert!(matches!(err, plugin::Error::Symbol { ref symbol, .. } if symbol == "remora_create_nothing"));
    Ok(())
}

// ============================================================================
//  CHANNEL MODULES
// ============================================================================

#[test]
fn channel_factory_under_its_own_symbol() -> Result<()> {
    let mut plugin = Plugin::<dyn Channel>::open(echo_module()?, "remora_create_loopback")?;
    let channel = plugin.build(Endpoint::stream("127.0.0.1", 9999))?;
    assert_eq!(channel.name(), "loopback");

    channel.connect()?;
    channel.write_value(0x5eed_u64)?;
    channel.sync()?;
    assert_eq!(channel.read_value::<u64>()?, 0x5eed);
    Ok(())
}
