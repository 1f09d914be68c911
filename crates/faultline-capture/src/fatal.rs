//! Fatal-signal capture: platform registration and the signal-context path
//!
//! The handler installed here runs while the process may be arbitrarily
//! corrupted: the heap allocator, mutexes, and most library code are off
//! limits. Everything the handler needs is therefore pre-arranged at arm
//! time in a [`FatalSlot`] of fixed-size buffers: the artifact path as a
//! NUL-terminated C string and a pre-rendered JSON descriptor split around
//! the one value only known at fault time, the signal number.
//!
//! Inside the handler the only calls made are `open`, `write`, `close` and
//! `raise`, all async-signal-safe. Handlers are registered with
//! `SA_RESETHAND` so the default disposition is restored before the handler
//! body runs; re-raising the signal afterwards terminates the process with
//! the exact exit status, core dump, and supervisor semantics it would have
//! had without instrumentation. The reset also makes the handler single
//! shot: if the capture write itself faults, the second signal falls
//! through to the OS default instead of re-entering.

use std::cell::UnsafeCell;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use faultline_core::CaptureContext;
use tracing::{debug, warn};

/// Maximum artifact path length, including the trailing NUL.
const SLOT_PATH_MAX: usize = 512;
/// Maximum pre-rendered JSON prefix length.
const SLOT_PREFIX_MAX: usize = 2048;
/// Maximum JSON suffix length.
const SLOT_SUFFIX_MAX: usize = 16;

// ---------------------------------------------------------------------------
// FatalSlot: what arm-time prepares for the handler
// ---------------------------------------------------------------------------

/// Pre-rendered fatal capture data, built outside signal context
///
/// The on-disk artifact is `prefix + <signal number> + suffix`, which forms
/// a flat JSON object carrying the capture context and the numeric signal
/// code.
#[derive(Debug, Clone)]
pub struct FatalSlot {
    path_c: Vec<u8>,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl FatalSlot {
    /// Renders the slot for an artifact at `path` carrying `context`.
    ///
    /// Fails if any piece exceeds the fixed handler buffers; the caller
    /// should treat that as a configuration error and leave capture
    /// disarmed.
    pub fn prepare(path: &Path, context: &CaptureContext) -> Result<Self> {
        let path_str = path
            .to_str()
            .with_context(|| format!("Artifact path is not valid UTF-8: {}", path.display()))?;

        let mut path_c = path_str.as_bytes().to_vec();
        path_c.push(0);
        if path_c.len() > SLOT_PATH_MAX {
            bail!("Artifact path exceeds {} bytes: {}", SLOT_PATH_MAX, path_str);
        }

        // `{"release":...,"armed_at":...}` becomes
        // `{"release":...,"armed_at":...,"signal":` + NNN + `}\n`
        let rendered =
            serde_json::to_string(context).context("Failed to render capture context")?;
        let mut prefix = rendered.into_bytes();
        prefix.pop();
        prefix.extend_from_slice(b",\"signal\":");
        if prefix.len() > SLOT_PREFIX_MAX {
            bail!("Rendered capture context exceeds {} bytes", SLOT_PREFIX_MAX);
        }

        Ok(Self {
            path_c,
            prefix,
            suffix: b"}\n".to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Static handler state
// ---------------------------------------------------------------------------

/// Fixed-layout buffers the handler reads. Written only while handlers are
/// not installed; published via `SLOT_READY` with release ordering.
struct SlotBuffers {
    path: [u8; SLOT_PATH_MAX],
    prefix: [u8; SLOT_PREFIX_MAX],
    prefix_len: usize,
    suffix: [u8; SLOT_SUFFIX_MAX],
    suffix_len: usize,
}

impl SlotBuffers {
    const fn empty() -> Self {
        Self {
            path: [0; SLOT_PATH_MAX],
            prefix: [0; SLOT_PREFIX_MAX],
            prefix_len: 0,
            suffix: [0; SLOT_SUFFIX_MAX],
            suffix_len: 0,
        }
    }

    fn fill(&mut self, slot: &FatalSlot) {
        self.path = [0; SLOT_PATH_MAX];
        self.path[..slot.path_c.len()].copy_from_slice(&slot.path_c);
        self.prefix[..slot.prefix.len()].copy_from_slice(&slot.prefix);
        self.prefix_len = slot.prefix.len();
        self.suffix[..slot.suffix.len()].copy_from_slice(&slot.suffix);
        self.suffix_len = slot.suffix.len();
    }
}

struct SlotCell(UnsafeCell<SlotBuffers>);

// The cell is written only while SLOT_READY is false and no handlers are
// installed; the handler only reads it after an acquire load of SLOT_READY.
unsafe impl Sync for SlotCell {}

static SLOT: SlotCell = SlotCell(UnsafeCell::new(SlotBuffers::empty()));
static SLOT_READY: AtomicBool = AtomicBool::new(false);

/// Formats a non-negative i32 into `buf` as ASCII digits, returning the
/// length. Pure stack code, usable from signal context.
fn format_signal_code(value: i32, buf: &mut [u8; 12]) -> usize {
    let mut v = if value < 0 { 0 } else { value as u32 };
    let mut digits = [0u8; 12];
    let mut n = 0;
    loop {
        digits[n] = b'0' + (v % 10) as u8;
        v /= 10;
        n += 1;
        if v == 0 {
            break;
        }
    }
    for i in 0..n {
        buf[i] = digits[n - 1 - i];
    }
    n
}

/// Writes the fatal record for `signo` using only async-signal-safe calls.
///
/// Shared between the real signal handler and tests.
#[cfg(unix)]
fn write_fatal_record(slot: &SlotBuffers, signo: i32) {
    unsafe {
        let fd = libc::open(
            slot.path.as_ptr().cast(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            0o600,
        );
        if fd < 0 {
            return;
        }
        let _ = libc::write(fd, slot.prefix.as_ptr().cast(), slot.prefix_len);
        let mut digits = [0u8; 12];
        let len = format_signal_code(signo, &mut digits);
        let _ = libc::write(fd, digits.as_ptr().cast(), len);
        let _ = libc::write(fd, slot.suffix.as_ptr().cast(), slot.suffix_len);
        libc::close(fd);
    }
}

#[cfg(unix)]
extern "C" fn on_fatal_signal(signo: libc::c_int) {
    if SLOT_READY.load(Ordering::Acquire) {
        let slot = unsafe { &*SLOT.0.get() };
        write_fatal_record(slot, signo);
    }
    // SA_RESETHAND restored the default disposition before this handler
    // ran; re-raising hands the signal back to the OS so termination, exit
    // status and core dumps match an uninstrumented process.
    unsafe {
        libc::raise(signo);
    }
}

// ---------------------------------------------------------------------------
// FatalHooks capability seam
// ---------------------------------------------------------------------------

/// Platform capability for fatal-signal registration
///
/// The policy layer (slot contents, restore-and-reraise) is platform
/// independent; implementations only differ in how handlers are registered.
/// At most one armed instance may exist per process: the handler state is
/// process-global.
pub trait FatalHooks: Send + Sync {
    /// Publishes `slot` and installs single-shot handlers for the fatal
    /// signals (SIGSEGV, SIGABRT, SIGFPE, SIGILL).
    fn install(&self, slot: &FatalSlot) -> Result<()>;

    /// Removes the handlers, restoring default dispositions. Safe to call
    /// when never installed.
    fn uninstall(&self);
}

/// Signals treated as fatal crashes.
#[cfg(unix)]
const FATAL_SIGNALS: [libc::c_int; 4] =
    [libc::SIGSEGV, libc::SIGABRT, libc::SIGFPE, libc::SIGILL];

/// `sigaction`-based registration for POSIX platforms.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct PosixFatalHooks;

#[cfg(unix)]
impl FatalHooks for PosixFatalHooks {
    fn install(&self, slot: &FatalSlot) -> Result<()> {
        // Unpublish first so a signal arriving mid-update re-raises without
        // reading half-written buffers.
        SLOT_READY.store(false, Ordering::Release);
        unsafe {
            (*SLOT.0.get()).fill(slot);
        }
        SLOT_READY.store(true, Ordering::Release);

        for sig in FATAL_SIGNALS {
            let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
            sa.sa_sigaction = on_fatal_signal as extern "C" fn(libc::c_int) as usize;
            sa.sa_flags = libc::SA_RESETHAND;
            unsafe {
                libc::sigemptyset(&mut sa.sa_mask);
                if libc::sigaction(sig, &sa, std::ptr::null_mut()) != 0 {
                    let err = std::io::Error::last_os_error();
                    SLOT_READY.store(false, Ordering::Release);
                    return Err(err).with_context(|| format!("sigaction failed for signal {sig}"));
                }
            }
        }

        debug!("Fatal signal handlers installed");
        Ok(())
    }

    fn uninstall(&self) {
        for sig in FATAL_SIGNALS {
            unsafe {
                libc::signal(sig, libc::SIG_DFL);
            }
        }
        SLOT_READY.store(false, Ordering::Release);
        debug!("Fatal signal handlers removed");
    }
}

/// Fallback for platforms without POSIX signals in the dependency set.
/// Capture of non-fatal events still works; fatal capture is inert.
#[derive(Debug, Default)]
pub struct NoopFatalHooks;

impl FatalHooks for NoopFatalHooks {
    fn install(&self, _slot: &FatalSlot) -> Result<()> {
        warn!("Fatal-signal capture is not supported on this platform");
        Ok(())
    }

    fn uninstall(&self) {}
}

/// Returns the fatal-hook implementation for the current platform.
pub fn platform_hooks() -> Box<dyn FatalHooks> {
    #[cfg(unix)]
    {
        Box::new(PosixFatalHooks)
    }
    #[cfg(not(unix))]
    {
        Box::new(NoopFatalHooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::ArtifactId;

    fn test_context() -> CaptureContext {
        CaptureContext::new("1.0.0", "-dev")
    }

    #[test]
    fn test_format_signal_code() {
        let mut buf = [0u8; 12];
        let len = format_signal_code(0, &mut buf);
        assert_eq!(&buf[..len], b"0");
        let len = format_signal_code(11, &mut buf);
        assert_eq!(&buf[..len], b"11");
        let len = format_signal_code(6, &mut buf);
        assert_eq!(&buf[..len], b"6");
        let len = format_signal_code(2147483647, &mut buf);
        assert_eq!(&buf[..len], b"2147483647");
    }

    #[test]
    fn test_prepare_renders_json_fragments() {
        let id = ArtifactId::generate();
        let path = std::env::temp_dir().join(id.file_name());
        let slot = FatalSlot::prepare(&path, &test_context()).unwrap();

        assert_eq!(slot.path_c.last(), Some(&0));
        assert!(slot.prefix.ends_with(b",\"signal\":"));
        assert_eq!(slot.suffix, b"}\n");

        // Prefix + a signal number + suffix must be a valid JSON object.
        let mut full = slot.prefix.clone();
        full.extend_from_slice(b"11");
        full.extend_from_slice(&slot.suffix);
        let value: serde_json::Value = serde_json::from_slice(&full).unwrap();
        assert_eq!(value["signal"], 11);
        assert_eq!(value["release"], "1.0.0-dev");
    }

    #[test]
    fn test_prepare_rejects_oversized_path() {
        let long = "x".repeat(SLOT_PATH_MAX);
        let path = std::env::temp_dir().join(long);
        assert!(FatalSlot::prepare(&path, &test_context()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_fatal_record_produces_parsable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fatal-test.dmp");
        let slot = FatalSlot::prepare(&path, &test_context()).unwrap();

        let mut buffers = SlotBuffers::empty();
        buffers.fill(&slot);
        write_fatal_record(&buffers, libc::SIGSEGV);

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["signal"], libc::SIGSEGV);
        assert_eq!(value["environment"], "development");
    }
}
