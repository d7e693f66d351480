//! macOS FSEvents FFI wrapper.
//!
//! Each watched path gets its own FSEvents stream scheduled on a dedicated
//! run-loop thread. Events are delivered one at a time as `(path, flags)`
//! with the raw FSEvents flag bits.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation_sys::array::{CFArrayCreate, CFArrayRef};
use core_foundation_sys::base::{kCFAllocatorDefault, CFIndex, CFRelease, CFRetain, CFTypeRef};
use core_foundation_sys::runloop::{
    kCFRunLoopDefaultMode, CFRunLoopGetCurrent, CFRunLoopRef, CFRunLoopRun, CFRunLoopStop,
};
use core_foundation_sys::string::{kCFStringEncodingUTF8, CFStringCreateWithBytes, CFStringRef};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, WatchError};
use crate::native::{NativeWatcher, RawEventCallback};
use crate::options::WatchOptions;

// ---------------------------------------------------------------------------
// FSEvents C types and constants
// ---------------------------------------------------------------------------

type FSEventStreamRef = *mut c_void;
type FSEventStreamEventId = u64;

#[repr(C)]
struct FSEventStreamContext {
    version: CFIndex,
    info: *mut c_void,
    retain: Option<extern "C" fn(*const c_void) -> *const c_void>,
    release: Option<extern "C" fn(*const c_void)>,
    copy_description: Option<extern "C" fn(*const c_void) -> CFStringRef>,
}

type FSEventStreamCallback = extern "C" fn(
    stream_ref: FSEventStreamRef,
    client_callback_info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const u32,
    event_ids: *const FSEventStreamEventId,
);

const K_FS_EVENT_STREAM_EVENT_ID_SINCE_NOW: FSEventStreamEventId = u64::MAX;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(5);

const K_FS_EVENT_STREAM_CREATE_FLAG_NO_DEFER: u32 = 0x02;
const K_FS_EVENT_STREAM_CREATE_FLAG_WATCH_ROOT: u32 = 0x04;
const K_FS_EVENT_STREAM_CREATE_FLAG_FILE_EVENTS: u32 = 0x10;

#[link(name = "CoreServices", kind = "framework")]
extern "C" {
    fn FSEventStreamCreate(
        allocator: *const c_void,
        callback: FSEventStreamCallback,
        context: *mut FSEventStreamContext,
        paths_to_watch: CFArrayRef,
        since_when: FSEventStreamEventId,
        latency: f64,
        flags: u32,
    ) -> FSEventStreamRef;

    fn FSEventStreamScheduleWithRunLoop(
        stream: FSEventStreamRef,
        run_loop: CFRunLoopRef,
        run_loop_mode: CFStringRef,
    );

    fn FSEventStreamStart(stream: FSEventStreamRef) -> bool;
    fn FSEventStreamStop(stream: FSEventStreamRef);
    fn FSEventStreamInvalidate(stream: FSEventStreamRef);
    fn FSEventStreamRelease(stream: FSEventStreamRef);
}

/// A retained `CFRunLoopRef` that is `Send` + `Sync`.
///
/// Safety: `CFRunLoopStop` is documented as thread-safe: it may be called
/// from any thread to stop a run loop running on another thread. The
/// stream thread retains the run loop before publishing it, so the pointer
/// outlives the thread; [`FsEventStream`] releases it on drop.
#[derive(Clone, Copy)]
struct SendableRunLoop(CFRunLoopRef);
unsafe impl Send for SendableRunLoop {}
unsafe impl Sync for SendableRunLoop {}

/// Outcome the stream thread publishes once it has started or given up.
enum Startup {
    Pending,
    Running(SendableRunLoop),
    Failed,
}

// ---------------------------------------------------------------------------
// RAII stream
// ---------------------------------------------------------------------------

/// A running FSEvents stream for one path.
///
/// Dropping it stops the stream and joins its thread, so it must not be
/// dropped from inside its own event callback.
pub struct FsEventStream {
    path: String,
    run_loop: SendableRunLoop,
    thread: Option<JoinHandle<()>>,
}

impl FsEventStream {
    /// Starts a stream on `path`. Returns `None` when FSEvents refuses it.
    pub fn start(
        path: &str,
        since_event_id: Option<u64>,
        latency: f64,
        callback: RawEventCallback,
    ) -> Option<Self> {
        let path_string = path.to_string();
        let since_when = since_event_id.unwrap_or(K_FS_EVENT_STREAM_EVENT_ID_SINCE_NOW);
        let startup = Arc::new((Mutex::new(Startup::Pending), Condvar::new()));
        let thread_startup = Arc::clone(&startup);

        let spawned = thread::Builder::new()
            .name("vfs-watch-fsevents".to_string())
            .spawn(move || {
                // Safety: all FFI calls below follow the documented CoreServices API contract.
                unsafe {
                    run_stream(&path_string, since_when, latency, callback, &thread_startup);
                }
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(error) => {
                tracing::warn!("failed to spawn FSEvents thread for {}: {}", path, error);
                return None;
            }
        };

        let run_loop = {
            let (lock, cvar) = &*startup;
            let mut state = lock.lock();
            while matches!(*state, Startup::Pending) {
                cvar.wait(&mut state);
            }
            match *state {
                Startup::Running(run_loop) => Some(run_loop),
                _ => None,
            }
        };

        match run_loop {
            Some(run_loop) => Some(Self {
                path: path.to_string(),
                run_loop,
                thread: Some(thread),
            }),
            None => {
                let _ = thread.join();
                None
            }
        }
    }

    /// Stops the run loop and waits for the stream to be torn down.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_thread()
    }

    fn stop_thread(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The run loop may not have entered CFRunLoopRun yet, in which case a
        // single stop is lost. The retained run loop stays valid after the
        // thread exits.
        while !thread.is_finished() {
            unsafe {
                CFRunLoopStop(self.run_loop.0);
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
        thread.join().map_err(|_| {
            WatchError::Internal(format!("FSEvents thread for {} panicked", self.path))
        })
    }
}

impl Drop for FsEventStream {
    fn drop(&mut self) {
        if let Err(error) = self.stop_thread() {
            tracing::warn!("{}", error);
        }
        unsafe {
            CFRelease(self.run_loop.0 as CFTypeRef);
        }
    }
}

/// Body of the stream thread. Publishes the startup outcome, then runs the
/// run loop until it is stopped.
unsafe fn run_stream(
    path: &str,
    since_when: FSEventStreamEventId,
    latency: f64,
    callback: RawEventCallback,
    startup: &(Mutex<Startup>, Condvar),
) {
    let publish = |outcome: Startup| {
        let (lock, cvar) = startup;
        *lock.lock() = outcome;
        cvar.notify_all();
    };

    let cf_path = str_to_cfstring(path);
    let path_array = CFArrayCreate(
        kCFAllocatorDefault,
        &cf_path as *const _ as *const *const c_void,
        1,
        ptr::null(),
    );

    let callback_ptr = Box::into_raw(Box::new(callback)) as *mut c_void;
    let mut context = FSEventStreamContext {
        version: 0,
        info: callback_ptr,
        retain: None,
        release: None,
        copy_description: None,
    };

    let flags = K_FS_EVENT_STREAM_CREATE_FLAG_NO_DEFER
        | K_FS_EVENT_STREAM_CREATE_FLAG_FILE_EVENTS
        | K_FS_EVENT_STREAM_CREATE_FLAG_WATCH_ROOT;

    let stream = FSEventStreamCreate(
        kCFAllocatorDefault,
        fsevent_callback,
        &mut context,
        path_array,
        since_when,
        latency,
        flags,
    );

    if stream.is_null() {
        publish(Startup::Failed);
    } else {
        let current_run_loop = CFRunLoopGetCurrent();
        FSEventStreamScheduleWithRunLoop(stream, current_run_loop, kCFRunLoopDefaultMode);

        if FSEventStreamStart(stream) {
            CFRetain(current_run_loop as CFTypeRef);
            publish(Startup::Running(SendableRunLoop(current_run_loop)));
            CFRunLoopRun();
            FSEventStreamStop(stream);
        } else {
            publish(Startup::Failed);
        }

        FSEventStreamInvalidate(stream);
        FSEventStreamRelease(stream);
    }

    CFRelease(path_array as *const c_void);
    CFRelease(cf_path as *const c_void);
    drop(Box::from_raw(callback_ptr as *mut RawEventCallback));
}

// ---------------------------------------------------------------------------
// FFI callback
// ---------------------------------------------------------------------------

extern "C" fn fsevent_callback(
    _stream_ref: FSEventStreamRef,
    client_callback_info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const u32,
    _event_ids: *const FSEventStreamEventId,
) {
    unsafe {
        let callback = &*(client_callback_info as *const RawEventCallback);
        let paths_ptr = event_paths as *const *const c_char;
        for i in 0..num_events {
            let c_path = *paths_ptr.add(i);
            let path = CStr::from_ptr(c_path).to_string_lossy();
            callback(&*path, *event_flags.add(i));
        }
    }
}

unsafe fn str_to_cfstring(s: &str) -> CFStringRef {
    CFStringCreateWithBytes(
        kCFAllocatorDefault,
        s.as_ptr(),
        s.len() as CFIndex,
        kCFStringEncodingUTF8,
        false as u8,
    )
}

// ---------------------------------------------------------------------------
// Native source
// ---------------------------------------------------------------------------

/// [`NativeWatcher`] backed by FSEvents.
#[derive(Debug, Clone)]
pub struct FsEventsSource {
    latency: f64,
    since_event_id: Option<u64>,
}

impl FsEventsSource {
    pub fn new(options: &WatchOptions) -> Self {
        Self {
            latency: options.latency_secs,
            since_event_id: options.since_event_id,
        }
    }
}

impl Default for FsEventsSource {
    fn default() -> Self {
        Self::new(&WatchOptions::default())
    }
}

impl NativeWatcher for FsEventsSource {
    type Handle = FsEventStream;

    fn start(&self, path: &str, callback: RawEventCallback) -> Option<FsEventStream> {
        FsEventStream::start(path, self.since_event_id, self.latency, callback)
    }

    fn stop(&self, handle: FsEventStream) -> Result<()> {
        handle.shutdown()
    }
}
