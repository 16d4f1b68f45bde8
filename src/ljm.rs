use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int};

use anyhow::{anyhow, Context, Result};
use libloading::Library;
use log::{info, warn};
use once_cell::sync::OnceCell;

use crate::drivers::{AcquisitionError, StreamSource};
use crate::types::RawBlock;

const LJME_NOERROR: c_int = 0;
const LJME_WARNINGS_BEGIN: c_int = 200;
const LJME_WARNINGS_END: c_int = 399;
const LJM_GND: f64 = 199.0;
const LJM_MAX_NAME_SIZE: usize = 256;
/// T7 `CORE_TIMER` runs at half the 80 MHz core clock.
pub const CORE_TIMER_HZ: f64 = 40_000_000.0;

#[cfg(target_os = "windows")]
const LIBRARY_NAMES: &[&str] = &["LabJackM.dll"];
#[cfg(target_os = "macos")]
const LIBRARY_NAMES: &[&str] = &["libLabJackM.dylib", "/usr/local/lib/libLabJackM.dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const LIBRARY_NAMES: &[&str] = &["libLabJackM.so", "/usr/local/lib/libLabJackM.so"];

struct LjmApi {
    #[allow(dead_code)]
    lib: Library,
    open_s: unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, *mut c_int) -> c_int,
    close: unsafe extern "C" fn(c_int) -> c_int,
    get_handle_info: unsafe extern "C" fn(
        c_int,
        *mut c_int,
        *mut c_int,
        *mut c_int,
        *mut c_int,
        *mut c_int,
        *mut c_int,
    ) -> c_int,
    e_write_name: unsafe extern "C" fn(c_int, *const c_char, c_double) -> c_int,
    e_read_name: unsafe extern "C" fn(c_int, *const c_char, *mut c_double) -> c_int,
    names_to_addresses:
        unsafe extern "C" fn(c_int, *const *const c_char, *mut c_int, *mut c_int) -> c_int,
    stream_start: unsafe extern "C" fn(c_int, c_int, c_int, *const c_int, *mut c_double) -> c_int,
    stream_read: unsafe extern "C" fn(c_int, *mut c_double, *mut c_int, *mut c_int) -> c_int,
    stream_stop: unsafe extern "C" fn(c_int) -> c_int,
    error_to_string: unsafe extern "C" fn(c_int, *mut c_char),
}

impl LjmApi {
    fn load() -> Result<Self> {
        let lib = LIBRARY_NAMES
            .iter()
            .find_map(|name| unsafe { Library::new(name).ok() })
            .ok_or_else(|| anyhow!("LabJack LJM library not found (tried {LIBRARY_NAMES:?})"))?;
        // Safety: signatures follow LabJackM.h.
        unsafe {
            Ok(Self {
                open_s: *lib.get(b"LJM_OpenS\0")?,
                close: *lib.get(b"LJM_Close\0")?,
                get_handle_info: *lib.get(b"LJM_GetHandleInfo\0")?,
                e_write_name: *lib.get(b"LJM_eWriteName\0")?,
                e_read_name: *lib.get(b"LJM_eReadName\0")?,
                names_to_addresses: *lib.get(b"LJM_NamesToAddresses\0")?,
                stream_start: *lib.get(b"LJM_eStreamStart\0")?,
                stream_read: *lib.get(b"LJM_eStreamRead\0")?,
                stream_stop: *lib.get(b"LJM_eStreamStop\0")?,
                error_to_string: *lib.get(b"LJM_ErrorToString\0")?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static LjmApi> {
        static API: OnceCell<LjmApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn describe(&self, code: c_int) -> String {
        let mut buf = [0 as c_char; LJM_MAX_NAME_SIZE];
        unsafe { (self.error_to_string)(code, buf.as_mut_ptr()) };
        let bytes: Vec<u8> = buf
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn check(&self, code: c_int, ctx: &str) -> Result<()> {
        match classify(code) {
            Status::Ok => Ok(()),
            Status::Warning => {
                warn!("{ctx}: LJM warning {code} ({})", self.describe(code));
                Ok(())
            }
            Status::Error => Err(anyhow!(
                "{ctx} failed (LJM error {code}: {})",
                self.describe(code)
            )),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Status {
    Ok,
    Warning,
    Error,
}

fn classify(code: c_int) -> Status {
    match code {
        LJME_NOERROR => Status::Ok,
        LJME_WARNINGS_BEGIN..=LJME_WARNINGS_END => Status::Warning,
        _ => Status::Error,
    }
}

fn scan_list_names(first_ain: u32, count: usize) -> Vec<String> {
    (first_ain..first_ain + count as u32)
        .map(|i| format!("AIN{i}"))
        .collect()
}

/// Device and stream settings for [`LjmStream::open`].
#[derive(Clone, Debug)]
pub struct LjmSettings {
    pub device_type: String,
    pub connection_type: String,
    pub identifier: String,
    pub first_ain_channel: u32,
    pub num_channels: usize,
    pub scan_rate_hz: f64,
    pub scans_per_read: usize,
    pub ain_range_volts: f64,
}

/// Streaming session on a LabJack T-series device through the LJM library.
///
/// The stream is stopped and the handle closed when this value is dropped.
pub struct LjmStream {
    api: &'static LjmApi,
    handle: c_int,
    num_channels: usize,
    actual_scan_rate_hz: f64,
    buffer: Vec<f64>,
    is_streaming: bool,
    closed: bool,
}

impl LjmStream {
    /// Opens the device, applies the stream configuration and starts streaming.
    pub fn open(settings: &LjmSettings) -> Result<Self> {
        let api = LjmApi::instance()?;
        let device_type = CString::new(settings.device_type.as_str())?;
        let connection_type = CString::new(settings.connection_type.as_str())?;
        let identifier = CString::new(settings.identifier.as_str())?;
        let mut handle: c_int = 0;
        api.check(
            unsafe {
                (api.open_s)(
                    device_type.as_ptr(),
                    connection_type.as_ptr(),
                    identifier.as_ptr(),
                    &mut handle as *mut c_int,
                )
            },
            "LJM_OpenS",
        )?;
        let mut stream = Self {
            api,
            handle,
            num_channels: settings.num_channels,
            actual_scan_rate_hz: 0.0,
            buffer: vec![0.0; settings.scans_per_read * settings.num_channels],
            is_streaming: false,
            closed: false,
        };
        stream.log_handle_info()?;
        stream.configure(settings)?;
        stream.start(settings)?;
        Ok(stream)
    }

    fn log_handle_info(&self) -> Result<()> {
        let mut info = [0 as c_int; 6];
        let [a, b, c, d, e, f] = &mut info;
        self.api.check(
            unsafe { (self.api.get_handle_info)(self.handle, a, b, c, d, e, f) },
            "LJM_GetHandleInfo",
        )?;
        info!(
            "Opened a LabJack: device type {}, connection type {}, serial {}, port {}, max bytes per MB {}",
            info[0], info[1], info[2], info[4], info[5]
        );
        Ok(())
    }

    fn write_name(&self, name: &str, value: f64) -> Result<()> {
        let c_name = CString::new(name)?;
        self.api.check(
            unsafe { (self.api.e_write_name)(self.handle, c_name.as_ptr(), value) },
            &format!("LJM_eWriteName({name})"),
        )
    }

    fn read_name(&self, name: &str) -> Result<f64> {
        let c_name = CString::new(name)?;
        let mut value: c_double = 0.0;
        self.api.check(
            unsafe { (self.api.e_read_name)(self.handle, c_name.as_ptr(), &mut value as *mut c_double) },
            &format!("LJM_eReadName({name})"),
        )?;
        Ok(value)
    }

    fn configure(&self, settings: &LjmSettings) -> Result<()> {
        // internally clocked, untriggered stream
        self.write_name("STREAM_TRIGGER_INDEX", 0.0)?;
        self.write_name("STREAM_CLOCK_SOURCE", 0.0)?;
        self.write_name("AIN_ALL_RANGE", settings.ain_range_volts)?;
        self.write_name("STREAM_RESOLUTION_INDEX", 0.0)?;
        self.write_name("AIN_ALL_NEGATIVE_CH", LJM_GND)?;
        self.write_name("STREAM_SETTLING_US", 0.0)
    }

    fn start(&mut self, settings: &LjmSettings) -> Result<()> {
        let names = scan_list_names(settings.first_ain_channel, settings.num_channels);
        let c_names = names
            .iter()
            .map(|n| CString::new(n.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let ptrs: Vec<*const c_char> = c_names.iter().map(|n| n.as_ptr()).collect();
        let mut addresses = vec![0 as c_int; names.len()];
        let mut types = vec![0 as c_int; names.len()];
        self.api.check(
            unsafe {
                (self.api.names_to_addresses)(
                    names.len() as c_int,
                    ptrs.as_ptr(),
                    addresses.as_mut_ptr(),
                    types.as_mut_ptr(),
                )
            },
            "LJM_NamesToAddresses",
        )?;
        let mut scan_rate: c_double = settings.scan_rate_hz;
        self.api.check(
            unsafe {
                (self.api.stream_start)(
                    self.handle,
                    settings.scans_per_read as c_int,
                    addresses.len() as c_int,
                    addresses.as_ptr(),
                    &mut scan_rate as *mut c_double,
                )
            },
            "LJM_eStreamStart",
        )?;
        self.is_streaming = true;
        self.actual_scan_rate_hz = scan_rate;
        info!(
            "Stream started on {:?} at {:.0} Hz (requested {:.0} Hz)",
            names, scan_rate, settings.scan_rate_hz
        );
        Ok(())
    }

    /// Stops the stream and closes the handle; safe to call more than once.
    pub fn stop(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let stopped = if self.is_streaming {
            self.is_streaming = false;
            info!("Stop Stream");
            self.api.check(
                unsafe { (self.api.stream_stop)(self.handle) },
                "LJM_eStreamStop",
            )
        } else {
            Ok(())
        };
        // the handle is closed even if stopping the stream failed
        self.closed = true;
        let closed = self
            .api
            .check(unsafe { (self.api.close)(self.handle) }, "LJM_Close");
        stopped.and(closed)
    }

    fn read_counter(&self, name: &str) -> Result<u32, AcquisitionError> {
        self.read_name(name)
            .map(|v| v as u32)
            .map_err(|e| AcquisitionError::Transport(format!("{e:#}")))
    }
}

impl StreamSource for LjmStream {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn actual_scan_rate_hz(&self) -> f64 {
        self.actual_scan_rate_hz
    }

    fn ticks_per_second(&self) -> f64 {
        CORE_TIMER_HZ
    }

    fn read_block(&mut self) -> Result<Option<RawBlock>, AcquisitionError> {
        let mut device_backlog: c_int = 0;
        let mut host_backlog: c_int = 0;
        let code = unsafe {
            (self.api.stream_read)(
                self.handle,
                self.buffer.as_mut_ptr(),
                &mut device_backlog as *mut c_int,
                &mut host_backlog as *mut c_int,
            )
        };
        self.api
            .check(code, "LJM_eStreamRead")
            .map_err(|e| AcquisitionError::Transport(format!("{e:#}")))?;
        Ok(Some(RawBlock::new(self.buffer.clone()).with_backlog(
            device_backlog.max(0) as u32,
            host_backlog.max(0) as u32,
        )))
    }

    fn read_tick_counter(&mut self) -> Result<u32, AcquisitionError> {
        self.read_counter("CORE_TIMER")
    }

    fn read_stream_start_ticks(&mut self) -> Result<u32, AcquisitionError> {
        self.read_counter("STREAM_START_TIME_STAMP")
    }
}

impl Drop for LjmStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("LabJack cleanup failed: {e:#}");
        }
    }
}

/// Convenience wrapper used by the CLI.
pub fn open_stream(settings: &LjmSettings) -> Result<LjmStream> {
    LjmStream::open(settings).with_context(|| {
        format!(
            "failed to start a {} stream over {} ({})",
            settings.device_type, settings.connection_type, settings.identifier
        )
    })
}
