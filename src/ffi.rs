//! FFI bindings for Glim Flux
//!
//! This module provides C-compatible functions for driving the pipeline from
//! other languages. Strings are null-terminated; every string returned here
//! must be freed by the caller using `glim_free_string`.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;

use crate::classifier::classify;
use crate::config::{Baseline, PipelineConfig};
use crate::pipeline::GlimPipeline;
use crate::types::HrSample;
use crate::upload::{UploadError, UploadPayload};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Upload callback. Receives the legacy upload JSON and the `user_data`
/// pointer given at construction; returns 0 when the upload succeeded.
pub type GlimUploadCallback = extern "C" fn(payload: *const c_char, user_data: *mut c_void) -> i32;

struct CallbackSink {
    callback: GlimUploadCallback,
    user_data: *mut c_void,
}

// The caller guarantees `user_data` may be used from the upload thread
unsafe impl Send for CallbackSink {}

impl CallbackSink {
    fn deliver(&self, payload: &UploadPayload) -> Result<(), UploadError> {
        let json = CString::new(payload.to_json())?;
        match (self.callback)(json.as_ptr(), self.user_data) {
            0 => Ok(()),
            code => Err(format!("upload callback returned {}", code).into()),
        }
    }
}

impl crate::upload::UploadSink for CallbackSink {
    fn upload(&self, payload: &UploadPayload) -> Result<(), UploadError> {
        self.deliver(payload)
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Classify one EDA/HR pair against a baseline and return JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `glim_free_string`.
/// - Returns NULL on error (zero or non-finite baseline); call `glim_last_error`.
#[no_mangle]
pub unsafe extern "C" fn glim_classify_json(
    eda: f32,
    heart_rate: f32,
    base_eda: f32,
    base_hr: f32,
) -> *mut c_char {
    clear_last_error();

    let baseline = match Baseline::new(base_eda, base_hr) {
        Ok(b) => b,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    match serde_json::to_string(&classify(eda, heart_rate, &baseline)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Pipeline API
// ============================================================================

/// Opaque handle to a GlimPipeline
pub struct GlimPipelineHandle {
    pipeline: GlimPipeline,
}

/// Create a new pipeline.
///
/// # Safety
/// - `config_json` may be NULL for the default configuration, otherwise it
///   must be a valid null-terminated C string.
/// - `upload` may be NULL, in which case batches and annotations are
///   discarded. If set, it is invoked from a background thread together with
///   `user_data`.
/// - Must be freed with `glim_pipeline_free`.
/// - Returns NULL on error; call `glim_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn glim_pipeline_new(
    config_json: *const c_char,
    upload: Option<GlimUploadCallback>,
    user_data: *mut c_void,
) -> *mut GlimPipelineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        PipelineConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match PipelineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let pipeline = match upload {
        Some(callback) => GlimPipeline::with_upload_sink(
            config,
            CallbackSink {
                callback,
                user_data,
            },
        ),
        None => GlimPipeline::new(config),
    };

    match pipeline {
        Ok(pipeline) => Box::into_raw(Box::new(GlimPipelineHandle { pipeline })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a pipeline, waiting for queued uploads to be delivered.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `glim_pipeline_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn glim_pipeline_free(handle: *mut GlimPipelineHandle) {
    if !handle.is_null() {
        let handle = Box::from_raw(handle);
        if let Err(e) = handle.pipeline.close() {
            log::warn!("Pipeline close failed: {}", e);
        }
    }
}

/// Feed raw EDA transport bytes.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `glim_pipeline_new`.
/// - `bytes` must point to `len` readable bytes (may be NULL when `len` is 0).
/// - Returns the number of frames decoded, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn glim_pipeline_feed_eda(
    handle: *mut GlimPipelineHandle,
    bytes: *const u8,
    len: usize,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    if len == 0 {
        return 0;
    }
    if bytes.is_null() {
        set_last_error("Null byte buffer");
        return -1;
    }

    let handle = &*handle;
    let report = handle.pipeline.ingest_eda(slice::from_raw_parts(bytes, len));
    i32::try_from(report.frames).unwrap_or(i32::MAX)
}

/// Deliver one validated HR sample.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `glim_pipeline_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn glim_pipeline_push_hr(
    handle: *mut GlimPipelineHandle,
    heart_rate: f32,
    instant_speed: f32,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }

    let handle = &*handle;
    handle
        .pipeline
        .on_hr_sample(HrSample::new(heart_rate, instant_speed));
    0
}

/// Current arousal reading as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `glim_pipeline_new`.
/// - Returns a newly allocated string that must be freed with `glim_free_string`.
/// - Returns NULL on error; call `glim_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn glim_pipeline_reading_json(handle: *mut GlimPipelineHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }

    let handle = &*handle;
    match serde_json::to_string(&handle.pipeline.reading()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Queue an annotation event.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `glim_pipeline_new`.
/// - Returns the annotation timestamp in epoch milliseconds, or -1 if it
///   could not be queued.
#[no_mangle]
pub unsafe extern "C" fn glim_pipeline_annotate(handle: *mut GlimPipelineHandle) -> i64 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }

    let handle = &*handle;
    match handle.pipeline.annotate() {
        Some(timestamp_ms) => timestamp_ms,
        None => {
            set_last_error("Annotation was not queued");
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Glim functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Glim function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn glim_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Glim function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn glim_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Glim library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn glim_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
