//! C ABI
//!
//! Every export returns a sentinel instead of an error: 0 for handles, -1 for
//! byte counts, null for strings and byte buffers, false for booleans, NaN
//! for JSON numbers and 0 for stored numbers. The error itself is logged.
//!
//! Strings and byte buffers handed out here must be returned through
//! `nb_str_free` / `nb_bytes_free`.

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;
use std::{ptr, slice};

use log::{debug, error, warn};

use crate::callbacks::{self, LogEvent, Message};
use crate::codec;
use crate::error::{Error, Result};
use crate::handle::{self, Handle};
use crate::json::{self, NodeId, NodeType};
use crate::lifecycle;
use crate::logging::{self, LogLevel};
use crate::net::{self, HttpRequest, Method};
use crate::mutex_lock;
use crate::storage::{kv, sql};
use crate::types::BridgeConfig;

macro_rules! or_return {
    ($result:expr, $sentinel:expr, $what:expr) => {
        match $result {
            Ok(v) => v,
            Err(e) => {
                error!("{} failed: {}", $what, e);
                return $sentinel;
            }
        }
    };
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::argument("null string"));
    }
    CStr::from_ptr(ptr).to_str().map_err(Error::argument)
}

unsafe fn c_bytes<'a>(ptr: *const u8, len: usize) -> Result<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(Error::argument("null buffer"));
    }
    Ok(slice::from_raw_parts(ptr, len))
}

fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            warn!("string with interior nul dropped: {}", e);
            ptr::null_mut()
        }
    }
}

unsafe fn into_c_bytes(bytes: Vec<u8>, out_len: *mut usize) -> *mut u8 {
    if out_len.is_null() {
        error!("null length pointer");
        return ptr::null_mut();
    }
    let boxed = bytes.into_boxed_slice();
    *out_len = boxed.len();
    Box::into_raw(boxed) as *mut u8
}

unsafe fn fail_bytes(out_len: *mut usize) -> *mut u8 {
    if !out_len.is_null() {
        *out_len = 0;
    }
    ptr::null_mut()
}

fn resolve(raw: i64) -> Result<Handle> {
    handle::resolve(raw)
}

fn node(raw: i64) -> Result<NodeId> {
    NodeId::from_raw(raw).ok_or(Error::InvalidNode(raw))
}

fn raw_node(node: Option<NodeId>) -> i64 {
    node.map_or(0, NodeId::as_raw)
}

/// # Safety
/// `ptr` must come from `into_c_string` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn nb_str_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// # Safety
/// `ptr`/`len` must be a buffer returned by this library and not freed yet.
#[no_mangle]
pub unsafe extern "C" fn nb_bytes_free(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)));
    }
}

// ---- lifecycle ----

/// # Safety
/// `config` must be a nul-terminated TOML document.
#[no_mangle]
pub unsafe extern "C" fn nb_init(config: *const c_char) -> bool {
    let text = or_return!(c_str(config), false, "init");
    let config = or_return!(text.parse::<BridgeConfig>().map_err(Error::config), false, "init");
    or_return!(lifecycle::init(config), false, "init");
    true
}

/// # Safety
/// `root` must be a nul-terminated path.
#[no_mangle]
pub unsafe extern "C" fn nb_init_with_root(root: *const c_char) -> bool {
    let root = or_return!(c_str(root), false, "init");
    or_return!(lifecycle::init(BridgeConfig::with_root(root)), false, "init");
    true
}

#[no_mangle]
pub extern "C" fn nb_release() -> bool {
    or_return!(lifecycle::release(), false, "release");
    true
}

#[no_mangle]
pub extern "C" fn nb_state() -> u8 {
    lifecycle::get_state()
}

#[no_mangle]
pub extern "C" fn nb_version() -> *mut c_char {
    into_c_string(crate::VERSION.to_string())
}

// ---- log and messages ----

static LOG_MAILBOX: Mutex<Option<Receiver<LogEvent>>> = Mutex::new(None);
static MSG_MAILBOX: Mutex<Option<Receiver<Message>>> = Mutex::new(None);
static PENDING: Mutex<BTreeMap<u64, Message>> = Mutex::new(BTreeMap::new());

#[no_mangle]
pub extern "C" fn nb_log_set_level(level: i32) -> bool {
    match LogLevel::from_code(level) {
        Some(level) => {
            logging::set_level(level);
            true
        }
        None => {
            error!("unknown log level {}", level);
            false
        }
    }
}

/// # Safety
/// `content` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_log_print(level: i32, content: *const c_char) {
    let content = or_return!(c_str(content), (), "log print");
    match LogLevel::from_code(level) {
        Some(level) => logging::print(level, content),
        None => error!("unknown log level {}", level),
    }
}

/// Buffers log events for `nb_log_poll` instead of writing them to stderr.
#[no_mangle]
pub extern "C" fn nb_log_subscribe(capacity: usize) {
    *mutex_lock!(LOG_MAILBOX) = Some(callbacks::subscribe_logs(capacity));
}

#[no_mangle]
pub extern "C" fn nb_log_unsubscribe() {
    callbacks::unsubscribe_logs();
    mutex_lock!(LOG_MAILBOX).take();
}

/// Next buffered log line, or null when the queue is empty.
///
/// # Safety
/// `level_out` must be null or point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn nb_log_poll(level_out: *mut i32) -> *mut c_char {
    let mailbox = mutex_lock!(LOG_MAILBOX);
    let event = match mailbox.as_ref().and_then(|rx| rx.try_recv().ok()) {
        Some(event) => event,
        None => return ptr::null_mut(),
    };
    if !level_out.is_null() {
        *level_out = event.level.code();
    }
    into_c_string(event.content)
}

#[no_mangle]
pub extern "C" fn nb_msg_subscribe() {
    *mutex_lock!(MSG_MAILBOX) = Some(callbacks::subscribe_messages());
}

#[no_mangle]
pub extern "C" fn nb_msg_unsubscribe() {
    callbacks::unsubscribe_messages();
    mutex_lock!(MSG_MAILBOX).take();
    mutex_lock!(PENDING).clear();
}

/// Next pending engine message, or null. Answer it with `nb_msg_reply`.
///
/// # Safety
/// `id_out` must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn nb_msg_poll(id_out: *mut u64) -> *mut c_char {
    if id_out.is_null() {
        error!("msg poll: null id pointer");
        return ptr::null_mut();
    }
    evict_abandoned();
    let message = {
        let mailbox = mutex_lock!(MSG_MAILBOX);
        let Some(rx) = mailbox.as_ref() else {
            return ptr::null_mut();
        };
        // skip messages whose asker already gave up
        match rx.try_iter().find(|m| !m.is_abandoned()) {
            Some(message) => message,
            None => return ptr::null_mut(),
        }
    };
    let id = message.id();
    let body = message.body().to_string();
    mutex_lock!(PENDING).insert(id, message);
    *id_out = id;
    into_c_string(body)
}

/// Messages handed out by `nb_msg_poll` that still await a reply.
#[no_mangle]
pub extern "C" fn nb_msg_pending() -> usize {
    evict_abandoned();
    mutex_lock!(PENDING).len()
}

fn evict_abandoned() {
    let mut pending = mutex_lock!(PENDING);
    let before = pending.len();
    pending.retain(|_, m| !m.is_abandoned());
    if pending.len() < before {
        debug!("msg: evicted {} abandoned messages", before - pending.len());
    }
}

/// # Safety
/// `text` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_msg_reply(id: u64, text: *const c_char) -> bool {
    let text = or_return!(c_str(text), false, "msg reply");
    match mutex_lock!(PENDING).remove(&id) {
        Some(message) => message.reply(text),
        None => {
            error!("msg reply: unknown message {}", id);
            false
        }
    }
}

/// # Safety
/// `msg` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_ask_platform(msg: *const c_char) -> *mut c_char {
    let msg = or_return!(c_str(msg), ptr::null_mut(), "ask platform");
    match callbacks::ask(msg) {
        Some(reply) => into_c_string(reply),
        None => ptr::null_mut(),
    }
}

// ---- net ----

/// Performs an HTTP request and returns the response as JSON text, or null.
///
/// # Safety
/// `url` and `params` must be nul-terminated strings (`params` may be null);
/// `headers` must point to `header_count` nul-terminated `Name: value` lines.
#[no_mangle]
pub unsafe extern "C" fn nb_net_http_request(
    url: *const c_char,
    params: *const c_char,
    method: i32,
    headers: *const *const c_char,
    header_count: usize,
    timeout_ms: u64,
) -> *mut c_char {
    let url = or_return!(c_str(url), ptr::null_mut(), "http request");
    let params = if params.is_null() {
        ""
    } else {
        or_return!(c_str(params), ptr::null_mut(), "http request")
    };
    let method = or_return!(
        Method::from_code(method).ok_or_else(|| Error::argument(format!("http method {}", method))),
        ptr::null_mut(),
        "http request"
    );
    if header_count > net::MAX_HEADER_COUNT {
        error!("http request: {} headers", header_count);
        return ptr::null_mut();
    }
    let lines = match header_count {
        0 => &[][..],
        _ if headers.is_null() => {
            error!("http request: null header list");
            return ptr::null_mut();
        }
        n => slice::from_raw_parts(headers, n),
    };
    let mut header_lines = Vec::with_capacity(lines.len());
    for line in lines {
        let line = or_return!(c_str(*line), ptr::null_mut(), "http request");
        header_lines.push(line.to_string());
    }
    let req = HttpRequest {
        url: url.to_string(),
        method,
        params: params.to_string(),
        headers: header_lines,
        timeout_ms,
    };
    let response = or_return!(net::request(&req), ptr::null_mut(), "http request");
    let text = or_return!(serde_json::to_string(&response), ptr::null_mut(), "http request");
    into_c_string(text)
}

/// # Safety
/// `url` and `path` must be nul-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn nb_net_http_download(url: *const c_char, path: *const c_char, timeout_ms: u64) -> bool {
    let url = or_return!(c_str(url), false, "http download");
    let path = or_return!(c_str(path), false, "http download");
    or_return!(net::download(url, path, timeout_ms), false, "http download");
    true
}

// ---- codec ----

#[no_mangle]
pub extern "C" fn nb_z_zip_init(mode: i32, buffer_size: i64, format: i32) -> i64 {
    let (mode, buffer_size, format) =
        or_return!(codec::parse_params(mode, buffer_size, format), 0, "zip init");
    let handle = or_return!(codec::zip_init(mode, buffer_size, format), 0, "zip init");
    handle.as_raw()
}

#[no_mangle]
pub extern "C" fn nb_z_unzip_init(buffer_size: i64, format: i32) -> i64 {
    let (_, buffer_size, format) =
        or_return!(codec::parse_params(-1, buffer_size, format), 0, "unzip init");
    let handle = or_return!(codec::unzip_init(buffer_size, format), 0, "unzip init");
    handle.as_raw()
}

/// Returns the number of bytes accepted, or -1.
///
/// # Safety
/// `data` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn nb_z_input(handle: i64, data: *const u8, len: usize, is_final: bool) -> i64 {
    let handle = or_return!(resolve(handle), -1, "z input");
    let chunk = or_return!(c_bytes(data, len), -1, "z input");
    let accepted = or_return!(codec::input(handle, chunk, is_final), -1, "z input");
    accepted as i64
}

/// # Safety
/// `out_len` must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn nb_z_process_do(handle: i64, out_len: *mut usize) -> *mut u8 {
    let handle = or_return!(resolve(handle), fail_bytes(out_len), "z process");
    let out = or_return!(codec::process_step(handle), fail_bytes(out_len), "z process");
    into_c_bytes(out, out_len)
}

#[no_mangle]
pub extern "C" fn nb_z_process_finished(handle: i64) -> bool {
    let handle = or_return!(resolve(handle), false, "z finished");
    or_return!(codec::is_step_finished(handle), false, "z finished")
}

#[no_mangle]
pub extern "C" fn nb_z_release(handle: i64) -> bool {
    let handle = or_return!(resolve(handle), false, "z release");
    or_return!(codec::release(handle), false, "z release");
    true
}

/// # Safety
/// `data` must point to `len` readable bytes and `out_len` to writable memory.
#[no_mangle]
pub unsafe extern "C" fn nb_z_bytes_zip(
    mode: i32,
    buffer_size: i64,
    format: i32,
    data: *const u8,
    len: usize,
    out_len: *mut usize,
) -> *mut u8 {
    let input = or_return!(c_bytes(data, len), fail_bytes(out_len), "zip bytes");
    let (mode, buffer_size, format) = or_return!(
        codec::parse_params(mode, buffer_size, format),
        fail_bytes(out_len),
        "zip bytes"
    );
    let out = or_return!(
        codec::zip_bytes(mode, buffer_size, format, input),
        fail_bytes(out_len),
        "zip bytes"
    );
    into_c_bytes(out, out_len)
}

/// # Safety
/// `data` must point to `len` readable bytes and `out_len` to writable memory.
#[no_mangle]
pub unsafe extern "C" fn nb_z_bytes_unzip(
    buffer_size: i64,
    format: i32,
    data: *const u8,
    len: usize,
    out_len: *mut usize,
) -> *mut u8 {
    let input = or_return!(c_bytes(data, len), fail_bytes(out_len), "unzip bytes");
    let (_, buffer_size, format) = or_return!(
        codec::parse_params(-1, buffer_size, format),
        fail_bytes(out_len),
        "unzip bytes"
    );
    let out = or_return!(
        codec::unzip_bytes(buffer_size, format, input),
        fail_bytes(out_len),
        "unzip bytes"
    );
    into_c_bytes(out, out_len)
}

// ---- json ----

/// # Safety
/// `text` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_json_decoder_init(text: *const c_char) -> i64 {
    let text = or_return!(c_str(text), 0, "json init");
    let handle = or_return!(json::decoder_init(text), 0, "json init");
    handle.as_raw()
}

#[no_mangle]
pub extern "C" fn nb_json_node_type(decoder: i64, node: i64) -> i32 {
    let kind = resolve(decoder).and_then(|d| json::node_type(d, self::node(node)?));
    or_return!(kind.map(NodeType::code), NodeType::UNKNOWN_CODE, "json node type")
}

#[no_mangle]
pub extern "C" fn nb_json_read_child(decoder: i64, node: i64) -> i64 {
    let child = resolve(decoder).and_then(|d| json::read_child(d, self::node(node)?));
    raw_node(or_return!(child, 0, "json read child"))
}

#[no_mangle]
pub extern "C" fn nb_json_read_next(decoder: i64, node: i64) -> i64 {
    let next = resolve(decoder).and_then(|d| json::read_next(d, self::node(node)?));
    raw_node(or_return!(next, 0, "json read next"))
}

/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_json_read_node(decoder: i64, node: i64, key: *const c_char) -> i64 {
    let found = c_str(key)
        .and_then(|key| json::read_node(resolve(decoder)?, self::node(node)?, key));
    raw_node(or_return!(found, 0, "json read node"))
}

#[no_mangle]
pub extern "C" fn nb_json_child_count(decoder: i64, node: i64) -> i64 {
    let count = resolve(decoder).and_then(|d| json::child_count(d, self::node(node)?));
    or_return!(count, 0, "json child count") as i64
}

#[no_mangle]
pub extern "C" fn nb_json_read_string(decoder: i64, node: i64) -> *mut c_char {
    let value = resolve(decoder).and_then(|d| json::read_string(d, self::node(node)?));
    into_c_string(or_return!(value, ptr::null_mut(), "json read string"))
}

#[no_mangle]
pub extern "C" fn nb_json_read_number(decoder: i64, node: i64) -> f64 {
    let value = resolve(decoder).and_then(|d| json::read_number(d, self::node(node)?));
    or_return!(value, f64::NAN, "json read number")
}

#[no_mangle]
pub extern "C" fn nb_json_read_bool(decoder: i64, node: i64) -> bool {
    let value = resolve(decoder).and_then(|d| json::read_bool(d, self::node(node)?));
    or_return!(value, false, "json read bool")
}

#[no_mangle]
pub extern "C" fn nb_json_decoder_release(decoder: i64) -> bool {
    or_return!(resolve(decoder).and_then(json::decoder_release), false, "json release");
    true
}

// ---- key-value store ----

/// # Safety
/// `id` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_open(id: *const c_char) -> i64 {
    let id = or_return!(c_str(id), 0, "kv open");
    let handle = or_return!(kv::open(id), 0, "kv open");
    handle.as_raw()
}

unsafe fn kv_call<T>(
    conn: i64,
    key: *const c_char,
    f: impl FnOnce(&kv::KvStore, &str) -> Result<T>,
) -> Result<T> {
    let store = kv::store(resolve(conn)?)?;
    f(&store, c_str(key)?)
}

/// Null when the key is absent or holds another type.
///
/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_read_string(conn: i64, key: *const c_char) -> *mut c_char {
    let value = or_return!(kv_call(conn, key, |s, k| s.read_string(k)), ptr::null_mut(), "kv read");
    value.map_or(ptr::null_mut(), into_c_string)
}

/// # Safety
/// `key` and `value` must be nul-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_write_string(conn: i64, key: *const c_char, value: *const c_char) -> bool {
    let value = or_return!(c_str(value), false, "kv write");
    or_return!(kv_call(conn, key, |s, k| s.write(k, value)), false, "kv write");
    true
}

/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_read_integer(conn: i64, key: *const c_char) -> i64 {
    let value = or_return!(kv_call(conn, key, |s, k| s.read_integer(k)), 0, "kv read");
    value.unwrap_or(0)
}

/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_write_integer(conn: i64, key: *const c_char, value: i64) -> bool {
    or_return!(kv_call(conn, key, |s, k| s.write(k, value)), false, "kv write");
    true
}

/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_read_float(conn: i64, key: *const c_char) -> f64 {
    let value = or_return!(kv_call(conn, key, |s, k| s.read_float(k)), 0.0, "kv read");
    value.unwrap_or(0.0)
}

/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_write_float(conn: i64, key: *const c_char, value: f64) -> bool {
    or_return!(kv_call(conn, key, |s, k| s.write(k, value)), false, "kv write");
    true
}

/// All keys as a JSON array of strings.
#[no_mangle]
pub extern "C" fn nb_kv_all_keys(conn: i64) -> *mut c_char {
    let keys = resolve(conn).and_then(kv::store).and_then(|s| s.all_keys());
    let keys = or_return!(keys, ptr::null_mut(), "kv all keys");
    let text = or_return!(serde_json::to_string(&keys), ptr::null_mut(), "kv all keys");
    into_c_string(text)
}

/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_contains(conn: i64, key: *const c_char) -> bool {
    or_return!(kv_call(conn, key, |s, k| s.contains(k)), false, "kv contains")
}

/// False when the key was absent.
///
/// # Safety
/// `key` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_kv_remove(conn: i64, key: *const c_char) -> bool {
    or_return!(kv_call(conn, key, |s, k| s.remove(k)), false, "kv remove")
}

#[no_mangle]
pub extern "C" fn nb_kv_clear(conn: i64) -> bool {
    let cleared = resolve(conn).and_then(kv::store).and_then(|s| s.clear());
    or_return!(cleared, false, "kv clear");
    true
}

#[no_mangle]
pub extern "C" fn nb_kv_close(conn: i64) -> bool {
    or_return!(resolve(conn).and_then(kv::close), false, "kv close");
    true
}

// ---- sqlite ----

/// # Safety
/// `id` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_sqlite_open(id: *const c_char) -> i64 {
    let id = or_return!(c_str(id), 0, "sqlite open");
    let handle = or_return!(sql::open(id), 0, "sqlite open");
    handle.as_raw()
}

/// # Safety
/// `statements` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_sqlite_execute(conn: i64, statements: *const c_char) -> bool {
    let statements = or_return!(c_str(statements), false, "sqlite execute");
    or_return!(
        resolve(conn).and_then(|c| sql::execute(c, statements)),
        false,
        "sqlite execute"
    );
    true
}

/// # Safety
/// `query` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_sqlite_query_do(conn: i64, query: *const c_char) -> i64 {
    let query = or_return!(c_str(query), 0, "sqlite query");
    let handle = or_return!(resolve(conn).and_then(|c| sql::query(c, query)), 0, "sqlite query");
    handle.as_raw()
}

#[no_mangle]
pub extern "C" fn nb_sqlite_query_read_row(query: i64) -> bool {
    or_return!(resolve(query).and_then(sql::read_row), false, "sqlite read row")
}

/// # Safety
/// `column` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_sqlite_query_read_column_text(query: i64, column: *const c_char) -> *mut c_char {
    let value = c_str(column).and_then(|c| sql::read_text(resolve(query)?, c));
    let value = or_return!(value, ptr::null_mut(), "sqlite read column");
    value.map_or(ptr::null_mut(), into_c_string)
}

/// # Safety
/// `column` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_sqlite_query_read_column_integer(query: i64, column: *const c_char) -> i64 {
    let value = c_str(column).and_then(|c| sql::read_integer(resolve(query)?, c));
    or_return!(value, 0, "sqlite read column").unwrap_or(0)
}

/// # Safety
/// `column` must be a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn nb_sqlite_query_read_column_float(query: i64, column: *const c_char) -> f64 {
    let value = c_str(column).and_then(|c| sql::read_float(resolve(query)?, c));
    or_return!(value, 0.0, "sqlite read column").unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn nb_sqlite_query_drop(query: i64) -> bool {
    or_return!(resolve(query).and_then(sql::drop_query), false, "sqlite query drop");
    true
}

#[no_mangle]
pub extern "C" fn nb_sqlite_close(conn: i64) -> bool {
    or_return!(resolve(conn).and_then(sql::close), false, "sqlite close");
    true
}
