//! JSON-envelope surface for scripting hosts
//!
//! Each function takes one JSON object with fixed field names and returns a
//! JSON value. Failures never escape: the function's sentinel comes back
//! instead and the error is logged. Handles travel as decimal strings so
//! hosts without 64-bit integers keep them intact; numbers are accepted too.

use log::error;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::callbacks;
use crate::codec::{self, DEFAULT_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::json::{self as tree, NodeId};
use crate::logging::{self, LogLevel};
use crate::net::{self, HttpRequest, Method};
use crate::storage::{kv, sql};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    Handle,
    Count,
    Bytes,
    Bool,
    Int,
    Float,
    Text,
    List,
    Unit,
}

impl Returns {
    pub fn sentinel(self) -> Value {
        match self {
            Returns::Handle => json!("0"),
            Returns::Count => json!(-1),
            Returns::Bytes | Returns::List => json!([]),
            Returns::Bool => json!(false),
            Returns::Int => json!(0),
            Returns::Float => json!(0.0),
            Returns::Text => json!(""),
            Returns::Unit => Value::Null,
        }
    }
}

type Handler = fn(&str) -> Result<Value>;

const FUNCTIONS: &[(&str, Returns, Handler)] = &[
    ("get_version", Returns::Text, get_version),
    ("log_print", Returns::Unit, log_print),
    ("ask_platform", Returns::Text, ask_platform),
    ("net_http_request", Returns::Text, net_http_request),
    ("net_http_download", Returns::Bool, net_http_download),
    ("z_zip_init", Returns::Handle, z_zip_init),
    ("z_zip_input", Returns::Count, z_input),
    ("z_zip_process_do", Returns::Bytes, z_process_do),
    ("z_zip_process_finished", Returns::Bool, z_process_finished),
    ("z_zip_release", Returns::Bool, z_release),
    ("z_unzip_init", Returns::Handle, z_unzip_init),
    ("z_unzip_input", Returns::Count, z_input),
    ("z_unzip_process_do", Returns::Bytes, z_process_do),
    ("z_unzip_process_finished", Returns::Bool, z_process_finished),
    ("z_unzip_release", Returns::Bool, z_release),
    ("z_bytes_zip", Returns::Bytes, z_bytes_zip),
    ("z_bytes_unzip", Returns::Bytes, z_bytes_unzip),
    ("json_decoder_init", Returns::Handle, json_decoder_init),
    ("json_decoder_node_type", Returns::Int, json_decoder_node_type),
    ("json_decoder_read_node", Returns::Int, json_decoder_read_node),
    ("json_decoder_read_child", Returns::Int, json_decoder_read_child),
    ("json_decoder_read_next", Returns::Int, json_decoder_read_next),
    ("json_decoder_read_children_count", Returns::Int, json_decoder_read_children_count),
    ("json_decoder_read_key", Returns::Text, json_decoder_read_key),
    ("json_decoder_read_string", Returns::Text, json_decoder_read_string),
    ("json_decoder_read_number", Returns::Float, json_decoder_read_number),
    ("json_decoder_read_bool", Returns::Bool, json_decoder_read_bool),
    ("json_decoder_release", Returns::Bool, json_decoder_release),
    ("store_kv_open", Returns::Handle, store_kv_open),
    ("store_kv_read_string", Returns::Text, store_kv_read_string),
    ("store_kv_write_string", Returns::Bool, store_kv_write_string),
    ("store_kv_read_integer", Returns::Int, store_kv_read_integer),
    ("store_kv_write_integer", Returns::Bool, store_kv_write_integer),
    ("store_kv_read_float", Returns::Float, store_kv_read_float),
    ("store_kv_write_float", Returns::Bool, store_kv_write_float),
    ("store_kv_all_keys", Returns::List, store_kv_all_keys),
    ("store_kv_contains", Returns::Bool, store_kv_contains),
    ("store_kv_remove", Returns::Bool, store_kv_remove),
    ("store_kv_clear", Returns::Bool, store_kv_clear),
    ("store_kv_close", Returns::Bool, store_kv_close),
    ("store_sqlite_open", Returns::Handle, store_sqlite_open),
    ("store_sqlite_execute", Returns::Bool, store_sqlite_execute),
    ("store_sqlite_query_do", Returns::Handle, store_sqlite_query_do),
    ("store_sqlite_query_read_row", Returns::Bool, store_sqlite_query_read_row),
    ("store_sqlite_query_read_column_text", Returns::Text, store_sqlite_query_read_column_text),
    ("store_sqlite_query_read_column_integer", Returns::Int, store_sqlite_query_read_column_integer),
    ("store_sqlite_query_read_column_float", Returns::Float, store_sqlite_query_read_column_float),
    ("store_sqlite_query_drop", Returns::Bool, store_sqlite_query_drop),
    ("store_sqlite_close", Returns::Bool, store_sqlite_close),
];

pub fn functions() -> impl Iterator<Item = &'static str> {
    FUNCTIONS.iter().map(|(name, _, _)| *name)
}

pub fn returns(function: &str) -> Option<Returns> {
    FUNCTIONS
        .iter()
        .find(|(name, _, _)| *name == function)
        .map(|(_, returns, _)| *returns)
}

/// Runs `function` with the JSON envelope `params`. `None` if no such function.
pub fn call(function: &str, params: &str) -> Option<Value> {
    let (_, returns, handler) = FUNCTIONS.iter().find(|(name, _, _)| *name == function)?;
    Some(match handler(params) {
        Ok(value) => value,
        Err(e) => {
            error!("{} failed: {}", function, e);
            returns.sentinel()
        }
    })
}

fn parse<T: DeserializeOwned>(params: &str) -> Result<T> {
    let params = params.trim();
    let params = if params.is_empty() { "{}" } else { params };
    Ok(serde_json::from_str(params)?)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

fn de_handle<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Handle, D::Error> {
    let raw = match Loose::deserialize(d)? {
        Loose::Int(i) => i,
        Loose::Text(s) => s.trim().parse::<i64>().map_err(D::Error::custom)?,
        _ => return Err(D::Error::custom("handle must be an integer or a decimal string")),
    };
    Handle::from_raw(raw).ok_or_else(|| D::Error::custom(format!("invalid handle {}", raw)))
}

fn de_node<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<NodeId, D::Error> {
    let raw = match Loose::deserialize(d)? {
        Loose::Int(i) => i,
        Loose::Text(s) => s.trim().parse::<i64>().map_err(D::Error::custom)?,
        _ => return Err(D::Error::custom("node must be an integer")),
    };
    NodeId::from_raw(raw).ok_or_else(|| D::Error::custom(format!("invalid node {}", raw)))
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(match Loose::deserialize(d)? {
        Loose::Bool(b) => b,
        Loose::Int(i) => i != 0,
        Loose::Float(f) => f != 0.0,
        Loose::Text(s) => matches!(s.as_str(), "1" | "true"),
    })
}

fn default_mode() -> i32 {
    -1
}

fn default_buffer_size() -> i64 {
    DEFAULT_BUFFER_SIZE as i64
}

fn root_node() -> NodeId {
    NodeId::ROOT
}

fn handle_value(handle: Handle) -> Value {
    Value::String(handle.to_string())
}

/// `inBytes`, cut to `inLen` when present.
fn take_bytes(mut bytes: Vec<u8>, len: Option<usize>) -> Vec<u8> {
    if let Some(len) = len {
        bytes.truncate(len);
    }
    bytes
}

// ---- misc ----

fn get_version(_: &str) -> Result<Value> {
    Ok(json!(crate::VERSION))
}

#[derive(Deserialize)]
struct LogPrint {
    level: i32,
    content: String,
}

fn log_print(params: &str) -> Result<Value> {
    let p: LogPrint = parse(params)?;
    let level = LogLevel::from_code(p.level)
        .ok_or_else(|| Error::argument(format!("log level {}", p.level)))?;
    logging::print(level, &p.content);
    Ok(Value::Null)
}

#[derive(Deserialize)]
struct AskPlatform {
    msg: String,
}

fn ask_platform(params: &str) -> Result<Value> {
    let p: AskPlatform = parse(params)?;
    let reply = callbacks::ask(&p.msg).ok_or_else(|| Error::runtime("no reply from host"))?;
    Ok(json!(reply))
}

// ---- net ----

#[derive(Deserialize)]
struct NetRequest {
    url: String,
    #[serde(default)]
    params: String,
    #[serde(default)]
    method: i32,
    #[serde(default, rename = "header_v", alias = "headers")]
    headers: Vec<String>,
    #[serde(default)]
    timeout: u64,
}

/// Returns the response as JSON text: `code`, `contentType`, `headers`, `data`.
fn net_http_request(params: &str) -> Result<Value> {
    let p: NetRequest = parse(params)?;
    let method = Method::from_code(p.method)
        .ok_or_else(|| Error::argument(format!("http method {}", p.method)))?;
    let response = net::request(&HttpRequest {
        url: p.url,
        method,
        params: p.params,
        headers: p.headers,
        timeout_ms: p.timeout,
    })?;
    Ok(json!(serde_json::to_string(&response)?))
}

#[derive(Deserialize)]
struct NetDownload {
    url: String,
    file: String,
    #[serde(default)]
    timeout: u64,
}

fn net_http_download(params: &str) -> Result<Value> {
    let p: NetDownload = parse(params)?;
    if p.file.is_empty() {
        return Err(Error::argument("empty file path"));
    }
    net::download(&p.url, &p.file, p.timeout)?;
    Ok(json!(true))
}

// ---- codec ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZipInit {
    #[serde(default = "default_mode")]
    mode: i32,
    #[serde(default = "default_buffer_size")]
    buffer_size: i64,
    #[serde(default)]
    format: i32,
}

fn z_zip_init(params: &str) -> Result<Value> {
    let p: ZipInit = parse(params)?;
    let (mode, buffer_size, format) = codec::parse_params(p.mode, p.buffer_size, p.format)?;
    Ok(handle_value(codec::zip_init(mode, buffer_size, format)?))
}

fn z_unzip_init(params: &str) -> Result<Value> {
    let p: ZipInit = parse(params)?;
    let (_, buffer_size, format) = codec::parse_params(-1, p.buffer_size, p.format)?;
    Ok(handle_value(codec::unzip_init(buffer_size, format)?))
}

#[derive(Deserialize)]
struct ZipHandle {
    #[serde(rename = "zip", alias = "unzip", deserialize_with = "de_handle")]
    handle: Handle,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZipInput {
    #[serde(rename = "zip", alias = "unzip", deserialize_with = "de_handle")]
    handle: Handle,
    #[serde(default)]
    in_bytes: Vec<u8>,
    in_len: Option<usize>,
    #[serde(default, deserialize_with = "de_flag")]
    in_finish: bool,
}

fn z_input(params: &str) -> Result<Value> {
    let p: ZipInput = parse(params)?;
    let chunk = take_bytes(p.in_bytes, p.in_len);
    Ok(json!(codec::input(p.handle, &chunk, p.in_finish)?))
}

fn z_process_do(params: &str) -> Result<Value> {
    let p: ZipHandle = parse(params)?;
    Ok(json!(codec::process_step(p.handle)?))
}

fn z_process_finished(params: &str) -> Result<Value> {
    let p: ZipHandle = parse(params)?;
    Ok(json!(codec::is_step_finished(p.handle)?))
}

fn z_release(params: &str) -> Result<Value> {
    let p: ZipHandle = parse(params)?;
    codec::release(p.handle)?;
    Ok(json!(true))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZipBytes {
    #[serde(default = "default_mode")]
    mode: i32,
    #[serde(default = "default_buffer_size")]
    buffer_size: i64,
    #[serde(default)]
    format: i32,
    #[serde(default)]
    in_bytes: Vec<u8>,
    in_len: Option<usize>,
}

fn z_bytes_zip(params: &str) -> Result<Value> {
    let p: ZipBytes = parse(params)?;
    let (mode, buffer_size, format) = codec::parse_params(p.mode, p.buffer_size, p.format)?;
    let input = take_bytes(p.in_bytes, p.in_len);
    Ok(json!(codec::zip_bytes(mode, buffer_size, format, &input)?))
}

fn z_bytes_unzip(params: &str) -> Result<Value> {
    let p: ZipBytes = parse(params)?;
    let (_, buffer_size, format) = codec::parse_params(-1, p.buffer_size, p.format)?;
    let input = take_bytes(p.in_bytes, p.in_len);
    Ok(json!(codec::unzip_bytes(buffer_size, format, &input)?))
}

// ---- json decoder ----

#[derive(Deserialize)]
struct DecoderInit {
    json: String,
}

#[derive(Deserialize)]
struct DecoderNode {
    #[serde(deserialize_with = "de_handle")]
    decoder: Handle,
    #[serde(default = "root_node", deserialize_with = "de_node")]
    node: NodeId,
}

#[derive(Deserialize)]
struct DecoderLookup {
    #[serde(deserialize_with = "de_handle")]
    decoder: Handle,
    #[serde(default = "root_node", deserialize_with = "de_node")]
    node: NodeId,
    k: String,
}

fn node_value(node: Option<NodeId>) -> Value {
    json!(node.map_or(0, NodeId::as_raw))
}

fn json_decoder_init(params: &str) -> Result<Value> {
    let p: DecoderInit = parse(params)?;
    Ok(handle_value(tree::decoder_init(&p.json)?))
}

fn json_decoder_node_type(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(json!(tree::node_type(p.decoder, p.node)?.code()))
}

fn json_decoder_read_node(params: &str) -> Result<Value> {
    let p: DecoderLookup = parse(params)?;
    Ok(node_value(tree::read_node(p.decoder, p.node, &p.k)?))
}

fn json_decoder_read_child(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(node_value(tree::read_child(p.decoder, p.node)?))
}

fn json_decoder_read_next(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(node_value(tree::read_next(p.decoder, p.node)?))
}

fn json_decoder_read_children_count(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(json!(tree::child_count(p.decoder, p.node)?))
}

fn json_decoder_read_key(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(json!(tree::read_key(p.decoder, p.node)?.unwrap_or_default()))
}

fn json_decoder_read_string(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(json!(tree::read_string(p.decoder, p.node)?))
}

fn json_decoder_read_number(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(json!(tree::read_number(p.decoder, p.node)?))
}

fn json_decoder_read_bool(params: &str) -> Result<Value> {
    let p: DecoderNode = parse(params)?;
    Ok(json!(tree::read_bool(p.decoder, p.node)?))
}

fn json_decoder_release(params: &str) -> Result<Value> {
    #[derive(Deserialize)]
    struct DecoderHandle {
        #[serde(deserialize_with = "de_handle")]
        decoder: Handle,
    }
    let p: DecoderHandle = parse(params)?;
    tree::decoder_release(p.decoder)?;
    Ok(json!(true))
}

// ---- key-value store ----

#[derive(Deserialize)]
struct StoreOpen {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct Conn {
    #[serde(deserialize_with = "de_handle")]
    conn: Handle,
}

#[derive(Deserialize)]
struct KvKey {
    #[serde(deserialize_with = "de_handle")]
    conn: Handle,
    k: String,
}

#[derive(Deserialize)]
struct KvWrite<V> {
    #[serde(deserialize_with = "de_handle")]
    conn: Handle,
    k: String,
    v: V,
}

fn store_kv_open(params: &str) -> Result<Value> {
    let p: StoreOpen = parse(params)?;
    Ok(handle_value(kv::open(&p.id)?))
}

fn store_kv_read_string(params: &str) -> Result<Value> {
    let p: KvKey = parse(params)?;
    Ok(json!(kv::store(p.conn)?.read_string(&p.k)?.unwrap_or_default()))
}

fn store_kv_write_string(params: &str) -> Result<Value> {
    let p: KvWrite<String> = parse(params)?;
    kv::store(p.conn)?.write(&p.k, p.v)?;
    Ok(json!(true))
}

fn store_kv_read_integer(params: &str) -> Result<Value> {
    let p: KvKey = parse(params)?;
    Ok(json!(kv::store(p.conn)?.read_integer(&p.k)?.unwrap_or(0)))
}

fn store_kv_write_integer(params: &str) -> Result<Value> {
    let p: KvWrite<i64> = parse(params)?;
    kv::store(p.conn)?.write(&p.k, p.v)?;
    Ok(json!(true))
}

fn store_kv_read_float(params: &str) -> Result<Value> {
    let p: KvKey = parse(params)?;
    Ok(json!(kv::store(p.conn)?.read_float(&p.k)?.unwrap_or(0.0)))
}

fn store_kv_write_float(params: &str) -> Result<Value> {
    let p: KvWrite<f64> = parse(params)?;
    kv::store(p.conn)?.write(&p.k, p.v)?;
    Ok(json!(true))
}

fn store_kv_all_keys(params: &str) -> Result<Value> {
    let p: Conn = parse(params)?;
    Ok(json!(kv::store(p.conn)?.all_keys()?))
}

fn store_kv_contains(params: &str) -> Result<Value> {
    let p: KvKey = parse(params)?;
    Ok(json!(kv::store(p.conn)?.contains(&p.k)?))
}

fn store_kv_remove(params: &str) -> Result<Value> {
    let p: KvKey = parse(params)?;
    Ok(json!(kv::store(p.conn)?.remove(&p.k)?))
}

fn store_kv_clear(params: &str) -> Result<Value> {
    let p: Conn = parse(params)?;
    kv::store(p.conn)?.clear()?;
    Ok(json!(true))
}

fn store_kv_close(params: &str) -> Result<Value> {
    let p: Conn = parse(params)?;
    kv::close(p.conn)?;
    Ok(json!(true))
}

// ---- sqlite ----

#[derive(Deserialize)]
struct SqlStatement {
    #[serde(deserialize_with = "de_handle")]
    conn: Handle,
    sql: String,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(deserialize_with = "de_handle")]
    query_result: Handle,
}

#[derive(Deserialize)]
struct QueryColumn {
    #[serde(deserialize_with = "de_handle")]
    query_result: Handle,
    column: String,
}

fn store_sqlite_open(params: &str) -> Result<Value> {
    let p: StoreOpen = parse(params)?;
    Ok(handle_value(sql::open(&p.id)?))
}

fn store_sqlite_execute(params: &str) -> Result<Value> {
    let p: SqlStatement = parse(params)?;
    sql::execute(p.conn, &p.sql)?;
    Ok(json!(true))
}

fn store_sqlite_query_do(params: &str) -> Result<Value> {
    let p: SqlStatement = parse(params)?;
    Ok(handle_value(sql::query(p.conn, &p.sql)?))
}

fn store_sqlite_query_read_row(params: &str) -> Result<Value> {
    let p: QueryResult = parse(params)?;
    Ok(json!(sql::read_row(p.query_result)?))
}

fn store_sqlite_query_read_column_text(params: &str) -> Result<Value> {
    let p: QueryColumn = parse(params)?;
    Ok(json!(sql::read_text(p.query_result, &p.column)?.unwrap_or_default()))
}

fn store_sqlite_query_read_column_integer(params: &str) -> Result<Value> {
    let p: QueryColumn = parse(params)?;
    Ok(json!(sql::read_integer(p.query_result, &p.column)?.unwrap_or(0)))
}

fn store_sqlite_query_read_column_float(params: &str) -> Result<Value> {
    let p: QueryColumn = parse(params)?;
    Ok(json!(sql::read_float(p.query_result, &p.column)?.unwrap_or(0.0)))
}

fn store_sqlite_query_drop(params: &str) -> Result<Value> {
    let p: QueryResult = parse(params)?;
    sql::drop_query(p.query_result)?;
    Ok(json!(true))
}

fn store_sqlite_close(params: &str) -> Result<Value> {
    let p: Conn = parse(params)?;
    sql::close(p.conn)?;
    Ok(json!(true))
}
