//! Blocking HTTP client
//!
//! Requests run on the caller's thread. Headers arrive as raw `Name: value`
//! lines and are validated before anything touches the network.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::Serialize;

use crate::error::{Error, Result};

pub const MAX_HEADER_COUNT: usize = 100;
pub const MAX_HEADER_LEN: usize = 8190;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    pub fn from_code(code: i32) -> Option<Method> {
        match code {
            0 => Some(Method::Get),
            1 => Some(Method::Post),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Method::Get => 0,
            Method::Post => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    /// `a=1&b=2`; appended to the query for GET, sent as the form body for POST.
    pub params: String,
    pub headers: Vec<String>,
    /// Zero means `DEFAULT_TIMEOUT_MS`.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub code: u16,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub data: String,
}

pub fn parse_headers(lines: &[String]) -> Result<HeaderMap> {
    if lines.len() > MAX_HEADER_COUNT {
        return Err(Error::argument(format!(
            "{} headers, at most {} allowed",
            lines.len(),
            MAX_HEADER_COUNT
        )));
    }
    let mut headers = HeaderMap::with_capacity(lines.len());
    for line in lines {
        if line.len() > MAX_HEADER_LEN {
            return Err(Error::argument(format!(
                "header of {} bytes, at most {} allowed",
                line.len(),
                MAX_HEADER_LEN
            )));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::argument(format!("malformed header {:?}", line)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(Error::argument)?;
        let value = HeaderValue::from_str(value.trim()).map_err(Error::argument)?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn target_url(url: &str, method: Method, params: &str) -> Result<Url> {
    let mut url = Url::parse(url).map_err(Error::argument)?;
    if method == Method::Get && !params.is_empty() {
        let query = match url.query() {
            Some(q) if !q.is_empty() => format!("{}&{}", q, params),
            _ => params.to_string(),
        };
        url.set_query(Some(&query));
    }
    Ok(url)
}

fn client(timeout_ms: u64) -> Result<Client> {
    let timeout = Duration::from_millis(if timeout_ms == 0 {
        DEFAULT_TIMEOUT_MS
    } else {
        timeout_ms
    });
    Ok(Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()?)
}

fn builder(req: &HttpRequest) -> Result<RequestBuilder> {
    let headers = parse_headers(&req.headers)?;
    let url = target_url(&req.url, req.method, &req.params)?;
    let client = client(req.timeout_ms)?;
    let builder = match req.method {
        Method::Get => client.get(url),
        Method::Post => client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(req.params.clone()),
    };
    Ok(builder.headers(headers))
}

/// Sends `req` and reads the whole body as text. Any status code counts as
/// a response; only transport failures are errors.
pub fn request(req: &HttpRequest) -> Result<HttpResponse> {
    debug!("http {:?} {}", req.method, req.url);
    let response = builder(req)?.send()?;
    let code = response.status().as_u16();
    let headers: BTreeMap<_, _> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let content_type = headers.get("content-type").cloned().unwrap_or_default();
    let data = response.text()?;
    debug!("http {} answered {} with {} bytes", req.url, code, data.len());
    Ok(HttpResponse {
        code,
        content_type,
        headers,
        data,
    })
}

/// Streams `url` into `path`, returning the number of bytes written.
pub fn download<P: AsRef<Path>>(url: &str, path: P, timeout_ms: u64) -> Result<u64> {
    let req = HttpRequest {
        url: url.to_string(),
        timeout_ms,
        ..Default::default()
    };
    let mut response = builder(&req)?.send()?.error_for_status()?;
    let mut file = File::create(path.as_ref())?;
    let written = response.copy_to(&mut file)?;
    info!("downloaded {} bytes from {} to {:?}", written, url, path.as_ref());
    Ok(written)
}
