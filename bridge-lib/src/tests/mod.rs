use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Once;
use std::thread::{self, JoinHandle};

use lazy_static::lazy_static;
use tempfile::TempDir;

use crate::types::BridgeConfig;

mod codec;
mod json;

lazy_static! {
    static ref ROOT: TempDir = tempfile::tempdir().unwrap();
}

static INIT: Once = Once::new();

/// Initializes the library once for the whole test binary.
pub(crate) fn ensure_init() {
    INIT.call_once(|| {
        let mut config = BridgeConfig::with_root(ROOT.path());
        config.log.level = 5;
        crate::lifecycle::init(config).unwrap();
    });
}

pub(crate) fn root_config() -> BridgeConfig {
    BridgeConfig::with_root(ROOT.path())
}

/// Deterministic bytes mixing repeated text with noise, so both the
/// literal and the match paths of the deflater get exercised.
pub(crate) fn payload(len: usize, seed: u64) -> Vec<u8> {
    let text = b"native bridge payload; ";
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..len)
        .map(|i| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            if (state >> 61) == 0 {
                (state >> 33) as u8
            } else {
                text[i % text.len()]
            }
        })
        .collect()
}

#[test]
fn test_second_init_is_rejected() {
    ensure_init();
    assert!(matches!(
        crate::lifecycle::init(root_config()),
        Err(crate::Error::AlreadyInitialized)
    ));
    assert!(crate::lifecycle::is_ready());
    assert_eq!(
        crate::lifecycle::config().unwrap().store.path,
        ROOT.path().to_path_buf()
    );
}

/// Answers one HTTP connection with `reply` and hands back the request,
/// head and body.
pub(crate) fn serve_once(reply: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        let mut expected = None;
        loop {
            if expected.is_none() {
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                    let body_len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .map_or(0, |v| v.trim().parse::<usize>().unwrap());
                    expected = Some(end + 4 + body_len);
                }
            }
            if matches!(expected, Some(total) if request.len() >= total) {
                break;
            }
            let n = socket.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(reply.as_bytes()).unwrap();
        String::from_utf8_lossy(&request).into_owned()
    });
    (base, server)
}
