//! Local HTTP hosts standing in for remote documents.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use tokio::runtime::Runtime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A mock document host. Owns the runtime its mocks are mounted from.
///
/// Fields drop in declaration order, so the server goes before the runtime.
pub struct DocumentHost {
    server: MockServer,
    runtime: Runtime,
}

impl DocumentHost {
    pub fn start() -> Self {
        let runtime = Runtime::new().expect("Failed to start runtime");
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    /// Serves `body` at `route` and returns its URL. Responses carry a
    /// Content-Length, plus a Content-Type when `content_type` is given.
    pub fn serve(&self, route: &str, content_type: Option<&str>, body: &[u8]) -> String {
        let response = match content_type {
            Some(mime) => ResponseTemplate::new(200).set_body_raw(body.to_vec(), mime),
            None => ResponseTemplate::new(200).set_body_bytes(body.to_vec()),
        };
        self.runtime.block_on(
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(response)
                .mount(&self.server),
        );
        format!("{}{}", self.server.uri(), route)
    }

    pub fn request_count(&self) -> usize {
        self.runtime
            .block_on(self.server.received_requests())
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}

/// Answers one request with a body that has no Content-Length. The body
/// ends when the connection closes.
pub fn serve_unframed(route: &str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Listener has no address");

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        // The client hangs up early once it has read past its limit.
        let _ = stream.write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n",
        );
        let _ = stream.write_all(&body);
    });

    format!("http://{}{}", addr, route)
}
