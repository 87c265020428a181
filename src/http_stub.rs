//! Loopback HTTP server that answers each connection with the next canned reply.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use reqwest::blocking::Client;

pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

pub fn reply(status: u16, body: &str) -> Reply {
    Reply { status, headers: Vec::new(), body: body.to_owned() }
}

impl Reply {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
}

/// A request as the server received it.
#[derive(Debug)]
pub struct Seen {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

pub struct Server {
    pub url: String,
    handle: JoinHandle<Vec<Seen>>,
}

impl Server {
    /// Waits for every reply to be served and returns the requests in order.
    pub fn finish(self) -> Vec<Seen> {
        self.handle.join().unwrap()
    }
}

/// Client that never goes through a proxy set in the environment.
pub fn client() -> Client {
    Client::builder().no_proxy().build().unwrap()
}

pub fn serve(replies: Vec<Reply>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for r in replies {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut BufReader::new(stream.try_clone().unwrap()));
            let head_only = request.request_line.starts_with("HEAD ");

            let mut out = format!("HTTP/1.1 {} Stub\r\nConnection: close\r\n", r.status);
            for (name, value) in &r.headers {
                out.push_str(&format!("{name}: {value}\r\n"));
            }
            if head_only {
                out.push_str("Content-Length: 0\r\n\r\n");
            } else {
                out.push_str(&format!("Content-Type: application/json\r\nContent-Length: {}\r\n\r\n", r.body.len()));
                out.push_str(&r.body);
            }
            stream.write_all(out.as_bytes()).unwrap();
            stream.flush().unwrap();
            seen.push(request);
        }
        seen
    });
    Server { url, handle }
}

fn read_request<R: BufRead>(reader: &mut R) -> Seen {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).unwrap();

    Seen { request_line: request_line.trim_end().to_owned(), headers, body: String::from_utf8(body).unwrap() }
}
