use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::Result;

const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// How long to collect unicast answers after one M-SEARCH. MX is 1, so
/// compliant devices answer within a second; the extra second absorbs slow
/// responders.
const RESPONSE_WINDOW: Duration = Duration::from_secs(2);

/// One parsed M-SEARCH answer
#[derive(Debug, Clone)]
pub(crate) struct SsdpResponse {
    pub status: u16,
    pub location: Option<String>,
    pub st: Option<String>,
    pub usn: Option<String>,
}

fn build_msearch(target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 1\r\n\
         ST: {target}\r\n\r\n"
    )
}

/// Send one multicast M-SEARCH for `target` and collect every answer that
/// arrives within the response window. Devices reply unicast to the sending
/// socket, so the same socket is used for send and receive.
pub(crate) async fn search(target: &str) -> Result<Vec<SsdpResponse>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .send_to(build_msearch(target).as_bytes(), SSDP_MULTICAST_ADDR)
        .await?;

    let mut responses = Vec::new();
    let mut buf = [0u8; 2048];
    let start = Instant::now();

    while start.elapsed() < RESPONSE_WINDOW {
        let remaining = RESPONSE_WINDOW.saturating_sub(start.elapsed());
        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, src))) => {
                let text = String::from_utf8_lossy(&buf[..len]);
                match parse_response(&text) {
                    Some(response) => {
                        tracing::debug!("SSDP response from {}: {:?}", src, response);
                        responses.push(response);
                    }
                    None => {
                        tracing::debug!("Ignoring malformed SSDP datagram from {}", src);
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("SSDP receive error: {}", e);
            }
            Err(_) => break,
        }
    }

    Ok(responses)
}

/// Parse the HTTP-style search response. Header names are matched
/// case-insensitively; some devices send them lowercase.
fn parse_response(text: &str) -> Option<SsdpResponse> {
    let mut lines = text.lines();
    let status_line = lines.next()?;
    if !status_line.starts_with("HTTP/") {
        return None;
    }
    let status: u16 = status_line.split_whitespace().nth(1)?.parse().ok()?;

    let mut response = SsdpResponse {
        status,
        location: None,
        st: None,
        usn: None,
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let name = name.trim();
        if name.eq_ignore_ascii_case("location") {
            response.location = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("st") {
            response.st = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("usn") {
            response.usn = Some(value.to_string());
        }
    }
    Some(response)
}
