//! HTTP tracker client with URL building and response parsing

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;

use super::types::{AnnounceRequest, AnnounceResponse, TrackerClient};
use crate::config::NetworkConfig;
use crate::torrent::TorrentError;

/// HTTP tracker client implementation
pub struct HttpTrackerClient {
    announce_url: String,
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates an HTTP tracker client using the configured timeout and user agent.
    ///
    /// # Errors
    /// - `TorrentError::UrlParsing` - Announce URL is not a valid URL
    /// - `TorrentError::Http` - HTTP client could not be built
    pub fn new(announce_url: String, config: &NetworkConfig) -> Result<Self, TorrentError> {
        url::Url::parse(&announce_url)?;

        let client = reqwest::Client::builder()
            .timeout(config.tracker_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;

        Ok(Self {
            announce_url,
            client,
        })
    }

    /// Builds the announce URL with a manually encoded query.
    ///
    /// Hash and peer id are raw bytes and must not pass through a string
    /// encoder, which would double-encode them.
    pub(super) fn build_announce_url(&self, request: &AnnounceRequest) -> String {
        let separator = if self.announce_url.contains('?') {
            '&'
        } else {
            '?'
        };

        format!(
            "{}{separator}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.announce_url,
            Self::url_encode_bytes(request.info_hash.as_bytes()),
            Self::url_encode_bytes(&request.peer_id),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
        )
    }

    /// URL encode every byte for tracker communication.
    pub(crate) fn url_encode_bytes(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| format!("%{b:02X}")).collect()
    }

    /// Parses compact peer records: 4-byte IPv4 address, 2-byte port.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Data length is not a multiple of 6
    pub(crate) fn parse_compact_peers(peer_bytes: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
        if !peer_bytes.len().is_multiple_of(6) {
            return Err(TorrentError::ProtocolError {
                message: format!("Invalid compact peer data length {}", peer_bytes.len()),
            });
        }

        Ok(peer_bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            })
            .collect())
    }

    /// Parses a bencoded announce response.
    ///
    /// # Errors
    /// - `TorrentError::TrackerRejected` - Response carries a failure reason
    /// - `TorrentError::ProtocolError` - Malformed response or peer list
    pub(super) fn parse_announce_response(
        response_bytes: &[u8],
    ) -> Result<AnnounceResponse, TorrentError> {
        let parsed =
            bencode_rs::Value::parse(response_bytes).map_err(|e| TorrentError::ProtocolError {
                message: format!("Failed to parse tracker response: {e:?}"),
            })?;

        let Some(bencode_rs::Value::Dictionary(dict)) = parsed.first() else {
            return Err(TorrentError::ProtocolError {
                message: "Invalid tracker response format".to_string(),
            });
        };

        if let Some(bencode_rs::Value::Bytes(reason)) = dict.get(b"failure reason".as_slice()) {
            return Err(TorrentError::TrackerRejected {
                reason: String::from_utf8_lossy(reason).to_string(),
            });
        }

        let integer = |key: &[u8]| match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) => u32::try_from(*value).ok(),
            _ => None,
        };

        let peers = match dict.get(b"peers".as_slice()) {
            Some(bencode_rs::Value::Bytes(peer_data)) => Self::parse_compact_peers(peer_data)?,
            _ => Vec::new(),
        };

        Ok(AnnounceResponse {
            interval: integer(b"interval".as_slice()).unwrap_or(0),
            complete: integer(b"complete".as_slice()).unwrap_or(0),
            incomplete: integer(b"incomplete".as_slice()).unwrap_or(0),
            peers,
        })
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TorrentError> {
        let url = self.build_announce_url(&request);
        tracing::debug!(tracker = %self.announce_url, "Announcing to tracker");

        let response = self.client.get(&url).send().await.map_err(|e| {
            tracing::warn!(tracker = %self.announce_url, error = %e, "Tracker request failed");
            TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(tracker = %self.announce_url, %status, "Tracker returned error status");
            return Err(TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            tracing::warn!(tracker = %self.announce_url, error = %e, "Failed to read tracker response");
            TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            }
        })?;

        let parsed = Self::parse_announce_response(&body)?;
        tracing::debug!(
            tracker = %self.announce_url,
            peers = parsed.peers.len(),
            interval = parsed.interval,
            "Tracker responded"
        );
        Ok(parsed)
    }

    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::torrent::InfoHash;

    fn request() -> AnnounceRequest {
        AnnounceRequest {
            info_hash: InfoHash::new([0x11; 20]),
            peer_id: [0x22; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 2000,
        }
    }

    #[test]
    fn test_build_announce_url() {
        let client = HttpTrackerClient::new(
            "http://tracker.example.com/announce".to_string(),
            &NetworkConfig::default(),
        )
        .unwrap();

        let url = client.build_announce_url(&request());
        assert!(url.starts_with("http://tracker.example.com/announce?info_hash="));
        assert!(url.contains(&format!("info_hash={}", "%11".repeat(20))));
        assert!(url.contains(&format!("peer_id={}", "%22".repeat(20))));
        assert!(url.contains("port=6881"));
        assert!(url.contains("left=2000"));
        assert!(url.ends_with("compact=1"));
    }

    #[test]
    fn test_invalid_announce_url_rejected() {
        let result = HttpTrackerClient::new("not a url".to_string(), &NetworkConfig::default());
        assert!(matches!(result, Err(TorrentError::UrlParsing(_))));
    }

    #[test]
    fn test_parse_compact_peers() {
        let peer_bytes = [127, 0, 0, 1, 26, 225, 192, 168, 1, 100, 195, 80];
        let peers = HttpTrackerClient::parse_compact_peers(&peer_bytes).unwrap();
        assert_eq!(peers[0].to_string(), "127.0.0.1:6881");
        assert_eq!(peers[1].to_string(), "192.168.1.100:50000");

        assert!(HttpTrackerClient::parse_compact_peers(&peer_bytes[..5]).is_err());
    }

    #[test]
    fn test_parse_failure_reason() {
        let result = HttpTrackerClient::parse_announce_response(b"d14:failure reason5:errore");
        assert!(matches!(
            result,
            Err(TorrentError::TrackerRejected { reason }) if reason == "error"
        ));
    }

    #[tokio::test]
    async fn test_announce_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();

            let body = b"d8:intervali900e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
        });

        let client = HttpTrackerClient::new(
            format!("http://{address}/announce"),
            &NetworkConfig::default(),
        )
        .unwrap();
        let response = client.announce(request()).await.unwrap();

        assert_eq!(response.interval, 900);
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
    }
}
