//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub peer: PeerConfig,
    pub swarm: SwarmConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

/// Per-connection wire protocol configuration.
///
/// Controls connect backoff, handshake deadlines, block pipelining and the
/// timeouts applied to every blocking socket operation.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// BitTorrent client identifier prefix for generated peer ids
    pub client_id: &'static str,
    /// Size of a single block request
    pub block_size: u32,
    /// First connect attempt timeout, doubled on every retry
    pub connect_initial_timeout: Duration,
    /// Connect attempts stop once the doubled timeout would exceed this
    pub connect_max_timeout: Duration,
    /// Deadline for each handshake write attempt and for the handshake read
    pub handshake_timeout: Duration,
    /// Attempts per outbound frame before the write is considered failed
    pub max_send_attempts: u32,
    /// Wall-clock deadline covering a whole piece transfer
    pub piece_timeout: Duration,
    /// Connection is dropped after this long without any inbound frame
    pub idle_timeout: Duration,
    /// Keep-alive is sent after this long without any outbound frame
    pub keep_alive_interval: Duration,
    /// Largest frame body accepted from a peer
    pub max_frame_length: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            client_id: "-UT0001-",
            block_size: 16384, // 16 KiB
            connect_initial_timeout: Duration::from_secs(10),
            connect_max_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(5),
            max_send_attempts: 10,
            piece_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            keep_alive_interval: Duration::from_secs(120),
            max_frame_length: 1 << 20, // 1 MiB
        }
    }
}

/// Swarm coordination configuration.
///
/// Controls the orchestrator timers, the inbound listener and channel sizing.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Period of the optimistic unchoke timer
    pub optimistic_unchoke_interval: Duration,
    /// TCP port accepting inbound peers and announced to trackers
    pub listen_port: u16,
    /// Capacity of the upload request stream
    pub upload_queue_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            optimistic_unchoke_interval: Duration::from_secs(31),
            listen_port: 6881,
            upload_queue_capacity: 256,
        }
    }
}

/// Tracker communication configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// HTTP request timeout for tracker communication
    pub tracker_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tracker_timeout: Duration::from_secs(5),
            user_agent: "undertow/0.1.0",
        }
    }
}

/// Content store and progress persistence configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the content blob, the progress file and the final layout
    pub download_dir: PathBuf,
    /// Suffix of the content blob file
    pub blob_suffix: &'static str,
    /// Suffix of the persisted progress bitfield file
    pub bitfield_suffix: &'static str,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            blob_suffix: ".blob",
            bitfield_suffix: ".bitfield",
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("UNDERTOW_TRACKER_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.network.tracker_timeout = Duration::from_secs(seconds);
        }

        if let Ok(timeout) = std::env::var("UNDERTOW_PIECE_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.peer.piece_timeout = Duration::from_secs(seconds);
        }

        if let Ok(port) = std::env::var("UNDERTOW_LISTEN_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.swarm.listen_port = port;
        }

        if let Ok(block_size) = std::env::var("UNDERTOW_BLOCK_SIZE")
            && let Ok(size) = block_size.parse::<u32>()
            && size > 0
        {
            config.peer.block_size = size;
        }

        if let Ok(dir) = std::env::var("UNDERTOW_DOWNLOAD_DIR") {
            config.storage.download_dir = PathBuf::from(dir);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Shrinks every timeout so failure paths resolve in milliseconds.
    pub fn for_testing() -> Self {
        Self {
            peer: PeerConfig {
                connect_initial_timeout: Duration::from_millis(100),
                connect_max_timeout: Duration::from_millis(400),
                handshake_timeout: Duration::from_secs(2),
                piece_timeout: Duration::from_secs(5),
                idle_timeout: Duration::from_secs(10),
                keep_alive_interval: Duration::from_secs(5),
                ..Default::default()
            },
            swarm: SwarmConfig {
                optimistic_unchoke_interval: Duration::from_millis(200),
                listen_port: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.peer.client_id, "-UT0001-");
        assert_eq!(config.peer.block_size, 16384);
        assert_eq!(config.peer.connect_initial_timeout, Duration::from_secs(10));
        assert_eq!(config.peer.connect_max_timeout, Duration::from_secs(60));
        assert_eq!(config.peer.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.peer.max_send_attempts, 10);
        assert_eq!(config.peer.piece_timeout, Duration::from_secs(30));
        assert_eq!(
            config.swarm.optimistic_unchoke_interval,
            Duration::from_secs(31)
        );
        assert_eq!(config.storage.bitfield_suffix, ".bitfield");
    }

    #[test]
    fn test_testing_preset_shortens_timeouts() {
        let config = UndertowConfig::for_testing();
        let defaults = UndertowConfig::default();

        assert!(config.peer.connect_initial_timeout < defaults.peer.connect_initial_timeout);
        assert!(config.peer.piece_timeout < defaults.peer.piece_timeout);
        assert_eq!(config.swarm.listen_port, 0);
        assert_eq!(config.peer.block_size, defaults.peer.block_size);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("UNDERTOW_TRACKER_TIMEOUT", "60");
            std::env::set_var("UNDERTOW_LISTEN_PORT", "7000");
            std::env::set_var("UNDERTOW_BLOCK_SIZE", "0");
        }

        let config = UndertowConfig::from_env();

        assert_eq!(config.network.tracker_timeout, Duration::from_secs(60));
        assert_eq!(config.swarm.listen_port, 7000);
        // Zero block size is rejected and the default kept
        assert_eq!(config.peer.block_size, 16384);

        unsafe {
            std::env::remove_var("UNDERTOW_TRACKER_TIMEOUT");
            std::env::remove_var("UNDERTOW_LISTEN_PORT");
            std::env::remove_var("UNDERTOW_BLOCK_SIZE");
        }
    }
}
