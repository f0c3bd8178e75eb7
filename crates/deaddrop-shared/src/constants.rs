/// Application name, used as the namespace prefix by storage drivers
pub const APP_NAME: &str = "deaddrop";

/// Directory (relative to a contact id) holding offline chat messages
pub const OFFLINE_DIR: &str = "conversations/offline";

/// File extension of an offline chat message blob
pub const OFFLINE_MSG_EXT: &str = "cm";

/// Extension separator for backends that accept dots in keys
pub const EXT_SEP: char = '.';

/// Extension separator for backends that reject dots in keys
pub const EXT_SEP_DOT_FREE: char = '_';

/// Reserved file name of the presence artifact
pub const HEARTBEAT_FILE_NAME: &str = "hb.sesj";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// X25519 key size in bytes (public and secret)
pub const KEY_SIZE: usize = 32;

/// Version tag carried by sealed envelopes
pub const SEALED_ENVELOPE_VERSION: u8 = 1;

/// Key derivation context (BLAKE3) for sealed envelopes
pub const KDF_CONTEXT_SEALED_BOX: &str = "deaddrop-sealed-box-v1";

/// Default loop intervals in seconds
pub const DEFAULT_SEND_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_RECV_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_BEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Capacity of each notification broadcast channel
pub const DEFAULT_NOTIFY_CAPACITY: usize = 64;
