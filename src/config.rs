pub mod postgres {
    use tokio::time::{Duration};

    pub const WAIT_FOR: Duration = Duration::from_secs(5);
    pub const MAX_CONNECTIONS: u32 = 20;
}

pub mod server {
    pub const READ_CHUNK_BYTES: usize = 4096;
    pub const OUTBOUND_QUEUE: usize = 16;
}

pub mod framing {
    pub const DEFAULT_DELIMITER: &[u8] = b"\n";
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;
}

pub mod commands {
    use tokio::time::{Duration};

    pub const QUEUE: usize = 200;
    pub const FIRMWARE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
    pub const FIRMWARE_CHUNK_BYTES: usize = 1024;
    pub const REPORTING_INTERVAL_MIN_SECS: i64 = 60;
    pub const REPORTING_INTERVAL_MAX_SECS: i64 = 86400;
}
