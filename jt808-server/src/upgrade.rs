//! Firmware upgrade worker.
//!
//! Chunks a firmware image into 0x8108 packages and walks the terminal
//! through them one acknowledgement at a time. Runs inside the terminal's
//! connection task, so the socket is exclusively owned for the duration.

use crate::connection::Connection;
use crate::error::ServerError;
use crate::registry::PendingUpgrade;
use jt808_protocol::message::{Downlink, UpgradePackage};
use jt808_protocol::{Fragment, DOWN_UPGRADE_PACKAGE};
use std::time::Duration;

/// Fixed 0x8108 body overhead ahead of the data: type, manufacturer id,
/// version length byte and the data length word.
const PACKAGE_OVERHEAD: usize = 11;

/// Largest logical body a frame can carry.
const MAX_FRAME_BODY: usize = 1023;

/// Pause between packages so the terminal can commit each chunk to flash.
const INTER_PACKAGE_DELAY: Duration = Duration::from_millis(1);

/// Bytes of firmware data that fit into one package.
pub fn max_chunk(version_len: usize) -> usize {
    MAX_FRAME_BODY - PACKAGE_OVERHEAD - version_len
}

/// Number of packages needed for a firmware image.
pub fn packet_count(file_len: usize, chunk: usize) -> u16 {
    (file_len.div_ceil(chunk)).max(1) as u16
}

/// Streams the firmware file to the terminal.
pub async fn run(
    conn: &mut Connection,
    job: &PendingUpgrade,
    manufacturer_id: [u8; 5],
) -> Result<(), ServerError> {
    let data = tokio::fs::read(&job.file_path).await.map_err(|e| {
        tracing::error!(
            path = %job.file_path.display(),
            error = %e,
            "cannot read firmware image"
        );
        ServerError::UpgradeAborted
    })?;

    let chunk = max_chunk(job.version.len());
    let total = packet_count(data.len(), chunk);
    tracing::info!(
        terminal = %conn.phone(),
        version = %job.version,
        bytes = data.len(),
        packages = total,
        "starting firmware upgrade"
    );

    for (offset, piece) in data.chunks(chunk).enumerate() {
        let index = offset as u16 + 1;
        let package = Downlink::UpgradePackage(UpgradePackage {
            upgrade_type: job.upgrade_type,
            manufacturer_id,
            version: job.version.clone(),
            data: piece.to_vec(),
            part: Fragment { total, index },
        });
        conn.send(&package).await?;
        conn.await_unified(DOWN_UPGRADE_PACKAGE).await?;
        tracing::debug!(terminal = %conn.phone(), index, total, "package acknowledged");
        tokio::time::sleep(INTER_PACKAGE_DELAY).await;
    }

    tracing::info!(terminal = %conn.phone(), "firmware transfer complete");
    Ok(())
}
