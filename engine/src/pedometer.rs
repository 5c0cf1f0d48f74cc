use std::io;

use stride_core::StepLedger;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Report raw step counter values read one per line from `reader`.
///
/// Blank lines are ignored; lines that do not parse as a number are logged
/// and skipped. Returns the number of readings reported once the reader is
/// exhausted.
pub async fn feed_pedometer<R>(ledger: &StepLedger, reader: R) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut reported = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<f64>() {
            Ok(raw) => {
                ledger.report_pedometer(raw);
                reported += 1;
            }
            Err(e) => tracing::warn!(line, "Skipping unreadable pedometer value: {e}"),
        }
    }

    tracing::debug!(reported, "Pedometer input closed");
    Ok(reported)
}
