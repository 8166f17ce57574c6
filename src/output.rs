//! Payload delivery to stdout
//!
//! Payloads are copied as opaque bytes. When the reader of our stdout goes
//! away early (`runcached cmd | head -1`) the copy stops, stdout is pointed
//! at `/dev/null` so later writes cannot fail again, and the caller gets
//! [`RuncachedError::BrokenOutput`] to pick its exit code.

use crate::error::{RuncachedError, RuncachedResult};
use std::io;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Copy the payload file to this process's stdout
pub async fn deliver(payload: &Path) -> RuncachedResult<u64> {
    let mut stdout = tokio::io::stdout();
    let result = deliver_to(payload, &mut stdout).await;
    if matches!(result, Err(RuncachedError::BrokenOutput)) {
        silence_stdout();
    }
    result
}

/// Copy the payload file into `out`, flushing at the end
///
/// The flush is inside the copy so a broken pipe is reported here rather
/// than at exit.
pub async fn deliver_to<W>(payload: &Path, out: &mut W) -> RuncachedResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(payload)
        .await
        .map_err(|e| RuncachedError::io(format!("opening {}", payload.display()), e))?;

    let copied = tokio::io::copy(&mut file, out)
        .await
        .map_err(|e| output_error(e, payload))?;
    out.flush().await.map_err(|e| output_error(e, payload))?;

    debug!("Delivered {} bytes from {}", copied, payload.display());
    Ok(copied)
}

fn output_error(e: io::Error, payload: &Path) -> RuncachedError {
    if e.kind() == io::ErrorKind::BrokenPipe {
        debug!("Output consumer went away");
        return RuncachedError::BrokenOutput;
    }
    RuncachedError::io(format!("delivering {}", payload.display()), e)
}

/// Point fd 1 at /dev/null so buffered writes at shutdown go nowhere
fn silence_stdout() {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        if let Ok(devnull) = std::fs::OpenOptions::new().write(true).open("/dev/null") {
            unsafe {
                libc::dup2(devnull.as_raw_fd(), libc::STDOUT_FILENO);
            }
        }
    }
}
