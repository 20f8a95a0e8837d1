//! ABOUTME: Converts external termination signals into cooperative cancellation
//! ABOUTME: Installed once at process startup; the run loop checks it every iteration

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Installs a ctrl-c and (on unix) SIGTERM listener wired to a shared
/// `CancellationToken`. The listeners live for the process, but since the
/// run loop only checks/races the token during step 4, the effect matches
/// "installed only for the duration of the job body".
pub fn install() -> CancellationToken {
    let token = CancellationToken::new();

    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, requesting termination");
            ctrl_c_token.cancel();
        }
    });

    #[cfg(unix)]
    {
        let sigterm_token = token.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM, requesting termination");
                    sigterm_token.cancel();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                }
            }
        });
    }

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_starts_uncancelled() {
        let token = install();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_manual_cancel_propagates() {
        let token = CancellationToken::new();
        let child = token.child_token();
        token.cancel();
        assert!(child.is_cancelled());
    }
}
