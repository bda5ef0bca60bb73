use std::sync::Arc;
use std::time::Duration;
use log::debug;
use tokio::time::timeout;

use crate::device::constants::SCAN_GRACE;
use crate::device::transport::Transport;
use crate::error::ScanError;

/// Resolves advertised names to addresses. Each call is exactly one bounded attempt;
/// retrying is up to the caller.
pub struct Scanner<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for Scanner<T> {
    fn clone(&self) -> Self {
        Scanner { transport: self.transport.clone() }
    }
}

impl<T: Transport> Scanner<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Scanner { transport }
    }

    pub async fn find(&self, name: &str, window: Duration) -> Result<T::Address, ScanError> {
        let deadline = window + Duration::from_millis(SCAN_GRACE);

        match timeout(deadline, self.transport.find(name, window)).await {
            Err(_) => {
                debug!("Scan for {} did not return within {:?}", name, deadline);
                Err(ScanError::Timeout)
            },
            Ok(Err(source)) => Err(ScanError::Transport { source }),
            Ok(Ok(None)) => Err(ScanError::NotFound),
            Ok(Ok(Some(address))) => Ok(address),
        }
    }
}
