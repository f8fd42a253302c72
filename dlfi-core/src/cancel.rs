//! Cancellation signal for long-running operations:
//! export, bulk delete, and encryption rekey accept a `CancellationToken`
//! and commit their work in transactional chunks, returning `Cancelled`
//! after the current chunk completes rather than aborting mid-chunk.

use crate::error::{DlfiError, Result};
use tokio_util::sync::CancellationToken;

pub use tokio_util::sync::CancellationToken as Cancellation;

/// Check `token` between chunks; `Err(Cancelled)` once tripped.
pub fn check(token: &CancellationToken) -> Result<()> {
	if token.is_cancelled() {
		Err(DlfiError::Cancelled)
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn check_is_ok_until_cancelled() {
		let token = CancellationToken::new();
		assert!(check(&token).is_ok());
		token.cancel();
		assert!(matches!(check(&token), Err(DlfiError::Cancelled)));
	}
}
