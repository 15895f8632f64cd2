use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
	#[error("failed to bind relay server to {addr}")]
	Bind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	#[error("relay server error: {0}")]
	Server(#[source] std::io::Error),
}
