//! Raw connection management: stream wrapper and candidate dialing.

mod establish;
mod stream;

pub use establish::{Connect, TcpConnector, establish};
pub use stream::{AsyncStream, BoxedStream, MAX_LINE_LENGTH, SmtpStream};
