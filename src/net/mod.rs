mod frame;
mod transport;

pub use frame::{Frame, FrameReader, TERMINATOR, encode};
pub use transport::{
    Connector, DEFAULT_READ_SIZE, Endpoint, TcpConnector, TcpTransport, Transport,
};
