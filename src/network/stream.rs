//! Client connection handle as seen by the slot table

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

/// A blocking, bidirectional connection to one producer client
pub trait ClientStream: Read + Write + Send {
    /// Human-readable peer identity for logs
    fn peer(&self) -> String;

    /// Close the connection. Dropping the stream must also close it.
    fn close(&mut self) {}
}

impl ClientStream for TcpStream {
    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

impl<T: ClientStream + ?Sized> ClientStream for Box<T> {
    fn peer(&self) -> String {
        (**self).peer()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
