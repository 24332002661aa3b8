//! Listener setup and the server entry point.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runtime::{EventLoop, UringDriver};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use tracing::{error, info};

/// A bound listener plus the ring that will serve it.
pub struct Server {
    listener: TcpListener,
    driver: UringDriver,
    config: Config,
}

impl Server {
    /// Bind the listening socket and set up io_uring.
    pub fn bind(config: &Config) -> Result<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address for host '{}'", config.host),
                ))
            })?;

        let listener = create_listener(addr, config.backlog)?;
        let driver = UringDriver::new(config.ring_size)?;

        Ok(Self {
            listener,
            driver,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a loop-fatal error occurs.
    pub fn run(self) -> Result<()> {
        let Server {
            listener,
            driver,
            config,
        } = self;

        info!(
            addr = %listener.local_addr()?,
            max_connections = config.max_connections,
            message_len = config.message_len,
            ring_size = config.ring_size,
            batch_size = config.batch_size,
            idle_timeout = ?config.idle_timeout,
            "Starting io_uring event loop"
        );

        // `listener` stays alive for the whole loop; the ring only holds its fd.
        let mut event_loop = EventLoop::new(driver, listener.as_raw_fd(), &config);
        let result = event_loop.run();

        let stats = event_loop.stats();
        if let Err(ref e) = result {
            error!(
                error = %e,
                accepted = stats.accepted,
                rejected = stats.rejected,
                closed = stats.closed,
                timed_out = stats.timed_out,
                echoed_bytes = stats.echoed_bytes,
                "Event loop stopped"
            );
        }
        result
    }
}

/// Create a blocking TCP listener with SO_REUSEADDR.
///
/// The socket is left blocking: io_uring polls it internally, while a
/// non-blocking listener would surface EAGAIN through accept completions.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}
