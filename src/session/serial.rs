use super::{OutputSink, Transport};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Raw-mode serial device transport (8N1, no flow control).
///
/// A dedicated thread reads the device and pushes into the sink; the
/// 100 ms read timeout lets it notice the shutdown flag. Writes run on
/// the blocking pool so callers never stall the async runtime.
pub struct SerialTransport {
    writer: Arc<Mutex<File>>,
    shutdown: Arc<AtomicBool>,
    eof: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32, sink: OutputSink) -> StorageResult<Self> {
        let speed = baud_constant(baud)?;

        // O_NONBLOCK so open does not hang on modem control lines;
        // cleared again once CLOCAL is set.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|err| {
                StorageError::connect(format!("Failed to open serial port {path}"))
                    .with_details(err.to_string())
            })?;
        let fd = file.as_raw_fd();

        configure_raw(fd, speed)?;

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags >= 0 {
            unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
        }

        let mut reader = file.try_clone().map_err(|err| {
            StorageError::connect("Failed to clone serial handle").with_details(err.to_string())
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let eof = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let eof_flag = eof.clone();
        let device = path.to_string();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
                match reader.read(&mut buf) {
                    // VTIME expired with nothing to read; poll again.
                    Ok(0) => continue,
                    Ok(n) => sink.push(&buf[..n]),
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::warn!(device = %device, error = %err, "Serial read failed");
                        break;
                    }
                }
            }
            eof_flag.store(true, Ordering::SeqCst);
            sink.mark_eof();
        });

        tracing::info!(device = %path, baud, "Serial port opened");
        Ok(Self {
            writer: Arc::new(Mutex::new(file)),
            shutdown,
            eof,
        })
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&self, data: &[u8]) -> StorageResult<usize> {
        let data = data.to_vec();
        let writer = self.writer.clone();

        tokio::task::spawn_blocking(move || -> StorageResult<usize> {
            let mut writer = writer.lock().expect("serial writer mutex poisoned");
            writer.write_all(&data).map_err(|err| {
                StorageError::transport("Serial write failed").with_details(err.to_string())
            })?;
            writer.flush().map_err(|err| {
                StorageError::transport("Serial flush failed").with_details(err.to_string())
            })?;
            Ok(data.len())
        })
        .await
        .map_err(|err| {
            StorageError::transport("Serial write task failed").with_details(err.to_string())
        })?
    }

    async fn close(&self) -> StorageResult<()> {
        // The reader thread exits within one VTIME tick; the device
        // handle closes when the last clone drops.
        self.shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }
}

fn configure_raw(fd: libc::c_int, speed: libc::speed_t) -> StorageResult<()> {
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(errno_error("tcgetattr failed"));
    }
    let mut termios = unsafe { termios.assume_init() };

    unsafe { libc::cfmakeraw(&mut termios) };
    termios.c_cflag |= libc::CLOCAL | libc::CREAD;
    termios.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
    termios.c_cflag &= !libc::CSIZE;
    termios.c_cflag |= libc::CS8;
    // Blocking reads return after 100 ms when no data arrived.
    termios.c_cc[libc::VMIN] = 0;
    termios.c_cc[libc::VTIME] = 1;

    unsafe {
        libc::cfsetispeed(&mut termios, speed);
        libc::cfsetospeed(&mut termios, speed);
    }
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(errno_error("tcsetattr failed"));
    }
    unsafe { libc::tcflush(fd, libc::TCIOFLUSH) };
    Ok(())
}

fn errno_error(message: &str) -> StorageError {
    StorageError::connect(message).with_details(std::io::Error::last_os_error().to_string())
}

fn baud_constant(baud: u32) -> StorageResult<libc::speed_t> {
    let speed = match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        921600 => libc::B921600,
        _ => {
            return Err(StorageError::config(format!(
                "Unsupported baud rate: {baud}"
            )));
        }
    };
    Ok(speed)
}
