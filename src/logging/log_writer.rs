use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

enum LogTask {
    Write(Vec<u8>),
    Flush,
    Reopen,
    Attach(PathBuf, File),
    Shutdown,
}

fn send(sender: &mpsc::Sender<LogTask>, task: LogTask) -> io::Result<()> {
    sender
        .try_send(task)
        .map_err(|_| io::Error::other("log channel is full or closed"))
}

pub struct Writer<'a> {
    sender: &'a mpsc::Sender<LogTask>,
}

impl Write for Writer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        send(self.sender, LogTask::Write(buf.to_vec()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        send(self.sender, LogTask::Flush)
    }
}

pub struct FileWriter {
    sender: mpsc::Sender<LogTask>,
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = Writer<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        Writer {
            sender: &self.sender,
        }
    }
}

/// Append-only log file written from a background task, so logging never
/// blocks a request on disk IO. `reopen` supports external rotation.
pub struct LogWriter {
    sender: mpsc::Sender<LogTask>,
}

impl LogWriter {
    pub fn new() -> (Self, JoinHandle<anyhow::Result<()>>) {
        let (sender, mut tasks) = mpsc::channel::<LogTask>(1024);
        let handle = tokio::spawn(async move {
            let mut target: Option<(PathBuf, File)> = None;
            while let Some(task) = tasks.recv().await {
                match task {
                    LogTask::Write(buf) => {
                        if let Some((_, file)) = target.as_mut() {
                            if let Err(err) = file.write_all(&buf) {
                                eprintln!("Failed to write to log file: {}", err);
                            }
                        }
                    }
                    LogTask::Flush => {
                        if let Some((_, file)) = target.as_mut() {
                            if let Err(err) = file.flush() {
                                eprintln!("Failed to flush log file: {}", err);
                            }
                        }
                    }
                    LogTask::Reopen => {
                        if let Some((path, file)) = target.as_mut() {
                            *file = Self::open(path)?;
                        }
                    }
                    LogTask::Attach(path, file) => target = Some((path, file)),
                    LogTask::Shutdown => break,
                }
            }
            if let Some((_, file)) = target.as_mut() {
                file.flush().ok();
            }
            Ok(())
        });
        (Self { sender }, handle)
    }

    fn open(path: &Path) -> anyhow::Result<File> {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("Failed to open log file '{path:?}'"))
    }

    pub fn create_file_writer(&self, path: impl AsRef<Path>) -> anyhow::Result<FileWriter> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;
        send(&self.sender, LogTask::Attach(path, file))?;
        Ok(FileWriter {
            sender: self.sender.clone(),
        })
    }

    /// Reopens the log file at its path, used after logrotate moved it away.
    pub fn reopen(&self) -> anyhow::Result<()> {
        send(&self.sender, LogTask::Reopen)?;
        Ok(())
    }

    pub fn shutdown(&self) {
        if send(&self.sender, LogTask::Shutdown).is_err() {
            eprintln!("Failed to stop log writer");
        }
    }
}
