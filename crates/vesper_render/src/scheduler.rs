//! Render thread and submission queue.
//!
//! In [`ThreadModel::SingleThreaded`] every command executes on the calling
//! thread. In [`ThreadModel::SeparateRenderThread`] a dedicated OS thread
//! drains a bounded queue; producers block while the queue is full.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, error, info, warn};
use vesper_core::{Result, ServerError, ThreadModel};

use crate::server::ServerInner;

/// Work executed on the render thread, in submission order.
pub(crate) enum RenderCommand {
    Frame { swap_buffers: bool, frame_step: f64 },
    Call(Box<dyn FnOnce() + Send>),
    /// Answered once every earlier command has run.
    Sync(flume::Sender<()>),
    Shutdown,
}

impl std::fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame { swap_buffers, frame_step } => f
                .debug_struct("Frame")
                .field("swap_buffers", swap_buffers)
                .field("frame_step", frame_step)
                .finish(),
            Self::Call(_) => f.write_str("Call"),
            Self::Sync(_) => f.write_str("Sync"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

enum Mode {
    Inline,
    Threaded {
        sender: flume::Sender<RenderCommand>,
        handle: Option<JoinHandle<()>>,
    },
}

pub(crate) struct Scheduler {
    inner: Arc<ServerInner>,
    mode: Mode,
    render_thread: ThreadId,
}

impl Scheduler {
    pub fn start(inner: Arc<ServerInner>, model: ThreadModel, capacity: usize) -> Result<Self> {
        match model {
            ThreadModel::SingleThreaded => Ok(Self {
                inner,
                mode: Mode::Inline,
                render_thread: thread::current().id(),
            }),
            ThreadModel::SeparateRenderThread => {
                let (sender, receiver) = flume::bounded::<RenderCommand>(capacity.max(1));
                let worker = inner.clone();
                let handle = thread::Builder::new()
                    .name("vesper-render".into())
                    .spawn(move || {
                        debug!("render thread started");
                        while let Ok(cmd) = receiver.recv() {
                            if matches!(cmd, RenderCommand::Shutdown) {
                                break;
                            }
                            worker.execute(cmd);
                        }
                        debug!("render thread exited");
                    })
                    .map_err(|e| ServerError::Device(format!("failed to spawn render thread: {e}")))?;
                let render_thread = handle.thread().id();
                info!("render thread running, queue capacity {capacity}");
                Ok(Self {
                    inner,
                    mode: Mode::Threaded {
                        sender,
                        handle: Some(handle),
                    },
                    render_thread,
                })
            }
        }
    }

    pub fn is_on_render_thread(&self) -> bool {
        thread::current().id() == self.render_thread
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded { .. })
    }

    /// Queues `cmd`, or runs it directly when the caller already is the
    /// render thread (a render-thread producer must never wait on its own
    /// queue).
    pub fn submit(&self, cmd: RenderCommand) {
        match &self.mode {
            Mode::Threaded { sender, .. } if !self.is_on_render_thread() => {
                if let Err(err) = sender.send(cmd) {
                    error!("render thread is gone, dropped {:?}", err.into_inner());
                }
            }
            _ => self.inner.execute(cmd),
        }
    }

    /// Blocks until the render thread has drained everything queued so far.
    pub fn sync(&self) {
        if !self.is_threaded() || self.is_on_render_thread() {
            return;
        }
        let (tx, rx) = flume::bounded(1);
        self.submit(RenderCommand::Sync(tx));
        if rx.recv().is_err() {
            warn!("render thread exited before sync completed");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let on_render_thread = self.is_on_render_thread();
        if let Mode::Threaded { sender, handle } = &mut self.mode {
            if on_render_thread {
                // Dropped from a render-thread callback: the loop ends on its
                // own once the shutdown is drained or the sender disconnects.
                let _ = sender.try_send(RenderCommand::Shutdown);
                return;
            }
            let _ = sender.send(RenderCommand::Shutdown);
            if let Some(handle) = handle.take()
                && handle.join().is_err()
            {
                error!("render thread panicked");
            }
        }
    }
}
