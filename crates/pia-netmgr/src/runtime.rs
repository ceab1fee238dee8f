// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-threaded event-loop host for NM's asynchronous object API.
//!
//! NetworkManager's API wants every call issued from, and every completion
//! delivered on, one thread. [`LoopRuntime`] owns that thread: a daemon-style
//! background thread running a current-thread executor. Callers from any
//! thread [`LoopRuntime::submit`] operations and await the returned
//! [`CompletionHandle`]. Awaiting a handle from the loop thread itself would
//! self-deadlock, so it is detected and rejected.

use std::future::Future;
use std::thread::ThreadId;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
	#[error("event loop initialization failed: {0}")]
	Init(String),

	#[error("event loop has shut down")]
	LoopGone,

	/// Programmer error: a completion handle was awaited on the loop thread.
	#[error("completion handle awaited from the event-loop thread")]
	SelfAwait,
}

type Job<C> = Box<dyn FnOnce(C) + Send>;

/// Handle to one submitted operation. Resolves at most once; consuming
/// `wait` enforces that statically.
pub struct CompletionHandle<T> {
	rx: oneshot::Receiver<T>,
	loop_thread: ThreadId,
}

impl<T> CompletionHandle<T> {
	/// Await the operation's result from any thread except the loop thread.
	pub async fn wait(self) -> Result<T, RuntimeError> {
		if std::thread::current().id() == self.loop_thread {
			return Err(RuntimeError::SelfAwait);
		}
		self.rx.await.map_err(|_| RuntimeError::LoopGone)
	}

	/// Block the calling thread until the operation resolves. Same
	/// restriction as [`CompletionHandle::wait`].
	pub fn wait_blocking(self) -> Result<T, RuntimeError> {
		if std::thread::current().id() == self.loop_thread {
			return Err(RuntimeError::SelfAwait);
		}
		self.rx.blocking_recv().map_err(|_| RuntimeError::LoopGone)
	}
}

/// The event-loop bridge, generic over the client value the loop owns (the
/// D-Bus connection in production, anything cheap in tests).
#[derive(Clone)]
pub struct LoopRuntime<C>
where
	C: Clone + Send + 'static,
{
	tx: mpsc::UnboundedSender<Job<C>>,
	thread_id: ThreadId,
}

impl<C> LoopRuntime<C>
where
	C: Clone + Send + 'static,
{
	/// Spawn the loop thread and construct the client on it. Blocks the
	/// caller until the client is ready (or construction failed). The
	/// thread is never joined; it ends when the process does or when the
	/// last sender is dropped.
	#[instrument(skip(factory))]
	pub fn start<F, Fut>(name: &str, factory: F) -> Result<Self, RuntimeError>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<C, RuntimeError>> + 'static,
	{
		let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job<C>>();
		let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<ThreadId, RuntimeError>>();

		std::thread::Builder::new()
			.name(name.to_string())
			.spawn(move || {
				let rt = match tokio::runtime::Builder::new_current_thread()
					.enable_all()
					.build()
				{
					Ok(rt) => rt,
					Err(e) => {
						let _ = ready_tx.send(Err(RuntimeError::Init(e.to_string())));
						return;
					}
				};

				let local = tokio::task::LocalSet::new();
				local.block_on(&rt, async move {
					let client = match factory().await {
						Ok(c) => c,
						Err(e) => {
							let _ = ready_tx.send(Err(e));
							return;
						}
					};

					let _ = ready_tx.send(Ok(std::thread::current().id()));
					debug!("event loop ready");

					while let Some(job) = job_rx.recv().await {
						job(client.clone());
					}

					debug!("event loop drained");
				});
			})
			.map_err(|e| RuntimeError::Init(e.to_string()))?;

		let thread_id = ready_rx.recv().map_err(|_| RuntimeError::LoopGone)??;
		Ok(Self {
			tx: job_tx,
			thread_id,
		})
	}

	/// Schedule `op` onto the loop. The returned handle is resolvable from
	/// any other thread. If the loop is gone, the handle resolves to
	/// [`RuntimeError::LoopGone`].
	pub fn submit<T, F, Fut>(&self, op: F) -> CompletionHandle<T>
	where
		T: Send + 'static,
		F: FnOnce(C) -> Fut + Send + 'static,
		Fut: Future<Output = T> + 'static,
	{
		let (tx, rx) = oneshot::channel();
		let job: Job<C> = Box::new(move |client| {
			tokio::task::spawn_local(async move {
				let _ = tx.send(op(client).await);
			});
		});

		// A failed send drops the job, which drops `tx`, which resolves the
		// handle to LoopGone.
		let _ = self.tx.send(job);

		CompletionHandle {
			rx,
			loop_thread: self.thread_id,
		}
	}

	pub fn thread_id(&self) -> ThreadId {
		self.thread_id
	}
}
