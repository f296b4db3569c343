//! Dedicated thread owning a model.
//!
//! Callers never touch the model directly; they send closures to the host thread through a
//! channel and wait for the result. Forward passes are therefore serialised on one worker and
//! the model type only needs to be `Send`. A call that panics fails on its own; the host keeps
//! serving later calls.
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;

type BoxAny = Box<dyn Any + Send>;

struct Call<M> {
    f: Box<dyn FnOnce(&mut M) -> BoxAny + Send>,
    ret: crossbeam::channel::Sender<std::thread::Result<BoxAny>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    #[error("Model host thread has stopped")]
    Stopped,
    #[error("Model host returned an unexpected value")]
    UnexpectedReturn,
    #[error("Model call panicked: {0}")]
    Panicked(String),
}

pub struct ModelHost<M> {
    accessor: ModelAccessor<M>,
    abort_tx: crossbeam::channel::Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> ModelHost<M> {
    pub fn spawn(model: M) -> std::io::Result<Self> {
        let (abort_tx, abort_rx) = crossbeam::channel::bounded::<()>(1);
        let (tx, rx) = crossbeam::channel::unbounded::<Call<M>>();
        let join_handle = std::thread::Builder::new()
            .name("model-host".to_string())
            .spawn(move || {
                let mut model = model;
                loop {
                    crossbeam::channel::select! {
                        recv(rx) -> msg => match msg {
                            Ok(Call { f, ret }) => {
                                let result = catch_unwind(AssertUnwindSafe(|| f(&mut model)));
                                if let Err(payload) = &result {
                                    log::error!(
                                        "Model call panicked: {}",
                                        panic_message(&**payload)
                                    );
                                }
                                let _ = ret.send(result);
                            }
                            Err(_) => break,
                        },
                        recv(abort_rx) -> _ => break,
                    }
                }
                log::debug!("Model host thread exiting");
            })?;

        Ok(Self {
            accessor: ModelAccessor { tx },
            abort_tx,
            join_handle: Some(join_handle),
        })
    }

    pub fn accessor(&self) -> ModelAccessor<M> {
        self.accessor.clone()
    }

    /// Stops the host thread and waits for it to exit.
    pub fn shutdown(&mut self) {
        let _ = self.abort_tx.try_send(());
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                log::error!("Model host thread panicked");
            }
        }
    }
}

impl<M> std::ops::Deref for ModelHost<M> {
    type Target = ModelAccessor<M>;

    fn deref(&self) -> &Self::Target {
        &self.accessor
    }
}

impl<M> Drop for ModelHost<M> {
    fn drop(&mut self) {
        let _ = self.abort_tx.try_send(());
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Cloneable handle sending work to a [`ModelHost`].
pub struct ModelAccessor<M> {
    tx: crossbeam::channel::Sender<Call<M>>,
}

impl<M> Clone for ModelAccessor<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> Debug for ModelAccessor<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAccessor").finish_non_exhaustive()
    }
}

impl<M> ModelAccessor<M> {
    /// Runs `f` on the host thread and blocks until it returns.
    pub fn with<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut M) -> R + Send + 'static,
    ) -> Result<R, HostError> {
        let (ret_tx, ret_rx) = crossbeam::channel::bounded(1);
        self.tx
            .send(Call {
                f: Box::new(move |m| Box::new(f(m)) as BoxAny),
                ret: ret_tx,
            })
            .map_err(|_| HostError::Stopped)?;
        let ret = ret_rx
            .recv()
            .map_err(|_| HostError::Stopped)?
            .map_err(|payload| HostError::Panicked(panic_message(&*payload)))?;
        ret.downcast::<R>()
            .map(|r| *r)
            .map_err(|_| HostError::UnexpectedReturn)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_run_against_the_hosted_value() {
        let host = ModelHost::spawn(vec![1, 2, 3]).unwrap();

        host.with(|v| v.push(4)).unwrap();
        let sum = host.with(|v| v.iter().sum::<i32>()).unwrap();

        assert_eq!(sum, 10);
    }

    #[test]
    fn accessors_are_shared_across_threads() {
        let host = ModelHost::spawn(0_u64).unwrap();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let accessor = host.accessor();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        accessor.with(|count| *count += 1).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(host.with(|count| *count).unwrap(), 100);
    }

    #[test]
    fn a_panicking_call_leaves_the_host_running() {
        let host = ModelHost::spawn(vec![1, 2, 3]).unwrap();

        let err = host
            .with(|v: &mut Vec<i32>| -> usize { panic!("index {} out of range", v.len()) })
            .unwrap_err();
        assert_eq!(err, HostError::Panicked("index 3 out of range".to_string()));

        host.with(|v| v.push(4)).unwrap();
        assert_eq!(host.with(|v| v.len()).unwrap(), 4);
    }

    #[test]
    fn stopped_host_reports_an_error() {
        let mut host = ModelHost::spawn(String::from("model")).unwrap();
        let accessor = host.accessor();
        host.shutdown();

        assert_eq!(accessor.with(|m| m.len()), Err(HostError::Stopped));
    }
}
