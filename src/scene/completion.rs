//! One-shot completion signals handed back to callers of the scene API.
//!
//! The command keeps the `Completion` and signals it from the consumer
//! thread; the caller waits on the `CompletionHandle` from its own thread.
//! Dropping a command without signalling wakes the waiter with
//! `SchedulerError::Abandoned`.

use std::time::Duration;

use tokio::runtime;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::SchedulerError;

#[derive(Debug)]
pub struct Completion<T> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T> Completion<T> {
    pub fn channel() -> (Completion<T>, CompletionHandle<T>) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx: Some(tx) }, CompletionHandle { rx })
    }

    /// Delivers the result. Returns false if already signalled or nobody is waiting.
    pub fn signal(&mut self, value: T) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.tx.is_none()
    }
}

#[derive(Debug)]
pub struct CompletionHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> CompletionHandle<T> {
    /// Blocks the calling thread until the command signals or is dropped.
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<T, SchedulerError> {
        self.rx.blocking_recv().map_err(|_| SchedulerError::Abandoned)
    }

    /// Like [`CompletionHandle::wait`], giving up after `timeout`. The handle
    /// stays usable after a timeout.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<T, SchedulerError> {
        let waiter = runtime::Builder::new_current_thread().enable_time().build()?;
        match waiter.block_on(tokio::time::timeout(timeout, &mut self.rx)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(SchedulerError::Abandoned),
            Err(_) => Err(SchedulerError::Timeout),
        }
    }

    /// Returns the result if it has arrived, without blocking.
    pub fn try_take(&mut self) -> Result<Option<T>, SchedulerError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(SchedulerError::Abandoned),
        }
    }

    pub async fn recv(self) -> Result<T, SchedulerError> {
        self.rx.await.map_err(|_| SchedulerError::Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_once() {
        let (mut completion, mut handle) = Completion::channel();
        assert_eq!(handle.try_take().unwrap(), None);
        assert!(completion.signal(5));
        assert!(!completion.signal(6));
        assert!(completion.is_signalled());
        assert_eq!(handle.try_take().unwrap(), Some(5));
    }

    #[test]
    fn test_dropped_completion_abandons_waiter() {
        let (completion, handle) = Completion::<u32>::channel();
        let waiter = std::thread::spawn(move || handle.wait());
        drop(completion);
        assert!(matches!(waiter.join().unwrap(), Err(SchedulerError::Abandoned)));
    }

    #[test]
    fn test_wait_timeout() {
        let (_completion, mut handle) = Completion::<u32>::channel();
        let err = handle.wait_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout));
    }

    #[test]
    fn test_wait_timeout_wakes_on_late_signal() {
        let (mut completion, mut handle) = Completion::channel();
        assert!(matches!(
            handle.wait_timeout(Duration::from_millis(1)),
            Err(SchedulerError::Timeout)
        ));
        let signaller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completion.signal(7u32)
        });
        assert_eq!(handle.wait_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert!(signaller.join().unwrap());
    }

    #[test]
    fn test_wait_timeout_reports_abandoned() {
        let (completion, mut handle) = Completion::<u32>::channel();
        drop(completion);
        assert!(matches!(
            handle.wait_timeout(Duration::from_secs(5)),
            Err(SchedulerError::Abandoned)
        ));
    }

    #[tokio::test]
    async fn test_recv_from_async_context() {
        let (mut completion, handle) = Completion::channel();
        std::thread::spawn(move || completion.signal("done"));
        assert_eq!(handle.recv().await.unwrap(), "done");
    }
}
