use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::{domain::ChatTarget, errors::Error, messaging::port::MessagingPort, Result};

/// Records every send; can be switched to fail or to wait on a gate.
#[derive(Default)]
pub(crate) struct FakeMessenger {
    pub sends: Mutex<Vec<(ChatTarget, String)>>,
    /// Notified each time a gated send starts waiting.
    pub entered: Notify,
    fail: AtomicBool,
    gate: Option<Arc<Semaphore>>,
}

impl FakeMessenger {
    pub fn failing() -> Self {
        let m = Self::default();
        m.fail.store(true, Ordering::SeqCst);
        m
    }

    /// Every send waits for one permit of the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let m = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (m, gate)
    }

    pub fn texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_html(&self, chat: &ChatTarget, html: &str) -> Result<()> {
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.acquire()
                .await
                .map_err(|e| Error::External(e.to_string()))?
                .forget();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: Bad Request".to_string()));
        }
        self.sends
            .lock()
            .unwrap()
            .push((chat.clone(), html.to_string()));
        Ok(())
    }
}
