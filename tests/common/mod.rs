#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use multitail::{ChangeSignal, LogEvent, SignalError, Signals, Subscribe, Tail};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const TIMEOUT_2_SEC: Duration = Duration::from_millis(2000);

type SignalTx = mpsc::UnboundedSender<Result<ChangeSignal, SignalError>>;

/// Signal source fired by hand, so tests decide exactly when reads happen.
#[derive(Clone, Default)]
pub struct ManualSource {
    senders: Arc<Mutex<HashMap<PathBuf, SignalTx>>>,
}

impl ManualSource {
    pub fn signal(&self, path: &Path) {
        let senders = self.senders.lock().unwrap();
        senders[path].send(Ok(ChangeSignal::new(path))).unwrap();
    }

    pub fn fail(&self, path: &Path, message: &str) {
        let senders = self.senders.lock().unwrap();
        senders[path]
            .send(Err(SignalError::Source {
                path: path.to_path_buf(),
                message: message.to_string(),
            }))
            .unwrap();
    }

    pub fn close(&self, path: &Path) {
        self.senders.lock().unwrap().remove(path);
    }
}

impl Subscribe for ManualSource {
    fn subscribe(&self, path: &Path) -> Result<Signals, SignalError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(path.to_path_buf(), tx);

        let signals = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|signal| (signal, rx))
        });
        Ok(Box::pin(signals))
    }
}

pub fn append(path: &Path, data: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(data).unwrap();
    file.sync_all().unwrap();
}

pub async fn next_event(tail: &mut Tail) -> LogEvent {
    timeout(TIMEOUT_2_SEC, tail.next_event())
        .await
        .expect("timed out waiting for a line")
        .expect("event stream ended")
}

pub async fn assert_quiet(tail: &mut Tail) {
    let res = timeout(Duration::from_millis(100), tail.next_event()).await;
    assert!(res.is_err(), "unexpected event: {:?}", res);
}
