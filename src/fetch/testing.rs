//! Test doubles for the fetch layer.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{FetchError, RequestMethod, Sleeper, Transport};

/// A canned response.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Body(Vec<u8>),
    Status(u16, Option<String>),
    Timeout,
}

pub(crate) fn status(code: u16, server: Option<&str>) -> Reply {
    Reply::Status(code, server.map(str::to_string))
}

type Responder = Box<dyn Fn(RequestMethod, &str) -> Reply + Send + Sync>;

/// Transport answering from per-URL scripts, then from a fallback function.
///
/// The last scripted reply for a URL repeats once its script runs out.
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Responder,
    log: Mutex<Vec<(RequestMethod, String)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::from_fn(|_, _| Reply::Status(404, None))
    }

    pub(crate) fn from_fn(
        responder: impl Fn(RequestMethod, &str) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Box::new(responder),
            log: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn script(&self, url: &str, replies: Vec<Result<Vec<u8>, u16>>) {
        for reply in replies {
            self.script_result(
                url,
                match reply {
                    Ok(body) => Reply::Body(body),
                    Err(code) => Reply::Status(code, None),
                },
            );
        }
    }

    pub(crate) fn script_result(&self, url: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|(_, u)| u == url).count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<(RequestMethod, String)> {
        self.log.lock().unwrap().clone()
    }

    fn next_reply(&self, method: RequestMethod, url: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => (self.fallback)(method, url),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, method: RequestMethod, url: &str) -> Result<Vec<u8>, FetchError> {
        self.log.lock().unwrap().push((method, url.to_string()));
        match self.next_reply(method, url) {
            Reply::Body(body) => Ok(body),
            Reply::Status(code, server) => Err(FetchError::http_status(method, url, code, server)),
            Reply::Timeout => Err(FetchError::timeout(method, url)),
        }
    }
}

/// Sleeper that records requested delays and returns immediately.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
